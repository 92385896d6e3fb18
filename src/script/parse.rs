//! Script body tokenization and `$VAR` expansion.
use crate::sandbox::Environment;
use thiserror::Error;

/// One executable script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLine {
    pub number: usize,
    pub text: String,
    pub words: Vec<String>,
}

#[derive(Debug, Error)]
#[error("line {line}: {message}")]
pub struct ScriptParseError {
    pub line: usize,
    pub message: String,
}

/// Split a script body into command lines, dropping blanks and `#` comments.
pub fn parse_script(body: &str) -> Result<Vec<ScriptLine>, ScriptParseError> {
    let mut lines = Vec::new();
    for (idx, raw) in body.lines().enumerate() {
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        let words = shell_words::split(text).map_err(|err| ScriptParseError {
            line: idx + 1,
            message: err.to_string(),
        })?;
        if words.is_empty() {
            continue;
        }
        lines.push(ScriptLine {
            number: idx + 1,
            text: text.to_string(),
            words,
        });
    }
    Ok(lines)
}

/// Expand `$NAME` and `${NAME}` against `env`; unset names expand to nothing.
pub fn expand(word: &str, env: &Environment) -> String {
    let mut out = String::with_capacity(word.len());
    let mut rest = word;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        if let Some(braced) = after.strip_prefix('{') {
            if let Some(end) = braced.find('}') {
                let name = &braced[..end];
                if is_var_name(name) {
                    out.push_str(env.get(name).unwrap_or(""));
                    rest = &braced[end + 1..];
                    continue;
                }
            }
            out.push('$');
            rest = after;
            continue;
        }
        let len = after
            .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
            .unwrap_or(after.len());
        if len == 0 {
            out.push('$');
        } else {
            out.push_str(env.get(&after[..len]).unwrap_or(""));
        }
        rest = &after[len..];
    }
    out.push_str(rest);
    out
}

fn is_var_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
