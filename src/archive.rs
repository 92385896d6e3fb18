//! Scenario archive loader.
//!
//! A scenario file is a txtar-style bundle: the leading section is the script
//! body, followed by `-- name --` marker lines that each open a file section.
//! File bodies are kept byte-for-byte; nothing here interprets them.
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One named blob carried by a scenario archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub data: Vec<u8>,
}

/// Parsed scenario: script body plus the fixture files it expects.
#[derive(Debug, Clone)]
pub struct ScenarioArchive {
    pub source: PathBuf,
    pub name: String,
    pub script: String,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("read scenario {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}:{line}: file marker has an empty name", path.display())]
    EmptyName { path: PathBuf, line: usize },
    #[error("{}:{line}: file name is not valid UTF-8", path.display())]
    NameEncoding { path: PathBuf, line: usize },
    #[error("{}:{line}: duplicate file {name:?}", path.display())]
    Duplicate {
        path: PathBuf,
        line: usize,
        name: String,
    },
    #[error("{}: script section is not valid UTF-8", path.display())]
    ScriptEncoding { path: PathBuf },
}

/// Read and parse the scenario archive at `path`.
pub fn load(path: &Path) -> Result<ScenarioArchive, ParseError> {
    let bytes = fs::read(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(path, &bytes)
}

/// Parse archive bytes; `path` is only used for the identity and diagnostics.
pub fn parse(path: &Path, bytes: &[u8]) -> Result<ScenarioArchive, ParseError> {
    let mut script_end = bytes.len();
    // (line number, name, marker offset, data offset)
    let mut sections: Vec<(usize, String, usize, usize)> = Vec::new();

    let mut offset = 0;
    let mut line_no = 0;
    while offset < bytes.len() {
        line_no += 1;
        let line_end = match bytes[offset..].iter().position(|b| *b == b'\n') {
            Some(pos) => offset + pos + 1,
            None => bytes.len(),
        };
        let line = &bytes[offset..line_end];
        if let Some(raw_name) = marker_name(line) {
            let name = std::str::from_utf8(raw_name)
                .map_err(|_| ParseError::NameEncoding {
                    path: path.to_path_buf(),
                    line: line_no,
                })?
                .trim()
                .to_string();
            if name.is_empty() {
                return Err(ParseError::EmptyName {
                    path: path.to_path_buf(),
                    line: line_no,
                });
            }
            if sections.is_empty() {
                script_end = offset;
            }
            sections.push((line_no, name, offset, line_end));
        }
        offset = line_end;
    }

    let script = std::str::from_utf8(&bytes[..script_end])
        .map_err(|_| ParseError::ScriptEncoding {
            path: path.to_path_buf(),
        })?
        .to_string();

    let mut seen = HashSet::new();
    let mut files = Vec::with_capacity(sections.len());
    for (idx, (line, name, _, data_start)) in sections.iter().enumerate() {
        if !seen.insert(name.clone()) {
            return Err(ParseError::Duplicate {
                path: path.to_path_buf(),
                line: *line,
                name: name.clone(),
            });
        }
        let data_end = match sections.get(idx + 1) {
            Some((_, _, next_marker, _)) => *next_marker,
            None => bytes.len(),
        };
        files.push(FileEntry {
            name: name.clone(),
            data: bytes[*data_start..data_end].to_vec(),
        });
    }

    Ok(ScenarioArchive {
        source: path.to_path_buf(),
        name: scenario_name(path),
        script,
        files,
    })
}

/// Scenario name derived from the file stem (`tests/foo.script` -> `foo`).
pub fn scenario_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn marker_name(line: &[u8]) -> Option<&[u8]> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let inner = line.strip_prefix(b"-- ")?.strip_suffix(b" --")?;
    Some(inner)
}
