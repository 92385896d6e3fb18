//! Script runtime.
//!
//! Executes a scenario script line by line against one sandbox. Each line is
//! dispatched through the [`CommandTable`]; a command either finishes
//! immediately or hands back a [`Pending`] token that is waited on before the
//! next line starts. The first error ends the script as failed, the skip
//! signal ends it as skipped, and running off the end means it passed.
mod parse;

use parse::{expand, parse_script};

use crate::commands::CommandTable;
use crate::process::CancelToken;
use crate::sandbox::{Environment, Sandbox};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Terminal classification of one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed { diagnostic: String },
    Skipped { reason: String },
}

impl Outcome {
    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Outcome::Failed {
            diagnostic: diagnostic.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

/// Errors a command (or its completion) can end with.
#[derive(Debug, Error)]
pub enum CmdError {
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("{reason}; usage: {verb} {usage}")]
    Usage {
        verb: &'static str,
        usage: &'static str,
        reason: String,
    },
    /// Dedicated skip signal; never reported as a failure.
    #[error("skipped")]
    Skip(String),
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result of waiting on a [`Pending`] command.
#[derive(Debug)]
pub struct Completed {
    pub stdout: String,
    pub stderr: String,
    pub result: Result<(), CmdError>,
}

type WaitFn = Box<dyn FnOnce(&CancelToken) -> Completed>;

/// Work started by a command that the runtime must wait on.
pub struct Pending {
    wait: WaitFn,
}

impl Pending {
    pub fn new(wait: impl FnOnce(&CancelToken) -> Completed + 'static) -> Self {
        Self {
            wait: Box::new(wait),
        }
    }

    pub fn wait(self, cancel: &CancelToken) -> Completed {
        (self.wait)(cancel)
    }
}

impl std::fmt::Debug for Pending {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Pending")
    }
}

/// State one running script sees: its sandbox, cwd, environment and log.
#[derive(Debug)]
pub struct ExecutionContext<'a> {
    name: String,
    sandbox: &'a Sandbox,
    cancel: CancelToken,
    cwd: PathBuf,
    env: Environment,
    log: String,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(name: &str, sandbox: &'a Sandbox, cancel: CancelToken) -> Self {
        Self {
            name: name.to_string(),
            sandbox,
            cancel,
            cwd: sandbox.root().to_path_buf(),
            env: sandbox.env().clone(),
            log: String::new(),
        }
    }

    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn set_cwd(&mut self, cwd: PathBuf) {
        self.cwd = cwd;
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// Resolve a script-supplied path against the current directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.cwd.join(path)
    }

    pub fn log(&mut self, text: &str) {
        self.log.push_str(text);
        if !text.ends_with('\n') {
            self.log.push('\n');
        }
    }

    fn log_output(&mut self, stdout: &str, stderr: &str) {
        if !stdout.is_empty() {
            self.log("[stdout]");
            self.log(stdout);
        }
        if !stderr.is_empty() {
            self.log("[stderr]");
            self.log(stderr);
        }
    }

    pub fn into_log(self) -> String {
        self.log
    }
}

/// Run `body` to completion and classify the result.
pub fn execute(body: &str, ctx: &mut ExecutionContext<'_>, table: &CommandTable) -> Outcome {
    let lines = match parse_script(body) {
        Ok(lines) => lines,
        Err(err) => {
            return Outcome::failed(format!("{}:{}: {}", ctx.name, err.line, err.message))
        }
    };
    tracing::debug!(scenario = %ctx.name, lines = lines.len(), "script running");

    for line in &lines {
        if ctx.cancel.is_cancelled() {
            return Outcome::failed("cancelled");
        }
        ctx.log(&format!("> {}", line.text));
        let words: Vec<String> = line.words.iter().map(|word| expand(word, &ctx.env)).collect();
        let Some((verb, args)) = words.split_first() else {
            continue;
        };

        let result = match table.dispatch(verb, ctx, args) {
            Ok(Some(pending)) => {
                let cancel = ctx.cancel.clone();
                let done = pending.wait(&cancel);
                ctx.log_output(&done.stdout, &done.stderr);
                done.result
            }
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {}
            Err(CmdError::Skip(reason)) => {
                tracing::debug!(scenario = %ctx.name, line = line.number, "script skipped");
                return Outcome::Skipped { reason };
            }
            Err(CmdError::Cancelled) => return Outcome::failed("cancelled"),
            Err(err) => {
                let diagnostic = format!("{}:{}: {verb}: {err:#}", ctx.name, line.number);
                ctx.log(&format!("FAIL: {diagnostic}"));
                return Outcome::failed(diagnostic);
            }
        }
    }
    Outcome::Passed
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
