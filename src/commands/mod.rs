//! Script verbs.
//!
//! The set of verbs is closed; [`CommandTable`] resolves a script word to a
//! [`Verb`] and runs its handler with the injected subject configuration.
mod cmp;
mod pcap;

use crate::config::SubjectConfig;
use crate::script::{CmdError, ExecutionContext, Pending};
use std::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Pcap,
    Skip,
    Cmp,
    Env,
    Cd,
}

const NAMES: [(&str, Verb); 7] = [
    ("pcap", Verb::Pcap),
    ("invoke-subject", Verb::Pcap),
    ("skip", Verb::Skip),
    ("cmp", Verb::Cmp),
    ("compare-files", Verb::Cmp),
    ("env", Verb::Env),
    ("cd", Verb::Cd),
];

impl Verb {
    pub fn lookup(name: &str) -> Option<Verb> {
        NAMES
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, verb)| *verb)
    }

    pub fn name(self) -> &'static str {
        match self {
            Verb::Pcap => "pcap",
            Verb::Skip => "skip",
            Verb::Cmp => "cmp",
            Verb::Env => "env",
            Verb::Cd => "cd",
        }
    }

    pub fn usage(self) -> &'static str {
        match self {
            Verb::Pcap => "[-expect-fail] files...",
            Verb::Skip => "[msg]",
            Verb::Cmp => "file1 file2",
            Verb::Env => "[key=value...]",
            Verb::Cd => "dir",
        }
    }

    fn usage_error(self, reason: impl Into<String>) -> CmdError {
        CmdError::Usage {
            verb: self.name(),
            usage: self.usage(),
            reason: reason.into(),
        }
    }
}

/// Immutable verb table shared by every scenario in a run.
#[derive(Debug, Clone)]
pub struct CommandTable {
    subject: SubjectConfig,
}

impl CommandTable {
    pub fn new(subject: SubjectConfig) -> Self {
        Self { subject }
    }

    /// Run the handler for `name`; a returned [`Pending`] must be waited on.
    pub fn dispatch(
        &self,
        name: &str,
        ctx: &mut ExecutionContext<'_>,
        args: &[String],
    ) -> Result<Option<Pending>, CmdError> {
        let verb = Verb::lookup(name).ok_or_else(|| CmdError::Unknown(name.to_string()))?;
        match verb {
            Verb::Pcap => pcap::run(&self.subject, ctx, args).map(Some),
            Verb::Skip => skip(args).map(|()| None),
            Verb::Cmp => cmp::run(ctx, args).map(|()| None),
            Verb::Env => env(ctx, args).map(|()| None),
            Verb::Cd => cd(ctx, args).map(|()| None),
        }
    }
}

fn skip(args: &[String]) -> Result<(), CmdError> {
    match args {
        [] => Err(CmdError::Skip(String::new())),
        [reason] => Err(CmdError::Skip(reason.clone())),
        _ => Err(Verb::Skip.usage_error("too many arguments")),
    }
}

fn env(ctx: &mut ExecutionContext<'_>, args: &[String]) -> Result<(), CmdError> {
    if args.is_empty() {
        let listing: Vec<String> = ctx
            .env()
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        for line in listing {
            ctx.log(&line);
        }
        return Ok(());
    }
    let mut assignments = Vec::with_capacity(args.len());
    for arg in args {
        match arg.split_once('=') {
            Some((key, value)) if !key.is_empty() => assignments.push((key, value)),
            _ => return Err(Verb::Env.usage_error(format!("expected key=value, got {arg:?}"))),
        }
    }
    for (key, value) in assignments {
        ctx.env_mut().set(key, value);
    }
    Ok(())
}

fn cd(ctx: &mut ExecutionContext<'_>, args: &[String]) -> Result<(), CmdError> {
    let [dir] = args else {
        return Err(Verb::Cd.usage_error("expected exactly one directory"));
    };
    let target = ctx.resolve(dir);
    let resolved = fs::canonicalize(&target)
        .map_err(|err| anyhow::anyhow!("directory {dir} not found: {err}"))?;
    let root = fs::canonicalize(ctx.root())
        .map_err(|err| anyhow::anyhow!("resolve sandbox root: {err}"))?;
    if !resolved.starts_with(&root) {
        return Err(anyhow::anyhow!("directory {dir} is outside the sandbox").into());
    }
    if !resolved.is_dir() {
        return Err(anyhow::anyhow!("{dir} is not a directory").into());
    }
    ctx.set_cwd(resolved);
    Ok(())
}
