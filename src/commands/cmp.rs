//! `cmp`: byte-for-byte comparison of two files.
use super::Verb;
use crate::script::{CmdError, ExecutionContext};
use anyhow::{anyhow, Context};
use std::fs;

pub(super) fn run(ctx: &mut ExecutionContext<'_>, args: &[String]) -> Result<(), CmdError> {
    let [left, right] = args else {
        return Err(Verb::Cmp.usage_error(format!("expected 2 files, got {}", args.len())));
    };
    let read = |name: &String| {
        let path = ctx.resolve(name);
        fs::read(&path).with_context(|| format!("reading {name}"))
    };
    let left_bytes = read(left)?;
    let right_bytes = read(right)?;
    if left_bytes != right_bytes {
        return Err(anyhow!("files {left} and {right} differ").into());
    }
    Ok(())
}
