//! `pcap`: run the subject program over capture files inside the sandbox.
use super::Verb;
use crate::config::SubjectConfig;
use crate::process::{self, Exit, ProcessOutput};
use crate::sandbox::{ARTIFACT_DIR, Environment};
use crate::script::{CmdError, Completed, ExecutionContext, Pending};
use anyhow::anyhow;
use std::path::Path;
use std::process::ExitStatus;

#[derive(Debug, PartialEq, Eq)]
struct PcapArgs {
    expect_fail: bool,
    files: Vec<String>,
}

pub(super) fn run(
    subject: &SubjectConfig,
    ctx: &mut ExecutionContext<'_>,
    args: &[String],
) -> Result<Pending, CmdError> {
    let parsed = parse_args(args)?;
    let root = ctx.root();
    let program = root.join(&subject.program);
    let argv = subject_args(root, subject, &parsed.files);
    let env = subject_env(root, subject, ctx.env());

    let running = process::start(&program, &argv, &env, ctx.cwd())?;
    tracing::debug!(
        pid = running.id(),
        files = parsed.files.len(),
        expect_fail = parsed.expect_fail,
        "subject started"
    );
    let expect_fail = parsed.expect_fail;
    Ok(Pending::new(move |cancel| match running.wait(cancel) {
        Ok(output) => complete(output, expect_fail),
        Err(err) => Completed {
            stdout: String::new(),
            stderr: String::new(),
            result: Err(err.into()),
        },
    }))
}

fn parse_args(args: &[String]) -> Result<PcapArgs, CmdError> {
    let mut expect_fail = false;
    let mut rest = args;
    while let Some((first, tail)) = rest.split_first() {
        if first == "--" {
            rest = tail;
            break;
        }
        // A lone `-` is an operand, not a flag.
        let Some(flag) = first
            .strip_prefix("--")
            .or_else(|| first.strip_prefix('-'))
            .filter(|flag| !flag.is_empty())
        else {
            break;
        };
        expect_fail = match flag {
            "expect-fail" | "expect-fail=true" => true,
            "expect-fail=false" => false,
            _ => return Err(Verb::Pcap.usage_error(format!("unknown flag {first}"))),
        };
        rest = tail;
    }
    if rest.is_empty() {
        return Err(Verb::Pcap.usage_error("no capture files given"));
    }
    Ok(PcapArgs {
        expect_fail,
        files: rest.to_vec(),
    })
}

fn subject_args(root: &Path, subject: &SubjectConfig, files: &[String]) -> Vec<String> {
    let display = |path: &Path| path.to_string_lossy().to_string();
    vec![
        "-c".to_string(),
        display(&root.join(&subject.config_file)),
        "--script-path".to_string(),
        display(root),
        "--plugin-path".to_string(),
        display(&root.join(ARTIFACT_DIR)),
        "--daq-dir".to_string(),
        display(&root.join("lib")),
        "--warn-all".to_string(),
        "--pcap-list".to_string(),
        files.join(" "),
    ]
}

fn subject_env(root: &Path, subject: &SubjectConfig, base: &Environment) -> Environment {
    let mut env = base.clone();
    if let Some(instrumentation) = &subject.instrumentation {
        env.set("LD_PRELOAD", &instrumentation.library.to_string_lossy());
        env.set("LD_LIBRARY_PATH", &root.join("lib").to_string_lossy());
        if let Some(options) = &instrumentation.asan_options {
            env.set("ASAN_OPTIONS", options);
        }
    }
    env
}

fn complete(output: ProcessOutput, expect_fail: bool) -> Completed {
    tracing::debug!(
        elapsed_ms = process::elapsed_millis(output.duration),
        exit = ?output.exit,
        "subject finished"
    );
    let result = match output.exit {
        Exit::Cancelled => Err(CmdError::Cancelled),
        Exit::Exited(status) => judge(status, expect_fail),
    };
    Completed {
        stdout: output.stdout,
        stderr: output.stderr,
        result,
    }
}

// Only the exit status decides; output content is never inspected.
fn judge(status: ExitStatus, expect_fail: bool) -> Result<(), CmdError> {
    match (status.success(), expect_fail) {
        (true, false) | (false, true) => Ok(()),
        (true, true) => Err(anyhow!("expected failure did not occur").into()),
        (false, false) => Err(anyhow!("subject exited with {}", describe(status)).into()),
    }
}

fn describe(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => code.to_string(),
        None => status.to_string(),
    }
}
