//! Run driver: enumerate scenarios, run each in its own sandbox, report.
use crate::archive;
use crate::commands::CommandTable;
use crate::config::HarnessConfig;
use crate::process::{elapsed_millis, CancelToken};
use crate::report::{RunSummary, ScenarioReport};
use crate::sandbox::{self, ProvisionOptions};
use crate::script::{self, ExecutionContext, Outcome};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Directory scanned when no scenarios are named.
pub const DEFAULT_SCENARIO_DIR: &str = "tests";
const SCENARIO_EXTENSION: &str = "script";

#[derive(Debug, Default)]
pub struct RunResult {
    pub summary: RunSummary,
    pub entries: Vec<ScenarioReport>,
}

/// Expand inputs into scenario files; directories yield their sorted `*.script` files.
pub fn discover_scenarios(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let defaults = [PathBuf::from(DEFAULT_SCENARIO_DIR)];
    let inputs = if inputs.is_empty() { &defaults[..] } else { inputs };
    let mut scenarios = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found = Vec::new();
            for entry in
                fs::read_dir(input).with_context(|| format!("read dir {}", input.display()))?
            {
                let path = entry
                    .with_context(|| format!("read dir {}", input.display()))?
                    .path();
                if path.is_file()
                    && path.extension().and_then(|ext| ext.to_str()) == Some(SCENARIO_EXTENSION)
                {
                    found.push(path);
                }
            }
            found.sort();
            scenarios.extend(found);
        } else if input.is_file() {
            scenarios.push(input.clone());
        } else {
            return Err(anyhow!("scenario path {} not found", input.display()));
        }
    }
    Ok(scenarios)
}

/// Run every scenario sequentially, writing progress to `out`.
pub fn run(config: &HarnessConfig, scenarios: &[PathBuf], out: &mut dyn Write) -> Result<RunResult> {
    let table = CommandTable::new(config.subject.clone());
    let mut result = RunResult::default();
    for path in scenarios {
        let name = archive::scenario_name(path);
        if let Some(filter) = &config.filter {
            if !filter.is_match(&name) {
                tracing::debug!(scenario = %name, "filtered out");
                continue;
            }
        }
        writeln!(out, "---- TEST_{name}").context("write progress")?;
        let started = Instant::now();
        let finished = run_scenario(config, &table, path, &name);
        let elapsed = started.elapsed();
        tracing::info!(
            scenario = %name,
            elapsed_ms = elapsed_millis(elapsed),
            outcome = ?finished.outcome,
            "scenario finished"
        );
        print_outcome(out, &finished)?;

        result.summary.record(&finished.outcome);
        let failed = finished.outcome.is_failed();
        let mut entry = ScenarioReport::new(&name, path, finished.outcome, elapsed);
        entry.retained_sandbox = finished
            .retained
            .map(|root| root.display().to_string());
        result.entries.push(entry);

        if failed && config.stop_on_failure {
            tracing::warn!(scenario = %name, "stopping after first failure");
            break;
        }
    }
    writeln!(out, "{}", result.summary.summary_line()).context("write summary")?;
    Ok(result)
}

struct Finished {
    outcome: Outcome,
    log: String,
    retained: Option<PathBuf>,
}

fn run_scenario(config: &HarnessConfig, table: &CommandTable, path: &Path, name: &str) -> Finished {
    let failed = |diagnostic: String| Finished {
        outcome: Outcome::failed(diagnostic),
        log: String::new(),
        retained: None,
    };
    let archive = match archive::load(path) {
        Ok(archive) => archive,
        Err(err) => return failed(format!("{name}: {err}")),
    };
    let sandbox = match sandbox::provision(
        &archive,
        &config.artifact,
        &ProvisionOptions::from_config(config),
    ) {
        Ok(sandbox) => sandbox,
        Err(err) => return failed(format!("{name}: provision sandbox: {err}")),
    };

    let cancel = config
        .timeout
        .map(CancelToken::with_timeout)
        .unwrap_or_default();
    let mut ctx = ExecutionContext::new(name, &sandbox, cancel);
    let outcome = script::execute(&archive.script, &mut ctx, table);
    let log = ctx.into_log();

    let retained = if outcome.is_failed() && config.retain_failed {
        Some(sandbox.retain())
    } else {
        let root = sandbox.root().to_path_buf();
        if let Err(err) = sandbox.remove() {
            tracing::warn!(root = %root.display(), error = %err, "failed to remove sandbox");
        }
        None
    };
    Finished {
        outcome,
        log,
        retained,
    }
}

fn print_outcome(out: &mut dyn Write, finished: &Finished) -> Result<()> {
    match &finished.outcome {
        Outcome::Passed => {}
        Outcome::Skipped { reason } if reason.is_empty() => {
            writeln!(out, "Skipping test").context("write progress")?
        }
        Outcome::Skipped { reason } => {
            writeln!(out, "Skipping test: {reason}").context("write progress")?
        }
        Outcome::Failed { diagnostic } => {
            writeln!(out, "{diagnostic}").context("write progress")?;
            if !finished.log.is_empty() {
                write!(out, "{}", finished.log).context("write progress")?;
            }
            if let Some(root) = &finished.retained {
                writeln!(out, "sandbox retained at {}", root.display())
                    .context("write progress")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
