use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod archive;
mod cli;
mod commands;
mod config;
mod driver;
mod process;
mod report;
mod sandbox;
mod script;
#[cfg(test)]
mod test_support;

use cli::RootArgs;
use config::ConfigFile;
use report::{RunReport, RunStatus};

const LOG_ENV: &str = "SH3_LOG";

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.verbose);
    match run(&args) {
        Ok(RunStatus::Success) => ExitCode::SUCCESS,
        Ok(RunStatus::Failure) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("sh3: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &RootArgs) -> Result<RunStatus> {
    let file = match args.config.clone().or_else(existing_default_config) {
        Some(path) => config::load_config_file(&path)?,
        None => ConfigFile::default(),
    };
    let moddir = std::env::current_dir().context("resolve current directory")?;
    let config = config::resolve_config(file, args.overrides(), moddir)?;
    let scenarios = driver::discover_scenarios(&args.scenarios)?;
    tracing::debug!(
        scenarios = scenarios.len(),
        install_root = %config.install_root.display(),
        artifact = %config.artifact.path().display(),
        "starting run"
    );

    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    let result = driver::run(&config, &scenarios, &mut out)?;
    out.flush().context("flush stderr")?;

    if let Some(path) = &args.report {
        let report = RunReport::new(result.summary, result.entries)?;
        report::write_report(path, &report)?;
        tracing::info!(path = %path.display(), "wrote run report");
    }
    Ok(result.summary.finalize())
}

fn existing_default_config() -> Option<std::path::PathBuf> {
    config::default_config_path().filter(|path| path.is_file())
}
