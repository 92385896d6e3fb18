//! CLI argument parsing.
//!
//! Flags map one-to-one onto [`ConfigOverrides`]; anything not given on the
//! command line falls back to the config file.
use crate::config::{ConfigOverrides, LinkMode, Variant};
use clap::Parser;
use std::path::PathBuf;

/// Run scripted scenarios against a plugin build, each in its own sandbox.
#[derive(Parser, Debug)]
#[command(
    name = "sh3",
    version,
    about = "Sandboxed scenario runner for traffic-inspection plugins",
    after_help = "Examples:\n  sh3 --artifact-name inspector.so\n  sh3 --artifact build/debug/inspector.so --run '^http_' tests/\n  sh3 --sanitize --keep-failed --report out/report.json tests/decode.script"
)]
pub struct RootArgs {
    /// Scenario files or directories of `*.script` files (default: tests/)
    #[arg(value_name = "SCENARIOS")]
    pub scenarios: Vec<PathBuf>,

    /// Only run scenarios whose name matches this regular expression
    #[arg(long = "run", value_name = "REGEX")]
    pub filter: Option<String>,

    /// Config file (default: <config dir>/sh3/config.json when present)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Installation root providing bin/, lib/ and include/
    #[arg(long, value_name = "DIR")]
    pub install_root: Option<PathBuf>,

    /// Explicit artifact path; bypasses build-dir selection
    #[arg(long, value_name = "FILE")]
    pub artifact: Option<PathBuf>,

    /// Build output directory holding debug/ and release/
    #[arg(long, value_name = "DIR")]
    pub build_dir: Option<PathBuf>,

    /// Artifact file name inside the build variant directory
    #[arg(long, value_name = "NAME")]
    pub artifact_name: Option<String>,

    /// Build variant to test
    #[arg(long, value_enum)]
    pub variant: Option<Variant>,

    /// How runtime directories are brought into each sandbox
    #[arg(long, value_enum)]
    pub link_mode: Option<LinkMode>,

    /// Preload the address-sanitizer runtime into the subject
    #[arg(long)]
    pub sanitize: bool,

    /// Sanitizer runtime library (implies --sanitize)
    #[arg(long, value_name = "FILE")]
    pub sanitizer_lib: Option<PathBuf>,

    /// Extra environment for every scenario (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Per-scenario timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<f64>,

    /// Keep the sandbox of a failing scenario for inspection
    #[arg(long)]
    pub keep_failed: bool,

    /// Stop after the first failing scenario
    #[arg(long)]
    pub stop_on_failure: bool,

    /// Write a JSON run report to this path
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Enable debug logging (SH3_LOG takes precedence)
    #[arg(long)]
    pub verbose: bool,
}

impl RootArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            install_root: self.install_root.clone(),
            artifact: self.artifact.clone(),
            build_dir: self.build_dir.clone(),
            artifact_name: self.artifact_name.clone(),
            variant: self.variant,
            link_mode: self.link_mode,
            sanitize: self.sanitize,
            sanitizer_lib: self.sanitizer_lib.clone(),
            env: self.env.clone(),
            timeout_seconds: self.timeout,
            retain_failed: self.keep_failed,
            stop_on_failure: self.stop_on_failure,
            filter: self.filter.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_overrides() {
        let args = RootArgs::try_parse_from([
            "sh3",
            "--run",
            "^http",
            "--variant",
            "release",
            "--link-mode",
            "copy",
            "--env",
            "TZ=UTC",
            "--env",
            "LANG=C",
            "--timeout",
            "2.5",
            "--keep-failed",
            "tests/a.script",
            "more",
        ])
        .expect("parse args");
        assert_eq!(args.scenarios, [PathBuf::from("tests/a.script"), PathBuf::from("more")]);
        let overrides = args.overrides();
        assert_eq!(overrides.filter.as_deref(), Some("^http"));
        assert_eq!(overrides.variant, Some(Variant::Release));
        assert_eq!(overrides.link_mode, Some(LinkMode::Copy));
        assert_eq!(overrides.env, ["TZ=UTC", "LANG=C"]);
        assert_eq!(overrides.timeout_seconds, Some(2.5));
        assert!(overrides.retain_failed);
        assert!(!overrides.stop_on_failure);
    }

    #[test]
    fn rejects_unknown_variant() {
        assert!(RootArgs::try_parse_from(["sh3", "--variant", "fast"]).is_err());
    }
}
