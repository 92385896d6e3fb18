//! Shared test infrastructure for integration tests.
//!
//! Each fixture builds a throwaway installation root whose `bin/snort` is a
//! shell script, so scenarios run without a real traffic inspector.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Stand-in subject: prints its argv, then sleeps or exits as told.
const FAKE_SUBJECT: &str = r#"#!/bin/sh
for arg in "$@"; do
    echo "arg: $arg"
done
if [ -n "$SUBJECT_SLEEP" ]; then
    sleep "$SUBJECT_SLEEP"
fi
exit "${SUBJECT_EXIT:-0}"
"#;

/// Subset of the JSON run report the tests look at.
#[derive(Debug, Deserialize)]
pub struct Report {
    pub schema_version: u32,
    pub summary: Summary,
    pub entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub diagnostic: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Result of one `sh3` invocation.
#[derive(Debug)]
pub struct RunOutput {
    pub code: Option<i32>,
    pub stderr: String,
}

pub struct TestFixture {
    dir: TempDir,
}

impl TestFixture {
    pub fn new() -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        let root = dir.path();
        for name in ["bin", "lib", "include"] {
            fs::create_dir_all(root.join("install").join(name))?;
        }
        let subject = root.join("install/bin/snort");
        fs::write(&subject, FAKE_SUBJECT)?;
        make_executable(&subject)?;
        fs::create_dir_all(root.join("build/debug"))?;
        fs::write(root.join("build/debug/inspector.so"), b"plugin")?;
        fs::create_dir_all(root.join("scenarios"))?;
        fs::create_dir_all(root.join("sandboxes"))?;
        fs::create_dir_all(root.join("xdg"))?;
        fs::write(
            root.join("sh3.json"),
            serde_json::to_vec_pretty(&serde_json::json!({
                "schema_version": 1,
                "install_root": root.join("install"),
                "build_dir": root.join("build"),
                "artifact_name": "inspector.so",
                "sandbox_parent": root.join("sandboxes"),
            }))?,
        )?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn scenarios(&self) -> PathBuf {
        self.root().join("scenarios")
    }

    pub fn report_path(&self) -> PathBuf {
        self.root().join("out/report.json")
    }

    /// Write `<name>.script` into the scenario directory.
    pub fn scenario(&self, name: &str, body: &str) -> anyhow::Result<PathBuf> {
        let path = self.scenarios().join(format!("{name}.script"));
        fs::write(&path, body)?;
        Ok(path)
    }

    /// Run `sh3` with the fixture config plus `extra` arguments.
    pub fn run(&self, extra: &[&str]) -> anyhow::Result<RunOutput> {
        let output = Command::new(env!("CARGO_BIN_EXE_sh3"))
            .arg("--config")
            .arg(self.root().join("sh3.json"))
            .args(extra)
            .current_dir(self.root())
            .env("XDG_CONFIG_HOME", self.root().join("xdg"))
            .env_remove("SH3_LOG")
            .output()?;
        Ok(RunOutput {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Run every scenario in the fixture directory.
    pub fn run_all(&self, extra: &[&str]) -> anyhow::Result<RunOutput> {
        let scenarios = self.scenarios();
        let scenarios = scenarios.to_string_lossy().to_string();
        let mut args = extra.to_vec();
        args.push(&scenarios);
        self.run(&args)
    }

    pub fn read_report(&self) -> anyhow::Result<Report> {
        let text = fs::read_to_string(self.report_path())?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn leftover_sandboxes(&self) -> anyhow::Result<usize> {
        Ok(fs::read_dir(self.root().join("sandboxes"))?.count())
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}
