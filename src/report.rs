//! Run accounting and the optional JSON report.
use crate::process::elapsed_millis;
use crate::script::Outcome;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const REPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failure,
}

/// Counters over every recorded outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Passed => self.passed += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
        }
    }

    pub fn finalize(&self) -> RunStatus {
        if self.failed > 0 {
            RunStatus::Failure
        } else {
            RunStatus::Success
        }
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{} of {} tests passed, {} skipped",
            self.passed, self.total, self.skipped
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub source: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retained_sandbox: Option<String>,
}

impl ScenarioReport {
    pub fn new(name: &str, source: &Path, outcome: Outcome, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            source: source.display().to_string(),
            outcome,
            duration_ms: elapsed_millis(duration),
            retained_sandbox: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub schema_version: u32,
    pub generated_at_epoch_ms: u128,
    pub summary: RunSummary,
    pub entries: Vec<ScenarioReport>,
}

impl RunReport {
    pub fn new(summary: RunSummary, entries: Vec<ScenarioReport>) -> Result<Self> {
        let generated_at_epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("compute timestamp")?
            .as_millis();
        Ok(Self {
            schema_version: REPORT_SCHEMA_VERSION,
            generated_at_epoch_ms,
            summary,
            entries,
        })
    }
}

pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let text = serde_json::to_string_pretty(report).context("serialize run report")?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create parent dir {}", parent.display()))?;
    }
    std::fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
