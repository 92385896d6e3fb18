//! Run configuration.
//!
//! Everything the provisioner and the command extensions need (installation
//! root, artifact selection, subject invocation template, instrumentation) is
//! resolved once into a [`HarnessConfig`] and passed down explicitly. Values
//! come from an optional JSON file, then command-line overrides.
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;

pub const DEFAULT_INSTALL_ROOT: &str = "/opt/snort";
pub const DEFAULT_BUILD_DIR: &str = "build";
pub const DEFAULT_SUBJECT: &str = "bin/snort";
pub const DEFAULT_SUBJECT_CONFIG: &str = "cfg.lua";
pub const DEFAULT_FIXTURE_DIR: &str = "testdata";
const SANITIZER_LIBRARY: &str = "libasan.so";

/// Which prebuilt flavor of the artifact gets installed into `p/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[default]
    Debug,
    Release,
}

impl Variant {
    pub fn dir_name(self) -> &'static str {
        match self {
            Variant::Debug => "debug",
            Variant::Release => "release",
        }
    }
}

/// How shared runtime directories are brought into a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    #[default]
    Symlink,
    Copy,
}

/// On-disk config; every field is optional so a file can set just a few.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub schema_version: u32,
    #[serde(default)]
    pub install_root: Option<PathBuf>,
    #[serde(default)]
    pub artifact: Option<PathBuf>,
    #[serde(default)]
    pub build_dir: Option<PathBuf>,
    #[serde(default)]
    pub artifact_name: Option<String>,
    #[serde(default)]
    pub variant: Option<Variant>,
    #[serde(default)]
    pub link_mode: Option<LinkMode>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub subject_config: Option<String>,
    #[serde(default)]
    pub fixture_dir: Option<String>,
    #[serde(default)]
    pub sandbox_parent: Option<PathBuf>,
    #[serde(default)]
    pub sanitize: Option<bool>,
    #[serde(default)]
    pub sanitizer_lib: Option<PathBuf>,
    #[serde(default)]
    pub asan_options: Option<String>,
    /// `KEY=VALUE` entries, applied in order.
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    #[serde(default)]
    pub retain_failed: Option<bool>,
    #[serde(default)]
    pub stop_on_failure: Option<bool>,
}

/// Command-line values layered over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub install_root: Option<PathBuf>,
    pub artifact: Option<PathBuf>,
    pub build_dir: Option<PathBuf>,
    pub artifact_name: Option<String>,
    pub variant: Option<Variant>,
    pub link_mode: Option<LinkMode>,
    pub sanitize: bool,
    pub sanitizer_lib: Option<PathBuf>,
    pub env: Vec<String>,
    pub timeout_seconds: Option<f64>,
    pub retain_failed: bool,
    pub stop_on_failure: bool,
    pub filter: Option<String>,
}

/// Reference to the prebuilt artifact under test.
#[derive(Debug, Clone)]
pub struct ArtifactRef {
    pub build_dir: PathBuf,
    pub name: String,
    pub variant: Variant,
    pub explicit: Option<PathBuf>,
}

impl ArtifactRef {
    /// Path of the selected artifact on the host.
    pub fn path(&self) -> PathBuf {
        match &self.explicit {
            Some(path) => path.clone(),
            None => self
                .build_dir
                .join(self.variant.dir_name())
                .join(&self.name),
        }
    }

    /// Name the artifact takes under the sandbox `p/` directory.
    pub fn file_name(&self) -> String {
        self.explicit
            .as_ref()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.name.clone())
    }
}

/// Memory-safety instrumentation applied to subject runs.
#[derive(Debug, Clone)]
pub struct Instrumentation {
    pub library: PathBuf,
    pub asan_options: Option<String>,
}

/// How the subject program is launched inside a sandbox.
#[derive(Debug, Clone)]
pub struct SubjectConfig {
    /// Sandbox-relative path of the subject executable.
    pub program: String,
    /// Sandbox-relative path of the subject configuration file.
    pub config_file: String,
    pub instrumentation: Option<Instrumentation>,
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub install_root: PathBuf,
    pub artifact: ArtifactRef,
    pub link_mode: LinkMode,
    pub subject: SubjectConfig,
    pub fixture_dir: String,
    pub sandbox_parent: Option<PathBuf>,
    /// Directory the run was started from, exposed to scripts as `$moddir`.
    pub moddir: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub retain_failed: bool,
    pub stop_on_failure: bool,
    pub filter: Option<Regex>,
}

/// Default config location: `<config dir>/sh3/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sh3").join("config.json"))
}

/// Load and schema-check a config file.
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: ConfigFile = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {} in {}",
            config.schema_version,
            path.display()
        ));
    }
    Ok(config)
}

/// Merge file values and overrides into a validated [`HarnessConfig`].
pub fn resolve_config(
    file: ConfigFile,
    overrides: ConfigOverrides,
    moddir: PathBuf,
) -> Result<HarnessConfig> {
    let explicit = overrides.artifact.or(file.artifact);
    let name = overrides
        .artifact_name
        .or(file.artifact_name)
        .unwrap_or_default();
    if explicit.is_none() && name.trim().is_empty() {
        return Err(anyhow!(
            "no artifact configured (set --artifact or --artifact-name)"
        ));
    }
    if !name.is_empty() {
        validate_relative_path(&name, "artifact_name")?;
    }
    let artifact = ArtifactRef {
        build_dir: overrides
            .build_dir
            .or(file.build_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_DIR)),
        name,
        variant: overrides.variant.or(file.variant).unwrap_or_default(),
        explicit,
    };

    let program = file.subject.unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
    validate_relative_path(&program, "subject")?;
    let config_file = file
        .subject_config
        .unwrap_or_else(|| DEFAULT_SUBJECT_CONFIG.to_string());
    validate_relative_path(&config_file, "subject_config")?;
    let fixture_dir = file
        .fixture_dir
        .unwrap_or_else(|| DEFAULT_FIXTURE_DIR.to_string());
    validate_relative_path(&fixture_dir, "fixture_dir")?;

    let sanitize = overrides.sanitize || file.sanitize.unwrap_or(false);
    let sanitizer_lib = overrides.sanitizer_lib.or(file.sanitizer_lib);
    let instrumentation = if sanitize || sanitizer_lib.is_some() {
        let library = match sanitizer_lib {
            Some(path) => moddir.join(path),
            None => discover_sanitizer_library()?,
        };
        Some(Instrumentation {
            library,
            asan_options: file.asan_options,
        })
    } else {
        None
    };

    let mut env = Vec::new();
    for raw in file.env.iter().chain(overrides.env.iter()) {
        env.push(parse_env_assignment(raw)?);
    }

    let timeout = match overrides.timeout_seconds.or(file.timeout_seconds) {
        Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
        Some(secs) => return Err(anyhow!("timeout must be a positive number (got {secs})")),
        None => None,
    };

    let filter = overrides
        .filter
        .as_deref()
        .map(|pattern| {
            Regex::new(pattern).with_context(|| format!("invalid filter regexp {pattern:?}"))
        })
        .transpose()?;

    // Sandboxes link and preload these from another directory, so relative
    // settings are anchored at the module directory.
    let install_root = overrides
        .install_root
        .or(file.install_root)
        .map(|path| moddir.join(path))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_INSTALL_ROOT));
    let sandbox_parent = file.sandbox_parent.map(|path| moddir.join(path));

    Ok(HarnessConfig {
        install_root,
        artifact,
        link_mode: overrides.link_mode.or(file.link_mode).unwrap_or_default(),
        subject: SubjectConfig {
            program,
            config_file,
            instrumentation,
        },
        fixture_dir,
        sandbox_parent,
        moddir,
        env,
        timeout,
        retain_failed: overrides.retain_failed || file.retain_failed.unwrap_or(false),
        stop_on_failure: overrides.stop_on_failure || file.stop_on_failure.unwrap_or(false),
        filter,
    })
}

/// Split a `KEY=VALUE` assignment.
pub fn parse_env_assignment(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("invalid env assignment {raw:?} (expected KEY=VALUE)"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("invalid env assignment {raw:?} (empty key)"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Ask the C compiler where its address-sanitizer runtime lives.
pub fn discover_sanitizer_library() -> Result<PathBuf> {
    let compiler = which::which("gcc")
        .or_else(|_| which::which("cc"))
        .context("locate a C compiler to find the sanitizer runtime")?;
    let output = Command::new(&compiler)
        .arg(format!("-print-file-name={SANITIZER_LIBRARY}"))
        .output()
        .with_context(|| format!("run {}", compiler.display()))?;
    if !output.status.success() {
        return Err(anyhow!(
            "{} -print-file-name failed with status {}",
            compiler.display(),
            output.status
        ));
    }
    let printed = String::from_utf8_lossy(&output.stdout).trim().to_string();
    // The compiler echoes the bare name back when it has no such file.
    if printed.is_empty() || printed == SANITIZER_LIBRARY {
        return Err(anyhow!(
            "{} does not ship {SANITIZER_LIBRARY}",
            compiler.display()
        ));
    }
    tracing::debug!(library = %printed, "resolved sanitizer runtime");
    Ok(PathBuf::from(printed))
}

fn validate_relative_path(rel: &str, label: &str) -> Result<()> {
    let path = Path::new(rel);
    if rel.trim().is_empty() {
        return Err(anyhow!("{label} must be non-empty"));
    }
    if path.is_absolute() || has_parent_components(path) {
        return Err(anyhow!(
            "{label} must be a relative path without '..' (got {rel:?})"
        ));
    }
    Ok(())
}

fn has_parent_components(path: &Path) -> bool {
    path.components()
        .any(|component| matches!(component, Component::ParentDir))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
