//! Sandbox provisioning.
//!
//! Every scenario run gets its own temporary directory holding the archive
//! files, the artifact under test in `p/`, and links to the shared runtime
//! directories of the installation root. The directory is removed when the
//! [`Sandbox`] is dropped unless it was explicitly retained.
use crate::archive::ScenarioArchive;
use crate::config::{ArtifactRef, HarnessConfig, LinkMode};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Directory under the sandbox root that receives the artifact under test.
pub const ARTIFACT_DIR: &str = "p";
/// Shared runtime directories linked from the installation root.
pub const RUNTIME_DIRS: [&str; 3] = ["bin", "lib", "include"];

const SANDBOX_PREFIX: &str = "sh3env_";

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("create sandbox directory: {source}")]
    Create { source: io::Error },
    #[error("archive path {name:?} escapes the sandbox ({reason})")]
    UnsafePath { name: String, reason: &'static str },
    #[error("archive path {name:?} names the same file as an earlier section")]
    Collision { name: String },
    #[error("archive path {name:?} collides with the reserved {reserved}/ directory")]
    Reserved { name: String, reserved: &'static str },
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[error("artifact {}: {reason}", path.display())]
    Artifact { path: PathBuf, reason: String },
    #[error("installation root is missing {}", path.display())]
    MissingRuntime { path: PathBuf },
}

/// Ordered environment; assigning an existing key replaces it in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: Vec<(String, String)>,
}

impl Environment {
    pub fn set(&mut self, key: &str, value: &str) {
        match self.vars.iter_mut().find(|(existing, _)| existing == key) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.vars.push((key.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

/// An exclusively owned scenario directory.
#[derive(Debug)]
pub struct Sandbox {
    root: PathBuf,
    env: Environment,
    retained: bool,
}

impl Sandbox {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Environment every command in this sandbox starts from.
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Keep the directory on disk for post-mortem inspection.
    pub fn retain(mut self) -> PathBuf {
        self.retained = true;
        self.root.clone()
    }

    /// Remove the directory now, reporting failures instead of ignoring them.
    pub fn remove(mut self) -> io::Result<()> {
        self.retained = true;
        fs::remove_dir_all(&self.root)
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if !self.retained {
            let _ = fs::remove_dir_all(&self.root);
        }
    }
}

/// Provisioning knobs borrowed from the run configuration.
#[derive(Debug, Clone)]
pub struct ProvisionOptions<'a> {
    pub install_root: &'a Path,
    pub link_mode: LinkMode,
    pub fixture_dir: &'a str,
    pub sandbox_parent: Option<&'a Path>,
    pub moddir: &'a Path,
    pub env: &'a [(String, String)],
}

impl<'a> ProvisionOptions<'a> {
    pub fn from_config(config: &'a HarnessConfig) -> Self {
        Self {
            install_root: &config.install_root,
            link_mode: config.link_mode,
            fixture_dir: &config.fixture_dir,
            sandbox_parent: config.sandbox_parent.as_deref(),
            moddir: &config.moddir,
            env: &config.env,
        }
    }
}

/// Materialize `archive` into a fresh sandbox.
///
/// On error the partially built directory is removed before returning.
pub fn provision(
    archive: &ScenarioArchive,
    artifact: &ArtifactRef,
    options: &ProvisionOptions<'_>,
) -> Result<Sandbox, ProvisionError> {
    let prefix = format!("{SANDBOX_PREFIX}{}_", prefix_safe(&archive.name));
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix).keep(true);
    let dir = match options.sandbox_parent {
        Some(parent) => builder.tempdir_in(parent),
        None => builder.tempdir(),
    }
    .map_err(|source| ProvisionError::Create { source })?;

    let mut sandbox = Sandbox {
        root: dir.path().to_path_buf(),
        env: Environment::default(),
        retained: false,
    };
    drop(dir);
    // Links and $WORK must not depend on the caller's working directory.
    sandbox.root = fs::canonicalize(&sandbox.root)
        .map_err(|source| io_error("resolve", &sandbox.root, source))?;

    let mut top_level = Vec::new();
    let mut written = HashSet::new();
    for entry in &archive.files {
        let rel = normalize_sandbox_path(&entry.name)?;
        if !written.insert(rel.clone()) {
            return Err(ProvisionError::Collision {
                name: entry.name.clone(),
            });
        }
        if let Some(Component::Normal(first)) = rel.components().next() {
            let first = first.to_string_lossy().to_string();
            if let Some(reserved) = reserved_dir(&first) {
                return Err(ProvisionError::Reserved {
                    name: entry.name.clone(),
                    reserved,
                });
            }
            top_level.push(first);
        }
        let target = sandbox.root.join(&rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| io_error("create", parent, source))?;
        }
        fs::write(&target, &entry.data).map_err(|source| io_error("write", &target, source))?;
    }

    install_artifact(&sandbox.root, artifact)?;

    for name in RUNTIME_DIRS {
        let source = options.install_root.join(name);
        if !source.is_dir() {
            return Err(ProvisionError::MissingRuntime { path: source });
        }
        let source =
            fs::canonicalize(&source).map_err(|err| io_error("resolve", &source, err))?;
        link_dir(&source, &sandbox.root.join(name), options.link_mode)?;
    }

    if let Some(fixtures) = archive
        .source
        .parent()
        .map(|dir| dir.join(options.fixture_dir))
        .filter(|dir| dir.is_dir())
    {
        let fixture_top = Path::new(options.fixture_dir)
            .components()
            .next()
            .map(|component| component.as_os_str().to_string_lossy().to_string());
        if fixture_top.is_some_and(|top| top_level.contains(&top)) {
            tracing::debug!(
                scenario = %archive.name,
                fixture_dir = options.fixture_dir,
                "archive provides its own fixture directory; not linking"
            );
        } else {
            let fixtures =
                fs::canonicalize(&fixtures).map_err(|source| io_error("resolve", &fixtures, source))?;
            let target = sandbox.root.join(options.fixture_dir);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|source| io_error("create", parent, source))?;
            }
            link_dir(&fixtures, &target, options.link_mode)?;
        }
    }

    sandbox.env = base_environment(&sandbox.root, options);
    tracing::debug!(
        scenario = %archive.name,
        root = %sandbox.root.display(),
        files = archive.files.len(),
        "provisioned sandbox"
    );
    Ok(sandbox)
}

/// Validate an archive name as a sandbox-relative path.
///
/// Traversal is rejected rather than normalized away; `.` segments are dropped.
pub fn normalize_sandbox_path(raw: &str) -> Result<PathBuf, ProvisionError> {
    let unsafe_path = |reason| ProvisionError::UnsafePath {
        name: raw.to_string(),
        reason,
    };
    let normalized = raw.trim().replace('\\', "/");
    if normalized.is_empty() {
        return Err(unsafe_path("empty path"));
    }
    let path = Path::new(&normalized);
    if path.is_absolute() {
        return Err(unsafe_path("absolute path"));
    }
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(unsafe_path("contains '..'")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_path("absolute path"))
            }
        }
    }
    if cleaned.as_os_str().is_empty() {
        return Err(unsafe_path("empty path"));
    }
    Ok(cleaned)
}

fn base_environment(root: &Path, options: &ProvisionOptions<'_>) -> Environment {
    let mut env = Environment::default();
    for key in ["PATH", "HOME"] {
        if let Ok(value) = std::env::var(key) {
            env.set(key, &value);
        }
    }
    env.set("WORK", &root.to_string_lossy());
    env.set("moddir", &options.moddir.to_string_lossy());
    for (key, value) in options.env {
        env.set(key, value);
    }
    env
}

fn install_artifact(root: &Path, artifact: &ArtifactRef) -> Result<(), ProvisionError> {
    let source = artifact.path();
    let metadata = fs::metadata(&source).map_err(|err| ProvisionError::Artifact {
        path: source.clone(),
        reason: err.to_string(),
    })?;
    if !metadata.is_file() {
        return Err(ProvisionError::Artifact {
            path: source,
            reason: "not a regular file".to_string(),
        });
    }
    let dir = root.join(ARTIFACT_DIR);
    fs::create_dir(&dir).map_err(|source| io_error("create", &dir, source))?;
    let target = dir.join(artifact.file_name());
    fs::copy(&source, &target).map_err(|source| io_error("copy artifact to", &target, source))?;
    Ok(())
}

fn link_dir(source: &Path, target: &Path, mode: LinkMode) -> Result<(), ProvisionError> {
    match mode {
        LinkMode::Symlink => symlink_dir(source, target),
        LinkMode::Copy => copy_dir_recursive(source, target),
    }
}

#[cfg(unix)]
fn symlink_dir(source: &Path, target: &Path) -> Result<(), ProvisionError> {
    std::os::unix::fs::symlink(source, target).map_err(|err| io_error("symlink", target, err))
}

#[cfg(not(unix))]
fn symlink_dir(source: &Path, target: &Path) -> Result<(), ProvisionError> {
    copy_dir_recursive(source, target)
}

fn copy_dir_recursive(source: &Path, target: &Path) -> Result<(), ProvisionError> {
    fs::create_dir_all(target).map_err(|err| io_error("create", target, err))?;
    let entries = fs::read_dir(source).map_err(|err| io_error("read", source, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| io_error("read", source, err))?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|err| io_error("inspect", &from, err))?;
        if file_type.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else if file_type.is_symlink() {
            copy_symlink(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(|err| io_error("copy", &to, err))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> Result<(), ProvisionError> {
    let link = fs::read_link(from).map_err(|err| io_error("read link", from, err))?;
    std::os::unix::fs::symlink(&link, to).map_err(|err| io_error("symlink", to, err))
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> Result<(), ProvisionError> {
    fs::copy(from, to)
        .map(|_| ())
        .map_err(|err| io_error("copy", to, err))
}

fn reserved_dir(first: &str) -> Option<&'static str> {
    std::iter::once(ARTIFACT_DIR)
        .chain(RUNTIME_DIRS)
        .find(|reserved| *reserved == first)
}

fn prefix_safe(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn io_error(action: &'static str, path: &Path, source: io::Error) -> ProvisionError {
    ProvisionError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
#[path = "sandbox_tests.rs"]
mod tests;
