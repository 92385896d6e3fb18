//! Shared fixtures for unit tests that need a real sandbox and subject.
use crate::archive::{FileEntry, ScenarioArchive};
use crate::config::{ArtifactRef, LinkMode, SubjectConfig, Variant};
use crate::sandbox::{self, ProvisionOptions, Sandbox};
use std::fs;
use std::path::{Path, PathBuf};

/// Stand-in subject: echoes its argv, then sleeps or exits as the
/// environment asks.
pub const FAKE_SUBJECT: &str = r#"#!/bin/sh
for arg in "$@"; do
    echo "arg: $arg"
done
echo "preload: ${LD_PRELOAD:-none}" >&2
if [ -n "$SUBJECT_SLEEP" ]; then
    sleep "$SUBJECT_SLEEP"
fi
exit "${SUBJECT_EXIT:-0}"
"#;

pub struct FakeInstall {
    dir: tempfile::TempDir,
    pub install_root: PathBuf,
    pub artifact: ArtifactRef,
}

impl FakeInstall {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let install_root = dir.path().join("install");
        for name in sandbox::RUNTIME_DIRS {
            fs::create_dir_all(install_root.join(name)).expect("create runtime dir");
        }
        write_executable(&install_root.join("bin").join("snort"), FAKE_SUBJECT);
        let build_dir = dir.path().join("build");
        fs::create_dir_all(build_dir.join("debug")).expect("create build dir");
        fs::write(build_dir.join("debug").join("inspector.so"), b"plugin").expect("write artifact");
        fs::create_dir_all(dir.path().join("sandboxes")).expect("create sandbox parent");
        Self {
            dir,
            install_root,
            artifact: ArtifactRef {
                build_dir,
                name: "inspector.so".to_string(),
                variant: Variant::Debug,
                explicit: None,
            },
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn sandbox_parent(&self) -> PathBuf {
        self.dir.path().join("sandboxes")
    }

    pub fn subject(&self) -> SubjectConfig {
        SubjectConfig {
            program: "bin/snort".to_string(),
            config_file: "cfg.lua".to_string(),
            instrumentation: None,
        }
    }

    pub fn archive(&self, name: &str, files: &[(&str, &str)]) -> ScenarioArchive {
        ScenarioArchive {
            source: self.dir.path().join(format!("{name}.script")),
            name: name.to_string(),
            script: String::new(),
            files: files
                .iter()
                .map(|(name, data)| FileEntry {
                    name: name.to_string(),
                    data: data.as_bytes().to_vec(),
                })
                .collect(),
        }
    }

    pub fn sandbox(&self, files: &[(&str, &str)]) -> Sandbox {
        let parent = self.sandbox_parent();
        let options = ProvisionOptions {
            install_root: &self.install_root,
            link_mode: LinkMode::Symlink,
            fixture_dir: "testdata",
            sandbox_parent: Some(&parent),
            moddir: self.dir.path(),
            env: &[],
        };
        sandbox::provision(&self.archive("scenario", files), &self.artifact, &options)
            .expect("provision sandbox")
    }
}

pub fn write_executable(path: &Path, body: &str) {
    fs::write(path, body).expect("write executable");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod executable");
    }
}
