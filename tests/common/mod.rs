//! Shared test infrastructure for integration tests.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

/// Scratch directory holding scripts, pipeline files and step output.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent directory");
        }
        std::fs::write(&path, contents.as_bytes()).expect("write file");
        path
    }

    #[allow(dead_code)]
    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path().join(rel)).expect("read file")
    }
}

/// Whether `sh` can be spawned; tests that need it return early when not.
pub fn skip_if_sh_missing() -> bool {
    let missing = Command::new("sh")
        .args(["-c", "true"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_err();
    if missing {
        eprintln!("Skipping: sh not available");
    }
    missing
}

/// Path of the built `pipet` binary.
#[allow(dead_code)]
pub fn pipet_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_pipet"))
}
