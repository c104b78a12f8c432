//! Scoped temporary-file session.
//!
//! All intermediate files of one driver invocation live under a uniquely
//! named directory that is removed when the session is dropped, on every
//! exit path. The core never registers signal handlers; abnormal
//! termination cleanup is the operating system's tmpdir policy.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct CompilerSession {
    dir: TempDir,
    counter: std::cell::Cell<usize>,
}

impl CompilerSession {
    /// Create a session directory of the form `<tmpdir>/kefir-<pid>-XXXXXX`.
    pub fn new(tmpdir: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("kefir-{}-", std::process::id()))
            .tempdir_in(tmpdir)
            .context("failed to create compiler session directory")?;
        Ok(Self {
            dir,
            counter: std::cell::Cell::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Reserve a fresh file path with the given suffix inside the session.
    pub fn new_file(&self, suffix: &str) -> PathBuf {
        let id = self.counter.get();
        self.counter.set(id + 1);
        self.dir.path().join(format!("tmp{id}.{suffix}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_directory_is_removed_on_drop() {
        let tmp = std::env::temp_dir();
        let path;
        {
            let session = CompilerSession::new(&tmp).unwrap();
            path = session.path().to_path_buf();
            assert!(path.exists());
            let file = session.new_file("s");
            assert!(file.starts_with(&path));
        }
        assert!(!path.exists());
    }

    #[test]
    fn file_names_are_unique() {
        let session = CompilerSession::new(&std::env::temp_dir()).unwrap();
        assert_ne!(session.new_file("o"), session.new_file("o"));
    }
}
