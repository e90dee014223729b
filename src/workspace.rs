//! Scoped temporary storage for in-flight transfers
//!
//! A [`TempWorkspace`] is a private directory created per invocation. Each
//! [`TempFile`] inside it is released exactly once: explicitly through
//! [`TempFile::release`], or from `Drop` on every other exit path.

use crate::error::handlers::IoErrorHandler;
use crate::error::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

const WORKSPACE_PREFIX: &str = "kubectl-image-";
const TEMP_FILE_PREFIX: &str = "pull-";
const TEMP_FILE_SUFFIX: &str = ".tar";

/// Private working directory, removed when dropped
#[derive(Debug)]
pub struct TempWorkspace {
    dir: TempDir,
}

impl TempWorkspace {
    /// Create a fresh directory under `root`, creating `root` if needed
    pub fn create(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| {
            IoErrorHandler::storage(&e, &format!("error creating temp root {}", root.display()))
        })?;

        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(root)
            .map_err(|e| IoErrorHandler::storage(&e, "error creating temp dir"))?;

        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create one writable file inside the workspace
    pub fn temp_file(&self) -> Result<TempFile> {
        let (file, path) = tempfile::Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .suffix(TEMP_FILE_SUFFIX)
            .tempfile_in(self.dir.path())
            .map_err(|e| IoErrorHandler::storage(&e, "error creating temp file"))?
            .keep()
            .map_err(|e| IoErrorHandler::storage(&e.error, "error creating temp file"))?;

        Ok(TempFile {
            file: Some(file),
            path,
            released: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Number of entries currently in the workspace
    pub fn entry_count(&self) -> io::Result<usize> {
        Ok(fs::read_dir(self.dir.path())?.count())
    }
}

/// A temp file with an idempotent release
#[derive(Debug)]
pub struct TempFile {
    file: Option<fs::File>,
    path: PathBuf,
    released: Arc<AtomicBool>,
}

impl TempFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the open handle for writing. Later calls return `None`.
    pub fn take_file(&mut self) -> Option<fs::File> {
        self.file.take()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Handle that can release this file from elsewhere
    pub fn release_handle(&self) -> ReleaseHandle {
        ReleaseHandle {
            path: self.path.clone(),
            released: Arc::clone(&self.released),
        }
    }

    /// Remove the file. Only the first call has an effect.
    pub fn release(&mut self) {
        self.file.take();
        self.release_handle().release();
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        self.release();
    }
}

/// Release callback detached from the [`TempFile`] that owns the path
#[derive(Debug, Clone)]
pub struct ReleaseHandle {
    path: PathBuf,
    released: Arc<AtomicBool>,
}

impl ReleaseHandle {
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        // already gone is fine; anything else leaves a file we can do nothing about
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_workspaces_are_private() {
        let root = tempdir().unwrap();
        let a = TempWorkspace::create(root.path()).unwrap();
        let b = TempWorkspace::create(root.path()).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(root.path()));
    }

    #[test]
    fn test_release_removes_file() {
        let root = tempdir().unwrap();
        let workspace = TempWorkspace::create(root.path()).unwrap();
        let mut temp = workspace.temp_file().unwrap();
        temp.take_file().unwrap().write_all(b"partial").unwrap();
        assert!(temp.path().exists());

        temp.release();
        assert!(!temp.path().exists());
        assert!(temp.is_released());
        assert_eq!(workspace.entry_count().unwrap(), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let root = tempdir().unwrap();
        let workspace = TempWorkspace::create(root.path()).unwrap();
        let mut temp = workspace.temp_file().unwrap();
        let handle = temp.release_handle();

        temp.release();
        temp.release();
        handle.release();
        assert!(temp.is_released());
    }

    #[test]
    fn test_release_never_touches_other_files() {
        let root = tempdir().unwrap();
        let workspace = TempWorkspace::create(root.path()).unwrap();
        let mut first = workspace.temp_file().unwrap();
        let second = workspace.temp_file().unwrap();
        let first_path = first.path().to_path_buf();

        first.release();
        // a new file appearing at the released path must survive repeated releases
        fs::write(&first_path, b"unrelated").unwrap();
        first.release();
        first.release_handle().release();

        assert!(first_path.exists());
        assert!(second.path().exists());
    }

    #[test]
    fn test_drop_releases() {
        let root = tempdir().unwrap();
        let workspace = TempWorkspace::create(root.path()).unwrap();
        let path = {
            let temp = workspace.temp_file().unwrap();
            temp.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_workspace_removed_on_drop() {
        let root = tempdir().unwrap();
        let path = {
            let workspace = TempWorkspace::create(root.path()).unwrap();
            let _temp = workspace.temp_file().unwrap();
            workspace.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
