//! Per-session tracking of temporary artifacts
//!
//! Paths registered here are deleted when the session closes or is
//! cancelled. Draining is atomic, so every path is deleted at most once no
//! matter how often close/cancel run.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::error::{Result, ShellError};
use crate::ssh::escape_for_shell;

/// Remote and local paths owned by one session
#[derive(Debug, Default)]
pub struct ResourceTracker {
    remote: Mutex<BTreeSet<String>>,
    local: Mutex<BTreeSet<PathBuf>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a remote path for deletion on close
    pub fn track_remote(&self, path: &str) -> Result<()> {
        let path = validate_remote(path)?;
        debug!("Tracking remote file {}", path);
        lock(&self.remote).insert(path.to_string());
        Ok(())
    }

    /// Register a local path for deletion on close
    pub fn track_local(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        if path.as_os_str().is_empty() || path.parent().is_none() {
            return Err(ShellError::invalid_params(format!(
                "Refusing to track local path '{}'",
                path.display()
            )));
        }
        debug!("Tracking local file {}", path.display());
        lock(&self.local).insert(path);
        Ok(())
    }

    /// Stop tracking a remote path; returns whether it was tracked
    pub fn untrack_remote(&self, path: &str) -> bool {
        lock(&self.remote).remove(path.trim())
    }

    pub fn untrack_local(&self, path: &Path) -> bool {
        lock(&self.local).remove(path)
    }

    pub fn remote_files(&self) -> Vec<String> {
        lock(&self.remote).iter().cloned().collect()
    }

    pub fn local_files(&self) -> Vec<PathBuf> {
        lock(&self.local).iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.remote).is_empty() && lock(&self.local).is_empty()
    }

    /// Take every tracked remote path, leaving the set empty
    pub fn take_remote(&self) -> Vec<String> {
        std::mem::take(&mut *lock(&self.remote)).into_iter().collect()
    }

    /// Take every tracked local path, leaving the set empty
    pub fn take_local(&self) -> Vec<PathBuf> {
        std::mem::take(&mut *lock(&self.local)).into_iter().collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

fn validate_remote(path: &str) -> Result<&str> {
    let path = path.trim();
    if path.is_empty() || path.trim_end_matches('/').is_empty() || path.contains('\0') {
        return Err(ShellError::invalid_params(format!(
            "Refusing to track remote path '{}'",
            path
        )));
    }
    Ok(path)
}

/// Shell command that removes a tracked remote path
pub fn remove_command(path: &str) -> String {
    format!("rm -rf -- '{}'", escape_for_shell(path))
}

/// Best-effort deletion of local paths; missing paths are not an error
///
/// Returns the number of paths actually removed.
pub async fn delete_local_files(paths: Vec<PathBuf>) -> usize {
    let mut removed = 0;
    for path in paths {
        let result = match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                debug!("Deleted local file {}", path.display());
                removed += 1;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete local file {}: {}", path.display(), e),
        }
    }
    removed
}
