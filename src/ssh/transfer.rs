//! Bulk file transfer over an SFTP sub-channel
//!
//! Opened on the same SSH connection as the interactive shell so uploads and
//! downloads do not have to be pushed through the PTY stream.

use std::path::Path;

use russh_sftp::client::SftpSession;
use tracing::debug;

use crate::error::{Result, ShellError};

/// Handle to an SFTP session on an established connection
pub struct TransferHandle {
    sftp: SftpSession,
}

impl TransferHandle {
    pub fn new(sftp: SftpSession) -> Self {
        Self { sftp }
    }

    /// Copy a local file to `remote`, replacing it if present
    pub async fn upload(&self, local: &Path, remote: &str) -> Result<u64> {
        let data = tokio::fs::read(local).await?;
        self.sftp
            .write(remote, &data)
            .await
            .map_err(|e| ShellError::transfer(format!("Failed to upload to '{}': {}", remote, e)))?;
        debug!(
            "Uploaded {} ({} bytes) to {}",
            local.display(),
            data.len(),
            remote
        );
        Ok(data.len() as u64)
    }

    /// Copy `remote` to a local file, creating parent directories
    pub async fn download(&self, remote: &str, local: &Path) -> Result<u64> {
        let data = self.sftp.read(remote).await.map_err(|e| {
            ShellError::transfer(format!("Failed to download '{}': {}", remote, e))
        })?;
        if let Some(parent) = local.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(local, &data).await?;
        debug!(
            "Downloaded {} ({} bytes) to {}",
            remote,
            data.len(),
            local.display()
        );
        Ok(data.len() as u64)
    }

    pub async fn exists(&self, remote: &str) -> bool {
        self.sftp.metadata(remote).await.is_ok()
    }

    pub async fn remove(&self, remote: &str) -> Result<()> {
        self.sftp
            .remove_file(remote)
            .await
            .map_err(|e| ShellError::transfer(format!("Failed to remove '{}': {}", remote, e)))
    }

    /// Close the SFTP session; the underlying SSH connection stays up
    pub async fn close(self) -> Result<()> {
        self.sftp
            .close()
            .await
            .map_err(|e| ShellError::transfer(format!("Failed to close sftp session: {}", e)))
    }
}

impl std::fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferHandle").finish_non_exhaustive()
    }
}
