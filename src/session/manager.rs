//! Logical session
//!
//! A [`SessionManager`] is what callers hold: it attaches to a cached shell
//! from the [`SessionRegistry`], executes commands on it one at a time,
//! tracks the artifacts those commands create and cleans them up on close
//! or cancel.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use super::registry::{SessionKey, SessionRegistry};
use super::shell::CachedShell;
use super::state::SessionState;
use super::tracker::{delete_local_files, remove_command, ResourceTracker};
use crate::error::{Result, ShellError};
use crate::ssh::{
    sanitize_command, wrap_sudo_command, CommandResult, ProgressCallback, SshConfig,
    TransferHandle,
};

/// Timeout for `printenv` lookups
const ENV_LOOKUP_TIMEOUT_SECS: u64 = 30;

/// Timeout for each tracked-file removal
const REMOTE_CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);

static ENV_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// One caller's view of a remote shell
pub struct SessionManager {
    config: SshConfig,
    key: SessionKey,
    registry: SessionRegistry,
    shell: Mutex<Option<Arc<CachedShell>>>,
    state: Mutex<SessionState>,
    cancelled: AtomicBool,
    tracker: ResourceTracker,
    max_chars: Option<usize>,
}

impl SessionManager {
    /// Create a session; no connection is made until [`initialize`](Self::initialize)
    pub fn new(config: SshConfig, registry: SessionRegistry) -> Self {
        Self {
            key: SessionKey::from_config(&config),
            config,
            registry,
            shell: Mutex::new(None),
            state: Mutex::new(SessionState::Disconnected),
            cancelled: AtomicBool::new(false),
            tracker: ResourceTracker::new(),
            max_chars: None,
        }
    }

    /// Limit accepted command length
    pub fn with_max_chars(mut self, max_chars: Option<usize>) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    /// Attach to a cached shell or build a new one
    pub async fn initialize(&self) -> Result<()> {
        if self.state() == SessionState::Ready {
            return Ok(());
        }
        self.transition(SessionState::Connecting, "initialize")?;

        let on_handshake = || {
            let _ = self.transition(SessionState::HandshakeInProgress, "handshake");
        };
        match self.registry.checkout(&self.config, &on_handshake).await {
            Ok(shell) => {
                *self.lock_shell() = Some(shell);
                self.transition(SessionState::Ready, "initialize")?;
                info!("Session {} ready", self.key);
                Ok(())
            }
            Err(e) => {
                let _ = self.transition(SessionState::Disconnected, "initialize");
                Err(e)
            }
        }
    }

    /// Execute a command and wait for its exit status
    pub async fn execute(&self, command: &str, timeout_secs: u64) -> Result<CommandResult> {
        let command = sanitize_command(command, self.max_chars)?;
        self.execute_sanitized(&command, timeout_secs, None).await
    }

    /// Execute a command, reporting output to `progress` as it arrives
    pub async fn execute_with_progress(
        &self,
        command: &str,
        timeout_secs: u64,
        progress: &dyn ProgressCallback,
    ) -> Result<CommandResult> {
        let command = sanitize_command(command, self.max_chars)?;
        self.execute_sanitized(&command, timeout_secs, Some(progress))
            .await
    }

    /// Execute a command through `sudo`
    pub async fn execute_elevated(&self, command: &str, timeout_secs: u64) -> Result<CommandResult> {
        let command = sanitize_command(command, self.max_chars)?;
        let wrapped = wrap_sudo_command(&command, self.config.sudo_password.as_deref());
        self.execute_sanitized(&wrapped, timeout_secs, None).await
    }

    /// Value of an environment variable in the remote shell, trimmed
    ///
    /// Unset variables resolve to an empty string.
    pub async fn resolve_environment_variable(&self, name: &str) -> Result<String> {
        if !ENV_NAME.is_match(name) {
            return Err(ShellError::invalid_params(format!(
                "Invalid environment variable name '{}'",
                name
            )));
        }

        let result = self
            .execute_sanitized(&format!("printenv {}", name), ENV_LOOKUP_TIMEOUT_SECS, None)
            .await?;
        if result.is_success() {
            Ok(result.output.trim().to_string())
        } else {
            debug!("Environment variable {} is not set", name);
            Ok(String::new())
        }
    }

    /// Open an SFTP channel on the session's connection
    pub async fn open_bulk_transfer_channel(&self) -> Result<TransferHandle> {
        let shell = self.attached_shell("open a transfer channel")?;
        shell.transport().open_transfer().await
    }

    pub fn track_remote_file(&self, path: &str) -> Result<()> {
        self.tracker.track_remote(path)
    }

    pub fn track_local_file(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.tracker.track_local(path)
    }

    pub fn untrack_remote_file(&self, path: &str) -> bool {
        self.tracker.untrack_remote(path)
    }

    pub fn untrack_local_file(&self, path: &Path) -> bool {
        self.tracker.untrack_local(path)
    }

    pub fn tracked_remote_files(&self) -> Vec<String> {
        self.tracker.remote_files()
    }

    pub fn tracked_local_files(&self) -> Vec<PathBuf> {
        self.tracker.local_files()
    }

    /// A command is running on the attached shell, from this session or
    /// another one sharing the cached connection
    pub fn is_command_running(&self) -> bool {
        self.state() == SessionState::Busy
            || self.lock_shell().as_ref().is_some_and(|shell| shell.is_busy())
    }

    /// Stop the running command and tear the session down
    ///
    /// Evicts the cache entry so nobody attaches mid-kill, interrupts the
    /// remote process, deletes tracked files and disconnects the shell.
    pub async fn cancel_command(&self) -> Result<()> {
        let previous = {
            let mut state = self.lock_state();
            let previous = *state;
            if previous == SessionState::Closed {
                return Ok(());
            }
            *state = SessionState::Closed;
            previous
        };
        self.cancelled.store(true, Ordering::SeqCst);
        info!("Cancelling session {} (was {})", self.key, previous);

        let shell = self.lock_shell().take();
        // Evict before the kill so no other caller attaches to this shell
        let _ = self.registry.evict(&self.key).await;

        if let Some(shell) = shell {
            if previous == SessionState::Busy {
                shell.interrupt().await;
            }
            self.delete_remote_files(&shell).await;
            shell.disconnect().await;
        }

        self.delete_local_files().await;
        Ok(())
    }

    /// Soft close: delete tracked files and detach; the cached shell stays up
    pub async fn close(&self) -> Result<()> {
        self.close_inner(false).await
    }

    /// Close, evict the cache entry and disconnect the connection
    ///
    /// Other sessions attached to the same cached shell lose it too; reserve
    /// for real shutdown.
    pub async fn force_close(&self) -> Result<()> {
        self.close_inner(true).await
    }

    async fn close_inner(&self, force: bool) -> Result<()> {
        {
            let mut state = self.lock_state();
            if *state != SessionState::Closed {
                *state = SessionState::Closed;
            }
        }

        let shell = self.lock_shell().take();
        if let Some(shell) = &shell {
            self.delete_remote_files(shell).await;
        } else if !self.tracker.remote_files().is_empty() {
            warn!(
                "Session {} has no shell, dropping tracked remote files",
                self.key
            );
            self.tracker.take_remote();
        }
        self.delete_local_files().await;

        if force {
            if let Some(evicted) = self.registry.evict(&self.key).await {
                evicted.disconnect().await;
            }
            if let Some(shell) = shell {
                shell.disconnect().await;
            }
            info!("Session {} force-closed", self.key);
        } else {
            debug!("Session {} closed", self.key);
        }
        Ok(())
    }

    async fn execute_sanitized(
        &self,
        command: &str,
        timeout_secs: u64,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<CommandResult> {
        let shell = self.attached_shell("execute")?;
        let mut channel = shell.acquire().await;
        self.transition(SessionState::Busy, "execute")?;

        let cancelled = || self.cancelled.load(Ordering::SeqCst);
        let result = match shell.ensure_responsive(&mut channel).await {
            Ok(()) => {
                shell
                    .run(
                        &mut channel,
                        command,
                        Duration::from_secs(timeout_secs),
                        &cancelled,
                        progress,
                    )
                    .await
            }
            Err(e) => Err(e),
        };

        self.finish_command();
        drop(channel);
        result
    }

    async fn delete_remote_files(&self, shell: &CachedShell) {
        let paths = self.tracker.take_remote();
        if paths.is_empty() {
            return;
        }

        let mut channel = shell.acquire().await;
        for path in paths {
            let command = remove_command(&path);
            match shell
                .run(&mut channel, &command, REMOTE_CLEANUP_TIMEOUT, &|| false, None)
                .await
            {
                Ok(result) if result.is_success() => debug!("Deleted remote file {}", path),
                Ok(result) => warn!(
                    "Failed to delete remote file {} (exit code {}): {}",
                    path, result.exit_code, result.output
                ),
                Err(e) => warn!("Failed to delete remote file {}: {}", path, e),
            }
        }
    }

    async fn delete_local_files(&self) {
        let paths = self.tracker.take_local();
        if !paths.is_empty() {
            delete_local_files(paths).await;
        }
    }

    fn attached_shell(&self, operation: &'static str) -> Result<Arc<CachedShell>> {
        let state = self.state();
        if !state.is_usable() {
            return Err(ShellError::InvalidState {
                operation,
                state: state.to_string(),
            });
        }
        self.lock_shell()
            .clone()
            .ok_or_else(|| ShellError::InvalidState {
                operation,
                state: state.to_string(),
            })
    }

    fn transition(&self, next: SessionState, operation: &'static str) -> Result<()> {
        let mut state = self.lock_state();
        if !state.can_transition_to(next) {
            return Err(ShellError::InvalidState {
                operation,
                state: state.to_string(),
            });
        }
        debug!("Session {}: {} -> {}", self.key, *state, next);
        *state = next;
        Ok(())
    }

    /// Busy -> Ready, unless the session was closed meanwhile
    fn finish_command(&self) {
        let mut state = self.lock_state();
        if *state == SessionState::Busy {
            *state = SessionState::Ready;
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_shell(&self) -> MutexGuard<'_, Option<Arc<CachedShell>>> {
        self.shell.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("key", &self.key)
            .field("state", &self.state())
            .field("tracked_remote", &self.tracker.remote_files().len())
            .field("tracked_local", &self.tracker.local_files().len())
            .finish()
    }
}
