//! SSH Shell MCP Server - persistent interactive shells over SSH
//!
//! This crate drives a long-lived PTY shell on a remote host and runs
//! commands in it one at a time, detecting completion with an in-band
//! exit-code marker. Shells are cached per (host, port, login user,
//! elevation target, purpose) and reused across calls, so working directory,
//! exported variables and `su` elevation persist between commands.
//!
//! # Features
//!
//! - Shell handshake: echo suppression, history expansion off, prompt detection
//! - Optional user switch (`sudo su - <user>`) with identity verification
//! - Per-command timeout with interrupt, throttled progress callbacks
//! - Session cache with idle expiry, liveness probe and transparent rebuild
//! - Tracked remote/local artifacts deleted on close or cancel
//! - SFTP transfer channel on the same connection
//!
//! # MCP Tools
//!
//! - `exec` - Execute a command in the persistent shell
//! - `exec-elevated` - Execute a command through sudo (can be disabled with `--disable-elevated`)
//! - `getenv` - Read an environment variable from the shell
//! - `cache-stats` - Show cached shells
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! ssh-shell-mcp --host=192.168.1.100 --user=deploy --password=secret \
//!   --elevate-user=svc --purpose=install
//! ```
//!
//! # Example Usage (library)
//!
//! ```no_run
//! use std::sync::Arc;
//! use ssh_shell_mcp::{SessionManager, SessionRegistry, SshConfig, SshConnector};
//!
//! # async fn run() -> ssh_shell_mcp::Result<()> {
//! let registry = SessionRegistry::new(Arc::new(SshConnector::new()));
//! let config = SshConfig::new("build01", "alice").with_password("secret");
//! let session = SessionManager::new(config, registry);
//! session.initialize().await?;
//! let result = session.execute("cd /tmp && pwd", 30).await?;
//! assert_eq!(result.exit_code, 0);
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod server;
pub mod session;
pub mod ssh;
pub mod tools;

// Re-exports for convenience
pub use config::{Args, Config};
pub use error::{Result, ShellError};
pub use server::SshShellServer;
pub use session::{CachedShell, ResourceTracker, SessionKey, SessionManager, SessionRegistry, SessionState};
pub use ssh::{
    escape_for_shell, sanitize_command, wrap_sudo_command, CommandResult, Connector,
    ProgressCallback, ShellTimings, ShellTransport, SshConfig, SshConnector, SshHandler,
};
pub use tools::{CacheStatsParams, ExecParams, GetEnvParams};
