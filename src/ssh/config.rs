//! SSH configuration types
//!
//! Connection parameters, authentication, the optional elevation target and
//! the timing knobs used by the handshake and the command executor.

use std::time::Duration;

/// Command prefix used to switch into the elevation target's login shell
pub const DEFAULT_SWITCH_COMMAND: &str = "sudo su -";

/// Purpose tag used when the caller does not isolate workflows
pub const DEFAULT_PURPOSE: &str = "default";

/// SSH connection configuration
#[derive(Clone)]
pub struct SshConfig {
    /// Remote hostname or IP address
    pub host: String,

    /// SSH port (default: 22)
    pub port: u16,

    /// Login user for authentication
    pub username: String,

    /// Password for password authentication
    pub password: Option<String>,

    /// Private key content (not path!) for key authentication
    pub private_key: Option<String>,

    /// User to switch to after login (None = stay as login user)
    pub elevate_user: Option<String>,

    /// Password answered to the switch-user prompt; falls back to `password`
    pub elevate_password: Option<String>,

    /// Password for `sudo` wrapped commands
    pub sudo_password: Option<String>,

    /// Command prefix for the user context switch; the target user is appended
    pub switch_command: String,

    /// Isolation tag; sessions with different purposes never share a shell
    pub purpose: String,
}

impl SshConfig {
    /// Create a new SSH configuration with minimal required fields
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            password: None,
            private_key: None,
            elevate_user: None,
            elevate_password: None,
            sudo_password: None,
            switch_command: DEFAULT_SWITCH_COMMAND.to_string(),
            purpose: DEFAULT_PURPOSE.to_string(),
        }
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set password authentication
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set private key authentication (key content, not path)
    pub fn with_private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    /// Switch to `user` after the shell is up
    pub fn with_elevate_user(mut self, user: impl Into<String>) -> Self {
        self.elevate_user = Some(user.into());
        self
    }

    pub fn with_elevate_password(mut self, password: impl Into<String>) -> Self {
        self.elevate_password = Some(password.into());
        self
    }

    /// Set sudo password for sudo commands
    pub fn with_sudo_password(mut self, password: impl Into<String>) -> Self {
        self.sudo_password = Some(password.into());
        self
    }

    pub fn with_switch_command(mut self, command: impl Into<String>) -> Self {
        self.switch_command = command.into();
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    /// Password to answer the switch-user prompt with
    pub fn switch_password(&self) -> Option<&str> {
        self.elevate_password
            .as_deref()
            .or(self.password.as_deref())
    }

    /// The user commands run as once the handshake completes
    pub fn effective_user(&self) -> &str {
        self.elevate_user.as_deref().unwrap_or(&self.username)
    }

    /// First label of the host name, used in the fallback prompt
    pub fn host_prefix(&self) -> &str {
        self.host.split('.').next().unwrap_or(&self.host)
    }
}

impl std::fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key", &self.private_key.as_ref().map(|_| "***"))
            .field("elevate_user", &self.elevate_user)
            .field("switch_command", &self.switch_command)
            .field("purpose", &self.purpose)
            .finish()
    }
}

/// Delays and intervals that drive the handshake and the read loop
#[derive(Debug, Clone)]
pub struct ShellTimings {
    /// Pause between handshake steps while the shell settles
    pub settle_delay: Duration,

    /// Read loop sleep quantum
    pub poll_interval: Duration,

    /// Idle time after which an echo probe checks responsiveness
    pub probe_interval: Duration,

    /// How long an echo probe waits for its marker
    pub probe_timeout: Duration,

    /// How long a caller waits for the in-flight command before force-cancelling it
    pub busy_wait: Duration,

    /// Minimum gap between two progress callbacks
    pub progress_interval: Duration,

    /// How long the context switch waits for a password prompt
    pub switch_wait: Duration,

    /// Lines kept from archiving tool output
    pub archive_tail_lines: usize,
}

impl Default for ShellTimings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(3),
            busy_wait: Duration::from_secs(30),
            progress_interval: Duration::from_secs(2),
            switch_wait: Duration::from_secs(2),
            archive_tail_lines: 30,
        }
    }
}
