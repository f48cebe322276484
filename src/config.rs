//! Configuration and CLI argument parsing for the SSH shell MCP server

use clap::Parser;
use std::path::PathBuf;

use crate::error::{Result, ShellError};
use crate::ssh::config::{DEFAULT_PURPOSE, DEFAULT_SWITCH_COMMAND};

/// Default timeout for command execution in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default max characters for a command (None = unlimited)
pub const DEFAULT_MAX_CHARS: Option<usize> = Some(1000);

/// Connection timeout in seconds
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Idle time after which a cached shell expires
pub const SESSION_TTL_SECS: u64 = 30 * 60;

/// Interval of the background cache sweep
pub const SWEEP_INTERVAL_SECS: u64 = 60;

/// SSH shell MCP server CLI arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "ssh-shell-mcp")]
#[command(version)]
#[command(about = "MCP server running commands in a persistent PTY shell over SSH")]
pub struct Args {
    /// SSH host to connect to
    #[arg(long, env = "SSH_SHELL_HOST")]
    pub host: String,

    /// SSH port
    #[arg(long, default_value = "22", env = "SSH_SHELL_PORT")]
    pub port: u16,

    /// SSH login user
    #[arg(long, env = "SSH_SHELL_USER")]
    pub user: String,

    /// SSH password (alternative to key)
    #[arg(long, env = "SSH_SHELL_PASSWORD")]
    pub password: Option<String>,

    /// Path to SSH private key file (alternative to password)
    #[arg(long, env = "SSH_SHELL_KEY")]
    pub key: Option<PathBuf>,

    /// Switch the shell to this user after login
    #[arg(long, env = "SSH_SHELL_ELEVATE_USER")]
    pub elevate_user: Option<String>,

    /// Password for the user switch (defaults to the login password)
    #[arg(long, env = "SSH_SHELL_ELEVATE_PASSWORD")]
    pub elevate_password: Option<String>,

    /// Command used for the user switch; the target user is appended
    #[arg(long, default_value = DEFAULT_SWITCH_COMMAND, env = "SSH_SHELL_SWITCH_COMMAND")]
    pub switch_command: String,

    /// Password for `sudo` commands
    #[arg(long, env = "SSH_SHELL_SUDO_PASSWORD")]
    pub sudo_password: Option<String>,

    /// Isolation tag for the cached shell
    #[arg(long, default_value = DEFAULT_PURPOSE, env = "SSH_SHELL_PURPOSE")]
    pub purpose: String,

    /// Command execution timeout in seconds
    #[arg(long, default_value = "60", env = "SSH_SHELL_TIMEOUT")]
    pub timeout: u64,

    /// Maximum characters for command length.
    /// Use "none", "0", or negative value to disable limit.
    /// Default: 1000
    #[arg(long = "maxChars", env = "SSH_SHELL_MAX_CHARS")]
    pub max_chars: Option<String>,

    /// Idle seconds before a cached shell is discarded
    #[arg(long, default_value = "1800", env = "SSH_SHELL_SESSION_TTL")]
    pub session_ttl: u64,

    /// Disable the exec-elevated tool
    #[arg(long, default_value = "false", env = "SSH_SHELL_DISABLE_ELEVATED")]
    pub disable_elevated: bool,
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub key: Option<PathBuf>,
    pub elevate_user: Option<String>,
    pub elevate_password: Option<String>,
    pub switch_command: String,
    pub sudo_password: Option<String>,
    pub purpose: String,

    /// Command timeout in seconds
    pub timeout_secs: u64,

    /// Maximum command length (None = unlimited)
    pub max_chars: Option<usize>,

    pub session_ttl_secs: u64,
    pub disable_elevated: bool,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        let max_chars = parse_max_chars(args.max_chars.as_deref());

        Ok(Config {
            host: args.host,
            port: args.port,
            user: args.user,
            password: non_empty(args.password),
            key: args.key,
            elevate_user: non_empty(args.elevate_user),
            elevate_password: non_empty(args.elevate_password),
            switch_command: args.switch_command,
            sudo_password: non_empty(args.sudo_password),
            purpose: args.purpose,
            timeout_secs: args.timeout,
            max_chars,
            session_ttl_secs: args.session_ttl,
            disable_elevated: args.disable_elevated,
        })
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.host.is_empty() {
        errors.push("Missing required --host".to_string());
    }

    if args.user.is_empty() {
        errors.push("Missing required --user".to_string());
    }

    if args.password.is_none() && args.key.is_none() {
        errors.push("Must provide either --password or --key".to_string());
    }

    if let Some(ref key_path) = args.key {
        if !key_path.exists() {
            errors.push(format!("SSH key file not found: {}", key_path.display()));
        }
    }

    if args.timeout == 0 {
        errors.push("--timeout must be at least 1 second".to_string());
    }

    if args.purpose.trim().is_empty() {
        errors.push("--purpose cannot be empty".to_string());
    }

    if args.switch_command.trim().is_empty() {
        errors.push("--switch-command cannot be empty".to_string());
    }

    if !errors.is_empty() {
        return Err(ShellError::config(format!(
            "Configuration error:\n{}",
            errors.join("\n")
        )));
    }

    Ok(())
}

/// Parse max_chars argument
///
/// - "none" (case-insensitive) → None (unlimited)
/// - "0" or negative → None (unlimited)
/// - positive integer → Some(value)
/// - None (not provided) or garbage → DEFAULT_MAX_CHARS
pub fn parse_max_chars(value: Option<&str>) -> Option<usize> {
    let Some(s) = value else {
        return DEFAULT_MAX_CHARS;
    };
    if s.eq_ignore_ascii_case("none") {
        return None;
    }
    match s.parse::<i64>() {
        Ok(n) if n <= 0 => None,
        Ok(n) => Some(n as usize),
        Err(_) => DEFAULT_MAX_CHARS,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["ssh-shell-mcp", "--host", "build01", "--user", "alice"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_parse_max_chars() {
        assert_eq!(parse_max_chars(Some("NONE")), None);
        assert_eq!(parse_max_chars(Some("0")), None);
        assert_eq!(parse_max_chars(Some("-5")), None);
        assert_eq!(parse_max_chars(Some("500")), Some(500));
        assert_eq!(parse_max_chars(Some("abc")), DEFAULT_MAX_CHARS);
        assert_eq!(parse_max_chars(None), DEFAULT_MAX_CHARS);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_args(args(&["--password", "secret"])).unwrap();
        assert_eq!(config.port, 22);
        assert_eq!(config.purpose, DEFAULT_PURPOSE);
        assert_eq!(config.switch_command, DEFAULT_SWITCH_COMMAND);
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.session_ttl_secs, SESSION_TTL_SECS);
        assert!(config.elevate_user.is_none());
    }

    #[test]
    fn test_config_requires_credentials() {
        let err = Config::from_args(args(&[])).unwrap_err();
        assert!(err.to_string().contains("--password or --key"));
    }

    #[test]
    fn test_empty_elevate_user_is_none() {
        let config =
            Config::from_args(args(&["--password", "x", "--elevate-user", ""])).unwrap();
        assert!(config.elevate_user.is_none());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = Config::from_args(args(&["--password", "x", "--timeout", "0"])).unwrap_err();
        assert!(err.to_string().contains("--timeout"));
    }
}
