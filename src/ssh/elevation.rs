//! Privilege elevation
//!
//! Two mechanisms:
//! - the user context switch, which moves the whole interactive shell to the
//!   elevation target user (`sudo su - <user>`) during the handshake
//! - [`wrap_sudo_command`], which elevates a single command with `sudo`

use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

use super::command::Executor;
use super::config::{ShellTimings, SshConfig};
use super::transport::ShellTransport;
use crate::error::{Result, ShellError};

/// How long the identity check after a switch may take
const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

const AUTH_FAILURES: &[&str] = &[
    "authentication failure",
    "incorrect password",
    "sorry, try again",
    "su: failed",
];

/// Switch the shell to `target` and verify the new identity
///
/// Echo is re-enabled while the switch command runs so the password prompt
/// can be observed, and disabled again before verification.
pub async fn switch_user(
    transport: &dyn ShellTransport,
    config: &SshConfig,
    target: &str,
    timings: &ShellTimings,
) -> Result<()> {
    info!("Switching shell on {} to user '{}'", config.host, target);

    send(transport, "stty echo\n").await?;
    sleep(timings.settle_delay).await;
    transport.clear_output();

    let switch = format!("{} {}\n", config.switch_command, target);
    send(transport, &switch).await?;

    let mut seen = String::new();
    let deadline = Instant::now() + timings.switch_wait;
    while Instant::now() < deadline {
        sleep(timings.poll_interval).await;
        seen.push_str(&transport.read_available());
        if is_password_prompt(&seen) || is_auth_failure(&seen) {
            break;
        }
    }

    if is_password_prompt(&seen) {
        let password = config.switch_password().ok_or_else(|| {
            ShellError::elevation(target, "password requested but none configured")
        })?;
        debug!("Password prompt detected, sending password...");
        send(transport, &format!("{}\n", password)).await?;
        sleep(timings.settle_delay).await;
        seen.push_str(&transport.read_available());
    }

    if is_auth_failure(&seen) {
        warn!("Switch to '{}' rejected: authentication failure", target);
        return Err(ShellError::elevation(target, "authentication failure"));
    }

    // The target's login shell starts with its own settings
    send(transport, "stty -echo\n").await?;
    sleep(timings.settle_delay).await;
    send(transport, "set +H\n").await?;
    sleep(timings.settle_delay).await;
    transport.clear_output();

    verify_identity(transport, target, timings).await
}

/// Run `whoami` through the executor and compare with `target`
async fn verify_identity(
    transport: &dyn ShellTransport,
    target: &str,
    timings: &ShellTimings,
) -> Result<()> {
    let executor = Executor {
        transport,
        prompt: "",
        timings,
    };
    let result = executor
        .run("whoami", VERIFY_TIMEOUT, &|| false, None)
        .await
        .map_err(|e| ShellError::elevation(target, e.to_string()))?;

    if result.output.contains(target) {
        info!("Shell now running as '{}'", target);
        Ok(())
    } else {
        Err(ShellError::elevation(target, result.output.trim()))
    }
}

/// Password prompt indicators in (case-insensitive) buffered output
pub fn is_password_prompt(output: &str) -> bool {
    let lowered = output.to_lowercase();
    if !lowered.contains("password") {
        return false;
    }
    let bracketed = lowered.contains('[') && lowered.contains(']');
    lowered.contains(" for ") || bracketed || lowered.trim_end().ends_with(':')
}

fn is_auth_failure(output: &str) -> bool {
    let lowered = output.to_lowercase();
    AUTH_FAILURES.iter().any(|failure| lowered.contains(failure))
}

async fn send(transport: &dyn ShellTransport, line: &str) -> Result<()> {
    transport
        .write(line.as_bytes())
        .await
        .map_err(|e| ShellError::handshake(format!("Failed to write during user switch: {}", e)))
}

/// Wraps a command for execution with sudo privileges.
///
/// # Arguments
/// * `command` - The command to wrap with sudo
/// * `password` - Optional sudo password. If None, uses `sudo -n` (passwordless).
///   If Some, uses `printf | sudo -S` to pipe the password.
///
/// # Examples
///
/// ```
/// use ssh_shell_mcp::ssh::elevation::wrap_sudo_command;
///
/// let cmd = wrap_sudo_command("apt update", None);
/// assert_eq!(cmd, "sudo -n sh -c 'apt update'");
///
/// let cmd = wrap_sudo_command("apt update", Some("mypassword"));
/// assert_eq!(cmd, "printf '%s\\n' 'mypassword' | sudo -p \"\" -S sh -c 'apt update'");
/// ```
pub fn wrap_sudo_command(command: &str, password: Option<&str>) -> String {
    let escaped_command = escape_for_shell(command);

    match password {
        None => format!("sudo -n sh -c '{}'", escaped_command),
        Some(pwd) => {
            // Piping avoids an interactive password prompt inside the framed command
            let escaped_pwd = escape_for_shell(pwd);
            format!(
                "printf '%s\\n' '{}' | sudo -p \"\" -S sh -c '{}'",
                escaped_pwd, escaped_command
            )
        }
    }
}

/// Escapes a string for safe use in single-quoted shell contexts.
///
/// # Examples
///
/// ```
/// use ssh_shell_mcp::ssh::elevation::escape_for_shell;
///
/// assert_eq!(escape_for_shell("hello"), "hello");
/// assert_eq!(escape_for_shell("it's"), "it'\"'\"'s");
/// ```
pub fn escape_for_shell(s: &str) -> String {
    s.replace('\'', "'\"'\"'")
}
