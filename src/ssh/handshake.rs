//! Shell handshake
//!
//! Brings a freshly opened PTY shell into a state where command wrapping is
//! reliable: banner discarded, echo off, history expansion off, prompt known,
//! and (optionally) switched to the elevation target user.

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use super::config::{ShellTimings, SshConfig};
use super::elevation::switch_user;
use super::protocol::ProbeMarker;
use super::transport::ShellTransport;
use crate::error::{Result, ShellError};

/// `user@host` prefix terminated by one of `>`, `$`, `#`, `]`
static PROMPT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[?[A-Za-z0-9._-]+@[A-Za-z0-9._-]+[^\r\n$#>\]]*[$#>\]]+").expect("valid regex")
});

/// What the handshake learned about the shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellProfile {
    /// Detected (or synthesized) prompt, stripped from command output
    pub prompt: String,

    /// User the shell currently runs as
    pub user: String,

    /// Whether a user context switch was performed
    pub elevated: bool,
}

/// Run the full handshake on a freshly opened shell
pub async fn perform(
    transport: &dyn ShellTransport,
    config: &SshConfig,
    timings: &ShellTimings,
) -> Result<ShellProfile> {
    debug!("Starting shell handshake on {}", config.host);

    sleep(timings.settle_delay).await;
    let banner = transport.read_available();
    debug!("Discarded {} bytes of startup banner", banner.len());

    send(transport, "stty -echo\n").await?;
    sleep(timings.settle_delay).await;
    transport.clear_output();

    send(transport, "set +H\n").await?;
    sleep(timings.settle_delay).await;

    let mut profile = ShellProfile {
        prompt: detect_prompt(transport, config, &config.username, timings).await?,
        user: config.username.clone(),
        elevated: false,
    };

    if let Some(target) = config.elevate_user.as_deref() {
        switch_user(transport, config, target, timings).await?;
        profile.prompt = detect_prompt(transport, config, target, timings).await?;
        profile.user = target.to_string();
        profile.elevated = true;
    }

    transport.clear_output();
    info!(
        "Shell ready on {} as {} (prompt '{}')",
        config.host, profile.user, profile.prompt
    );
    Ok(profile)
}

/// Print a unique marker and read the prompt around it
///
/// Falls back to `<user>@<host prefix>` when no prompt-like text is found.
pub async fn detect_prompt(
    transport: &dyn ShellTransport,
    config: &SshConfig,
    user: &str,
    timings: &ShellTimings,
) -> Result<String> {
    let marker = ProbeMarker::next("PROMPT");
    send(transport, &marker.command()).await?;

    let deadline = Instant::now() + timings.probe_timeout;
    let mut output = String::new();
    loop {
        sleep(timings.poll_interval).await;
        output.push_str(&transport.read_available());
        if output.contains(&marker.text()) {
            break;
        }
        if !transport.is_alive() {
            return Err(ShellError::handshake("Shell channel closed during handshake"));
        }
        if Instant::now() >= deadline {
            return Err(ShellError::handshake(format!(
                "Shell on {} did not answer the prompt probe",
                config.host
            )));
        }
    }

    // Let the prompt that follows the marker arrive as well
    sleep(timings.settle_delay).await;
    output.push_str(&transport.read_available());

    match extract_prompt(&output, &marker.text()) {
        Some(prompt) => {
            debug!("Detected prompt '{}'", prompt);
            Ok(prompt)
        }
        None => {
            let fallback = format!("{}@{}", user, config.host_prefix());
            debug!("No prompt detected, using fallback '{}'", fallback);
            Ok(fallback)
        }
    }
}

/// Prompt immediately preceding `marker`, else the first one following it
pub fn extract_prompt(output: &str, marker: &str) -> Option<String> {
    let at = output.find(marker)?;
    let (before, after) = output.split_at(at);

    PROMPT_PATTERN
        .find_iter(before)
        .last()
        .or_else(|| PROMPT_PATTERN.find(&after[marker.len()..]))
        .map(|found| found.as_str().trim().to_string())
}

async fn send(transport: &dyn ShellTransport, line: &str) -> Result<()> {
    transport
        .write(line.as_bytes())
        .await
        .map_err(|e| ShellError::handshake(format!("Failed to send '{}': {}", line.trim(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_prompt_before_marker() {
        let output = "alice@build01:~$ PROMPT_CMD1_4\r\nalice@build01:~$ ";
        assert_eq!(
            extract_prompt(output, "PROMPT_CMD1_4"),
            Some("alice@build01:~$".to_string())
        );
    }

    #[test]
    fn test_extract_prompt_bracket_form() {
        let output = "[svc@build01 ~]$ PROMPT_CMD1_9\r\n";
        assert_eq!(
            extract_prompt(output, "PROMPT_CMD1_9"),
            Some("[svc@build01 ~]$".to_string())
        );
    }

    #[test]
    fn test_extract_prompt_after_marker() {
        let output = "PROMPT_CMD1_5\r\nroot@build01:/opt# ";
        assert_eq!(
            extract_prompt(output, "PROMPT_CMD1_5"),
            Some("root@build01:/opt#".to_string())
        );
    }

    #[test]
    fn test_extract_prompt_none() {
        assert_eq!(extract_prompt("PROMPT_X\r\n$ ", "PROMPT_X"), None);
        assert_eq!(extract_prompt("no marker here", "PROMPT_X"), None);
    }
}
