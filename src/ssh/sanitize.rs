//! Command validation and best-effort output cleanup
//!
//! Cleanup only makes output nicer to read: it strips echoed commands,
//! prompts and the exit-code marker. Completion and exit status never
//! depend on it.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, ShellError};

/// Substrings that identify bulk archiving commands with very chatty output
pub const ARCHIVE_TOOLS: &[&str] = &["zip ", "tar "];

static ANSI_CSI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b\][^\x07]*\x07").expect("valid regex"));

static BRACKET_PROMPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[[A-Za-z0-9._-]+@[A-Za-z0-9._-]+[^\]]*\][$#>]?\s*").expect("valid regex")
});

static COLON_PROMPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._-]+@[A-Za-z0-9._-]+:[^\s$#>]*[$#>]\s*").expect("valid regex")
});

static EXCESS_BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n(?:[ \t]*\n){3,}").expect("valid regex"));

/// Sanitize a command before execution
///
/// Trims whitespace, rejects empty commands and enforces an optional length
/// limit.
///
/// # Examples
/// ```
/// use ssh_shell_mcp::ssh::sanitize::sanitize_command;
///
/// let cmd = sanitize_command("  ls -la  ", Some(1000)).unwrap();
/// assert_eq!(cmd, "ls -la");
///
/// let result = sanitize_command("a".repeat(100).as_str(), Some(50));
/// assert!(result.is_err());
/// ```
pub fn sanitize_command(command: &str, max_chars: Option<usize>) -> Result<String> {
    let trimmed = command.trim();

    if trimmed.is_empty() {
        return Err(ShellError::invalid_params("Command cannot be empty"));
    }

    if let Some(max) = max_chars {
        if trimmed.len() > max {
            return Err(ShellError::invalid_params(format!(
                "Command is too long (max {} characters, got {})",
                max,
                trimmed.len()
            )));
        }
    }

    Ok(trimmed.to_string())
}

/// Whether `command` invokes a bulk archiving tool
pub fn is_archive_command(command: &str) -> bool {
    ARCHIVE_TOOLS.iter().any(|tool| command.contains(tool))
}

/// Keep only the last `count` lines of `output`
pub fn tail_lines(output: &str, count: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

/// Everything needed to strip protocol noise from one command's output
#[derive(Debug, Clone, Copy)]
pub struct OutputCleaner<'a> {
    pub command: &'a str,
    pub wrapped: &'a str,
    pub sentinel: &'a str,
    pub prompt: &'a str,
}

impl OutputCleaner<'_> {
    /// Strip echoes, prompts and the marker line; collapse long blank runs
    pub fn clean(&self, raw: &str) -> String {
        let text = ANSI_CSI.replace_all(raw, "");
        let text = text.replace("\r\n", "\n").replace('\r', "");
        let wrapped = self.wrapped.trim_end();

        let mut kept = Vec::new();
        for line in text.lines() {
            if !self.sentinel.is_empty() && line.contains(self.sentinel) {
                continue;
            }
            let line = self.strip_prompt(line);
            let trimmed = line.trim();
            if trimmed == self.command || trimmed == wrapped {
                continue;
            }
            kept.push(line);
        }

        let joined = kept.join("\n");
        let collapsed = EXCESS_BLANK_LINES.replace_all(&joined, "\n\n\n");
        collapsed.trim().to_string()
    }

    fn strip_prompt<'l>(&self, line: &'l str) -> &'l str {
        let prompt = self.prompt.trim();
        let mut line = line;
        if !prompt.is_empty() {
            if let Some(rest) = line.strip_prefix(prompt) {
                line = rest.trim_start();
            }
        }
        if let Some(found) = BRACKET_PROMPT.find(line) {
            line = &line[found.end()..];
        } else if let Some(found) = COLON_PROMPT.find(line) {
            line = &line[found.end()..];
        }
        line
    }
}
