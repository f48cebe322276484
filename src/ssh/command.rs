//! Command execution over an interactive shell
//!
//! Provides [`CommandResult`], the [`ProgressCallback`] seam for UI-style
//! consumers and the [`Executor`] read loop that drives one wrapped command
//! to completion, timeout or cancellation.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::config::ShellTimings;
use super::protocol::{CommandMarker, ProbeMarker, UNPARSABLE_EXIT_CODE};
use super::sanitize::{is_archive_command, tail_lines, OutputCleaner};
use super::transport::ShellTransport;
use crate::error::{Result, ShellError};

/// Terminal interrupt (Ctrl-C)
pub const INTERRUPT: &[u8] = b"\x03";

/// Terminal suspend (Ctrl-Z)
pub const SUSPEND: &[u8] = b"\x1a";

/// Output and exit status of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Cleaned output (stdout and stderr interleaved as the PTY delivered them)
    pub output: String,

    /// Exit status, or [`UNPARSABLE_EXIT_CODE`] if the shell did not report one
    pub exit_code: i32,
}

impl CommandResult {
    pub fn new(output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            output: output.into(),
            exit_code,
        }
    }

    /// Check if the command succeeded (exit code 0)
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Receives progress of a long-running command
pub trait ProgressCallback: Send + Sync {
    /// New output arrived; `percent` is the share of the timeout already used
    fn on_progress(&self, percent: u8, message: &str);

    fn on_complete(&self, message: &str);

    fn on_error(&self, message: &str);

    /// Polled once per read-loop iteration
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Cancellation predicate polled by the read loop
pub type CancelCheck<'a> = &'a (dyn Fn() -> bool + Send + Sync);

/// Runs wrapped commands against one shell transport
pub struct Executor<'a> {
    pub transport: &'a dyn ShellTransport,
    /// Detected prompt, stripped from output
    pub prompt: &'a str,
    pub timings: &'a ShellTimings,
}

impl Executor<'_> {
    /// Execute `command` and wait for its completion marker
    ///
    /// # Returns
    /// * `Ok(CommandResult)` - Cleaned output and exit code
    /// * `Err(ShellError::Timeout)` - The marker did not arrive in time; Ctrl-C was sent
    /// * `Err(ShellError::Cancelled)` - `cancelled` or the progress callback asked to stop
    /// * `Err(ShellError::Channel)` - The shell channel died mid-command
    pub async fn run(
        &self,
        command: &str,
        timeout: Duration,
        cancelled: CancelCheck<'_>,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<CommandResult> {
        let result = self.run_inner(command, timeout, cancelled, progress).await;

        if let Some(progress) = progress {
            match &result {
                Ok(output) => progress.on_complete(&format!(
                    "Command finished with exit code {}",
                    output.exit_code
                )),
                Err(e) if e.is_cancelled() => {}
                Err(e) => progress.on_error(&e.to_string()),
            }
        }

        result
    }

    async fn run_inner(
        &self,
        command: &str,
        timeout: Duration,
        cancelled: CancelCheck<'_>,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<CommandResult> {
        let marker = CommandMarker::next();
        let sentinel = marker.sentinel();
        let wrapped = marker.wrap(command);

        // Stale bytes from an earlier command must not reach this one
        self.transport.clear_output();
        self.transport.write(wrapped.as_bytes()).await?;
        debug!("Sent command [{}]: {}", marker.id(), command);

        let started = Instant::now();
        let deadline = started + timeout;
        let mut output = String::new();
        let mut reporter = ProgressReporter::new(progress, self.timings.progress_interval, timeout);

        let end = loop {
            sleep(self.timings.poll_interval).await;

            let chunk = self.transport.read_available();
            if !chunk.is_empty() {
                output.push_str(&chunk);
                reporter.feed(&chunk, &sentinel);
            }

            if let Some(end) = marker.find_completion(&output) {
                break end;
            }

            if cancelled() || progress.is_some_and(|p| p.is_cancelled()) {
                debug!("Command [{}] cancelled, sending interrupt", marker.id());
                self.interrupt(&[INTERRUPT, SUSPEND]).await;
                return Err(ShellError::Cancelled);
            }

            if !self.transport.is_alive() {
                return Err(ShellError::channel(
                    "Shell channel closed while command was running",
                ));
            }

            if Instant::now() >= deadline {
                warn!(
                    "Command [{}] timed out after {}s, sending interrupt",
                    marker.id(),
                    timeout.as_secs()
                );
                self.interrupt(&[INTERRUPT]).await;
                return Err(ShellError::Timeout(timeout.as_secs()));
            }
        };

        let exit_code = marker.parse_exit_code(&output).unwrap_or_else(|| {
            warn!(
                "Exit code after marker [{}] is unparsable, reporting {}",
                marker.id(),
                UNPARSABLE_EXIT_CODE
            );
            UNPARSABLE_EXIT_CODE
        });

        let body = &output[..end - sentinel.len()];
        let body = if is_archive_command(command) {
            tail_lines(body, self.timings.archive_tail_lines)
        } else {
            body.to_string()
        };

        let cleaner = OutputCleaner {
            command,
            wrapped: &wrapped,
            sentinel: &sentinel,
            prompt: self.prompt,
        };
        let cleaned = cleaner.clean(&body);

        debug!(
            "Command [{}] completed: exit_code={}, output_len={}, elapsed={}ms",
            marker.id(),
            exit_code,
            cleaned.len(),
            started.elapsed().as_millis()
        );

        Ok(CommandResult::new(cleaned, exit_code))
    }

    /// Write control characters, then give the shell time to reach its prompt
    async fn interrupt(&self, signals: &[&[u8]]) {
        for signal in signals {
            if self.transport.write(signal).await.is_err() {
                return;
            }
        }
        sleep(self.timings.settle_delay).await;
    }

    /// Echo probe: does the shell answer within the probe timeout?
    pub async fn probe(&self) -> bool {
        let marker = ProbeMarker::next("ALIVE");
        self.transport.clear_output();
        if self.transport.write(marker.command().as_bytes()).await.is_err() {
            return false;
        }

        let deadline = Instant::now() + self.timings.probe_timeout;
        let mut output = String::new();
        while Instant::now() < deadline {
            sleep(self.timings.poll_interval).await;
            output.push_str(&self.transport.read_available());
            if output.contains(&marker.text()) {
                return true;
            }
            if !self.transport.is_alive() {
                return false;
            }
        }
        false
    }
}

/// Forwards new output to a progress callback, at most once per interval
struct ProgressReporter<'a> {
    callback: Option<&'a dyn ProgressCallback>,
    interval: Duration,
    timeout: Duration,
    started: Instant,
    last_report: Option<Instant>,
    pending: String,
}

impl<'a> ProgressReporter<'a> {
    fn new(
        callback: Option<&'a dyn ProgressCallback>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            callback,
            interval,
            timeout,
            started: Instant::now(),
            last_report: None,
            pending: String::new(),
        }
    }

    fn feed(&mut self, chunk: &str, sentinel: &str) {
        let Some(callback) = self.callback else {
            return;
        };

        for line in chunk.lines().filter(|line| !line.contains(sentinel)) {
            self.pending.push_str(line);
            self.pending.push('\n');
        }

        let due = self
            .last_report
            .is_none_or(|last| last.elapsed() >= self.interval);
        let message = self.pending.trim();
        if !due || message.is_empty() {
            return;
        }

        callback.on_progress(self.percent(), message);
        self.pending.clear();
        self.last_report = Some(Instant::now());
    }

    fn percent(&self) -> u8 {
        if self.timeout.is_zero() {
            return 0;
        }
        let used = self.started.elapsed().as_millis() * 100 / self.timeout.as_millis();
        used.min(99) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        progress: Mutex<Vec<String>>,
    }

    impl ProgressCallback for Recorder {
        fn on_progress(&self, _percent: u8, message: &str) {
            self.progress.lock().unwrap().push(message.to_string());
        }
        fn on_complete(&self, _message: &str) {}
        fn on_error(&self, _message: &str) {}
    }

    #[test]
    fn test_command_result_success() {
        assert!(CommandResult::new("hello", 0).is_success());
        assert!(!CommandResult::new("", 1).is_success());
        assert!(!CommandResult::new("", UNPARSABLE_EXIT_CODE).is_success());
    }

    #[test]
    fn test_progress_reporter_throttles() {
        let recorder = Recorder::default();
        let mut reporter = ProgressReporter::new(
            Some(&recorder),
            Duration::from_secs(3600),
            Duration::from_secs(10),
        );

        reporter.feed("first\n", "SENTINEL");
        reporter.feed("second\n", "SENTINEL");
        reporter.feed("third\nSENTINEL0\n", "SENTINEL");

        let progress = recorder.progress.lock().unwrap();
        assert_eq!(progress.as_slice(), ["first"]);
        assert!(!reporter.pending.contains("SENTINEL"));
        assert!(reporter.pending.contains("second"));
    }

    #[test]
    fn test_progress_reporter_skips_blank_chunks() {
        let recorder = Recorder::default();
        let mut reporter =
            ProgressReporter::new(Some(&recorder), Duration::ZERO, Duration::from_secs(10));

        reporter.feed("\r\n  \n", "SENTINEL");
        reporter.feed("data\n", "SENTINEL");

        let progress = recorder.progress.lock().unwrap();
        assert_eq!(progress.as_slice(), ["data"]);
    }
}
