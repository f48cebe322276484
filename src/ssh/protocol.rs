//! Command completion protocol
//!
//! A PTY shell is an unframed byte stream. Every command is sent as
//!
//! ```text
//! <command>; echo "<id>_EXIT_CODE:$?"\n
//! ```
//!
//! and is complete once `<id>_EXIT_CODE:` shows up in the output followed by
//! the exit status digits. `<id>` is unique per command within the process,
//! so trailing output of an earlier command can never complete a later one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;

/// Exit code reported when the status after the marker cannot be parsed
pub const UNPARSABLE_EXIT_CODE: i32 = -1;

const EXIT_CODE_TAG: &str = "_EXIT_CODE:";

static MARKER_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Seed taken once per process so markers differ across restarts
static MARKER_SEED: Lazy<u64> = Lazy::new(|| {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
});

/// Unique completion marker for one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMarker {
    id: String,
}

impl CommandMarker {
    /// Next marker in the process-wide sequence
    pub fn next() -> Self {
        let sequence = MARKER_SEQUENCE.fetch_add(1, Ordering::SeqCst) + 1;
        Self {
            id: format!("CMD{:x}_{}", *MARKER_SEED, sequence),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The literal substring that signals completion
    pub fn sentinel(&self) -> String {
        format!("{}{}", self.id, EXIT_CODE_TAG)
    }

    /// Wrap `command` so the shell reports its exit status after it finishes
    pub fn wrap(&self, command: &str) -> String {
        format!("{}; echo \"{}$?\"\n", command, self.sentinel())
    }

    /// Position right after the sentinel that carries the real exit status.
    ///
    /// Occurrences followed by `$?` are the command line itself (echoed back by
    /// a shell that still has echo on) and are skipped.
    pub fn find_completion(&self, output: &str) -> Option<usize> {
        let sentinel = self.sentinel();
        let mut from = 0;
        while let Some(found) = output[from..].find(&sentinel) {
            let end = from + found + sentinel.len();
            if !output[end..].starts_with("$?") {
                return Some(end);
            }
            from = end;
        }
        None
    }

    pub fn is_complete(&self, output: &str) -> bool {
        self.find_completion(output).is_some()
    }

    /// Exit status following the sentinel, if it is a digit run
    pub fn parse_exit_code(&self, output: &str) -> Option<i32> {
        let start = self.find_completion(output)?;
        let digits: String = output[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }
}

/// Marker printed by a handshake probe.
///
/// The command splits the marker into two quoted halves, so only the shell's
/// output (never an echo of the command) contains it joined.
#[derive(Debug, Clone)]
pub struct ProbeMarker {
    left: String,
    right: String,
}

impl ProbeMarker {
    pub fn next(kind: &str) -> Self {
        let marker = CommandMarker::next();
        Self {
            left: format!("{}_", kind),
            right: marker.id,
        }
    }

    /// Joined marker as it appears in output
    pub fn text(&self) -> String {
        format!("{}{}", self.left, self.right)
    }

    pub fn command(&self) -> String {
        format!("printf '%s%s\\n' '{}' '{}'\n", self.left, self.right)
    }
}
