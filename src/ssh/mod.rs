//! SSH shell module
//!
//! Transport, handshake, completion protocol and command executor for one
//! PTY-backed interactive shell.

pub mod command;
pub mod config;
pub mod elevation;
pub mod handler;
pub mod handshake;
pub mod protocol;
pub mod sanitize;
pub mod transfer;
pub mod transport;

// Re-exports
pub use command::{CommandResult, Executor, ProgressCallback};
pub use config::{ShellTimings, SshConfig};
pub use elevation::{escape_for_shell, wrap_sudo_command};
pub use handler::SshHandler;
pub use handshake::ShellProfile;
pub use protocol::{CommandMarker, UNPARSABLE_EXIT_CODE};
pub use sanitize::sanitize_command;
pub use transfer::TransferHandle;
pub use transport::{Connector, OutputBuffer, ShellTransport, SshConnector, SshTransport};
