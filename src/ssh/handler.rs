//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait to handle SSH connection events.

use tracing::debug;

/// SSH client handler for russh
///
/// Accepts every server key (automated connections, host key verification is
/// handled outside this crate) and logs the key fingerprint for auditing.
#[derive(Debug, Clone)]
pub struct SshHandler {
    host: String,
}

impl SshHandler {
    /// Create a handler for connections to `host`
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl russh::client::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "Accepting host key for {}: {}",
            self.host,
            server_public_key.fingerprint(Default::default())
        );
        Ok(true)
    }
}
