//! SSH shell transport
//!
//! Owns the authenticated SSH session and one PTY-backed shell channel, and
//! exposes the raw primitives the rest of the crate builds on: write bytes to
//! the remote stdin, drain accumulated output, cheap liveness, SFTP.
//!
//! A background pump task owns the russh `Channel`: it appends every data
//! message to a shared [`OutputBuffer`] and forwards queued writes, so writers
//! (including a cancelling task) never contend with the reader.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use russh::{Channel, ChannelMsg};
use russh_sftp::client::SftpSession;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::config::SshConfig;
use super::handler::SshHandler;
use super::transfer::TransferHandle;
use crate::config::CONNECTION_TIMEOUT_SECS;
use crate::error::{Result, ShellError};

/// Columns requested for the PTY; wide enough that shells do not re-wrap command lines
const PTY_COLUMNS: u32 = 512;
const PTY_ROWS: u32 = 24;

/// Shared, position-less accumulator for shell output
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<String>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of output
    pub fn push(&self, text: &str) {
        self.lock().push_str(text);
    }

    /// Take everything accumulated since the last drain
    pub fn drain(&self) -> String {
        std::mem::take(&mut *self.lock())
    }

    /// Discard accumulated output
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, String> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Incremental UTF-8 decoder for channel packets
///
/// A multi-byte character split across packets is held back until its
/// remaining bytes arrive. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, data: &[u8]) -> String {
        self.pending.extend_from_slice(data);
        let complete = self.pending.len() - incomplete_tail(&self.pending);
        let text = String::from_utf8_lossy(&self.pending[..complete]).into_owned();
        self.pending.drain(..complete);
        text
    }
}

/// Length of a truncated multi-byte sequence at the end of `bytes`
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let needed = match byte {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}

/// Raw byte-level access to one interactive remote shell
#[async_trait]
pub trait ShellTransport: Send + Sync + std::fmt::Debug {
    /// Write bytes to the remote shell's stdin
    async fn write(&self, data: &[u8]) -> Result<()>;

    /// Drain output that arrived since the previous read
    fn read_available(&self) -> String;

    /// Discard any buffered output
    fn clear_output(&self);

    /// Transport and shell channel both report connected.
    ///
    /// Does not prove the remote shell is responsive.
    fn is_alive(&self) -> bool;

    /// Open a file-transfer sub-channel on the same connection
    async fn open_transfer(&self) -> Result<TransferHandle>;

    /// Close the shell channel and the connection
    async fn disconnect(&self);
}

/// Builds connected transports with an open shell channel
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &SshConfig) -> Result<Arc<dyn ShellTransport>>;
}

/// Connector backed by russh
#[derive(Debug, Clone)]
pub struct SshConnector {
    connect_timeout: Duration,
}

impl SshConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECTION_TIMEOUT_SECS),
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, config: &SshConfig) -> Result<Arc<dyn ShellTransport>> {
        let transport = SshTransport::connect(config, self.connect_timeout).await?;
        transport.open_shell().await?;
        Ok(Arc::new(transport))
    }
}

/// Writer half of the shell channel, present once `open_shell` succeeded
struct ShellPipe {
    writer: mpsc::UnboundedSender<Vec<u8>>,
    open: Arc<AtomicBool>,
}

/// russh-backed transport: one SSH connection and one PTY shell channel
pub struct SshTransport {
    host: String,
    session: tokio::sync::Mutex<Handle<SshHandler>>,
    pipe: Mutex<Option<ShellPipe>>,
    output: OutputBuffer,
}

impl SshTransport {
    /// Establish and authenticate an SSH connection
    pub async fn connect(config: &SshConfig, connect_timeout: Duration) -> Result<Self> {
        info!(
            "Connecting to SSH server {}:{}...",
            config.host, config.port
        );

        let ssh_config = Arc::new(client::Config::default());
        let addr = format!("{}:{}", config.host, config.port);
        let connect_result = timeout(
            connect_timeout,
            client::connect(ssh_config, addr.as_str(), SshHandler::new(&config.host)),
        )
        .await;

        let mut session = match connect_result {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                error!("SSH connection to {} failed: {}", addr, e);
                return Err(ShellError::connection(format!("{}: {}", addr, e)));
            }
            Err(_) => {
                error!(
                    "SSH connection to {} timed out after {}s",
                    addr,
                    connect_timeout.as_secs()
                );
                return Err(ShellError::connection(format!(
                    "{}: connection timeout after {}s",
                    addr,
                    connect_timeout.as_secs()
                )));
            }
        };

        authenticate(&mut session, config).await?;

        info!(
            "Successfully connected to {}@{}:{}",
            config.username, config.host, config.port
        );

        Ok(Self {
            host: config.host.clone(),
            session: tokio::sync::Mutex::new(session),
            pipe: Mutex::new(None),
            output: OutputBuffer::new(),
        })
    }

    /// Open the PTY-backed interactive shell and start the output pump
    pub async fn open_shell(&self) -> Result<()> {
        let channel = {
            let session = self.session.lock().await;
            if session.is_closed() {
                return Err(ShellError::channel("SSH connection not established"));
            }
            session
                .channel_open_session()
                .await
                .map_err(|e| ShellError::channel(format!("Failed to open channel: {}", e)))?
        };

        channel
            .request_pty(true, "dumb", PTY_COLUMNS, PTY_ROWS, 0, 0, &[])
            .await
            .map_err(|e| ShellError::channel(format!("Failed to request PTY: {}", e)))?;
        debug!("PTY requested on {}", self.host);

        channel
            .request_shell(true)
            .await
            .map_err(|e| ShellError::channel(format!("Failed to request shell: {}", e)))?;
        debug!("Shell requested on {}", self.host);

        let (writer, requests) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        tokio::spawn(pump(
            channel,
            requests,
            self.output.clone(),
            open.clone(),
            self.host.clone(),
        ));

        let mut pipe = self.pipe.lock().unwrap_or_else(|p| p.into_inner());
        *pipe = Some(ShellPipe { writer, open });
        Ok(())
    }

    fn writer(&self) -> Result<mpsc::UnboundedSender<Vec<u8>>> {
        let pipe = self.pipe.lock().unwrap_or_else(|p| p.into_inner());
        match pipe.as_ref() {
            Some(pipe) if pipe.open.load(Ordering::SeqCst) => Ok(pipe.writer.clone()),
            Some(_) => Err(ShellError::channel("Shell channel closed")),
            None => Err(ShellError::channel("Shell channel not open")),
        }
    }
}

#[async_trait]
impl ShellTransport for SshTransport {
    async fn write(&self, data: &[u8]) -> Result<()> {
        self.writer()?
            .send(data.to_vec())
            .map_err(|_| ShellError::channel("Shell channel closed"))
    }

    fn read_available(&self) -> String {
        self.output.drain()
    }

    fn clear_output(&self) {
        self.output.clear();
    }

    fn is_alive(&self) -> bool {
        let shell_open = self
            .pipe
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|pipe| pipe.open.load(Ordering::SeqCst));
        if !shell_open {
            return false;
        }
        // A held lock means a connection-level call is in progress; treat as connected.
        self.session
            .try_lock()
            .map(|session| !session.is_closed())
            .unwrap_or(true)
    }

    async fn open_transfer(&self) -> Result<TransferHandle> {
        let channel = {
            let session = self.session.lock().await;
            session
                .channel_open_session()
                .await
                .map_err(|e| ShellError::channel(format!("Failed to open channel: {}", e)))?
        };

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| ShellError::transfer(format!("Failed to request sftp subsystem: {}", e)))?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| ShellError::transfer(format!("Failed to start sftp session: {}", e)))?;

        debug!("SFTP channel opened on {}", self.host);
        Ok(TransferHandle::new(sftp))
    }

    async fn disconnect(&self) {
        // Dropping the writer ends the pump, which closes the shell channel.
        self.pipe.lock().unwrap_or_else(|p| p.into_inner()).take();

        let session = self.session.lock().await;
        let _ = session
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await;

        info!("SSH connection to {} closed", self.host);
    }
}

impl std::fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransport")
            .field("host", &self.host)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Authenticate with the SSH server
async fn authenticate(session: &mut Handle<SshHandler>, config: &SshConfig) -> Result<()> {
    // Try password authentication first
    if let Some(ref password) = config.password {
        debug!(
            "Attempting password authentication for user '{}'",
            config.username
        );
        let auth_result = session
            .authenticate_password(&config.username, password)
            .await
            .map_err(|e| ShellError::auth(e.to_string()))?;

        if auth_result.success() {
            info!("Password authentication successful");
            return Ok(());
        }
        return Err(ShellError::auth(format!(
            "Password authentication rejected for {}@{}",
            config.username, config.host
        )));
    }

    if let Some(ref key_content) = config.private_key {
        debug!(
            "Attempting key authentication for user '{}'",
            config.username
        );

        let key = russh::keys::PrivateKey::from_openssh(key_content.as_bytes())
            .map_err(|e| ShellError::SshKey(format!("Failed to parse private key: {}", e)))?;
        let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);

        let auth_result = session
            .authenticate_publickey(&config.username, key_with_alg)
            .await
            .map_err(|e| ShellError::auth(e.to_string()))?;

        if auth_result.success() {
            info!("Key authentication successful");
            return Ok(());
        }
        return Err(ShellError::auth(format!(
            "Key authentication rejected for {}@{}",
            config.username, config.host
        )));
    }

    Err(ShellError::auth(
        "No authentication method available (require password or private_key)",
    ))
}

/// Move bytes between the shell channel and the shared buffer until either side closes
async fn pump(
    mut channel: Channel<client::Msg>,
    mut requests: mpsc::UnboundedReceiver<Vec<u8>>,
    output: OutputBuffer,
    open: Arc<AtomicBool>,
    host: String,
) {
    let mut stdout = Utf8Decoder::default();
    let mut stderr = Utf8Decoder::default();
    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    output.push(&stdout.decode(&data));
                }
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    output.push(&stderr.decode(&data));
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!("Shell on {} exited with status {}", host, exit_status);
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
            request = requests.recv() => match request {
                Some(bytes) => {
                    if let Err(e) = channel.data(&bytes[..]).await {
                        error!("Failed to write to shell on {}: {}", host, e);
                        break;
                    }
                }
                None => break,
            },
        }
    }

    open.store(false, Ordering::SeqCst);
    let _ = channel.close().await;
    debug!("Shell channel pump for {} stopped", host);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_buffer_drain_and_clear() {
        let buffer = OutputBuffer::new();
        buffer.push("hello ");
        buffer.push("world");
        assert_eq!(buffer.drain(), "hello world");
        assert!(buffer.is_empty());

        buffer.push("stale");
        buffer.clear();
        assert_eq!(buffer.drain(), "");
    }

    #[test]
    fn test_output_buffer_is_shared_between_clones() {
        let buffer = OutputBuffer::new();
        let pump_side = buffer.clone();
        pump_side.push("from pump");
        assert_eq!(buffer.drain(), "from pump");
    }

    #[test]
    fn test_decoder_joins_character_split_across_packets() {
        let bytes = "caf\u{e9} \u{2713}".as_bytes();
        let mut decoder = Utf8Decoder::default();

        assert_eq!(decoder.decode(&bytes[..4]), "caf");
        assert_eq!(decoder.decode(&bytes[4..7]), "\u{e9} ");
        assert_eq!(decoder.decode(&bytes[7..8]), "");
        assert_eq!(decoder.decode(&bytes[8..]), "\u{2713}");
        assert!(decoder.pending.is_empty());
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{fffd}b");
        assert!(decoder.pending.is_empty());
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let config = SshConfig::new("127.0.0.1", "nobody")
            .with_port(1)
            .with_password("x");
        let result = SshConnector::new()
            .with_connect_timeout(Duration::from_secs(2))
            .connect(&config)
            .await;
        match result {
            Err(e) => assert!(e.is_connection(), "unexpected error: {}", e),
            Ok(_) => panic!("connection to a closed port must fail"),
        }
    }
}
