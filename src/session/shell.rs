//! Cached shell connection
//!
//! A [`CachedShell`] is the part of a session that outlives logical callers:
//! transport, shell profile, elevation state and last activity. It is owned
//! by the [`SessionRegistry`](super::SessionRegistry); logical sessions hold
//! a clone of the `Arc` while attached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::MutexGuard;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::registry::SessionKey;
use crate::error::Result;
use crate::ssh::command::{CancelCheck, Executor, INTERRUPT, SUSPEND};
use crate::ssh::handshake::{self, ShellProfile};
use crate::ssh::{CommandResult, Connector, ProgressCallback, ShellTimings, ShellTransport, SshConfig};

/// Exclusive state of the shell, held while a command is in flight
#[derive(Debug)]
pub struct ShellChannel {
    profile: ShellProfile,
    /// A command timed out; the shell must be probed before reuse
    suspect: bool,
}

impl ShellChannel {
    pub fn profile(&self) -> &ShellProfile {
        &self.profile
    }
}

/// One live, handshaken shell shared by every caller with the same key
pub struct CachedShell {
    key: SessionKey,
    config: SshConfig,
    timings: ShellTimings,
    connector: Arc<dyn Connector>,
    transport: Mutex<Arc<dyn ShellTransport>>,
    channel: tokio::sync::Mutex<ShellChannel>,
    /// Set by a caller that gave up waiting; the in-flight command stops at its next poll
    abort: AtomicBool,
    last_activity: Mutex<Instant>,
}

impl CachedShell {
    /// Connect, open the shell and run the handshake
    ///
    /// `on_handshake` is called once the transport is up and the handshake starts.
    pub async fn establish(
        key: SessionKey,
        config: SshConfig,
        timings: ShellTimings,
        connector: Arc<dyn Connector>,
        on_handshake: &(dyn Fn() + Send + Sync),
    ) -> Result<Arc<Self>> {
        let transport = connector.connect(&config).await?;
        on_handshake();

        let profile = match handshake::perform(transport.as_ref(), &config, &timings).await {
            Ok(profile) => profile,
            Err(e) => {
                transport.disconnect().await;
                return Err(e);
            }
        };

        Ok(Arc::new(Self {
            key,
            config,
            timings,
            connector,
            transport: Mutex::new(transport),
            channel: tokio::sync::Mutex::new(ShellChannel {
                profile,
                suspect: false,
            }),
            abort: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
        }))
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn transport(&self) -> Arc<dyn ShellTransport> {
        self.transport
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Cheap check: transport and shell channel report connected
    pub fn is_alive(&self) -> bool {
        self.transport().is_alive()
    }

    pub fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .elapsed()
    }

    /// Idle longer than `ttl`; a shell running a command never expires
    pub fn is_expired(&self, ttl: Duration) -> bool {
        !self.is_busy() && self.idle_for() > ttl
    }

    /// A command currently holds the shell
    pub fn is_busy(&self) -> bool {
        self.channel.try_lock().is_err()
    }

    /// Take the shell for one command
    ///
    /// Waits in FIFO order. After `busy_wait` the in-flight command is
    /// force-cancelled so a stuck command cannot block every other caller.
    pub async fn acquire(&self) -> MutexGuard<'_, ShellChannel> {
        let guard = match timeout(self.timings.busy_wait, self.channel.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!(
                    "Shell {} busy for more than {}s, cancelling the running command",
                    self.key,
                    self.timings.busy_wait.as_secs()
                );
                self.abort.store(true, Ordering::SeqCst);
                self.interrupt().await;
                self.channel.lock().await
            }
        };
        self.abort.store(false, Ordering::SeqCst);
        guard
    }

    /// Send the interrupt sequence (Ctrl-C, Ctrl-Z) down the raw channel
    pub async fn interrupt(&self) {
        let transport = self.transport();
        for signal in [INTERRUPT, SUSPEND] {
            if let Err(e) = transport.write(signal).await {
                warn!("Failed to send interrupt to {}: {}", self.key, e);
                return;
            }
        }
        debug!("Interrupt sequence sent to {}", self.key);
    }

    /// Make sure the shell answers, rebuilding it in place if it does not
    pub async fn ensure_responsive(&self, channel: &mut ShellChannel) -> Result<()> {
        let transport = self.transport();
        if !transport.is_alive() {
            warn!("Shell {} is disconnected, rebuilding", self.key);
            return self.rebuild(channel).await;
        }

        if !channel.suspect && self.idle_for() < self.timings.probe_interval {
            return Ok(());
        }

        let executor = Executor {
            transport: transport.as_ref(),
            prompt: &channel.profile.prompt,
            timings: &self.timings,
        };
        if executor.probe().await {
            channel.suspect = false;
            self.touch();
            return Ok(());
        }

        warn!("Shell {} did not answer the echo probe, rebuilding", self.key);
        self.rebuild(channel).await
    }

    /// Replace the transport with a fresh connection and handshake
    async fn rebuild(&self, channel: &mut ShellChannel) -> Result<()> {
        self.transport().disconnect().await;

        let transport = self.connector.connect(&self.config).await?;
        let profile = match handshake::perform(transport.as_ref(), &self.config, &self.timings).await
        {
            Ok(profile) => profile,
            Err(e) => {
                transport.disconnect().await;
                return Err(e);
            }
        };

        *self.transport.lock().unwrap_or_else(|p| p.into_inner()) = transport;
        channel.profile = profile;
        channel.suspect = false;
        self.touch();
        info!("Shell {} rebuilt", self.key);
        Ok(())
    }

    /// Run one command on the held shell
    pub async fn run(
        &self,
        channel: &mut ShellChannel,
        command: &str,
        timeout: Duration,
        cancelled: CancelCheck<'_>,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<CommandResult> {
        let transport = self.transport();
        let executor = Executor {
            transport: transport.as_ref(),
            prompt: &channel.profile.prompt,
            timings: &self.timings,
        };
        let stop = || cancelled() || self.abort.load(Ordering::SeqCst);

        let result = executor.run(command, timeout, &stop, progress).await;
        // The remote process may still be winding down after Ctrl-C
        if matches!(&result, Err(e) if e.is_timeout() || e.is_cancelled()) {
            channel.suspect = true;
        }
        self.touch();
        result
    }

    pub async fn disconnect(&self) {
        self.transport().disconnect().await;
    }
}

impl std::fmt::Debug for CachedShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedShell")
            .field("key", &self.key)
            .field("alive", &self.is_alive())
            .field("idle_secs", &self.idle_for().as_secs())
            .finish()
    }
}
