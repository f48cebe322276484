//! Session registry
//!
//! Keyed, time-boxed reuse of handshaken shells. The registry is an explicit
//! object handed to callers (clone it freely; clones share state), backed by
//! a `DashMap` of per-key slots. Each slot is an async mutex, so two tasks
//! racing for the same key serialize and only one connection is built.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::shell::CachedShell;
use crate::config::SESSION_TTL_SECS;
use crate::error::Result;
use crate::ssh::{Connector, ShellTimings, SshConfig};

/// Placeholder for "no elevation target" in keys
const NO_ELEVATION: &str = "-";

/// Identity of a cached shell
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub host: String,
    pub port: u16,
    pub login_user: String,
    pub elevate_user: String,
    pub purpose: String,
}

impl SessionKey {
    pub fn from_config(config: &SshConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            login_user: config.username.clone(),
            elevate_user: config
                .elevate_user
                .clone()
                .unwrap_or_else(|| NO_ELEVATION.to_string()),
            purpose: config.purpose.clone(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}[{}]#{}",
            self.login_user, self.host, self.port, self.elevate_user, self.purpose
        )
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<Arc<CachedShell>>>>;

struct RegistryInner {
    slots: DashMap<SessionKey, Slot>,
    connector: Arc<dyn Connector>,
    timings: ShellTimings,
    ttl: Duration,
}

/// Shared cache of live shells
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_options(
            connector,
            ShellTimings::default(),
            Duration::from_secs(SESSION_TTL_SECS),
        )
    }

    pub fn with_options(connector: Arc<dyn Connector>, timings: ShellTimings, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                slots: DashMap::new(),
                connector,
                timings,
                ttl,
            }),
        }
    }

    pub fn timings(&self) -> &ShellTimings {
        &self.inner.timings
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Live shell for `config`'s key, building one if needed
    ///
    /// Expired or dead entries found on the way are evicted and disconnected.
    pub async fn checkout(
        &self,
        config: &SshConfig,
        on_handshake: &(dyn Fn() + Send + Sync),
    ) -> Result<Arc<CachedShell>> {
        let key = SessionKey::from_config(config);
        let slot = self.inner.slots.entry(key.clone()).or_default().clone();
        let mut cached = slot.lock().await;

        if let Some(shell) = cached.take() {
            if shell.is_expired(self.inner.ttl) {
                info!("Cached shell {} expired, reconnecting", key);
                shell.disconnect().await;
            } else if !shell.is_alive() {
                warn!("Cached shell {} is disconnected, reconnecting", key);
                shell.disconnect().await;
            } else {
                debug!("Reusing cached shell {}", key);
                shell.touch();
                *cached = Some(shell.clone());
                return Ok(shell);
            }
        }

        let shell = CachedShell::establish(
            key.clone(),
            config.clone(),
            self.inner.timings.clone(),
            self.inner.connector.clone(),
            on_handshake,
        )
        .await?;
        *cached = Some(shell.clone());
        info!("Cached new shell {}", key);
        Ok(shell)
    }

    /// Remove `key`'s entry; the shell itself is returned, not disconnected
    pub async fn evict(&self, key: &SessionKey) -> Option<Arc<CachedShell>> {
        let (_, slot) = self.inner.slots.remove(key)?;
        let shell = slot.lock().await.take();
        if shell.is_some() {
            debug!("Evicted cached shell {}", key);
        }
        shell
    }

    /// Evict and disconnect every cached shell
    pub async fn close_all_sessions(&self) {
        let keys: Vec<SessionKey> = self.inner.slots.iter().map(|e| e.key().clone()).collect();
        for key in &keys {
            if let Some(shell) = self.evict(key).await {
                shell.disconnect().await;
            }
        }
        info!("Closed {} cached sessions", keys.len());
    }

    /// Evict expired or dead entries; returns how many shells were removed
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let slots: Vec<(SessionKey, Slot)> = self
            .inner
            .slots
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut removed = 0;
        for (key, slot) in slots {
            let mut cached = slot.lock().await;
            let stale = match cached.as_ref() {
                Some(shell) => shell.is_expired(self.inner.ttl) || !shell.is_alive(),
                None => true,
            };
            if !stale {
                continue;
            }

            if let Some(shell) = cached.take() {
                info!("Removing stale cached shell {}", key);
                shell.disconnect().await;
                removed += 1;
            }
            self.inner
                .slots
                .remove_if(&key, |_, current| Arc::ptr_eq(current, &slot));
        }
        removed
    }

    /// Run `cleanup_expired_sessions` every `interval` on a background task
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = registry.cleanup_expired_sessions().await;
                if removed > 0 {
                    debug!("Sweeper removed {} cached sessions", removed);
                }
            }
        })
    }

    /// Number of cached shells (entries still being built are not counted)
    pub fn len(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|e| matches!(e.value().try_lock(), Ok(cached) if cached.is_some()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Human-readable summary of the cache
    pub fn cache_statistics(&self) -> String {
        let mut lines: Vec<String> = self
            .inner
            .slots
            .iter()
            .filter_map(|e| match e.value().try_lock() {
                Ok(cached) => cached.as_ref().map(|shell| {
                    format!(
                        "  {} alive={} busy={} idle={}s",
                        e.key(),
                        shell.is_alive(),
                        shell.is_busy(),
                        shell.idle_for().as_secs()
                    )
                }),
                Err(_) => Some(format!("  {} connecting", e.key())),
            })
            .collect();
        lines.sort();

        let mut stats = format!(
            "Session cache: {} entries (ttl {}s)",
            lines.len(),
            self.inner.ttl.as_secs()
        );
        for line in lines {
            stats.push('\n');
            stats.push_str(&line);
        }
        stats
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("entries", &self.inner.slots.len())
            .field("ttl", &self.inner.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_isolates_purpose() {
        let base = SshConfig::new("build01", "alice").with_port(22);
        let project = SessionKey::from_config(&base.clone().with_purpose("project"));
        let install = SessionKey::from_config(&base.with_purpose("install"));
        assert_ne!(project, install);
    }

    #[test]
    fn test_session_key_display() {
        let config = SshConfig::new("build01", "alice").with_elevate_user("svc");
        let key = SessionKey::from_config(&config);
        assert_eq!(key.to_string(), "alice@build01:22[svc]#default");

        let key = SessionKey::from_config(&SshConfig::new("build01", "alice"));
        assert_eq!(key.elevate_user, "-");
    }
}
