//! Multi-server connection manager
//!
//! [`ToolServerManager`] owns the session registry: an insertion-ordered map
//! from server identifier to live connection record. It drives the connect
//! flow (validation, transport open, handshake, discovery, retry with
//! backoff), the health policy, tool routing, and the settings round-trip.

mod health;
mod router;
mod settings_ops;

use crate::client::ServerClient;
use crate::config::{ManagerConfig, ServerDescriptor};
use crate::error::{Result, ToolLinkError};
use crate::settings::SettingsPersist;
use crate::transport::{DefaultTransportFactory, TransportFactory};
use crate::types::{ConnectOutcome, ConnectStatus, ToolDescriptor};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Health bookkeeping for one connection
pub(crate) struct HealthStamp {
    /// Monotonic instant of the last successful check, for staleness math
    pub(crate) checked: Instant,
    /// Wall-clock time of the last successful check, for status reporting
    pub(crate) checked_at: DateTime<Utc>,
}

/// One live session and its discovered capabilities
pub(crate) struct ConnectionRecord {
    pub(crate) identifier: String,
    pub(crate) client: ServerClient,
    pub(crate) tools: parking_lot::RwLock<Vec<ToolDescriptor>>,
    pub(crate) connected_at: DateTime<Utc>,
    pub(crate) health: parking_lot::Mutex<HealthStamp>,
    pub(crate) consecutive_failures: AtomicU32,
}

impl ConnectionRecord {
    fn new(identifier: String, client: ServerClient, tools: Vec<ToolDescriptor>) -> Self {
        let now = Utc::now();
        Self {
            identifier,
            client,
            tools: parking_lot::RwLock::new(tools),
            connected_at: now,
            health: parking_lot::Mutex::new(HealthStamp {
                checked: Instant::now(),
                checked_at: now,
            }),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Record a successful probe: fresh stamp, failure streak cleared
    pub(crate) fn mark_healthy(&self) {
        let mut health = self.health.lock();
        health.checked = Instant::now();
        health.checked_at = Utc::now();
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }
}

/// Manager for a dynamically-configured set of upstream tool servers
pub struct ToolServerManager {
    config: ManagerConfig,
    factory: Arc<dyn TransportFactory>,
    registry: RwLock<IndexMap<String, Arc<ConnectionRecord>>>,
    /// Serializes connect/disconnect per identifier; distinct identifiers
    /// proceed fully independently
    connect_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    built_in: Vec<ServerDescriptor>,
    user_servers: RwLock<Vec<ServerDescriptor>>,
    persist: Option<Arc<dyn SettingsPersist>>,
}

impl ToolServerManager {
    /// Manager with default configuration and real transports
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    /// Manager with the given configuration and real transports
    pub fn with_config(config: ManagerConfig) -> Self {
        Self {
            config,
            factory: Arc::new(DefaultTransportFactory),
            registry: RwLock::new(IndexMap::new()),
            connect_locks: Mutex::new(HashMap::new()),
            built_in: Vec::new(),
            user_servers: RwLock::new(Vec::new()),
            persist: None,
        }
    }

    /// Substitute the transport factory
    pub fn with_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Descriptors supplied by the host process rather than user settings
    pub fn with_built_in_servers(mut self, servers: Vec<ServerDescriptor>) -> Self {
        self.built_in = servers;
        self
    }

    /// Install the settings persistence callback
    pub fn with_persistence(mut self, persist: Arc<dyn SettingsPersist>) -> Self {
        self.persist = Some(persist);
        self
    }

    /// Manager configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Establish (or reuse) a session for the given descriptor.
    ///
    /// Idempotent on a healthy live identifier: returns `AlreadyConnected`
    /// without opening a second transport. A stale record is torn down and
    /// replaced. Transient failures are retried with exponential backoff; the
    /// registry is only mutated on a complete successful handshake.
    pub async fn connect(&self, descriptor: &ServerDescriptor) -> Result<ConnectOutcome> {
        let identifier = descriptor.identifier.clone();
        let lock = self.connect_lock(&identifier).await;
        let _guard = lock.lock().await;

        // Lookup in its own statement so the read guard is released before
        // the teardown path takes the write lock
        let existing = self.registry.read().await.get(&identifier).cloned();
        if let Some(existing) = existing {
            if self.probe_record(&existing).await {
                debug!(server = %identifier, "reusing healthy session");
                return Ok(ConnectOutcome {
                    status: ConnectStatus::AlreadyConnected,
                    tools: existing.tools.read().clone(),
                    server_info: existing.client.server_info(),
                });
            }

            info!(server = %identifier, "replacing stale session");
            existing.client.close().await;
            self.registry.write().await.shift_remove(&identifier);
        }

        // Validation never opens a transport and never consumes a retry
        let kind = descriptor.resolve_transport()?;

        let mut last_error = ToolLinkError::NotConnected;
        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                let delay = self.config.backoff_delay(attempt - 1);
                debug!(
                    server = %identifier,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying connect after backoff"
                );
                tokio::time::sleep(delay).await;
            }

            match self.establish(&identifier, &kind).await {
                Ok(record) => {
                    let tools = record.tools.read().clone();
                    let server_info = record.client.server_info();

                    self.registry
                        .write()
                        .await
                        .insert(identifier.clone(), Arc::new(record));

                    info!(
                        server = %identifier,
                        tools = tools.len(),
                        "session established"
                    );

                    return Ok(ConnectOutcome {
                        status: ConnectStatus::Connected,
                        tools,
                        server_info,
                    });
                }
                Err(e) => {
                    warn!(
                        server = %identifier,
                        attempt = attempt + 1,
                        "connect attempt failed: {}",
                        e
                    );
                    last_error = e;
                }
            }
        }

        Err(ToolLinkError::ConnectionFailed {
            identifier,
            attempts: self.config.max_retries,
            source: Box::new(last_error),
        })
    }

    /// One full attempt: open, handshake, discover
    async fn establish(
        &self,
        identifier: &str,
        kind: &crate::config::TransportKind,
    ) -> Result<ConnectionRecord> {
        let handshake = async {
            let transport = self.factory.open(kind).await?;
            let client = ServerClient::new(identifier, transport);
            if let Err(e) = client.initialize().await {
                client.close().await;
                return Err(e);
            }
            Ok(client)
        };

        let client = match timeout(self.config.handshake_timeout, handshake).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ToolLinkError::ConnectionTimeout {
                    identifier: identifier.to_string(),
                    timeout: self.config.handshake_timeout,
                });
            }
        };

        let remote_tools = match timeout(self.config.discovery_timeout, client.list_tools()).await {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => {
                client.close().await;
                return Err(e);
            }
            Err(_) => {
                client.close().await;
                return Err(ToolLinkError::DiscoveryTimeout {
                    identifier: identifier.to_string(),
                    timeout: self.config.discovery_timeout,
                });
            }
        };

        let discovered_at = Utc::now();
        let tools = remote_tools
            .into_iter()
            .map(|tool| ToolDescriptor::from_remote(tool, identifier, discovered_at))
            .collect();

        Ok(ConnectionRecord::new(
            identifier.to_string(),
            client,
            tools,
        ))
    }

    /// Tear down a session. Close failures are logged and swallowed; the
    /// record is removed regardless. Returns whether an entry existed.
    pub async fn disconnect(&self, identifier: &str) -> bool {
        let lock = self.connect_lock(identifier).await;
        let _guard = lock.lock().await;

        let removed = self.registry.write().await.shift_remove(identifier);
        let existed = match removed {
            Some(record) => {
                record.client.close().await;
                info!(server = %identifier, "session closed");
                true
            }
            None => false,
        };

        // Prune the lock entry unless another task holds or awaits it
        // (map + our clone account for a strong count of two)
        {
            let mut locks = self.connect_locks.lock().await;
            if locks
                .get(identifier)
                .is_some_and(|entry| Arc::strong_count(entry) == 2)
            {
                locks.remove(identifier);
            }
        }

        existed
    }

    /// Tear down every session, each independently
    pub async fn disconnect_all(&self) {
        let identifiers: Vec<String> = self.registry.read().await.keys().cloned().collect();

        let closes = identifiers
            .iter()
            .map(|identifier| self.disconnect(identifier));
        futures::future::join_all(closes).await;
    }

    /// Re-run discovery on a live session and replace its tool list
    pub async fn refresh_tools(&self, identifier: &str) -> Result<Vec<ToolDescriptor>> {
        let record = self
            .registry
            .read()
            .await
            .get(identifier)
            .cloned()
            .ok_or(ToolLinkError::NotConnected)?;

        let remote_tools =
            match timeout(self.config.discovery_timeout, record.client.list_tools()).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ToolLinkError::DiscoveryTimeout {
                        identifier: identifier.to_string(),
                        timeout: self.config.discovery_timeout,
                    });
                }
            };

        let discovered_at = Utc::now();
        let tools: Vec<ToolDescriptor> = remote_tools
            .into_iter()
            .map(|tool| ToolDescriptor::from_remote(tool, identifier, discovered_at))
            .collect();

        *record.tools.write() = tools.clone();
        record.mark_healthy();

        debug!(server = %identifier, tools = tools.len(), "tool list refreshed");
        Ok(tools)
    }

    /// Ordered snapshot of the live records
    pub(crate) async fn records(&self) -> Vec<Arc<ConnectionRecord>> {
        self.registry.read().await.values().cloned().collect()
    }

    async fn connect_lock(&self, identifier: &str) -> Arc<Mutex<()>> {
        let mut locks = self.connect_locks.lock().await;
        locks
            .entry(identifier.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for ToolServerManager {
    fn default() -> Self {
        Self::new()
    }
}
