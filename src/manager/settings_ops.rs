//! Settings-driven lifecycle
//!
//! The merged view of built-in and user descriptors drives auto-connection,
//! and every user-list mutation is persisted through the injected callback
//! before any connection state changes.

use super::ToolServerManager;
use crate::config::ServerDescriptor;
use crate::error::{Result, ToolLinkError};
use crate::settings::{SettingsSnapshot, merge_descriptors};
use crate::types::ConnectOutcome;
use tracing::{info, warn};

impl ToolServerManager {
    /// Adopt a settings snapshot and connect every auto-connect descriptor.
    ///
    /// Individual connect failures are logged and skipped so one bad server
    /// cannot block the rest. Returns the number of sessions established.
    pub async fn load_from_settings(&self, snapshot: SettingsSnapshot) -> usize {
        *self.user_servers.write().await = snapshot.servers;

        let descriptors = self.merged_servers().await;
        let mut connected = 0;

        for descriptor in descriptors {
            if !descriptor.auto_connect {
                continue;
            }

            match self.connect(&descriptor).await {
                Ok(_) => connected += 1,
                Err(e) => {
                    warn!(
                        server = %descriptor.identifier,
                        "auto-connect failed: {}",
                        e
                    );
                }
            }
        }

        info!(connected, "settings loaded");
        connected
    }

    /// Merged descriptor list: built-ins first, user entries after, with the
    /// newest entry winning an identifier conflict
    pub async fn merged_servers(&self) -> Vec<ServerDescriptor> {
        let user = self.user_servers.read().await;
        merge_descriptors(&self.built_in, &user)
    }

    /// Add (or replace) a user server: persist the updated list first, then
    /// connect
    pub async fn add_server(&self, descriptor: ServerDescriptor) -> Result<ConnectOutcome> {
        if descriptor.built_in {
            return Err(ToolLinkError::invalid_descriptor(
                &descriptor.identifier,
                "built-in servers are supplied at construction, not through settings",
            ));
        }

        {
            let mut user = self.user_servers.write().await;

            let mut next: Vec<ServerDescriptor> = user
                .iter()
                .filter(|existing| existing.identifier != descriptor.identifier)
                .cloned()
                .collect();
            next.push(descriptor.clone());

            // Persist before committing so a storage failure leaves both the
            // stored and in-memory lists unchanged
            self.persist_user_list(&next).await?;
            *user = next;
        }

        self.connect(&descriptor).await
    }

    /// Remove a user server: persist the updated list first, then disconnect.
    /// Returns whether a live session was torn down.
    pub async fn remove_server(&self, identifier: &str) -> Result<bool> {
        {
            let mut user = self.user_servers.write().await;

            let next: Vec<ServerDescriptor> = user
                .iter()
                .filter(|existing| existing.identifier != identifier)
                .cloned()
                .collect();

            self.persist_user_list(&next).await?;
            *user = next;
        }

        Ok(self.disconnect(identifier).await)
    }

    async fn persist_user_list(&self, servers: &[ServerDescriptor]) -> Result<()> {
        if let Some(persist) = &self.persist {
            let snapshot = SettingsSnapshot::new(servers.to_vec());
            persist.persist(&snapshot).await?;
        }
        Ok(())
    }
}
