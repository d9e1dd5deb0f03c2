//! Settings round-trip
//!
//! The manager never touches storage. Callers hand it a [`SettingsSnapshot`]
//! to load from, and mutations flow back out through an injected
//! [`SettingsPersist`] implementation before any connection state changes.

use crate::config::ServerDescriptor;
use crate::error::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// User-managed server list as it appears in persisted settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSnapshot {
    /// User-configured server descriptors
    #[serde(default)]
    pub servers: Vec<ServerDescriptor>,
}

impl SettingsSnapshot {
    /// Snapshot wrapping the given descriptors
    pub fn new(servers: Vec<ServerDescriptor>) -> Self {
        Self { servers }
    }
}

/// Persistence callback for the user server list.
///
/// Implementations write the snapshot wherever the host application keeps
/// its settings; a failed persist aborts the mutation that triggered it.
#[async_trait]
pub trait SettingsPersist: Send + Sync {
    /// Durably store the snapshot
    async fn persist(&self, snapshot: &SettingsSnapshot) -> Result<()>;
}

/// Merge built-in and user descriptor lists.
///
/// Later entries win on identifier conflict and take the later position, so
/// a user descriptor fully shadows a built-in one with the same identifier.
pub fn merge_descriptors(
    built_in: &[ServerDescriptor],
    user: &[ServerDescriptor],
) -> Vec<ServerDescriptor> {
    let mut merged: IndexMap<String, ServerDescriptor> = IndexMap::new();

    for descriptor in built_in.iter().chain(user.iter()) {
        merged.shift_remove(&descriptor.identifier);
        merged.insert(descriptor.identifier.clone(), descriptor.clone());
    }

    merged.into_values().collect()
}
