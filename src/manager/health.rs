//! Health policy
//!
//! A connection checked successfully within the staleness window counts as
//! healthy with no I/O. Past the window, a discovery call bounded by the
//! probe timeout decides. Probe failures are reported as `false`, never as
//! errors, and leave the last-check stamp untouched so the next caller
//! probes again.

use super::{ConnectionRecord, ToolServerManager};
use tokio::time::timeout;
use tracing::debug;

impl ToolServerManager {
    /// Whether the identified connection is currently usable.
    ///
    /// Unknown identifiers are simply unhealthy.
    pub async fn is_healthy(&self, identifier: &str) -> bool {
        let record = self.registry.read().await.get(identifier).cloned();
        let record = match record {
            Some(record) => record,
            None => return false,
        };

        self.probe_record(&record).await
    }

    /// Cached-window check, then a bounded live probe
    pub(crate) async fn probe_record(&self, record: &ConnectionRecord) -> bool {
        let within_window = {
            let health = record.health.lock();
            health.checked.elapsed() < self.config.health_check_interval
        };
        if within_window {
            return true;
        }

        match timeout(self.config.probe_timeout, record.client.list_tools()).await {
            Ok(Ok(_)) => {
                record.mark_healthy();
                true
            }
            Ok(Err(e)) => {
                debug!(server = %record.identifier, "health probe failed: {}", e);
                false
            }
            Err(_) => {
                debug!(server = %record.identifier, "health probe timed out");
                false
            }
        }
    }

    /// Whether the cached window alone covers the record, with no I/O.
    /// Status reporting uses this so it can never block on a probe.
    pub(crate) fn cached_health(&self, record: &ConnectionRecord) -> bool {
        let health = record.health.lock();
        health.checked.elapsed() < self.config.health_check_interval
    }
}
