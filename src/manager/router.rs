//! Tool routing
//!
//! Resolution walks the registry in registration order: the first connection
//! whose tool list contains the requested name wins. A server hint narrows
//! the candidates by substring match on the identifier; callers that need a
//! deterministic target under name collisions pass one.

use super::ToolServerManager;
use crate::error::{Result, ToolLinkError};
use crate::normalize::{ResponseEnvelope, normalize};
use crate::types::{ConnectionStatus, ToolDescriptor};
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

impl ToolServerManager {
    /// Route a tool invocation to the owning connection and normalize the
    /// result.
    ///
    /// The chosen connection is health-gated first: an unhealthy owner is
    /// reported as such rather than silently falling through to another
    /// server that happens to expose the same name.
    pub async fn execute_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        call_timeout: Option<Duration>,
        server_hint: Option<&str>,
    ) -> Result<ResponseEnvelope> {
        let records = self.records().await;

        let candidate = records
            .iter()
            .filter(|record| match server_hint {
                Some(hint) => record.identifier.contains(hint),
                None => true,
            })
            .find(|record| record.tools.read().iter().any(|tool| tool.name == name));

        let record = match candidate {
            Some(record) => record,
            None => {
                let known = records
                    .iter()
                    .flat_map(|record| {
                        let identifier = record.identifier.clone();
                        record
                            .tools
                            .read()
                            .iter()
                            .map(|tool| format!("{}:{}", identifier, tool.name))
                            .collect::<Vec<_>>()
                    })
                    .collect();

                return Err(ToolLinkError::ToolNotFound {
                    name: name.to_string(),
                    known,
                });
            }
        };

        if !self.probe_record(record).await {
            return Err(ToolLinkError::ConnectionUnhealthy {
                identifier: record.identifier.clone(),
            });
        }

        let budget = call_timeout.unwrap_or(self.config.call_timeout);
        debug!(
            server = %record.identifier,
            tool = %name,
            timeout_ms = budget.as_millis() as u64,
            "invoking tool"
        );

        let result = match timeout(budget, record.client.call_tool(name, arguments)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                self.note_failure(record, name);
                return Err(e);
            }
            Err(_) => {
                self.note_failure(record, name);
                return Err(ToolLinkError::ExecutionTimeout {
                    identifier: record.identifier.clone(),
                    tool: name.to_string(),
                    timeout: budget,
                });
            }
        };

        Ok(normalize(Some(result)).with_source(record.identifier.clone()))
    }

    /// Every discovered tool across all connections, in registration order
    pub async fn all_tools(&self) -> Vec<ToolDescriptor> {
        self.records()
            .await
            .iter()
            .flat_map(|record| record.tools.read().clone())
            .collect()
    }

    /// Read-only status projection of every connection. Never probes, never
    /// mutates; health reflects only the cached window.
    pub async fn connection_status(&self) -> Vec<ConnectionStatus> {
        self.records()
            .await
            .iter()
            .map(|record| {
                // Hold the health lock in its own statement: a guard born
                // inside the struct literal would still be alive when
                // `cached_health` relocks the same mutex
                let last_health_check = record.health.lock().checked_at;
                ConnectionStatus {
                    identifier: record.identifier.clone(),
                    tool_count: record.tools.read().len(),
                    connected_at: record.connected_at,
                    last_health_check,
                    consecutive_failures: record.consecutive_failures.load(Ordering::SeqCst),
                    is_healthy: self.cached_health(record),
                }
            })
            .collect()
    }

    /// Count an invocation failure. At the threshold and beyond every
    /// failure warns until a successful probe resets the streak; the
    /// connection is never auto-disconnected.
    fn note_failure(&self, record: &super::ConnectionRecord, tool: &str) {
        let failures = record.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.config.failure_warn_threshold {
            warn!(
                server = %record.identifier,
                tool = %tool,
                failures,
                "consecutive invocation failures reached threshold"
            );
        }
    }
}
