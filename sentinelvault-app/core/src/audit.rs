//! Append-only audit trail of sensitive actions.
//!
//! Writes are best-effort: a failed append is logged and swallowed so it can
//! never block or fail the action it describes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::{DocPath, DocumentStore, OrderBy, Query};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Security,
    Danger,
}

/// Stored shape of an `audit_logs` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "userEmail")]
    pub actor_email: String,
    pub action: String,
    #[serde(rename = "level")]
    pub severity: Severity,
}

#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn DocumentStore>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Record `action` by `actor_email` now.
    pub async fn append(&self, actor_email: &str, action: impl Into<String>, severity: Severity) {
        self.record(AuditLogEntry {
            timestamp: Utc::now(),
            actor_email: actor_email.to_string(),
            action: action.into(),
            severity,
        })
        .await;
    }

    pub async fn record(&self, entry: AuditLogEntry) {
        let data = match serde_json::to_value(&entry) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to encode audit entry: {}", e);
                return;
            }
        };

        match self.store.add_document(&DocPath::audit_logs(), data).await {
            Ok(id) => debug!("Audit {:?} recorded as {}", entry.severity, id),
            Err(e) => warn!("Failed to write audit entry {:?}: {}", entry.action, e),
        }
    }

    /// The `limit` most recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditLogEntry>> {
        let docs = self
            .store
            .query_collection(
                &DocPath::audit_logs(),
                Query::ordered(OrderBy::desc("timestamp")).limit(limit),
            )
            .await?;

        Ok(docs
            .into_iter()
            .filter_map(|doc| match serde_json::from_value(doc.data) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping malformed audit entry {}: {}", doc.id, e);
                    None
                }
            })
            .collect())
    }
}
