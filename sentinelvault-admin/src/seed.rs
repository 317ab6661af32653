//! JSON snapshot of a document store.
//!
//! The CLI works against an exported snapshot: it is loaded into an
//! in-memory store, the command runs, and mutating commands write the store
//! back out.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sentinelvault_core::storage::{DocPath, DocumentStore, Query};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seed {
    /// Principal profiles keyed by uid.
    #[serde(default)]
    pub users: BTreeMap<String, Value>,
    /// Credentials keyed by owner uid, then credential id.
    #[serde(default)]
    pub credentials: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default)]
    pub audit_logs: BTreeMap<String, Value>,
}

impl Seed {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot from {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse snapshot {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write snapshot to {:?}", path))
    }

    /// Write every document into `store`.
    pub async fn populate(&self, store: &dyn DocumentStore) -> Result<()> {
        for (uid, data) in &self.users {
            store.set_document(&DocPath::user(uid), data.clone()).await?;
        }
        for (uid, credentials) in &self.credentials {
            for (id, data) in credentials {
                store
                    .set_document(&DocPath::credential(uid, id), data.clone())
                    .await?;
            }
        }
        for (id, data) in &self.audit_logs {
            store
                .set_document(&DocPath::audit_logs().child(id), data.clone())
                .await?;
        }
        Ok(())
    }

    /// Read the users, their credentials and the audit log back out of `store`.
    pub async fn capture(store: &dyn DocumentStore) -> Result<Self> {
        let mut seed = Seed::default();
        for user in store.query_collection(&DocPath::users(), Query::default()).await? {
            let credentials = store
                .query_collection(&DocPath::credentials(&user.id), Query::default())
                .await?;
            if !credentials.is_empty() {
                seed.credentials.insert(
                    user.id.clone(),
                    credentials.into_iter().map(|d| (d.id, d.data)).collect(),
                );
            }
            seed.users.insert(user.id, user.data);
        }
        seed.audit_logs = store
            .query_collection(&DocPath::audit_logs(), Query::default())
            .await?
            .into_iter()
            .map(|d| (d.id, d.data))
            .collect();
        Ok(seed)
    }
}
