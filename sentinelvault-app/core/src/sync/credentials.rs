//! Owner-side credential writes.
//!
//! Writes go straight to the store; the live subscription picks them up and
//! rebuilds the cache, so nothing here touches local state.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Result, SentinelError};
use crate::events::Notifier;
use crate::storage::{Category, Credential, DocPath, DocumentStore};

/// A credential about to be added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDraft {
    pub site: String,
    pub username: String,
    pub secret: String,
    pub category: Category,
}

/// Editable fields of an existing credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPatch {
    pub site: String,
    pub username: String,
    pub secret: String,
}

fn require_filled(fields: &[&str]) -> Result<()> {
    if fields.iter().any(|f| f.trim().is_empty()) {
        return Err(SentinelError::Validation("All fields are required.".into()));
    }
    Ok(())
}

pub struct CredentialEditor {
    store: Arc<dyn DocumentStore>,
    owner_id: String,
    notifier: Notifier,
}

impl CredentialEditor {
    pub fn new(store: Arc<dyn DocumentStore>, owner_id: &str, notifier: Notifier) -> Self {
        Self {
            store,
            owner_id: owner_id.to_string(),
            notifier,
        }
    }

    /// Returns the new credential id.
    pub async fn add(&self, draft: &CredentialDraft) -> Result<String> {
        if let Err(e) = require_filled(&[&draft.site, &draft.username, &draft.secret]) {
            self.notifier.error(e.user_message());
            return Err(e);
        }

        let data = Credential::new_document_data(
            &draft.site,
            &draft.username,
            &draft.secret,
            draft.category,
            Utc::now(),
        )?;

        match self
            .store
            .add_document(&DocPath::credentials(&self.owner_id), data)
            .await
        {
            Ok(id) => {
                debug!("Added credential {} for {}", id, self.owner_id);
                self.notifier.success("Credential added successfully!");
                Ok(id)
            }
            Err(e) => {
                warn!("Failed to add credential: {}", e);
                self.notifier.error("Error: Could not add credential.");
                Err(e)
            }
        }
    }

    pub async fn update(&self, credential_id: &str, patch: &CredentialPatch) -> Result<()> {
        if let Err(e) = require_filled(&[&patch.site, &patch.username, &patch.secret]) {
            self.notifier.error(e.user_message());
            return Err(e);
        }

        let mut fields = Map::new();
        fields.insert("site".into(), Value::String(patch.site.clone()));
        fields.insert("username".into(), Value::String(patch.username.clone()));
        fields.insert("password".into(), Value::String(patch.secret.clone()));

        match self
            .store
            .update_fields(&DocPath::credential(&self.owner_id, credential_id), fields)
            .await
        {
            Ok(()) => {
                self.notifier.success("Credential updated successfully!");
                Ok(())
            }
            Err(e) => {
                warn!("Failed to update credential {}: {}", credential_id, e);
                self.notifier
                    .error("Failed to update credential. Please try again.");
                Err(e)
            }
        }
    }

    pub async fn delete(&self, credential: &Credential) -> Result<()> {
        match self
            .store
            .delete_document(&DocPath::credential(&self.owner_id, &credential.id))
            .await
        {
            Ok(()) => {
                self.notifier.success(format!(
                    "Credential for {} deleted successfully.",
                    credential.site
                ));
                Ok(())
            }
            Err(e) => {
                warn!("Failed to delete credential {}: {}", credential.id, e);
                self.notifier
                    .error("Failed to delete credential. Please check your connection.");
                Err(e)
            }
        }
    }
}
