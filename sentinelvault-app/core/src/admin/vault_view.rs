//! The admin's raw-credential view, behind the admin's own PIN.
//!
//! Viewing every principal's secrets is itself a sensitive action: each
//! fetch, successful or not, leaves a `danger` audit record. The view has its
//! own gate and locks independently of the admin session.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;

use super::engine::load_fleet;
use crate::audit::{AuditLogger, Severity};
use crate::error::{Result, SentinelError};
use crate::events::Notifier;
use crate::storage::{Credential, DocumentStore, Principal};
use crate::vault::{LockState, PinGate};

/// A credential together with who owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedCredential {
    pub owner_email: String,
    pub owner_name: String,
    pub credential: Credential,
}

impl OwnedCredential {
    fn matches(&self, needle: &str) -> bool {
        [
            self.owner_email.as_str(),
            self.owner_name.as_str(),
            self.credential.site.as_str(),
            self.credential.username.as_str(),
            self.credential.category.as_str(),
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
    }
}

pub struct AdminVaultView {
    gate: PinGate,
    store: Arc<dyn DocumentStore>,
    audit: AuditLogger,
    actor_email: String,
    notifier: Notifier,
    rows: RwLock<Vec<OwnedCredential>>,
    search: RwLock<String>,
}

impl AdminVaultView {
    /// Fails with `Permission` unless `actor` is an admin.
    pub fn new(store: Arc<dyn DocumentStore>, actor: &Principal, notifier: Notifier) -> Result<Self> {
        if !actor.role.is_admin() {
            return Err(SentinelError::Permission("Admin role required.".into()));
        }
        Ok(Self {
            gate: PinGate::new(store.clone(), &actor.id),
            audit: AuditLogger::new(store.clone()),
            store,
            actor_email: actor.email.clone(),
            notifier,
            rows: RwLock::new(Vec::new()),
            search: RwLock::new(String::new()),
        })
    }

    pub fn state(&self) -> LockState {
        self.gate.state()
    }

    /// Verify the admin PIN, then fetch every credential.
    ///
    /// Already unlocked is a no-op returning the rows held; `refresh` is the
    /// way to re-fetch. If the fetch fails the view relocks.
    pub async fn unlock(&self, pin: &str) -> Result<usize> {
        match self.gate.unlock(pin).await {
            Ok(true) => {}
            Ok(false) => return Ok(self.rows.read().await.len()),
            Err(e) => {
                let e = match e {
                    SentinelError::Auth(_) => SentinelError::Auth("Incorrect Admin PIN.".into()),
                    other => other,
                };
                self.notifier.error(e.user_message());
                return Err(e);
            }
        }

        match self.fetch().await {
            Ok(count) => Ok(count),
            Err(e) => {
                self.gate.lock().await;
                Err(e)
            }
        }
    }

    /// Re-fetch while unlocked.
    pub async fn refresh(&self) -> Result<usize> {
        if !self.gate.is_unlocked() {
            return Err(SentinelError::Auth(
                "Admin vault is locked. Unlock it with your PIN first.".into(),
            ));
        }
        self.fetch().await
    }

    async fn fetch(&self) -> Result<usize> {
        let fleet = load_fleet(self.store.as_ref()).await.and_then(|fleet| {
            let mut rows = Vec::new();
            for member in fleet {
                let credentials = member.credentials?;
                rows.extend(credentials.into_iter().map(|credential| OwnedCredential {
                    owner_email: member.principal.email.clone(),
                    owner_name: member.principal.display_name.clone(),
                    credential,
                }));
            }
            Ok(rows)
        });

        match fleet {
            Ok(rows) => {
                let count = rows.len();
                *self.rows.write().await = rows;
                self.audit
                    .append(
                        &self.actor_email,
                        format!("UNLOCKED/REFRESHED and viewed {} total user credentials.", count),
                        Severity::Danger,
                    )
                    .await;
                self.notifier.success("All user passwords successfully fetched.");
                Ok(count)
            }
            Err(e) => {
                warn!("Admin credential fetch failed: {}", e);
                self.rows.write().await.clear();
                self.audit
                    .append(
                        &self.actor_email,
                        "FAILED to view all user credentials (Database Error).",
                        Severity::Danger,
                    )
                    .await;
                self.notifier
                    .error("Failed to fetch all passwords. Check store rules and connection.");
                Err(e)
            }
        }
    }

    /// Lock the view and drop everything it fetched.
    pub async fn lock(&self) -> bool {
        self.rows.write().await.clear();
        self.search.write().await.clear();
        self.gate.lock().await
    }

    pub async fn set_search(&self, term: &str) {
        *self.search.write().await = term.to_string();
    }

    /// Rows matching the search on owner email, owner name, site, username
    /// or category. Empty while locked.
    pub async fn visible(&self) -> Vec<OwnedCredential> {
        if !self.gate.is_unlocked() {
            return Vec::new();
        }
        let needle = self.search.read().await.to_lowercase();
        self.rows
            .read()
            .await
            .iter()
            .filter(|row| needle.is_empty() || row.matches(&needle))
            .cloned()
            .collect()
    }
}
