//! Cross-principal aggregation and user management.
//!
//! Every operation requires an admin actor. Scans walk every principal and
//! their credentials; mutations are single remote writes (purge is one
//! atomic batch) followed by an audit record.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::breach::BreachCatalog;
use crate::audit::{AuditLogEntry, AuditLogger, Severity};
use crate::error::{Result, SentinelError};
use crate::events::{NotificationKind, Notifier};
use crate::security::{score, StrengthTier};
use crate::storage::{
    Credential, DocPath, DocumentStore, EngineSettings, IdentityProvider, Principal, Query, Role,
};

/// Strength histogram over a set of secrets. Empty secrets are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub weak: usize,
    pub medium: usize,
    pub strong: usize,
    pub total: usize,
}

impl HealthSnapshot {
    pub fn tally<'a>(secrets: impl IntoIterator<Item = &'a str>) -> Self {
        let mut snapshot = Self::default();
        for secret in secrets {
            snapshot.record(secret);
        }
        snapshot
    }

    pub fn record(&mut self, secret: &str) {
        match score(secret).tier {
            StrengthTier::None => return,
            StrengthTier::Weak => self.weak += 1,
            StrengthTier::Medium => self.medium += 1,
            StrengthTier::Strong => self.strong += 1,
        }
        self.total += 1;
    }

    /// Share of `count` in the total, in percent.
    pub fn percent(&self, count: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 * 100.0 / self.total as f64
        }
    }
}

/// One line of the admin user table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalRow {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub banned: bool,
    /// `None` when this principal's credentials could not be read.
    pub credential_count: Option<usize>,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub snapshot: HealthSnapshot,
    pub principals: Vec<PrincipalRow>,
    /// Principals whose credential fetch failed and were left out.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExposureType {
    EmailBreach,
    PasswordExposure,
}

impl std::fmt::Display for ExposureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmailBreach => write!(f, "Email Breach"),
            Self::PasswordExposure => write!(f, "Password Exposure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposedPrincipal {
    pub principal_id: String,
    pub email: String,
    pub display_name: String,
    pub exposure: ExposureType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureReport {
    pub exposed_count: usize,
    pub exposed: Vec<ExposedPrincipal>,
}

/// A principal with its credentials, or the error reading them.
pub(crate) struct FleetMember {
    pub principal: Principal,
    pub credentials: Result<Vec<Credential>>,
}

/// Read every principal and their credentials.
///
/// Fails only if the principal list itself cannot be read.
pub(crate) async fn load_fleet(store: &dyn DocumentStore) -> Result<Vec<FleetMember>> {
    let docs = store.query_collection(&DocPath::users(), Query::default()).await?;

    let mut fleet = Vec::with_capacity(docs.len());
    for doc in &docs {
        let principal = match Principal::from_document(doc) {
            Ok(p) => p,
            Err(e) => {
                warn!("Skipping malformed principal {}: {}", doc.id, e);
                continue;
            }
        };

        let credentials = store
            .query_collection(&DocPath::credentials(&principal.id), Query::default())
            .await
            .map(|docs| {
                docs.iter()
                    .filter_map(|d| Credential::from_document(&principal.id, d).ok())
                    .collect()
            });

        fleet.push(FleetMember {
            principal,
            credentials,
        });
    }
    Ok(fleet)
}

pub struct AdminAggregationEngine {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    audit: AuditLogger,
    actor: Principal,
    notifier: Notifier,
    audit_log_limit: usize,
    /// Display time for alerts that need the admin's attention.
    alert_duration_ms: u64,
    rows: RwLock<Vec<PrincipalRow>>,
    health: RwLock<HealthSnapshot>,
}

impl AdminAggregationEngine {
    /// Fails with `Permission` unless `actor` is an admin.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        actor: &Principal,
        notifier: Notifier,
        settings: &EngineSettings,
    ) -> Result<Self> {
        if !actor.role.is_admin() {
            warn!("Non-admin {} attempted to open the admin engine", actor.id);
            return Err(SentinelError::Permission("Admin role required.".into()));
        }

        Ok(Self {
            audit: AuditLogger::new(store.clone()),
            store,
            identity,
            actor: actor.clone(),
            notifier,
            audit_log_limit: settings.audit_log_limit,
            alert_duration_ms: settings.long_notification_duration_ms,
            rows: RwLock::new(Vec::new()),
            health: RwLock::new(HealthSnapshot::default()),
        })
    }

    pub fn actor(&self) -> &Principal {
        &self.actor
    }

    /// Rows from the last scan, with any confirmed toggles applied.
    pub async fn principals(&self) -> Vec<PrincipalRow> {
        self.rows.read().await.clone()
    }

    pub async fn health(&self) -> HealthSnapshot {
        *self.health.read().await
    }

    /// Score every credential of every principal.
    ///
    /// A principal whose credentials cannot be read is reported in
    /// `skipped` and contributes nothing to the histogram.
    pub async fn scan_health(&self) -> Result<HealthReport> {
        let fleet = match load_fleet(self.store.as_ref()).await {
            Ok(fleet) => fleet,
            Err(e) => {
                warn!("Health scan failed: {}", e);
                self.notifier
                    .error("Failed to load user data. Check store rules and connection.");
                return Err(e);
            }
        };

        let mut report = HealthReport::default();
        for member in fleet {
            let credential_count = match &member.credentials {
                Ok(credentials) => {
                    for c in credentials {
                        report.snapshot.record(&c.secret);
                    }
                    Some(credentials.len())
                }
                Err(e) => {
                    warn!("Skipping credentials of {}: {}", member.principal.id, e);
                    report.skipped.push(member.principal.id.clone());
                    None
                }
            };

            let p = member.principal;
            report.principals.push(PrincipalRow {
                last_activity: p.last_activity(),
                id: p.id,
                email: p.email,
                display_name: p.display_name,
                role: p.role,
                banned: p.banned,
                credential_count,
            });
        }

        info!(
            principals = report.principals.len(),
            credentials = report.snapshot.total,
            skipped = report.skipped.len(),
            "Health scan complete"
        );

        *self.rows.write().await = report.principals.clone();
        *self.health.write().await = report.snapshot;
        Ok(report)
    }

    /// Match principals against `catalog`.
    ///
    /// An email hit is recorded first; a leaked secret only adds an entry for
    /// an owner not already listed, so each principal appears at most once.
    pub async fn scan_exposure(&self, catalog: &BreachCatalog) -> Result<ExposureReport> {
        self.audit
            .append(
                &self.actor.email,
                "Initiated Global Dark Web Leak Exposure Scan.",
                Severity::Security,
            )
            .await;

        let fleet = match load_fleet(self.store.as_ref()).await {
            Ok(fleet) => fleet,
            Err(e) => {
                warn!("Exposure scan failed: {}", e);
                self.notifier.error("Exposure scan failed. Check store connection.");
                return Err(e);
            }
        };

        let mut seen = HashSet::new();
        let mut exposed = Vec::new();

        for member in &fleet {
            let p = &member.principal;
            if catalog.email_breached(&p.email) && seen.insert(p.id.clone()) {
                exposed.push(ExposedPrincipal {
                    principal_id: p.id.clone(),
                    email: p.email.clone(),
                    display_name: p.display_name.clone(),
                    exposure: ExposureType::EmailBreach,
                });
            }
        }

        for member in &fleet {
            let p = &member.principal;
            let Ok(credentials) = &member.credentials else {
                continue;
            };
            if credentials.iter().any(|c| catalog.secret_exposed(&c.secret))
                && seen.insert(p.id.clone())
            {
                exposed.push(ExposedPrincipal {
                    principal_id: p.id.clone(),
                    email: p.email.clone(),
                    display_name: p.display_name.clone(),
                    exposure: ExposureType::PasswordExposure,
                });
            }
        }

        let report = ExposureReport {
            exposed_count: exposed.len(),
            exposed,
        };

        let severity = if report.exposed_count > 0 {
            self.notifier.emit(
                NotificationKind::Error,
                format!(
                    "SECURITY ALERT: {} accounts found exposed in mock breach data! Immediate action is recommended.",
                    report.exposed_count
                ),
                self.alert_duration_ms,
            );
            Severity::Danger
        } else {
            self.notifier
                .success("Global Dark Web Scan complete. No exposed accounts found.");
            Severity::Info
        };
        self.audit
            .append(
                &self.actor.email,
                format!("Scan detected {} exposed users.", report.exposed_count),
                severity,
            )
            .await;

        info!(exposed = report.exposed_count, "Exposure scan complete");
        Ok(report)
    }

    async fn load_principal(&self, principal_id: &str) -> Result<Principal> {
        let doc = self
            .store
            .get_document(&DocPath::user(principal_id))
            .await?
            .ok_or_else(|| SentinelError::NotFound(format!("principal {}", principal_id)))?;
        Principal::from_document(&doc)
    }

    async fn update_flag(&self, principal_id: &str, field: &str, value: bool) -> Result<()> {
        let mut fields = Map::new();
        fields.insert(field.to_string(), Value::Bool(value));
        self.store
            .update_fields(&DocPath::user(principal_id), fields)
            .await
    }

    async fn patch_row(&self, principal_id: &str, patch: impl FnOnce(&mut PrincipalRow)) {
        if let Some(row) = self
            .rows
            .write()
            .await
            .iter_mut()
            .find(|r| r.id == principal_id)
        {
            patch(row);
        }
    }

    /// Ban or reactivate a principal.
    pub async fn set_ban_status(&self, principal_id: &str, banned: bool) -> Result<()> {
        let target = match self.load_principal(principal_id).await {
            Ok(p) => p,
            Err(e) => {
                self.notifier.error(e.user_message());
                return Err(e);
            }
        };

        if let Err(e) = self.update_flag(principal_id, "isBanned", banned).await {
            warn!("Ban toggle for {} failed: {}", principal_id, e);
            self.notifier
                .error(format!("Failed to update status for user {}.", target.email));
            return Err(e);
        }

        self.patch_row(principal_id, |row| row.banned = banned).await;
        self.notifier.success(format!(
            "User {} successfully {}.",
            target.email,
            if banned { "DISABLED" } else { "ACTIVATED" }
        ));

        let (verb, severity) = if banned {
            ("Banned", Severity::Danger)
        } else {
            ("Activated", Severity::Security)
        };
        self.audit
            .append(
                &self.actor.email,
                format!("{} user: {}", verb, target.email),
                severity,
            )
            .await;
        Ok(())
    }

    /// Grant or revoke the admin role.
    pub async fn set_admin_status(&self, principal_id: &str, is_admin: bool) -> Result<()> {
        let target = match self.load_principal(principal_id).await {
            Ok(p) => p,
            Err(e) => {
                self.notifier.error(e.user_message());
                return Err(e);
            }
        };

        if let Err(e) = self.update_flag(principal_id, "isAdmin", is_admin).await {
            warn!("Admin toggle for {} failed: {}", principal_id, e);
            self.notifier.error(format!(
                "Failed to update admin status for user {}.",
                target.display_name
            ));
            return Err(e);
        }

        let role = Role::from_admin_flag(is_admin);
        self.patch_row(principal_id, |row| row.role = role).await;
        self.notifier.success(format!(
            "User {} successfully set as {}.",
            target.display_name,
            if is_admin { "ADMIN" } else { "STANDARD USER" }
        ));

        let verb = if is_admin { "Granted Admin" } else { "Revoked Admin" };
        self.audit
            .append(
                &self.actor.email,
                format!("{} status for user: {}", verb, target.email),
                Severity::Security,
            )
            .await;
        Ok(())
    }

    /// Send the principal a password reset email.
    pub async fn force_password_reset(&self, principal_id: &str) -> Result<()> {
        let target = match self.load_principal(principal_id).await {
            Ok(p) => p,
            Err(e) => {
                self.notifier.error(e.user_message());
                return Err(e);
            }
        };

        if let Err(e) = self.identity.send_password_reset(&target.email).await {
            warn!("Password reset for {} failed: {}", principal_id, e);
            self.notifier.error(format!(
                "Failed to send password reset email for {}. Error: {}",
                target.email, e
            ));
            return Err(e);
        }

        self.notifier.success(format!(
            "Password reset email sent to {}. The user will be required to change their password.",
            target.email
        ));
        self.audit
            .append(
                &self.actor.email,
                format!("Sent password reset email to: {}", target.email),
                Severity::Info,
            )
            .await;
        Ok(())
    }

    /// Delete every credential of a principal in one atomic batch, then
    /// rescan. On failure nothing is deleted and local rows are untouched.
    /// Returns the number of credentials removed.
    pub async fn purge_all_credentials(&self, principal_id: &str) -> Result<usize> {
        let target = match self.load_principal(principal_id).await {
            Ok(p) => p,
            Err(e) => {
                self.notifier.error(e.user_message());
                return Err(e);
            }
        };
        let collection = DocPath::credentials(principal_id);

        let outcome = async {
            let docs = self
                .store
                .query_collection(&collection, Query::default())
                .await?;
            let paths: Vec<DocPath> = docs.iter().map(|d| collection.child(&d.id)).collect();
            let count = paths.len();
            self.store.atomic_batch(paths).await?;
            Ok::<_, SentinelError>(count)
        }
        .await;

        let purged = match outcome {
            Ok(count) => count,
            Err(e) => {
                warn!("Purge of {} failed: {}", principal_id, e);
                self.notifier.error(format!(
                    "Failed to purge credentials for {}.",
                    target.display_name
                ));
                return Err(e);
            }
        };
        debug!("Purged {} credentials of {}", purged, principal_id);

        if let Err(e) = self.scan_health().await {
            warn!("Rescan after purge failed: {}", e);
        }

        self.notifier.success(format!(
            "All {} credentials purged for user {}.",
            purged, target.display_name
        ));
        self.audit
            .append(
                &self.actor.email,
                format!("PURGED ALL credentials for user: {}", target.display_name),
                Severity::Danger,
            )
            .await;
        Ok(purged)
    }

    /// Most recent audit records, newest first.
    pub async fn audit_logs(&self) -> Result<Vec<AuditLogEntry>> {
        self.audit.recent(self.audit_log_limit).await
    }
}
