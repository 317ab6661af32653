//! Signed-in sessions and account lifecycle.
//!
//! A `Session` is created by sign-in or sign-up and owns the principal's
//! vault. Nothing here is process-global: every component gets its store,
//! identity provider and notifier from the `AccountService` that built it.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::admin::{AdminAggregationEngine, AdminVaultView};
use crate::error::{Result, SentinelError};
use crate::events::Notifier;
use crate::security::{generate_secret, hash_pin, validate_pin_format};
use crate::storage::{
    AuthAccount, DocPath, DocumentStore, EngineSettings, IdentityProvider, Principal, Query, Role,
    StoredPin,
};
use crate::vault::VaultLockController;

/// Minimum length of an account secret.
pub const MIN_ACCOUNT_SECRET_LEN: usize = 6;

pub const BANNED_MESSAGE: &str =
    "Your account has been disabled by the system administrator. Please contact support.";

/// Registration form.
#[derive(Debug, Clone)]
pub struct SignUp {
    pub display_name: String,
    pub email: String,
    pub phone: String,
    pub secret: String,
    pub confirm_secret: String,
}

/// One signed-in principal and their vault.
pub struct Session {
    account: AuthAccount,
    principal: Principal,
    vault: VaultLockController,
}

impl Session {
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn principal_id(&self) -> &str {
        &self.principal.id
    }

    pub fn role(&self) -> Role {
        self.principal.role
    }

    pub fn vault(&self) -> &VaultLockController {
        &self.vault
    }

    /// True until the principal has stored a vault PIN.
    pub fn needs_pin_setup(&self) -> bool {
        !self.principal.pin.is_set()
    }
}

fn now_millis() -> Value {
    Value::from(Utc::now().timestamp_millis())
}

pub struct AccountService {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    notifier: Notifier,
    settings: EngineSettings,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        notifier: Notifier,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            identity,
            notifier,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn open_session(&self, account: AuthAccount, principal: Principal) -> Session {
        let vault = VaultLockController::new(self.store.clone(), &account.uid, self.notifier.clone());
        Session {
            account,
            principal,
            vault,
        }
    }

    /// Notify the user of `err` and hand it back.
    fn report(&self, err: SentinelError) -> SentinelError {
        self.notifier.error(err.user_message());
        err
    }

    pub async fn sign_up(&self, form: &SignUp) -> Result<Session> {
        if form.secret != form.confirm_secret {
            return Err(self.report(SentinelError::Validation("Passwords do not match.".into())));
        }
        if form.secret.chars().count() < MIN_ACCOUNT_SECRET_LEN {
            return Err(self.report(SentinelError::Validation(format!(
                "Password must be at least {} characters long.",
                MIN_ACCOUNT_SECRET_LEN
            ))));
        }

        let account = match self.identity.create_account(&form.email, &form.secret).await {
            Ok(account) => account,
            Err(e) => {
                warn!("Account creation failed: {}", e);
                self.notifier
                    .error("Failed to create account. The email may already be in use.");
                return Err(e);
            }
        };
        // Profile first, so a failed display-name update still leaves one.
        let principal = Principal::new(
            &account.uid,
            &account.email,
            &form.display_name,
            &form.phone,
            Utc::now(),
        );
        let data = principal.to_document_data().map_err(|e| self.report(e))?;
        self.store
            .set_document(&DocPath::user(&account.uid), data)
            .await
            .map_err(|e| self.report(e))?;
        self.identity
            .update_display_name(&account.uid, &form.display_name)
            .await
            .map_err(|e| self.report(e))?;

        info!("Registered principal {}", account.uid);
        self.notifier
            .success("Account created successfully! Please set your Vault PIN.");
        Ok(self.open_session(account, principal))
    }

    /// Authenticate and open a session. Banned principals are signed straight
    /// back out.
    pub async fn sign_in(&self, email: &str, secret: &str) -> Result<Session> {
        let account = match self.identity.authenticate(email, secret).await {
            Ok(account) => account,
            Err(e) => {
                self.notifier
                    .error("Invalid credentials. Please check your email and password.");
                return Err(e);
            }
        };

        let principal = self
            .fetch_or_create_principal(&account)
            .await
            .map_err(|e| self.report(e))?;

        if principal.banned {
            warn!("Banned principal {} attempted sign-in", account.uid);
            if let Err(e) = self.identity.sign_out().await {
                warn!("Sign-out after ban check failed: {}", e);
            }
            return Err(self.report(SentinelError::Auth(BANNED_MESSAGE.into())));
        }

        info!("Principal {} signed in", account.uid);
        self.notifier
            .success("Login successful! Welcome back to SentinelVault.");
        Ok(self.open_session(account, principal))
    }

    /// Lock the vault, stop sync and sign out.
    pub async fn sign_out(&self, session: Session) -> Result<()> {
        session.vault.teardown().await;
        self.identity.sign_out().await.map_err(|e| self.report(e))?;
        info!("Principal {} signed out", session.principal.id);
        Ok(())
    }

    async fn fetch_or_create_principal(&self, account: &AuthAccount) -> Result<Principal> {
        let path = DocPath::user(&account.uid);
        if let Some(doc) = self.store.get_document(&path).await? {
            return Principal::from_document(&doc);
        }

        let display_name = account.display_name.clone().unwrap_or_else(|| {
            account
                .email
                .split('@')
                .next()
                .unwrap_or_default()
                .to_string()
        });
        let principal = Principal::new(&account.uid, &account.email, &display_name, "", Utc::now());
        self.store
            .set_document(&path, principal.to_document_data()?)
            .await?;
        info!("Created missing profile for {}", account.uid);
        Ok(principal)
    }

    /// Reload the profile, creating a default one if it is missing.
    pub async fn load_profile(&self, session: &mut Session) -> Result<Principal> {
        match self.fetch_or_create_principal(&session.account).await {
            Ok(principal) => {
                session.principal = principal.clone();
                Ok(principal)
            }
            Err(e) => {
                warn!("Failed to load profile: {}", e);
                self.notifier.error("Failed to load profile data.");
                Err(e)
            }
        }
    }

    /// Set or replace the vault PIN. Stored as a salted Argon2id hash; any
    /// legacy plaintext PIN is cleared.
    pub async fn set_pin(&self, session: &mut Session, pin: &str, confirm: &str) -> Result<()> {
        validate_pin_format(pin).map_err(|e| self.report(e.into()))?;
        if pin != confirm {
            return Err(self.report(SentinelError::Validation("PINs do not match.".into())));
        }

        let kdf = self.settings.pin_kdf.clone();
        let owned = pin.to_string();
        let hash = tokio::task::spawn_blocking(move || hash_pin(&owned, &kdf))
            .await
            .map_err(|e| SentinelError::Store(format!("PIN hashing task failed: {}", e)))??;

        let mut fields = Map::new();
        fields.insert("vaultPin".into(), Value::String(String::new()));
        fields.insert("vaultPinHash".into(), serde_json::to_value(&hash)?);
        fields.insert("lastUpdated".into(), now_millis());

        if let Err(e) = self
            .store
            .update_fields(&DocPath::user(&session.principal.id), fields)
            .await
        {
            warn!("Failed to store PIN: {}", e);
            self.notifier.error("Failed to set PIN.");
            return Err(e);
        }

        session.principal.pin = StoredPin::Hashed(hash);
        session.principal.updated_at = Some(Utc::now());
        info!("Vault PIN set for {}", session.principal.id);
        self.notifier.success("Vault PIN set successfully!");
        Ok(())
    }

    pub async fn update_display_name(&self, session: &mut Session, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(self.report(SentinelError::Validation("Username cannot be empty.".into())));
        }
        if name == session.principal.display_name {
            return Ok(());
        }

        let outcome = async {
            self.identity
                .update_display_name(&session.principal.id, name)
                .await?;
            let mut fields = Map::new();
            fields.insert("username".into(), Value::String(name.to_string()));
            fields.insert("lastUpdated".into(), now_millis());
            self.store
                .update_fields(&DocPath::user(&session.principal.id), fields)
                .await
        }
        .await;

        match outcome {
            Ok(()) => {
                session.principal.display_name = name.to_string();
                session.account.display_name = Some(name.to_string());
                self.notifier.success("Username updated successfully!");
                Ok(())
            }
            Err(e) => {
                warn!("Failed to update username: {}", e);
                self.notifier.error("Failed to update username.");
                Err(e)
            }
        }
    }

    /// Password reset for the signed-in principal.
    pub async fn send_password_reset(&self, session: &Session) -> Result<()> {
        let email = &session.principal.email;
        match self.identity.send_password_reset(email).await {
            Ok(()) => {
                self.notifier.success(format!(
                    "Password reset link sent to {}. Check your inbox.",
                    email
                ));
                Ok(())
            }
            Err(e) => {
                self.notifier.error(
                    "Failed to send password reset email. Please check your connection.",
                );
                Err(e)
            }
        }
    }

    /// Password reset from the sign-in screen.
    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        if email.trim().is_empty() {
            return Err(self.report(SentinelError::Validation(
                "Please enter your email address first to reset the password.".into(),
            )));
        }
        match self.identity.send_password_reset(email).await {
            Ok(()) => {
                self.notifier
                    .success("Password reset link has been sent to your email.");
                Ok(())
            }
            Err(e) => {
                self.notifier.error(
                    "Failed to send password reset email. Please check the email address.",
                );
                Err(e)
            }
        }
    }

    /// Permanently delete the account and everything it owns.
    ///
    /// Re-authenticates first; credentials go in one atomic batch before the
    /// profile and identity are removed.
    pub async fn delete_account(&self, session: &Session, secret: &str) -> Result<()> {
        let uid = session.principal.id.clone();

        if let Err(e) = self.identity.reauthenticate(&uid, secret).await {
            let err = match e {
                SentinelError::Auth(_) => {
                    SentinelError::Auth("Incorrect password. Deletion cancelled.".into())
                }
                other => other,
            };
            return Err(self.report(err));
        }

        session.vault.teardown().await;

        let outcome = async {
            let collection = DocPath::credentials(&uid);
            let docs = self
                .store
                .query_collection(&collection, Query::default())
                .await?;
            self.store
                .atomic_batch(docs.iter().map(|d| collection.child(&d.id)).collect())
                .await?;
            self.store.delete_document(&DocPath::user(&uid)).await?;
            self.identity.delete_account(&uid).await
        }
        .await;

        match outcome {
            Ok(()) => {
                info!("Deleted account {}", uid);
                self.notifier
                    .success("Account and all associated data deleted permanently.");
                Ok(())
            }
            Err(e) => {
                warn!("Account deletion for {} failed: {}", uid, e);
                self.notifier
                    .error(format!("An error occurred during deletion: {}", e.user_message()));
                Err(e)
            }
        }
    }

    /// Random secret of the configured length.
    pub fn generate_secret(&self) -> String {
        generate_secret(self.settings.generated_secret_length)
    }

    /// Admin aggregation for an admin session; `Permission` otherwise.
    pub fn admin_engine(&self, session: &Session) -> Result<AdminAggregationEngine> {
        AdminAggregationEngine::new(
            self.store.clone(),
            self.identity.clone(),
            &session.principal,
            self.notifier.clone(),
            &self.settings,
        )
        .map_err(|e| self.report(e))
    }

    /// The PIN-gated raw credential view for an admin session.
    pub fn admin_vault_view(&self, session: &Session) -> Result<AdminVaultView> {
        AdminVaultView::new(self.store.clone(), &session.principal, self.notifier.clone())
            .map_err(|e| self.report(e))
    }
}
