//! Identity provider seam and an in-process implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, SentinelError};

/// What the identity provider knows about a signed-in account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthAccount {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
}

/// Primary sign-in, consumed by the session layer.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_account(&self, email: &str, secret: &str) -> Result<AuthAccount>;

    async fn authenticate(&self, email: &str, secret: &str) -> Result<AuthAccount>;

    async fn sign_out(&self) -> Result<()>;

    async fn send_password_reset(&self, email: &str) -> Result<()>;

    /// Confirm a fresh secret for an already signed-in account.
    async fn reauthenticate(&self, uid: &str, secret: &str) -> Result<()>;

    async fn delete_account(&self, uid: &str) -> Result<()>;

    async fn update_display_name(&self, uid: &str, name: &str) -> Result<()>;
}

struct Account {
    uid: String,
    email: String,
    display_name: Option<String>,
    secret_digest: [u8; 32],
}

impl Account {
    fn view(&self) -> AuthAccount {
        AuthAccount {
            uid: self.uid.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
        }
    }

    fn matches(&self, secret: &str) -> bool {
        digest(&self.uid, secret).ct_eq(&self.secret_digest).into()
    }
}

fn digest(uid: &str, secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(uid.as_bytes());
    hasher.update(b":");
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

fn invalid_credentials() -> SentinelError {
    SentinelError::Auth("Invalid email or password.".into())
}

/// Accounts kept in memory, keyed by lowercased email.
#[derive(Default)]
pub struct MemoryIdentityProvider {
    accounts: RwLock<HashMap<String, Account>>,
    signed_in: RwLock<Option<String>>,
    reset_requests: RwLock<Vec<String>>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uid of the account currently signed in, if any.
    pub async fn current_uid(&self) -> Option<String> {
        self.signed_in.read().await.clone()
    }

    /// Emails a reset was requested for, oldest first.
    pub async fn reset_requests(&self) -> Vec<String> {
        self.reset_requests.read().await.clone()
    }

    async fn with_uid<T>(&self, uid: &str, f: impl FnOnce(&mut Account) -> T) -> Result<T> {
        let mut accounts = self.accounts.write().await;
        accounts
            .values_mut()
            .find(|a| a.uid == uid)
            .map(f)
            .ok_or_else(|| SentinelError::NotFound(format!("account {}", uid)))
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn create_account(&self, email: &str, secret: &str) -> Result<AuthAccount> {
        let key = email.trim().to_lowercase();
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&key) {
            return Err(SentinelError::Validation("Email already in use.".into()));
        }

        let uid = Uuid::new_v4().to_string();
        let account = Account {
            secret_digest: digest(&uid, secret),
            uid: uid.clone(),
            email: email.trim().to_string(),
            display_name: None,
        };
        let view = account.view();
        accounts.insert(key, account);
        *self.signed_in.write().await = Some(uid);

        info!("Created account {}", view.uid);
        Ok(view)
    }

    async fn authenticate(&self, email: &str, secret: &str) -> Result<AuthAccount> {
        let accounts = self.accounts.read().await;
        let account = accounts
            .get(&email.trim().to_lowercase())
            .filter(|a| a.matches(secret))
            .ok_or_else(invalid_credentials)?;

        *self.signed_in.write().await = Some(account.uid.clone());
        debug!("Authenticated {}", account.uid);
        Ok(account.view())
    }

    async fn sign_out(&self) -> Result<()> {
        *self.signed_in.write().await = None;
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<()> {
        if !self
            .accounts
            .read()
            .await
            .contains_key(&email.trim().to_lowercase())
        {
            return Err(SentinelError::NotFound(format!("account {}", email)));
        }
        self.reset_requests.write().await.push(email.to_string());
        Ok(())
    }

    async fn reauthenticate(&self, uid: &str, secret: &str) -> Result<()> {
        if self.with_uid(uid, |a| a.matches(secret)).await? {
            Ok(())
        } else {
            Err(invalid_credentials())
        }
    }

    async fn delete_account(&self, uid: &str) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let before = accounts.len();
        accounts.retain(|_, a| a.uid != uid);
        if accounts.len() == before {
            return Err(SentinelError::NotFound(format!("account {}", uid)));
        }
        drop(accounts);

        let mut signed_in = self.signed_in.write().await;
        if signed_in.as_deref() == Some(uid) {
            *signed_in = None;
        }
        Ok(())
    }

    async fn update_display_name(&self, uid: &str, name: &str) -> Result<()> {
        self.with_uid(uid, |a| a.display_name = Some(name.to_string()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_authenticate() {
        let idp = MemoryIdentityProvider::new();
        let created = idp.create_account("Ada@Example.com", "hunter22").await.unwrap();

        let authed = idp.authenticate("ada@example.com", "hunter22").await.unwrap();
        assert_eq!(authed.uid, created.uid);
        assert_eq!(idp.current_uid().await, Some(created.uid));

        assert!(matches!(
            idp.authenticate("ada@example.com", "wrong").await,
            Err(SentinelError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let idp = MemoryIdentityProvider::new();
        idp.create_account("a@b.c", "secret1").await.unwrap();
        assert!(matches!(
            idp.create_account("A@B.C", "secret2").await,
            Err(SentinelError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_reauthenticate_and_delete() {
        let idp = MemoryIdentityProvider::new();
        let acct = idp.create_account("a@b.c", "secret1").await.unwrap();

        assert!(idp.reauthenticate(&acct.uid, "nope").await.is_err());
        idp.reauthenticate(&acct.uid, "secret1").await.unwrap();

        idp.delete_account(&acct.uid).await.unwrap();
        assert!(idp.current_uid().await.is_none());
        assert!(idp.authenticate("a@b.c", "secret1").await.is_err());
    }

    #[tokio::test]
    async fn test_password_reset_recorded() {
        let idp = MemoryIdentityProvider::new();
        idp.create_account("a@b.c", "secret1").await.unwrap();
        idp.send_password_reset("a@b.c").await.unwrap();
        assert_eq!(idp.reset_requests().await, vec!["a@b.c".to_string()]);
        assert!(idp.send_password_reset("x@y.z").await.is_err());
    }
}
