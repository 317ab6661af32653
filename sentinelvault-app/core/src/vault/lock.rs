//! The owner's vault: PIN gate, live sync and list view state together.

use std::sync::Arc;

use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, warn};

use super::gate::{LockState, PinGate};
use crate::error::{Result, SentinelError};
use crate::events::Notifier;
use crate::storage::{Credential, DocumentStore};
use crate::sync::{
    CategoryFilter, CredentialDraft, CredentialEditor, CredentialPatch, CredentialSyncEngine,
    SyncStatus, ViewFilter,
};

fn vault_locked() -> SentinelError {
    SentinelError::Auth("Vault is locked. Unlock it with your PIN first.".into())
}

/// Per-session vault state.
///
/// Credentials are visible and live-synced only while unlocked. Locking
/// stops the subscription and clears search state before the state flips.
/// Unlock, lock and refresh run one at a time, sync start and stop included.
pub struct VaultLockController {
    transition: Mutex<()>,
    gate: PinGate,
    sync: CredentialSyncEngine,
    editor: CredentialEditor,
    view: RwLock<ViewFilter>,
    notifier: Notifier,
}

impl VaultLockController {
    pub fn new(store: Arc<dyn DocumentStore>, principal_id: &str, notifier: Notifier) -> Self {
        Self {
            transition: Mutex::new(()),
            gate: PinGate::new(store.clone(), principal_id),
            sync: CredentialSyncEngine::new(store.clone(), notifier.clone()),
            editor: CredentialEditor::new(store, principal_id, notifier.clone()),
            view: RwLock::new(ViewFilter::default()),
            notifier,
        }
    }

    pub fn principal_id(&self) -> &str {
        self.gate.principal_id()
    }

    pub fn state(&self) -> LockState {
        self.gate.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<LockState> {
        self.gate.watch()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }

    pub fn watch_sync(&self) -> watch::Receiver<SyncStatus> {
        self.sync.watch_status()
    }

    /// Verify `pin` and, on a fresh unlock, start live sync.
    ///
    /// A rejected PIN emits one error notification and leaves the vault
    /// locked. A sync failure after a good PIN is reported by the engine and
    /// does not undo the unlock.
    pub async fn unlock(&self, pin: &str) -> Result<()> {
        let _transition = self.transition.lock().await;
        match self.gate.unlock(pin).await {
            Ok(true) => {
                if let Err(e) = self.sync.start(self.gate.principal_id()).await {
                    warn!("Vault unlocked but sync did not start: {}", e);
                }
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                self.notifier.error(e.user_message());
                Err(e)
            }
        }
    }

    /// Re-lock. No-op (and no notification) when already locked.
    pub async fn lock(&self) -> bool {
        let _transition = self.transition.lock().await;
        let locked = self.close().await;
        if locked {
            self.notifier.info("Vault successfully locked.");
        }
        locked
    }

    /// Lock without notifying; used on sign-out and teardown.
    pub async fn teardown(&self) {
        let _transition = self.transition.lock().await;
        self.close().await;
        self.sync.stop().await;
    }

    /// Caller holds `transition`.
    async fn close(&self) -> bool {
        if self.gate.state() != LockState::Unlocked {
            return false;
        }
        self.sync.stop().await;
        self.view.write().await.clear();
        self.gate.lock().await
    }

    /// Reinstall the subscription. Ignored while locked.
    pub async fn refresh(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        if !self.gate.is_unlocked() {
            debug!("Refresh ignored: vault locked");
            return Ok(());
        }
        self.notifier.info("Refreshing credentials...");
        self.sync.start(self.gate.principal_id()).await
    }

    pub async fn set_search(&self, term: &str) {
        self.view.write().await.search_term = term.to_string();
    }

    pub async fn set_category(&self, category: CategoryFilter) {
        self.view.write().await.category = category;
    }

    pub async fn view_filter(&self) -> ViewFilter {
        self.view.read().await.clone()
    }

    /// The filtered list as the dashboard shows it; empty while locked.
    pub async fn visible_credentials(&self) -> Vec<Credential> {
        if !self.gate.is_unlocked() {
            return Vec::new();
        }
        let view = self.view.read().await.clone();
        self.sync
            .with_cache(|cache| view.apply(cache).into_iter().cloned().collect())
            .await
    }

    /// The unfiltered synced cache; empty while locked.
    pub async fn credentials(&self) -> Vec<Credential> {
        if !self.gate.is_unlocked() {
            return Vec::new();
        }
        self.sync.credentials().await
    }

    pub async fn add_credential(&self, draft: &CredentialDraft) -> Result<String> {
        self.require_unlocked()?;
        self.editor.add(draft).await
    }

    pub async fn update_credential(&self, credential_id: &str, patch: &CredentialPatch) -> Result<()> {
        self.require_unlocked()?;
        self.editor.update(credential_id, patch).await
    }

    pub async fn delete_credential(&self, credential: &Credential) -> Result<()> {
        self.require_unlocked()?;
        self.editor.delete(credential).await
    }

    fn require_unlocked(&self) -> Result<()> {
        if self.gate.is_unlocked() {
            Ok(())
        } else {
            let err = vault_locked();
            self.notifier.error(err.user_message());
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Notification, NotificationKind};
    use crate::storage::{Category, DocPath, MemoryStore};
    use tokio::sync::mpsc::UnboundedReceiver;
    use serde_json::json;
    use std::time::Duration;

    async fn setup() -> (Arc<MemoryStore>, VaultLockController, UnboundedReceiver<Notification>) {
        let store = Arc::new(MemoryStore::new());
        store
            .set_document(&DocPath::user("u1"), json!({ "email": "a@b.c", "vaultPin": "1234" }))
            .await
            .unwrap();
        for (id, site, category) in [("a", "mail", "work"), ("b", "bank", "finance")] {
            store
                .set_document(
                    &DocPath::credential("u1", id),
                    json!({ "site": site, "username": "ada", "password": "pw", "category": category }),
                )
                .await
                .unwrap();
        }
        let (notifier, rx) = Notifier::channel(3000);
        let vault = VaultLockController::new(store.clone(), "u1", notifier);
        (store, vault, rx)
    }

    async fn wait_for_count(vault: &VaultLockController, n: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while vault.credentials().await.len() != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("credentials never arrived");
    }

    #[tokio::test]
    async fn test_locked_vault_shows_nothing() {
        let (store, vault, _rx) = setup().await;
        assert_eq!(vault.state(), LockState::Locked);
        assert!(vault.visible_credentials().await.is_empty());
        assert_eq!(store.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_unlock_starts_sync_and_lock_stops_it() {
        let (store, vault, mut rx) = setup().await;
        vault.unlock("1234").await.unwrap();
        assert_eq!(vault.state(), LockState::Unlocked);
        wait_for_count(&vault, 2).await;
        assert_eq!(store.live_subscriptions(), 1);

        vault.set_search("ban").await;
        vault.set_category(CategoryFilter::Only(Category::Finance)).await;
        assert_eq!(vault.visible_credentials().await.len(), 1);

        assert!(vault.lock().await);
        assert_eq!(store.live_subscriptions(), 0);
        assert!(vault.view_filter().await.is_clear());
        assert!(vault.credentials().await.is_empty());

        let n = rx.try_recv().unwrap();
        assert_eq!(n.kind, NotificationKind::Info);
        assert_eq!(n.message, "Vault successfully locked.");
    }

    #[tokio::test]
    async fn test_idempotent_unlock_and_lock() {
        let (store, vault, mut rx) = setup().await;
        assert!(!vault.lock().await);
        assert!(rx.try_recv().is_err());

        vault.unlock("1234").await.unwrap();
        vault.unlock("1234").await.unwrap();
        assert_eq!(store.live_subscriptions(), 1);

        assert!(vault.lock().await);
        assert!(!vault.lock().await);
        assert_eq!(rx.try_recv().unwrap().message, "Vault successfully locked.");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_bad_pin_notifies_once_and_stays_locked() {
        let (store, vault, mut rx) = setup().await;
        assert!(vault.unlock("9999").await.is_err());
        assert_eq!(vault.state(), LockState::Locked);
        assert_eq!(store.live_subscriptions(), 0);

        let n = rx.try_recv().unwrap();
        assert_eq!(n.kind, NotificationKind::Error);
        assert_eq!(n.message, "Incorrect PIN.");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_refresh_reinstalls_single_subscription() {
        let (store, vault, mut rx) = setup().await;
        vault.refresh().await.unwrap();
        assert_eq!(store.live_subscriptions(), 0);
        assert!(rx.try_recv().is_err());

        vault.unlock("1234").await.unwrap();
        vault.refresh().await.unwrap();
        vault.refresh().await.unwrap();
        assert_eq!(store.live_subscriptions(), 1);
        assert_eq!(rx.try_recv().unwrap().message, "Refreshing credentials...");
    }

    #[tokio::test]
    async fn test_lock_racing_refresh_leaves_no_subscription() {
        let (store, vault, _rx) = setup().await;
        for _ in 0..20 {
            vault.unlock("1234").await.unwrap();
            let (locked, refreshed) = tokio::join!(vault.lock(), vault.refresh());
            assert!(locked);
            refreshed.unwrap();
            assert_eq!(vault.state(), LockState::Locked);
            assert_eq!(store.live_subscriptions(), 0);
            assert!(vault.credentials().await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_unlock_racing_lock_never_strands_a_subscription() {
        let (store, vault, _rx) = setup().await;
        for _ in 0..20 {
            let (unlocked, _) = tokio::join!(vault.unlock("1234"), vault.lock());
            unlocked.unwrap();
            let live = store.live_subscriptions();
            match vault.state() {
                LockState::Unlocked => assert_eq!(live, 1),
                _ => assert_eq!(live, 0),
            }
            vault.lock().await;
            assert_eq!(store.live_subscriptions(), 0);
        }
    }

    #[tokio::test]
    async fn test_writes_require_unlock() {
        let (_store, vault, _rx) = setup().await;
        let draft = CredentialDraft {
            site: "x".into(),
            username: "y".into(),
            secret: "z".into(),
            category: Category::Other,
        };
        assert!(matches!(
            vault.add_credential(&draft).await,
            Err(SentinelError::Auth(_))
        ));

        vault.unlock("1234").await.unwrap();
        vault.add_credential(&draft).await.unwrap();
        wait_for_count(&vault, 3).await;
    }

    #[tokio::test]
    async fn test_teardown_is_silent() {
        let (store, vault, mut rx) = setup().await;
        vault.unlock("1234").await.unwrap();
        vault.teardown().await;
        assert_eq!(vault.state(), LockState::Locked);
        assert_eq!(store.live_subscriptions(), 0);
        assert!(rx.try_recv().is_err());
    }
}
