//! Live mirror of one principal's credential collection.
//!
//! At most one subscription is installed at a time. Each delivered snapshot
//! replaces the cache wholesale and is re-sorted by site. A subscription
//! failure is reported once and ends that subscription; nothing retries
//! until `start` is called again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, SentinelError};
use crate::events::Notifier;
use crate::storage::{Credential, DocPath, Document, DocumentStore, OrderBy, SnapshotStream};

/// Shown when the subscription cannot be opened or drops.
pub const LOAD_FAILED: &str = "Failed to load credentials. Check network.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum SyncStatus {
    Idle,
    Connecting,
    /// `revision` counts snapshots applied since the engine was created.
    Live { revision: u64 },
    Failed { reason: String },
}

/// Handle of the installed subscription task.
struct ActiveSync {
    generation: u64,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// State shared with the subscription task.
struct Shared {
    cache: RwLock<Vec<Credential>>,
    status: watch::Sender<SyncStatus>,
    generation: AtomicU64,
    revision: AtomicU64,
    notifier: Notifier,
}

impl Shared {
    /// Replace the cache with `docs` if `generation` is still current.
    async fn apply(&self, generation: u64, owner_id: &str, docs: Vec<Document>) {
        let mut fresh: Vec<Credential> = docs
            .iter()
            .filter_map(|doc| match Credential::from_document(owner_id, doc) {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!("Skipping malformed credential {}: {}", doc.id, e);
                    None
                }
            })
            .collect();
        fresh.sort_by(|a, b| a.site.cmp(&b.site));

        let mut cache = self.cache.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Dropping snapshot from superseded subscription {}", generation);
            return;
        }
        *cache = fresh;
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Applied snapshot of {} credentials (rev {})", cache.len(), revision);
        drop(cache);

        self.status.send_replace(SyncStatus::Live { revision });
    }

    /// Drop the cache and report `err` if `generation` is still current.
    async fn fail(&self, generation: u64, err: &SentinelError) {
        let mut cache = self.cache.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        warn!("Credential subscription failed: {}", err);
        cache.clear();
        drop(cache);
        self.status.send_replace(SyncStatus::Failed {
            reason: err.to_string(),
        });
        self.notifier.error(LOAD_FAILED);
    }
}

pub struct CredentialSyncEngine {
    store: Arc<dyn DocumentStore>,
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveSync>>,
}

impl CredentialSyncEngine {
    pub fn new(store: Arc<dyn DocumentStore>, notifier: Notifier) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            store,
            shared: Arc::new(Shared {
                cache: RwLock::new(Vec::new()),
                status,
                generation: AtomicU64::new(0),
                revision: AtomicU64::new(0),
                notifier,
            }),
            active: Mutex::new(None),
        }
    }

    /// Install a subscription to `principal_id`'s credentials, tearing down
    /// any previous one first.
    pub async fn start(&self, principal_id: &str) -> Result<()> {
        let mut active = self.active.lock().await;
        if let Some(prior) = active.take() {
            Self::teardown(prior).await;
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.status.send_replace(SyncStatus::Connecting);

        let collection = DocPath::credentials(principal_id);
        let stream = match self.store.subscribe(&collection, OrderBy::asc("site")).await {
            Ok(stream) => stream,
            Err(e) => {
                let err = SentinelError::Sync(e.to_string());
                self.shared.fail(generation, &err).await;
                return Err(err);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_subscription(
            self.shared.clone(),
            generation,
            principal_id.to_string(),
            stream,
            shutdown_rx,
        ));

        info!("Credential sync started for {} (gen {})", principal_id, generation);
        *active = Some(ActiveSync {
            generation,
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Cancel the subscription and clear the cache.
    ///
    /// When this returns the subscription stream has been dropped. Returns
    /// whether a subscription was installed.
    pub async fn stop(&self) -> bool {
        let mut active = self.active.lock().await;
        // Invalidate before teardown so an in-flight snapshot cannot land.
        self.shared.generation.fetch_add(1, Ordering::SeqCst);

        let stopped = match active.take() {
            Some(prior) => {
                Self::teardown(prior).await;
                true
            }
            None => false,
        };

        self.shared.cache.write().await.clear();
        self.shared.status.send_replace(SyncStatus::Idle);
        if stopped {
            info!("Credential sync stopped");
        }
        stopped
    }

    async fn teardown(prior: ActiveSync) {
        debug!("Tearing down subscription gen {}", prior.generation);
        let _ = prior.shutdown_tx.send(true);
        prior.handle.abort();
        // Wait for the task so its stream is dropped before we return.
        if let Err(e) = prior.handle.await {
            if !e.is_cancelled() {
                warn!("Subscription task ended abnormally: {}", e);
            }
        }
    }

    /// Copy of the current ordered cache.
    pub async fn credentials(&self) -> Vec<Credential> {
        self.shared.cache.read().await.clone()
    }

    /// Run `f` against the cache without copying it.
    pub async fn with_cache<T>(&self, f: impl FnOnce(&[Credential]) -> T) -> T {
        let cache = self.shared.cache.read().await;
        f(&cache)
    }

    pub fn status(&self) -> SyncStatus {
        self.shared.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status.subscribe()
    }

    /// Whether a subscription task is installed and still running.
    pub async fn is_active(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|a| !a.handle.is_finished())
    }
}

impl Drop for CredentialSyncEngine {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            let _ = active.shutdown_tx.send(true);
            active.handle.abort();
        }
    }
}

async fn run_subscription(
    shared: Arc<Shared>,
    generation: u64,
    owner_id: String,
    mut stream: SnapshotStream,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    debug!("Subscription gen {} shutting down", generation);
                    return;
                }
            }
            item = stream.next() => match item {
                Some(Ok(docs)) => shared.apply(generation, &owner_id, docs).await,
                Some(Err(e)) => {
                    shared.fail(generation, &SentinelError::Sync(e.to_string())).await;
                    return;
                }
                None => {
                    debug!("Subscription gen {} closed by store", generation);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NotificationKind;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    async fn seed(store: &MemoryStore, owner: &str, id: &str, site: &str) {
        store
            .set_document(
                &DocPath::credential(owner, id),
                json!({ "site": site, "username": "u", "password": "p", "category": "work" }),
            )
            .await
            .unwrap();
    }

    async fn wait_live(engine: &CredentialSyncEngine, len: usize) -> Vec<Credential> {
        let mut rx = engine.watch_status();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let live = matches!(*rx.borrow_and_update(), SyncStatus::Live { .. });
                if live && engine.credentials().await.len() == len {
                    return;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("sync did not settle");
        engine.credentials().await
    }

    #[tokio::test]
    async fn test_snapshot_sorted_by_site_ordinal() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "u1", "a", "zeta").await;
        seed(&store, "u1", "b", "Beta").await;
        seed(&store, "u1", "c", "alpha").await;

        let engine = CredentialSyncEngine::new(store.clone(), Notifier::silent());
        engine.start("u1").await.unwrap();

        let sites: Vec<String> = wait_live(&engine, 3).await.into_iter().map(|c| c.site).collect();
        assert_eq!(sites, vec!["Beta", "alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_remote_changes_rebuild_cache() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "u1", "a", "one").await;
        let engine = CredentialSyncEngine::new(store.clone(), Notifier::silent());
        engine.start("u1").await.unwrap();
        wait_live(&engine, 1).await;

        seed(&store, "u1", "b", "two").await;
        wait_live(&engine, 2).await;

        store.delete_document(&DocPath::credential("u1", "a")).await.unwrap();
        let cache = wait_live(&engine, 1).await;
        assert_eq!(cache[0].site, "two");
    }

    #[tokio::test]
    async fn test_restart_never_leaves_two_subscriptions() {
        let store = Arc::new(MemoryStore::new());
        let engine = CredentialSyncEngine::new(store.clone(), Notifier::silent());

        for _ in 0..5 {
            engine.start("u1").await.unwrap();
            assert_eq!(store.live_subscriptions(), 1);
        }

        assert!(engine.stop().await);
        assert_eq!(store.live_subscriptions(), 0);
        assert!(!engine.stop().await);
    }

    #[tokio::test]
    async fn test_stop_clears_cache() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "u1", "a", "one").await;
        let engine = CredentialSyncEngine::new(store.clone(), Notifier::silent());
        engine.start("u1").await.unwrap();
        wait_live(&engine, 1).await;

        engine.stop().await;
        assert!(engine.credentials().await.is_empty());
        assert_eq!(engine.status(), SyncStatus::Idle);
    }

    #[tokio::test]
    async fn test_subscription_error_notifies_once_and_stops() {
        let store = Arc::new(MemoryStore::new());
        let (notifier, mut rx) = Notifier::channel(3000);
        let engine = CredentialSyncEngine::new(store.clone(), notifier);
        engine.start("u1").await.unwrap();
        wait_live(&engine, 0).await;

        store.break_subscriptions().await;
        let mut status = engine.watch_status();
        tokio::time::timeout(
            Duration::from_secs(2),
            status.wait_for(|s| matches!(s, SyncStatus::Failed { .. })),
        )
        .await
        .unwrap()
        .unwrap();

        let n = rx.recv().await.unwrap();
        assert_eq!(n.kind, NotificationKind::Error);
        assert_eq!(n.message, LOAD_FAILED);
        assert!(rx.try_recv().is_err());

        // The task exits and drops its stream
        tokio::time::timeout(Duration::from_secs(2), async {
            while store.live_subscriptions() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(!engine.is_active().await);

        // Manual restart recovers once the store is healthy again
        store.restore_subscriptions().await;
        engine.start("u1").await.unwrap();
        wait_live(&engine, 0).await;
    }

    #[tokio::test]
    async fn test_subscription_error_drops_stale_cache() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "u1", "a", "mail").await;
        let engine = CredentialSyncEngine::new(store.clone(), Notifier::silent());
        engine.start("u1").await.unwrap();
        wait_live(&engine, 1).await;

        store.break_subscriptions().await;
        let mut status = engine.watch_status();
        tokio::time::timeout(
            Duration::from_secs(2),
            status.wait_for(|s| matches!(s, SyncStatus::Failed { .. })),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(engine.credentials().await.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_sync_error() {
        let store = Arc::new(MemoryStore::new());
        store.fail_collection(DocPath::credentials("u1")).await;
        let (notifier, mut rx) = Notifier::channel(3000);
        let engine = CredentialSyncEngine::new(store.clone(), notifier);

        assert!(matches!(engine.start("u1").await, Err(SentinelError::Sync(_))));
        assert!(matches!(engine.status(), SyncStatus::Failed { .. }));
        assert_eq!(rx.try_recv().unwrap().message, LOAD_FAILED);
    }
}
