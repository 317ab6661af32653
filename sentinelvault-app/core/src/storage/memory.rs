//! In-process `DocumentStore`.
//!
//! Backs the operator CLI and the test suite. Every write bumps a revision on
//! a watch channel; live subscriptions wake on it, recompute their collection
//! and yield a snapshot when it differs from the last one delivered.
//! Faults can be injected per collection, per batch and for subscriptions.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::{watch, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::store::{DocPath, Document, DocumentStore, OrderBy, Query, SnapshotStream};
use crate::error::{Result, SentinelError};

type Collections = HashMap<DocPath, BTreeMap<String, Value>>;

#[derive(Debug, Default)]
struct Faults {
    failing_collections: HashSet<DocPath>,
    fail_next_batch: bool,
    subscriptions_broken: bool,
}

struct Inner {
    collections: RwLock<Collections>,
    faults: RwLock<Faults>,
    revision: watch::Sender<u64>,
    live_subscriptions: Arc<AtomicUsize>,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts a subscription as live until its stream is dropped.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Subscription {
    store: MemoryStore,
    collection: DocPath,
    order_by: OrderBy,
    revision: watch::Receiver<u64>,
    last: Option<Vec<Document>>,
    started: bool,
    _live: LiveGuard,
}

fn split(path: &DocPath) -> Result<(DocPath, String)> {
    path.split()
        .map(|(collection, id)| (collection, id.to_string()))
        .ok_or_else(|| SentinelError::Store(format!("Not a document path: {}", path)))
}

impl MemoryStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                collections: RwLock::new(HashMap::new()),
                faults: RwLock::new(Faults::default()),
                revision,
                live_subscriptions: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Number of subscription streams currently alive.
    pub fn live_subscriptions(&self) -> usize {
        self.inner.live_subscriptions.load(Ordering::SeqCst)
    }

    /// Make every operation touching `collection` fail.
    pub async fn fail_collection(&self, collection: DocPath) {
        self.inner
            .faults
            .write()
            .await
            .failing_collections
            .insert(collection);
    }

    pub async fn heal_collection(&self, collection: &DocPath) {
        self.inner
            .faults
            .write()
            .await
            .failing_collections
            .remove(collection);
    }

    /// Reject the next atomic batch without applying any of it.
    pub async fn fail_next_batch(&self) {
        self.inner.faults.write().await.fail_next_batch = true;
    }

    /// Simulate losing the push connection: every live subscription yields
    /// an error on its next poll.
    pub async fn break_subscriptions(&self) {
        self.inner.faults.write().await.subscriptions_broken = true;
        self.bump();
    }

    pub async fn restore_subscriptions(&self) {
        self.inner.faults.write().await.subscriptions_broken = false;
    }

    fn bump(&self) {
        self.inner.revision.send_modify(|rev| *rev += 1);
    }

    async fn check(&self, collection: &DocPath) -> Result<()> {
        if self
            .inner
            .faults
            .read()
            .await
            .failing_collections
            .contains(collection)
        {
            return Err(SentinelError::Store(format!(
                "Collection unavailable: {}",
                collection
            )));
        }
        Ok(())
    }

    async fn read_collection(&self, collection: &DocPath, order_by: Option<&OrderBy>) -> Vec<Document> {
        let collections = self.inner.collections.read().await;
        let mut docs: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = order_by {
            docs.sort_by(|a, b| order.compare(a, b));
        }
        docs
    }

    async fn snapshot(&self, collection: &DocPath, order_by: &OrderBy) -> Result<Vec<Document>> {
        if self.inner.faults.read().await.subscriptions_broken {
            return Err(SentinelError::Sync(format!(
                "Subscription to {} lost",
                collection
            )));
        }
        self.check(collection).await?;
        Ok(self.read_collection(collection, Some(order_by)).await)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_document(&self, path: &DocPath) -> Result<Option<Document>> {
        let (collection, id) = split(path)?;
        self.check(&collection).await?;

        let collections = self.inner.collections.read().await;
        Ok(collections
            .get(&collection)
            .and_then(|docs| docs.get(&id))
            .map(|data| Document {
                id,
                data: data.clone(),
            }))
    }

    async fn set_document(&self, path: &DocPath, data: Value) -> Result<()> {
        let (collection, id) = split(path)?;
        self.check(&collection).await?;

        self.inner
            .collections
            .write()
            .await
            .entry(collection)
            .or_default()
            .insert(id, data);
        self.bump();
        Ok(())
    }

    async fn update_fields(&self, path: &DocPath, fields: Map<String, Value>) -> Result<()> {
        let (collection, id) = split(path)?;
        self.check(&collection).await?;

        {
            let mut collections = self.inner.collections.write().await;
            let doc = collections
                .get_mut(&collection)
                .and_then(|docs| docs.get_mut(&id))
                .ok_or_else(|| SentinelError::NotFound(path.to_string()))?;

            match doc {
                Value::Object(existing) => existing.extend(fields),
                other => *other = Value::Object(fields),
            }
        }
        self.bump();
        Ok(())
    }

    async fn delete_document(&self, path: &DocPath) -> Result<()> {
        let (collection, id) = split(path)?;
        self.check(&collection).await?;

        if let Some(docs) = self.inner.collections.write().await.get_mut(&collection) {
            docs.remove(&id);
        }
        self.bump();
        Ok(())
    }

    async fn add_document(&self, collection: &DocPath, data: Value) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.set_document(&collection.child(&id), data).await?;
        Ok(id)
    }

    async fn query_collection(&self, collection: &DocPath, query: Query) -> Result<Vec<Document>> {
        self.check(collection).await?;

        let mut docs = self.read_collection(collection, query.order_by.as_ref()).await;
        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn subscribe(&self, collection: &DocPath, order_by: OrderBy) -> Result<SnapshotStream> {
        self.check(collection).await?;
        debug!("Opening subscription on {}", collection);

        let state = Subscription {
            store: self.clone(),
            collection: collection.clone(),
            order_by,
            revision: self.inner.revision.subscribe(),
            last: None,
            started: false,
            _live: LiveGuard::new(self.inner.live_subscriptions.clone()),
        };

        let snapshots = stream::unfold(state, |mut sub| async move {
            loop {
                if sub.started {
                    // Sender lives as long as `sub.store`, so this only
                    // fails if the store itself is gone.
                    if sub.revision.changed().await.is_err() {
                        return None;
                    }
                }
                sub.started = true;

                match sub.store.snapshot(&sub.collection, &sub.order_by).await {
                    Ok(docs) => {
                        if sub.last.as_ref() == Some(&docs) {
                            continue;
                        }
                        sub.last = Some(docs.clone());
                        return Some((Ok(docs), sub));
                    }
                    Err(e) => return Some((Err(e), sub)),
                }
            }
        });

        Ok(snapshots.boxed())
    }

    async fn atomic_batch(&self, deletes: Vec<DocPath>) -> Result<()> {
        let targets = deletes.iter().map(split).collect::<Result<Vec<_>>>()?;

        {
            let mut faults = self.inner.faults.write().await;
            if faults.fail_next_batch {
                faults.fail_next_batch = false;
                return Err(SentinelError::Store("Batch commit rejected".into()));
            }
            if let Some((collection, _)) = targets
                .iter()
                .find(|(collection, _)| faults.failing_collections.contains(collection))
            {
                return Err(SentinelError::Store(format!(
                    "Collection unavailable: {}",
                    collection
                )));
            }
        }

        {
            let mut collections = self.inner.collections.write().await;
            for (collection, id) in &targets {
                if let Some(docs) = collections.get_mut(collection) {
                    docs.remove(id);
                }
            }
        }
        debug!("Committed batch of {} deletes", targets.len());
        self.bump();
        Ok(())
    }
}
