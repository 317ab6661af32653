//! Remote document store seam.
//!
//! All persistence is delegated to a hierarchical document store addressed by
//! slash-separated paths (`users/{uid}/passwords/{id}`). Documents are JSON
//! objects; typed models encode to and decode from them in `models`.

use std::cmp::Ordering;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

use crate::error::Result;

/// Path of a document or a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath(String);

impl DocPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into().trim_matches('/').to_string())
    }

    /// `users`
    pub fn users() -> Self {
        Self::new("users")
    }

    /// `users/{uid}`
    pub fn user(uid: &str) -> Self {
        Self::users().child(uid)
    }

    /// `users/{uid}/passwords`
    pub fn credentials(uid: &str) -> Self {
        Self::user(uid).child("passwords")
    }

    /// `users/{uid}/passwords/{id}`
    pub fn credential(uid: &str, id: &str) -> Self {
        Self::credentials(uid).child(id)
    }

    /// `audit_logs`
    pub fn audit_logs() -> Self {
        Self::new("audit_logs")
    }

    pub fn child(&self, segment: &str) -> Self {
        Self(format!("{}/{}", self.0, segment))
    }

    /// Split a document path into its collection path and document id.
    pub fn split(&self) -> Option<(DocPath, &str)> {
        self.0
            .rsplit_once('/')
            .map(|(parent, id)| (DocPath(parent.to_string()), id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document as returned by reads and snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn field(&self, name: &str) -> &Value {
        self.data.get(name).unwrap_or(&Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Ascending,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Descending,
        }
    }

    /// Compare two documents on this ordering, falling back to the id so the
    /// result is total.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let primary = compare_values(a.field(&self.field), b.field(&self.field));
        let primary = match self.direction {
            Direction::Ascending => primary,
            Direction::Descending => primary.reverse(),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn ordered(order_by: OrderBy) -> Self {
        Self {
            order_by: Some(order_by),
            limit: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Lazy, non-restartable sequence of full ordered snapshots.
///
/// Each item is the complete collection at some point in time. Dropping the
/// stream unsubscribes.
pub type SnapshotStream = BoxStream<'static, Result<Vec<Document>>>;

/// Ordering across JSON values: null < bool < number < string < other.
/// Strings compare by code point, numbers numerically.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// The remote document store collaborator.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, path: &DocPath) -> Result<Option<Document>>;

    /// Create or overwrite a document.
    async fn set_document(&self, path: &DocPath, data: Value) -> Result<()>;

    /// Merge fields into an existing document. Fails with `NotFound` if absent.
    async fn update_fields(&self, path: &DocPath, fields: Map<String, Value>) -> Result<()>;

    async fn delete_document(&self, path: &DocPath) -> Result<()>;

    /// Append a document with a store-assigned id; returns the id.
    async fn add_document(&self, collection: &DocPath, data: Value) -> Result<String>;

    async fn query_collection(&self, collection: &DocPath, query: Query) -> Result<Vec<Document>>;

    /// Subscribe to ordered snapshots of a collection. The first item is the
    /// current state.
    async fn subscribe(&self, collection: &DocPath, order_by: OrderBy) -> Result<SnapshotStream>;

    /// Delete every path or none of them.
    async fn atomic_batch(&self, deletes: Vec<DocPath>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_paths() {
        assert_eq!(DocPath::credential("u1", "p9").as_str(), "users/u1/passwords/p9");
        let path = DocPath::credential("u1", "p9");
        let (parent, id) = path.split().unwrap();
        assert_eq!(parent, DocPath::credentials("u1"));
        assert_eq!(id, "p9");
        assert!(DocPath::users().split().is_none());
        assert_eq!(DocPath::new("/audit_logs/").as_str(), "audit_logs");
    }

    #[test]
    fn test_string_ordering_is_ordinal() {
        let upper = json!("Zeta");
        let lower = json!("alpha");
        assert_eq!(compare_values(&upper, &lower), Ordering::Less);
    }

    #[test]
    fn test_numbers_and_missing_fields() {
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&Value::Null, &json!(0)), Ordering::Less);
    }

    #[test]
    fn test_order_by_descending_ties_on_id() {
        let a = Document {
            id: "a".into(),
            data: json!({ "timestamp": 5 }),
        };
        let b = Document {
            id: "b".into(),
            data: json!({ "timestamp": 5 }),
        };
        let c = Document {
            id: "c".into(),
            data: json!({ "timestamp": 9 }),
        };
        let order = OrderBy::desc("timestamp");
        let mut docs = vec![a.clone(), b.clone(), c.clone()];
        docs.sort_by(|x, y| order.compare(x, y));
        assert_eq!(docs, vec![c, a, b]);
    }
}
