//! Document database contract.
//!
//! Documents live at slash-separated paths (`collection/id/sub/id`) and hold a
//! flat JSON object. Writes are grouped into atomic [`Batch`]es and may use
//! write-time transforms ([`FieldValue`]). Live queries are handed out as a
//! [`Listener`]: a receiver of full result sets plus a [`Registration`] that
//! detaches the query when removed or dropped.

pub mod memory;
pub mod sqlite;

use std::{cmp::Ordering, collections::HashMap, fmt};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::sync::mpsc;

pub use memory::{MemoryStore, StoreStats};
pub use sqlite::SqlitePersistence;

pub type Data = serde_json::Map<String, Value>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type SnapshotReceiver = mpsc::UnboundedReceiver<StoreResult<Snapshot>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("no document at {0}")]
    NotFound(DocPath),
    #[error("document already exists at {0}")]
    AlreadyExists(DocPath),
    #[error("document at {0} changed since it was read")]
    Conflict(DocPath),
    #[error("invalid document path {0:?}")]
    InvalidPath(String),
    #[error("persistence failed: {0}")]
    Persistence(#[from] sqlx::Error),
    #[error("malformed document: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath(String);

impl DocPath {
    pub fn parse(path: &str) -> StoreResult<Self> {
        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() % 2 != 0 || segments.iter().any(|s| s.trim().is_empty()) {
            return Err(StoreError::InvalidPath(path.to_owned()));
        }
        Ok(Self(path.to_owned()))
    }

    pub fn new(collection: &str, id: &str) -> StoreResult<Self> {
        Self::parse(&format!("{collection}/{id}"))
    }

    pub fn child(&self, collection: &str, id: &str) -> StoreResult<Self> {
        Self::parse(&format!("{}/{collection}/{id}", self.0))
    }

    pub fn id(&self) -> &str {
        self.0.rsplit_once('/').map_or(&self.0, |(_, id)| id)
    }

    /// Full path of the collection holding this document.
    pub fn collection(&self) -> &str {
        self.0.rsplit_once('/').map_or("", |(collection, _)| collection)
    }

    /// Last segment of [`Self::collection`], the name collection-group queries match.
    pub fn collection_id(&self) -> &str {
        self.collection().rsplit('/').next().unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocPath,
    pub data: Data,
    /// Server time of the last write that touched this document.
    pub update_time: i64,
}

impl Document {
    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }
}

/// A value written into a document field. Everything except `Value` is
/// resolved by the store at commit time.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    ServerTimestamp,
    ArrayUnion(Vec<Value>),
    Increment(i64),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Vec<(String, FieldValue)>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every top-level field of `value`, which must serialize to an object.
    pub fn from_serialize<T: Serialize>(value: &T) -> StoreResult<Self> {
        match serde_json::to_value(value)? {
            Value::Object(data) => Ok(Self(
                data.into_iter().map(|(k, v)| (k, FieldValue::Value(v))).collect(),
            )),
            other => Err(StoreError::Serialization(serde::de::Error::custom(format!(
                "expected an object, got {other}"
            )))),
        }
    }

    pub fn value(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.push((field.to_owned(), FieldValue::Value(value.into())));
        self
    }

    pub fn server_timestamp(mut self, field: &str) -> Self {
        self.0.push((field.to_owned(), FieldValue::ServerTimestamp));
        self
    }

    pub fn array_union(mut self, field: &str, values: Vec<Value>) -> Self {
        self.0.push((field.to_owned(), FieldValue::ArrayUnion(values)));
        self
    }

    pub fn increment(mut self, field: &str, by: i64) -> Self {
        self.0.push((field.to_owned(), FieldValue::Increment(by)));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Applies the fields on top of `base`, resolving transforms with `now`.
    pub fn apply(&self, mut base: Data, now: i64) -> Data {
        for (field, value) in self.iter() {
            let resolved = match value {
                FieldValue::Value(v) => v.clone(),
                FieldValue::ServerTimestamp => Value::from(now),
                FieldValue::ArrayUnion(values) => {
                    let mut items = match base.remove(field) {
                        Some(Value::Array(items)) => items,
                        _ => Vec::new(),
                    };
                    for v in values {
                        if !items.contains(v) {
                            items.push(v.clone());
                        }
                    }
                    Value::Array(items)
                }
                FieldValue::Increment(by) => {
                    let current = base.get(field).and_then(Value::as_i64).unwrap_or(0);
                    Value::from(current + by)
                }
            };
            base.insert(field.to_owned(), resolved);
        }
        base
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    Exists,
    UpdateTime(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Fails with [`StoreError::AlreadyExists`] if the document is present.
    Create { path: DocPath, fields: Fields },
    Set { path: DocPath, fields: Fields, merge: bool },
    /// Fails with [`StoreError::NotFound`] if the document is absent.
    Update { path: DocPath, fields: Fields, precondition: Option<Precondition> },
}

impl Write {
    pub fn path(&self) -> &DocPath {
        match self {
            Write::Create { path, .. } | Write::Set { path, .. } | Write::Update { path, .. } => path,
        }
    }
}

/// Writes committed all-or-nothing under a single server timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    writes: Vec<Write>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, path: DocPath, fields: Fields) -> &mut Self {
        self.writes.push(Write::Create { path, fields });
        self
    }

    pub fn set(&mut self, path: DocPath, fields: Fields, merge: bool) -> &mut Self {
        self.writes.push(Write::Set { path, fields, merge });
        self
    }

    pub fn update(&mut self, path: DocPath, fields: Fields) -> &mut Self {
        self.writes.push(Write::Update { path, fields, precondition: Some(Precondition::Exists) });
        self
    }

    /// Update that only applies if nobody wrote the document after `update_time`.
    pub fn update_if_unchanged(&mut self, path: DocPath, fields: Fields, update_time: i64) -> &mut Self {
        self.writes.push(Write::Update {
            path,
            fields,
            precondition: Some(Precondition::UpdateTime(update_time)),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Documents directly inside the collection at this path.
    Collection(String),
    /// Documents in every collection with this id, whatever the parent.
    Group(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    target: Target,
    filters: Vec<(String, Value)>,
    order_by: Option<(String, Direction)>,
    limit: Option<usize>,
}

impl Query {
    pub fn collection(path: impl Into<String>) -> Self {
        Self::new(Target::Collection(path.into()))
    }

    pub fn collection_group(collection_id: impl Into<String>) -> Self {
        Self::new(Target::Group(collection_id.into()))
    }

    fn new(target: Target) -> Self {
        Self { target, filters: Vec::new(), order_by: None, limit: None }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push((field.to_owned(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_owned(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn matches(&self, doc: &Document) -> bool {
        let in_target = match &self.target {
            Target::Collection(path) => doc.path.collection() == path,
            Target::Group(id) => doc.path.collection_id() == id,
        };
        in_target && self.filters.iter().all(|(field, value)| doc.get(field) == Some(value))
    }

    /// Filters, orders and limits `docs` the way a query against the store would.
    pub fn run<'a>(&self, docs: impl IntoIterator<Item = &'a Document>) -> Vec<Document> {
        let mut result: Vec<Document> = docs.into_iter().filter(|d| self.matches(d)).cloned().collect();
        if let Some((field, direction)) = &self.order_by {
            result.sort_by(|a, b| {
                let ord = compare_values(a.get(field), b.get(field)).then_with(|| a.path.cmp(&b.path));
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }
        if let Some(limit) = self.limit {
            result.truncate(limit);
        }
        result
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocChange {
    pub kind: ChangeKind,
    pub doc: Document,
}

/// The full current result of a live query plus what changed since the
/// previous delivery on the same listener.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub docs: Vec<Document>,
    pub changes: Vec<DocChange>,
}

impl Snapshot {
    pub fn new(previous: &[Document], docs: Vec<Document>) -> Self {
        let changes = diff(previous, &docs);
        Self { docs, changes }
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }
}

pub fn diff(previous: &[Document], current: &[Document]) -> Vec<DocChange> {
    let before: HashMap<&DocPath, &Document> = previous.iter().map(|d| (&d.path, d)).collect();
    let mut changes = Vec::new();
    for doc in current {
        match before.get(&doc.path) {
            None => changes.push(DocChange { kind: ChangeKind::Added, doc: doc.clone() }),
            Some(old) if old.data != doc.data => {
                changes.push(DocChange { kind: ChangeKind::Modified, doc: doc.clone() })
            }
            Some(_) => {}
        }
    }
    let after: HashMap<&DocPath, ()> = current.iter().map(|d| (&d.path, ())).collect();
    for doc in previous {
        if !after.contains_key(&doc.path) {
            changes.push(DocChange { kind: ChangeKind::Removed, doc: doc.clone() });
        }
    }
    changes
}

/// Keeps a live query attached. Removing or dropping it detaches the query
/// synchronously; snapshots already queued on the receiver are not drained.
pub struct Registration(Option<Box<dyn FnOnce() + Send>>);

impl Registration {
    pub fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(remove)))
    }

    pub fn remove(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(remove) = self.0.take() {
            remove();
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Registration").field(&self.0.is_some()).finish()
    }
}

#[derive(Debug)]
pub struct Listener {
    pub snapshots: SnapshotReceiver,
    pub registration: Registration,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// `Ok(None)` when nothing lives at `path`.
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>>;

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>>;

    async fn commit(&self, batch: Batch) -> StoreResult<()>;

    /// Attaches a live query. The first snapshot carries the current result.
    fn listen(&self, query: Query) -> Listener;

    async fn set(&self, path: DocPath, fields: Fields, merge: bool) -> StoreResult<()> {
        let mut batch = Batch::new();
        batch.set(path, fields, merge);
        self.commit(batch).await
    }

    async fn update(&self, path: DocPath, fields: Fields) -> StoreResult<()> {
        let mut batch = Batch::new();
        batch.update(path, fields);
        self.commit(batch).await
    }

    async fn create(&self, path: DocPath, fields: Fields) -> StoreResult<()> {
        let mut batch = Batch::new();
        batch.create(path, fields);
        self.commit(batch).await
    }
}
