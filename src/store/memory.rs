use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{
    Batch, Data, DocPath, Document, DocumentStore, Listener, Precondition, Query, Registration,
    Snapshot, SqlitePersistence, StoreError, StoreResult, Write,
};

/// Counters for what has been asked of a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub listens_opened: usize,
    pub listens_removed: usize,
    pub commits: usize,
    pub writes: usize,
    /// Commits applied in memory that the persistence layer failed to save.
    pub persist_failures: usize,
}

impl StoreStats {
    pub fn active_listens(&self) -> usize {
        self.listens_opened - self.listens_removed
    }
}

/// In-process document store with live queries.
///
/// Memory is authoritative: a commit is visible and reported successful once
/// applied, and a failed write-through is logged and counted, not returned.
///
/// Every commit re-runs each attached query and pushes a snapshot to the
/// listeners whose result changed. `set_online(false)` behaves like a dropped
/// connection: operations fail with [`StoreError::Unavailable`] and listeners
/// get an error, then the current results are re-delivered on reconnect.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    persistence: Option<SqlitePersistence>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct State {
    docs: BTreeMap<DocPath, Document>,
    listeners: HashMap<u64, Slot>,
    next_listener: u64,
    last_timestamp: i64,
    offline: bool,
    stats: StoreStats,
}

struct Slot {
    query: Query,
    tx: mpsc::UnboundedSender<StoreResult<Snapshot>>,
    delivered: Vec<Document>,
}

impl Slot {
    fn refresh<'a>(&mut self, docs: impl IntoIterator<Item = &'a Document>, force: bool) {
        let current = self.query.run(docs);
        let snapshot = Snapshot::new(&self.delivered, current.clone());
        self.delivered = current;
        if force || !snapshot.changes.is_empty() {
            // a closed receiver only means the consumer went away before removing its registration
            let _ = self.tx.send(Ok(snapshot));
        }
    }
}

impl State {
    fn ensure_online(&self) -> StoreResult<()> {
        if self.offline {
            return Err(StoreError::Unavailable("connection lost".to_owned()));
        }
        Ok(())
    }

    /// Strictly increasing, so commits are totally ordered by their timestamp.
    fn next_timestamp(&mut self) -> i64 {
        let now = (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        self.last_timestamp = now.max(self.last_timestamp + 1);
        self.last_timestamp
    }

    fn notify(&mut self) {
        let State { docs, listeners, .. } = self;
        for slot in listeners.values_mut() {
            slot.refresh(docs.values(), false);
        }
    }

    fn stage(&self, batch: &Batch, now: i64) -> StoreResult<Vec<Document>> {
        let mut staged: BTreeMap<DocPath, Document> = BTreeMap::new();
        for write in batch.writes() {
            let path = write.path();
            let current = staged.get(path).or_else(|| self.docs.get(path)).cloned();
            let data = match write {
                Write::Create { fields, .. } => {
                    if current.is_some() {
                        return Err(StoreError::AlreadyExists(path.clone()));
                    }
                    fields.apply(Data::new(), now)
                }
                Write::Set { fields, merge, .. } => {
                    let base = match current {
                        Some(doc) if *merge => doc.data,
                        _ => Data::new(),
                    };
                    fields.apply(base, now)
                }
                Write::Update { fields, precondition, .. } => {
                    let Some(current) = current else {
                        return Err(StoreError::NotFound(path.clone()));
                    };
                    if let Some(Precondition::UpdateTime(expected)) = precondition {
                        if current.update_time != *expected {
                            return Err(StoreError::Conflict(path.clone()));
                        }
                    }
                    fields.apply(current.data, now)
                }
            };
            staged.insert(path.clone(), Document { path: path.clone(), data, update_time: now });
        }
        Ok(staged.into_values().collect())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads everything `persistence` holds and writes every later commit through to it.
    pub async fn with_persistence(persistence: SqlitePersistence) -> StoreResult<Self> {
        let mut state = State::default();
        for doc in persistence.load_all().await? {
            state.last_timestamp = state.last_timestamp.max(doc.update_time);
            state.docs.insert(doc.path.clone(), doc);
        }
        info!(documents = state.docs.len(), "document store restored");

        Ok(Self {
            inner: Arc::new(Inner { state: Mutex::new(state), persistence: Some(persistence) }),
        })
    }

    pub fn stats(&self) -> StoreStats {
        self.inner.lock().stats
    }

    pub fn is_online(&self) -> bool {
        !self.inner.lock().offline
    }

    pub fn set_online(&self, online: bool) {
        let mut state = self.inner.lock();
        if state.offline != online {
            return;
        }
        state.offline = !online;
        if online {
            info!("store connection restored");
            let State { docs, listeners, .. } = &mut *state;
            for slot in listeners.values_mut() {
                slot.refresh(docs.values(), true);
            }
        } else {
            warn!(listeners = state.listeners.len(), "store connection lost");
            for slot in state.listeners.values() {
                let _ = slot.tx.send(Err(StoreError::Unavailable("connection lost".to_owned())));
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>> {
        let state = self.inner.lock();
        state.ensure_online()?;
        Ok(state.docs.get(path).cloned())
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        let state = self.inner.lock();
        state.ensure_online()?;
        Ok(query.run(state.docs.values()))
    }

    async fn commit(&self, batch: Batch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let written = {
            let mut state = self.inner.lock();
            state.ensure_online()?;
            let now = state.next_timestamp();
            let written = state.stage(&batch, now)?;
            for doc in &written {
                state.docs.insert(doc.path.clone(), doc.clone());
            }
            state.stats.commits += 1;
            state.stats.writes += written.len();
            state.notify();
            written
        };
        debug!(writes = written.len(), "batch committed");

        if let Some(persistence) = &self.inner.persistence {
            if let Err(err) = persistence.save(&written).await {
                error!(%err, writes = written.len(), "failed to persist committed batch");
                self.inner.lock().stats.persist_failures += 1;
            }
        }
        Ok(())
    }

    fn listen(&self, query: Query) -> Listener {
        let (tx, snapshots) = mpsc::unbounded_channel();
        let mut slot = Slot { query, tx, delivered: Vec::new() };

        let id = {
            let mut state = self.inner.lock();
            if state.offline {
                let _ = slot.tx.send(Err(StoreError::Unavailable("connection lost".to_owned())));
            } else {
                slot.refresh(state.docs.values(), true);
            }
            let id = state.next_listener;
            state.next_listener += 1;
            state.listeners.insert(id, slot);
            state.stats.listens_opened += 1;
            id
        };
        debug!(listener = id, "live query attached");

        let inner = Arc::downgrade(&self.inner);
        let registration = Registration::new(move || {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut state = inner.lock();
            if state.listeners.remove(&id).is_some() {
                state.stats.listens_removed += 1;
                debug!(listener = id, "live query detached");
            }
        });

        Listener { snapshots, registration }
    }
}
