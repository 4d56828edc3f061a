//! An in-memory session store for `keel_session`, geared towards testing and local development.
use jiff::Timestamp;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;

use keel_session::{
    SessionId,
    store::{
        SessionRecord, SessionRecordRef, SessionStorageBackend,
        errors::{
            CreateError, DeleteError, DuplicateIdError, LoadError, UnknownIdError, UpdateError,
        },
    },
};

#[derive(Clone)]
/// An in-memory session store.
///
/// # Limitations
///
/// This store won't persist data between server restarts.
/// It also won't synchronize data between multiple server instances.
/// It doesn't enforce uniqueness constraints on the session state either:
/// use a transactional backend if you need them.
pub struct InMemorySessionStore(Arc<Mutex<HashMap<SessionId, StoreRecord>>>);

impl std::fmt::Debug for InMemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySessionStore")
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct StoreRecord {
    state: HashMap<String, serde_json::Value>,
    deadline: Timestamp,
}

impl StoreRecord {
    fn new(record: SessionRecordRef<'_>) -> Self {
        Self {
            state: record.state.into_owned(),
            deadline: Timestamp::now() + record.ttl,
        }
    }

    fn is_stale(&self) -> bool {
        self.deadline <= Timestamp::now()
    }

    fn remaining_ttl(&self) -> Duration {
        (self.deadline - Timestamp::now())
            .try_into()
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySessionStore {
    /// Creates a new (empty) in-memory session store.
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(HashMap::new())))
    }

    /// The number of records currently held by the store, stale ones included.
    pub async fn len(&self) -> usize {
        self.0.lock().await.len()
    }

    /// `true` if the store holds no records at all.
    pub async fn is_empty(&self) -> bool {
        self.0.lock().await.is_empty()
    }

    /// The record stored under `id`, unless it's missing or past its deadline.
    fn fresh<'a>(
        records: &'a mut HashMap<SessionId, StoreRecord>,
        id: &SessionId,
    ) -> Option<&'a mut StoreRecord> {
        records.get_mut(id).filter(|record| !record.is_stale())
    }
}

#[async_trait::async_trait]
impl SessionStorageBackend for InMemorySessionStore {
    /// Store a new record under `id`.
    ///
    /// A stale record under the same id is overwritten.
    #[tracing::instrument(name = "Create server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn create(
        &self,
        id: &SessionId,
        record: SessionRecordRef<'_>,
    ) -> Result<(), CreateError> {
        let mut records = self.0.lock().await;
        if Self::fresh(&mut records, id).is_some() {
            return Err(DuplicateIdError { id: *id }.into());
        }
        records.insert(*id, StoreRecord::new(record));
        Ok(())
    }

    /// Replace the state of a live record and push its deadline forward.
    #[tracing::instrument(name = "Update server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn update(
        &self,
        id: &SessionId,
        record: SessionRecordRef<'_>,
    ) -> Result<(), UpdateError> {
        let mut records = self.0.lock().await;
        let existing = Self::fresh(&mut records, id).ok_or(UnknownIdError { id: *id })?;
        *existing = StoreRecord::new(record);
        Ok(())
    }

    /// Stale records are treated as missing.
    #[tracing::instrument(name = "Load server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn load(&self, id: &SessionId) -> Result<Option<SessionRecord>, LoadError> {
        let mut records = self.0.lock().await;
        Ok(Self::fresh(&mut records, id).map(|record| SessionRecord {
            state: record.state.clone(),
            ttl: record.remaining_ttl(),
        }))
    }

    #[tracing::instrument(name = "Delete server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn delete(&self, id: &SessionId) -> Result<(), DeleteError> {
        let mut records = self.0.lock().await;
        // Stale records are dropped either way, but they don't count as a hit.
        match records.remove(id) {
            Some(record) if !record.is_stale() => Ok(()),
            _ => Err(UnknownIdError { id: *id }.into()),
        }
    }
}
