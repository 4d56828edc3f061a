use std::sync::Arc;

use keel_session::{
    SessionConfig, SessionId, SessionMiddleware, SessionStore,
    store::{
        SessionRecord, SessionRecordRef, SessionStorageBackend,
        errors::{CreateError, DeleteError, LoadError, StoreError, UpdateError},
    },
};
use keel_session_memory_store::InMemorySessionStore;
use secrecy::SecretString;
use tokio::sync::Mutex;

pub const SECRET: &str = "a-test-secret-that-is-long-enough";

/// Default settings, with a fixed signing secret.
pub fn config() -> SessionConfig {
    SessionConfig::new(SecretString::from(SECRET.to_owned()))
}

/// A middleware on top of an empty in-memory session store.
pub fn middleware(config: SessionConfig) -> SessionMiddleware {
    SessionMiddleware::new(SessionStore::new(InMemorySessionStore::default()), config).unwrap()
}

/// A middleware on top of an empty in-memory session store, with a mechanism to inspect
/// what calls were made to it.
pub fn spy_middleware(config: SessionConfig) -> (SessionMiddleware, CallTracker) {
    let spy_backend = SpyBackend::new(InMemorySessionStore::default());
    let call_tracker = spy_backend.call_tracker();
    let middleware = SessionMiddleware::new(SessionStore::new(spy_backend), config).unwrap();
    (middleware, call_tracker)
}

/// A wrapper that keeps track of which methods have been called
/// on the underlying session storage backend
#[derive(Debug)]
pub struct SpyBackend<B> {
    backend: B,
    call_tracker: CallTracker,
}

impl<B> SpyBackend<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            call_tracker: Default::default(),
        }
    }

    pub fn call_tracker(&self) -> CallTracker {
        self.call_tracker.clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallTracker(Arc<Mutex<Vec<String>>>);

impl CallTracker {
    pub async fn assert_never_loaded(&self) {
        let oplog = self.0.lock().await;
        assert!(
            !oplog.iter().any(|op| op.starts_with("load")),
            "Server store tried to load the server state. Operation log:\n  - {}",
            oplog.join("\n  - ")
        )
    }

    pub async fn operation_log(&self) -> Vec<String> {
        self.0.lock().await.clone()
    }

    async fn push_operation(&self, op: impl Into<String>) {
        self.0.lock().await.push(op.into());
    }
}

#[async_trait::async_trait]
impl<B: SessionStorageBackend> SessionStorageBackend for SpyBackend<B> {
    async fn create(
        &self,
        id: &SessionId,
        record: SessionRecordRef<'_>,
    ) -> Result<(), CreateError> {
        self.call_tracker.push_operation(format!("create {id}")).await;
        self.backend.create(id, record).await
    }

    async fn update(
        &self,
        id: &SessionId,
        record: SessionRecordRef<'_>,
    ) -> Result<(), UpdateError> {
        self.call_tracker.push_operation(format!("update {id}")).await;
        self.backend.update(id, record).await
    }

    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionRecord>, LoadError> {
        self.call_tracker
            .push_operation(format!("load {session_id}"))
            .await;
        self.backend.load(session_id).await
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), DeleteError> {
        self.call_tracker
            .push_operation(format!("delete {session_id}"))
            .await;
        self.backend.delete(session_id).await
    }
}

/// A backend that fails every operation.
#[derive(Debug)]
pub struct BrokenBackend {
    create_error: fn() -> CreateError,
}

impl BrokenBackend {
    /// Fail with the error built by `create_error` when asked to create a record,
    /// with a transient failure otherwise.
    pub fn new(create_error: fn() -> CreateError) -> Self {
        Self { create_error }
    }

    pub fn middleware(self, config: SessionConfig) -> SessionMiddleware {
        SessionMiddleware::new(SessionStore::new(self), config).unwrap()
    }
}

fn unavailable() -> StoreError {
    StoreError::Transient(anyhow::anyhow!("The backend is unavailable"))
}

#[async_trait::async_trait]
impl SessionStorageBackend for BrokenBackend {
    async fn create(&self, _: &SessionId, _: SessionRecordRef<'_>) -> Result<(), CreateError> {
        Err((self.create_error)())
    }

    async fn update(&self, _: &SessionId, _: SessionRecordRef<'_>) -> Result<(), UpdateError> {
        Err(unavailable().into())
    }

    async fn load(&self, _: &SessionId) -> Result<Option<SessionRecord>, LoadError> {
        Err(unavailable().into())
    }

    async fn delete(&self, _: &SessionId) -> Result<(), DeleteError> {
        Err(unavailable().into())
    }
}

pub fn transient_create_error() -> CreateError {
    unavailable().into()
}

pub fn conflicting_create_error() -> CreateError {
    keel_session::store::errors::UniqueConflictError {
        attribute: "username".into(),
        value: "alice".into(),
    }
    .into()
}
