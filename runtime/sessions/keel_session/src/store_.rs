use crate::SessionId;
use errors::{CreateError, DeleteError, LoadError, UpdateError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{borrow::Cow, collections::HashMap};

/// Where server-side session records are stored.
///
/// It is a thin wrapper
/// [around your chosen storage backend implementation][`SessionStorageBackend`],
/// removing the need to specify the concrete type of the storage backend
/// everywhere in your code.
#[derive(Debug)]
pub struct SessionStore(Box<dyn SessionStorageBackend>);

impl SessionStore {
    /// Creates a new session store using the provided backend.
    pub fn new<Backend>(backend: Backend) -> Self
    where
        Backend: SessionStorageBackend + 'static,
    {
        Self(Box::new(backend))
    }

    /// Creates a new session record in the store using the provided ID.
    pub async fn create(
        &self,
        id: &SessionId,
        record: SessionRecordRef<'_>,
    ) -> Result<(), CreateError> {
        self.0.create(id, record).await
    }

    /// Update the state of an existing session in the store.
    ///
    /// It overwrites the existing record with the provided one and
    /// refreshes its time-to-live.
    pub async fn update(
        &self,
        id: &SessionId,
        record: SessionRecordRef<'_>,
    ) -> Result<(), UpdateError> {
        self.0.update(id, record).await
    }

    /// Loads an existing session record from the store using the provided ID.
    ///
    /// If a session with the given ID exists, it is returned. If the session
    /// does not exist or has been invalidated (e.g., expired), `None` is
    /// returned.
    pub async fn load(&self, id: &SessionId) -> Result<Option<SessionRecord>, LoadError> {
        self.0.load(id).await
    }

    /// Deletes a session record from the store using the provided ID.
    ///
    /// Any record the backend keeps alongside it (e.g. uniqueness sentinels)
    /// is removed in the same operation.
    pub async fn delete(&self, id: &SessionId) -> Result<(), DeleteError> {
        self.0.delete(id).await
    }
}

#[async_trait::async_trait]
/// The interface of a session storage backend.
pub trait SessionStorageBackend: std::fmt::Debug + Send + Sync {
    /// Creates a new session record in the store using the provided ID.
    ///
    /// It fails with [`CreateError::DuplicateId`] if a record with the same ID
    /// already exists.
    async fn create(&self, id: &SessionId, record: SessionRecordRef<'_>)
    -> Result<(), CreateError>;

    /// Update the state of an existing session in the store.
    ///
    /// It overwrites the existing record with the provided one.
    /// It fails with [`UpdateError::UnknownId`] if there is no record with the given ID.
    async fn update(&self, id: &SessionId, record: SessionRecordRef<'_>)
    -> Result<(), UpdateError>;

    /// Loads an existing session record from the store using the provided ID.
    ///
    /// A missing record is not an error: `None` is returned.
    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionRecord>, LoadError>;

    /// Deletes a session record from the store using the provided ID.
    ///
    /// It fails with [`DeleteError::UnknownId`] if there is no record with the given ID.
    async fn delete(&self, session_id: &SessionId) -> Result<(), DeleteError>;
}

/// A server-side session record that's going to be stored in the
/// chosen storage backend.
#[derive(Debug)]
pub struct SessionRecordRef<'session> {
    /// The set of key-value pairs attached to a session.
    pub state: Cow<'session, HashMap<String, Value>>,
    /// The session time-to-live.
    pub ttl: std::time::Duration,
}

impl<'session> SessionRecordRef<'session> {
    /// Build a record out of a typed payload.
    ///
    /// The payload must serialize to a JSON object: each top-level field
    /// becomes an entry in the session state.
    pub fn from_typed<T: Serialize>(
        payload: &T,
        ttl: std::time::Duration,
    ) -> Result<SessionRecordRef<'static>, errors::PayloadError> {
        match serde_json::to_value(payload)? {
            Value::Object(map) => Ok(SessionRecordRef {
                state: Cow::Owned(map.into_iter().collect()),
                ttl,
            }),
            _ => Err(errors::PayloadError::NotAnObject),
        }
    }
}

/// A server-side session record that was retrieved from the
/// chosen storage backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    /// The set of key-value pairs attached to a session.
    pub state: HashMap<String, Value>,
    /// How long the record has left to live.
    pub ttl: std::time::Duration,
}

impl SessionRecord {
    /// Deserialize the session state into a typed payload.
    pub fn state_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let object = self
            .state
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::from_value(Value::Object(object))
    }
}

/// Errors that can occur when interacting with a session storage backend.
pub mod errors {
    use crate::SessionId;

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorageBackend::create`][super::SessionStorageBackend::create].
    pub enum CreateError {
        /// Failed to serialize the session state.
        #[error("Failed to serialize the session state.")]
        SerializationError(#[from] serde_json::Error),
        #[error(transparent)]
        /// A session with the same ID already exists.
        DuplicateId(#[from] DuplicateIdError),
        #[error(transparent)]
        /// Another session already holds the same value for an attribute
        /// that must be unique across sessions.
        UniqueConflict(#[from] UniqueConflictError),
        #[error(transparent)]
        /// The storage backend failed to process the request.
        Store(#[from] StoreError),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorageBackend::update`][super::SessionStorageBackend::update].
    pub enum UpdateError {
        #[error("Failed to serialize the session state.")]
        /// Failed to serialize the session state.
        SerializationError(#[from] serde_json::Error),
        #[error(transparent)]
        /// There is no session with the given ID.
        UnknownId(#[from] UnknownIdError),
        #[error(transparent)]
        /// The new state claims a unique value that another session already holds.
        UniqueConflict(#[from] UniqueConflictError),
        #[error(transparent)]
        /// The storage backend failed to process the request.
        Store(#[from] StoreError),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorageBackend::load`][super::SessionStorageBackend::load].
    pub enum LoadError {
        #[error("Failed to deserialize the session state.")]
        /// Failed to deserialize the session state.
        DeserializationError(#[from] serde_json::Error),
        #[error(transparent)]
        /// The storage backend failed to process the request.
        Store(#[from] StoreError),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorageBackend::delete`][super::SessionStorageBackend::delete].
    pub enum DeleteError {
        #[error(transparent)]
        /// There is no session with the given ID.
        UnknownId(#[from] UnknownIdError),
        #[error(transparent)]
        /// The storage backend failed to process the request.
        Store(#[from] StoreError),
    }

    #[derive(Debug, thiserror::Error)]
    /// A failure inside the storage backend, unrelated to the preconditions
    /// of the requested operation.
    ///
    /// Backends do not retry: it's up to the caller to decide whether
    /// a [`StoreError::Transient`] failure is worth another attempt.
    pub enum StoreError {
        /// A failure that may go away if the operation is retried, e.g. throttling,
        /// a timeout or a conflicting concurrent transaction.
        #[error("The session storage backend is temporarily unable to process the request.")]
        Transient(#[source] anyhow::Error),
        /// A failure that won't go away by retrying, e.g. a permission error
        /// or a malformed response.
        #[error("The session storage backend failed to process the request.")]
        Fatal(#[source] anyhow::Error),
    }

    impl StoreError {
        /// Returns `true` if retrying the operation may succeed.
        pub fn is_transient(&self) -> bool {
            matches!(self, StoreError::Transient(_))
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("There is no session with the given id")]
    /// There is no session with the given ID.
    pub struct UnknownIdError {
        pub id: SessionId,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("A session with the same ID already exists.")]
    /// A session with the same ID already exists.
    pub struct DuplicateIdError {
        pub id: SessionId,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("Another session already holds `{value}` as its `{attribute}`.")]
    /// Another session already holds the same value for a unique attribute.
    pub struct UniqueConflictError {
        /// The name of the attribute, e.g. `username`.
        pub attribute: String,
        /// The contested value.
        pub value: String,
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by [`SessionRecordRef::from_typed`][super::SessionRecordRef::from_typed].
    pub enum PayloadError {
        #[error("Failed to serialize the session payload.")]
        SerializationError(#[from] serde_json::Error),
        #[error("The session payload must serialize to a JSON object.")]
        NotAnObject,
    }
}
