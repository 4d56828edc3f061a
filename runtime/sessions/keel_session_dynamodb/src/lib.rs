//! A DynamoDB session store for `keel_session`.
//!
//! # Table layout
//!
//! Every session is stored as a single item, keyed by its ID
//! (the `session_id` string attribute, by default). Each entry of the session
//! state becomes a top-level attribute of the item. The `ttl` attribute holds
//! the expiration deadline, in seconds since the Unix epoch: enable DynamoDB's
//! native TTL on it to get expired sessions cleaned up automatically.
//!
//! # Uniqueness
//!
//! At most one session at a time can hold a given value for the unique attribute
//! (`username`, by default). Whenever a session holds one, the store writes a
//! second item, keyed `<attribute>#<value>` (e.g. `username#alice`), in the same
//! conditional transaction as the session item itself.
//! The transaction is rejected if the key is already taken.
mod client;
pub mod codec;
mod local;
mod table;

pub use client::{DynamoDbTable, TTL_ATTRIBUTE};
pub use local::LocalTable;
pub use table::{FailedCondition, Item, Precondition, SessionTable, TableError, WriteOp};

use aws_sdk_dynamodb::types::AttributeValue;
use jiff::Timestamp;
use keel_session::{
    SessionId,
    store::{
        SessionRecord, SessionRecordRef, SessionStorageBackend,
        errors::{
            CreateError, DeleteError, DuplicateIdError, LoadError, StoreError, UniqueConflictError,
            UnknownIdError, UpdateError,
        },
    },
};
use std::{collections::HashMap, time::Duration};

/// The attribute of a uniqueness record pointing back at the session that holds it.
const OWNER_ATTRIBUTE: &str = "owner";

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure how [`DynamoDbSessionStore`] connects to DynamoDB.
pub struct DynamoDbSessionStoreConfig {
    /// The name of the table where session records are stored.
    pub table_name: String,
    /// The AWS region. The default provider chain is used if unset.
    #[serde(default)]
    pub region: Option<String>,
    /// The AWS profile to load credentials from.
    #[serde(default)]
    pub profile_name: Option<String>,
    /// Override the DynamoDB endpoint, e.g. `http://localhost:8000` for DynamoDB Local.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// The name of the partition key attribute.
    #[serde(default = "default_partition_key")]
    pub partition_key: String,
    /// The session state entry that must be unique across sessions.
    #[serde(default = "default_unique_attribute")]
    pub unique_attribute: String,
}

fn default_partition_key() -> String {
    "session_id".into()
}

fn default_unique_attribute() -> String {
    "username".into()
}

impl DynamoDbSessionStoreConfig {
    /// Default settings for the given table.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            region: None,
            profile_name: None,
            endpoint_url: None,
            partition_key: default_partition_key(),
            unique_attribute: default_unique_attribute(),
        }
    }
}

#[derive(Debug, Clone)]
/// A server-side session store using DynamoDB as its backend.
///
/// # Implementation details
///
/// Every write is a single conditional transaction covering the session item
/// and, if needed, its uniqueness records: concurrent writers can't break
/// the uniqueness constraint, whoever commits first wins.
/// The store never retries: transient failures are returned as
/// [`StoreError::Transient`].
///
/// Use [`LocalTable`] as the table to run the same logic fully in memory.
pub struct DynamoDbSessionStore<T = DynamoDbTable> {
    table: T,
    unique_attribute: String,
}

impl DynamoDbSessionStore<DynamoDbTable> {
    /// Load the AWS configuration from the environment, applying the overrides
    /// in `config`, and build a store on top of it.
    #[tracing::instrument(name = "Connect to DynamoDB", level = tracing::Level::INFO, skip_all)]
    pub async fn connect(config: &DynamoDbSessionStoreConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(profile_name) = &config.profile_name {
            loader = loader.profile_name(profile_name);
        }
        if let Some(endpoint_url) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        let sdk_config = loader.load().await;
        Self::new(aws_sdk_dynamodb::Client::new(&sdk_config), config)
    }

    /// Creates a new DynamoDB session store instance on top of an existing client.
    pub fn new(client: aws_sdk_dynamodb::Client, config: &DynamoDbSessionStoreConfig) -> Self {
        let table = DynamoDbTable::new(client, &config.table_name, &config.partition_key);
        Self::with_table(table, &config.unique_attribute)
    }
}

impl<T: SessionTable> DynamoDbSessionStore<T> {
    /// Build a store on top of any [`SessionTable`].
    pub fn with_table(table: T, unique_attribute: impl Into<String>) -> Self {
        Self {
            table,
            unique_attribute: unique_attribute.into(),
        }
    }

    /// The table session records are stored in.
    pub fn table(&self) -> &T {
        &self.table
    }

    /// The key of the uniqueness record for `value`.
    pub fn unique_key(&self, value: &str) -> String {
        format!("{}#{value}", self.unique_attribute)
    }

    fn unique_value(&self, state: &HashMap<String, serde_json::Value>) -> Option<String> {
        match state.get(&self.unique_attribute) {
            Some(serde_json::Value::String(value)) => Some(value.clone()),
            _ => None,
        }
    }

    fn session_item(
        &self,
        id: &SessionId,
        record: &SessionRecordRef<'_>,
        deadline: i64,
    ) -> Result<Item, StoreError> {
        let partition_key = self.table.partition_key();
        if let Some(reserved) = [partition_key, TTL_ATTRIBUTE]
            .into_iter()
            .find(|k| record.state.contains_key(*k))
        {
            return Err(StoreError::Fatal(anyhow::anyhow!(
                "`{reserved}` is reserved by the session store, it can't be used as a session state key"
            )));
        }
        let mut item = codec::to_item(&record.state);
        item.insert(
            partition_key.to_owned(),
            AttributeValue::S(id.storage_key()),
        );
        item.insert(TTL_ATTRIBUTE.to_owned(), AttributeValue::N(deadline.to_string()));
        Ok(item)
    }

    fn unique_item(&self, id: &SessionId, value: &str, deadline: i64) -> Item {
        Item::from([
            (
                self.table.partition_key().to_owned(),
                AttributeValue::S(self.unique_key(value)),
            ),
            (
                OWNER_ATTRIBUTE.to_owned(),
                AttributeValue::S(id.storage_key()),
            ),
            (
                TTL_ATTRIBUTE.to_owned(),
                AttributeValue::N(deadline.to_string()),
            ),
        ])
    }

    fn conflict(&self, value: String) -> UniqueConflictError {
        UniqueConflictError {
            attribute: self.unique_attribute.clone(),
            value,
        }
    }
}

/// The deadline of a record created now, in seconds since the Unix epoch.
fn deadline(ttl: Duration) -> i64 {
    let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    Timestamp::now().as_second().saturating_add(ttl)
}

fn remaining_ttl(item: &Item) -> Result<Duration, StoreError> {
    let deadline = item
        .get(TTL_ATTRIBUTE)
        .and_then(|ttl| ttl.as_n().ok())
        .and_then(|ttl| ttl.parse::<i64>().ok())
        .ok_or_else(|| {
            StoreError::Fatal(anyhow::anyhow!(
                "The session record has no valid `{TTL_ATTRIBUTE}` attribute"
            ))
        })?;
    let remaining = deadline.saturating_sub(Timestamp::now().as_second());
    Ok(Duration::from_secs(remaining.try_into().unwrap_or(0)))
}

#[async_trait::async_trait]
impl<T> SessionStorageBackend for DynamoDbSessionStore<T>
where
    T: SessionTable,
{
    /// Creates a new session record in the store using the provided ID.
    ///
    /// If the state holds a value for the unique attribute, the matching
    /// uniqueness record is created in the same transaction.
    #[tracing::instrument(name = "Create server-side session record", level = tracing::Level::INFO, skip_all)]
    async fn create(
        &self,
        id: &SessionId,
        record: SessionRecordRef<'_>,
    ) -> Result<(), CreateError> {
        let deadline = deadline(record.ttl);
        let unique_value = self.unique_value(&record.state);
        let mut ops = vec![WriteOp::Put {
            item: self.session_item(id, &record, deadline)?,
            precondition: Precondition::NotExists,
        }];
        if let Some(value) = &unique_value {
            ops.push(WriteOp::Put {
                item: self.unique_item(id, value, deadline),
                precondition: Precondition::NotExists,
            });
        }

        match self.table.transact(ops).await {
            Ok(()) => Ok(()),
            Err(TableError::ConditionFailed(failed)) => {
                if failed.iter().any(|f| f.index == 0) {
                    return Err(DuplicateIdError { id: *id }.into());
                }
                match unique_value {
                    Some(value) => Err(self.conflict(value).into()),
                    None => Err(StoreError::Fatal(TableError::ConditionFailed(failed).into()).into()),
                }
            }
            Err(e) => Err(StoreError::from(e).into()),
        }
    }

    /// Update the state of an existing session in the store.
    ///
    /// It overwrites the existing record with the provided one. Uniqueness records
    /// are claimed, released or refreshed in the same transaction.
    #[tracing::instrument(name = "Update server-side session record", level = tracing::Level::INFO, skip_all)]
    async fn update(
        &self,
        id: &SessionId,
        record: SessionRecordRef<'_>,
    ) -> Result<(), UpdateError> {
        let key = id.storage_key();
        let Some(current) = self.table.get(&key).await.map_err(StoreError::from)? else {
            return Err(UnknownIdError { id: *id }.into());
        };
        let previous_attribute = current.get(&self.unique_attribute).cloned();
        let previous = previous_attribute
            .as_ref()
            .and_then(|v| v.as_s().ok())
            .cloned();
        let next = self.unique_value(&record.state);

        let deadline = deadline(record.ttl);
        // The session item can only be written if its unique value is still the one
        // we read: the uniqueness records below are derived from it.
        let mut ops = vec![WriteOp::Put {
            item: self.session_item(id, &record, deadline)?,
            precondition: Precondition::Holds {
                attribute: self.unique_attribute.clone(),
                value: previous_attribute,
            },
        }];
        let mut claim = None;
        match (&previous, &next) {
            (Some(previous), Some(next)) if previous == next => {
                ops.push(WriteOp::Put {
                    item: self.unique_item(id, next, deadline),
                    precondition: Precondition::Holds {
                        attribute: OWNER_ATTRIBUTE.into(),
                        value: Some(AttributeValue::S(key.clone())),
                    },
                });
            }
            _ => {
                if let Some(next) = &next {
                    claim = Some(ops.len());
                    ops.push(WriteOp::Put {
                        item: self.unique_item(id, next, deadline),
                        precondition: Precondition::NotExists,
                    });
                }
                if let Some(previous) = &previous {
                    ops.push(WriteOp::Delete {
                        key: self.unique_key(previous),
                        precondition: Precondition::None,
                    });
                }
            }
        }

        let failed = match self.table.transact(ops).await {
            Ok(()) => return Ok(()),
            Err(TableError::ConditionFailed(failed)) => failed,
            Err(e) => return Err(StoreError::from(e).into()),
        };
        if let Some(session) = failed.iter().find(|f| f.index == 0) {
            return if session.existing.is_none() {
                Err(UnknownIdError { id: *id }.into())
            } else {
                Err(StoreError::Transient(anyhow::anyhow!(
                    "The session record was modified concurrently"
                ))
                .into())
            };
        }
        if let (Some(claim), Some(next)) = (claim, next) {
            if failed.iter().any(|f| f.index == claim) {
                return Err(self.conflict(next).into());
            }
        }
        Err(StoreError::Fatal(anyhow::anyhow!(
            "The uniqueness record for the session is missing or held by another session"
        ))
        .into())
    }

    /// Loads an existing session record from the store using the provided ID.
    ///
    /// The read is strongly consistent. Records that expired but haven't been
    /// swept by DynamoDB yet are returned with a zero TTL.
    #[tracing::instrument(name = "Load server-side session record", level = tracing::Level::INFO, skip_all)]
    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionRecord>, LoadError> {
        let Some(mut item) = self
            .table
            .get(&session_id.storage_key())
            .await
            .map_err(StoreError::from)?
        else {
            return Ok(None);
        };
        let ttl = remaining_ttl(&item)?;
        item.remove(self.table.partition_key());
        item.remove(TTL_ATTRIBUTE);
        let state = codec::from_item(&item).map_err(|e| StoreError::Fatal(e.into()))?;
        Ok(Some(SessionRecord { state, ttl }))
    }

    /// Deletes a session record, together with its uniqueness record, from the store.
    #[tracing::instrument(name = "Delete server-side session record", level = tracing::Level::INFO, skip_all)]
    async fn delete(&self, id: &SessionId) -> Result<(), DeleteError> {
        let key = id.storage_key();
        let Some(current) = self.table.get(&key).await.map_err(StoreError::from)? else {
            return Err(UnknownIdError { id: *id }.into());
        };
        let unique_attribute = current.get(&self.unique_attribute).cloned();
        let unique_key = unique_attribute
            .as_ref()
            .and_then(|v| v.as_s().ok())
            .map(|v| self.unique_key(v));

        let mut ops = vec![WriteOp::Delete {
            key,
            precondition: Precondition::Holds {
                attribute: self.unique_attribute.clone(),
                value: unique_attribute,
            },
        }];
        if let Some(unique_key) = unique_key {
            ops.push(WriteOp::Delete {
                key: unique_key,
                precondition: Precondition::None,
            });
        }

        match self.table.transact(ops).await {
            Ok(()) => Ok(()),
            Err(TableError::ConditionFailed(failed)) => {
                let gone = failed
                    .iter()
                    .any(|f| f.index == 0 && f.existing.is_none());
                if gone {
                    Err(UnknownIdError { id: *id }.into())
                } else {
                    Err(StoreError::Transient(anyhow::anyhow!(
                        "The session record was modified concurrently"
                    ))
                    .into())
                }
            }
            Err(e) => Err(StoreError::from(e).into()),
        }
    }
}
