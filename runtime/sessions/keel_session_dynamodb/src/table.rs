//! The storage primitive the session store is built on.
use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;

/// A single DynamoDB item: attribute names mapped to their values.
pub type Item = HashMap<String, AttributeValue>;

/// A key-value table supporting strongly consistent point reads and
/// atomic, conditional multi-item writes.
///
/// [`DynamoDbTable`](crate::DynamoDbTable) talks to DynamoDB,
/// [`LocalTable`](crate::LocalTable) keeps everything in memory.
#[async_trait::async_trait]
pub trait SessionTable: std::fmt::Debug + Send + Sync {
    /// The name of the string attribute every item is keyed by.
    fn partition_key(&self) -> &str;

    /// Read the item stored under `key`, if any.
    ///
    /// The read must reflect every transaction that completed before it started.
    async fn get(&self, key: &str) -> Result<Option<Item>, TableError>;

    /// Apply all operations or none of them.
    ///
    /// If any precondition doesn't hold, nothing is written and
    /// [`TableError::ConditionFailed`] lists every failed operation.
    async fn transact(&self, ops: Vec<WriteOp>) -> Result<(), TableError>;
}

#[derive(Debug, Clone)]
/// One operation inside a transaction.
pub enum WriteOp {
    /// Store `item`, replacing whatever was stored under the same key.
    Put {
        item: Item,
        precondition: Precondition,
    },
    /// Remove the item stored under `key`.
    ///
    /// Deleting a missing item is not an error, unless the precondition says otherwise.
    Delete {
        key: String,
        precondition: Precondition,
    },
}

#[derive(Debug, Clone, PartialEq)]
/// A condition on the current state of the item targeted by a [`WriteOp`].
pub enum Precondition {
    /// No condition.
    None,
    /// There must be no item under the same key.
    NotExists,
    /// There must be an item under the same key.
    Exists,
    /// There must be an item under the same key and its `attribute` must be
    /// equal to `value`, or missing if `value` is `None`.
    Holds {
        attribute: String,
        value: Option<AttributeValue>,
    },
}

impl Precondition {
    pub(crate) fn is_met_by(&self, existing: Option<&Item>) -> bool {
        match (self, existing) {
            (Precondition::None, _) => true,
            (Precondition::NotExists, existing) => existing.is_none(),
            (_, None) => false,
            (Precondition::Exists, Some(_)) => true,
            (Precondition::Holds { attribute, value }, Some(item)) => {
                item.get(attribute) == value.as_ref()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// An operation whose precondition didn't hold.
pub struct FailedCondition {
    /// The position of the operation in the transaction.
    pub index: usize,
    /// The item as it was stored when the transaction was evaluated.
    pub existing: Option<Item>,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
/// The error returned by [`SessionTable`] operations.
pub enum TableError {
    #[error("The transaction was rejected: {} precondition(s) didn't hold", .0.len())]
    ConditionFailed(Vec<FailedCondition>),
    #[error("The table is temporarily unable to process the request")]
    Transient(#[source] anyhow::Error),
    #[error("The table failed to process the request")]
    Fatal(#[source] anyhow::Error),
}

impl From<TableError> for keel_session::store::errors::StoreError {
    fn from(e: TableError) -> Self {
        use keel_session::store::errors::StoreError;
        match e {
            TableError::Transient(e) => StoreError::Transient(e),
            TableError::Fatal(e) => StoreError::Fatal(e),
            e @ TableError::ConditionFailed(_) => StoreError::Fatal(e.into()),
        }
    }
}
