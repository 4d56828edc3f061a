//! An in-process [`SessionTable`].
use crate::table::{FailedCondition, Item, SessionTable, TableError, WriteOp};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// The maximum number of operations DynamoDB accepts in a single transaction.
const MAX_TRANSACTION_SIZE: usize = 100;

#[derive(Clone)]
/// A [`SessionTable`] that keeps its items in memory.
///
/// Transactions are all-or-nothing and their preconditions are evaluated
/// atomically, just like DynamoDB does.
/// Useful for tests and local development.
///
/// # Limitations
///
/// Items are never evicted: expired items stay around until they are deleted.
pub struct LocalTable {
    partition_key: String,
    items: Arc<Mutex<HashMap<String, Item>>>,
}

impl std::fmt::Debug for LocalTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTable")
            .field("partition_key", &self.partition_key)
            .finish_non_exhaustive()
    }
}

impl LocalTable {
    /// An empty table whose items are keyed by the `partition_key` attribute.
    pub fn new(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            items: Default::default(),
        }
    }

    /// The number of items in the table.
    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    /// `true` if the table holds no items.
    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// The keys of every item in the table, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.items.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn key_of<'a>(&self, op: &'a WriteOp) -> Result<&'a str, TableError> {
        match op {
            WriteOp::Put { item, .. } => self.item_key(item),
            WriteOp::Delete { key, .. } => Ok(key),
        }
    }

    fn item_key<'a>(&self, item: &'a Item) -> Result<&'a str, TableError> {
        item.get(&self.partition_key)
            .and_then(|key| key.as_s().ok())
            .map(String::as_str)
            .ok_or_else(|| {
                TableError::Fatal(anyhow::anyhow!(
                    "The item is missing its `{}` string attribute",
                    self.partition_key
                ))
            })
    }
}

#[async_trait::async_trait]
impl SessionTable for LocalTable {
    fn partition_key(&self) -> &str {
        &self.partition_key
    }

    async fn get(&self, key: &str) -> Result<Option<Item>, TableError> {
        Ok(self.items.lock().await.get(key).cloned())
    }

    async fn transact(&self, ops: Vec<WriteOp>) -> Result<(), TableError> {
        if ops.is_empty() || ops.len() > MAX_TRANSACTION_SIZE {
            return Err(TableError::Fatal(anyhow::anyhow!(
                "A transaction must contain between 1 and {MAX_TRANSACTION_SIZE} operations, got {}",
                ops.len()
            )));
        }
        let mut keys = HashSet::with_capacity(ops.len());
        for op in &ops {
            let key = self.key_of(op)?;
            if !keys.insert(key) {
                return Err(TableError::Fatal(anyhow::anyhow!(
                    "A transaction can't include multiple operations on `{key}`"
                )));
            }
        }

        let mut items = self.items.lock().await;
        let mut failed = Vec::new();
        for (index, op) in ops.iter().enumerate() {
            let precondition = match op {
                WriteOp::Put { precondition, .. } | WriteOp::Delete { precondition, .. } => {
                    precondition
                }
            };
            let existing = items.get(self.key_of(op)?);
            if !precondition.is_met_by(existing) {
                failed.push(FailedCondition {
                    index,
                    existing: existing.cloned(),
                });
            }
        }
        if !failed.is_empty() {
            return Err(TableError::ConditionFailed(failed));
        }

        for op in ops {
            match op {
                WriteOp::Put { item, .. } => {
                    let key = self.item_key(&item)?.to_owned();
                    items.insert(key, item);
                }
                WriteOp::Delete { key, .. } => {
                    items.remove(&key);
                }
            }
        }
        Ok(())
    }
}
