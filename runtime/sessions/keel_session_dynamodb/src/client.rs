//! [`SessionTable`] implementation on top of the AWS SDK.
use crate::table::{FailedCondition, Item, Precondition, SessionTable, TableError, WriteOp};
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::operation::create_table::CreateTableError;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, Delete, KeySchemaElement, KeyType, Put,
    ReturnValuesOnConditionCheckFailure, ScalarAttributeType, TimeToLiveSpecification,
    TransactWriteItem,
};
use std::collections::HashMap;

/// Error codes that signal a failure worth retrying.
const TRANSIENT_CODES: &[&str] = &[
    "TransactionConflict",
    "TransactionInProgressException",
    "ThrottlingException",
    "ThrottlingError",
    "ProvisionedThroughputExceeded",
    "ProvisionedThroughputExceededException",
    "RequestLimitExceeded",
    "InternalServerError",
    "ServiceUnavailable",
];

/// The name of the attribute DynamoDB's native TTL should be enabled on.
pub const TTL_ATTRIBUTE: &str = "ttl";

#[derive(Debug, Clone)]
/// A DynamoDB table, accessed via the AWS SDK.
pub struct DynamoDbTable {
    client: Client,
    table_name: String,
    partition_key: String,
}

impl DynamoDbTable {
    /// Access `table_name`, whose items are keyed by the `partition_key` string attribute.
    pub fn new(client: Client, table_name: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            partition_key: partition_key.into(),
        }
    }

    /// The name of the underlying table.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Create the table, if it doesn't exist, and enable native TTL on it.
    ///
    /// The table uses on-demand capacity. Use your infrastructure-as-code tool of
    /// choice instead if you need finer control over the table settings.
    #[tracing::instrument(name = "Provision DynamoDB session table", level = tracing::Level::INFO, skip_all, fields(table = %self.table_name))]
    pub async fn provision(&self) -> Result<(), TableError> {
        let attribute = AttributeDefinition::builder()
            .attribute_name(&self.partition_key)
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(|e| TableError::Fatal(e.into()))?;
        let key = KeySchemaElement::builder()
            .attribute_name(&self.partition_key)
            .key_type(KeyType::Hash)
            .build()
            .map_err(|e| TableError::Fatal(e.into()))?;
        let created = self
            .client
            .create_table()
            .table_name(&self.table_name)
            .attribute_definitions(attribute)
            .key_schema(key)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await;
        match created {
            Ok(_) => {}
            Err(e) if matches!(e.as_service_error(), Some(CreateTableError::ResourceInUseException(_))) => {
                tracing::debug!("The session table already exists");
                return Ok(());
            }
            Err(e) => return Err(classify(e)),
        }

        let ttl = TimeToLiveSpecification::builder()
            .attribute_name(TTL_ATTRIBUTE)
            .enabled(true)
            .build()
            .map_err(|e| TableError::Fatal(e.into()))?;
        self.client
            .update_time_to_live()
            .table_name(&self.table_name)
            .time_to_live_specification(ttl)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    fn transact_item(&self, op: WriteOp) -> Result<TransactWriteItem, TableError> {
        let item = match op {
            WriteOp::Put { item, precondition } => {
                let mut put = Put::builder()
                    .table_name(&self.table_name)
                    .set_item(Some(item))
                    .return_values_on_condition_check_failure(
                        ReturnValuesOnConditionCheckFailure::AllOld,
                    );
                if let Some(condition) = condition(&self.partition_key, precondition) {
                    put = put
                        .condition_expression(condition.expression)
                        .set_expression_attribute_names(Some(condition.names))
                        .set_expression_attribute_values(condition.values);
                }
                let put = put.build().map_err(|e| TableError::Fatal(e.into()))?;
                TransactWriteItem::builder().put(put).build()
            }
            WriteOp::Delete { key, precondition } => {
                let mut delete = Delete::builder()
                    .table_name(&self.table_name)
                    .key(&self.partition_key, AttributeValue::S(key))
                    .return_values_on_condition_check_failure(
                        ReturnValuesOnConditionCheckFailure::AllOld,
                    );
                if let Some(condition) = condition(&self.partition_key, precondition) {
                    delete = delete
                        .condition_expression(condition.expression)
                        .set_expression_attribute_names(Some(condition.names))
                        .set_expression_attribute_values(condition.values);
                }
                let delete = delete.build().map_err(|e| TableError::Fatal(e.into()))?;
                TransactWriteItem::builder().delete(delete).build()
            }
        };
        Ok(item)
    }
}

/// The condition expression enforcing `precondition`, `None` if there is nothing to enforce.
fn condition(partition_key: &str, precondition: Precondition) -> Option<Condition> {
    let mut names = HashMap::from([("#pk".to_owned(), partition_key.to_owned())]);
    let condition = match precondition {
        Precondition::None => return None,
        Precondition::NotExists => Condition {
            expression: "attribute_not_exists(#pk)".into(),
            names,
            values: None,
        },
        Precondition::Exists => Condition {
            expression: "attribute_exists(#pk)".into(),
            names,
            values: None,
        },
        Precondition::Holds {
            attribute,
            value: None,
        } => {
            names.insert("#attr".into(), attribute);
            Condition {
                expression: "attribute_exists(#pk) AND attribute_not_exists(#attr)".into(),
                names,
                values: None,
            }
        }
        Precondition::Holds {
            attribute,
            value: Some(value),
        } => {
            names.insert("#attr".into(), attribute);
            Condition {
                expression: "attribute_exists(#pk) AND #attr = :expected".into(),
                names,
                values: Some(HashMap::from([(":expected".to_owned(), value)])),
            }
        }
    };
    Some(condition)
}

#[derive(Debug)]
struct Condition {
    expression: String,
    names: HashMap<String, String>,
    values: Option<HashMap<String, AttributeValue>>,
}

#[async_trait::async_trait]
impl SessionTable for DynamoDbTable {
    fn partition_key(&self) -> &str {
        &self.partition_key
    }

    async fn get(&self, key: &str) -> Result<Option<Item>, TableError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(&self.partition_key, AttributeValue::S(key.to_owned()))
            .consistent_read(true)
            .send()
            .await
            .map_err(classify)?;
        Ok(output.item().cloned())
    }

    async fn transact(&self, ops: Vec<WriteOp>) -> Result<(), TableError> {
        let items = ops
            .into_iter()
            .map(|op| self.transact_item(op))
            .collect::<Result<Vec<_>, _>>()?;
        self.client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
            .map_err(classify_transaction)?;
        Ok(())
    }
}

/// Cancellation reasons are positional: the n-th reason belongs to the n-th operation.
fn classify_transaction<R>(e: SdkError<TransactWriteItemsError, R>) -> TableError
where
    SdkError<TransactWriteItemsError, R>: std::error::Error + Send + Sync + 'static,
{
    if let Some(TransactWriteItemsError::TransactionCanceledException(cancelled)) =
        e.as_service_error()
    {
        let reasons = cancelled.cancellation_reasons();
        let failed: Vec<_> = reasons
            .iter()
            .enumerate()
            .filter(|(_, reason)| reason.code() == Some("ConditionalCheckFailed"))
            .map(|(index, reason)| FailedCondition {
                index,
                existing: reason.item().cloned(),
            })
            .collect();
        if !failed.is_empty() {
            return TableError::ConditionFailed(failed);
        }
        let transient = reasons
            .iter()
            .filter_map(|reason| reason.code())
            .any(|code| TRANSIENT_CODES.contains(&code));
        return if transient {
            TableError::Transient(e.into())
        } else {
            TableError::Fatal(e.into())
        };
    }
    classify(e)
}

fn classify<E, R>(e: SdkError<E, R>) -> TableError
where
    E: ProvideErrorMetadata,
    SdkError<E, R>: std::error::Error + Send + Sync + 'static,
{
    let transient = match &e {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => true,
        // A response that can't be parsed won't parse any better on retry.
        SdkError::ResponseError(_) => false,
        SdkError::ServiceError(service) => service
            .err()
            .code()
            .is_some_and(|code| TRANSIENT_CODES.contains(&code)),
        _ => false,
    };
    if transient {
        TableError::Transient(e.into())
    } else {
        TableError::Fatal(e.into())
    }
}
