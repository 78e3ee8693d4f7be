//! DynamoKvEngine - DynamoDB Adapter
//!
//! TigerStyle: thin mapping between items and `AttributeValue`s. No retries
//! here; the backend's call policy owns them.
//!
//! Requires the `dynamodb` feature. Credentials and region come from the
//! ambient AWS configuration unless overridden in [`DynamoSettings`].

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::operation::delete_item::DeleteItemError;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client;
use serde_json::{Number, Value};
use tokio::sync::RwLock;

use super::{AttrMatch, DeleteOutcome, Item, ItemKey, KvEngine, TableSchema};
use crate::storage::error::{StorageError, StorageResult};

type Attributes = HashMap<String, AttributeValue>;

/// Error codes DynamoDB uses for throttling.
const THROTTLING_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "RequestLimitExceeded",
    "ThrottlingException",
];

/// Connection overrides for [`DynamoKvEngine`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamoSettings {
    /// Region override
    pub region: Option<String>,
    /// Endpoint override (DynamoDB Local, LocalStack)
    pub endpoint: Option<String>,
}

/// Key/value engine backed by DynamoDB.
#[derive(Debug)]
pub struct DynamoKvEngine {
    settings: DynamoSettings,
    client: RwLock<Option<Client>>,
}

impl DynamoKvEngine {
    /// Create an unconnected engine.
    #[must_use]
    pub fn new(settings: DynamoSettings) -> Self {
        Self {
            settings,
            client: RwLock::new(None),
        }
    }

    async fn client(&self) -> StorageResult<Client> {
        self.client
            .read()
            .await
            .clone()
            .ok_or(StorageError::NotConnected)
    }
}

#[async_trait]
impl KvEngine for DynamoKvEngine {
    fn name(&self) -> &'static str {
        "dynamodb"
    }

    async fn connect(&self) -> StorageResult<()> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &self.settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &self.settings.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared_config = loader.load().await;
        let client =
            Client::from_conf(aws_sdk_dynamodb::config::Builder::from(&shared_config).build());

        *self.client.write().await = Some(client);
        tracing::debug!(
            engine = self.name(),
            region = ?self.settings.region,
            endpoint = ?self.settings.endpoint,
            "client configured"
        );
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        self.client.write().await.take();
        Ok(())
    }

    async fn get_item(&self, table: &TableSchema, key: &ItemKey) -> StorageResult<Option<Item>> {
        let output = self
            .client()
            .await?
            .get_item()
            .table_name(&table.name)
            .set_key(Some(key_attributes(table, key)))
            .consistent_read(true)
            .send()
            .await
            .map_err(|err| sdk_error("get_item", err))?;

        output.item().map(item_from_attributes).transpose()
    }

    async fn put_item(&self, table: &TableSchema, item: Item) -> StorageResult<()> {
        table.key_of(&item)?;
        self.client()
            .await?
            .put_item()
            .table_name(&table.name)
            .set_item(Some(attributes_from_item(item)))
            .send()
            .await
            .map_err(|err| sdk_error("put_item", err))?;
        Ok(())
    }

    async fn delete_item(
        &self,
        table: &TableSchema,
        key: &ItemKey,
        condition: Option<&AttrMatch>,
    ) -> StorageResult<DeleteOutcome> {
        let mut request = self
            .client()
            .await?
            .delete_item()
            .table_name(&table.name)
            .set_key(Some(key_attributes(table, key)))
            .return_values(ReturnValue::AllOld);
        if let Some(condition) = condition {
            request = request
                .condition_expression("#cond = :cond")
                .expression_attribute_names("#cond", condition.attribute)
                .expression_attribute_values(":cond", AttributeValue::S(condition.value.clone()));
        }

        match request.send().await {
            Ok(output) => Ok(match output.attributes() {
                Some(old) if !old.is_empty() => DeleteOutcome::Deleted,
                _ => DeleteOutcome::Missing,
            }),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(DeleteItemError::is_conditional_check_failed_exception)
                {
                    // Either missing or held by another value; tell them apart.
                    return Ok(match self.get_item(table, key).await? {
                        Some(_) => DeleteOutcome::ConditionFailed,
                        None => DeleteOutcome::Missing,
                    });
                }
                Err(sdk_error("delete_item", err))
            }
        }
    }

    async fn query(
        &self,
        table: &TableSchema,
        partition: &str,
        filter: Option<&AttrMatch>,
    ) -> StorageResult<Vec<Item>> {
        let client = self.client().await?;
        let mut items = Vec::new();
        let mut start_key: Option<Attributes> = None;

        loop {
            let mut request = client
                .query()
                .table_name(&table.name)
                .key_condition_expression("#pk = :pk")
                .expression_attribute_names("#pk", table.partition_key)
                .expression_attribute_values(":pk", AttributeValue::S(partition.to_string()))
                .consistent_read(true)
                .set_exclusive_start_key(start_key.take());
            if let Some(filter) = filter {
                request = request
                    .filter_expression("#filter = :filter")
                    .expression_attribute_names("#filter", filter.attribute)
                    .expression_attribute_values(
                        ":filter",
                        AttributeValue::S(filter.value.clone()),
                    );
            }

            let output = request.send().await.map_err(|err| sdk_error("query", err))?;
            for attributes in output.items() {
                items.push(item_from_attributes(attributes)?);
            }
            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        Ok(items)
    }
}

// =============================================================================
// Conversion
// =============================================================================

fn key_attributes(table: &TableSchema, key: &ItemKey) -> Attributes {
    HashMap::from([
        (
            table.partition_key.to_string(),
            AttributeValue::S(key.partition.clone()),
        ),
        (table.sort_key.to_string(), AttributeValue::S(key.sort.clone())),
    ])
}

fn attributes_from_item(item: Item) -> Attributes {
    item.into_iter()
        .map(|(name, value)| (name, attribute_from_value(value)))
        .collect()
}

fn attribute_from_value(value: Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s),
        Value::Array(values) => {
            AttributeValue::L(values.into_iter().map(attribute_from_value).collect())
        }
        Value::Object(map) => AttributeValue::M(attributes_from_item(map)),
    }
}

fn item_from_attributes(attributes: &Attributes) -> StorageResult<Item> {
    attributes
        .iter()
        .map(|(name, attribute)| Ok((name.clone(), value_from_attribute(attribute)?)))
        .collect()
}

fn value_from_attribute(attribute: &AttributeValue) -> StorageResult<Value> {
    Ok(match attribute {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => Value::Number(parse_number(n)?),
        AttributeValue::L(values) => Value::Array(
            values
                .iter()
                .map(value_from_attribute)
                .collect::<StorageResult<_>>()?,
        ),
        AttributeValue::M(map) => Value::Object(item_from_attributes(map)?),
        other => {
            return Err(StorageError::backend_message(
                "decode_item",
                false,
                format!("unsupported attribute type: {other:?}"),
            ))
        }
    })
}

fn parse_number(raw: &str) -> StorageResult<Number> {
    if let Ok(n) = raw.parse::<i64>() {
        return Ok(n.into());
    }
    if let Ok(n) = raw.parse::<u64>() {
        return Ok(n.into());
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| {
            StorageError::backend_message("decode_item", false, format!("invalid number: {raw}"))
        })
}

fn sdk_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(_) => err
            .code()
            .is_some_and(|code| THROTTLING_CODES.contains(&code)),
        _ => false,
    };
    StorageError::Backend {
        operation,
        message: DisplayErrorContext(&err).to_string(),
        transient,
        source: Some(Box::new(err)),
    }
}

// =============================================================================
// Tests
// =============================================================================
