//! Key/Value Storage - Engine Seam and Backend
//!
//! TigerStyle: the backend owns consistency; engines only move items.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      KeyValueBackend                         │
//! │  preferences │ webpush │ subscriptions │ subscriptions-by-  │
//! │  (owner,name)│(owner,  │ (owner, name) │ browser            │
//! │              │ browser)│  canonical    │ (name, owner+      │
//! │              │         │               │  browser)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              ↓ KvEngine
//!          ┌────────────────────┴────────────────────┐
//! ┌────────┴────────┐                       ┌────────┴────────┐
//! │ MemoryKvEngine  │                       │ DynamoKvEngine  │
//! │   (testing)     │                       │  (production)   │
//! └─────────────────┘                       └─────────────────┘
//! ```

mod backend;
mod memory;

#[cfg(feature = "dynamodb")]
mod dynamo;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::error::{StorageError, StorageResult};

pub use backend::{KeyValueBackend, KeyValueTables};
pub use memory::MemoryKvEngine;

#[cfg(feature = "dynamodb")]
pub use dynamo::{DynamoKvEngine, DynamoSettings};

/// A stored item: attribute name to JSON value.
pub type Item = Map<String, Value>;

// =============================================================================
// Table Addressing
// =============================================================================

/// Physical table name and its composite key attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name
    pub name: String,
    /// Partition (hash) key attribute
    pub partition_key: &'static str,
    /// Sort (range) key attribute
    pub sort_key: &'static str,
}

impl TableSchema {
    /// Create a schema.
    pub fn new(
        name: impl Into<String>,
        partition_key: &'static str,
        sort_key: &'static str,
    ) -> Self {
        Self {
            name: name.into(),
            partition_key,
            sort_key,
        }
    }

    /// Extract the key of an item.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if either key attribute is missing or not a string.
    pub fn key_of(&self, item: &Item) -> StorageResult<ItemKey> {
        let attr = |name: &'static str| {
            item.get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    StorageError::invalid(format!(
                        "item for table {} is missing string key attribute {name}",
                        self.name
                    ))
                })
        };
        Ok(ItemKey {
            partition: attr(self.partition_key)?,
            sort: attr(self.sort_key)?,
        })
    }
}

/// Composite primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    /// Partition key value
    pub partition: String,
    /// Sort key value
    pub sort: String,
}

impl ItemKey {
    /// Create a key.
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

/// Equality condition on a string attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrMatch {
    /// Attribute name
    pub attribute: &'static str,
    /// Required value
    pub value: String,
}

impl AttrMatch {
    /// Create a condition.
    pub fn new(attribute: &'static str, value: impl Into<String>) -> Self {
        Self {
            attribute,
            value: value.into(),
        }
    }

    /// Whether an item satisfies the condition.
    #[must_use]
    pub fn matches(&self, item: &Item) -> bool {
        item.get(self.attribute).and_then(Value::as_str) == Some(self.value.as_str())
    }
}

/// Outcome of a single-item delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The item existed and was removed.
    Deleted,
    /// No item had this key.
    Missing,
    /// The item exists but failed the condition; nothing was removed.
    ConditionFailed,
}

// =============================================================================
// KvEngine
// =============================================================================

/// A table-per-entity key/value store with composite keys.
///
/// Every single-item operation is atomic. Queries return items of one
/// partition in sort-key order.
#[async_trait]
pub trait KvEngine: Send + Sync + std::fmt::Debug {
    /// Engine label for logs.
    fn name(&self) -> &'static str;

    /// Establish the client.
    async fn connect(&self) -> StorageResult<()>;

    /// Release the client.
    async fn disconnect(&self) -> StorageResult<()>;

    /// Fetch one item by key.
    async fn get_item(&self, table: &TableSchema, key: &ItemKey) -> StorageResult<Option<Item>>;

    /// Insert or replace one item.
    async fn put_item(&self, table: &TableSchema, item: Item) -> StorageResult<()>;

    /// Delete one item, optionally only if `condition` holds.
    async fn delete_item(
        &self,
        table: &TableSchema,
        key: &ItemKey,
        condition: Option<&AttrMatch>,
    ) -> StorageResult<DeleteOutcome>;

    /// All items in `partition`, optionally filtered, in sort-key order.
    async fn query(
        &self,
        table: &TableSchema,
        partition: &str,
        filter: Option<&AttrMatch>,
    ) -> StorageResult<Vec<Item>>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_key_of() {
        let schema = TableSchema::new("subs-by-browser", "name", "browserID");
        let mut item = Item::new();
        item.insert("name".to_string(), json!("market-news"));
        item.insert("browserID".to_string(), json!("B1"));
        item.insert("owner".to_string(), json!("alice"));

        assert_eq!(schema.key_of(&item).unwrap(), ItemKey::new("market-news", "B1"));

        item.remove("browserID");
        assert!(schema.key_of(&item).is_err());
    }

    #[test]
    fn test_attr_match() {
        let mut item = Item::new();
        item.insert("owner".to_string(), json!("alice"));

        assert!(AttrMatch::new("owner", "alice").matches(&item));
        assert!(!AttrMatch::new("owner", "bob").matches(&item));
        assert!(!AttrMatch::new("name", "alice").matches(&item));
    }
}
