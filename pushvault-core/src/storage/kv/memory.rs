//! MemoryKvEngine - In-Process Key/Value Store
//!
//! TigerStyle: same semantics as the production engine, plus seeded fault
//! injection for simulation tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{AttrMatch, DeleteOutcome, Item, ItemKey, KvEngine, TableSchema};
use crate::dst::{FaultInjector, FaultType};
use crate::storage::error::{StorageError, StorageResult};

/// Key/value engine backed by ordered in-memory maps.
#[derive(Debug, Default)]
pub struct MemoryKvEngine {
    tables: RwLock<HashMap<String, BTreeMap<ItemKey, Item>>>,
    faults: Option<Arc<FaultInjector>>,
}

impl MemoryKvEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a fault injector.
    #[must_use]
    pub fn with_faults(mut self, faults: Arc<FaultInjector>) -> Self {
        self.faults = Some(faults);
        self
    }

    /// Number of items in a table.
    pub async fn item_count(&self, table: &str) -> usize {
        self.tables.read().await.get(table).map_or(0, BTreeMap::len)
    }

    async fn check_fault(
        &self,
        fault_type: FaultType,
        operation: &'static str,
    ) -> StorageResult<()> {
        let Some(faults) = &self.faults else {
            return Ok(());
        };
        if faults.should_inject(FaultType::StorageStall) {
            // Held until the caller's timeout fires.
            std::future::pending::<()>().await;
        }
        if faults.should_inject(fault_type) {
            return Err(StorageError::backend_message(operation, true, "injected fault"));
        }
        Ok(())
    }
}

#[async_trait]
impl KvEngine for MemoryKvEngine {
    fn name(&self) -> &'static str {
        "memory-kv"
    }

    async fn connect(&self) -> StorageResult<()> {
        tracing::debug!(engine = self.name(), "connected");
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        tracing::debug!(engine = self.name(), "disconnected");
        Ok(())
    }

    async fn get_item(&self, table: &TableSchema, key: &ItemKey) -> StorageResult<Option<Item>> {
        self.check_fault(FaultType::StorageReadFail, "get_item").await?;

        let tables = self.tables.read().await;
        Ok(tables.get(&table.name).and_then(|rows| rows.get(key)).cloned())
    }

    async fn put_item(&self, table: &TableSchema, item: Item) -> StorageResult<()> {
        self.check_fault(FaultType::StorageWriteFail, "put_item").await?;

        let key = table.key_of(&item)?;
        let mut tables = self.tables.write().await;
        tables.entry(table.name.clone()).or_default().insert(key, item);
        Ok(())
    }

    async fn delete_item(
        &self,
        table: &TableSchema,
        key: &ItemKey,
        condition: Option<&AttrMatch>,
    ) -> StorageResult<DeleteOutcome> {
        self.check_fault(FaultType::StorageDeleteFail, "delete_item").await?;

        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(&table.name) else {
            return Ok(DeleteOutcome::Missing);
        };
        let Some(existing) = rows.get(key) else {
            return Ok(DeleteOutcome::Missing);
        };
        if let Some(condition) = condition {
            if !condition.matches(existing) {
                return Ok(DeleteOutcome::ConditionFailed);
            }
        }
        rows.remove(key);
        Ok(DeleteOutcome::Deleted)
    }

    async fn query(
        &self,
        table: &TableSchema,
        partition: &str,
        filter: Option<&AttrMatch>,
    ) -> StorageResult<Vec<Item>> {
        self.check_fault(FaultType::StorageReadFail, "query").await?;

        let tables = self.tables.read().await;
        let Some(rows) = tables.get(&table.name) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|(key, _)| key.partition == partition)
            .map(|(_, item)| item)
            .filter(|item| filter.map_or(true, |f| f.matches(item)))
            .cloned()
            .collect())
    }
}
