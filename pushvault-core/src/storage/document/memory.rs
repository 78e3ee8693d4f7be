//! MemoryDocumentEngine - In-Process Document Store
//!
//! TigerStyle: same filter and update semantics as the production engine,
//! plus seeded fault injection for simulation tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Document, DocumentEngine, Filter, Update};
use crate::dst::{FaultInjector, FaultType};
use crate::storage::error::{StorageError, StorageResult};

/// Document engine backed by in-memory vectors, one per collection.
#[derive(Debug, Default)]
pub struct MemoryDocumentEngine {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    unique_indexes: RwLock<HashMap<String, Vec<Vec<&'static str>>>>,
    faults: Option<Arc<FaultInjector>>,
}

impl MemoryDocumentEngine {
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

    /// Number of documents in a collection.
    pub async fn document_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Unique indexes declared on a collection, in creation order.
    pub async fn unique_indexes(&self, collection: &str) -> Vec<Vec<&'static str>> {
        self.unique_indexes
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Fail if `candidate` repeats the key of a document in `docs` under any
    /// unique index of `collection`.
    async fn check_unique(
        &self,
        collection: &str,
        docs: &[Document],
        candidate: &Document,
    ) -> StorageResult<()> {
        let indexes = self.unique_indexes.read().await;
        for fields in indexes.get(collection).into_iter().flatten() {
            let key = index_key(candidate, fields);
            if docs.iter().any(|doc| index_key(doc, fields) == key) {
                return Err(StorageError::backend_message(
                    "find_one_and_update",
                    false,
                    format!("duplicate key on {collection} {fields:?}"),
                ));
            }
        }
        Ok(())
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
            std::future::pending::<()>().await;
        }
        if faults.should_inject(fault_type) {
            return Err(StorageError::backend_message(operation, true, "injected fault"));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentEngine for MemoryDocumentEngine {
    fn name(&self) -> &'static str {
        "memory-document"
    }

    async fn connect(&self) -> StorageResult<()> {
        tracing::debug!(engine = self.name(), "connected");
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        tracing::debug!(engine = self.name(), "disconnected");
        Ok(())
    }

    async fn find(&self, collection: &str, filter: &Filter) -> StorageResult<Vec<Document>> {
        self.check_fault(FaultType::StorageReadFail, "find").await?;

        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|doc| filter.matches(doc)).cloned().collect())
            .unwrap_or_default())
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> StorageResult<Option<Document>> {
        self.check_fault(FaultType::StorageWriteFail, "find_one_and_update")
            .await?;

        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();

        if let Some(existing) = docs.iter_mut().find(|doc| filter.matches(doc)) {
            // Apply to a copy so a failed operator leaves the document intact.
            let mut next = existing.clone();
            update.apply(&mut next, false)?;
            *existing = next.clone();
            return Ok(Some(next));
        }

        if !upsert {
            return Ok(None);
        }
        let mut inserted = filter.seed_document();
        update.apply(&mut inserted, true)?;
        self.check_unique(collection, docs, &inserted).await?;
        docs.push(inserted.clone());
        Ok(Some(inserted))
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> StorageResult<u64> {
        self.check_fault(FaultType::StorageDeleteFail, "delete_many").await?;

        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|doc| !filter.matches(doc));
        Ok((before - docs.len()) as u64)
    }

    async fn ensure_unique_index(
        &self,
        collection: &str,
        fields: &[&'static str],
    ) -> StorageResult<()> {
        let collections = self.collections.read().await;
        let docs = collections.get(collection).map_or(&[][..], Vec::as_slice);
        for (i, doc) in docs.iter().enumerate() {
            let key = index_key(doc, fields);
            if docs[i + 1..].iter().any(|other| index_key(other, fields) == key) {
                return Err(StorageError::backend_message(
                    "ensure_unique_index",
                    false,
                    format!("existing documents in {collection} repeat {fields:?}"),
                ));
            }
        }

        let mut indexes = self.unique_indexes.write().await;
        let declared = indexes.entry(collection.to_string()).or_default();
        if !declared.iter().any(|existing| existing.as_slice() == fields) {
            declared.push(fields.to_vec());
        }
        Ok(())
    }
}

/// Values of `fields` in `doc`; a missing field indexes as null.
fn index_key<'a>(doc: &'a Document, fields: &[&'static str]) -> Vec<&'a Value> {
    fields
        .iter()
        .map(|field| doc.get(*field).unwrap_or(&Value::Null))
        .collect()
}
