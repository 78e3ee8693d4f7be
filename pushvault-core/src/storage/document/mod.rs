//! Document Storage - Engine Seam and Backend
//!
//! TigerStyle: one document per record, browser lists embedded as arrays.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DocumentBackend                         │
//! │  preferences        │ webpush            │ subscriptions      │
//! │  {owner,name}       │ {owner,browserID}  │ {owner,name,       │
//! │                     │                    │  browserID: [..]}  │
//! └─────────────────────────────────────────────────────────────┘
//!                              ↓ DocumentEngine
//!          ┌────────────────────┴────────────────────┐
//! ┌────────┴────────────┐                 ┌──────────┴──────────┐
//! │ MemoryDocumentEngine│                 │ MongoDocumentEngine │
//! │     (testing)       │                 │    (production)     │
//! └─────────────────────┘                 └─────────────────────┘
//! ```

mod backend;
mod memory;

#[cfg(feature = "mongodb")]
mod mongo;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::error::{StorageError, StorageResult};

pub use backend::DocumentBackend;
pub use memory::MemoryDocumentEngine;

#[cfg(feature = "mongodb")]
pub use mongo::MongoDocumentEngine;

/// A stored document: field name to JSON value.
pub type Document = Map<String, Value>;

// =============================================================================
// Filter
// =============================================================================

/// Conjunction of equality clauses.
///
/// A scalar clause against an array field matches when the array contains the
/// value. An array clause matches only an identical array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    /// Empty filter (matches everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality clause.
    #[must_use]
    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.clauses.push((field.to_string(), value.into()));
        self
    }

    /// Clauses in insertion order.
    #[must_use]
    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    /// Whether a document satisfies every clause.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|(field, expected)| {
            match (doc.get(field), expected) {
                (None, expected) => expected.is_null(),
                (Some(actual), Value::Array(_)) => actual == expected,
                (Some(Value::Array(items)), expected) => items.contains(expected),
                (Some(actual), expected) => actual == expected,
            }
        })
    }

    /// Fields an upsert copies into a newly inserted document.
    fn seed_document(&self) -> Document {
        self.clauses
            .iter()
            .filter(|(_, value)| !value.is_array())
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    }
}

// =============================================================================
// Update
// =============================================================================

/// Field update operators applied atomically to one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    /// `$set`
    pub set: Document,
    /// `$setOnInsert`
    pub set_on_insert: Document,
    /// `$addToSet`
    pub add_to_set: Document,
    /// `$pull`
    pub pull: Document,
}

impl Update {
    /// Empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a field.
    #[must_use]
    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set.insert(field.to_string(), value.into());
        self
    }

    /// Set a field only when the update inserts.
    #[must_use]
    pub fn set_on_insert(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set_on_insert.insert(field.to_string(), value.into());
        self
    }

    /// Append to an array field unless already present.
    #[must_use]
    pub fn add_to_set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.add_to_set.insert(field.to_string(), value.into());
        self
    }

    /// Remove every occurrence of a value from an array field.
    #[must_use]
    pub fn pull(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.pull.insert(field.to_string(), value.into());
        self
    }

    /// Apply the operators to `doc`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if an array operator targets a non-array field.
    pub fn apply(&self, doc: &mut Document, inserting: bool) -> StorageResult<()> {
        for (field, value) in &self.set {
            doc.insert(field.clone(), value.clone());
        }
        if inserting {
            for (field, value) in &self.set_on_insert {
                doc.insert(field.clone(), value.clone());
            }
        }
        for (field, value) in &self.add_to_set {
            let slot = doc
                .entry(field.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            let Value::Array(items) = slot else {
                return Err(non_array(field));
            };
            if !items.contains(value) {
                items.push(value.clone());
            }
        }
        for (field, value) in &self.pull {
            match doc.get_mut(field) {
                None => {}
                Some(Value::Array(items)) => items.retain(|item| item != value),
                Some(_) => return Err(non_array(field)),
            }
        }
        Ok(())
    }
}

fn non_array(field: &str) -> StorageError {
    StorageError::invalid(format!("array operator applied to non-array field {field}"))
}

// =============================================================================
// DocumentEngine
// =============================================================================

/// A collection-per-entity document store with equality filters.
///
/// Single-document updates are atomic.
#[async_trait]
pub trait DocumentEngine: Send + Sync + std::fmt::Debug {
    /// Engine label for logs.
    fn name(&self) -> &'static str;

    /// Establish the client.
    async fn connect(&self) -> StorageResult<()>;

    /// Release the client.
    async fn disconnect(&self) -> StorageResult<()>;

    /// Every document matching `filter`.
    async fn find(&self, collection: &str, filter: &Filter) -> StorageResult<Vec<Document>>;

    /// Update the first document matching `filter`, or insert one built from
    /// the filter's scalar clauses when `upsert` is set.
    ///
    /// Returns the document after the update, or `None` if nothing matched and
    /// nothing was inserted.
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> StorageResult<Option<Document>>;

    /// Delete every document matching `filter`; returns the count removed.
    async fn delete_many(&self, collection: &str, filter: &Filter) -> StorageResult<u64>;

    /// Ensure a unique index over `fields` exists on `collection`.
    ///
    /// Idempotent. Once it exists, an upsert that would insert a second
    /// document with the same field values fails instead.
    async fn ensure_unique_index(
        &self,
        collection: &str,
        fields: &[&'static str],
    ) -> StorageResult<()>;
}
