//! MongoDocumentEngine - MongoDB Adapter
//!
//! TigerStyle: filters and updates map one-to-one onto MongoDB operators.
//!
//! Requires the `mongodb` feature.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson};
use mongodb::error::{ErrorKind, RETRYABLE_WRITE_ERROR};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Document, DocumentEngine, Filter, Update};
use crate::storage::error::{StorageError, StorageResult};

/// Document engine backed by a MongoDB database.
#[derive(Debug)]
pub struct MongoDocumentEngine {
    url: String,
    database: String,
    handle: RwLock<Option<Database>>,
}

impl MongoDocumentEngine {
    /// Create an unconnected engine.
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            handle: RwLock::new(None),
        }
    }

    async fn collection(&self, name: &str) -> StorageResult<Collection<bson::Document>> {
        self.handle
            .read()
            .await
            .as_ref()
            .map(|db| db.collection(name))
            .ok_or(StorageError::NotConnected)
    }
}

#[async_trait]
impl DocumentEngine for MongoDocumentEngine {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    async fn connect(&self) -> StorageResult<()> {
        let client = Client::with_uri_str(&self.url)
            .await
            .map_err(|err| mongo_error("connect", err))?;
        let database = client.database(&self.database);
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|err| mongo_error("ping", err))?;

        *self.handle.write().await = Some(database);
        tracing::debug!(engine = self.name(), database = %self.database, "client connected");
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        self.handle.write().await.take();
        Ok(())
    }

    async fn find(&self, collection: &str, filter: &Filter) -> StorageResult<Vec<Document>> {
        let cursor = self
            .collection(collection)
            .await?
            .find(filter_document(filter)?)
            .await
            .map_err(|err| mongo_error("find", err))?;
        let raw: Vec<bson::Document> = cursor
            .try_collect()
            .await
            .map_err(|err| mongo_error("find", err))?;

        raw.into_iter().map(from_bson_document).collect()
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> StorageResult<Option<Document>> {
        let updated = self
            .collection(collection)
            .await?
            .find_one_and_update(filter_document(filter)?, update_document(update)?)
            .upsert(upsert)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|err| mongo_error("find_one_and_update", err))?;

        updated.map(from_bson_document).transpose()
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> StorageResult<u64> {
        let result = self
            .collection(collection)
            .await?
            .delete_many(filter_document(filter)?)
            .await
            .map_err(|err| mongo_error("delete_many", err))?;
        Ok(result.deleted_count)
    }

    async fn ensure_unique_index(
        &self,
        collection: &str,
        fields: &[&'static str],
    ) -> StorageResult<()> {
        let created = self
            .collection(collection)
            .await?
            .create_index(unique_index_model(fields))
            .await
            .map_err(|err| mongo_error("create_index", err))?;
        tracing::debug!(collection, index = %created.index_name, "unique index ensured");
        Ok(())
    }
}

// =============================================================================
// Conversion
// =============================================================================

fn to_bson(value: &Value) -> StorageResult<Bson> {
    bson::to_bson(value)
        .map_err(|err| StorageError::invalid(format!("value not representable as BSON: {err}")))
}

fn filter_document(filter: &Filter) -> StorageResult<bson::Document> {
    let mut out = bson::Document::new();
    for (field, value) in filter.clauses() {
        out.insert(field.clone(), to_bson(value)?);
    }
    Ok(out)
}

fn update_document(update: &Update) -> StorageResult<bson::Document> {
    let mut out = bson::Document::new();
    for (operator, fields) in [
        ("$set", &update.set),
        ("$setOnInsert", &update.set_on_insert),
        ("$addToSet", &update.add_to_set),
        ("$pull", &update.pull),
    ] {
        if fields.is_empty() {
            continue;
        }
        let mut operand = bson::Document::new();
        for (field, value) in fields {
            operand.insert(field.clone(), to_bson(value)?);
        }
        out.insert(operator, operand);
    }
    Ok(out)
}

/// Ascending unique index over `fields`, in order.
fn unique_index_model(fields: &[&'static str]) -> IndexModel {
    let mut keys = bson::Document::new();
    for field in fields {
        keys.insert(*field, 1_i32);
    }
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

fn from_bson_document(mut raw: bson::Document) -> StorageResult<Document> {
    raw.remove("_id");
    match Bson::Document(raw).into_relaxed_extjson() {
        Value::Object(map) => Ok(map),
        other => Err(StorageError::backend_message(
            "decode_document",
            false,
            format!("document decoded to non-object: {other}"),
        )),
    }
}

fn mongo_error(operation: &'static str, err: mongodb::error::Error) -> StorageError {
    let transient = err.contains_label(RETRYABLE_WRITE_ERROR)
        || matches!(
            *err.kind,
            ErrorKind::Io(_)
                | ErrorKind::ServerSelection { .. }
                | ErrorKind::ConnectionPoolCleared { .. }
        );
    StorageError::backend(operation, transient, err)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::env;

    use serde_json::json;

    use super::*;

    fn test_mongo_url() -> Option<String> {
        env::var("TEST_MONGODB_URL").ok()
    }

    macro_rules! require_mongo {
        () => {
            match test_mongo_url() {
                Some(url) => url,
                None => {
                    eprintln!("Skipping test: TEST_MONGODB_URL not set");
                    return;
                }
            }
        };
    }

    #[test]
    fn test_update_document_skips_empty_operators() {
        let update = Update::new().set("uno", "U1").add_to_set("browserID", "B1");
        let raw = update_document(&update).unwrap();

        assert!(raw.contains_key("$set"));
        assert!(raw.contains_key("$addToSet"));
        assert!(!raw.contains_key("$setOnInsert"));
        assert!(!raw.contains_key("$pull"));
    }

    #[test]
    fn test_filter_document_keeps_arrays() {
        let filter = Filter::new().eq("owner", "alice").eq("browserID", json!([]));
        let raw = filter_document(&filter).unwrap();
        assert_eq!(raw.get_str("owner").unwrap(), "alice");
        assert!(raw.get_array("browserID").unwrap().is_empty());
    }

    #[test]
    fn test_unique_index_model_shape() {
        let model = unique_index_model(&["owner", "browserID"]);
        let keys: Vec<_> = model.keys.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["owner", "browserID"]);
        assert_eq!(model.keys.get_i32("owner").unwrap(), 1);
        assert_eq!(model.options.and_then(|options| options.unique), Some(true));
    }

    #[test]
    fn test_from_bson_strips_id() {
        let raw = doc! { "_id": bson::oid::ObjectId::new(), "owner": "alice", "count": 3_i64 };
        let decoded = from_bson_document(raw).unwrap();
        assert!(!decoded.contains_key("_id"));
        assert_eq!(decoded["owner"], json!("alice"));
        assert_eq!(decoded["count"], json!(3));
    }

    #[tokio::test]
    async fn test_live_upsert_and_pull() {
        let url = require_mongo!();
        let engine = MongoDocumentEngine::new(url, "pushvault_test");
        engine.connect().await.unwrap();

        let collection = "subscriptions_engine_test";
        let filter = Filter::new().eq("owner", "alice").eq("name", "dst-news");
        engine.delete_many(collection, &filter).await.unwrap();

        let doc = engine
            .find_one_and_update(
                collection,
                &filter,
                &Update::new().set("uno", "U1").add_to_set("browserID", "B1"),
                true,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["browserID"], json!(["B1"]));

        let doc = engine
            .find_one_and_update(collection, &filter, &Update::new().pull("browserID", "B1"), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["browserID"], json!([]));

        assert_eq!(engine.delete_many(collection, &filter).await.unwrap(), 1);
        engine.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_live_unique_index_rejects_duplicate() {
        let url = require_mongo!();
        let engine = MongoDocumentEngine::new(url, "pushvault_test");
        engine.connect().await.unwrap();

        let collection = "subscriptions_index_test";
        let by_name = Filter::new().eq("owner", "alice").eq("name", "dst-news");
        engine.delete_many(collection, &by_name).await.unwrap();
        engine
            .ensure_unique_index(collection, &["owner", "name"])
            .await
            .unwrap();
        engine
            .ensure_unique_index(collection, &["owner", "name"])
            .await
            .unwrap();

        engine
            .find_one_and_update(collection, &by_name, &Update::new().set("uno", "U1"), true)
            .await
            .unwrap();
        let miss = by_name.clone().eq("browserID", "B9");
        let err = engine
            .find_one_and_update(collection, &miss, &Update::new().set("uno", "U2"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Backend { .. }));
        assert_eq!(engine.find(collection, &by_name).await.unwrap().len(), 1);

        engine.delete_many(collection, &by_name).await.unwrap();
        engine.disconnect().await.unwrap();
    }
}
