//! DocumentBackend - Embedded Browser Arrays
//!
//! TigerStyle: every write is one atomic single-document operation.
//!
//! A subscription is one document per `(owner, name)` carrying a `browserID`
//! array, so there is no second table to keep in step. Stores use
//! `$addToSet` for the browser, scoped deletes use `$pull`, and a document
//! whose array becomes empty is removed.
//!
//! `connect` ensures a unique index on each collection's key, so concurrent
//! upserts of one key cannot insert two documents.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{Document, DocumentEngine, Filter, Update};
use crate::clock::{Clock, SystemClock};
use crate::config::TableNames;
use crate::storage::backend::StorageBackend;
use crate::storage::entity::{
    from_map, validate_owner, PreferencesDocument, Selector, Subscription, SubscriptionDocument,
    SubscriptionRemoval, UserPreferences, WebPushDocument, WebPushRegistration,
};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::policy::{CallPolicy, Lifecycle};

const FIELD_OWNER: &str = "owner";
const FIELD_NAME: &str = "name";
const FIELD_BROWSER_ID: &str = "browserID";

/// Storage backend over a [`DocumentEngine`].
#[derive(Debug)]
pub struct DocumentBackend {
    engine: Arc<dyn DocumentEngine>,
    collections: TableNames,
    clock: Arc<dyn Clock>,
    policy: CallPolicy,
    lifecycle: Lifecycle,
}

impl DocumentBackend {
    /// Create an unconnected backend using the system clock and default policy.
    #[must_use]
    pub fn new(engine: Arc<dyn DocumentEngine>, names: &TableNames) -> Self {
        Self {
            engine,
            collections: names.clone(),
            clock: Arc::new(SystemClock),
            policy: CallPolicy::default(),
            lifecycle: Lifecycle::default(),
        }
    }

    /// Use a different clock (for DST).
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different call policy.
    #[must_use]
    pub fn with_policy(mut self, policy: CallPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Each collection with the fields that identify one document.
    fn unique_keys(&self) -> [(&str, [&'static str; 2]); 3] {
        [
            (self.collections.preferences.as_str(), [FIELD_OWNER, FIELD_NAME]),
            (self.collections.web_push.as_str(), [FIELD_OWNER, FIELD_BROWSER_ID]),
            (self.collections.subscriptions.as_str(), [FIELD_OWNER, FIELD_NAME]),
        ]
    }

    fn now(&self) -> StorageResult<Value> {
        Ok(serde_json::to_value(self.clock.now())?)
    }

    // -------------------------------------------------------------------------
    // Engine calls under the call policy
    // -------------------------------------------------------------------------

    async fn find(&self, collection: &str, filter: &Filter) -> StorageResult<Vec<Document>> {
        let engine = &self.engine;
        self.policy
            .run("find", move || engine.find(collection, filter))
            .await
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> StorageResult<Option<Document>> {
        let engine = &self.engine;
        self.policy
            .run("find_one_and_update", move || {
                engine.find_one_and_update(collection, filter, update, upsert)
            })
            .await
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> StorageResult<u64> {
        let engine = &self.engine;
        self.policy
            .run("delete_many", move || engine.delete_many(collection, filter))
            .await
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    /// Decode and order by `sort_field`.
    fn decode_sorted<T: DeserializeOwned>(
        docs: Vec<Document>,
        sort_field: &str,
    ) -> StorageResult<Vec<T>> {
        let mut docs = docs;
        docs.sort_by(|a, b| sort_key(a, sort_field).cmp(&sort_key(b, sort_field)));
        docs.into_iter().map(from_map).collect()
    }

    async fn read_owned<T>(
        &self,
        collection: &str,
        key_field: &str,
        entity: &'static str,
        owner: &str,
        selector: &Selector,
    ) -> StorageResult<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let mut filter = Filter::new().eq(FIELD_OWNER, owner);
        if let Selector::Key(key) = selector {
            filter = filter.eq(key_field, key.as_str());
        }
        let docs = self.find(collection, &filter).await?;
        if docs.is_empty() {
            if let Selector::Key(key) = selector {
                return Err(StorageError::not_found(entity, format!("{owner}/{key}")));
            }
        }
        Self::decode_sorted(docs, key_field)
    }

    async fn delete_owned(
        &self,
        collection: &str,
        key_field: &str,
        entity: &'static str,
        owner: &str,
        selector: &Selector,
    ) -> StorageResult<usize> {
        let mut filter = Filter::new().eq(FIELD_OWNER, owner);
        if let Selector::Key(key) = selector {
            filter = filter.eq(key_field, key.as_str());
        }
        let deleted = self.delete_many(collection, &filter).await?;
        if deleted == 0 {
            if let Selector::Key(key) = selector {
                return Err(StorageError::not_found(entity, format!("{owner}/{key}")));
            }
        }
        usize::try_from(deleted).map_err(|_| StorageError::invalid("delete count overflow"))
    }

    fn decode_subscription(doc: Document) -> StorageResult<Subscription> {
        let mut subscription: Subscription = from_map(doc)?;
        subscription.browser_ids.sort();
        Ok(subscription)
    }

    /// Detach `browser_id` from one named subscription.
    async fn remove_subscription(
        &self,
        owner: &str,
        name: &str,
        browser_id: &Selector,
    ) -> StorageResult<SubscriptionRemoval> {
        let collection = &self.collections.subscriptions;
        let by_name = Filter::new().eq(FIELD_OWNER, owner).eq(FIELD_NAME, name);

        match browser_id {
            Selector::Key(browser) => {
                let filter = by_name.clone().eq(FIELD_BROWSER_ID, browser.as_str());
                let update = Update::new().pull(FIELD_BROWSER_ID, browser.as_str());
                let doc = self
                    .find_one_and_update(collection, &filter, &update, false)
                    .await?
                    .ok_or_else(|| {
                        StorageError::not_found(
                            "subscription browser",
                            format!("{owner}/{name}/{browser}"),
                        )
                    })?;

                let remaining = Self::decode_subscription(doc)?.browser_ids;
                if remaining.is_empty() {
                    let emptied = by_name.eq(FIELD_BROWSER_ID, Value::Array(Vec::new()));
                    let removed = self.delete_many(collection, &emptied).await?;
                    tracing::debug!(
                        owner,
                        name,
                        removed,
                        "last browser detached; subscription removed"
                    );
                }
                Ok(SubscriptionRemoval {
                    name: name.to_string(),
                    remaining,
                })
            }
            Selector::All => {
                let deleted = self.delete_many(collection, &by_name).await?;
                if deleted == 0 {
                    return Err(StorageError::not_found("subscription", format!("{owner}/{name}")));
                }

                // Remainder is read back from the collection after the delete.
                let mut remaining: Vec<String> = Vec::new();
                for doc in self.find(collection, &by_name).await? {
                    remaining.extend(Self::decode_subscription(doc)?.browser_ids);
                }
                remaining.sort();
                tracing::debug!(
                    owner,
                    name,
                    remaining = remaining.len(),
                    "subscription cascade-deleted"
                );
                Ok(SubscriptionRemoval {
                    name: name.to_string(),
                    remaining,
                })
            }
        }
    }
}

fn sort_key<'a>(doc: &'a Document, field: &str) -> Option<&'a str> {
    doc.get(field).and_then(Value::as_str)
}

fn upsert_missing(operation: &'static str) -> StorageError {
    StorageError::backend_message(operation, false, "upsert returned no document")
}

// =============================================================================
// StorageBackend Implementation
// =============================================================================

#[async_trait]
impl StorageBackend for DocumentBackend {
    fn name(&self) -> &'static str {
        "document"
    }

    async fn connect(&self) -> StorageResult<()> {
        self.engine.connect().await?;
        for (collection, fields) in self.unique_keys() {
            self.engine.ensure_unique_index(collection, &fields).await?;
        }
        self.lifecycle.set_connected(true);
        tracing::info!(backend = self.name(), engine = self.engine.name(), "storage connected");
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        self.lifecycle.set_connected(false);
        self.engine.disconnect().await?;
        tracing::info!(backend = self.name(), engine = self.engine.name(), "storage disconnected");
        Ok(())
    }

    async fn store_user_preferences(
        &self,
        doc: &PreferencesDocument,
    ) -> StorageResult<UserPreferences> {
        self.lifecycle.ensure_connected()?;
        doc.validate()?;

        let filter = Filter::new()
            .eq(FIELD_OWNER, doc.owner.as_str())
            .eq(FIELD_NAME, doc.name.as_str());
        let update = Update::new()
            .set("preferences", doc.preferences.clone())
            .set("updated", self.now()?);
        let stored = self
            .find_one_and_update(&self.collections.preferences, &filter, &update, true)
            .await?
            .ok_or_else(|| upsert_missing("store_user_preferences"))?;

        tracing::debug!(owner = %doc.owner, name = %doc.name, "stored user preferences");
        from_map(stored)
    }

    async fn get_user_preferences(
        &self,
        owner: &str,
        name: &Selector,
    ) -> StorageResult<Vec<UserPreferences>> {
        self.lifecycle.ensure_connected()?;
        validate_owner(owner)?;
        name.validate("name")?;

        self.read_owned(&self.collections.preferences, FIELD_NAME, "user preferences", owner, name)
            .await
    }

    async fn delete_user_preferences(&self, owner: &str, name: &Selector) -> StorageResult<usize> {
        self.lifecycle.ensure_connected()?;
        validate_owner(owner)?;
        name.validate("name")?;

        let deleted = self
            .delete_owned(
                &self.collections.preferences,
                FIELD_NAME,
                "user preferences",
                owner,
                name,
            )
            .await?;
        tracing::debug!(owner, name = %name, deleted, "deleted user preferences");
        Ok(deleted)
    }

    async fn find_push_registrations(
        &self,
        owner: &str,
        browser_id: &Selector,
    ) -> StorageResult<Vec<WebPushRegistration>> {
        self.lifecycle.ensure_connected()?;
        validate_owner(owner)?;
        browser_id.validate("browserID")?;

        self.read_owned(
            &self.collections.web_push,
            FIELD_BROWSER_ID,
            "web push registration",
            owner,
            browser_id,
        )
        .await
    }

    async fn store_web_push_registration(
        &self,
        doc: &WebPushDocument,
    ) -> StorageResult<WebPushRegistration> {
        self.lifecycle.ensure_connected()?;
        doc.validate()?;

        let now = self.now()?;
        let filter = Filter::new()
            .eq(FIELD_OWNER, doc.owner.as_str())
            .eq(FIELD_BROWSER_ID, doc.browser_id.as_str());
        let update = Update::new()
            .set("apiKeys", serde_json::to_value(&doc.api_keys)?)
            .set("subscription", serde_json::to_value(&doc.subscription)?)
            .set("updated", now.clone())
            .set_on_insert("created", now);
        let stored = self
            .find_one_and_update(&self.collections.web_push, &filter, &update, true)
            .await?
            .ok_or_else(|| upsert_missing("store_web_push_registration"))?;

        tracing::debug!(
            owner = %doc.owner,
            browser_id = %doc.browser_id,
            "stored web push registration"
        );
        from_map(stored)
    }

    async fn update_web_push_registration(
        &self,
        doc: &WebPushDocument,
    ) -> StorageResult<WebPushRegistration> {
        self.lifecycle.ensure_connected()?;
        doc.validate()?;

        let filter = Filter::new()
            .eq(FIELD_OWNER, doc.owner.as_str())
            .eq(FIELD_BROWSER_ID, doc.browser_id.as_str());
        let update = Update::new()
            .set("apiKeys", serde_json::to_value(&doc.api_keys)?)
            .set("subscription", serde_json::to_value(&doc.subscription)?)
            .set("updated", self.now()?);
        let stored = self
            .find_one_and_update(&self.collections.web_push, &filter, &update, false)
            .await?
            .ok_or_else(|| {
                StorageError::not_found(
                    "web push registration",
                    format!("{}/{}", doc.owner, doc.browser_id),
                )
            })?;

        tracing::debug!(
            owner = %doc.owner,
            browser_id = %doc.browser_id,
            "updated web push registration"
        );
        from_map(stored)
    }

    async fn delete_web_push_registrations(
        &self,
        owner: &str,
        browser_id: &Selector,
    ) -> StorageResult<usize> {
        self.lifecycle.ensure_connected()?;
        validate_owner(owner)?;
        browser_id.validate("browserID")?;

        let deleted = self
            .delete_owned(
                &self.collections.web_push,
                FIELD_BROWSER_ID,
                "web push registration",
                owner,
                browser_id,
            )
            .await?;
        tracing::debug!(owner, browser_id = %browser_id, deleted, "deleted web push registrations");
        Ok(deleted)
    }

    async fn get_subscriptions(&self, owner: &str) -> StorageResult<Vec<Subscription>> {
        self.lifecycle.ensure_connected()?;
        validate_owner(owner)?;

        let mut docs = self
            .find(&self.collections.subscriptions, &Filter::new().eq(FIELD_OWNER, owner))
            .await?;
        docs.sort_by(|a, b| sort_key(a, FIELD_NAME).cmp(&sort_key(b, FIELD_NAME)));
        docs.into_iter().map(Self::decode_subscription).collect()
    }

    async fn get_subscription(
        &self,
        owner: &str,
        name: &Selector,
    ) -> StorageResult<Vec<Subscription>> {
        self.lifecycle.ensure_connected()?;
        validate_owner(owner)?;
        name.validate("name")?;

        let Selector::Key(key) = name else {
            return self.get_subscriptions(owner).await;
        };
        let filter = Filter::new().eq(FIELD_OWNER, owner).eq(FIELD_NAME, key.as_str());
        let doc = self
            .find(&self.collections.subscriptions, &filter)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::not_found("subscription", format!("{owner}/{key}")))?;
        Ok(vec![Self::decode_subscription(doc)?])
    }

    async fn store_subscription(&self, doc: &SubscriptionDocument) -> StorageResult<Subscription> {
        self.lifecycle.ensure_connected()?;
        doc.validate()?;

        let now = self.now()?;
        let filter = Filter::new()
            .eq(FIELD_OWNER, doc.owner.as_str())
            .eq(FIELD_NAME, doc.name.as_str());
        let update = Update::new()
            .set("uno", doc.uno.as_str())
            .set("subscription", doc.subscription.clone())
            .set("updated", now.clone())
            .set_on_insert("created", now)
            .add_to_set(FIELD_BROWSER_ID, doc.browser_id.as_str());
        let stored = self
            .find_one_and_update(&self.collections.subscriptions, &filter, &update, true)
            .await?
            .ok_or_else(|| upsert_missing("store_subscription"))?;

        tracing::debug!(
            owner = %doc.owner,
            name = %doc.name,
            browser_id = %doc.browser_id,
            "stored subscription"
        );
        Self::decode_subscription(stored)
    }

    async fn delete_subscription(
        &self,
        owner: &str,
        name: &Selector,
        browser_id: &Selector,
    ) -> StorageResult<Vec<SubscriptionRemoval>> {
        self.lifecycle.ensure_connected()?;
        validate_owner(owner)?;
        name.validate("name")?;
        browser_id.validate("browserID")?;

        let Selector::Key(name) = name else {
            let mut filter = Filter::new().eq(FIELD_OWNER, owner);
            if let Selector::Key(browser) = browser_id {
                filter = filter.eq(FIELD_BROWSER_ID, browser.as_str());
            }
            let mut names = self
                .find(&self.collections.subscriptions, &filter)
                .await?
                .iter()
                .filter_map(|doc| sort_key(doc, FIELD_NAME).map(str::to_string))
                .collect::<Vec<_>>();
            names.sort();

            let mut removals = Vec::with_capacity(names.len());
            for name in &names {
                match self.remove_subscription(owner, name, browser_id).await {
                    Ok(removal) => removals.push(removal),
                    // Raced with another delete of the same browser.
                    Err(err) if err.is_not_found() && !browser_id.is_all() => {}
                    Err(err) => return Err(err),
                }
            }
            if removals.is_empty() {
                if let Selector::Key(browser) = browser_id {
                    return Err(StorageError::not_found(
                        "subscription browser",
                        format!("{owner}/ALL/{browser}"),
                    ));
                }
            }
            return Ok(removals);
        };

        Ok(vec![self.remove_subscription(owner, name, browser_id).await?])
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::dst::{DeterministicRng, FaultInjector, FaultType, SimClock};
    use crate::storage::document::MemoryDocumentEngine;
    use crate::storage::entity::{ApiKeys, PushKeys, PushSubscription};
    use crate::storage::error::ErrorKind;

    struct Harness {
        backend: DocumentBackend,
        engine: Arc<MemoryDocumentEngine>,
        clock: Arc<SimClock>,
    }

    async fn harness_with(engine: MemoryDocumentEngine) -> Harness {
        let engine = Arc::new(engine);
        let clock = Arc::new(SimClock::new());
        let backend =
            DocumentBackend::new(engine.clone(), &TableNames::default()).with_clock(clock.clone());
        backend.connect().await.unwrap();
        Harness {
            backend,
            engine,
            clock,
        }
    }

    async fn harness() -> Harness {
        harness_with(MemoryDocumentEngine::new()).await
    }

    fn web_push(owner: &str, browser: &str, endpoint: &str) -> WebPushDocument {
        WebPushDocument {
            owner: owner.to_string(),
            browser_id: browser.to_string(),
            api_keys: ApiKeys {
                public_key: "BPub".to_string(),
                private_key: "priv".to_string(),
            },
            subscription: PushSubscription {
                endpoint: endpoint.to_string(),
                keys: PushKeys {
                    auth: "auth".to_string(),
                    p256dh: "p256".to_string(),
                },
            },
        }
    }

    async fn subscription_docs(h: &Harness) -> usize {
        h.engine.document_count("subscriptions").await
    }

    #[tokio::test]
    async fn test_not_connected() {
        let backend =
            DocumentBackend::new(Arc::new(MemoryDocumentEngine::new()), &TableNames::default());
        let err = backend
            .get_user_preferences("alice", &Selector::All)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_preferences_round_trip_and_delete_all() {
        let h = harness().await;
        let default = PreferencesDocument::new("alice", "default", json!({"lang": "en"}));
        let stored = h.backend.store_user_preferences(&default).await.unwrap();
        let mobile = PreferencesDocument::new("alice", "mobile", json!({"lang": "fr"}));
        h.backend.store_user_preferences(&mobile).await.unwrap();

        let one = h
            .backend
            .get_user_preferences("alice", &Selector::from("default"))
            .await
            .unwrap();
        assert_eq!(one, vec![stored]);

        let all = h.backend.get_user_preferences("alice", &Selector::All).await.unwrap();
        let names: Vec<_> = all.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["default", "mobile"]);

        assert_eq!(h.backend.delete_user_preferences("alice", &Selector::All).await.unwrap(), 2);
        assert!(h.backend.get_user_preferences("alice", &Selector::All).await.unwrap().is_empty());
        let err = h
            .backend
            .delete_user_preferences("alice", &Selector::from("default"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_connect_ensures_unique_indexes() {
        let h = harness().await;
        let names = TableNames::default();

        assert_eq!(
            h.engine.unique_indexes(&names.preferences).await,
            vec![vec!["owner", "name"]]
        );
        assert_eq!(
            h.engine.unique_indexes(&names.web_push).await,
            vec![vec!["owner", "browserID"]]
        );
        assert_eq!(
            h.engine.unique_indexes(&names.subscriptions).await,
            vec![vec!["owner", "name"]]
        );

        // Reconnecting leaves a single index per collection.
        h.backend.connect().await.unwrap();
        assert_eq!(h.engine.unique_indexes(&names.subscriptions).await.len(), 1);
    }

    #[tokio::test]
    async fn test_preferences_not_found() {
        let h = harness().await;
        let err = h
            .backend
            .get_user_preferences("alice", &Selector::from("nonexistent"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = h
            .backend
            .delete_user_preferences("alice", &Selector::from("nonexistent"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert!(h.backend.get_user_preferences("alice", &Selector::All).await.unwrap().is_empty());
        assert_eq!(h.backend.delete_user_preferences("alice", &Selector::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_web_push_update_requires_existing() {
        let h = harness().await;
        let err = h
            .backend
            .update_web_push_registration(&web_push("alice", "B1", "https://push.example/1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(h.engine.document_count(&TableNames::default().web_push).await, 0);

        let err = h
            .backend
            .find_push_registrations("alice", &Selector::from("B1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_web_push_delete_scoped_and_all() {
        let h = harness().await;
        for browser in ["B3", "B1", "B2"] {
            h.backend
                .store_web_push_registration(&web_push("alice", browser, "https://push.example"))
                .await
                .unwrap();
        }
        h.backend
            .store_web_push_registration(&web_push("bob", "B1", "https://push.example"))
            .await
            .unwrap();

        let all = h.backend.find_push_registrations("alice", &Selector::All).await.unwrap();
        let browsers: Vec<_> = all.iter().map(|r| r.browser_id.as_str()).collect();
        assert_eq!(browsers, vec!["B1", "B2", "B3"]);

        assert_eq!(
            h.backend
                .delete_web_push_registrations("alice", &Selector::from("B2"))
                .await
                .unwrap(),
            1
        );
        let err = h
            .backend
            .delete_web_push_registrations("alice", &Selector::from("B2"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(
            h.backend
                .delete_web_push_registrations("alice", &Selector::All)
                .await
                .unwrap(),
            2
        );
        assert!(h
            .backend
            .find_push_registrations("alice", &Selector::All)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            h.backend
                .find_push_registrations("bob", &Selector::from("B1"))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_web_push_created_is_immutable() {
        let h = harness().await;
        let first = h
            .backend
            .store_web_push_registration(&web_push("alice", "B1", "https://push.example/1"))
            .await
            .unwrap();
        h.clock.advance_ms(2_000);
        let second = h
            .backend
            .store_web_push_registration(&web_push("alice", "B1", "https://push.example/2"))
            .await
            .unwrap();
        assert_eq!(second.created, first.created);
        assert!(second.updated > first.updated);

        h.clock.advance_ms(2_000);
        let third = h
            .backend
            .update_web_push_registration(&web_push("alice", "B1", "https://push.example/3"))
            .await
            .unwrap();
        assert_eq!(third.created, first.created);
        assert_eq!(third.subscription.endpoint, "https://push.example/3");

        let err = h
            .backend
            .update_web_push_registration(&web_push("alice", "B9", "https://push.example"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_market_news_scenario() {
        let h = harness().await;
        h.backend
            .store_subscription(&SubscriptionDocument::new("alice", "market-news", "U1", "B1"))
            .await
            .unwrap();
        let stored = h
            .backend
            .store_subscription(&SubscriptionDocument::new("alice", "market-news", "U1", "B2"))
            .await
            .unwrap();
        assert_eq!(stored.browser_ids, vec!["B1", "B2"]);
        assert_eq!(subscription_docs(&h).await, 1);

        let removals = h
            .backend
            .delete_subscription("alice", &Selector::from("market-news"), &Selector::from("B1"))
            .await
            .unwrap();
        assert_eq!(removals[0].remaining, vec!["B2"]);

        let subs = h
            .backend
            .get_subscription("alice", &Selector::from("market-news"))
            .await
            .unwrap();
        assert_eq!(subs[0].browser_ids, vec!["B2"]);
        assert_eq!(subs[0].uno, "U1");
    }

    #[tokio::test]
    async fn test_store_preserves_created() {
        let h = harness().await;
        let first = h
            .backend
            .store_subscription(&SubscriptionDocument::new("alice", "market-news", "U1", "B1"))
            .await
            .unwrap();
        h.clock.advance_ms(30_000);
        let second = h
            .backend
            .store_subscription(&SubscriptionDocument::new("alice", "market-news", "U2", "B1"))
            .await
            .unwrap();

        assert_eq!(second.created, first.created);
        assert!(second.updated > first.updated);
        assert_eq!(second.uno, "U2");
        assert_eq!(second.browser_ids, vec!["B1"]);
    }

    #[tokio::test]
    async fn test_scoped_delete_of_last_browser_removes_document() {
        let h = harness().await;
        h.backend
            .store_subscription(&SubscriptionDocument::new("alice", "market-news", "U1", "B1"))
            .await
            .unwrap();

        let removals = h
            .backend
            .delete_subscription("alice", &Selector::from("market-news"), &Selector::from("B1"))
            .await
            .unwrap();
        assert!(removals[0].remaining.is_empty());
        assert_eq!(subscription_docs(&h).await, 0);

        let err = h
            .backend
            .delete_subscription("alice", &Selector::from("market-news"), &Selector::from("B1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_cascading_delete_remainder_is_empty() {
        let h = harness().await;
        for browser in ["B1", "B2"] {
            let doc = SubscriptionDocument::new("alice", "market-news", "U1", browser);
            h.backend.store_subscription(&doc).await.unwrap();
        }

        let removals = h
            .backend
            .delete_subscription("alice", &Selector::from("market-news"), &Selector::All)
            .await
            .unwrap();
        assert_eq!(removals.len(), 1);
        assert!(removals[0].remaining.is_empty());

        let err = h
            .backend
            .delete_subscription("alice", &Selector::from("market-news"), &Selector::All)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_browser_from_every_subscription() {
        let h = harness().await;
        let pairs = [("news", "B1"), ("news", "B2"), ("sports", "B1"), ("weather", "B2")];
        for (name, browser) in pairs {
            h.backend
                .store_subscription(&SubscriptionDocument::new("alice", name, "U1", browser))
                .await
                .unwrap();
        }

        let removals = h
            .backend
            .delete_subscription("alice", &Selector::All, &Selector::from("B1"))
            .await
            .unwrap();
        let names: Vec<_> = removals.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["news", "sports"]);

        let subs = h.backend.get_subscriptions("alice").await.unwrap();
        let names: Vec<_> = subs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["news", "weather"]);

        let removals = h
            .backend
            .delete_subscription("alice", &Selector::All, &Selector::All)
            .await
            .unwrap();
        assert_eq!(removals.len(), 2);
        assert_eq!(subscription_docs(&h).await, 0);
    }

    #[tokio::test]
    async fn test_write_fault_leaves_no_partial_state() {
        let faults = FaultInjector::builder(DeterministicRng::new(21))
            .fail_nth(FaultType::StorageWriteFail, 1)
            .build();
        let h = harness_with(MemoryDocumentEngine::new().with_faults(Arc::new(faults))).await;
        let doc = SubscriptionDocument::new("alice", "market-news", "U1", "B1");

        let err = h.backend.store_subscription(&doc).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert!(h.backend.get_subscriptions("alice").await.unwrap().is_empty());

        let stored = h.backend.store_subscription(&doc).await.unwrap();
        assert_eq!(stored.browser_ids, vec!["B1"]);
    }

    #[tokio::test]
    async fn test_sentinel_is_not_a_real_key() {
        let h = harness().await;
        let err = h
            .backend
            .store_subscription(&SubscriptionDocument::new("alice", "market-news", "U1", "ALL"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(subscription_docs(&h).await, 0);
    }
}
