//! KeyValueBackend - Canonical Tables plus Browser Index
//!
//! TigerStyle: dual writes are ordered and idempotent.
//!
//! A subscription lives in two tables:
//!
//! - `subscriptions`, keyed `(owner, name)`: the canonical record.
//! - `subscriptions-by-browser`, keyed `(name, ownerBrowser)` with `owner` and
//!   `browserID` attributes: one row per subscribed browser. The sort key is
//!   qualified by owner, so owners sharing a browser ID get separate rows.
//!
//! The tables are written with independent single-item calls. A store writes
//! the canonical record first and then repairs the index with
//! insert-if-absent, so re-running a store after a partial failure converges.
//! A scoped delete removes the index row first and drops the canonical record
//! only once no browser is left.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::{AttrMatch, DeleteOutcome, Item, ItemKey, KvEngine, TableSchema};
use crate::clock::{Clock, SystemClock};
use crate::config::TableNames;
use crate::storage::backend::StorageBackend;
use crate::storage::entity::{
    from_map, to_map, validate_owner, BrowserIndexEntry, PreferencesDocument, Selector,
    Subscription, SubscriptionDocument, SubscriptionRecord, SubscriptionRemoval, UserPreferences,
    WebPushDocument, WebPushRegistration,
};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::policy::{CallPolicy, Lifecycle};

const ATTR_OWNER: &str = "owner";
const ATTR_NAME: &str = "name";
const ATTR_BROWSER_ID: &str = "browserID";
const ATTR_OWNER_BROWSER: &str = "ownerBrowser";

// =============================================================================
// Tables
// =============================================================================

/// The four physical tables and their key layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValueTables {
    /// `(owner, name)`
    pub preferences: TableSchema,
    /// `(owner, browserID)`
    pub web_push: TableSchema,
    /// `(owner, name)`, canonical subscriptions
    pub subscriptions: TableSchema,
    /// `(name, ownerBrowser)` with `owner` and `browserID` attributes
    pub subscriptions_by_browser: TableSchema,
}

impl KeyValueTables {
    /// Build the layout from configured names.
    #[must_use]
    pub fn from_names(names: &TableNames) -> Self {
        Self {
            preferences: TableSchema::new(&names.preferences, ATTR_OWNER, ATTR_NAME),
            web_push: TableSchema::new(&names.web_push, ATTR_OWNER, ATTR_BROWSER_ID),
            subscriptions: TableSchema::new(&names.subscriptions, ATTR_OWNER, ATTR_NAME),
            subscriptions_by_browser: TableSchema::new(
                &names.subscriptions_by_browser,
                ATTR_NAME,
                ATTR_OWNER_BROWSER,
            ),
        }
    }
}

// =============================================================================
// KeyValueBackend
// =============================================================================

/// Storage backend over a [`KvEngine`].
#[derive(Debug)]
pub struct KeyValueBackend {
    engine: Arc<dyn KvEngine>,
    tables: KeyValueTables,
    clock: Arc<dyn Clock>,
    policy: CallPolicy,
    lifecycle: Lifecycle,
}

impl KeyValueBackend {
    /// Create an unconnected backend using the system clock and default policy.
    #[must_use]
    pub fn new(engine: Arc<dyn KvEngine>, names: &TableNames) -> Self {
        Self {
            engine,
            tables: KeyValueTables::from_names(names),
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

    // -------------------------------------------------------------------------
    // Engine calls under the call policy
    // -------------------------------------------------------------------------

    async fn get(&self, table: &TableSchema, key: &ItemKey) -> StorageResult<Option<Item>> {
        let engine = &self.engine;
        self.policy
            .run("get_item", move || engine.get_item(table, key))
            .await
    }

    async fn put(&self, table: &TableSchema, item: Item) -> StorageResult<()> {
        let engine = &self.engine;
        self.policy
            .run("put_item", move || engine.put_item(table, item.clone()))
            .await
    }

    async fn delete(
        &self,
        table: &TableSchema,
        key: &ItemKey,
        condition: Option<&AttrMatch>,
    ) -> StorageResult<DeleteOutcome> {
        let engine = &self.engine;
        self.policy
            .run("delete_item", move || engine.delete_item(table, key, condition))
            .await
    }

    async fn query(
        &self,
        table: &TableSchema,
        partition: &str,
        filter: Option<&AttrMatch>,
    ) -> StorageResult<Vec<Item>> {
        let engine = &self.engine;
        self.policy
            .run("query", move || engine.query(table, partition, filter))
            .await
    }

    // -------------------------------------------------------------------------
    // Owner-partitioned tables (preferences, web push)
    // -------------------------------------------------------------------------

    async fn read_owned<T>(
        &self,
        table: &TableSchema,
        entity: &'static str,
        owner: &str,
        selector: &Selector,
    ) -> StorageResult<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        match selector {
            Selector::All => self
                .query(table, owner, None)
                .await?
                .into_iter()
                .map(from_map)
                .collect(),
            Selector::Key(key) => {
                let item = self
                    .get(table, &ItemKey::new(owner, key.as_str()))
                    .await?
                    .ok_or_else(|| StorageError::not_found(entity, format!("{owner}/{key}")))?;
                Ok(vec![from_map(item)?])
            }
        }
    }

    async fn delete_owned(
        &self,
        table: &TableSchema,
        entity: &'static str,
        owner: &str,
        selector: &Selector,
    ) -> StorageResult<usize> {
        match selector {
            Selector::All => {
                let items = self.query(table, owner, None).await?;
                let mut deleted = 0;
                for item in &items {
                    let key = table.key_of(item)?;
                    if self.delete(table, &key, None).await? == DeleteOutcome::Deleted {
                        deleted += 1;
                    }
                }
                Ok(deleted)
            }
            Selector::Key(key) => {
                match self
                    .delete(table, &ItemKey::new(owner, key.as_str()), None)
                    .await?
                {
                    DeleteOutcome::Deleted => Ok(1),
                    DeleteOutcome::Missing | DeleteOutcome::ConditionFailed => {
                        Err(StorageError::not_found(entity, format!("{owner}/{key}")))
                    }
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    async fn load_subscription(
        &self,
        owner: &str,
        name: &str,
    ) -> StorageResult<Option<SubscriptionRecord>> {
        self.get(&self.tables.subscriptions, &ItemKey::new(owner, name))
            .await?
            .map(from_map)
            .transpose()
    }

    /// Browsers the index associates with `(owner, name)`, in key order.
    async fn browsers_for(&self, owner: &str, name: &str) -> StorageResult<Vec<String>> {
        let owner_match = AttrMatch::new(ATTR_OWNER, owner);
        self.query(&self.tables.subscriptions_by_browser, name, Some(&owner_match))
            .await?
            .into_iter()
            .map(|row| from_map::<BrowserIndexEntry>(row).map(|entry| entry.browser_id))
            .collect()
    }

    async fn assemble(&self, record: SubscriptionRecord) -> StorageResult<Subscription> {
        let browsers = self.browsers_for(&record.owner, &record.name).await?;
        Ok(record.with_browsers(browsers))
    }

    /// Insert this owner's index row for `(name, browser_id)` if absent.
    /// Returns whether a row was written.
    async fn ensure_index_entry(
        &self,
        owner: &str,
        name: &str,
        browser_id: &str,
    ) -> StorageResult<bool> {
        let index = &self.tables.subscriptions_by_browser;
        if self.get(index, &index_key(owner, name, browser_id)).await?.is_some() {
            return Ok(false);
        }

        let entry = BrowserIndexEntry::new(owner, name, browser_id);
        self.put(index, to_map(&entry)?).await?;
        Ok(true)
    }

    /// Detach `browser_id` from one named subscription.
    async fn remove_subscription(
        &self,
        owner: &str,
        name: &str,
        browser_id: &Selector,
    ) -> StorageResult<SubscriptionRemoval> {
        let index = &self.tables.subscriptions_by_browser;
        let owner_match = AttrMatch::new(ATTR_OWNER, owner);

        match browser_id {
            Selector::Key(browser) => {
                let outcome = self
                    .delete(index, &index_key(owner, name, browser), Some(&owner_match))
                    .await?;
                if outcome != DeleteOutcome::Deleted {
                    return Err(StorageError::not_found(
                        "subscription browser",
                        format!("{owner}/{name}/{browser}"),
                    ));
                }

                let remaining = self.browsers_for(owner, name).await?;
                if remaining.is_empty() {
                    let canonical = self
                        .delete(&self.tables.subscriptions, &ItemKey::new(owner, name), None)
                        .await?;
                    tracing::debug!(
                        owner,
                        name,
                        canonical_deleted = canonical == DeleteOutcome::Deleted,
                        "last browser detached; subscription removed"
                    );
                }
                Ok(SubscriptionRemoval {
                    name: name.to_string(),
                    remaining,
                })
            }
            Selector::All => {
                let canonical = self
                    .delete(&self.tables.subscriptions, &ItemKey::new(owner, name), None)
                    .await?;
                let browsers = self.browsers_for(owner, name).await?;
                if canonical == DeleteOutcome::Missing && browsers.is_empty() {
                    return Err(StorageError::not_found("subscription", format!("{owner}/{name}")));
                }

                for browser in &browsers {
                    self.delete(index, &index_key(owner, name, browser), Some(&owner_match))
                        .await?;
                }

                // Remainder is read back from the index after the cascade.
                let remaining = self.browsers_for(owner, name).await?;
                tracing::debug!(
                    owner,
                    name,
                    detached = browsers.len(),
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

/// Key of `owner`'s index row for `browser_id` under `name`.
fn index_key(owner: &str, name: &str, browser_id: &str) -> ItemKey {
    ItemKey::new(name, BrowserIndexEntry::sort_key(owner, browser_id))
}

// =============================================================================
// StorageBackend Implementation
// =============================================================================

#[async_trait]
impl StorageBackend for KeyValueBackend {
    fn name(&self) -> &'static str {
        "key-value"
    }

    async fn connect(&self) -> StorageResult<()> {
        self.engine.connect().await?;
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

        let record = doc.clone().into_record(self.clock.now());
        self.put(&self.tables.preferences, to_map(&record)?).await?;

        tracing::debug!(owner = %record.owner, name = %record.name, "stored user preferences");
        Ok(record)
    }

    async fn get_user_preferences(
        &self,
        owner: &str,
        name: &Selector,
    ) -> StorageResult<Vec<UserPreferences>> {
        self.lifecycle.ensure_connected()?;
        validate_owner(owner)?;
        name.validate("name")?;

        self.read_owned(&self.tables.preferences, "user preferences", owner, name)
            .await
    }

    async fn delete_user_preferences(&self, owner: &str, name: &Selector) -> StorageResult<usize> {
        self.lifecycle.ensure_connected()?;
        validate_owner(owner)?;
        name.validate("name")?;

        let deleted = self
            .delete_owned(&self.tables.preferences, "user preferences", owner, name)
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

        self.read_owned(&self.tables.web_push, "web push registration", owner, browser_id)
            .await
    }

    async fn store_web_push_registration(
        &self,
        doc: &WebPushDocument,
    ) -> StorageResult<WebPushRegistration> {
        self.lifecycle.ensure_connected()?;
        doc.validate()?;

        let table = &self.tables.web_push;
        let existing = self
            .get(table, &ItemKey::new(doc.owner.as_str(), doc.browser_id.as_str()))
            .await?
            .map(from_map::<WebPushRegistration>)
            .transpose()?;

        let now = self.clock.now();
        let created = existing.map_or(now, |previous| previous.created);
        let registration = doc.clone().into_registration(created, now);
        self.put(table, to_map(&registration)?).await?;

        tracing::debug!(
            owner = %registration.owner,
            browser_id = %registration.browser_id,
            "stored web push registration"
        );
        Ok(registration)
    }

    async fn update_web_push_registration(
        &self,
        doc: &WebPushDocument,
    ) -> StorageResult<WebPushRegistration> {
        self.lifecycle.ensure_connected()?;
        doc.validate()?;

        let table = &self.tables.web_push;
        let existing: WebPushRegistration = self
            .get(table, &ItemKey::new(doc.owner.as_str(), doc.browser_id.as_str()))
            .await?
            .map(from_map)
            .transpose()?
            .ok_or_else(|| {
                StorageError::not_found(
                    "web push registration",
                    format!("{}/{}", doc.owner, doc.browser_id),
                )
            })?;

        let registration = doc.clone().into_registration(existing.created, self.clock.now());
        self.put(table, to_map(&registration)?).await?;

        tracing::debug!(
            owner = %registration.owner,
            browser_id = %registration.browser_id,
            "updated web push registration"
        );
        Ok(registration)
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
            .delete_owned(&self.tables.web_push, "web push registration", owner, browser_id)
            .await?;
        tracing::debug!(owner, browser_id = %browser_id, deleted, "deleted web push registrations");
        Ok(deleted)
    }

    async fn get_subscriptions(&self, owner: &str) -> StorageResult<Vec<Subscription>> {
        self.lifecycle.ensure_connected()?;
        validate_owner(owner)?;

        let items = self.query(&self.tables.subscriptions, owner, None).await?;
        let mut subscriptions = Vec::with_capacity(items.len());
        for item in items {
            subscriptions.push(self.assemble(from_map(item)?).await?);
        }
        Ok(subscriptions)
    }

    async fn get_subscription(
        &self,
        owner: &str,
        name: &Selector,
    ) -> StorageResult<Vec<Subscription>> {
        self.lifecycle.ensure_connected()?;
        validate_owner(owner)?;
        name.validate("name")?;

        match name {
            Selector::All => self.get_subscriptions(owner).await,
            Selector::Key(key) => {
                let record = self
                    .load_subscription(owner, key)
                    .await?
                    .ok_or_else(|| {
                        StorageError::not_found("subscription", format!("{owner}/{key}"))
                    })?;
                Ok(vec![self.assemble(record).await?])
            }
        }
    }

    async fn store_subscription(&self, doc: &SubscriptionDocument) -> StorageResult<Subscription> {
        self.lifecycle.ensure_connected()?;
        doc.validate()?;

        // 1-2: read-modify-write of the canonical record. Last writer wins.
        let now = self.clock.now();
        let record = match self.load_subscription(&doc.owner, &doc.name).await? {
            Some(existing) => SubscriptionRecord {
                uno: doc.uno.clone(),
                subscription: doc.subscription.clone(),
                updated: now,
                ..existing
            },
            None => SubscriptionRecord {
                owner: doc.owner.clone(),
                name: doc.name.clone(),
                uno: doc.uno.clone(),
                subscription: doc.subscription.clone(),
                created: now,
                updated: now,
            },
        };
        self.put(&self.tables.subscriptions, to_map(&record)?).await?;

        // 3: index repair, independent of the branch above.
        let inserted = self
            .ensure_index_entry(&doc.owner, &doc.name, &doc.browser_id)
            .await?;

        tracing::debug!(
            owner = %doc.owner,
            name = %doc.name,
            browser_id = %doc.browser_id,
            index_inserted = inserted,
            "stored subscription"
        );
        self.assemble(record).await
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
            let names = self
                .query(&self.tables.subscriptions, owner, None)
                .await?
                .into_iter()
                .map(|item| from_map::<SubscriptionRecord>(item).map(|record| record.name))
                .collect::<StorageResult<Vec<_>>>()?;

            let mut removals = Vec::with_capacity(names.len());
            for name in &names {
                match self.remove_subscription(owner, name, browser_id).await {
                    Ok(removal) => removals.push(removal),
                    // This browser is simply not on this subscription.
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
