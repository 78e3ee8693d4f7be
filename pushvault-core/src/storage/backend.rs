//! Storage Backend Trait
//!
//! TigerStyle: Abstract interface for notification subscription storage.
//!
//! All implementations must satisfy the same trait contract:
//!
//! - Every operation except `connect` fails with `NotConnected` until
//!   `connect` succeeds, and again after `disconnect`.
//! - A [`Selector::Key`] read or delete targets exactly one record and fails
//!   with `NotFound` if it is absent.
//! - A [`Selector::All`] read returns every matching record for the owner
//!   (possibly none); a [`Selector::All`] delete removes them all.
//! - `created` never changes after the first write; `updated` is refreshed by
//!   every write.

use async_trait::async_trait;

use super::entity::{
    PreferencesDocument, Selector, Subscription, SubscriptionDocument, SubscriptionRemoval,
    UserPreferences, WebPushDocument, WebPushRegistration,
};
use super::error::StorageResult;

/// Abstract storage backend for preferences, web-push registrations and
/// subscriptions.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend label for logs.
    fn name(&self) -> &'static str;

    /// Connect the underlying engine.
    async fn connect(&self) -> StorageResult<()>;

    /// Disconnect the underlying engine.
    async fn disconnect(&self) -> StorageResult<()>;

    /// Store (upsert) a preference set.
    async fn store_user_preferences(
        &self,
        doc: &PreferencesDocument,
    ) -> StorageResult<UserPreferences>;

    /// Read one preference set, or all of them for `ALL`.
    async fn get_user_preferences(
        &self,
        owner: &str,
        name: &Selector,
    ) -> StorageResult<Vec<UserPreferences>>;

    /// Delete one preference set, or all of them for `ALL`.
    ///
    /// Returns the number of records removed.
    async fn delete_user_preferences(&self, owner: &str, name: &Selector) -> StorageResult<usize>;

    /// Read one registration, or all of them for `ALL`.
    async fn find_push_registrations(
        &self,
        owner: &str,
        browser_id: &Selector,
    ) -> StorageResult<Vec<WebPushRegistration>>;

    /// Store (upsert) a registration, preserving `created`.
    async fn store_web_push_registration(
        &self,
        doc: &WebPushDocument,
    ) -> StorageResult<WebPushRegistration>;

    /// Update an existing registration.
    ///
    /// Fails with `NotFound` if the registration does not exist.
    async fn update_web_push_registration(
        &self,
        doc: &WebPushDocument,
    ) -> StorageResult<WebPushRegistration>;

    /// Delete one registration, or all of them for `ALL`.
    ///
    /// Returns the number of records removed.
    async fn delete_web_push_registrations(
        &self,
        owner: &str,
        browser_id: &Selector,
    ) -> StorageResult<usize>;

    /// Every subscription for the owner with its browser list.
    async fn get_subscriptions(&self, owner: &str) -> StorageResult<Vec<Subscription>>;

    /// One subscription, or all of them for `ALL`.
    async fn get_subscription(
        &self,
        owner: &str,
        name: &Selector,
    ) -> StorageResult<Vec<Subscription>>;

    /// Store a subscription and attach `doc.browser_id` to it.
    ///
    /// Retrying after a partial failure converges without duplicating the
    /// browser association.
    async fn store_subscription(&self, doc: &SubscriptionDocument) -> StorageResult<Subscription>;

    /// Detach one browser (scoped) or every browser (`ALL`) from one named
    /// subscription, or from every subscription when `name` is `ALL`.
    ///
    /// Returns one [`SubscriptionRemoval`] per affected name.
    async fn delete_subscription(
        &self,
        owner: &str,
        name: &Selector,
        browser_id: &Selector,
    ) -> StorageResult<Vec<SubscriptionRemoval>>;
}
