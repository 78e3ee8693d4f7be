//! Entity - Records, Documents and Selectors
//!
//! TigerStyle: Explicit types, validation at the boundary.
//!
//! Records serialize with the attribute names the stores hold (`browserID`,
//! `apiKeys`, `p256dh`, ...), so the same serde shape is used for key/value
//! items, documents and the JSON the CLI prints.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{StorageError, StorageResult};
use crate::constants::{KEY_BYTES_MAX, SENTINEL_ALL, UNO_BYTES_MAX};

// =============================================================================
// Selector
// =============================================================================

/// A `name` or `browserID` argument: either one real key or the `ALL` sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Every record for the owner.
    All,
    /// Exactly one record.
    Key(String),
}

impl Selector {
    /// Parse a raw key, mapping `ALL` to [`Selector::All`].
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw == SENTINEL_ALL {
            Self::All
        } else {
            Self::Key(raw.to_string())
        }
    }

    /// The real key, if this is not the sentinel.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Key(key) => Some(key),
        }
    }

    /// Whether this is the `ALL` sentinel.
    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Validate a real key; the sentinel is always valid.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the key is empty or too long.
    pub fn validate(&self, field: &'static str) -> StorageResult<()> {
        match self {
            Self::All => Ok(()),
            Self::Key(key) => validate_key(field, key),
        }
    }
}

impl From<&str> for Selector {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for Selector {
    fn from(raw: String) -> Self {
        if raw == SENTINEL_ALL {
            Self::All
        } else {
            Self::Key(raw)
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str(SENTINEL_ALL),
            Self::Key(key) => f.write_str(key),
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Validate an owner principal.
///
/// # Errors
/// Returns `InvalidArgument` if the owner is empty or too long.
pub fn validate_owner(owner: &str) -> StorageResult<()> {
    if owner.is_empty() {
        return Err(StorageError::invalid("owner cannot be empty"));
    }
    if owner.len() > KEY_BYTES_MAX {
        return Err(StorageError::invalid(format!(
            "owner {} bytes exceeds max {KEY_BYTES_MAX}",
            owner.len()
        )));
    }
    Ok(())
}

/// Validate a real `name` or `browserID` key.
///
/// # Errors
/// Returns `InvalidArgument` if the key is empty, too long, or the sentinel.
pub fn validate_key(field: &'static str, key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::invalid(format!("{field} cannot be empty")));
    }
    if key == SENTINEL_ALL {
        return Err(StorageError::invalid(format!(
            "{field} cannot be the reserved value {SENTINEL_ALL}"
        )));
    }
    if key.len() > KEY_BYTES_MAX {
        return Err(StorageError::invalid(format!(
            "{field} {} bytes exceeds max {KEY_BYTES_MAX}",
            key.len()
        )));
    }
    Ok(())
}

// =============================================================================
// User Preferences
// =============================================================================

/// A stored preference set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    /// Owning principal
    pub owner: String,
    /// Preference set name
    pub name: String,
    /// Opaque preference blob
    pub preferences: Value,
    /// Last write
    pub updated: DateTime<Utc>,
}

/// Input to `store_user_preferences`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferencesDocument {
    /// Owning principal
    pub owner: String,
    /// Preference set name
    pub name: String,
    /// Opaque preference blob
    pub preferences: Value,
}

impl PreferencesDocument {
    /// Create a preferences document.
    pub fn new(owner: impl Into<String>, name: impl Into<String>, preferences: Value) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            preferences,
        }
    }

    /// Check owner and name.
    ///
    /// # Errors
    /// Returns `InvalidArgument` on a bad key.
    pub fn validate(&self) -> StorageResult<()> {
        validate_owner(&self.owner)?;
        validate_key("name", &self.name)
    }

    /// Stamp the document into a record.
    #[must_use]
    pub fn into_record(self, updated: DateTime<Utc>) -> UserPreferences {
        UserPreferences {
            owner: self.owner,
            name: self.name,
            preferences: self.preferences,
            updated,
        }
    }
}

// =============================================================================
// Web Push Registration
// =============================================================================

/// VAPID key pair issued for a browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeys {
    /// Application server public key
    pub public_key: String,
    /// Application server private key
    pub private_key: String,
}

/// Browser-side encryption keys of a push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    /// Authentication secret
    pub auth: String,
    /// P-256 ECDH public key
    pub p256dh: String,
}

/// The browser's `PushSubscription`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    /// Push service endpoint URL
    pub endpoint: String,
    /// Encryption keys
    pub keys: PushKeys,
}

/// A stored web-push browser registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebPushRegistration {
    /// Owning principal
    pub owner: String,
    /// Browser identifier
    #[serde(rename = "browserID")]
    pub browser_id: String,
    /// Server key pair
    pub api_keys: ApiKeys,
    /// Browser push subscription
    pub subscription: PushSubscription,
    /// First write
    pub created: DateTime<Utc>,
    /// Last write
    pub updated: DateTime<Utc>,
}

/// Input to `store_web_push_registration` / `update_web_push_registration`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebPushDocument {
    /// Owning principal
    pub owner: String,
    /// Browser identifier
    #[serde(rename = "browserID")]
    pub browser_id: String,
    /// Server key pair
    pub api_keys: ApiKeys,
    /// Browser push subscription
    pub subscription: PushSubscription,
}

impl WebPushDocument {
    /// Check owner and browser ID.
    ///
    /// # Errors
    /// Returns `InvalidArgument` on a bad key.
    pub fn validate(&self) -> StorageResult<()> {
        validate_owner(&self.owner)?;
        validate_key("browserID", &self.browser_id)
    }

    /// Stamp the document into a registration.
    #[must_use]
    pub fn into_registration(
        self,
        created: DateTime<Utc>,
        updated: DateTime<Utc>,
    ) -> WebPushRegistration {
        WebPushRegistration {
            owner: self.owner,
            browser_id: self.browser_id,
            api_keys: self.api_keys,
            subscription: self.subscription,
            created,
            updated,
        }
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Canonical subscription row, keyed by `(owner, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Owning principal
    pub owner: String,
    /// Subscription name
    pub name: String,
    /// Upstream notification service identifier
    pub uno: String,
    /// Opaque subscription payload
    pub subscription: Value,
    /// First write
    pub created: DateTime<Utc>,
    /// Last write
    pub updated: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// Attach the browser list to produce the external shape.
    #[must_use]
    pub fn with_browsers(self, browser_ids: Vec<String>) -> Subscription {
        Subscription {
            owner: self.owner,
            name: self.name,
            uno: self.uno,
            subscription: self.subscription,
            browser_ids,
            created: self.created,
            updated: self.updated,
        }
    }
}

/// Subscription-by-browser index row, keyed by `(name, ownerBrowser)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserIndexEntry {
    /// Subscription name
    pub name: String,
    /// Owner-qualified browser key, see [`BrowserIndexEntry::sort_key`]
    #[serde(rename = "ownerBrowser")]
    pub owner_browser: String,
    /// Browser identifier
    #[serde(rename = "browserID")]
    pub browser_id: String,
    /// Owning principal
    pub owner: String,
}

impl BrowserIndexEntry {
    /// Create the row for `browser_id` subscribed to `name` under `owner`.
    pub fn new(owner: &str, name: &str, browser_id: &str) -> Self {
        Self {
            name: name.to_string(),
            owner_browser: Self::sort_key(owner, browser_id),
            browser_id: browser_id.to_string(),
            owner: owner.to_string(),
        }
    }

    /// Sort key unique per `(owner, browserID)`.
    ///
    /// The owner is length-prefixed so no two pairs encode to the same key,
    /// whatever characters they contain. Rows of one owner share a prefix and
    /// so sort by browser ID.
    #[must_use]
    pub fn sort_key(owner: &str, browser_id: &str) -> String {
        format!("{}:{owner}#{browser_id}", owner.len())
    }
}

/// Externally visible subscription: canonical fields plus subscribed browsers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Owning principal
    pub owner: String,
    /// Subscription name
    pub name: String,
    /// Upstream notification service identifier
    pub uno: String,
    /// Opaque subscription payload
    pub subscription: Value,
    /// Browsers subscribed, in key order
    #[serde(rename = "browserID", default)]
    pub browser_ids: Vec<String>,
    /// First write
    pub created: DateTime<Utc>,
    /// Last write
    pub updated: DateTime<Utc>,
}

/// Input to `store_subscription`: one browser joining a named subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionDocument {
    /// Owning principal
    pub owner: String,
    /// Subscription name
    pub name: String,
    /// Upstream notification service identifier
    pub uno: String,
    /// Browser joining the subscription
    #[serde(rename = "browserID")]
    pub browser_id: String,
    /// Opaque subscription payload
    #[serde(default)]
    pub subscription: Value,
}

impl SubscriptionDocument {
    /// Create a subscription document with an empty payload.
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        uno: impl Into<String>,
        browser_id: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            uno: uno.into(),
            browser_id: browser_id.into(),
            subscription: Value::Object(Map::new()),
        }
    }

    /// Set the payload.
    #[must_use]
    pub fn with_subscription(mut self, subscription: Value) -> Self {
        self.subscription = subscription;
        self
    }

    /// Check owner, name, browser ID and `uno`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` on a bad key.
    pub fn validate(&self) -> StorageResult<()> {
        validate_owner(&self.owner)?;
        validate_key("name", &self.name)?;
        validate_key("browserID", &self.browser_id)?;
        if self.uno.len() > UNO_BYTES_MAX {
            return Err(StorageError::invalid(format!(
                "uno {} bytes exceeds max {UNO_BYTES_MAX}",
                self.uno.len()
            )));
        }
        Ok(())
    }
}

/// Result of deleting (part of) one named subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRemoval {
    /// Subscription name
    pub name: String,
    /// Browsers still subscribed after the delete
    pub remaining: Vec<String>,
}

// =============================================================================
// Item Encoding
// =============================================================================

/// Encode a record as a JSON object.
pub(crate) fn to_map<T: Serialize>(record: &T) -> StorageResult<Map<String, Value>> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(StorageError::invalid(format!(
            "record did not encode to an object: {other}"
        ))),
    }
}

/// Decode a JSON object into a record; unknown attributes are ignored.
pub(crate) fn from_map<T: DeserializeOwned>(map: Map<String, Value>) -> StorageResult<T> {
    Ok(serde_json::from_value(Value::Object(map))?)
}

// =============================================================================
// Tests
// =============================================================================
