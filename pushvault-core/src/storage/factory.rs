//! Backend Factory
//!
//! TigerStyle: the backend is chosen once, at startup, from configuration.
//!
//! `memory://` URLs select the in-process engines; anything else goes to the
//! production engine of the selected backend, which must be compiled in.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::backend::StorageBackend;
use super::document::{DocumentBackend, DocumentEngine, MemoryDocumentEngine};
use super::entity::{
    PreferencesDocument, Selector, Subscription, SubscriptionDocument, SubscriptionRemoval,
    UserPreferences, WebPushDocument, WebPushRegistration,
};
use super::error::{StorageError, StorageResult};
use super::kv::{KeyValueBackend, KvEngine, MemoryKvEngine};
use crate::config::StoreConfig;
use crate::constants::MEMORY_URL_SCHEME;

const MONGODB_SCHEMES: [&str; 2] = ["mongodb://", "mongodb+srv://"];

// =============================================================================
// Backend
// =============================================================================

/// Which backend a [`Backend`] wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Canonical tables plus browser index.
    KeyValue,
    /// Embedded browser arrays.
    Document,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyValue => write!(f, "key-value"),
            Self::Document => write!(f, "document"),
        }
    }
}

/// The backend selected at startup.
#[derive(Debug)]
pub enum Backend {
    /// Key/value backend.
    KeyValue(KeyValueBackend),
    /// Document backend.
    Document(DocumentBackend),
}

impl Backend {
    /// Which backend this is.
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::KeyValue(_) => BackendKind::KeyValue,
            Self::Document(_) => BackendKind::Document,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $backend:ident => $call:expr) => {
        match $self {
            Backend::KeyValue($backend) => $call,
            Backend::Document($backend) => $call,
        }
    };
}

#[async_trait]
impl StorageBackend for Backend {
    fn name(&self) -> &'static str {
        dispatch!(self, b => b.name())
    }

    async fn connect(&self) -> StorageResult<()> {
        dispatch!(self, b => b.connect().await)
    }

    async fn disconnect(&self) -> StorageResult<()> {
        dispatch!(self, b => b.disconnect().await)
    }

    async fn store_user_preferences(
        &self,
        doc: &PreferencesDocument,
    ) -> StorageResult<UserPreferences> {
        dispatch!(self, b => b.store_user_preferences(doc).await)
    }

    async fn get_user_preferences(
        &self,
        owner: &str,
        name: &Selector,
    ) -> StorageResult<Vec<UserPreferences>> {
        dispatch!(self, b => b.get_user_preferences(owner, name).await)
    }

    async fn delete_user_preferences(&self, owner: &str, name: &Selector) -> StorageResult<usize> {
        dispatch!(self, b => b.delete_user_preferences(owner, name).await)
    }

    async fn find_push_registrations(
        &self,
        owner: &str,
        browser_id: &Selector,
    ) -> StorageResult<Vec<WebPushRegistration>> {
        dispatch!(self, b => b.find_push_registrations(owner, browser_id).await)
    }

    async fn store_web_push_registration(
        &self,
        doc: &WebPushDocument,
    ) -> StorageResult<WebPushRegistration> {
        dispatch!(self, b => b.store_web_push_registration(doc).await)
    }

    async fn update_web_push_registration(
        &self,
        doc: &WebPushDocument,
    ) -> StorageResult<WebPushRegistration> {
        dispatch!(self, b => b.update_web_push_registration(doc).await)
    }

    async fn delete_web_push_registrations(
        &self,
        owner: &str,
        browser_id: &Selector,
    ) -> StorageResult<usize> {
        dispatch!(self, b => b.delete_web_push_registrations(owner, browser_id).await)
    }

    async fn get_subscriptions(&self, owner: &str) -> StorageResult<Vec<Subscription>> {
        dispatch!(self, b => b.get_subscriptions(owner).await)
    }

    async fn get_subscription(
        &self,
        owner: &str,
        name: &Selector,
    ) -> StorageResult<Vec<Subscription>> {
        dispatch!(self, b => b.get_subscription(owner, name).await)
    }

    async fn store_subscription(&self, doc: &SubscriptionDocument) -> StorageResult<Subscription> {
        dispatch!(self, b => b.store_subscription(doc).await)
    }

    async fn delete_subscription(
        &self,
        owner: &str,
        name: &Selector,
        browser_id: &Selector,
    ) -> StorageResult<Vec<SubscriptionRemoval>> {
        dispatch!(self, b => b.delete_subscription(owner, name, browser_id).await)
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Build an unconnected backend from configuration.
///
/// # Errors
/// Returns `Configuration` if the configuration is invalid or names an engine
/// that is not compiled in.
pub fn build_backend(config: &StoreConfig) -> StorageResult<Backend> {
    config.validate()?;

    let backend = if config.use_document_store {
        let url = config.document_store_url.as_deref().ok_or_else(|| {
            StorageError::configuration("document store selected without a URL")
        })?;
        let engine = document_engine(url, &config.document_database)?;
        Backend::Document(DocumentBackend::new(engine, &config.tables).with_policy(config.policy))
    } else {
        let engine = kv_engine(config)?;
        Backend::KeyValue(KeyValueBackend::new(engine, &config.tables).with_policy(config.policy))
    };

    tracing::info!(kind = %backend.kind(), "storage backend selected");
    Ok(backend)
}

/// Build a backend and connect it.
///
/// # Errors
/// Returns `Configuration` as [`build_backend`], or the engine's connect error.
pub async fn connect_backend(config: &StoreConfig) -> StorageResult<Backend> {
    let backend = build_backend(config)?;
    backend.connect().await?;
    Ok(backend)
}

fn document_engine(url: &str, database: &str) -> StorageResult<Arc<dyn DocumentEngine>> {
    if url.starts_with(MEMORY_URL_SCHEME) {
        return Ok(Arc::new(MemoryDocumentEngine::new()));
    }
    if MONGODB_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
        return mongo_engine(url, database);
    }
    Err(StorageError::configuration(format!(
        "unsupported document store URL scheme: {url}"
    )))
}

#[cfg(feature = "mongodb")]
fn mongo_engine(url: &str, database: &str) -> StorageResult<Arc<dyn DocumentEngine>> {
    Ok(Arc::new(super::document::MongoDocumentEngine::new(url, database)))
}

#[cfg(not(feature = "mongodb"))]
fn mongo_engine(_url: &str, _database: &str) -> StorageResult<Arc<dyn DocumentEngine>> {
    Err(StorageError::configuration(
        "MongoDB URL configured but the `mongodb` feature is not enabled",
    ))
}

fn kv_engine(config: &StoreConfig) -> StorageResult<Arc<dyn KvEngine>> {
    let in_memory = config
        .kv_endpoint
        .as_deref()
        .is_some_and(|endpoint| endpoint.starts_with(MEMORY_URL_SCHEME));
    if in_memory {
        return Ok(Arc::new(MemoryKvEngine::new()));
    }
    dynamo_engine(config)
}

#[cfg(feature = "dynamodb")]
fn dynamo_engine(config: &StoreConfig) -> StorageResult<Arc<dyn KvEngine>> {
    Ok(Arc::new(super::kv::DynamoKvEngine::new(super::kv::DynamoSettings {
        region: config.kv_region.clone(),
        endpoint: config.kv_endpoint.clone(),
    })))
}

#[cfg(not(feature = "dynamodb"))]
fn dynamo_engine(_config: &StoreConfig) -> StorageResult<Arc<dyn KvEngine>> {
    Err(StorageError::configuration(
        "key/value store configured but the `dynamodb` feature is not enabled",
    ))
}

// =============================================================================
// Tests
// =============================================================================
