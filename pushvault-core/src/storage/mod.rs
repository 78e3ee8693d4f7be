//! Storage - Backends for Preferences, Registrations and Subscriptions
//!
//! TigerStyle: one trait, two backends, engines behind seams.
//!
//! - [`StorageBackend`]: the operation contract.
//! - [`KeyValueBackend`]: canonical tables plus a subscription-by-browser index.
//! - [`DocumentBackend`]: one document per subscription with an embedded
//!   browser array.
//! - [`Backend`]: the variant chosen by [`build_backend`] / [`connect_backend`].

mod backend;
mod entity;
mod error;
mod factory;
mod policy;

pub mod document;
pub mod kv;

pub use backend::StorageBackend;
pub use document::{DocumentBackend, DocumentEngine, MemoryDocumentEngine};
pub use entity::{
    validate_key, validate_owner, ApiKeys, PreferencesDocument, PushKeys, PushSubscription,
    Selector, Subscription, SubscriptionDocument, SubscriptionRemoval, UserPreferences,
    WebPushDocument, WebPushRegistration,
};
pub use error::{ErrorKind, StorageError, StorageResult};
pub use factory::{build_backend, connect_backend, Backend, BackendKind};
pub use kv::{KeyValueBackend, KvEngine, MemoryKvEngine};
pub use policy::CallPolicy;
