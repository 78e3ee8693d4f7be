//! PushVault Core - Notification Subscription Storage
//!
//! TigerStyle storage layer for a push-notification subscription service.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    StorageBackend Trait                      │
//! └─────────────────────────────────────────────────────────────┘
//!          ↑                                      ↑
//!          │                                      │
//! ┌────────┴──────────┐                 ┌─────────┴─────────┐
//! │  KeyValueBackend  │                 │  DocumentBackend  │
//! │ canonical + index │                 │ embedded browsers │
//! └────────┬──────────┘                 └─────────┬─────────┘
//!          │ KvEngine                             │ DocumentEngine
//!   ┌──────┴───────┐                       ┌──────┴────────┐
//!   │ Memory │ Dynamo                      │ Memory │ Mongo │
//!   └──────────────┘                       └───────────────┘
//! ```
//!
//! Every record is scoped by an `owner`. A [`Selector`] is either a real key
//! or the `ALL` sentinel, which turns reads and deletes into bulk operations.
//!
//! # Usage
//!
//! ```rust
//! use pushvault_core::{
//!     connect_backend, Selector, StorageBackend, StoreConfig, SubscriptionDocument,
//! };
//!
//! # async fn demo() -> Result<(), pushvault_core::StorageError> {
//! let backend = connect_backend(&StoreConfig::in_memory(false)).await?;
//!
//! let doc = SubscriptionDocument::new("alice", "market-news", "U1", "B1");
//! backend.store_subscription(&doc).await?;
//!
//! let subs = backend.get_subscription("alice", &Selector::from("market-news")).await?;
//! assert_eq!(subs[0].browser_ids, vec!["B1".to_string()]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod constants;
pub mod dst;
pub mod storage;

// Re-export common types
pub use clock::{Clock, SystemClock};
pub use config::{ConfigEnv, StoreConfig, TableNames};
pub use constants::*;
pub use dst::{DeterministicRng, FaultConfig, FaultInjector, FaultType, SimClock, SimConfig};
pub use storage::{
    build_backend, connect_backend, ApiKeys, Backend, BackendKind, CallPolicy, DocumentBackend,
    ErrorKind, KeyValueBackend, PreferencesDocument, PushKeys, PushSubscription, Selector,
    StorageBackend, StorageError, StorageResult, Subscription, SubscriptionDocument,
    SubscriptionRemoval, UserPreferences, WebPushDocument, WebPushRegistration,
};
