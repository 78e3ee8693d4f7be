//! TigerStyle Constants
//!
//! Limits are explicit, named with units, and checked at the boundary.

/// Reserved key value meaning "every record for this owner".
pub const SENTINEL_ALL: &str = "ALL";

/// Maximum length of an owner, name or browser ID in bytes.
pub const KEY_BYTES_MAX: usize = 1024;

/// Maximum length of a `uno` identifier in bytes.
pub const UNO_BYTES_MAX: usize = 1024;

/// Default per-attempt timeout for a store call in milliseconds.
pub const CALL_TIMEOUT_MS_DEFAULT: u64 = 10_000;

/// Default number of retries for transient store failures.
pub const CALL_RETRIES_COUNT_DEFAULT: u32 = 0;

/// Upper bound on configured retries.
pub const CALL_RETRIES_COUNT_MAX: u32 = 10;

/// Default linear backoff step between retries in milliseconds.
pub const RETRY_BACKOFF_MS_DEFAULT: u64 = 100;

/// URL scheme selecting the in-process engines.
pub const MEMORY_URL_SCHEME: &str = "memory://";

/// Default database name for the document store.
pub const DOCUMENT_DATABASE_DEFAULT: &str = "pushvault";

/// Default preferences table/collection name.
pub const PREFERENCES_TABLE_DEFAULT: &str = "user-preferences";

/// Default web-push table/collection name.
pub const WEBPUSH_TABLE_DEFAULT: &str = "webpush-registrations";

/// Default subscriptions table/collection name.
pub const SUBSCRIPTIONS_TABLE_DEFAULT: &str = "subscriptions";

/// Suffix appended to the subscriptions table to name the browser index.
pub const SUBSCRIPTIONS_BY_BROWSER_SUFFIX: &str = "-by-browser";

/// Maximum simulated clock advance in a single step (one day).
pub const DST_TIME_ADVANCE_MS_MAX: u64 = 86_400_000;

/// Simulated clock start: 2024-01-01T00:00:00Z in milliseconds.
pub const DST_EPOCH_MS: u64 = 1_704_067_200_000;
