//! Store Configuration
//!
//! TigerStyle: every knob has a named default; malformed values fail closed.
//!
//! [`StoreConfig::from_env`] reads the `PUSHVAULT_*` variables listed in
//! [`ConfigEnv`]. Set-but-empty values are rejected rather than treated as
//! unset.

use std::time::Duration;

use crate::constants::{
    DOCUMENT_DATABASE_DEFAULT, MEMORY_URL_SCHEME, PREFERENCES_TABLE_DEFAULT,
    SUBSCRIPTIONS_BY_BROWSER_SUFFIX, SUBSCRIPTIONS_TABLE_DEFAULT, WEBPUSH_TABLE_DEFAULT,
};
use crate::storage::{CallPolicy, StorageError, StorageResult};

// =============================================================================
// Environment Keys
// =============================================================================

/// Environment variables read by [`StoreConfig::from_env`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigEnv {
    /// Select the document backend (`true/false/1/0/yes/no`).
    UseDocumentStore,
    /// Document store URL (`mongodb://...` or `memory://`).
    DocumentStoreUrl,
    /// Document database name.
    DocumentDatabase,
    /// Preferences table / collection.
    PreferencesTable,
    /// Web-push table / collection.
    WebPushTable,
    /// Subscriptions table / collection.
    SubscriptionsTable,
    /// Subscription-by-browser index table.
    SubscriptionsByBrowserTable,
    /// Key/value endpoint override (`memory://` selects the in-process engine).
    KvEndpoint,
    /// Key/value region override.
    KvRegion,
    /// Per-attempt timeout in milliseconds.
    CallTimeoutMs,
    /// Retries after a transient failure.
    MaxRetries,
    /// Linear backoff step in milliseconds.
    RetryBackoffMs,
}

impl ConfigEnv {
    /// Every key, in documentation order.
    pub const ALL: [Self; 12] = [
        Self::UseDocumentStore,
        Self::DocumentStoreUrl,
        Self::DocumentDatabase,
        Self::PreferencesTable,
        Self::WebPushTable,
        Self::SubscriptionsTable,
        Self::SubscriptionsByBrowserTable,
        Self::KvEndpoint,
        Self::KvRegion,
        Self::CallTimeoutMs,
        Self::MaxRetries,
        Self::RetryBackoffMs,
    ];

    /// The environment variable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UseDocumentStore => "PUSHVAULT_USE_DOCUMENT_STORE",
            Self::DocumentStoreUrl => "PUSHVAULT_DOCUMENT_STORE_URL",
            Self::DocumentDatabase => "PUSHVAULT_DOCUMENT_DATABASE",
            Self::PreferencesTable => "PUSHVAULT_PREFERENCES_TABLE",
            Self::WebPushTable => "PUSHVAULT_WEBPUSH_TABLE",
            Self::SubscriptionsTable => "PUSHVAULT_SUBSCRIPTIONS_TABLE",
            Self::SubscriptionsByBrowserTable => "PUSHVAULT_SUBSCRIPTIONS_BY_BROWSER_TABLE",
            Self::KvEndpoint => "PUSHVAULT_KV_ENDPOINT",
            Self::KvRegion => "PUSHVAULT_KV_REGION",
            Self::CallTimeoutMs => "PUSHVAULT_CALL_TIMEOUT_MS",
            Self::MaxRetries => "PUSHVAULT_MAX_RETRIES",
            Self::RetryBackoffMs => "PUSHVAULT_RETRY_BACKOFF_MS",
        }
    }
}

// =============================================================================
// TableNames
// =============================================================================

/// Physical table (key/value) or collection (document) names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    /// User preferences
    pub preferences: String,
    /// Web-push registrations
    pub web_push: String,
    /// Canonical subscriptions
    pub subscriptions: String,
    /// Subscription-by-browser index (key/value backend only)
    pub subscriptions_by_browser: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self::new(
            PREFERENCES_TABLE_DEFAULT,
            WEBPUSH_TABLE_DEFAULT,
            SUBSCRIPTIONS_TABLE_DEFAULT,
        )
    }
}

impl TableNames {
    /// Names with the index table derived from `subscriptions`.
    pub fn new(
        preferences: impl Into<String>,
        web_push: impl Into<String>,
        subscriptions: impl Into<String>,
    ) -> Self {
        let subscriptions = subscriptions.into();
        Self {
            preferences: preferences.into(),
            web_push: web_push.into(),
            subscriptions_by_browser: format!("{subscriptions}{SUBSCRIPTIONS_BY_BROWSER_SUFFIX}"),
            subscriptions,
        }
    }

    /// Override the index table name.
    #[must_use]
    pub fn with_index_table(mut self, name: impl Into<String>) -> Self {
        self.subscriptions_by_browser = name.into();
        self
    }

    /// Check that every name is set and the index is a separate table.
    ///
    /// # Errors
    /// Returns `Configuration` on an empty or clashing name.
    pub fn validate(&self) -> StorageResult<()> {
        for (label, name) in [
            ("preferences", &self.preferences),
            ("web push", &self.web_push),
            ("subscriptions", &self.subscriptions),
            ("subscriptions-by-browser", &self.subscriptions_by_browser),
        ] {
            if name.trim().is_empty() {
                return Err(StorageError::configuration(format!("{label} table name is empty")));
            }
        }
        if self.subscriptions_by_browser == self.subscriptions {
            return Err(StorageError::configuration(
                "subscriptions-by-browser table must differ from subscriptions table",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// StoreConfig
// =============================================================================

/// Everything the backend factory needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Use the document backend instead of the key/value backend.
    pub use_document_store: bool,
    /// Document store URL; required when `use_document_store` is set.
    pub document_store_url: Option<String>,
    /// Document database name.
    pub document_database: String,
    /// Table / collection names.
    pub tables: TableNames,
    /// Key/value endpoint override.
    pub kv_endpoint: Option<String>,
    /// Key/value region override.
    pub kv_region: Option<String>,
    /// Timeout and retry settings.
    pub policy: CallPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            use_document_store: false,
            document_store_url: None,
            document_database: DOCUMENT_DATABASE_DEFAULT.to_string(),
            tables: TableNames::default(),
            kv_endpoint: None,
            kv_region: None,
            policy: CallPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Configuration selecting the in-process engines.
    #[must_use]
    pub fn in_memory(use_document_store: bool) -> Self {
        Self {
            use_document_store,
            document_store_url: Some(MEMORY_URL_SCHEME.to_string()),
            kv_endpoint: Some(MEMORY_URL_SCHEME.to_string()),
            ..Self::default()
        }
    }

    /// Load from the process environment.
    ///
    /// # Errors
    /// Returns `Configuration` on a malformed or empty value.
    pub fn from_env() -> StorageResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary lookup function.
    ///
    /// # Errors
    /// Returns `Configuration` on a malformed or empty value.
    pub fn from_lookup<F>(lookup: F) -> StorageResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: ConfigEnv| read_nonempty(&lookup, key);
        let defaults = Self::default();

        let use_document_store = read(ConfigEnv::UseDocumentStore)?
            .map(|raw| parse_bool(ConfigEnv::UseDocumentStore, &raw))
            .transpose()?
            .unwrap_or(false);

        let subscriptions = read(ConfigEnv::SubscriptionsTable)?
            .unwrap_or_else(|| SUBSCRIPTIONS_TABLE_DEFAULT.to_string());
        let mut tables = TableNames::new(
            read(ConfigEnv::PreferencesTable)?
                .unwrap_or_else(|| PREFERENCES_TABLE_DEFAULT.to_string()),
            read(ConfigEnv::WebPushTable)?.unwrap_or_else(|| WEBPUSH_TABLE_DEFAULT.to_string()),
            subscriptions,
        );
        if let Some(index) = read(ConfigEnv::SubscriptionsByBrowserTable)? {
            tables = tables.with_index_table(index);
        }

        let policy = CallPolicy {
            timeout: read(ConfigEnv::CallTimeoutMs)?
                .map(|raw| parse_u64(ConfigEnv::CallTimeoutMs, &raw).map(Duration::from_millis))
                .transpose()?
                .unwrap_or(defaults.policy.timeout),
            max_retries: read(ConfigEnv::MaxRetries)?
                .map(|raw| parse_u32(ConfigEnv::MaxRetries, &raw))
                .transpose()?
                .unwrap_or(defaults.policy.max_retries),
            retry_backoff: read(ConfigEnv::RetryBackoffMs)?
                .map(|raw| parse_u64(ConfigEnv::RetryBackoffMs, &raw).map(Duration::from_millis))
                .transpose()?
                .unwrap_or(defaults.policy.retry_backoff),
        };

        let config = Self {
            use_document_store,
            document_store_url: read(ConfigEnv::DocumentStoreUrl)?,
            document_database: read(ConfigEnv::DocumentDatabase)?
                .unwrap_or(defaults.document_database),
            tables,
            kv_endpoint: read(ConfigEnv::KvEndpoint)?,
            kv_region: read(ConfigEnv::KvRegion)?,
            policy,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    /// Returns `Configuration` if the document backend has no URL, or any
    /// name or policy value is invalid.
    pub fn validate(&self) -> StorageResult<()> {
        if self.use_document_store {
            match &self.document_store_url {
                Some(url) if !url.trim().is_empty() => {}
                _ => {
                    return Err(StorageError::configuration(format!(
                        "{} is required when {} is set",
                        ConfigEnv::DocumentStoreUrl.as_str(),
                        ConfigEnv::UseDocumentStore.as_str()
                    )))
                }
            }
            if self.document_database.trim().is_empty() {
                return Err(StorageError::configuration("document database name is empty"));
            }
        }
        self.tables.validate()?;
        self.policy.validate()
    }
}

// =============================================================================
// Parsing Helpers
// =============================================================================

fn read_nonempty<F>(lookup: &F, key: ConfigEnv) -> StorageResult<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key.as_str()) {
        Some(value) if value.trim().is_empty() => Err(StorageError::configuration(format!(
            "{} must not be empty",
            key.as_str()
        ))),
        Some(value) => Ok(Some(value.trim().to_string())),
        None => Ok(None),
    }
}

fn parse_bool(key: ConfigEnv, raw: &str) -> StorageResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(StorageError::configuration(format!(
            "{} must be one of true, false, 1, 0, yes, no",
            key.as_str()
        ))),
    }
}

fn parse_u64(key: ConfigEnv, raw: &str) -> StorageResult<u64> {
    raw.parse().map_err(|_| {
        StorageError::configuration(format!(
            "{} must be a non-negative integer",
            key.as_str()
        ))
    })
}

fn parse_u32(key: ConfigEnv, raw: &str) -> StorageResult<u32> {
    raw.parse().map_err(|_| {
        StorageError::configuration(format!(
            "{} must be a non-negative integer",
            key.as_str()
        ))
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::storage::ErrorKind;

    fn load(vars: &[(ConfigEnv, &str)]) -> StorageResult<StoreConfig> {
        let env: HashMap<&str, String> = vars
            .iter()
            .map(|(key, value)| (key.as_str(), (*value).to_string()))
            .collect();
        StoreConfig::from_lookup(|name| env.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, StoreConfig::default());
        assert!(!config.use_document_store);
        assert_eq!(config.tables.subscriptions_by_browser, "subscriptions-by-browser");
        assert_eq!(config.policy.max_retries, 0);
        assert_eq!(config.policy.timeout, Duration::from_millis(10_000));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            (ConfigEnv::UseDocumentStore, "yes"),
            (ConfigEnv::DocumentStoreUrl, "mongodb://localhost:27017"),
            (ConfigEnv::DocumentDatabase, "push"),
            (ConfigEnv::SubscriptionsTable, "subs"),
            (ConfigEnv::CallTimeoutMs, "2500"),
            (ConfigEnv::MaxRetries, "3"),
            (ConfigEnv::KvRegion, "eu-west-1"),
        ])
        .unwrap();

        assert!(config.use_document_store);
        assert_eq!(config.document_store_url.as_deref(), Some("mongodb://localhost:27017"));
        assert_eq!(config.document_database, "push");
        assert_eq!(config.tables.subscriptions, "subs");
        assert_eq!(config.tables.subscriptions_by_browser, "subs-by-browser");
        assert_eq!(config.policy.timeout, Duration::from_millis(2_500));
        assert_eq!(config.policy.max_retries, 3);
        assert_eq!(config.kv_region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn test_explicit_index_table() {
        let config = load(&[(ConfigEnv::SubscriptionsByBrowserTable, "browser-index")]).unwrap();
        assert_eq!(config.tables.subscriptions_by_browser, "browser-index");
    }

    #[test]
    fn test_document_store_requires_url() {
        let err = load(&[(ConfigEnv::UseDocumentStore, "true")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("PUSHVAULT_DOCUMENT_STORE_URL"));
    }

    #[test]
    fn test_malformed_values_rejected() {
        for vars in [
            vec![(ConfigEnv::UseDocumentStore, "maybe")],
            vec![(ConfigEnv::CallTimeoutMs, "soon")],
            vec![(ConfigEnv::CallTimeoutMs, "0")],
            vec![(ConfigEnv::MaxRetries, "-1")],
            vec![(ConfigEnv::MaxRetries, "99")],
            vec![(ConfigEnv::PreferencesTable, "  ")],
            vec![(ConfigEnv::SubscriptionsByBrowserTable, "subscriptions")],
        ] {
            let err = load(&vars).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration, "{vars:?}");
        }
    }

    #[test]
    fn test_env_names_are_prefixed() {
        for key in ConfigEnv::ALL {
            assert!(key.as_str().starts_with("PUSHVAULT_"));
        }
    }
}
