//! Call Policy and Connection Lifecycle
//!
//! TigerStyle: timeouts and retries are explicit configuration, never driver
//! defaults. The default policy does not retry.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::error::{StorageError, StorageResult};
use crate::constants::{
    CALL_RETRIES_COUNT_DEFAULT, CALL_RETRIES_COUNT_MAX, CALL_TIMEOUT_MS_DEFAULT,
    RETRY_BACKOFF_MS_DEFAULT,
};

// =============================================================================
// CallPolicy
// =============================================================================

/// Timeout and retry settings applied to every engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    /// Bound on a single attempt.
    pub timeout: Duration,
    /// Retries after a transient failure.
    pub max_retries: u32,
    /// Linear backoff step; attempt `n` waits `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(CALL_TIMEOUT_MS_DEFAULT),
            max_retries: CALL_RETRIES_COUNT_DEFAULT,
            retry_backoff: Duration::from_millis(RETRY_BACKOFF_MS_DEFAULT),
        }
    }
}

impl CallPolicy {
    /// Check limits.
    ///
    /// # Errors
    /// Returns `Configuration` for a zero timeout or too many retries.
    pub fn validate(&self) -> StorageResult<()> {
        if self.timeout.is_zero() {
            return Err(StorageError::configuration("call timeout must be positive"));
        }
        if self.max_retries > CALL_RETRIES_COUNT_MAX {
            return Err(StorageError::configuration(format!(
                "max retries {} exceeds max {CALL_RETRIES_COUNT_MAX}",
                self.max_retries
            )));
        }
        Ok(())
    }

    /// Run `call` under the timeout, retrying transient failures.
    ///
    /// # Errors
    /// Returns the last error once retries are exhausted, or the first
    /// non-transient error.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::timeout(operation, self.timeout)),
            };

            match result {
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "retrying transient storage failure"
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                other => return other,
            }
        }
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Connected/disconnected flag shared by both backends.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    connected: AtomicBool,
}

impl Lifecycle {
    pub(crate) fn ensure_connected(&self) -> StorageResult<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StorageError::NotConnected)
        }
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::storage::error::ErrorKind;

    fn fast_policy(max_retries: u32) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_millis(50),
            max_retries,
            retry_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = fast_policy(3);

        let result = policy
            .run("get_item", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(StorageError::backend_message("get_item", true, "throttled"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = fast_policy(2);

        let result: StorageResult<()> = policy
            .run("put_item", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::backend_message("put_item", true, "throttled"))
            })
            .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = fast_policy(5);

        let result: StorageResult<()> = policy
            .run("put_item", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::backend_message("put_item", false, "validation"))
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Backend);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_policy_does_not_retry() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: StorageResult<()> = CallPolicy::default()
            .run("query", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::backend_message("query", true, "reset"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_transient() {
        let policy = fast_policy(0);

        let result: StorageResult<()> = policy
            .run("query", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_validate() {
        assert!(CallPolicy::default().validate().is_ok());
        let zero = CallPolicy {
            timeout: Duration::ZERO,
            ..CallPolicy::default()
        };
        assert!(zero.validate().is_err());
        let greedy = CallPolicy {
            max_retries: CALL_RETRIES_COUNT_MAX + 1,
            ..CallPolicy::default()
        };
        assert!(greedy.validate().is_err());
    }

    #[test]
    fn test_lifecycle() {
        let lifecycle = Lifecycle::default();
        assert!(matches!(
            lifecycle.ensure_connected(),
            Err(StorageError::NotConnected)
        ));
        lifecycle.set_connected(true);
        assert!(lifecycle.ensure_connected().is_ok());
        lifecycle.set_connected(false);
        assert!(lifecycle.ensure_connected().is_err());
    }
}
