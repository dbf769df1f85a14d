//! Small shared utilities.

use std::future::Future;

use tokio::sync::Mutex;

use crate::error::CourierResult;

/// A lazily-initialized, fallible singleton.
///
/// The slot starts unconnected. The first `get_or_try_init` runs the
/// initializer; on success the value is memoized for the lifetime of the
/// `Lazy`, on failure the slot stays unconnected and the error is returned
/// to the caller, so the next call retries from scratch. Initialization is
/// serialized by a lock, concurrent callers never race two initializers.
pub struct Lazy<T: Clone> {
    slot: Mutex<Option<T>>,
}

impl<T: Clone> Lazy<T> {
    /// Create an empty slot
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Return the memoized value, initializing it if necessary.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> CourierResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CourierResult<T>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(value) = slot.as_ref() {
            return Ok(value.clone());
        }
        let value = init().await?;
        *slot = Some(value.clone());
        Ok(value)
    }

    /// The memoized value, if initialization has already succeeded.
    pub async fn get(&self) -> Option<T> {
        self.slot.lock().await.clone()
    }
}

impl<T: Clone> Default for Lazy<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// `<client_id>@<hostname>` identity used for the `origin` header.
pub fn origin(client_id: &str) -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{client_id}@{host}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CourierError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn lazy_memoizes_on_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let lazy: Lazy<u32> = Lazy::new();

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value = lazy
                .get_or_try_init(move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lazy_retries_after_failure() {
        let lazy: Lazy<u32> = Lazy::new();

        let err = lazy
            .get_or_try_init(|| async { Err(CourierError::connection_msg("broker down")) })
            .await;
        assert!(err.is_err());
        assert!(lazy.get().await.is_none());

        let value = lazy.get_or_try_init(|| async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(lazy.get().await, Some(42));
    }

    #[test]
    fn origin_embeds_the_client_id() {
        let origin = origin("abc-123");
        assert!(origin.starts_with("abc-123@"));
        assert!(origin.len() > "abc-123@".len());
    }
}
