//! Configuration types for courierq clients and workers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CourierError, CourierResult};

/// Default dispatch queue name shared with the Python ecosystem.
pub const DEFAULT_QUEUE: &str = "celery";

/// How long unclaimed results are retained before eviction.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Client (producer) configuration.
///
/// # Examples
///
/// ```rust
/// use courierq::config::ClientConfig;
///
/// let config = ClientConfig::new("amqp://localhost//")
///     .with_backend("rpc://localhost//")
///     .with_queue("invoices")
///     .with_max_priority(10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Broker connection URI, e.g. `amqp://localhost//` or `memory://test`
    pub broker_uri: String,

    /// Result backend URI; `None` runs fire-and-forget
    pub backend_uri: Option<String>,

    /// Dispatch queue name
    pub queue: String,

    /// When set, the dispatch queue is declared with this bounded priority
    /// level and submissions may carry a priority
    pub max_priority: Option<u8>,

    /// Retention window for unclaimed results
    pub result_ttl: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker_uri: "amqp://localhost//".to_string(),
            backend_uri: None,
            queue: DEFAULT_QUEUE.to_string(),
            max_priority: None,
            result_ttl: DEFAULT_RESULT_TTL,
        }
    }
}

impl ClientConfig {
    /// Configuration for the given broker with defaults elsewhere.
    pub fn new(broker_uri: impl Into<String>) -> Self {
        Self {
            broker_uri: broker_uri.into(),
            ..Default::default()
        }
    }

    /// Set the result backend URI.
    pub fn with_backend(mut self, backend_uri: impl Into<String>) -> Self {
        self.backend_uri = Some(backend_uri.into());
        self
    }

    /// Set the dispatch queue name.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Declare the dispatch queue with a bounded priority level.
    pub fn with_max_priority(mut self, max_priority: u8) -> Self {
        self.max_priority = Some(max_priority);
        self
    }

    /// Set the result retention window.
    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> CourierResult<()> {
        if self.broker_uri.is_empty() {
            return Err(CourierError::config("broker URI must not be empty"));
        }
        if self.queue.is_empty() {
            return Err(CourierError::config("queue name must not be empty"));
        }
        if self.max_priority == Some(0) {
            return Err(CourierError::config(
                "max priority must be at least 1 when set",
            ));
        }
        Ok(())
    }
}

/// Worker (consumer) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Broker connection URI
    pub broker_uri: String,

    /// Queue to consume from
    pub queue: String,

    /// Number of independent consumers to run
    pub concurrency: usize,

    /// Per-consumer unacknowledged delivery window
    pub prefetch: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            broker_uri: "amqp://localhost//".to_string(),
            queue: DEFAULT_QUEUE.to_string(),
            concurrency: 2,
            prefetch: 2,
        }
    }
}

impl WorkerConfig {
    /// Configuration for the given broker with defaults elsewhere.
    pub fn new(broker_uri: impl Into<String>) -> Self {
        Self {
            broker_uri: broker_uri.into(),
            ..Default::default()
        }
    }

    /// Set the queue to consume from.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Set the number of consumers.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the per-consumer prefetch window.
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> CourierResult<()> {
        if self.broker_uri.is_empty() {
            return Err(CourierError::config("broker URI must not be empty"));
        }
        if self.queue.is_empty() {
            return Err(CourierError::config("queue name must not be empty"));
        }
        if self.concurrency == 0 {
            return Err(CourierError::config("concurrency must be at least 1"));
        }
        Ok(())
    }
}
