//! Transport seams and the scheme-dispatching registries.
//!
//! A broker carries task dispatch, a backend carries results back. Both are
//! created from connection URIs through explicit factory tables: factories
//! are registered programmatically (no runtime discovery) and the first one
//! whose advertised scheme set contains the URI's scheme wins.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::correlation::ResultCell;
use crate::error::{CourierError, CourierResult};
use crate::protocol::MessageHeaders;

#[cfg(feature = "amqp")]
#[cfg_attr(docsrs, doc(cfg(feature = "amqp")))]
pub mod amqp;
pub mod memory;

/// One outbound message under construction.
///
/// Setters are pure local state; the single side-effecting call is
/// [`Message::send`], which consumes the builder.
#[async_trait]
pub trait Message: Send {
    /// Set the body bytes
    fn set_body(&mut self, body: Vec<u8>);
    /// Set the content type property
    fn set_content_type(&mut self, content_type: &str);
    /// Set the content encoding property
    fn set_content_encoding(&mut self, encoding: &str);
    /// Attach the task header set; the header id doubles as correlation id
    fn set_headers(&mut self, headers: MessageHeaders);
    /// Route the result to the given client's reply queue
    fn set_reply_to(&mut self, client_id: &str);
    /// Publish to the named queue
    async fn send(self: Box<Self>, queue: &str) -> CourierResult<()>;
}

/// Dispatch-side transport.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a durable queue; idempotent.
    async fn declare_queue(&self, name: &str) -> CourierResult<()>;

    /// Declare a durable queue with a bounded priority level; idempotent.
    async fn declare_priority_queue(&self, name: &str, max_priority: u8) -> CourierResult<()>;

    /// A message builder with default priority 0.
    fn message(&self) -> Box<dyn Message>;

    /// A message builder with the given priority. Priorities above the
    /// queue's declared maximum are clamped by the transport.
    fn message_with_priority(&self, priority: u8) -> Box<dyn Message>;

    /// Start consuming the named queue with the given unacked window.
    async fn consume(&self, queue: &str, prefetch: u16) -> CourierResult<Box<dyn DeliveryStream>>;
}

/// One received task message plus its acknowledgement handle.
pub struct Delivery {
    /// Raw body bytes
    pub body: Vec<u8>,
    /// `id` header, absent on protocol violations
    pub task_id: Option<String>,
    /// `task` header, absent on protocol violations
    pub task_name: Option<String>,
    /// Reply queue for the result, absent on fire-and-forget submissions
    pub reply_to: Option<String>,
    /// Correlation id transport property
    pub correlation_id: Option<String>,
    /// Acknowledgement handle
    pub ack: Box<dyn DeliveryAck>,
}

/// Acknowledgement handle for a single delivery.
#[async_trait]
pub trait DeliveryAck: Send {
    /// Acknowledge the delivery
    async fn ack(self: Box<Self>) -> CourierResult<()>;
    /// Reject the delivery without requeueing it
    async fn reject(self: Box<Self>) -> CourierResult<()>;
}

/// Worker-side stream of deliveries from one queue.
#[async_trait]
pub trait DeliveryStream: Send {
    /// The next delivery, or `None` once the stream has ended.
    async fn next_delivery(&mut self) -> Option<Delivery>;
}

/// Result-side transport.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Declare the client's private auto-expiring reply queue, start its
    /// consumer and return the provider correlating results to waiters.
    /// At most one call per client id is the caller's duty.
    async fn results_provider_for(
        &self,
        client_id: &str,
        result_ttl: Duration,
    ) -> CourierResult<Arc<dyn ResultsProvider>>;

    /// Publish a SUCCESS result to the given reply destination.
    async fn report_result(
        &self,
        task_id: &str,
        destination: &str,
        correlation_id: &str,
        result: &Value,
    ) -> CourierResult<()>;

    /// Publish a FAILURE result to the given reply destination.
    async fn report_exception(
        &self,
        task_id: &str,
        destination: &str,
        correlation_id: &str,
        exc_type: &str,
        exc_message: &str,
    ) -> CourierResult<()>;
}

/// Correlates incoming results with local waiters.
pub trait ResultsProvider: Send + Sync {
    /// The correlation cell for a task id; callable before or after the
    /// result physically arrives.
    fn get_result(&self, task_id: &str) -> Arc<ResultCell>;
}

/// Creates brokers for the schemes it advertises.
#[async_trait]
pub trait BrokerFactory: Send + Sync {
    /// URI schemes this factory handles
    fn protocols(&self) -> &[&str];
    /// Connect a broker for the given URI
    async fn create_broker(&self, uri: &Url) -> CourierResult<Arc<dyn Broker>>;
}

/// Creates backends for the schemes it advertises.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// URI schemes this factory handles
    fn protocols(&self) -> &[&str];
    /// Connect a backend for the given URI
    async fn create_backend(&self, uri: &Url) -> CourierResult<Arc<dyn Backend>>;
}

fn parse_uri(uri: &str) -> CourierResult<Url> {
    Url::parse(uri).map_err(|e| CourierError::config(format!("invalid connection URI {uri}: {e}")))
}

/// Explicit table of broker factories with scheme dispatch.
pub struct BrokerRegistry {
    factories: Vec<Box<dyn BrokerFactory>>,
}

impl BrokerRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// A registry with the built-in transports registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "amqp")]
        registry.register(Box::new(amqp::AmqpBrokerFactory));
        registry.register(Box::new(memory::MemoryBrokerFactory));
        registry
    }

    /// Register an additional factory
    pub fn register(&mut self, factory: Box<dyn BrokerFactory>) {
        self.factories.push(factory);
    }

    /// Connect a broker for the URI, dispatching on its scheme.
    pub async fn create(&self, uri: &str) -> CourierResult<Arc<dyn Broker>> {
        let url = parse_uri(uri)?;
        let scheme = url.scheme().to_string();
        for factory in &self.factories {
            if factory.protocols().contains(&scheme.as_str()) {
                return factory.create_broker(&url).await;
            }
        }
        Err(CourierError::UnsupportedProtocol {
            scheme,
            supported: self
                .factories
                .iter()
                .flat_map(|f| f.protocols().iter().map(|s| s.to_string()))
                .collect(),
        })
    }
}

impl Default for BrokerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Explicit table of backend factories with scheme dispatch.
pub struct BackendRegistry {
    factories: Vec<Box<dyn BackendFactory>>,
}

impl BackendRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// A registry with the built-in transports registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "amqp")]
        registry.register(Box::new(amqp::AmqpBackendFactory));
        registry.register(Box::new(memory::MemoryBackendFactory));
        registry
    }

    /// Register an additional factory
    pub fn register(&mut self, factory: Box<dyn BackendFactory>) {
        self.factories.push(factory);
    }

    /// Connect a backend for the URI, dispatching on its scheme.
    pub async fn create(&self, uri: &str) -> CourierResult<Arc<dyn Backend>> {
        let url = parse_uri(uri)?;
        let scheme = url.scheme().to_string();
        for factory in &self.factories {
            if factory.protocols().contains(&scheme.as_str()) {
                return factory.create_backend(&url).await;
            }
        }
        Err(CourierError::UnsupportedProtocol {
            scheme,
            supported: self
                .factories
                .iter()
                .flat_map(|f| f.protocols().iter().map(|s| s.to_string()))
                .collect(),
        })
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_scheme_reports_the_supported_set() {
        let registry = BrokerRegistry::with_defaults();
        let err = registry.create("zmq://localhost").await.err().unwrap();
        match err {
            CourierError::UnsupportedProtocol { scheme, supported } => {
                assert_eq!(scheme, "zmq");
                assert!(supported.contains(&"memory".to_string()));
                #[cfg(feature = "amqp")]
                assert!(supported.contains(&"amqp".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn invalid_uri_is_a_config_error() {
        let registry = BackendRegistry::with_defaults();
        let err = registry.create("not a uri").await.err().unwrap();
        assert!(matches!(err, CourierError::Config { .. }));
    }

    #[tokio::test]
    async fn memory_scheme_dispatches_to_the_memory_transport() {
        let registry = BrokerRegistry::with_defaults();
        let broker = registry.create("memory://registry-dispatch").await.unwrap();
        broker.declare_queue("q").await.unwrap();
    }

    #[cfg(feature = "amqp")]
    #[tokio::test]
    async fn rpc_scheme_is_advertised_by_the_amqp_backend() {
        let registry = BackendRegistry::with_defaults();
        let err = registry.create("zmq://localhost").await.err().unwrap();
        match err {
            CourierError::UnsupportedProtocol { supported, .. } => {
                assert!(supported.contains(&"rpc".to_string()));
                assert!(supported.contains(&"amqp".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
