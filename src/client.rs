//! Task submission client.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::correlation::ResultCell;
use crate::error::CourierResult;
use crate::protocol::{
    CONTENT_ENCODING, CONTENT_TYPE, MessageHeaders, TaskEnvelope, args_repr,
};
use crate::transport::{BackendRegistry, Broker, BrokerRegistry, ResultsProvider};
use crate::utils::{Lazy, origin};

/// Producer handle: submits tasks and hands back awaitable results.
///
/// Connections are established lazily on first use and memoized for the
/// client's lifetime; a failed connection attempt is retried on the next
/// call. Each client owns a stable id that names its private reply queue.
pub struct Client {
    config: ClientConfig,
    client_id: String,
    client_name: String,
    brokers: BrokerRegistry,
    backends: BackendRegistry,
    broker: Lazy<Arc<dyn Broker>>,
    provider: Lazy<Option<Arc<dyn ResultsProvider>>>,
}

impl Client {
    /// Create a client with the built-in transports.
    pub fn new(config: ClientConfig) -> CourierResult<Self> {
        Self::with_registries(
            config,
            BrokerRegistry::with_defaults(),
            BackendRegistry::with_defaults(),
        )
    }

    /// Create a client with custom transport registries.
    pub fn with_registries(
        config: ClientConfig,
        brokers: BrokerRegistry,
        backends: BackendRegistry,
    ) -> CourierResult<Self> {
        config.validate()?;
        let client_id = Uuid::new_v4().to_string();
        let client_name = origin(&client_id);
        Ok(Self {
            config,
            client_id,
            client_name,
            brokers,
            backends,
            broker: Lazy::new(),
            provider: Lazy::new(),
        })
    }

    /// This client's stable id, which names its reply queue.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// This client's `<id>@<hostname>` identity.
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    async fn broker(&self) -> CourierResult<Arc<dyn Broker>> {
        self.broker
            .get_or_try_init(|| async {
                let broker = self.brokers.create(&self.config.broker_uri).await?;
                match self.config.max_priority {
                    Some(max) => {
                        broker
                            .declare_priority_queue(&self.config.queue, max)
                            .await?
                    }
                    None => broker.declare_queue(&self.config.queue).await?,
                }
                Ok(broker)
            })
            .await
    }

    async fn results_provider(&self) -> CourierResult<Option<Arc<dyn ResultsProvider>>> {
        self.provider
            .get_or_try_init(|| async {
                let Some(backend_uri) = &self.config.backend_uri else {
                    return Ok(None);
                };
                let backend = self.backends.create(backend_uri).await?;
                let provider = backend
                    .results_provider_for(&self.client_id, self.config.result_ttl)
                    .await?;
                Ok(Some(provider))
            })
            .await
    }

    /// Submit a task with default priority.
    pub async fn submit(&self, task: &str, args: Vec<Value>) -> CourierResult<AsyncResult> {
        self.submit_with_priority(task, args, 0).await
    }

    /// Submit a task with the given priority.
    ///
    /// Without a configured backend the submission is fire-and-forget and
    /// the returned result is already resolved to `null`.
    pub async fn submit_with_priority(
        &self,
        task: &str,
        args: Vec<Value>,
        priority: u8,
    ) -> CourierResult<AsyncResult> {
        // The provider is materialized before publishing so a result can
        // never arrive at a queue nobody consumes.
        let provider = self.results_provider().await?;
        let broker = self.broker().await?;

        let task_id = Uuid::new_v4().to_string();
        let envelope = TaskEnvelope::new(args);
        let headers = MessageHeaders::new(
            task_id.as_str(),
            task,
            args_repr(&envelope.args),
            self.client_name.as_str(),
        );

        let mut message = if priority > 0 {
            broker.message_with_priority(priority)
        } else {
            broker.message()
        };
        message.set_body(envelope.encode()?);
        message.set_content_type(CONTENT_TYPE);
        message.set_content_encoding(CONTENT_ENCODING);
        if provider.is_some() {
            message.set_reply_to(&self.client_id);
        }
        message.set_headers(headers);
        message.send(&self.config.queue).await?;
        debug!(%task_id, task, queue = %self.config.queue, "task submitted");

        Ok(match provider {
            Some(provider) => AsyncResult::pending(task_id.clone(), provider.get_result(&task_id)),
            None => AsyncResult::ready(task_id, Value::Null),
        })
    }
}

enum ResultState {
    Ready(Value),
    Pending(Arc<ResultCell>),
}

/// Handle to one submitted task's eventual result.
pub struct AsyncResult {
    task_id: String,
    state: ResultState,
}

impl AsyncResult {
    fn ready(task_id: String, value: Value) -> Self {
        Self {
            task_id,
            state: ResultState::Ready(value),
        }
    }

    fn pending(task_id: String, cell: Arc<ResultCell>) -> Self {
        Self {
            task_id,
            state: ResultState::Pending(cell),
        }
    }

    /// Id of the submitted task
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Whether the result is available without waiting
    pub fn is_done(&self) -> bool {
        match &self.state {
            ResultState::Ready(_) => true,
            ResultState::Pending(cell) => cell.peek().is_some(),
        }
    }

    /// Await the result, surfacing worker-side failures as errors.
    pub async fn get(&self) -> CourierResult<Value> {
        match &self.state {
            ResultState::Ready(value) => Ok(value.clone()),
            ResultState::Pending(cell) => cell.wait().await.into_result(),
        }
    }
}
