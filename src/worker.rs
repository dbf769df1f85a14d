//! Task execution workers.
//!
//! Each consumer owns one [`Worker`] and processes one delivery at a time:
//! decode, dispatch, invoke, report, acknowledge. Task-level failures are
//! reported back to the submitter as FAILURE results; only messages that
//! violate the protocol itself are rejected without a report. Nothing a
//! task does can crash the worker.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::CourierResult;
use crate::protocol::TaskEnvelope;
use crate::registry::TaskRegistry;
use crate::transport::{Backend, BackendRegistry, BrokerRegistry, Delivery};

/// Processes deliveries for one consumer.
pub struct Worker {
    registry: Arc<TaskRegistry>,
    backend: Arc<dyn Backend>,
    busy: Mutex<()>,
}

impl Worker {
    fn new(registry: Arc<TaskRegistry>, backend: Arc<dyn Backend>) -> Self {
        Self {
            registry,
            backend,
            busy: Mutex::new(()),
        }
    }

    /// Wait until the in-flight delivery, if any, has been fully handled.
    pub async fn join(&self) {
        drop(self.busy.lock().await);
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        // Held across decode-through-acknowledge: one task in flight per
        // consumer, and join() drains it.
        let _in_flight = self.busy.lock().await;

        let Delivery {
            body,
            task_id,
            task_name,
            reply_to,
            correlation_id,
            ack,
        } = delivery;

        let (task_id, task_name) = match (task_id, task_name) {
            (Some(id), Some(name)) => (id, name),
            _ => {
                warn!("delivery without id/task headers, rejecting");
                if let Err(e) = ack.reject().await {
                    error!(error = %e, "reject failed");
                }
                return;
            }
        };

        let envelope = match TaskEnvelope::decode(&body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%task_id, error = %e, "malformed task body, rejecting");
                if let Err(e) = ack.reject().await {
                    error!(%task_id, error = %e, "reject failed");
                }
                return;
            }
        };

        debug!(%task_id, task = %task_name, "task received");
        let outcome = match self.registry.resolve(&task_name, &envelope.args) {
            Err(e) => {
                warn!(%task_id, task = %task_name, error = %e, "dispatch failed");
                Err(("DispatchError".to_string(), e.to_string()))
            }
            Ok(handler) => match handler(envelope.args).await {
                Ok(value) => Ok(value),
                Err(failure) => {
                    warn!(%task_id, task = %task_name, error = %failure, "task failed");
                    Err((failure.kind, failure.message))
                }
            },
        };

        let reported = self
            .report(&task_id, reply_to.as_deref(), correlation_id.as_deref(), &outcome)
            .await;

        match reported {
            Ok(()) => {
                if let Err(e) = ack.ack().await {
                    error!(%task_id, error = %e, "ack failed");
                }
            }
            Err(e) => {
                error!(%task_id, error = %e, "result reporting failed, rejecting");
                if let Err(e) = ack.reject().await {
                    error!(%task_id, error = %e, "reject failed");
                }
            }
        }
    }

    /// Report the outcome when the submitter asked for a reply. A void
    /// success has nothing to report.
    async fn report(
        &self,
        task_id: &str,
        reply_to: Option<&str>,
        correlation_id: Option<&str>,
        outcome: &Result<Option<Value>, (String, String)>,
    ) -> CourierResult<()> {
        let Some(destination) = reply_to else {
            return Ok(());
        };
        let correlation_id = correlation_id.unwrap_or(task_id);
        match outcome {
            Ok(Some(value)) => {
                self.backend
                    .report_result(task_id, destination, correlation_id, value)
                    .await
            }
            Ok(None) => Ok(()),
            Err((exc_type, exc_message)) => {
                self.backend
                    .report_exception(task_id, destination, correlation_id, exc_type, exc_message)
                    .await
            }
        }
    }
}

/// A set of independent consumers on one queue.
///
/// Parallelism comes from running several consumers, each strictly serial.
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
    handles: Vec<JoinHandle<()>>,
    stop: watch::Sender<bool>,
}

impl WorkerPool {
    /// Start consuming with the built-in transports.
    pub async fn start(config: WorkerConfig, registry: Arc<TaskRegistry>) -> CourierResult<Self> {
        Self::start_with_registries(
            config,
            registry,
            BrokerRegistry::with_defaults(),
            BackendRegistry::with_defaults(),
        )
        .await
    }

    /// Start consuming with custom transport registries.
    pub async fn start_with_registries(
        config: WorkerConfig,
        registry: Arc<TaskRegistry>,
        brokers: BrokerRegistry,
        backends: BackendRegistry,
    ) -> CourierResult<Self> {
        config.validate()?;

        let broker = brokers.create(&config.broker_uri).await?;
        broker.declare_queue(&config.queue).await?;
        // The reporting backend lives on the same server as the broker.
        let backend = backends.create(&config.broker_uri).await?;

        let (stop, _) = watch::channel(false);
        let mut workers = Vec::with_capacity(config.concurrency);
        let mut handles = Vec::with_capacity(config.concurrency);

        for consumer in 0..config.concurrency {
            let mut stream = broker.consume(&config.queue, config.prefetch).await?;
            let worker = Arc::new(Worker::new(Arc::clone(&registry), Arc::clone(&backend)));
            workers.push(Arc::clone(&worker));

            let mut stop_rx = stop.subscribe();
            handles.push(tokio::spawn(async move {
                debug!(consumer, "consumer started");
                loop {
                    tokio::select! {
                        _ = stop_rx.changed() => break,
                        delivery = stream.next_delivery() => match delivery {
                            Some(delivery) => worker.handle_delivery(delivery).await,
                            None => break,
                        },
                    }
                }
                debug!(consumer, "consumer stopped");
            }));
        }

        info!(
            queue = %config.queue,
            concurrency = config.concurrency,
            "worker pool started"
        );
        Ok(Self {
            workers,
            handles,
            stop,
        })
    }

    /// Wait until every in-flight task has been fully handled.
    pub async fn join(&self) {
        for worker in &self.workers {
            worker.join().await;
        }
    }

    /// Stop all consumers and wait for them to exit.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("worker pool stopped");
    }
}
