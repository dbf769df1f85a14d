//! In-process transport for development and tests.
//!
//! `memory://<hub>` URIs address named hubs inside the current process; a
//! client and a worker pool connected to the same hub share its queues, so
//! the full submit/execute/report loop runs without any external broker.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::correlation::{ResultCell, ResultTable, TaskOutcome};
use crate::error::CourierResult;
use crate::protocol::{MessageHeaders, ResultStatus, TaskResult};
use crate::transport::{
    Backend, BackendFactory, Broker, BrokerFactory, Delivery, DeliveryAck, DeliveryStream, Message,
    ResultsProvider,
};

static HUBS: OnceLock<Mutex<HashMap<String, Arc<MemoryHub>>>> = OnceLock::new();

/// The hub for `name`, created on first use.
pub fn hub(name: &str) -> Arc<MemoryHub> {
    let hubs = HUBS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut hubs = hubs.lock().unwrap_or_else(|e| e.into_inner());
    Arc::clone(
        hubs.entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryHub::default())),
    )
}

/// A named set of in-process queues.
#[derive(Default)]
pub struct MemoryHub {
    queues: Mutex<HashMap<String, Arc<MemoryQueue>>>,
}

impl MemoryHub {
    /// The queue for `name`, created undeclared if absent.
    pub fn queue(&self, name: &str) -> Arc<MemoryQueue> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            queues
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MemoryQueue::new())),
        )
    }

    fn declare(&self, name: &str, max_priority: Option<u8>) {
        let queue = self.queue(name);
        queue.set_max_priority(max_priority);
    }
}

pub(crate) struct QueuedMessage {
    pub(crate) priority: u8,
    seq: u64,
    pub(crate) body: Vec<u8>,
    pub(crate) headers: Option<MessageHeaders>,
    // Carried for parity with the AMQP properties; only tests read them.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) content_type: Option<String>,
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) content_encoding: Option<String>,
    pub(crate) reply_to: Option<String>,
    pub(crate) correlation_id: Option<String>,
}

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedMessage {}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedMessage {
    // Max-heap: highest priority first, FIFO within a priority.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    heap: BinaryHeap<QueuedMessage>,
    max_priority: Option<u8>,
    next_seq: u64,
}

/// One in-process queue: a priority heap with consumer wakeups and
/// acknowledgement counters for test assertions.
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    acked: AtomicU64,
    rejected: AtomicU64,
}

impl MemoryQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                max_priority: None,
                next_seq: 0,
            }),
            notify: Notify::new(),
            acked: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    fn set_max_priority(&self, max_priority: Option<u8>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if max_priority.is_some() {
            state.max_priority = max_priority;
        }
    }

    fn push(&self, mut message: QueuedMessage) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        // Priorities are clamped at enqueue to the declared maximum; an
        // undeclared queue ignores priorities entirely.
        message.priority = message.priority.min(state.max_priority.unwrap_or(0));
        message.seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(message);
        drop(state);
        self.notify.notify_one();
    }

    pub(crate) fn try_pop(&self) -> Option<QueuedMessage> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .heap
            .pop()
    }

    async fn pop(&self) -> QueuedMessage {
        loop {
            let notified = self.notify.notified();
            if let Some(message) = self.try_pop() {
                return message;
            }
            notified.await;
        }
    }

    /// Messages currently queued
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .heap
            .len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliveries acknowledged so far
    pub fn acked(&self) -> u64 {
        self.acked.load(AtomicOrdering::SeqCst)
    }

    /// Deliveries rejected so far
    pub fn rejected(&self) -> u64 {
        self.rejected.load(AtomicOrdering::SeqCst)
    }
}

/// Broker over a named in-process hub.
pub struct MemoryBroker {
    hub: Arc<MemoryHub>,
}

impl MemoryBroker {
    /// Connect to the hub named by a `memory://<hub>` URI.
    pub fn connect(uri: &Url) -> Self {
        Self {
            hub: hub(uri.host_str().unwrap_or("default")),
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_queue(&self, name: &str) -> CourierResult<()> {
        self.hub.declare(name, None);
        Ok(())
    }

    async fn declare_priority_queue(&self, name: &str, max_priority: u8) -> CourierResult<()> {
        self.hub.declare(name, Some(max_priority));
        Ok(())
    }

    fn message(&self) -> Box<dyn Message> {
        self.message_with_priority(0)
    }

    fn message_with_priority(&self, priority: u8) -> Box<dyn Message> {
        Box::new(MemoryMessage {
            hub: Arc::clone(&self.hub),
            priority,
            body: Vec::new(),
            headers: None,
            content_type: None,
            content_encoding: None,
            reply_to: None,
        })
    }

    async fn consume(&self, queue: &str, _prefetch: u16) -> CourierResult<Box<dyn DeliveryStream>> {
        Ok(Box::new(MemoryDeliveryStream {
            queue: self.hub.queue(queue),
        }))
    }
}

struct MemoryMessage {
    hub: Arc<MemoryHub>,
    priority: u8,
    body: Vec<u8>,
    headers: Option<MessageHeaders>,
    content_type: Option<String>,
    content_encoding: Option<String>,
    reply_to: Option<String>,
}

#[async_trait]
impl Message for MemoryMessage {
    fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    fn set_content_type(&mut self, content_type: &str) {
        self.content_type = Some(content_type.to_string());
    }

    fn set_content_encoding(&mut self, encoding: &str) {
        self.content_encoding = Some(encoding.to_string());
    }

    fn set_headers(&mut self, headers: MessageHeaders) {
        self.headers = Some(headers);
    }

    fn set_reply_to(&mut self, client_id: &str) {
        self.reply_to = Some(client_id.to_string());
    }

    async fn send(self: Box<Self>, queue: &str) -> CourierResult<()> {
        let correlation_id = self.headers.as_ref().map(|h| h.id.clone());
        self.hub.queue(queue).push(QueuedMessage {
            priority: self.priority,
            seq: 0,
            body: self.body,
            headers: self.headers,
            content_type: self.content_type,
            content_encoding: self.content_encoding,
            reply_to: self.reply_to,
            correlation_id,
        });
        Ok(())
    }
}

struct MemoryDeliveryStream {
    queue: Arc<MemoryQueue>,
}

#[async_trait]
impl DeliveryStream for MemoryDeliveryStream {
    async fn next_delivery(&mut self) -> Option<Delivery> {
        let message = self.queue.pop().await;
        Some(Delivery {
            body: message.body,
            task_id: message.headers.as_ref().map(|h| h.id.clone()),
            task_name: message.headers.as_ref().map(|h| h.task.clone()),
            reply_to: message.reply_to,
            correlation_id: message.correlation_id,
            ack: Box::new(MemoryAck {
                queue: Arc::clone(&self.queue),
            }),
        })
    }
}

struct MemoryAck {
    queue: Arc<MemoryQueue>,
}

#[async_trait]
impl DeliveryAck for MemoryAck {
    async fn ack(self: Box<Self>) -> CourierResult<()> {
        self.queue.acked.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn reject(self: Box<Self>) -> CourierResult<()> {
        self.queue.rejected.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }
}

/// Backend over a named in-process hub.
pub struct MemoryBackend {
    hub: Arc<MemoryHub>,
}

impl MemoryBackend {
    /// Connect to the hub named by a `memory://<hub>` URI.
    pub fn connect(uri: &Url) -> Self {
        Self {
            hub: hub(uri.host_str().unwrap_or("default")),
        }
    }

    async fn publish(&self, destination: &str, result: TaskResult) -> CourierResult<()> {
        let body = result.encode()?;
        self.hub.queue(destination).push(QueuedMessage {
            priority: 0,
            seq: 0,
            body,
            headers: None,
            content_type: Some(crate::protocol::CONTENT_TYPE.to_string()),
            content_encoding: Some(crate::protocol::CONTENT_ENCODING.to_string()),
            reply_to: None,
            correlation_id: Some(result.task_id),
        });
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn results_provider_for(
        &self,
        client_id: &str,
        result_ttl: Duration,
    ) -> CourierResult<Arc<dyn ResultsProvider>> {
        let queue = self.hub.queue(client_id);
        let table = Arc::new(ResultTable::new(result_ttl));

        let consumer = tokio::spawn({
            let table = Arc::clone(&table);
            async move {
                loop {
                    let message = queue.pop().await;
                    match TaskResult::decode(&message.body) {
                        Ok(result) => {
                            let task_id = result.task_id.clone();
                            debug!(%task_id, "result received");
                            table.deliver(&task_id, outcome_of(result));
                        }
                        Err(e) => warn!(error = %e, "discarding undecodable result"),
                    }
                }
            }
        });

        Ok(Arc::new(MemoryResultsProvider { table, consumer }))
    }

    async fn report_result(
        &self,
        task_id: &str,
        destination: &str,
        _correlation_id: &str,
        result: &Value,
    ) -> CourierResult<()> {
        self.publish(destination, TaskResult::success(task_id, result.clone()))
            .await
    }

    async fn report_exception(
        &self,
        task_id: &str,
        destination: &str,
        _correlation_id: &str,
        exc_type: &str,
        exc_message: &str,
    ) -> CourierResult<()> {
        self.publish(destination, TaskResult::failure(task_id, exc_type, exc_message))
            .await
    }
}

pub(crate) fn outcome_of(result: TaskResult) -> TaskOutcome {
    match result.status {
        ResultStatus::Success => TaskOutcome::Success(result.result),
        ResultStatus::Failure => TaskOutcome::Failure {
            exc_type: result.result["exc_type"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
            exc_message: result.result["exc_message"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
        },
    }
}

struct MemoryResultsProvider {
    table: Arc<ResultTable>,
    consumer: JoinHandle<()>,
}

impl ResultsProvider for MemoryResultsProvider {
    fn get_result(&self, task_id: &str) -> Arc<ResultCell> {
        self.table.cell(task_id)
    }
}

impl Drop for MemoryResultsProvider {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

/// Factory for `memory://` brokers.
pub struct MemoryBrokerFactory;

#[async_trait]
impl BrokerFactory for MemoryBrokerFactory {
    fn protocols(&self) -> &[&str] {
        &["memory"]
    }

    async fn create_broker(&self, uri: &Url) -> CourierResult<Arc<dyn Broker>> {
        Ok(Arc::new(MemoryBroker::connect(uri)))
    }
}

/// Factory for `memory://` backends.
pub struct MemoryBackendFactory;

#[async_trait]
impl BackendFactory for MemoryBackendFactory {
    fn protocols(&self) -> &[&str] {
        &["memory"]
    }

    async fn create_backend(&self, uri: &Url) -> CourierResult<Arc<dyn Backend>> {
        Ok(Arc::new(MemoryBackend::connect(uri)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn broker(hub_name: &str) -> MemoryBroker {
        MemoryBroker::connect(&Url::parse(&format!("memory://{hub_name}")).unwrap())
    }

    #[tokio::test]
    async fn higher_priority_overtakes_and_equal_priority_is_fifo() {
        let broker = broker("priority-order");
        broker.declare_priority_queue("q", 10).await.unwrap();

        for (i, priority) in [1u8, 5, 5, 9].into_iter().enumerate() {
            let mut message = broker.message_with_priority(priority);
            message.set_body(vec![i as u8]);
            message.send("q").await.unwrap();
        }

        let queue = hub("priority-order").queue("q");
        let order: Vec<u8> = (0..4).map(|_| queue.try_pop().unwrap().body[0]).collect();
        // priority 9 first, then the two 5s in submission order, then 1
        assert_eq!(order, vec![3, 1, 2, 0]);
    }

    #[tokio::test]
    async fn undeclared_priority_is_clamped_to_the_maximum() {
        let broker = broker("priority-clamp");
        broker.declare_priority_queue("q", 5).await.unwrap();

        let mut message = broker.message_with_priority(200);
        message.set_body(b"x".to_vec());
        message.send("q").await.unwrap();

        let queued = hub("priority-clamp").queue("q").try_pop().unwrap();
        assert_eq!(queued.priority, 5);
    }

    #[tokio::test]
    async fn plain_queues_ignore_priorities() {
        let broker = broker("no-priority");
        broker.declare_queue("q").await.unwrap();

        for priority in [9u8, 1] {
            let mut message = broker.message_with_priority(priority);
            message.set_body(vec![priority]);
            message.send("q").await.unwrap();
        }

        let queue = hub("no-priority").queue("q");
        assert_eq!(queue.try_pop().unwrap().body, vec![9]);
        assert_eq!(queue.try_pop().unwrap().body, vec![1]);
    }

    #[tokio::test]
    async fn message_properties_survive_the_queue() {
        let broker = broker("props");
        broker.declare_queue("q").await.unwrap();

        let mut message = broker.message();
        message.set_body(b"body".to_vec());
        message.set_content_type("application/json");
        message.set_content_encoding("utf-8");
        message.set_headers(MessageHeaders::new("id-9", "t.T#m", "()", "c@h"));
        message.set_reply_to("client-1");
        message.send("q").await.unwrap();

        let queued = hub("props").queue("q").try_pop().unwrap();
        assert_eq!(queued.content_type.as_deref(), Some("application/json"));
        assert_eq!(queued.content_encoding.as_deref(), Some("utf-8"));
        assert_eq!(queued.reply_to.as_deref(), Some("client-1"));
        assert_eq!(queued.correlation_id.as_deref(), Some("id-9"));
        assert_eq!(queued.headers.unwrap().task, "t.T#m");
    }

    #[tokio::test]
    async fn consume_delivers_headers_and_ack_counts() {
        let broker = broker("consume");
        broker.declare_queue("q").await.unwrap();

        let mut message = broker.message();
        message.set_body(b"payload".to_vec());
        message.set_headers(MessageHeaders::new("id-1", "t.T#m", "()", "c@h"));
        message.send("q").await.unwrap();

        let mut stream = broker.consume("q", 2).await.unwrap();
        let delivery = stream.next_delivery().await.unwrap();
        assert_eq!(delivery.task_id.as_deref(), Some("id-1"));
        assert_eq!(delivery.task_name.as_deref(), Some("t.T#m"));
        delivery.ack.ack().await.unwrap();

        let queue = hub("consume").queue("q");
        assert_eq!(queue.acked(), 1);
        assert_eq!(queue.rejected(), 0);
    }

    #[tokio::test]
    async fn backend_round_trips_results_through_the_provider() {
        let uri = Url::parse("memory://backend-rt").unwrap();
        let backend = MemoryBackend::connect(&uri);
        let provider = backend
            .results_provider_for("client-a", Duration::from_secs(60))
            .await
            .unwrap();

        let cell = provider.get_result("task-1");
        backend
            .report_result("task-1", "client-a", "task-1", &json!(10))
            .await
            .unwrap();

        assert_eq!(cell.wait().await, TaskOutcome::Success(json!(10)));
    }

    #[tokio::test]
    async fn backend_delivers_failures_as_failure_outcomes() {
        let uri = Url::parse("memory://backend-fail").unwrap();
        let backend = MemoryBackend::connect(&uri);
        let provider = backend
            .results_provider_for("client-b", Duration::from_secs(60))
            .await
            .unwrap();

        backend
            .report_exception("task-2", "client-b", "task-2", "IoError", "boom")
            .await
            .unwrap();

        let outcome = provider.get_result("task-2").wait().await;
        assert_eq!(
            outcome,
            TaskOutcome::Failure {
                exc_type: "IoError".to_string(),
                exc_message: "boom".to_string(),
            }
        );
    }
}
