//! # In-Memory Broker
//!
//! Single-process implementation of the queue traits. Suitable for tests and
//! single-node operation; a distributed deployment uses the AMQP adapter.
//!
//! Faults can be injected (unreachable broker, refused publishes, failing
//! closes) so callers can exercise their error paths.

use crate::channel::{Delivery, DeliveryTag, QueueChannel, QueueConnection, QueueConnector};
use crate::consumer::Consumer;
use crate::{consumer_tag, QueueError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    redelivered: bool,
}

struct ConsumerSlot {
    tag: String,
    channel_id: u64,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    consumers: Vec<ConsumerSlot>,
    next_consumer: usize,
}

struct Unacked {
    queue: String,
    channel_id: u64,
    message: StoredMessage,
}

#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    unreachable: bool,
    fail_channel: bool,
    fail_assert: bool,
    fail_publish: bool,
    fail_ack: bool,
    fail_close: bool,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    unacked: HashMap<u64, Unacked>,
    next_tag: u64,
    next_id: u64,
    faults: Faults,
    open_connections: usize,
    open_channels: usize,
    published: u64,
    acked: u64,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Push ready messages to consumers, round-robin.
    fn dispatch(&mut self, queue: &str) {
        let Self {
            queues,
            unacked,
            next_tag,
            ..
        } = self;
        let Some(state) = queues.get_mut(queue) else {
            return;
        };

        while !state.consumers.is_empty() {
            let Some(message) = state.ready.pop_front() else {
                break;
            };
            let index = state.next_consumer % state.consumers.len();
            *next_tag += 1;
            let tag = *next_tag;

            let delivery = Delivery {
                tag: DeliveryTag(tag),
                queue: queue.to_string(),
                body: message.body.clone(),
                redelivered: message.redelivered,
            };

            if state.consumers[index].sender.send(delivery).is_ok() {
                unacked.insert(
                    tag,
                    Unacked {
                        queue: queue.to_string(),
                        channel_id: state.consumers[index].channel_id,
                        message,
                    },
                );
                state.next_consumer = index + 1;
            } else {
                // Consumer handle was dropped without cancel
                let slot = state.consumers.remove(index);
                debug!(consumer_tag = %slot.tag, queue, "Removing dropped consumer");
                state.ready.push_front(message);
            }
        }
    }

    fn push_front_redelivered(&mut self, queue: &str, message: StoredMessage) {
        self.queues
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_front(StoredMessage {
                body: message.body,
                redelivered: true,
            });
    }

    /// Drop the channel's consumers and requeue everything it left unacked.
    fn release_channel(&mut self, channel_id: u64) {
        for state in self.queues.values_mut() {
            state.consumers.retain(|c| c.channel_id != channel_id);
        }

        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.channel_id == channel_id)
            .map(|(tag, _)| *tag)
            .collect();
        // Highest tag first so push_front restores the original order
        tags.sort_unstable_by(|a, b| b.cmp(a));

        let mut touched = Vec::new();
        for tag in tags {
            if let Some(unacked) = self.unacked.remove(&tag) {
                self.push_front_redelivered(&unacked.queue, unacked.message);
                touched.push(unacked.queue);
            }
        }

        touched.sort();
        touched.dedup();
        if !touched.is_empty() {
            debug!(channel_id, queues = ?touched, "Requeued unacked deliveries");
        }
        for queue in touched {
            self.dispatch(&queue);
        }
    }
}

/// In-memory broker. Cloning shares the same broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `connect()` fail (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().faults.unreachable = !reachable;
    }

    /// Make `create_channel()` fail.
    pub fn fail_channel_creation(&self, fail: bool) {
        self.state.lock().faults.fail_channel = fail;
    }

    /// Make `assert_queue()` fail.
    pub fn fail_queue_assertion(&self, fail: bool) {
        self.state.lock().faults.fail_assert = fail;
    }

    /// Make `publish()` fail.
    pub fn fail_publishes(&self, fail: bool) {
        self.state.lock().faults.fail_publish = fail;
    }

    /// Make `ack()` fail.
    pub fn fail_acks(&self, fail: bool) {
        self.state.lock().faults.fail_ack = fail;
    }

    /// Make channel and connection `close()` fail.
    pub fn fail_closes(&self, fail: bool) {
        self.state.lock().faults.fail_close = fail;
    }

    /// Put a raw message on a queue as an external producer would.
    pub fn inject(&self, queue: &str, body: impl Into<Vec<u8>>) {
        let mut state = self.state.lock();
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back(StoredMessage {
                body: body.into(),
                redelivered: false,
            });
        state.published += 1;
        state.dispatch(queue);
    }

    /// True if the queue has been declared.
    #[must_use]
    pub fn has_queue(&self, queue: &str) -> bool {
        self.state.lock().queues.contains_key(queue)
    }

    /// Messages waiting on a queue (not yet delivered).
    #[must_use]
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Active consumers on a queue.
    #[must_use]
    pub fn consumer_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.consumers.len())
    }

    /// Deliveries handed out but not acknowledged, across all queues.
    #[must_use]
    pub fn unacked_count(&self) -> usize {
        self.state.lock().unacked.len()
    }

    /// Connections currently open.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.state.lock().open_connections
    }

    /// Channels currently open.
    #[must_use]
    pub fn open_channels(&self) -> usize {
        self.state.lock().open_channels
    }

    /// Total messages accepted by the broker.
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.state.lock().published
    }

    /// Total deliveries acknowledged.
    #[must_use]
    pub fn acked_count(&self) -> u64 {
        self.state.lock().acked
    }
}

#[async_trait]
impl QueueConnector for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn QueueConnection>, QueueError> {
        let mut state = self.state.lock();
        if state.faults.unreachable {
            return Err(QueueError::ConnectionFailed(
                "in-memory broker unreachable".into(),
            ));
        }
        state.open_connections += 1;
        let id = state.next_id();
        debug!(connection_id = id, "In-memory connection opened");

        Ok(Arc::new(InMemoryConnection {
            state: Arc::clone(&self.state),
            id,
            closed: AtomicBool::new(false),
            channels: Mutex::new(Vec::new()),
        }))
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}

/// Connection to an [`InMemoryBroker`].
pub struct InMemoryConnection {
    state: Arc<Mutex<BrokerState>>,
    id: u64,
    closed: AtomicBool,
    channels: Mutex<Vec<Arc<InMemoryChannel>>>,
}

#[async_trait]
impl QueueConnection for InMemoryConnection {
    async fn create_channel(&self) -> Result<Arc<dyn QueueChannel>, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::ConnectionClosed);
        }

        let id = {
            let mut state = self.state.lock();
            if state.faults.unreachable || state.faults.fail_channel {
                return Err(QueueError::Broker("channel creation refused".into()));
            }
            state.open_channels += 1;
            state.next_id()
        };

        let channel = Arc::new(InMemoryChannel {
            state: Arc::clone(&self.state),
            id,
            closed: AtomicBool::new(false),
        });
        self.channels.lock().push(Arc::clone(&channel));
        debug!(connection_id = self.id, channel_id = id, "In-memory channel opened");

        Ok(channel)
    }

    async fn close(&self) -> Result<(), QueueError> {
        if self.state.lock().faults.fail_close {
            return Err(QueueError::Broker("connection close refused".into()));
        }
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(QueueError::ConnectionClosed);
        }

        let channels: Vec<_> = self.channels.lock().drain(..).collect();
        for channel in channels {
            channel.shutdown();
        }
        self.state.lock().open_connections -= 1;
        debug!(connection_id = self.id, "In-memory connection closed");
        Ok(())
    }
}

/// Channel on an [`InMemoryConnection`].
pub struct InMemoryChannel {
    state: Arc<Mutex<BrokerState>>,
    id: u64,
    closed: AtomicBool,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            Err(QueueError::ChannelClosed)
        } else {
            Ok(())
        }
    }

    /// Mark closed and hand unacked deliveries back. Returns false if already closed.
    fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let mut state = self.state.lock();
        state.release_channel(self.id);
        state.open_channels -= 1;
        true
    }
}

#[async_trait]
impl QueueChannel for InMemoryChannel {
    async fn assert_queue(&self, queue: &str) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if state.faults.fail_assert {
            return Err(QueueError::Broker(format!(
                "declaration of '{}' refused",
                queue
            )));
        }
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if state.faults.fail_publish || state.faults.unreachable {
            return Err(QueueError::PublishFailed {
                queue: queue.to_string(),
                reason: "broker refused message".into(),
            });
        }
        let Some(target) = state.queues.get_mut(queue) else {
            return Err(QueueError::QueueNotFound(queue.to_string()));
        };
        target.ready.push_back(StoredMessage {
            body: body.to_vec(),
            redelivered: false,
        });
        state.published += 1;
        state.dispatch(queue);
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Consumer, QueueError> {
        self.ensure_open()?;
        let tag = consumer_tag();
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut state = self.state.lock();
        let Some(target) = state.queues.get_mut(queue) else {
            return Err(QueueError::QueueNotFound(queue.to_string()));
        };
        target.consumers.push(ConsumerSlot {
            tag: tag.clone(),
            channel_id: self.id,
            sender,
        });
        state.dispatch(queue);
        debug!(consumer_tag = %tag, queue, "Consumer registered");

        Ok(Consumer::new(tag, queue, receiver))
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let mut found = false;
        for queue in state.queues.values_mut() {
            let before = queue.consumers.len();
            queue
                .consumers
                .retain(|c| !(c.tag == consumer_tag && c.channel_id == self.id));
            found |= queue.consumers.len() != before;
        }
        if found {
            Ok(())
        } else {
            Err(QueueError::Broker(format!(
                "unknown consumer tag {}",
                consumer_tag
            )))
        }
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if state.faults.fail_ack {
            return Err(QueueError::Broker("ack refused".into()));
        }
        let owned = matches!(state.unacked.get(&tag.0), Some(u) if u.channel_id == self.id);
        if !owned {
            return Err(QueueError::UnknownDeliveryTag(tag.0));
        }
        state.unacked.remove(&tag.0);
        state.acked += 1;
        Ok(())
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let owned = matches!(state.unacked.get(&tag.0), Some(u) if u.channel_id == self.id);
        if !owned {
            return Err(QueueError::UnknownDeliveryTag(tag.0));
        }
        if let Some(unacked) = state.unacked.remove(&tag.0) {
            if requeue {
                let queue = unacked.queue.clone();
                state.push_front_redelivered(&queue, unacked.message);
                state.dispatch(&queue);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        if self.state.lock().faults.fail_close {
            return Err(QueueError::Broker("channel close refused".into()));
        }
        if self.shutdown() {
            debug!(channel_id = self.id, "In-memory channel closed");
            Ok(())
        } else {
            Err(QueueError::ChannelClosed)
        }
    }
}
