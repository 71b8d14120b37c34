//! In-process broker with durable-queue semantics.
//!
//! Behaves like a single-node broker: messages wait in a ready list, move to
//! an unacknowledged set when delivered, and return to the head of the queue
//! (flagged `redelivered`) when their connection closes or is reset.
//! Outages, publish failures and broker restarts can be simulated, and every
//! broker-side operation is appended to a journal for inspection.

use crate::error::{QueueError, QueueResult};
use crate::transport::{
    Broker, Delivery, PublishProperties, QueueChannel, QueueConnection, QueueOptions,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Default time a fetch waits for a message before returning `None`.
pub const DEFAULT_BLOCK: Duration = Duration::from_millis(50);

/// A broker-side event, in the order the broker observed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Published {
        queue: String,
        message_id: String,
    },
    Delivered {
        queue: String,
        message_id: String,
        tag: String,
        redelivered: bool,
    },
    Acked {
        tag: String,
    },
    Rejected {
        tag: String,
        requeue: bool,
    },
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    payload: Vec<u8>,
    persistent: bool,
    redelivered: bool,
}

#[derive(Debug)]
struct Unacked {
    message: StoredMessage,
    connection_id: u64,
}

#[derive(Debug)]
struct MemoryQueue {
    durable: bool,
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<String, Unacked>,
}

#[derive(Debug)]
struct State {
    available: bool,
    generation: u64,
    next_message: u64,
    next_tag: u64,
    next_connection: u64,
    connect_attempts: u32,
    failing_publishes: u32,
    stall_publishes: bool,
    queues: HashMap<String, MemoryQueue>,
    journal: Vec<JournalEntry>,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
    block: Duration,
}

/// Shared handle to an in-process broker. Clones see the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_block(DEFAULT_BLOCK)
    }

    /// Broker whose fetches wait up to `block` for a message.
    pub fn with_block(block: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    available: true,
                    generation: 0,
                    next_message: 1,
                    next_tag: 1,
                    next_connection: 1,
                    connect_attempts: 0,
                    failing_publishes: 0,
                    stall_publishes: false,
                    queues: HashMap::new(),
                    journal: Vec::new(),
                }),
                notify: Notify::new(),
                block,
            }),
        }
    }

    // ==========================================
    // Fault injection
    // ==========================================

    /// Make the broker reachable or unreachable.
    ///
    /// Going unavailable resets every open connection.
    pub fn set_available(&self, available: bool) {
        let mut state = self.inner.state.lock();
        state.available = available;
        if !available {
            Self::reset_connections(&mut state);
        }
        drop(state);
        self.inner.notify.notify_waiters();
    }

    /// Reset all open connections, requeueing their unacked deliveries.
    pub fn drop_connections(&self) {
        Self::reset_connections(&mut self.inner.state.lock());
        self.inner.notify.notify_waiters();
    }

    /// Simulate a broker restart: connections reset, non-durable queues and
    /// non-persistent messages are lost.
    pub fn restart(&self) {
        let mut state = self.inner.state.lock();
        Self::reset_connections(&mut state);
        state.queues.retain(|_, q| q.durable);
        for queue in state.queues.values_mut() {
            queue.ready.retain(|m| m.persistent);
        }
        drop(state);
        self.inner.notify.notify_waiters();
    }

    /// Fail the next `count` publish calls with `QueueError::Publish`.
    pub fn fail_next_publishes(&self, count: u32) {
        self.inner.state.lock().failing_publishes = count;
    }

    /// Never confirm publishes while `stall` is set.
    pub fn stall_publishes(&self, stall: bool) {
        self.inner.state.lock().stall_publishes = stall;
    }

    // ==========================================
    // Inspection
    // ==========================================

    /// Publish directly, outside any connection. Returns the message id.
    pub fn inject(&self, queue: &str, payload: &[u8]) -> String {
        let mut state = self.inner.state.lock();
        let message_id = Self::enqueue(&mut state, queue, payload, true);
        drop(state);
        self.inner.notify.notify_waiters();
        message_id
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.inner.state.lock().journal.clone()
    }

    pub fn connect_attempts(&self) -> u32 {
        self.inner.state.lock().connect_attempts
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.inner.state.lock().queues.contains_key(queue)
    }

    pub fn is_durable(&self, queue: &str) -> bool {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.durable)
            .unwrap_or(false)
    }

    /// Messages waiting for delivery.
    pub fn ready_count(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    /// Messages delivered but not yet settled.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.unacked.len())
            .unwrap_or(0)
    }

    /// Payloads of ready messages, head first.
    pub fn ready_payloads(&self, queue: &str) -> Vec<Vec<u8>> {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    pub fn ack_count(&self) -> usize {
        self.count(|e| matches!(e, JournalEntry::Acked { .. }))
    }

    pub fn reject_count(&self) -> usize {
        self.count(|e| matches!(e, JournalEntry::Rejected { .. }))
    }

    pub fn publish_count(&self) -> usize {
        self.count(|e| matches!(e, JournalEntry::Published { .. }))
    }

    /// Number of times a given message was handed to a consumer.
    pub fn deliveries_of(&self, message_id: &str) -> usize {
        self.count(|e| matches!(e, JournalEntry::Delivered { message_id: id, .. } if id == message_id))
    }

    fn count(&self, pred: impl Fn(&JournalEntry) -> bool) -> usize {
        self.inner.state.lock().journal.iter().filter(|e| pred(e)).count()
    }

    // ==========================================
    // Internals
    // ==========================================

    fn enqueue(state: &mut State, queue: &str, payload: &[u8], persistent: bool) -> String {
        let message_id = format!("msg-{}", state.next_message);
        state.next_message += 1;

        let target = state
            .queues
            .entry(queue.to_string())
            .or_insert_with(|| MemoryQueue {
                durable: true,
                ready: VecDeque::new(),
                unacked: HashMap::new(),
            });
        target.ready.push_back(StoredMessage {
            message_id: message_id.clone(),
            payload: payload.to_vec(),
            persistent,
            redelivered: false,
        });

        state.journal.push(JournalEntry::Published {
            queue: queue.to_string(),
            message_id: message_id.clone(),
        });
        message_id
    }

    fn requeue_where(state: &mut State, pred: impl Fn(&Unacked) -> bool) {
        for queue in state.queues.values_mut() {
            let tags: Vec<String> = queue
                .unacked
                .iter()
                .filter(|(_, u)| pred(u))
                .map(|(tag, _)| tag.clone())
                .collect();
            // Tags are monotonically numbered; requeue oldest last so it ends up first.
            let mut tags = tags;
            tags.sort_by_key(|t| std::cmp::Reverse(tag_number(t)));
            for tag in tags {
                if let Some(unacked) = queue.unacked.remove(&tag) {
                    let mut message = unacked.message;
                    message.redelivered = true;
                    queue.ready.push_front(message);
                }
            }
        }
    }

    fn reset_connections(state: &mut State) {
        state.generation += 1;
        Self::requeue_where(state, |_| true);
        debug!(generation = state.generation, "Memory broker connections reset");
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn tag_number(tag: &str) -> u64 {
    tag.trim_start_matches("delivery-").parse().unwrap_or(0)
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self, url: &str) -> QueueResult<Box<dyn QueueConnection>> {
        let mut state = self.inner.state.lock();
        state.connect_attempts += 1;
        if !state.available {
            return Err(QueueError::Connection(format!("broker at {url} is unavailable")));
        }
        let id = state.next_connection;
        state.next_connection += 1;

        Ok(Box::new(MemoryConnection {
            broker: self.clone(),
            id,
            generation: state.generation,
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

/// Connection to a [`MemoryBroker`].
pub struct MemoryConnection {
    broker: MemoryBroker,
    id: u64,
    generation: u64,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl QueueConnection for MemoryConnection {
    async fn open_channel(&self) -> QueueResult<Arc<dyn QueueChannel>> {
        let state = self.broker.inner.state.lock();
        if self.closed.load(Ordering::SeqCst) || state.generation != self.generation {
            return Err(QueueError::Channel("connection is closed".to_string()));
        }
        Ok(Arc::new(MemoryChannel {
            broker: self.broker.clone(),
            connection_id: self.id,
            generation: self.generation,
            connection_closed: self.closed.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> QueueResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let id = self.id;
        MemoryBroker::requeue_where(&mut self.broker.inner.state.lock(), |u| {
            u.connection_id == id
        });
        self.broker.inner.notify.notify_waiters();
        Ok(())
    }
}

/// Channel on a [`MemoryConnection`].
pub struct MemoryChannel {
    broker: MemoryBroker,
    connection_id: u64,
    generation: u64,
    connection_closed: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl MemoryChannel {
    fn check_open(&self, state: &State) -> QueueResult<()> {
        if !state.available || state.generation != self.generation {
            return Err(QueueError::Connection("connection reset by broker".to_string()));
        }
        if self.connection_closed.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Channel("channel is closed".to_string()));
        }
        Ok(())
    }

    fn settle(&self, delivery: &Delivery, requeue: Option<bool>) -> QueueResult<()> {
        let mut state = self.broker.inner.state.lock();
        self.check_open(&state)?;

        let queue = state.queues.get_mut(&delivery.queue).ok_or_else(|| {
            QueueError::Channel(format!("queue {} does not exist", delivery.queue))
        })?;
        let unacked = queue.unacked.remove(&delivery.tag).ok_or_else(|| {
            QueueError::Channel(format!("unknown delivery tag {}", delivery.tag))
        })?;

        match requeue {
            None => state.journal.push(JournalEntry::Acked {
                tag: delivery.tag.clone(),
            }),
            Some(requeue) => {
                if requeue {
                    let mut message = unacked.message;
                    message.redelivered = true;
                    queue.ready.push_front(message);
                }
                state.journal.push(JournalEntry::Rejected {
                    tag: delivery.tag.clone(),
                    requeue,
                });
            }
        }
        drop(state);
        self.broker.inner.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl QueueChannel for MemoryChannel {
    async fn declare_queue(&self, queue: &str, options: QueueOptions) -> QueueResult<()> {
        let mut state = self.broker.inner.state.lock();
        self.check_open(&state)?;

        match state.queues.get(queue) {
            Some(existing) if existing.durable != options.durable => {
                Err(QueueError::Channel(format!(
                    "queue {queue} already declared with durable={}",
                    existing.durable
                )))
            }
            Some(_) => Ok(()),
            None => {
                state.queues.insert(
                    queue.to_string(),
                    MemoryQueue {
                        durable: options.durable,
                        ready: VecDeque::new(),
                        unacked: HashMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        properties: PublishProperties,
    ) -> QueueResult<()> {
        let stalled = {
            let mut state = self.broker.inner.state.lock();
            self.check_open(&state)?;
            if state.failing_publishes > 0 {
                state.failing_publishes -= 1;
                return Err(QueueError::Publish("broker refused message".to_string()));
            }
            if !state.stall_publishes {
                MemoryBroker::enqueue(&mut state, queue, payload, properties.persistent);
            }
            state.stall_publishes
        };

        if stalled {
            std::future::pending::<()>().await;
        }
        self.broker.inner.notify.notify_waiters();
        Ok(())
    }

    async fn fetch(&self, queue: &str) -> QueueResult<Option<Delivery>> {
        let deadline = tokio::time::Instant::now() + self.broker.inner.block;

        loop {
            // Registered before checking state so a concurrent publish is not missed.
            let notified = self.broker.inner.notify.notified();

            {
                let mut state = self.broker.inner.state.lock();
                self.check_open(&state)?;

                let tag = format!("delivery-{}", state.next_tag);
                let target = state.queues.get_mut(queue).ok_or_else(|| {
                    QueueError::Channel(format!("queue {queue} does not exist"))
                })?;

                if let Some(message) = target.ready.pop_front() {
                    let delivery = Delivery {
                        tag: tag.clone(),
                        queue: queue.to_string(),
                        payload: message.payload.clone(),
                        redelivered: message.redelivered,
                    };
                    let message_id = message.message_id.clone();
                    target.unacked.insert(
                        tag.clone(),
                        Unacked {
                            message,
                            connection_id: self.connection_id,
                        },
                    );
                    state.next_tag += 1;
                    state.journal.push(JournalEntry::Delivered {
                        queue: queue.to_string(),
                        message_id,
                        tag,
                        redelivered: delivery.redelivered,
                    });
                    return Ok(Some(delivery));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.settle(delivery, None)
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> QueueResult<()> {
        self.settle(delivery, Some(requeue))
    }

    async fn close(&self) -> QueueResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
