//! Redis Streams transport.
//!
//! A queue is a stream read through one consumer group:
//!
//! - declare: `XGROUP CREATE <queue> <group> 0 MKSTREAM` (BUSYGROUP = exists)
//! - publish: `XADD <queue> * payload <bytes>`
//! - fetch:   this consumer's own pending list first, then entries idle
//!   longer than `claim_min_idle_ms` in other consumers' pending lists
//!   (`XAUTOCLAIM`), then new entries (`>`). Both recovery reads are
//!   flagged `redelivered`.
//! - ack / reject: `XACK` then `XDEL`; a requeue re-adds the payload first
//!
//! Settled entries are deleted, so a stream only holds unsettled messages.
//! Requires Redis 6.2 or newer.

use crate::error::{QueueError, QueueResult};
use crate::transport::{
    Broker, Delivery, PublishProperties, QueueChannel, QueueConnection, QueueOptions,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, RedisResult, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stream entry field carrying the message body.
pub const PAYLOAD_FIELD: &str = "payload";

/// Start of a stream, and the cursor `XAUTOCLAIM` returns when it has scanned everything.
const STREAM_START: &str = "0-0";

/// Consumer-group settings for the Redis transport.
#[derive(Debug, Clone)]
pub struct RedisStreamsOptions {
    /// Consumer group shared by producers (declare) and subscribers (read).
    pub consumer_group: String,
    /// Consumer name. Keep it stable across restarts so pending
    /// deliveries are recovered by the same consumer.
    pub consumer_name: String,
    /// XREADGROUP block timeout in milliseconds.
    pub block_timeout_ms: u64,
    /// Entries unsettled for this long in another consumer's pending list
    /// are claimed by this one.
    pub claim_min_idle_ms: u64,
}

impl Default for RedisStreamsOptions {
    fn default() -> Self {
        Self {
            consumer_group: "alert-subscribers".to_string(),
            consumer_name: "subscriber-1".to_string(),
            block_timeout_ms: 5000,
            claim_min_idle_ms: 60_000,
        }
    }
}

/// The stream commands the transport needs.
#[async_trait]
pub(crate) trait StreamOps: Send + Sync {
    /// `XGROUP CREATE <stream> <group> 0 MKSTREAM`
    async fn create_group(&self, stream: &str, group: &str) -> RedisResult<()>;

    /// `XADD <stream> * payload <bytes>`, returning the entry id.
    async fn add(&self, stream: &str, payload: &[u8]) -> RedisResult<String>;

    /// `XREADGROUP GROUP <group> <consumer> COUNT 1 [BLOCK ms] STREAMS <stream> <id>`
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        id: &str,
        block_ms: Option<u64>,
    ) -> RedisResult<Value>;

    /// `XAUTOCLAIM <stream> <group> <consumer> <min-idle> <start> COUNT 1`
    async fn autoclaim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        start: &str,
    ) -> RedisResult<Value>;

    /// `XACK <stream> <group> <id>`
    async fn ack(&self, stream: &str, group: &str, id: &str) -> RedisResult<i64>;

    /// `XDEL <stream> <id>`
    async fn delete(&self, stream: &str, id: &str) -> RedisResult<i64>;
}

#[async_trait]
impl StreamOps for MultiplexedConnection {
    async fn create_group(&self, stream: &str, group: &str) -> RedisResult<()> {
        let mut conn = self.clone();
        redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await
    }

    async fn add(&self, stream: &str, payload: &[u8]) -> RedisResult<String> {
        let mut conn = self.clone();
        redis::cmd("XADD")
            .arg(stream)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        id: &str,
        block_ms: Option<u64>,
    ) -> RedisResult<Value> {
        let mut conn = self.clone();
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(1);
        if let Some(block_ms) = block_ms {
            cmd.arg("BLOCK").arg(block_ms);
        }
        cmd.arg("STREAMS").arg(stream).arg(id);
        cmd.query_async(&mut conn).await
    }

    async fn autoclaim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        start: &str,
    ) -> RedisResult<Value> {
        let mut conn = self.clone();
        redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(start)
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> RedisResult<i64> {
        let mut conn = self.clone();
        redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(id)
            .query_async(&mut conn)
            .await
    }

    async fn delete(&self, stream: &str, id: &str) -> RedisResult<i64> {
        let mut conn = self.clone();
        redis::cmd("XDEL").arg(stream).arg(id).query_async(&mut conn).await
    }
}

/// [`Broker`] backed by a Redis server.
#[derive(Debug, Clone, Default)]
pub struct RedisBroker {
    options: RedisStreamsOptions,
}

impl RedisBroker {
    pub fn new(options: RedisStreamsOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn connect(&self, url: &str) -> QueueResult<Box<dyn QueueConnection>> {
        let client = Client::open(url).map_err(|e| QueueError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        info!(consumer = %self.options.consumer_name, "Connected to Redis");

        Ok(Box::new(RedisConnection {
            conn,
            options: self.options.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

/// A multiplexed Redis connection.
pub struct RedisConnection {
    conn: MultiplexedConnection,
    options: RedisStreamsOptions,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl QueueConnection for RedisConnection {
    async fn open_channel(&self) -> QueueResult<Arc<dyn QueueChannel>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Channel("connection is closed".to_string()));
        }

        // Redis has no channels; each channel shares the multiplexed pipe.
        let mut ping_conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut ping_conn)
            .await
            .map_err(|e| QueueError::Channel(e.to_string()))?;

        Ok(Arc::new(StreamChannel::new(
            self.conn.clone(),
            self.options.clone(),
            self.closed.clone(),
        )))
    }

    async fn close(&self) -> QueueResult<()> {
        // The multiplexed pipe shuts down once the last clone is dropped.
        self.closed.store(true, Ordering::SeqCst);
        debug!("Redis connection closed");
        Ok(())
    }
}

/// Where the next fetch reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReadPhase {
    /// Own pending list, after the given id.
    Pending { after: String },
    /// Idle entries of other consumers, from the given cursor.
    Claim { cursor: String },
    /// New entries.
    New,
}

/// Channel over a stream connection.
pub(crate) struct StreamChannel<S> {
    ops: S,
    options: RedisStreamsOptions,
    connection_closed: Arc<AtomicBool>,
    closed: AtomicBool,
    phase: Mutex<ReadPhase>,
}

impl<S: StreamOps> StreamChannel<S> {
    pub(crate) fn new(
        ops: S,
        options: RedisStreamsOptions,
        connection_closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ops,
            options,
            connection_closed,
            closed: AtomicBool::new(false),
            phase: Mutex::new(ReadPhase::Pending {
                after: STREAM_START.to_string(),
            }),
        }
    }

    fn check_open(&self) -> QueueResult<()> {
        if self.closed.load(Ordering::SeqCst) || self.connection_closed.load(Ordering::SeqCst) {
            return Err(QueueError::Channel("channel is closed".to_string()));
        }
        Ok(())
    }

    fn set_phase(&self, phase: ReadPhase) {
        *self.phase.lock() = phase;
    }

    /// Acknowledge and delete the entry.
    async fn settle(&self, delivery: &Delivery) -> QueueResult<()> {
        self.check_open()?;
        let group = &self.options.consumer_group;

        let acked = self.ops.ack(&delivery.queue, group, &delivery.tag).await?;
        if acked == 1 {
            debug!(queue = %delivery.queue, tag = %delivery.tag, "Acknowledged message");
        } else {
            warn!(
                queue = %delivery.queue,
                tag = %delivery.tag,
                "XACK returned {}, message may not exist",
                acked
            );
        }

        self.ops.delete(&delivery.queue, &delivery.tag).await?;
        Ok(())
    }
}

fn is_busygroup(e: &RedisError) -> bool {
    e.code() == Some("BUSYGROUP") || e.to_string().contains("BUSYGROUP")
}

#[async_trait]
impl<S: StreamOps + 'static> QueueChannel for StreamChannel<S> {
    async fn declare_queue(&self, queue: &str, options: QueueOptions) -> QueueResult<()> {
        self.check_open()?;

        if !options.durable {
            warn!(queue = %queue, "Redis streams are always durable, ignoring durable=false");
        }

        // Start at 0 so entries added before the group existed are still delivered.
        match self.ops.create_group(queue, &self.options.consumer_group).await {
            Ok(()) => {
                info!(
                    queue = %queue,
                    group = %self.options.consumer_group,
                    "Created consumer group"
                );
                Ok(())
            }
            Err(e) if is_busygroup(&e) => {
                debug!(
                    queue = %queue,
                    group = %self.options.consumer_group,
                    "Consumer group already exists"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        properties: PublishProperties,
    ) -> QueueResult<()> {
        self.check_open()?;

        if !properties.persistent {
            debug!(queue = %queue, "Redis stream entries are persisted with the stream");
        }

        let entry_id = self.ops.add(queue, payload).await.map_err(|e| {
            if e.is_io_error() || e.is_connection_dropped() {
                QueueError::Redis(e)
            } else {
                QueueError::Publish(e.to_string())
            }
        })?;

        debug!(queue = %queue, entry_id = %entry_id, "Published message");
        Ok(())
    }

    async fn fetch(&self, queue: &str) -> QueueResult<Option<Delivery>> {
        self.check_open()?;
        let group = &self.options.consumer_group;
        let consumer = &self.options.consumer_name;

        loop {
            let phase = self.phase.lock().clone();
            match phase {
                ReadPhase::Pending { after } => {
                    let value = self.ops.read_group(queue, group, consumer, &after, None).await?;
                    match parse_xreadgroup_response(queue, value, true)? {
                        Some(delivery) => {
                            info!(queue = %queue, tag = %delivery.tag, "Recovered pending delivery");
                            self.set_phase(ReadPhase::Pending {
                                after: delivery.tag.clone(),
                            });
                            return Ok(Some(delivery));
                        }
                        None => self.set_phase(ReadPhase::Claim {
                            cursor: STREAM_START.to_string(),
                        }),
                    }
                }
                ReadPhase::Claim { cursor } => {
                    let value = self
                        .ops
                        .autoclaim(queue, group, consumer, self.options.claim_min_idle_ms, &cursor)
                        .await?;
                    let (next, claimed) = parse_xautoclaim_response(queue, value)?;

                    if next == STREAM_START {
                        self.set_phase(ReadPhase::New);
                    } else {
                        self.set_phase(ReadPhase::Claim { cursor: next });
                    }
                    if let Some(delivery) = claimed {
                        info!(queue = %queue, tag = %delivery.tag, "Claimed idle delivery");
                        return Ok(Some(delivery));
                    }
                }
                ReadPhase::New => {
                    let block = Some(self.options.block_timeout_ms);
                    let value = self.ops.read_group(queue, group, consumer, ">", block).await?;
                    let delivery = parse_xreadgroup_response(queue, value, false)?;
                    if delivery.is_none() {
                        // Queue is idle: look for stranded entries again before the next read.
                        self.set_phase(ReadPhase::Claim {
                            cursor: STREAM_START.to_string(),
                        });
                    }
                    return Ok(delivery);
                }
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.settle(delivery).await
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> QueueResult<()> {
        if requeue {
            // Re-add first: a crash between the two steps duplicates, never loses.
            self.publish(&delivery.queue, &delivery.payload, PublishProperties::default())
                .await?;
        }
        self.settle(delivery).await
    }

    async fn close(&self) -> QueueResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn bulk_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(s) => Some(String::from_utf8_lossy(s).to_string()),
        Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

/// Parse one `[id, [field, value, ...]]` stream entry.
fn parse_entry(queue: &str, entry: &Value, redelivered: bool) -> QueueResult<Delivery> {
    let entry = match entry {
        Value::Array(m) if !m.is_empty() => m,
        _ => {
            return Err(QueueError::Protocol(
                "Expected array for message".to_string(),
            ))
        }
    };

    let tag = bulk_to_string(&entry[0]).ok_or_else(|| {
        QueueError::Protocol(format!(
            "Expected string for message ID, got {:?}",
            entry[0]
        ))
    })?;

    // An entry deleted while pending comes back with nil fields; it is
    // surfaced with an empty payload so the consumer can discard it.
    let payload = match entry.get(1) {
        Some(Value::Array(fields)) => {
            let mut found = None;
            for pair in fields.chunks(2) {
                if let [name, value] = pair {
                    if bulk_to_string(name).as_deref() == Some(PAYLOAD_FIELD) {
                        found = match value {
                            Value::BulkString(s) => Some(s.clone()),
                            Value::SimpleString(s) => Some(s.as_bytes().to_vec()),
                            _ => None,
                        };
                        break;
                    }
                }
            }
            found.unwrap_or_default()
        }
        _ => Vec::new(),
    };

    debug!(
        queue = %queue,
        tag = %tag,
        payload_len = payload.len(),
        redelivered,
        "Read message from stream"
    );

    Ok(Delivery {
        tag,
        queue: queue.to_string(),
        payload,
        redelivered,
    })
}

/// Parse the XREADGROUP response to extract the message.
fn parse_xreadgroup_response(
    queue: &str,
    value: Value,
    from_pending: bool,
) -> QueueResult<Option<Delivery>> {
    // Response format:
    // [[stream_key, [[message_id, [field1, value1, field2, value2, ...]]]]]

    let streams = match value {
        Value::Array(streams) => streams,
        // Block timeout expired, no messages
        Value::Nil => return Ok(None),
        _ => {
            return Err(QueueError::Protocol(format!(
                "Unexpected XREADGROUP response type: {:?}",
                value
            )))
        }
    };

    let Some(stream) = streams.first() else {
        return Ok(None);
    };

    let stream = match stream {
        Value::Array(s) if s.len() >= 2 => s,
        _ => {
            return Err(QueueError::Protocol(
                "Expected [key, messages] for stream entry".to_string(),
            ))
        }
    };

    let messages = match &stream[1] {
        Value::Array(m) => m,
        _ => {
            return Err(QueueError::Protocol(
                "Expected array for messages".to_string(),
            ))
        }
    };

    match messages.first() {
        Some(entry) => parse_entry(queue, entry, from_pending).map(Some),
        None => Ok(None),
    }
}

/// Parse an XAUTOCLAIM response into the next cursor and the claimed entry.
fn parse_xautoclaim_response(queue: &str, value: Value) -> QueueResult<(String, Option<Delivery>)> {
    // Response format:
    // [next_cursor, [[message_id, [field, value, ...]]], [deleted_ids...]]

    let parts = match value {
        Value::Array(parts) if parts.len() >= 2 => parts,
        _ => {
            return Err(QueueError::Protocol(format!(
                "Unexpected XAUTOCLAIM response: {:?}",
                value
            )))
        }
    };

    let cursor = bulk_to_string(&parts[0]).ok_or_else(|| {
        QueueError::Protocol(format!("Expected string cursor, got {:?}", parts[0]))
    })?;

    let claimed = match &parts[1] {
        Value::Array(entries) => match entries.first() {
            // Redis 6.2 reports entries deleted while pending as nil.
            Some(Value::Nil) | None => None,
            Some(entry) => Some(parse_entry(queue, entry, true)?),
        },
        _ => {
            return Err(QueueError::Protocol(
                "Expected array for claimed entries".to_string(),
            ))
        }
    };

    Ok((cursor, claimed))
}
