//! Durable, priority-ordered message bus.
//!
//! Delivery contract: at-least-once, priority-desc then FIFO within a queue.
//! Durability comes from the storage layer's write-ahead log; this module
//! keeps the in-memory priority index, the in-flight visibility window, and
//! the dead-letter accounting. A consumer that crashes mid-processing sees
//! its message again once the visibility timeout expires; an acked message is
//! never redelivered.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};
use trinity_models::error::Result;
use trinity_models::{Message, TrinityError, queues};
use trinity_storage::Storage;

const RECV_POLL_INTERVAL_MS: u64 = 100;
const PUBLISH_MAX_ATTEMPTS: u32 = 5;
const PUBLISH_BACKOFF_BASE_MS: u64 = 50;

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub visibility_timeout: Duration,
    pub dead_letter_threshold: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(300),
            dead_letter_threshold: 5,
        }
    }
}

/// Heap entry ordering: priority desc, then insertion sequence asc.
#[derive(Debug, PartialEq, Eq)]
struct PendingRef {
    priority: i64,
    seq: u64,
    id: String,
}

impl Ord for PendingRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PendingRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct InFlight {
    deadline_ms: i64,
    seq: u64,
    priority: i64,
}

#[derive(Default)]
struct QueueState {
    pending: BinaryHeap<PendingRef>,
    messages: HashMap<String, Message>,
    in_flight: HashMap<String, InFlight>,
    nack_counts: HashMap<String, u32>,
    next_seq: u64,
}

impl QueueState {
    fn push_pending(&mut self, message: Message) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(PendingRef {
            priority: message.priority,
            seq,
            id: message.id.clone(),
        });
        self.messages.insert(message.id.clone(), message);
    }

    /// Requeue preserving the original sequence so redelivery keeps FIFO
    /// position among equal priorities.
    fn requeue(&mut self, id: String, priority: i64, seq: u64) {
        self.pending.push(PendingRef { priority, seq, id });
    }
}

struct BusInner {
    storage: Arc<Storage>,
    config: BusConfig,
    queues: Mutex<HashMap<String, QueueState>>,
    notifies: Mutex<HashMap<String, Arc<Notify>>>,
}

/// Cheaply cloneable bus handle.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

/// Point-in-time queue statistics for observability.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct QueueStats {
    pub depth: usize,
    pub in_flight: usize,
    /// Age of the oldest pending message in milliseconds, if any.
    pub oldest_age_ms: Option<i64>,
}

/// One delivered message. Must be settled with `ack` or `nack`; dropping it
/// without settling leaves redelivery to the visibility timeout.
pub struct Delivery {
    bus: MessageBus,
    pub message: Message,
}

impl Delivery {
    pub async fn ack(self) -> Result<()> {
        self.bus.ack(&self.message.queue, &self.message.id).await
    }

    pub async fn nack(self, requeue: bool) -> Result<()> {
        self.bus
            .nack(&self.message.queue, &self.message.id, requeue)
            .await
    }
}

/// Restartable subscription to one queue.
pub struct Subscription {
    bus: MessageBus,
    queue: String,
}

impl Subscription {
    /// Next message in priority order. Waits when the queue is empty.
    pub async fn recv(&self) -> Result<Delivery> {
        loop {
            if let Some(message) = self.bus.try_take(&self.queue) {
                return Ok(Delivery {
                    bus: self.bus.clone(),
                    message,
                });
            }
            let notify = self.bus.notify_for(&self.queue);
            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(RECV_POLL_INTERVAL_MS)) => {}
            }
        }
    }
}

impl MessageBus {
    /// Open the bus over a storage handle, replaying every queue log so
    /// unacked messages from before a crash are pending again.
    pub fn open(storage: Arc<Storage>, config: BusConfig) -> Result<Self> {
        let bus = Self {
            inner: Arc::new(BusInner {
                storage,
                config,
                queues: Mutex::new(HashMap::new()),
                notifies: Mutex::new(HashMap::new()),
            }),
        };
        bus.replay()?;
        Ok(bus)
    }

    fn replay(&self) -> Result<()> {
        let queue_names = self
            .inner
            .storage
            .bus
            .queues()
            .map_err(TrinityError::storage)?;
        let mut queues = self.inner.queues.lock();
        for name in queue_names {
            let messages = self
                .inner
                .storage
                .bus
                .load(&name)
                .map_err(TrinityError::storage)?;
            let state = queues.entry(name.clone()).or_default();
            for message in messages {
                state.push_pending(message);
            }
            debug!(queue = %name, depth = state.pending.len(), "Replayed queue log");
        }
        Ok(())
    }

    fn notify_for(&self, queue: &str) -> Arc<Notify> {
        self.inner
            .notifies
            .lock()
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Durably publish. Retries transient storage failures with bounded
    /// exponential backoff, then surfaces the error.
    pub async fn publish(
        &self,
        queue: &str,
        payload: serde_json::Value,
        priority: i64,
        correlation_id: Option<String>,
    ) -> Result<String> {
        let mut message = Message::new(queue, payload, priority);
        if let Some(correlation_id) = correlation_id {
            message = message.with_correlation_id(correlation_id);
        }
        self.publish_message(message).await
    }

    pub async fn publish_message(&self, message: Message) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.inner.storage.bus.append(&message) {
                Ok(()) => break,
                Err(err) if attempt < PUBLISH_MAX_ATTEMPTS => {
                    let backoff = PUBLISH_BACKOFF_BASE_MS * 2u64.pow(attempt - 1);
                    warn!(queue = %message.queue, attempt, error = %err, "Publish append failed, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(err) => return Err(TrinityError::TransientIo(err.to_string())),
            }
        }

        let id = message.id.clone();
        let queue = message.queue.clone();
        {
            let mut queues = self.inner.queues.lock();
            queues.entry(queue.clone()).or_default().push_pending(message);
        }
        self.notify_for(&queue).notify_waiters();
        Ok(id)
    }

    pub fn subscribe(&self, queue: &str) -> Subscription {
        Subscription {
            bus: self.clone(),
            queue: queue.to_string(),
        }
    }

    /// Pop the highest-priority pending message into the in-flight window.
    fn try_take(&self, queue: &str) -> Option<Message> {
        let mut queues = self.inner.queues.lock();
        let state = queues.get_mut(queue)?;
        let entry = state.pending.pop()?;
        let message = state.messages.get(&entry.id)?.clone();
        state.in_flight.insert(
            entry.id.clone(),
            InFlight {
                deadline_ms: trinity_models::now_ms()
                    + self.inner.config.visibility_timeout.as_millis() as i64,
                seq: entry.seq,
                priority: entry.priority,
            },
        );
        Some(message)
    }

    /// Settle a delivery: durable tombstone first, then forget the message.
    /// Once this returns, the message is never redelivered.
    pub async fn ack(&self, queue: &str, message_id: &str) -> Result<()> {
        self.inner
            .storage
            .bus
            .append_ack(queue, message_id)
            .map_err(TrinityError::storage)?;
        {
            let mut queues = self.inner.queues.lock();
            if let Some(state) = queues.get_mut(queue) {
                state.in_flight.remove(message_id);
                state.messages.remove(message_id);
                state.nack_counts.remove(message_id);
            }
        }
        let _ = self.inner.storage.bus.maybe_compact(queue);
        Ok(())
    }

    /// Negative-settle a delivery. `requeue=false` moves the message straight
    /// to the dead-letter queue; `requeue=true` returns it to pending until
    /// the dead-letter threshold is reached.
    pub async fn nack(&self, queue: &str, message_id: &str, requeue: bool) -> Result<()> {
        let (message, nacks, seq, priority) = {
            let mut queues = self.inner.queues.lock();
            let state = queues
                .get_mut(queue)
                .ok_or_else(|| TrinityError::not_found("queue", queue))?;
            let flight = state
                .in_flight
                .remove(message_id)
                .ok_or_else(|| TrinityError::not_found("in-flight message", message_id))?;
            let message = state
                .messages
                .get(message_id)
                .cloned()
                .ok_or_else(|| TrinityError::not_found("message", message_id))?;
            let nacks = {
                let count = state.nack_counts.entry(message_id.to_string()).or_insert(0);
                *count += 1;
                *count
            };
            (message, nacks, flight.seq, flight.priority)
        };

        let exhausted = nacks >= self.inner.config.dead_letter_threshold;
        if !requeue || exhausted {
            self.dead_letter(queue, message).await?;
            return Ok(());
        }

        {
            let mut queues = self.inner.queues.lock();
            if let Some(state) = queues.get_mut(queue) {
                state.requeue(message_id.to_string(), priority, seq);
            }
        }
        self.notify_for(queue).notify_waiters();
        Ok(())
    }

    async fn dead_letter(&self, queue: &str, message: Message) -> Result<()> {
        let dead_queue = queues::dead_letter(queue);
        warn!(queue, message_id = %message.id, "Moving message to dead-letter queue");
        let mut dead = message.clone();
        dead.queue = dead_queue.clone();
        self.publish_message(dead).await?;
        // Remove from the source queue only after the dead-letter copy is
        // durable, so a crash in between duplicates rather than loses.
        self.ack(queue, &message.id).await
    }

    /// Return expired in-flight messages to pending. Invoked by the runtime's
    /// sweep task; callable directly in tests.
    pub fn redeliver_expired(&self) -> usize {
        let now = trinity_models::now_ms();
        let mut redelivered = 0;
        let mut touched = Vec::new();
        {
            let mut queues = self.inner.queues.lock();
            for (queue, state) in queues.iter_mut() {
                let expired: Vec<String> = state
                    .in_flight
                    .iter()
                    .filter(|(_, flight)| flight.deadline_ms <= now)
                    .map(|(id, _)| id.clone())
                    .collect();
                if expired.is_empty() {
                    continue;
                }
                for id in expired {
                    if let Some(flight) = state.in_flight.remove(&id) {
                        state.requeue(id, flight.priority, flight.seq);
                        redelivered += 1;
                    }
                }
                touched.push(queue.clone());
            }
        }
        for queue in touched {
            self.notify_for(&queue).notify_waiters();
        }
        redelivered
    }

    /// Non-consuming view of the top pending messages, priority order.
    pub fn peek(&self, queue: &str, limit: usize) -> Vec<Message> {
        let queues = self.inner.queues.lock();
        let Some(state) = queues.get(queue) else {
            return Vec::new();
        };
        let mut refs: Vec<&PendingRef> = state.pending.iter().collect();
        refs.sort_by(|a, b| b.cmp(a));
        refs.into_iter()
            .take(limit)
            .filter_map(|r| state.messages.get(&r.id).cloned())
            .collect()
    }

    pub fn stats(&self, queue: &str) -> QueueStats {
        let queues = self.inner.queues.lock();
        let Some(state) = queues.get(queue) else {
            return QueueStats {
                depth: 0,
                in_flight: 0,
                oldest_age_ms: None,
            };
        };
        let now = trinity_models::now_ms();
        let oldest_age_ms = state
            .pending
            .iter()
            .filter_map(|r| state.messages.get(&r.id))
            .filter_map(|m| chrono::DateTime::parse_from_rfc3339(&m.ts).ok())
            .map(|ts| now - ts.timestamp_millis())
            .max();
        QueueStats {
            depth: state.pending.len(),
            in_flight: state.in_flight.len(),
            oldest_age_ms,
        }
    }
}

#[cfg(test)]
mod tests;
