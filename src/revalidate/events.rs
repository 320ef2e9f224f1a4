//! Revalidation event queue.
//!
//! Every revalidation request becomes an event with a unique id and a
//! monotonic epoch, drained in FIFO batches. The epoch orders refreshes
//! after the mutation that caused them, so bindings never observe stale
//! data overwriting fresh data.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::lock::mutex_lock;

const SOURCE: &str = "revalidate::events";

const METRIC_QUEUE_LEN: &str = "sincro_revalidate_queue_len";
const METRIC_EVENT_DROPPED: &str = "sincro_revalidate_event_dropped_total";

/// Monotonic epoch for ordering revalidation within this process.
pub type Epoch = u64;

/// Which cache entries a revalidation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevalidateScope {
    /// Every query with a live subscription.
    ActiveQueries,
    /// Exactly these query names.
    Queries(Vec<String>),
}

/// Revalidation event with idempotency and ordering support.
#[derive(Debug, Clone)]
pub struct RevalidateEvent {
    /// Unique identifier for idempotency (UUIDv4).
    pub id: Uuid,
    /// Monotonic epoch for ordering within this process.
    pub epoch: Epoch,
    pub scope: RevalidateScope,
    /// When the event was created.
    pub timestamp: OffsetDateTime,
}

impl RevalidateEvent {
    pub fn new(scope: RevalidateScope, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            scope,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// In-memory FIFO queue of revalidation events.
///
/// Published by settling actions and consumed by the coordinator. A mutex
/// suffices; contention is expected to be low.
pub struct EventQueue {
    queue: Mutex<VecDeque<RevalidateEvent>>,
    epoch_counter: AtomicU64,
    limit: usize,
}

impl EventQueue {
    /// Create an unbounded queue.
    pub fn new() -> Self {
        Self::new_with_limit(usize::MAX)
    }

    /// Create a queue that drops incoming events beyond `limit`.
    pub fn new_with_limit(limit: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
            limit: limit.max(1),
        }
    }

    /// Get the next epoch number.
    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Publish an event for the given scope.
    pub fn publish(&self, scope: RevalidateScope) {
        let epoch = self.next_epoch();
        let event = RevalidateEvent::new(scope.clone(), epoch);

        let len = {
            let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
            if queue.len() >= self.limit {
                counter!(METRIC_EVENT_DROPPED).increment(1);
                warn!(
                    event_id = %event.id,
                    event_scope = ?scope,
                    limit = self.limit,
                    "Revalidation event dropped: queue full"
                );
                queue.len()
            } else {
                info!(
                    event_id = %event.id,
                    event_epoch = event.epoch,
                    event_scope = ?scope,
                    "Revalidation event enqueued"
                );
                queue.push_back(event);
                queue.len()
            }
        };
        gauge!(METRIC_QUEUE_LEN).set(len as f64);
    }

    /// Drain up to `limit` events, in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<RevalidateEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let events: Vec<RevalidateEvent> = queue.drain(..count).collect();
        gauge!(METRIC_QUEUE_LEN).set(queue.len() as f64);
        events
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
        gauge!(METRIC_QUEUE_LEN).set(0.0);
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
