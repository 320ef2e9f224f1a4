//! Per-key cache entry.
//!
//! Each entry owns the settled outcome for one query invocation and a watch
//! channel fanning state changes out to bindings. The inner mutex is the
//! single serialization point for that key: freshness checks, the
//! pending-fetch handoff, and direct writes all go through it.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::watch;

use crate::lock::mutex_lock;
use crate::outcome::QueryOutcome;

const SOURCE: &str = "query::entry";

/// Observable state of a cache entry.
#[derive(Debug, Clone)]
pub enum QueryState {
    /// No fetch has run and nothing is cached.
    Idle,
    /// A fetch is in flight; concurrent callers share it.
    Pending,
    /// The last fetch (or direct write) settled with this outcome.
    Settled(QueryOutcome),
}

impl QueryState {
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled(_))
    }

    pub fn outcome(&self) -> Option<&QueryOutcome> {
        match self {
            Self::Settled(outcome) => Some(outcome),
            _ => None,
        }
    }
}

pub(crate) enum Phase {
    Idle,
    Pending,
    Settled {
        outcome: QueryOutcome,
        settled_at: Instant,
    },
}

pub(crate) struct EntryInner {
    pub phase: Phase,
    /// Set by invalidation; a stale outcome is never served even inside TTL.
    pub stale: bool,
}

pub(crate) struct QueryEntry {
    args: Value,
    inner: Mutex<EntryInner>,
    tx: watch::Sender<QueryState>,
    fetches: AtomicU64,
}

impl QueryEntry {
    pub(crate) fn new(args: Value) -> Self {
        // The initial receiver is dropped so receiver_count() reflects
        // bindings only.
        let (tx, _rx) = watch::channel(QueryState::Idle);
        Self {
            args,
            inner: Mutex::new(EntryInner {
                phase: Phase::Idle,
                stale: false,
            }),
            tx,
            fetches: AtomicU64::new(0),
        }
    }

    /// Arguments this entry was first fetched with; reused for refetch.
    pub(crate) fn args(&self) -> &Value {
        &self.args
    }

    pub(crate) fn lock_inner(&self) -> std::sync::MutexGuard<'_, EntryInner> {
        mutex_lock(&self.inner, SOURCE, "lock_inner")
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<QueryState> {
        self.tx.subscribe()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub(crate) fn publish(&self, state: QueryState) {
        self.tx.send_replace(state);
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> QueryState {
        self.tx.borrow().clone()
    }

    pub(crate) fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}
