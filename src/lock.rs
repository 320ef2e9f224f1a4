//! Poisoned-lock recovery helpers.
//!
//! Sync-layer state is shared across tasks; a panic while holding a guard
//! must not wedge every later reader. Recovery logs the operation so stale
//! state after a panic stays diagnosable.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn note_poisoned(target: &'static str, op: &'static str, lock_kind: &'static str) {
    warn!(
        op,
        target_module = target,
        lock_kind,
        result = "poisoned_recovered",
        hint = "state may be stale after panic in another task",
        "Recovered from poisoned sync-layer lock"
    );
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        note_poisoned(target, op, "rwlock.read");
        poisoned.into_inner()
    })
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        note_poisoned(target, op, "rwlock.write");
        poisoned.into_inner()
    })
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        note_poisoned(target, op, "mutex.lock");
        poisoned.into_inner()
    })
}
