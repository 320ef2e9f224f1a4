//! Sync-layer configuration.
//!
//! Controls cache freshness, registry capacity, and revalidation batching.
//! All knobs deserialize from the embedding application's own config file:
//!
//! ```toml
//! [sync]
//! enabled = true
//! default_ttl_ms = 5000
//! max_entries = 500
//! consume_batch_limit = 100
//! ```

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for sync configuration
const DEFAULT_TTL_MS: u64 = 5000;
const DEFAULT_MAX_ENTRIES: usize = 500;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;

/// Sync-layer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Enable caching and coordinated revalidation. When disabled, every
    /// `get` refetches and revalidation events are not published.
    pub enabled: bool,
    /// Freshness window for cached outcomes, in milliseconds. Queries may
    /// override this individually.
    pub default_ttl_ms: u64,
    /// Maximum settled entries kept in the registry.
    pub max_entries: usize,
    /// Maximum revalidation events per consumption batch.
    pub consume_batch_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_ms: DEFAULT_TTL_MS,
            max_entries: DEFAULT_MAX_ENTRIES,
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
        }
    }
}

impl SyncConfig {
    /// Freshness window as a `Duration`.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the batch limit as NonZeroUsize, clamping to 1 if zero.
    pub fn consume_batch_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.consume_batch_limit).unwrap_or(NonZeroUsize::MIN)
    }
}
