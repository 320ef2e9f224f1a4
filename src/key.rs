//! Query key definitions.
//!
//! A query is addressed by its registered name plus a hash of the arguments
//! it was invoked with, so `("todos", null)` and `("todos", {"done":true})`
//! occupy independent cache entries.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::Value;

/// Stable identity of one cached query invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    name: String,
    args_hash: u64,
}

impl QueryKey {
    /// Derive the key for a query name and its argument payload.
    pub fn new(name: impl Into<String>, args: &Value) -> Self {
        Self {
            name: name.into(),
            args_hash: hash_args(args),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args_hash(&self) -> u64 {
        self.args_hash
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:016x}", self.name, self.args_hash)
    }
}

/// Compute a hash for any hashable value.
pub fn hash_value<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Hash a JSON argument payload into a stable cache discriminator.
///
/// `serde_json::Value` is not `Hash`, so the canonical string form is hashed.
/// Object key order is already canonical for values built through serde.
pub fn hash_args(args: &Value) -> u64 {
    if args.is_null() {
        return 0;
    }
    hash_value(&args.to_string())
}
