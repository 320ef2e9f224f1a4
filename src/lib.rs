//! sincro — a data-synchronization layer for async Rust clients.
//!
//! Sits between UI code and a server-capable data source:
//!
//! - **Queries**: named, cached, deduplicated asynchronous reads. At most
//!   one fetch per key is in flight; concurrent callers share it.
//! - **Bindings**: live three-state views (pending / resolved / errored)
//!   over a query, with explicit suspension and a fine-grained variant for
//!   large nested payloads.
//! - **Actions**: named asynchronous mutations. Each invocation is tracked
//!   as a submission with its own pending/result/error state.
//! - **Revalidation**: after an action settles, the coordinator decides
//!   which cached queries are stale and refreshes them — the active view
//!   by default, an explicit key list, or nothing when the action
//!   reconciled the cache itself.
//!
//! ## Configuration
//!
//! Behavior is controlled via [`SyncConfig`], deserializable from the
//! embedding application's configuration:
//!
//! ```toml
//! [sync]
//! default_ttl_ms = 5000
//! max_entries = 500
//! # ... see config.rs for all options
//! ```

pub mod action;
pub mod config;
pub mod error;
pub mod key;
mod lock;
pub mod outcome;
pub mod query;
pub mod revalidate;
pub mod telemetry;
pub mod transport;

pub use action::{
    Action, ActionExecutor, ActionInput, ActionReply, CompleteContext, Directive, FormPayload,
    Submission, SubmissionState, SubmissionTracker,
};
pub use config::SyncConfig;
pub use error::{ActionError, QueryError};
pub use key::QueryKey;
pub use outcome::{FetchReply, Payload, QueryOutcome, Redirect};
pub use query::{
    BindingView, QueryBinding, QueryOptions, QueryRegistry, QueryState, StoreBinding,
    SuspenseScope,
};
pub use revalidate::{EventQueue, RevalidateEvent, RevalidateScope, RevalidationCoordinator};
pub use transport::{ActionTransport, KeyValueStore, LoopbackTransport, MemoryStore};
