//! Cached, deduplicated asynchronous reads and their consumer bindings.

mod binding;
mod entry;
mod reconcile;
mod registry;

pub use binding::{BindingView, QueryBinding, SuspenseScope};
pub use entry::QueryState;
pub use reconcile::{JsonPath, PathSeg, StoreBinding, reconcile};
pub use registry::{Fetcher, QueryOptions, QueryRegistry};
