//! Event-driven revalidation of cached queries after mutations.

mod coordinator;
mod events;

pub use coordinator::RevalidationCoordinator;
pub use events::{Epoch, EventQueue, RevalidateEvent, RevalidateScope};
