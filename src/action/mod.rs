//! Named asynchronous mutations and their tracked invocations.

mod definition;
mod executor;
mod submission;

pub use definition::{
    Action, ActionInput, ActionReply, CompleteContext, CompleteHook, Directive, FormPayload,
    MutationFn, PREVENT_DEFAULT_FIELD,
};
pub use executor::ActionExecutor;
pub use submission::{Submission, SubmissionState, SubmissionTracker};
