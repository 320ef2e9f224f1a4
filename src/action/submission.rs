//! Submissions: tracked invocations of actions.
//!
//! Every invocation gets its own identity and settle state, so several
//! submissions of one action can be pending at once and an optimistic UI
//! can render each individually. Submissions stay tracked until cleared
//! or superseded; pending ones are never collected.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use metrics::counter;
use time::OffsetDateTime;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::ActionError;
use crate::lock::mutex_lock;
use crate::outcome::Payload;

use super::definition::ActionInput;
use super::executor::ExecutorCore;

const SOURCE: &str = "action::submission";

const METRIC_SUBMISSION: &str = "sincro_submission_total";

/// Settle state of one submission.
#[derive(Debug, Clone)]
pub enum SubmissionState {
    Pending,
    Resolved(Payload),
    Rejected(ActionError),
}

impl SubmissionState {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn result(&self) -> Option<&Payload> {
        match self {
            Self::Resolved(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ActionError> {
        match self {
            Self::Rejected(err) => Some(err),
            _ => None,
        }
    }
}

struct SubmissionInner {
    id: Uuid,
    action: String,
    seq: u64,
    input: ActionInput,
    created_at: OffsetDateTime,
    state: watch::Sender<SubmissionState>,
    executor: Weak<ExecutorCore>,
}

/// One tracked invocation of an action.
#[derive(Clone)]
pub struct Submission {
    inner: Arc<SubmissionInner>,
}

impl Submission {
    pub(crate) fn new(
        action: impl Into<String>,
        seq: u64,
        input: ActionInput,
        executor: Weak<ExecutorCore>,
    ) -> Self {
        let (state, _rx) = watch::channel(SubmissionState::Pending);
        Self {
            inner: Arc::new(SubmissionInner {
                id: Uuid::new_v4(),
                action: action.into(),
                seq,
                input,
                created_at: OffsetDateTime::now_utc(),
                state,
                executor,
            }),
        }
    }

    /// A submission with no executor behind it; `retry` and `clear` are
    /// inert. Used where only the identity and state machine matter.
    #[cfg(test)]
    pub(crate) fn detached(action: impl Into<String>, input: ActionInput) -> Self {
        Self::new(action, 0, input, Weak::new())
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn action(&self) -> &str {
        &self.inner.action
    }

    /// Invocation order within the executor, monotonic per process.
    pub fn seq(&self) -> u64 {
        self.inner.seq
    }

    pub fn input(&self) -> &ActionInput {
        &self.inner.input
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.inner.created_at
    }

    pub fn state(&self) -> SubmissionState {
        self.inner.state.borrow().clone()
    }

    pub fn pending(&self) -> bool {
        self.state().is_pending()
    }

    pub fn result(&self) -> Option<Payload> {
        self.state().result().cloned()
    }

    pub fn error(&self) -> Option<ActionError> {
        self.state().error().cloned()
    }

    /// Wait until the underlying mutation settles.
    pub async fn settled(&self) -> SubmissionState {
        let mut rx = self.inner.state.subscribe();
        match rx.wait_for(|state| !state.is_pending()).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }

    /// Re-invoke the action with this submission's input.
    ///
    /// Produces a fresh submission; this one keeps its settled state.
    pub async fn retry(&self) -> Result<Submission, ActionError> {
        let core = self
            .inner
            .executor
            .upgrade()
            .ok_or(ActionError::ExecutorGone { op: "retry" })?;
        core.invoke(&self.inner.action, self.inner.input.clone())
            .await
    }

    /// Remove this submission from tracking.
    ///
    /// Used after manual cache reconciliation. Returns false when it was
    /// already gone.
    pub fn clear(&self) -> bool {
        match self.inner.executor.upgrade() {
            Some(core) => core.tracker().remove(self.inner.id),
            None => false,
        }
    }

    pub(crate) fn settle(&self, state: SubmissionState) {
        let outcome = match &state {
            SubmissionState::Pending => "pending",
            SubmissionState::Resolved(_) => "resolved",
            SubmissionState::Rejected(_) => "rejected",
        };
        counter!(
            METRIC_SUBMISSION,
            "action" => self.inner.action.clone(),
            "outcome" => outcome
        )
        .increment(1);
        self.inner.state.send_replace(state);
    }
}

/// Records in-flight and settled submissions per action.
pub struct SubmissionTracker {
    submissions: Mutex<Vec<Submission>>,
    seq: AtomicU64,
}

impl SubmissionTracker {
    pub(crate) fn new() -> Self {
        Self {
            submissions: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn track(&self, submission: Submission) {
        mutex_lock(&self.submissions, SOURCE, "track").push(submission);
    }

    /// Most recent submission of `action`.
    pub fn latest(&self, action: &str) -> Option<Submission> {
        self.latest_matching(action, |_| true)
    }

    /// Most recent submission of `action` whose input satisfies `filter`.
    pub fn latest_matching<F>(&self, action: &str, filter: F) -> Option<Submission>
    where
        F: Fn(&ActionInput) -> bool,
    {
        mutex_lock(&self.submissions, SOURCE, "latest_matching")
            .iter()
            .rev()
            .find(|s| s.action() == action && filter(s.input()))
            .cloned()
    }

    /// All tracked submissions of `action`, in invocation order.
    pub fn all(&self, action: &str) -> Vec<Submission> {
        self.all_matching(action, |_| true)
    }

    /// All tracked submissions of `action` whose input satisfies `filter`,
    /// in invocation order.
    pub fn all_matching<F>(&self, action: &str, filter: F) -> Vec<Submission>
    where
        F: Fn(&ActionInput) -> bool,
    {
        mutex_lock(&self.submissions, SOURCE, "all_matching")
            .iter()
            .filter(|s| s.action() == action && filter(s.input()))
            .cloned()
            .collect()
    }

    pub(crate) fn remove(&self, id: Uuid) -> bool {
        let mut submissions = mutex_lock(&self.submissions, SOURCE, "remove");
        let before = submissions.len();
        submissions.retain(|s| s.id() != id);
        submissions.len() < before
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.submissions, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
