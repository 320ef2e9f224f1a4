//! Action executor.
//!
//! Owns the action definitions and the submission tracker, runs
//! mutations, and hands every settled invocation to the revalidation
//! coordinator. Submission state is always updated before the
//! coordinator runs, so refreshed data is observed after the
//! submission's resolution, never before.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::error::ActionError;
use crate::revalidate::RevalidationCoordinator;

use super::definition::{Action, ActionInput, FormPayload};
use super::submission::{Submission, SubmissionState, SubmissionTracker};

pub(crate) struct ExecutorCore {
    actions: DashMap<String, Action>,
    tracker: SubmissionTracker,
    coordinator: Arc<RevalidationCoordinator>,
}

impl ExecutorCore {
    pub(crate) fn tracker(&self) -> &SubmissionTracker {
        &self.tracker
    }

    pub(crate) async fn invoke(
        self: &Arc<Self>,
        name: &str,
        input: ActionInput,
    ) -> Result<Submission, ActionError> {
        let submission = self.begin(name, input)?;
        self.clone().run(submission.clone()).await;
        Ok(submission)
    }

    fn dispatch(self: &Arc<Self>, name: &str, input: ActionInput) -> Result<Submission, ActionError> {
        let submission = self.begin(name, input)?;
        tokio::spawn(self.clone().run(submission.clone()));
        Ok(submission)
    }

    fn begin(self: &Arc<Self>, name: &str, input: ActionInput) -> Result<Submission, ActionError> {
        if !self.actions.contains_key(name) {
            return Err(ActionError::unknown(name));
        }
        let seq = self.tracker.next_seq();
        let submission = Submission::new(name, seq, input, Arc::downgrade(self));
        self.tracker.track(submission.clone());
        debug!(
            action = name,
            submission_id = %submission.id(),
            seq,
            "Submission created"
        );
        Ok(submission)
    }

    async fn run(self: Arc<Self>, submission: Submission) {
        let runner = self
            .actions
            .get(submission.action())
            .map(|action| (action.runner(), action.complete_hook()));
        let Some((runner, hook)) = runner else {
            // Definition removed between begin and run.
            submission.settle(SubmissionState::Rejected(ActionError::unknown(
                submission.action(),
            )));
            return;
        };

        match runner(submission.input().clone()).await {
            Ok(reply) => {
                submission.settle(SubmissionState::Resolved(Arc::new(reply.value.clone())));
                self.coordinator.settle(&reply, &submission, hook).await;
            }
            Err(err) => {
                debug!(
                    action = submission.action(),
                    submission_id = %submission.id(),
                    error = %err,
                    "Action rejected"
                );
                submission.settle(SubmissionState::Rejected(err));
                self.coordinator.settle_rejected(&submission).await;
            }
        }
    }
}

/// Runs named asynchronous write operations and tracks their submissions.
pub struct ActionExecutor {
    core: Arc<ExecutorCore>,
}

impl ActionExecutor {
    pub fn new(coordinator: Arc<RevalidationCoordinator>) -> Self {
        Self {
            core: Arc::new(ExecutorCore {
                actions: DashMap::new(),
                tracker: SubmissionTracker::new(),
                coordinator,
            }),
        }
    }

    /// Define an action. Redefining a name replaces the mutation.
    pub fn define(&self, action: Action) {
        debug!(action = action.name(), "Action registered");
        self.core.actions.insert(action.name().to_string(), action);
    }

    pub fn coordinator(&self) -> &Arc<RevalidationCoordinator> {
        &self.core.coordinator
    }

    pub fn tracker(&self) -> &SubmissionTracker {
        &self.core.tracker
    }

    /// Direct mode: run the mutation with typed arguments and wait for it
    /// to settle. The returned submission carries the outcome.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Submission, ActionError> {
        self.core.invoke(name, ActionInput::Args(args)).await
    }

    /// Direct mode without waiting: the submission is returned pending and
    /// settles in the background. Several dispatches of one action may be
    /// pending at once.
    pub fn dispatch(&self, name: &str, args: Value) -> Result<Submission, ActionError> {
        self.core.dispatch(name, ActionInput::Args(args))
    }

    /// Structured-submission mode: run the mutation from a key-value form
    /// payload and wait for it to settle.
    ///
    /// A payload marked prevent-default is suppressed entirely; no
    /// submission is created and `Ok(None)` is returned.
    pub async fn submit(
        &self,
        name: &str,
        payload: FormPayload,
    ) -> Result<Option<Submission>, ActionError> {
        if payload.is_suppressed() {
            debug!(action = name, "Structured submission suppressed before dispatch");
            return Ok(None);
        }
        let submission = self.core.invoke(name, ActionInput::Form(payload)).await?;
        Ok(Some(submission))
    }

    /// Structured-submission mode without waiting.
    pub fn dispatch_form(
        &self,
        name: &str,
        payload: FormPayload,
    ) -> Result<Option<Submission>, ActionError> {
        if payload.is_suppressed() {
            debug!(action = name, "Structured submission suppressed before dispatch");
            return Ok(None);
        }
        let submission = self.core.dispatch(name, ActionInput::Form(payload))?;
        Ok(Some(submission))
    }
}
