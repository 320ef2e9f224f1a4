//! Action definitions: named asynchronous mutations.
//!
//! An action owns no data; invoking one produces a submission. The reply
//! carries the mutation's value plus everything the coordinator needs:
//! the revalidation directive, an optional redirect, and any query
//! payloads the exchange bundled along.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::error::ActionError;
use crate::outcome::Redirect;
use crate::query::QueryRegistry;
use crate::transport::ActionTransport;

use super::submission::Submission;

/// Marker field that suppresses a structured submission before dispatch.
pub const PREVENT_DEFAULT_FIELD: &str = "_prevent_default";

/// Asynchronous mutation behind an action.
pub type MutationFn =
    Arc<dyn Fn(ActionInput) -> BoxFuture<'static, Result<ActionReply, ActionError>> + Send + Sync>;

/// Hook run after a resolved action, for manual cache reconciliation.
pub type CompleteHook = Arc<dyn Fn(CompleteContext) -> BoxFuture<'static, ()> + Send + Sync>;

/// Everything a manual-revalidation hook may need: write access to the
/// cache, the submission to clear, and the settled reply.
pub struct CompleteContext {
    pub registry: Arc<QueryRegistry>,
    pub submission: Submission,
    pub reply: ActionReply,
}

/// Key-value payload of a structured (form-like) submission.
///
/// Degrades to a full page reload when no client runtime is present, so
/// fields are plain strings rather than typed arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormPayload {
    fields: Vec<(String, String)>,
}

impl FormPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Mark this payload as suppressed; dispatch will create no submission.
    pub fn prevent_default(self) -> Self {
        self.field(PREVENT_DEFAULT_FIELD, "true")
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn is_suppressed(&self) -> bool {
        self.get(PREVENT_DEFAULT_FIELD) == Some("true")
    }

    /// JSON object view of the fields, minus the suppression marker.
    pub fn to_args(&self) -> Value {
        let mut map = Map::new();
        for (name, value) in &self.fields {
            if name != PREVENT_DEFAULT_FIELD {
                map.insert(name.clone(), Value::String(value.clone()));
            }
        }
        Value::Object(map)
    }
}

/// Input of one action invocation.
#[derive(Debug, Clone)]
pub enum ActionInput {
    /// Structured-submission mode: a standardized key-value payload.
    Form(FormPayload),
    /// Direct mode: typed arguments supplied programmatically.
    Args(Value),
}

impl ActionInput {
    /// Canonical JSON view of the input, used for submission filtering.
    pub fn args(&self) -> Value {
        match self {
            Self::Form(payload) => payload.to_args(),
            Self::Args(value) => value.clone(),
        }
    }

    /// Convenience accessor for one field of the canonical view.
    pub fn field(&self, name: &str) -> Option<Value> {
        self.args().get(name).cloned()
    }
}

/// How the coordinator should treat the cache after this action.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Directive {
    /// Invalidate every query active on the current view.
    #[default]
    All,
    /// Invalidate exactly these query names; empty means none.
    Keys(Vec<String>),
    /// The action reconciles the cache itself; do nothing.
    Skip,
}

/// Settled result of an action's mutation.
#[derive(Debug, Clone)]
pub struct ActionReply {
    pub value: Value,
    pub revalidate: Directive,
    pub redirect: Option<Redirect>,
    /// Query payloads returned in the same exchange as the mutation, keyed
    /// by query name. Applied via `set`, never refetched.
    pub refreshed: Vec<(String, Value)>,
}

impl ActionReply {
    pub fn value(value: Value) -> Self {
        Self {
            value,
            revalidate: Directive::default(),
            redirect: None,
            refreshed: Vec::new(),
        }
    }

    pub fn with_revalidate(mut self, directive: Directive) -> Self {
        self.revalidate = directive;
        self
    }

    pub fn with_redirect(mut self, redirect: Redirect) -> Self {
        self.redirect = Some(redirect);
        self
    }

    pub fn with_refreshed(mut self, query: impl Into<String>, payload: Value) -> Self {
        self.refreshed.push((query.into(), payload));
        self
    }
}

/// Named asynchronous write operation.
pub struct Action {
    name: String,
    run: MutationFn,
    on_complete: Option<CompleteHook>,
}

impl Action {
    /// Define an action from a local mutation function.
    pub fn new<F, Fut>(name: impl Into<String>, mutation: F) -> Self
    where
        F: Fn(ActionInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionReply, ActionError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(move |input| Box::pin(mutation(input))),
            on_complete: None,
        }
    }

    /// Define a server-executed action running over a transport.
    ///
    /// The transport may bundle refreshed query payloads into the reply,
    /// combining the mutation and its revalidation in one exchange.
    pub fn over_transport(name: impl Into<String>, transport: Arc<dyn ActionTransport>) -> Self {
        let name = name.into();
        let remote = name.clone();
        Self {
            name,
            run: Arc::new(move |input| {
                let transport = transport.clone();
                let remote = remote.clone();
                Box::pin(async move { transport.run_action(&remote, &input).await })
            }),
            on_complete: None,
        }
    }

    /// Attach a manual-revalidation hook, run after the action resolves.
    pub fn with_on_complete<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(CompleteContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_complete = Some(Arc::new(move |ctx| Box::pin(hook(ctx))));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn runner(&self) -> MutationFn {
        self.run.clone()
    }

    pub(crate) fn complete_hook(&self) -> Option<CompleteHook> {
        self.on_complete.clone()
    }
}
