//! Live bindings from consumers onto cached queries.
//!
//! A binding is the UI-facing view of one query invocation: three
//! observable states, change notification, and explicit suspension. It
//! holds read access plus a subscription; the registry keeps ownership of
//! the cached value.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;

use crate::error::QueryError;
use crate::key::QueryKey;
use crate::outcome::{Payload, QueryOutcome, Redirect};

use super::entry::QueryState;
use super::registry::QueryRegistry;

/// Consumer-facing state of a bound query.
#[derive(Debug, Clone)]
pub enum BindingView {
    /// No settled value yet. Also reported while a redirect outcome is
    /// parked on the binding; see [`QueryBinding::redirect`].
    Pending,
    Resolved(Payload),
    Errored(QueryError),
}

impl BindingView {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn value(&self) -> Option<&Payload> {
        match self {
            Self::Resolved(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&QueryError> {
        match self {
            Self::Errored(err) => Some(err),
            _ => None,
        }
    }

    fn from_state(state: &QueryState) -> Self {
        match state {
            QueryState::Idle | QueryState::Pending => Self::Pending,
            QueryState::Settled(QueryOutcome::Ready(payload)) => Self::Resolved(payload.clone()),
            QueryState::Settled(QueryOutcome::Failed(err)) => Self::Errored(err.clone()),
            // A redirect is consumed by navigation, not rendering.
            QueryState::Settled(QueryOutcome::Redirect(_)) => Self::Pending,
        }
    }
}

/// Live three-state view of one query invocation.
pub struct QueryBinding {
    registry: Arc<QueryRegistry>,
    name: String,
    args: Value,
    key: QueryKey,
    rx: watch::Receiver<QueryState>,
}

impl QueryBinding {
    /// Bind to a query and start its fetch in the background.
    pub fn bind(
        registry: Arc<QueryRegistry>,
        name: impl Into<String>,
        args: Value,
    ) -> Result<Self, QueryError> {
        let name = name.into();
        let (key, rx) = registry.subscribe(&name, &args)?;
        let binding = Self {
            registry,
            name,
            args,
            key,
            rx,
        };
        binding.spawn_fetch();
        Ok(binding)
    }

    /// Re-subscribe with new derived arguments and start their fetch.
    pub fn rebind(&mut self, args: Value) -> Result<(), QueryError> {
        let (key, rx) = self.registry.subscribe(&self.name, &args)?;
        self.args = args;
        self.key = key;
        self.rx = rx;
        self.spawn_fetch();
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Current view: pending, resolved, or errored.
    pub fn view(&self) -> BindingView {
        BindingView::from_state(&self.rx.borrow())
    }

    /// Redirect outcome, if the last settle was one.
    pub fn redirect(&self) -> Option<Redirect> {
        match &*self.rx.borrow() {
            QueryState::Settled(QueryOutcome::Redirect(redirect)) => Some(redirect.clone()),
            _ => None,
        }
    }

    /// Wait for the next state change.
    pub async fn changed(&mut self) {
        // A closed channel means the registry dropped the entry; the
        // current view already reflects the final state.
        let _ = self.rx.changed().await;
    }

    /// Suspend until the bound query settles.
    ///
    /// This is the explicit suspension point: a consumer that does not call
    /// it renders the `Pending` view instead. A redirect settle returns
    /// `Pending`; check [`redirect`](Self::redirect) afterwards.
    pub async fn wait_ready(&mut self) -> BindingView {
        let result = self
            .rx
            .wait_for(QueryState::is_settled)
            .await
            .map(|state| BindingView::from_state(&state));
        match result {
            Ok(view) => view,
            Err(_) => self.view(),
        }
    }

    pub(crate) fn state_receiver(&self) -> watch::Receiver<QueryState> {
        self.rx.clone()
    }

    fn spawn_fetch(&self) {
        let registry = self.registry.clone();
        let name = self.name.clone();
        let args = self.args.clone();
        tokio::spawn(async move {
            // Errors settle into the entry and reach the binding through
            // its subscription.
            let _ = registry.get(&name, args).await;
        });
    }
}

/// Groups bindings so a consumer can wait on all of them at once.
///
/// This is the documented default for unscoped subtrees: nothing inside
/// renders until every tracked binding has settled. The first error (in
/// tracking order) propagates to the scope boundary.
#[derive(Default)]
pub struct SuspenseScope {
    tracked: Vec<watch::Receiver<QueryState>>,
}

impl SuspenseScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, binding: &QueryBinding) {
        self.tracked.push(binding.state_receiver());
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Wait until every tracked binding settles.
    ///
    /// The underlying fetches progress concurrently; this only gates the
    /// caller. Returns the first tracked error, if any.
    pub async fn settled(&mut self) -> Result<(), QueryError> {
        for rx in &mut self.tracked {
            let state = match rx.wait_for(QueryState::is_settled).await {
                Ok(state) => state.clone(),
                Err(_) => continue,
            };
            if let Some(QueryOutcome::Failed(err)) = state.outcome() {
                return Err(err.clone());
            }
        }
        Ok(())
    }
}
