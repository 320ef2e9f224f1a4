//! External collaborators: storage and transport.
//!
//! The sync layer treats its data source as an opaque key-value backend
//! and its server channel as a request/response exchange that can return
//! a value, raise a redirect, or bundle revalidation payloads with an
//! action's result. Both are traits; the in-memory implementations here
//! back tests and examples.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::action::{ActionInput, ActionReply, MutationFn};
use crate::error::ActionError;
use crate::lock::{rw_read, rw_write};

const SOURCE: &str = "transport";

/// Opaque key-value backend the query and action functions call into.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Option<Value>;
    async fn set_item(&self, key: &str, value: Value);
}

/// Process-local store for tests and examples.
#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_item(&self, key: &str) -> Option<Value> {
        rw_read(&self.items, SOURCE, "get_item").get(key).cloned()
    }

    async fn set_item(&self, key: &str, value: Value) {
        rw_write(&self.items, SOURCE, "set_item").insert(key.to_string(), value);
    }
}

/// Channel that executes a server action in one exchange.
///
/// The reply may carry a redirect instead of data, and may bundle
/// refreshed query payloads so the mutation and its revalidation share a
/// single round trip.
#[async_trait]
pub trait ActionTransport: Send + Sync {
    async fn run_action(&self, name: &str, input: &ActionInput)
    -> Result<ActionReply, ActionError>;
}

/// In-process transport dispatching to registered handlers.
pub struct LoopbackTransport {
    handlers: DashMap<String, MutationFn>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register the server-side handler for an action name.
    pub fn handle<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(ActionInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionReply, ActionError>> + Send + 'static,
    {
        self.handlers
            .insert(name.into(), Arc::new(move |input| Box::pin(handler(input))));
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionTransport for LoopbackTransport {
    async fn run_action(
        &self,
        name: &str,
        input: &ActionInput,
    ) -> Result<ActionReply, ActionError> {
        let handler = self
            .handlers
            .get(name)
            .map(|handler| handler.clone())
            .ok_or_else(|| ActionError::unknown(name))?;
        handler(input.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::outcome::Redirect;

    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_items() {
        let store = MemoryStore::new();
        assert!(store.get_item("todos").await.is_none());

        store.set_item("todos", json!(["buy milk"])).await;
        assert_eq!(store.get_item("todos").await, Some(json!(["buy milk"])));
    }

    #[tokio::test]
    async fn loopback_dispatches_to_the_named_handler() {
        let transport = LoopbackTransport::new();
        transport.handle("add-todo", |input: ActionInput| async move {
            Ok(ActionReply::value(input.args()))
        });

        let reply = transport
            .run_action("add-todo", &ActionInput::Args(json!({"title": "x"})))
            .await
            .expect("handler registered");
        assert_eq!(reply.value, json!({"title": "x"}));
    }

    #[tokio::test]
    async fn loopback_rejects_unknown_actions() {
        let transport = LoopbackTransport::new();
        let err = transport
            .run_action("missing", &ActionInput::Args(Value::Null))
            .await
            .expect_err("no handler");
        assert_eq!(err, ActionError::unknown("missing"));
    }

    #[tokio::test]
    async fn loopback_can_raise_redirects_and_bundle_payloads() {
        let transport = LoopbackTransport::new();
        transport.handle("sign-out", |_input| async {
            Ok(ActionReply::value(Value::Null)
                .with_redirect(Redirect::to("/sign-in"))
                .with_refreshed("session", Value::Null))
        });

        let reply = transport
            .run_action("sign-out", &ActionInput::Args(Value::Null))
            .await
            .expect("handler registered");
        assert_eq!(reply.redirect, Some(Redirect::to("/sign-in")));
        assert_eq!(reply.refreshed, vec![("session".to_string(), Value::Null)]);
    }
}
