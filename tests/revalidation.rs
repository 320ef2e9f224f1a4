//! End-to-end revalidation behavior: default sweeps, keyed directives,
//! manual reconciliation, redirects, and the single-flight exchange.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use sincro::{
    Action, ActionExecutor, ActionInput, ActionReply, Directive, FetchReply, KeyValueStore,
    LoopbackTransport, MemoryStore, QueryBinding, QueryRegistry, Redirect, RevalidationCoordinator,
    StoreBinding, SyncConfig,
};
use uuid::Uuid;

/// Todo list backed by an opaque key-value store, the way an application
/// would wire queries and actions to its data source.
fn todo_app() -> (Arc<MemoryStore>, Arc<QueryRegistry>, ActionExecutor) {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(QueryRegistry::new(SyncConfig::default()));

    let source = store.clone();
    registry.register("todos", move |_args| {
        let source = source.clone();
        async move {
            let todos = source.get_item("todos").await.unwrap_or_else(|| json!([]));
            Ok(FetchReply::Data(todos))
        }
    });

    let coordinator = Arc::new(RevalidationCoordinator::new(
        SyncConfig::default(),
        registry.clone(),
    ));
    let executor = ActionExecutor::new(coordinator);

    let sink = store.clone();
    executor.define(Action::new("add-todo", move |input: ActionInput| {
        let sink = sink.clone();
        async move {
            let mut todos = sink.get_item("todos").await.unwrap_or_else(|| json!([]));
            let added = json!({
                "id": Uuid::new_v4().to_string(),
                "title": input.field("title").unwrap_or(Value::Null),
                "completed": false,
            });
            todos
                .as_array_mut()
                .ok_or_else(|| sincro::ActionError::mutation("todos is not a list"))?
                .push(added.clone());
            sink.set_item("todos", todos).await;
            Ok(ActionReply::value(added))
        }
    }));

    (store, registry, executor)
}

#[tokio::test]
async fn add_todo_refreshes_the_bound_list() {
    let (_store, registry, executor) = todo_app();

    let mut binding =
        QueryBinding::bind(registry.clone(), "todos", Value::Null).expect("registered query");
    assert!(binding.view().is_pending(), "nothing fetched yet");

    let view = binding.wait_ready().await;
    assert_eq!(view.value().map(|p| p.as_ref().clone()), Some(json!([])));

    let submission = executor
        .invoke("add-todo", json!({"title": "buy milk"}))
        .await
        .expect("registered action");
    assert!(!submission.pending());

    let todos = binding
        .view()
        .value()
        .map(|p| p.as_ref().clone())
        .expect("refetched after default revalidation");
    let todos = todos.as_array().expect("list payload").clone();
    assert_eq!(todos.len(), 1);
    assert_eq!(todos[0]["title"], json!("buy milk"));
    assert_eq!(todos[0]["completed"], json!(false));
    let id = todos[0]["id"].as_str().expect("generated id");
    assert!(Uuid::parse_str(id).is_ok());
}

#[tokio::test]
async fn store_binding_reports_only_the_changed_paths() {
    let (_store, registry, executor) = todo_app();

    let mut todos =
        StoreBinding::bind(registry, "todos", Value::Null).expect("registered query");
    let first = todos.sync().await.expect("initial payload");
    assert_eq!(first.len(), 1, "whole payload arrives once");
    assert_eq!(todos.value(), &json!([]));

    executor
        .invoke("add-todo", json!({"title": "buy milk"}))
        .await
        .expect("registered action");

    let changed = todos.next_update().await.expect("revalidated payload");
    let changed: Vec<String> = changed.iter().map(|p| p.to_string()).collect();
    assert_eq!(changed, vec!["$[0]"], "only the appended item moved");
    assert_eq!(todos.value()[0]["title"], json!("buy milk"));
}

#[tokio::test]
async fn default_revalidation_is_eager_for_active_queries_and_lazy_otherwise() {
    let (_store, registry, executor) = todo_app();
    registry.register("archive", |_args| async { Ok(FetchReply::Data(json!([]))) });

    registry.get("todos", Value::Null).await.expect("todos");
    registry.get("archive", Value::Null).await.expect("archive");
    let (_key, _subscription) = registry
        .subscribe("todos", &Value::Null)
        .expect("registered query");

    executor
        .invoke("add-todo", json!({"title": "x"}))
        .await
        .expect("invoke");

    // Subscribed todos refetched inside the invoke; unsubscribed archive
    // is not part of the active view.
    assert_eq!(registry.fetch_count("todos", &Value::Null), 2);
    assert_eq!(registry.fetch_count("archive", &Value::Null), 1);
}

#[tokio::test]
async fn keyed_directive_invalidates_exactly_the_listed_queries() {
    let registry = Arc::new(QueryRegistry::new(SyncConfig::default()));
    registry.register("todos", |_args| async { Ok(FetchReply::Data(json!([]))) });
    registry.register("profile", |_args| async {
        Ok(FetchReply::Data(json!({"name": "ada"})))
    });
    let coordinator = Arc::new(RevalidationCoordinator::new(
        SyncConfig::default(),
        registry.clone(),
    ));
    let executor = ActionExecutor::new(coordinator);
    executor.define(Action::new("rename-todo", |_input| async {
        Ok(ActionReply::value(Value::Null).with_revalidate(Directive::Keys(vec!["todos".into()])))
    }));

    registry.get("todos", Value::Null).await.expect("todos");
    registry.get("profile", Value::Null).await.expect("profile");
    let (_tk, _ts) = registry.subscribe("todos", &Value::Null).expect("todos");
    let (_pk, _ps) = registry.subscribe("profile", &Value::Null).expect("profile");

    executor
        .invoke("rename-todo", json!({}))
        .await
        .expect("invoke");

    assert_eq!(registry.fetch_count("todos", &Value::Null), 2);
    assert_eq!(
        registry.fetch_count("profile", &Value::Null),
        1,
        "unlisted keys stay untouched"
    );
}

#[tokio::test]
async fn manual_reconciliation_updates_the_cache_without_a_fetch() {
    let (_store, registry, executor) = todo_app();
    executor.define(
        Action::new("import-todos", |_input| async {
            Ok(ActionReply::value(json!([{"title": "imported", "completed": true}]))
                .with_revalidate(Directive::Keys(Vec::new())))
        })
        .with_on_complete(|ctx| async move {
            ctx.registry
                .set("todos", &Value::Null, ctx.reply.value.clone());
            ctx.submission.clear();
        }),
    );

    registry.get("todos", Value::Null).await.expect("prime");
    executor
        .invoke("import-todos", json!({}))
        .await
        .expect("invoke");

    let outcome = registry.get("todos", Value::Null).await.expect("todos");
    assert_eq!(
        outcome.payload().map(|p| p.as_ref().clone()),
        Some(json!([{"title": "imported", "completed": true}]))
    );
    assert_eq!(
        registry.fetch_count("todos", &Value::Null),
        1,
        "cache was written directly, never refetched"
    );
    assert!(
        executor.tracker().is_empty(),
        "the hook cleared its own submission"
    );
}

#[tokio::test]
async fn query_redirect_is_a_distinguished_outcome() {
    let registry = Arc::new(QueryRegistry::new(SyncConfig::default()));
    registry.register("profile", |_args| async {
        Ok(FetchReply::Redirect(Redirect::to("/sign-in")))
    });
    registry.register("broken", |_args| async {
        Err(sincro::QueryError::fetch("boom"))
    });

    let outcome = registry.get("profile", Value::Null).await.expect("profile");
    assert_eq!(outcome.redirect(), Some(&Redirect::to("/sign-in")));
    assert!(outcome.error().is_none());
    assert!(outcome.payload().is_none());

    let outcome = registry.get("broken", Value::Null).await.expect("broken");
    assert!(outcome.redirect().is_none());
    assert!(outcome.error().is_some());
}

#[tokio::test]
async fn action_redirect_preloads_the_destination_concurrently() {
    let registry = Arc::new(QueryRegistry::new(SyncConfig::default()));
    registry.register("account", |_args| async {
        Ok(FetchReply::Data(json!({"plan": "free"})))
    });
    let coordinator = Arc::new(RevalidationCoordinator::new(
        SyncConfig::default(),
        registry.clone(),
    ));
    coordinator.register_preload("/account", vec!["account".into()]);
    let executor = ActionExecutor::new(coordinator);
    executor.define(Action::new("upgrade", |_input| async {
        Ok(ActionReply::value(Value::Null)
            .with_revalidate(Directive::Skip)
            .with_redirect(Redirect::to("/account")))
    }));

    executor.invoke("upgrade", json!({})).await.expect("invoke");

    // The preload runs alongside the caller's navigation; give it a tick.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(registry.fetch_count("account", &Value::Null), 1);
}

#[tokio::test]
async fn transport_bundles_the_refetch_into_the_action_exchange() {
    let registry = Arc::new(QueryRegistry::new(SyncConfig::default()));
    registry.register("todos", |_args| async { Ok(FetchReply::Data(json!([]))) });
    let coordinator = Arc::new(RevalidationCoordinator::new(
        SyncConfig::default(),
        registry.clone(),
    ));
    let executor = ActionExecutor::new(coordinator);

    let transport = Arc::new(LoopbackTransport::new());
    transport.handle("add-todo", |input: ActionInput| async move {
        let added = json!({"title": input.field("title").unwrap_or(Value::Null)});
        Ok(ActionReply::value(added.clone()).with_refreshed("todos", json!([added])))
    });
    executor.define(Action::over_transport("add-todo", transport));

    registry.get("todos", Value::Null).await.expect("prime");
    let (_key, _subscription) = registry
        .subscribe("todos", &Value::Null)
        .expect("registered query");

    executor
        .invoke("add-todo", json!({"title": "bundled"}))
        .await
        .expect("invoke");

    let outcome = registry.get("todos", Value::Null).await.expect("todos");
    assert_eq!(
        outcome.payload().map(|p| p.as_ref().clone()),
        Some(json!([{"title": "bundled"}]))
    );
    assert_eq!(
        registry.fetch_count("todos", &Value::Null),
        1,
        "one exchange carried both the mutation and the refresh"
    );
}
