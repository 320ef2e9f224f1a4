//! Query registry: named, cached, deduplicated asynchronous reads.
//!
//! The registry exclusively owns cached outcomes. Consumers read through
//! [`get`](QueryRegistry::get) or hold a subscription via a binding; writes
//! go through fetch settlement, [`set`](QueryRegistry::set), or
//! [`invalidate`](QueryRegistry::invalidate) and nothing else.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::BoxFuture;
use metrics::counter;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::outcome::{FetchReply, QueryOutcome};

use super::entry::{Phase, QueryEntry, QueryState};

const METRIC_QUERY_FETCH: &str = "sincro_query_fetch_total";
const METRIC_QUERY_HIT: &str = "sincro_query_hit_total";
const METRIC_QUERY_SHARE: &str = "sincro_query_share_total";
const METRIC_QUERY_EVICT: &str = "sincro_query_evict_total";
const METRIC_QUERY_INVALIDATE: &str = "sincro_query_invalidate_total";

/// Asynchronous read operation behind a query.
pub type Fetcher =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<FetchReply, QueryError>> + Send + Sync>;

/// Per-query registration options.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Freshness window override; falls back to `SyncConfig::default_ttl_ms`.
    pub ttl: Option<Duration>,
}

struct QueryDef {
    fetcher: Fetcher,
    ttl: Option<Duration>,
}

enum Plan {
    Hit(QueryOutcome),
    Join(watch::Receiver<QueryState>),
    Run,
}

/// Process-wide cache of named asynchronous reads.
///
/// Constructed explicitly and shared via `Arc`; there is no ambient global
/// instance. `clear` defines the per-session/per-test reset.
pub struct QueryRegistry {
    config: SyncConfig,
    defs: DashMap<String, QueryDef>,
    entries: DashMap<QueryKey, Arc<QueryEntry>>,
}

impl QueryRegistry {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            defs: DashMap::new(),
            entries: DashMap::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Define a query with default options.
    pub fn register<F, Fut>(&self, name: impl Into<String>, fetcher: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FetchReply, QueryError>> + Send + 'static,
    {
        self.register_with(name, QueryOptions::default(), fetcher);
    }

    /// Define a query with explicit options.
    ///
    /// Registering the same name twice replaces the fetcher; cached entries
    /// for the old fetcher stay until they expire or are invalidated.
    pub fn register_with<F, Fut>(&self, name: impl Into<String>, options: QueryOptions, fetcher: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FetchReply, QueryError>> + Send + 'static,
    {
        let name = name.into();
        debug!(query = %name, ttl = ?options.ttl, "Query registered");
        self.defs.insert(
            name,
            QueryDef {
                fetcher: Arc::new(move |args| Box::pin(fetcher(args))),
                ttl: options.ttl,
            },
        );
    }

    /// Resolve a query: cached outcome when fresh, otherwise one shared
    /// fetch.
    ///
    /// Concurrent callers of the same key during an in-flight fetch join
    /// that fetch instead of issuing their own. The returned outcome has
    /// three variants; callers must handle data, failure, and redirect.
    pub async fn get(&self, name: &str, args: Value) -> Result<QueryOutcome, QueryError> {
        let (fetcher, ttl) = self.lookup(name)?;
        let key = QueryKey::new(name, &args);

        loop {
            let entry = self.entry(&key, &args);

            let plan = {
                let mut inner = entry.lock_inner();
                let reusable = match &inner.phase {
                    Phase::Settled {
                        outcome,
                        settled_at,
                    } if self.config.enabled
                        && !inner.stale
                        && settled_at.elapsed() <= ttl =>
                    {
                        Some(Plan::Hit(outcome.clone()))
                    }
                    Phase::Pending => Some(Plan::Join(entry.subscribe())),
                    _ => None,
                };
                match reusable {
                    Some(plan) => plan,
                    None => {
                        inner.phase = Phase::Pending;
                        inner.stale = false;
                        // Published under the lock so a concurrent caller
                        // that observes the pending phase never subscribes
                        // onto the superseded settled value.
                        entry.publish(QueryState::Pending);
                        Plan::Run
                    }
                }
            };

            match plan {
                Plan::Hit(outcome) => {
                    counter!(METRIC_QUERY_HIT, "query" => key.name().to_string()).increment(1);
                    return Ok(outcome);
                }
                Plan::Join(mut rx) => {
                    counter!(METRIC_QUERY_SHARE, "query" => key.name().to_string()).increment(1);
                    match rx.wait_for(QueryState::is_settled).await {
                        Ok(state) => {
                            if let Some(outcome) = state.outcome() {
                                return Ok(outcome.clone());
                            }
                        }
                        // The entry was dropped mid-flight (registry
                        // cleared); start over against the fresh entry.
                        Err(_) => continue,
                    }
                }
                Plan::Run => {
                    entry.record_fetch();
                    counter!(METRIC_QUERY_FETCH, "query" => key.name().to_string()).increment(1);
                    debug!(query = %key, "Query fetch starting");

                    let outcome = QueryOutcome::from_fetch(fetcher(args.clone()).await);

                    {
                        let mut inner = entry.lock_inner();
                        inner.phase = Phase::Settled {
                            outcome: outcome.clone(),
                            settled_at: Instant::now(),
                        };
                        inner.stale = false;
                    }
                    entry.publish(QueryState::Settled(outcome.clone()));
                    debug!(query = %key, "Query fetch settled");
                    return Ok(outcome);
                }
            }
        }
    }

    /// Subscribe to state changes for one query invocation.
    ///
    /// Creates the entry (in `Idle`) when it does not exist yet, so a
    /// binding can attach before the first fetch.
    pub fn subscribe(
        &self,
        name: &str,
        args: &Value,
    ) -> Result<(QueryKey, watch::Receiver<QueryState>), QueryError> {
        if !self.defs.contains_key(name) {
            return Err(QueryError::unknown(name));
        }
        let key = QueryKey::new(name, args);
        let entry = self.entry(&key, args);
        Ok((key, entry.subscribe()))
    }

    /// Write the cache directly without a fetch (manual revalidation path).
    ///
    /// The entry becomes fresh as of now; subscribers are notified; the
    /// fetch counter is untouched.
    pub fn set(&self, name: &str, args: &Value, value: Value) {
        let key = QueryKey::new(name, args);
        let entry = self.entry(&key, args);
        let outcome = QueryOutcome::Ready(Arc::new(value));
        {
            let mut inner = entry.lock_inner();
            inner.phase = Phase::Settled {
                outcome: outcome.clone(),
                settled_at: Instant::now(),
            };
            inner.stale = false;
        }
        entry.publish(QueryState::Settled(outcome));
        debug!(query = %key, "Query cache written directly");
    }

    /// Write every cached invocation of `name`, or the nullary invocation
    /// when none is cached yet. Used for payloads bundled into an action's
    /// exchange.
    pub fn set_by_name(&self, name: &str, value: Value) {
        let targets: Vec<Arc<QueryEntry>> = self
            .entries
            .iter()
            .filter(|item| item.key().name() == name)
            .map(|item| item.value().clone())
            .collect();

        if targets.is_empty() {
            self.set(name, &Value::Null, value);
            return;
        }

        for entry in targets {
            let outcome = QueryOutcome::Ready(Arc::new(value.clone()));
            {
                let mut inner = entry.lock_inner();
                inner.phase = Phase::Settled {
                    outcome: outcome.clone(),
                    settled_at: Instant::now(),
                };
                inner.stale = false;
            }
            entry.publish(QueryState::Settled(outcome));
        }
        debug!(query = %name, "Query cache written directly for all invocations");
    }

    /// Mark every cached invocation of `name` stale and refetch the ones
    /// with live subscribers.
    ///
    /// Unsubscribed entries refetch lazily on their next `get`.
    pub async fn invalidate(&self, name: &str) {
        let targets: Vec<(QueryKey, Arc<QueryEntry>)> = self
            .entries
            .iter()
            .filter(|item| item.key().name() == name)
            .map(|item| (item.key().clone(), item.value().clone()))
            .collect();

        for (key, entry) in targets {
            {
                let mut inner = entry.lock_inner();
                if matches!(inner.phase, Phase::Pending) {
                    // The in-flight fetch will settle fresh; marking it
                    // stale would discard data newer than the invalidation.
                    continue;
                }
                inner.stale = true;
            }
            counter!(METRIC_QUERY_INVALIDATE, "query" => key.name().to_string()).increment(1);

            if entry.subscriber_count() > 0 {
                debug!(query = %key, "Invalidated entry has subscribers; refetching");
                if let Err(err) = self.get(name, entry.args().clone()).await {
                    debug!(query = %key, error = %err, "Eager refetch skipped");
                }
            } else {
                debug!(query = %key, "Invalidated entry marked stale");
            }
        }
    }

    /// Distinct query names with at least one live subscription.
    pub fn active_queries(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .entries
            .iter()
            .filter(|item| item.value().subscriber_count() > 0)
            .map(|item| item.key().name().to_string())
            .collect();
        names.into_iter().collect()
    }

    /// Fetch executions recorded for one query invocation.
    pub fn fetch_count(&self, name: &str, args: &Value) -> u64 {
        let key = QueryKey::new(name, args);
        self.entries
            .get(&key)
            .map(|entry| entry.fetch_count())
            .unwrap_or(0)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached entry, notifying subscribers with `Idle`.
    ///
    /// In-flight fetches settle into their detached entries and are never
    /// re-attached, so cleared state cannot be resurrected by a late
    /// result. Query definitions survive; see [`reset`](Self::reset).
    pub fn clear(&self) {
        for item in self.entries.iter() {
            item.value().publish(QueryState::Idle);
        }
        self.entries.clear();
        debug!("Query registry cleared");
    }

    /// Drop cached entries and query definitions.
    pub fn reset(&self) {
        self.clear();
        self.defs.clear();
    }

    fn lookup(&self, name: &str) -> Result<(Fetcher, Duration), QueryError> {
        let def = self
            .defs
            .get(name)
            .ok_or_else(|| QueryError::unknown(name))?;
        let ttl = def.ttl.unwrap_or_else(|| self.config.default_ttl());
        Ok((def.fetcher.clone(), ttl))
    }

    fn entry(&self, key: &QueryKey, args: &Value) -> Arc<QueryEntry> {
        if let Some(entry) = self.entries.get(key) {
            return entry.clone();
        }
        self.evict_for_capacity();
        self.entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(QueryEntry::new(args.clone())))
            .clone()
    }

    /// Evict settled, unsubscribed entries once the registry is at
    /// capacity. Pending or subscribed entries are never evicted.
    fn evict_for_capacity(&self) {
        let cap = self.config.max_entries_non_zero().get();
        if self.entries.len() < cap {
            return;
        }
        let overflow = self.entries.len() + 1 - cap;
        let victims: Vec<QueryKey> = self
            .entries
            .iter()
            .filter(|item| {
                item.value().subscriber_count() == 0
                    && matches!(item.value().lock_inner().phase, Phase::Settled { .. })
            })
            .map(|item| item.key().clone())
            .take(overflow)
            .collect();

        for key in victims {
            self.entries.remove(&key);
            counter!(METRIC_QUERY_EVICT, "query" => key.name().to_string()).increment(1);
            debug!(query = %key, "Entry evicted at capacity");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn registry() -> QueryRegistry {
        QueryRegistry::new(SyncConfig::default())
    }

    #[tokio::test]
    async fn get_returns_fetched_payload() {
        let registry = registry();
        registry.register("todos", |_args| async {
            Ok(FetchReply::Data(json!(["buy milk"])))
        });

        let outcome = registry
            .get("todos", Value::Null)
            .await
            .expect("query is registered");
        assert_eq!(
            outcome.payload().map(|p| p.as_ref().clone()),
            Some(json!(["buy milk"]))
        );
        assert_eq!(registry.fetch_count("todos", &Value::Null), 1);
    }

    #[tokio::test]
    async fn unknown_query_is_rejected() {
        let registry = registry();
        let err = registry
            .get("missing", Value::Null)
            .await
            .expect_err("nothing registered");
        assert_eq!(err, QueryError::unknown("missing"));
    }

    #[tokio::test]
    async fn fresh_cache_serves_without_refetch() {
        let registry = registry();
        registry.register("todos", |_args| async { Ok(FetchReply::Data(json!([]))) });

        registry.get("todos", Value::Null).await.expect("first get");
        registry
            .get("todos", Value::Null)
            .await
            .expect("second get");

        assert_eq!(registry.fetch_count("todos", &Value::Null), 1);
    }

    #[tokio::test]
    async fn ttl_expiry_triggers_refetch() {
        let registry = QueryRegistry::new(SyncConfig {
            default_ttl_ms: 0,
            ..Default::default()
        });
        registry.register("todos", |_args| async { Ok(FetchReply::Data(json!([]))) });

        registry.get("todos", Value::Null).await.expect("first get");
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry
            .get("todos", Value::Null)
            .await
            .expect("second get");

        assert_eq!(registry.fetch_count("todos", &Value::Null), 2);
    }

    #[tokio::test]
    async fn per_query_ttl_overrides_default() {
        let registry = QueryRegistry::new(SyncConfig {
            default_ttl_ms: 0,
            ..Default::default()
        });
        registry.register_with(
            "settings",
            QueryOptions {
                ttl: Some(Duration::from_secs(60)),
            },
            |_args| async { Ok(FetchReply::Data(json!({"theme": "dark"}))) },
        );

        registry
            .get("settings", Value::Null)
            .await
            .expect("first get");
        registry
            .get("settings", Value::Null)
            .await
            .expect("second get");

        assert_eq!(registry.fetch_count("settings", &Value::Null), 1);
    }

    #[tokio::test]
    async fn distinct_args_fetch_independently() {
        let registry = registry();
        registry.register("todos", |args| async move { Ok(FetchReply::Data(args)) });

        registry
            .get("todos", json!({"done": true}))
            .await
            .expect("filtered get");
        registry
            .get("todos", json!({"done": false}))
            .await
            .expect("other filtered get");

        assert_eq!(registry.fetch_count("todos", &json!({"done": true})), 1);
        assert_eq!(registry.fetch_count("todos", &json!({"done": false})), 1);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn failed_fetch_is_observable_and_not_sticky_forever() {
        let registry = QueryRegistry::new(SyncConfig {
            default_ttl_ms: 0,
            ..Default::default()
        });
        registry.register("todos", |_args| async {
            Err(QueryError::fetch("store unavailable"))
        });

        let outcome = registry
            .get("todos", Value::Null)
            .await
            .expect("registered query");
        assert_eq!(
            outcome.error(),
            Some(&QueryError::fetch("store unavailable"))
        );

        // The error stays until the next fetch; with an expired TTL the
        // next get retries.
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.get("todos", Value::Null).await.expect("retry get");
        assert_eq!(registry.fetch_count("todos", &Value::Null), 2);
    }

    #[tokio::test]
    async fn set_updates_without_counting_a_fetch() {
        let registry = registry();
        registry.register("todos", |_args| async { Ok(FetchReply::Data(json!([]))) });

        registry.get("todos", Value::Null).await.expect("first get");
        registry.set("todos", &Value::Null, json!(["merged"]));

        let outcome = registry
            .get("todos", Value::Null)
            .await
            .expect("cached get");
        assert_eq!(
            outcome.payload().map(|p| p.as_ref().clone()),
            Some(json!(["merged"]))
        );
        assert_eq!(registry.fetch_count("todos", &Value::Null), 1);
    }

    #[tokio::test]
    async fn invalidate_marks_unsubscribed_entries_stale() {
        let registry = registry();
        registry.register("todos", |_args| async { Ok(FetchReply::Data(json!([]))) });

        registry.get("todos", Value::Null).await.expect("first get");
        registry.invalidate("todos").await;
        // No subscribers: refetch is lazy, so the counter is unchanged
        // until the next get.
        assert_eq!(registry.fetch_count("todos", &Value::Null), 1);

        registry
            .get("todos", Value::Null)
            .await
            .expect("stale get refetches");
        assert_eq!(registry.fetch_count("todos", &Value::Null), 2);
    }

    #[tokio::test]
    async fn invalidate_refetches_subscribed_entries_eagerly() {
        let registry = registry();
        registry.register("todos", |_args| async { Ok(FetchReply::Data(json!([]))) });

        registry.get("todos", Value::Null).await.expect("first get");
        let (_key, _rx) = registry
            .subscribe("todos", &Value::Null)
            .expect("registered query");

        registry.invalidate("todos").await;
        assert_eq!(registry.fetch_count("todos", &Value::Null), 2);
    }

    #[tokio::test]
    async fn disabled_config_refetches_every_get() {
        let registry = QueryRegistry::new(SyncConfig {
            enabled: false,
            ..Default::default()
        });
        registry.register("todos", |_args| async { Ok(FetchReply::Data(json!([]))) });

        registry.get("todos", Value::Null).await.expect("first get");
        registry
            .get("todos", Value::Null)
            .await
            .expect("second get");
        assert_eq!(registry.fetch_count("todos", &Value::Null), 2);
    }

    #[tokio::test]
    async fn clear_resets_entries_but_keeps_definitions() {
        let registry = registry();
        registry.register("todos", |_args| async { Ok(FetchReply::Data(json!([]))) });

        registry.get("todos", Value::Null).await.expect("first get");
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());

        registry
            .get("todos", Value::Null)
            .await
            .expect("definition survived clear");
    }

    #[tokio::test]
    async fn capacity_evicts_settled_unsubscribed_entries() {
        let registry = QueryRegistry::new(SyncConfig {
            max_entries: 2,
            ..Default::default()
        });
        registry.register("item", |args| async move { Ok(FetchReply::Data(args)) });

        registry.get("item", json!(1)).await.expect("get 1");
        registry.get("item", json!(2)).await.expect("get 2");
        registry.get("item", json!(3)).await.expect("get 3");

        assert!(registry.len() <= 2);
    }
}
