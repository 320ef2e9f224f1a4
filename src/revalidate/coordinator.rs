//! Revalidation coordinator.
//!
//! Decides, after each action settles, which cached queries are stale and
//! refreshes them: the default active-view sweep, an explicit key list, or
//! nothing at all when the action reconciled the cache itself. Payloads
//! bundled into the action's own exchange are applied without refetching.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use metrics::histogram;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::action::{ActionReply, CompleteContext, CompleteHook, Directive, Submission};
use crate::config::SyncConfig;
use crate::lock::{rw_read, rw_write};
use crate::outcome::Redirect;
use crate::query::QueryRegistry;

use super::events::{EventQueue, RevalidateScope};

const SOURCE: &str = "revalidate::coordinator";

const METRIC_REVALIDATE_CONSUME_MS: &str = "sincro_revalidate_consume_ms";

/// Coordinates cache refreshes after mutations settle.
pub struct RevalidationCoordinator {
    config: SyncConfig,
    registry: Arc<QueryRegistry>,
    queue: Arc<EventQueue>,
    preloads: RwLock<HashMap<String, Vec<String>>>,
}

impl RevalidationCoordinator {
    pub fn new(config: SyncConfig, registry: Arc<QueryRegistry>) -> Self {
        Self {
            config,
            registry,
            queue: Arc::new(EventQueue::new()),
            preloads: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<QueryRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Declare which queries a navigation target needs, so a redirecting
    /// action can start fetching them alongside the navigation.
    pub fn register_preload(
        &self,
        target: impl Into<String>,
        queries: impl IntoIterator<Item = String>,
    ) {
        rw_write(&self.preloads, SOURCE, "register_preload")
            .insert(target.into(), queries.into_iter().collect());
    }

    /// Publish a revalidation event and optionally consume immediately.
    pub async fn trigger(&self, scope: RevalidateScope, consume_now: bool) {
        if !self.config.enabled {
            debug!(event_scope = ?scope, "Revalidation trigger skipped: sync layer disabled");
            return;
        }

        self.queue.publish(scope);

        if consume_now {
            self.consume().await;
        }
    }

    /// Consume pending revalidation events.
    ///
    /// Returns true if any events were processed.
    #[instrument(skip(self))]
    pub async fn consume(&self) -> bool {
        let consume_started_at = Instant::now();
        let events = self.queue.drain(self.config.consume_batch_limit_non_zero().get());
        if events.is_empty() {
            return false;
        }

        let event_count = events.len();
        let event_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        info!(
            event_count,
            event_ids = ?event_ids,
            "Revalidation consumption starting"
        );

        let mut refreshed = 0usize;
        for event in events {
            let names = match event.scope {
                RevalidateScope::ActiveQueries => self.registry.active_queries(),
                RevalidateScope::Queries(names) => names,
            };
            for name in names {
                self.registry.invalidate(&name).await;
                refreshed += 1;
            }
        }

        info!(event_count, refreshed, "Revalidation consumption complete");
        histogram!(METRIC_REVALIDATE_CONSUME_MS)
            .record(consume_started_at.elapsed().as_secs_f64() * 1000.0);

        true
    }

    /// Apply a resolved action's aftermath.
    ///
    /// Runs after the submission is observed as resolved: bundled payloads
    /// first (the single-flight exchange), then the manual hook, then the
    /// directive, with redirect preloads launched alongside.
    pub(crate) async fn settle(
        &self,
        reply: &ActionReply,
        submission: &Submission,
        hook: Option<CompleteHook>,
    ) {
        if !reply.refreshed.is_empty() {
            for (name, value) in &reply.refreshed {
                self.registry.set_by_name(name, value.clone());
            }
            debug!(
                submission_id = %submission.id(),
                queries = reply.refreshed.len(),
                "Bundled revalidation payloads applied"
            );
        }

        if let Some(hook) = hook {
            hook(CompleteContext {
                registry: self.registry.clone(),
                submission: submission.clone(),
                reply: reply.clone(),
            })
            .await;
        }

        if let Some(redirect) = &reply.redirect {
            self.launch_preloads(redirect);
        }

        let already_fresh: Vec<&str> = reply
            .refreshed
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();

        match &reply.revalidate {
            Directive::Skip => {
                debug!(submission_id = %submission.id(), "Revalidation skipped by directive");
            }
            Directive::Keys(names) => {
                let remaining: Vec<String> = names
                    .iter()
                    .filter(|name| !already_fresh.contains(&name.as_str()))
                    .cloned()
                    .collect();
                if !remaining.is_empty() {
                    self.trigger(RevalidateScope::Queries(remaining), true).await;
                }
            }
            Directive::All => {
                if already_fresh.is_empty() {
                    self.trigger(RevalidateScope::ActiveQueries, true).await;
                } else {
                    let remaining: Vec<String> = self
                        .registry
                        .active_queries()
                        .into_iter()
                        .filter(|name| !already_fresh.contains(&name.as_str()))
                        .collect();
                    if !remaining.is_empty() {
                        self.trigger(RevalidateScope::Queries(remaining), true).await;
                    }
                }
            }
        }
    }

    /// Default fallback after a rejected action: sweep the active view.
    pub(crate) async fn settle_rejected(&self, submission: &Submission) {
        debug!(
            submission_id = %submission.id(),
            "Action rejected; revalidating active queries"
        );
        self.trigger(RevalidateScope::ActiveQueries, true).await;
    }

    /// Start destination preloads concurrently with the navigation.
    fn launch_preloads(&self, redirect: &Redirect) -> Vec<JoinHandle<()>> {
        let names = rw_read(&self.preloads, SOURCE, "launch_preloads")
            .get(&redirect.location)
            .cloned()
            .unwrap_or_default();
        if names.is_empty() {
            return Vec::new();
        }

        info!(
            target = %redirect.location,
            queries = names.len(),
            "Redirect destination preload starting"
        );
        names
            .into_iter()
            .map(|name| {
                let registry = self.registry.clone();
                tokio::spawn(async move {
                    let _ = registry.get(&name, Value::Null).await;
                })
            })
            .collect()
    }
}
