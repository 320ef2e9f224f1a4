use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use thiserror::Error;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Log output shape for [`init`].
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

/// Install a global tracing subscriber for the embedding application.
///
/// Library consumers that already run their own subscriber should call
/// [`describe_metrics`] alone; `init` is for binaries and test harnesses.
pub fn init(format: LogFormat) -> Result<(), TelemetryError> {
    describe_metrics();

    let env_filter = EnvFilter::builder().from_env_lossy();

    let fmt_layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| TelemetryError::Subscriber(err.to_string()))
}

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "sincro_query_fetch_total",
            Unit::Count,
            "Total number of fetcher executions."
        );
        describe_counter!(
            "sincro_query_hit_total",
            Unit::Count,
            "Total number of gets served from a fresh cached outcome."
        );
        describe_counter!(
            "sincro_query_share_total",
            Unit::Count,
            "Total number of gets that joined an in-flight fetch."
        );
        describe_counter!(
            "sincro_query_evict_total",
            Unit::Count,
            "Total number of entries evicted due to registry capacity."
        );
        describe_counter!(
            "sincro_query_invalidate_total",
            Unit::Count,
            "Total number of entries marked stale."
        );
        describe_gauge!(
            "sincro_revalidate_queue_len",
            Unit::Count,
            "Current number of pending revalidation events."
        );
        describe_counter!(
            "sincro_revalidate_event_dropped_total",
            Unit::Count,
            "Total number of revalidation events dropped due to queue overflow."
        );
        describe_histogram!(
            "sincro_revalidate_consume_ms",
            Unit::Milliseconds,
            "Revalidation consumption latency in milliseconds."
        );
        describe_counter!(
            "sincro_submission_total",
            Unit::Count,
            "Total number of settled submissions, labeled by outcome."
        );
    });
}
