use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every render cache metric. Safe to call more
/// than once.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "render_cache_hit_total",
            Unit::Count,
            "Objects served from the render cache."
        );
        describe_counter!(
            "render_cache_miss_total",
            Unit::Count,
            "Objects with a cache id that were not found in the store."
        );
        describe_counter!(
            "render_cache_invalid_total",
            Unit::Count,
            "Stored entries rejected by the validation strategy."
        );
        describe_counter!(
            "render_cache_store_total",
            Unit::Count,
            "Entries written to the store, labelled by bin and strategy."
        );
        describe_counter!(
            "render_cache_evict_total",
            Unit::Count,
            "Entries evicted from the in-memory store due to capacity."
        );
        describe_counter!(
            "render_cache_placeholder_total",
            Unit::Count,
            "Placeholders resolved after rendering."
        );
        describe_histogram!(
            "render_cache_view_ms",
            Unit::Milliseconds,
            "Latency of a controller view call in milliseconds."
        );
    });
}
