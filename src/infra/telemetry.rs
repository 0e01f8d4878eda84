use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "tikzrender_cache_hit_total",
            Unit::Count,
            "Total number of result cache hits."
        );
        describe_counter!(
            "tikzrender_cache_miss_total",
            Unit::Count,
            "Total number of result cache misses."
        );
        describe_counter!(
            "tikzrender_cache_evict_total",
            Unit::Count,
            "Total number of result cache evictions due to capacity."
        );
        describe_counter!(
            "tikzrender_cache_expired_total",
            Unit::Count,
            "Total number of result cache entries dropped after their TTL."
        );
        describe_counter!(
            "tikzrender_process_timeout_total",
            Unit::Count,
            "Total number of external tool runs killed on timeout."
        );
        describe_gauge!(
            "tikzrender_queue_queued",
            Unit::Count,
            "Current number of render jobs waiting for a slot."
        );
        describe_gauge!(
            "tikzrender_queue_running",
            Unit::Count,
            "Current number of render jobs holding a slot."
        );
        describe_histogram!(
            "tikzrender_queue_wait_ms",
            Unit::Milliseconds,
            "Time a render job waited for a slot in milliseconds."
        );
        describe_histogram!(
            "tikzrender_pipeline_ms",
            Unit::Milliseconds,
            "Compile and convert latency in milliseconds."
        );
    });
}
