use std::sync::Once;

use metrics::{Unit, describe_counter};
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

/// Register help text for every counter the gateway emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "tollgate_response_cache_hit_total",
            Unit::Count,
            "Requests answered from the response cache."
        );
        describe_counter!(
            "tollgate_response_cache_miss_total",
            Unit::Count,
            "Cacheable requests forwarded upstream."
        );
        describe_counter!(
            "tollgate_response_cache_bypass_total",
            Unit::Count,
            "Requests that skipped the response cache entirely."
        );
        describe_counter!(
            "tollgate_response_cache_evict_total",
            Unit::Count,
            "Response cache evictions due to capacity."
        );
        describe_counter!(
            "tollgate_identity_cache_hit_total",
            Unit::Count,
            "Credentials resolved from the identity cache."
        );
        describe_counter!(
            "tollgate_identity_cache_miss_total",
            Unit::Count,
            "Credentials that required a datastore or provider lookup."
        );
        describe_counter!(
            "tollgate_auth_rejected_total",
            Unit::Count,
            "Requests rejected by identity resolution or the authorization gate."
        );
        describe_counter!(
            "tollgate_upstream_error_total",
            Unit::Count,
            "Forwarded requests that failed at the transport level."
        );
    });
}
