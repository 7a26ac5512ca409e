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

/// Register descriptions for the cache metrics with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "modelcache_find_hit_total",
            Unit::Count,
            "Total number of lookups served from a cached view."
        );
        describe_counter!(
            "modelcache_find_miss_total",
            Unit::Count,
            "Total number of lookups that found no cached view."
        );
        describe_counter!(
            "modelcache_find_negative_total",
            Unit::Count,
            "Total number of lookups answered by a negative marker."
        );
        describe_counter!(
            "modelcache_find_corrupt_total",
            Unit::Count,
            "Total number of lookups that hit a value of the wrong type or encoding."
        );
        describe_counter!(
            "modelcache_lock_timeout_total",
            Unit::Count,
            "Total number of stampede lock waits that timed out."
        );
        describe_histogram!(
            "modelcache_lock_wait_ms",
            Unit::Milliseconds,
            "Time spent waiting for the stampede lock in milliseconds."
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn subscriber_installs_once() {
        let logging = LoggingSettings {
            level: LevelFilter::DEBUG,
            format: LogFormat::Compact,
        };
        init(&logging).expect("first install");
        assert!(matches!(init(&logging), Err(InfraError::Telemetry(_))));
    }
}
