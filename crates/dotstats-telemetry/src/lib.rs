mod metrics;

pub use metrics::{MetricKind, MetricSample, MetricsRecorder};

use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for logging and metrics.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "dotstats_server" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit one JSON object per line instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

/// Handle to the process-wide telemetry state.
#[derive(Clone)]
pub struct Telemetry {
    metrics: Arc<MetricsRecorder>,
}

impl Telemetry {
    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.metrics)
    }
}

fn filter_directives(config: &TelemetryConfig) -> String {
    let mut directives = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        directives.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    directives
}

/// Initialize the tracing subscriber. Call once at startup.
///
/// A second call keeps the subscriber installed by the first one.
pub fn init_telemetry(config: TelemetryConfig) -> Telemetry {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config)));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    if tracing_subscriber::registry().with(fmt_layer).try_init().is_err() {
        tracing::debug!("tracing subscriber already installed");
    }

    Telemetry {
        metrics: Arc::new(MetricsRecorder::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_module_overrides() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![
                ("dotstats_server".into(), Level::DEBUG),
                ("tower_http".into(), Level::ERROR),
            ],
            json: true,
        };
        assert_eq!(
            filter_directives(&config),
            "warn,dotstats_server=debug,tower_http=error"
        );
    }

    #[test]
    fn init_twice_does_not_panic() {
        let first = init_telemetry(TelemetryConfig::default());
        let second = init_telemetry(TelemetryConfig::default());
        first.metrics().counter_inc("a", &[], 1);
        assert_eq!(second.metrics().counter_get("a", &[]), 0);
    }
}
