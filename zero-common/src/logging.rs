//! Logging utilities for Zero services.
//!
//! Provides structured JSON logging with trace IDs for observability.
//!
//! # Noise Filtering
//!
//! By default, noisy library modules (hyper, reqwest, h2, rustls, chromiumoxide)
//! are set to `warn` level to reduce log clutter while keeping business logs
//! at the specified level.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Default noisy modules that should be filtered to warn level.
///
/// The CDP client logs every websocket frame at debug level, which buries
/// session lifecycle events.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio_util",
    "tower_http",
    "tungstenite",
    "chromiumoxide",
];

/// Build the default EnvFilter with noise suppression.
///
/// `RUST_LOG` wins when set.
fn build_filter(log_level: &str, excluded_targets: &[String]) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let mut directives = String::from(log_level);
    for module in NOISY_MODULES {
        directives.push_str(&format!(",{}=warn", module));
    }
    for target in excluded_targets {
        directives.push_str(&format!(",{}=warn", target));
    }

    EnvFilter::new(&directives)
}

/// Initialize logging with the given configuration.
///
/// # Arguments
///
/// * `log_level` - Base log level (trace, debug, info, warn, error)
/// * `log_format` - Output format: "json" for structured JSON, "pretty" for human-readable
pub fn init_logging(log_level: &str, log_format: &str) {
    init_logging_with_exclusions(log_level, log_format, &[]);
}

/// Initialize logging with custom excluded targets.
///
/// Like `init_logging`, but pins the extra `excluded_targets` to `warn` as well.
pub fn init_logging_with_exclusions(
    log_level: &str,
    log_format: &str,
    excluded_targets: &[String],
) {
    let filter = build_filter(log_level, excluded_targets);
    let subscriber = tracing_subscriber::registry().with(filter);

    if log_format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::info!(
        log_level = %log_level,
        log_format = %log_format,
        noise_filtered = NOISY_MODULES.len() + excluded_targets.len(),
        "Logging initialized"
    );
}

/// Generate a new trace ID for request tracing.
pub fn generate_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// Metrics Collection
// ============================================================================

/// Simple metrics collector for request tracking.
#[derive(Debug, Default)]
pub struct Metrics {
    inner: Arc<RwLock<MetricsInner>>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    request_count: u64,
    error_count: u64,
    total_duration_ms: u64,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request.
    pub async fn record_request(&self, duration_ms: u64, success: bool) {
        let mut inner = self.inner.write().await;
        inner.request_count += 1;
        inner.total_duration_ms += duration_ms;
        if !success {
            inner.error_count += 1;
        }
    }

    /// Get current metrics summary.
    pub async fn summary(&self) -> MetricsSummary {
        let inner = self.inner.read().await;
        MetricsSummary {
            request_count: inner.request_count,
            error_count: inner.error_count,
            avg_duration_ms: if inner.request_count > 0 {
                inner.total_duration_ms / inner.request_count
            } else {
                0
            },
        }
    }
}

/// Metrics summary for reporting.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_duration_ms: u64,
}

// ============================================================================
// Logging Macros
// ============================================================================

/// Create a tracing span for a request with business context.
///
/// # Example
///
/// ```ignore
/// let span = request_span!("fetch_screener", trace_id, strategy = %strategy);
/// async { /* ... */ }.instrument(span).await;
/// ```
#[macro_export]
macro_rules! request_span {
    ($name:expr, $trace_id:expr) => {
        tracing::info_span!($name, trace_id = %$trace_id)
    };
    ($name:expr, $trace_id:expr, $($field:tt)*) => {
        tracing::info_span!($name, trace_id = %$trace_id, $($field)*)
    };
}
