//! Prometheus metrics for the runtime.
//!
//! Covers the generic moving parts shared by every reducer-driven service:
//! - Effect execution (by effect type)
//! - Reducer dispatch and rejected commands
//! - Conditional writes that lost an optimistic-concurrency race
//!
//! Domain crates register their own business metrics on top of these.
//!
//! # Example
//!
//! ```rust,no_run
//! use mentorly_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Installs the global Prometheus recorder; the rendered text is served by whoever
/// owns the HTTP surface.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server for the given scrape address.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder and register runtime metric descriptions.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. An already
    /// installed recorder (common in tests) is not an error.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Address Prometheus is expected to scrape.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "mentorly_effects_executed_total",
        "Total number of effects executed, labelled by effect type"
    );
    describe_histogram!(
        "mentorly_effect_batch_duration_seconds",
        "Time taken to drive one batch of effects to completion"
    );
    describe_counter!(
        "mentorly_reducer_actions_total",
        "Total number of actions dispatched to reducers"
    );
    describe_counter!(
        "mentorly_reducer_rejections_total",
        "Total number of commands rejected by reducer validation"
    );
    describe_counter!(
        "mentorly_conditional_write_conflicts_total",
        "Conditional writes that found the record in a different state than observed"
    );
}

/// Effect metrics recorder.
pub struct EffectMetrics;

impl EffectMetrics {
    /// Record one executed effect of the given kind.
    pub fn record_execution(kind: &'static str) {
        counter!("mentorly_effects_executed_total", "type" => kind).increment(1);
    }

    /// Record how long a batch of effects took.
    pub fn record_batch(duration: Duration) {
        histogram!("mentorly_effect_batch_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Reducer metrics recorder.
pub struct ReducerMetrics;

impl ReducerMetrics {
    /// Record an action dispatched to a reducer.
    pub fn record_action(reducer: &'static str) {
        counter!("mentorly_reducer_actions_total", "reducer" => reducer).increment(1);
    }

    /// Record a command rejected by validation.
    pub fn record_rejection(reducer: &'static str, code: &'static str) {
        counter!("mentorly_reducer_rejections_total", "reducer" => reducer, "code" => code)
            .increment(1);
    }
}

/// Conditional write metrics recorder.
pub struct ConcurrencyMetrics;

impl ConcurrencyMetrics {
    /// Record a conditional write that lost a race.
    pub fn record_conflict(entity: &'static str) {
        counter!("mentorly_conditional_write_conflicts_total", "entity" => entity).increment(1);
    }
}
