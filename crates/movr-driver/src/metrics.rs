//! Prometheus export of the per-operation latencies.
//!
//! The exporter runs its own HTTP listener; every path on it serves the
//! scrape output.

use crate::config::MetricsConfig;
use crate::stats::OperationCategory;
use ::metrics::{describe_counter, describe_histogram, Unit};
use log::info;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

pub(crate) const TRANSACTION_RETRIES: &str = "movr_transaction_retries_total";

/// Bucket bounds of the latency histograms, in milliseconds.
const LATENCY_BUCKETS_MS: &[f64] = &[
    0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// Installs the Prometheus recorder with an HTTP listener on the configured
/// address and describes the driver's metrics.
///
/// Has to be called from within a Tokio runtime.
pub fn init(config: &MetricsConfig) -> Result<(), BuildError> {
    let address = SocketAddr::new(config.metrics_address, config.metrics_port);
    PrometheusBuilder::new()
        .with_http_listener(address)
        .set_buckets_for_metric(
            Matcher::Suffix("_latency".to_string()),
            LATENCY_BUCKETS_MS,
        )?
        .install()?;

    for category in OperationCategory::ALL {
        describe_histogram!(
            category.metric_name(),
            Unit::Milliseconds,
            format!("Latency of {category} transactions, retries included")
        );
    }
    describe_counter!(
        TRANSACTION_RETRIES,
        Unit::Count,
        "Transaction attempts rerun after a serialization conflict"
    );
    info!("Serving Prometheus metrics on http://{address}/metrics");
    Ok(())
}

/// Records one completed operation in the latency histogram of its category.
pub fn observe(category: OperationCategory, elapsed: Duration) {
    ::metrics::histogram!(category.metric_name()).record(elapsed.as_secs_f64() * 1000.0);
}
