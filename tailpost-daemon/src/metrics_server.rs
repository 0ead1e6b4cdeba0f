//! Prometheus metrics endpoint.
//!
//! Uses the built-in HTTP listener of `metrics-exporter-prometheus`.
//! Cycle and remote-operation histograms get latency buckets sized for
//! network round trips.

use std::net::SocketAddr;

use anyhow::Result;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use tailpost_core::config::MetricsConfig;
use tailpost_core::metrics as m;

/// Install the global metrics recorder and start the HTTP listener.
///
/// Call once per process. Metric descriptions are registered afterwards.
///
/// # Errors
///
/// - unsupported endpoint path or unparsable listen address
/// - socket binding fails or a recorder is already installed
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    if config.endpoint != "/metrics" {
        return Err(anyhow::anyhow!(
            "unsupported metrics endpoint '{}': only '/metrics' is served",
            config.endpoint
        ));
    }

    let addr: SocketAddr = format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(m::CYCLE_DURATION_SECONDS.to_owned()),
            &m::REMOTE_DURATION_BUCKETS,
        )
        .and_then(|b| {
            b.set_buckets_for_metric(
                Matcher::Full(m::REMOTE_OPERATION_DURATION_SECONDS.to_owned()),
                &m::REMOTE_DURATION_BUCKETS,
            )
        })
        .map_err(|e| anyhow::anyhow!("invalid histogram buckets: {}", e))?
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    m::describe_all();

    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(())
}
