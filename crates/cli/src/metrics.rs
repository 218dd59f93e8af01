//! Prometheus registry for the command line front end.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use prometheus::{Encoder, Registry, TextEncoder};

/// Registry holding every engine metric.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    linecaster_core::metrics::register_metrics(&registry)
        .expect("engine metrics have unique names");
    registry
});

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use linecaster_core::metrics::{JOBS_CREATED, LINES_DELIVERED};

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        JOBS_CREATED.inc();
        LINES_DELIVERED.inc();
        let output = encode_metrics().unwrap();
        assert!(output.contains("# TYPE linecaster_jobs_created_total counter"));
        assert!(output.contains("linecaster_lines_delivered_total"));
        assert!(output.contains("linecaster_active_jobs"));
    }
}
