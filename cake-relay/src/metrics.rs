//! Prometheus metrics for the audit relay
//!
//! Metrics live in a [`RelayMetrics`] value rather than process-wide statics
//! so that several relays (and tests) can coexist; the binary registers one
//! instance into its registry.

use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Counters and gauges updated by the pool, receiver and hub
#[derive(Clone)]
pub struct RelayMetrics {
    pub jobs_submitted: IntCounter,
    pub jobs_published: IntCounter,
    pub publish_errors: IntCounter,
    pub publishers_active: IntGauge,
    pub broadcasts: IntCounter,
    pub subscribers_connected: IntGauge,
    pub subscribers_evicted: IntCounter,
}

impl RelayMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs_submitted: counter(
                "audit_jobs_submitted_total",
                "Audit lines accepted by the publisher pool",
            ),
            jobs_published: counter(
                "audit_jobs_published_total",
                "Audit lines handed to the broker",
            ),
            publish_errors: counter(
                "audit_publish_errors_total",
                "Audit lines dropped because the broker rejected them",
            ),
            publishers_active: gauge(
                "audit_publishers_active",
                "Publisher workers currently draining the job buffer",
            ),
            broadcasts: counter(
                "audit_broadcasts_total",
                "Messages fanned out by the subscriber hub",
            ),
            subscribers_connected: gauge(
                "audit_subscribers_connected",
                "Live-tail connections registered with the hub",
            ),
            subscribers_evicted: counter(
                "audit_subscribers_evicted_total",
                "Live-tail connections dropped for not keeping up",
            ),
        }
    }

    /// Register every metric into `registry`
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.jobs_submitted.clone()))?;
        registry.register(Box::new(self.jobs_published.clone()))?;
        registry.register(Box::new(self.publish_errors.clone()))?;
        registry.register(Box::new(self.publishers_active.clone()))?;
        registry.register(Box::new(self.broadcasts.clone()))?;
        registry.register(Box::new(self.subscribers_connected.clone()))?;
        registry.register(Box::new(self.subscribers_evicted.clone()))?;
        Ok(())
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// Names and help strings are static, construction cannot fail.
#[allow(clippy::expect_used)]
fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help)).expect("valid counter opts")
}

#[allow(clippy::expect_used)]
fn gauge(name: &str, help: &str) -> IntGauge {
    IntGauge::with_opts(Opts::new(name, help)).expect("valid gauge opts")
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Encoder;

    #[test]
    fn test_register_exposes_all_metrics() {
        let registry = Registry::new();
        let metrics = RelayMetrics::new();
        metrics.register(&registry).unwrap();

        metrics.jobs_published.inc();
        metrics.subscribers_connected.set(3);

        let families = registry.gather();
        assert_eq!(families.len(), 7);

        let mut buffer = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&families, &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("audit_jobs_published_total 1"));
        assert!(text.contains("audit_subscribers_connected 3"));
    }

    #[test]
    fn test_double_register_fails() {
        let registry = Registry::new();
        let metrics = RelayMetrics::new();
        metrics.register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }
}
