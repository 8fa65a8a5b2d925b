//! Prometheus metrics for the watch engine.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// Labels for per-channel delivery metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DeliveryLabels {
    /// Channel id
    pub channel: String,
    /// Result (success, failure)
    pub result: String,
}

/// Labels for watch loop exits
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct LoopExitLabels {
    /// Loop name (health, events)
    pub watch: String,
    /// Exit reason
    pub reason: String,
}

/// Metrics registry for the pager
pub struct PagerMetrics {
    /// Prometheus registry
    pub registry: Registry,

    /// Alerts currently in the map
    alerts_active: Gauge,
    /// Alerts created
    alerts_created_total: Counter,
    /// Alerts removed by a passing observation
    alerts_cleared_total: Counter,
    /// Delivery attempts per channel and result
    deliveries_total: Family<DeliveryLabels, Counter>,
    /// Successful leadership acquisitions
    leadership_acquisitions_total: Counter,
    /// Watch loop terminations
    loop_exits_total: Family<LoopExitLabels, Counter>,
    /// New user events observed
    events_observed_total: Counter,
    /// Entries in the event dedup cache
    event_cache_size: Gauge,
}

impl PagerMetrics {
    /// Create a new registry with every pager metric registered
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("pager");

        let alerts_active = Gauge::default();
        registry.register(
            "alerts_active",
            "Alerts currently tracked",
            alerts_active.clone(),
        );

        let alerts_created_total = Counter::default();
        registry.register(
            "alerts_created",
            "Alerts created on a first non-passing observation",
            alerts_created_total.clone(),
        );

        let alerts_cleared_total = Counter::default();
        registry.register(
            "alerts_cleared",
            "Alerts removed on a passing observation",
            alerts_cleared_total.clone(),
        );

        let deliveries_total = Family::<DeliveryLabels, Counter>::default();
        registry.register(
            "deliveries",
            "Alert delivery attempts by channel and result",
            deliveries_total.clone(),
        );

        let leadership_acquisitions_total = Counter::default();
        registry.register(
            "leadership_acquisitions",
            "Successful leadership acquisitions",
            leadership_acquisitions_total.clone(),
        );

        let loop_exits_total = Family::<LoopExitLabels, Counter>::default();
        registry.register(
            "loop_exits",
            "Watch loop terminations by loop and reason",
            loop_exits_total.clone(),
        );

        let events_observed_total = Counter::default();
        registry.register(
            "events_observed",
            "New user events observed",
            events_observed_total.clone(),
        );

        let event_cache_size = Gauge::default();
        registry.register(
            "event_cache_size",
            "Entries held in the event dedup cache",
            event_cache_size.clone(),
        );

        Self {
            registry,
            alerts_active,
            alerts_created_total,
            alerts_cleared_total,
            deliveries_total,
            leadership_acquisitions_total,
            loop_exits_total,
            events_observed_total,
            event_cache_size,
        }
    }

    pub fn set_alerts_active(&self, count: usize) {
        self.alerts_active.set(count as i64);
    }

    pub fn record_alert_created(&self) {
        self.alerts_created_total.inc();
    }

    pub fn record_alert_cleared(&self) {
        self.alerts_cleared_total.inc();
    }

    pub fn record_delivery(&self, channel: &str, success: bool) {
        self.deliveries_total
            .get_or_create(&DeliveryLabels {
                channel: channel.to_string(),
                result: if success { "success" } else { "failure" }.to_string(),
            })
            .inc();
    }

    pub fn record_acquisition(&self) {
        self.leadership_acquisitions_total.inc();
    }

    pub fn record_loop_exit(&self, watch: &str, reason: &str) {
        self.loop_exits_total
            .get_or_create(&LoopExitLabels {
                watch: watch.to_string(),
                reason: reason.to_string(),
            })
            .inc();
    }

    pub fn record_events_observed(&self, count: usize, cache_size: usize) {
        self.events_observed_total.inc_by(count as u64);
        self.event_cache_size.set(cache_size as i64);
    }

    /// Delivery count for one channel and outcome.
    pub fn deliveries(&self, channel: &str, success: bool) -> u64 {
        self.deliveries_total
            .get_or_create(&DeliveryLabels {
                channel: channel.to_string(),
                result: if success { "success" } else { "failure" }.to_string(),
            })
            .get()
    }

    pub fn loop_exits(&self, watch: &str, reason: &str) -> u64 {
        self.loop_exits_total
            .get_or_create(&LoopExitLabels {
                watch: watch.to_string(),
                reason: reason.to_string(),
            })
            .get()
    }

    pub fn alerts_active(&self) -> i64 {
        self.alerts_active.get()
    }

    pub fn acquisitions(&self) -> u64 {
        self.leadership_acquisitions_total.get()
    }

    pub fn events_observed(&self) -> u64 {
        self.events_observed_total.get()
    }
}

impl Default for PagerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn test_delivery_counters_are_per_channel() {
        let metrics = PagerMetrics::new();
        metrics.record_delivery("chat", true);
        metrics.record_delivery("chat", true);
        metrics.record_delivery("hook", false);

        assert_eq!(metrics.deliveries("chat", true), 2);
        assert_eq!(metrics.deliveries("chat", false), 0);
        assert_eq!(metrics.deliveries("hook", false), 1);
    }

    #[test]
    fn test_encoded_output_names() {
        let metrics = PagerMetrics::new();
        metrics.set_alerts_active(3);
        metrics.record_loop_exit("health", "leadership_lost");

        let mut buffer = String::new();
        encode(&mut buffer, &metrics.registry).unwrap();

        assert!(buffer.contains("pager_alerts_active 3"));
        assert!(buffer.contains("pager_loop_exits_total{watch=\"health\",reason=\"leadership_lost\"} 1"));
    }
}
