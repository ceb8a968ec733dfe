use crate::{
    global_registry,
    timing_buckets,
};
use prometheus_client::metrics::{
    counter::Counter,
    gauge::Gauge,
    histogram::Histogram,
};
use std::sync::OnceLock;

pub struct SubscriptionMetrics {
    pub events_published: Counter,
    pub events_rejected: Counter,
    pub events_dispatched: Counter,
    pub deliveries_failed: Counter,
    pub connected_clients: Gauge,
    pub active_subscriptions: Gauge,
    pub queue_depth: Gauge,
    pub delivery_times: Histogram,
}

impl Default for SubscriptionMetrics {
    fn default() -> Self {
        let metrics = SubscriptionMetrics {
            events_published: Counter::default(),
            events_rejected: Counter::default(),
            events_dispatched: Counter::default(),
            deliveries_failed: Counter::default(),
            connected_clients: Gauge::default(),
            active_subscriptions: Gauge::default(),
            queue_depth: Gauge::default(),
            delivery_times: Histogram::new(timing_buckets().iter().cloned()),
        };

        let mut registry = global_registry().registry.lock();
        registry.register(
            "subscription_events_published",
            "The number of events accepted by the publishing queue",
            metrics.events_published.clone(),
        );
        registry.register(
            "subscription_events_rejected",
            "The number of events the publishing queue refused",
            metrics.events_rejected.clone(),
        );
        registry.register(
            "subscription_events_dispatched",
            "The number of events taken off the queue by the dispatch loop",
            metrics.events_dispatched.clone(),
        );
        registry.register(
            "subscription_deliveries_failed",
            "The number of client deliveries that ended with an error",
            metrics.deliveries_failed.clone(),
        );
        registry.register(
            "subscription_connected_clients",
            "The number of open subscription connections",
            metrics.connected_clients.clone(),
        );
        registry.register(
            "subscription_active_subscriptions",
            "The number of registered subscriptions across all clients",
            metrics.active_subscriptions.clone(),
        );
        registry.register(
            "subscription_queue_depth",
            "The number of events waiting to be dispatched",
            metrics.queue_depth.clone(),
        );
        registry.register(
            "subscription_delivery_times",
            "Histogram of the time in seconds to deliver one event to one client",
            metrics.delivery_times.clone(),
        );

        metrics
    }
}

static SUBSCRIPTION_METRICS: OnceLock<SubscriptionMetrics> = OnceLock::new();
pub fn subscription_metrics() -> &'static SubscriptionMetrics {
    SUBSCRIPTION_METRICS.get_or_init(SubscriptionMetrics::default)
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use crate::encode_metrics;

    #[test]
    fn subscription_metrics__are_present_in_the_encoded_registry() {
        // given
        let metrics = subscription_metrics();

        // when
        metrics.events_published.inc();
        let encoded = encode_metrics().unwrap();

        // then
        assert!(encoded.contains("subscription_events_published"));
        assert!(encoded.contains("subscription_delivery_times"));
    }
}
