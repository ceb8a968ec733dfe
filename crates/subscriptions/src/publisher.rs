use crate::{
    error::Error,
    queue::PublishingQueue,
    types::SubscriptionEvent,
};
use graft_metrics::subscription_metrics::subscription_metrics;
use serde::Serialize;
use std::sync::Arc;

/// Entry point for code that raises subscription events.
#[derive(Clone)]
pub struct SubscriptionEventPublisher {
    queue: Arc<PublishingQueue>,
    metrics: bool,
}

impl SubscriptionEventPublisher {
    pub fn new(queue: Arc<PublishingQueue>, metrics: bool) -> Self {
        Self { queue, metrics }
    }

    /// Serializes `data` and publishes it as `event_name` of schema `S`.
    ///
    /// Returns `Ok(false)` when the queue refused the event.
    pub fn publish<S, T>(&self, event_name: &str, data: &T) -> Result<bool, Error>
    where
        S: ?Sized + 'static,
        T: Serialize + 'static,
    {
        let data = serde_json::to_value(data)?;
        let event = SubscriptionEvent::new::<S>(event_name, data).with_data_type::<T>();
        Ok(self.publish_event(event))
    }

    /// Publishes an already built event.
    pub fn publish_event(&self, event: SubscriptionEvent) -> bool {
        let event_id = event.id;
        let event_name = event.event_name.clone();
        let accepted = self.queue.enqueue(event);
        if accepted {
            tracing::debug!(%event_id, %event_name, "Subscription event published");
        } else {
            tracing::warn!(%event_id, %event_name, "Subscription event was rejected");
        }

        if self.metrics {
            let metrics = subscription_metrics();
            if accepted {
                metrics.events_published.inc();
            } else {
                metrics.events_rejected.inc();
            }
            metrics.queue_depth.set(gauge_value(self.queue.len()));
        }
        accepted
    }
}

pub(crate) fn gauge_value(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
