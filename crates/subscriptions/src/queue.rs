use crate::types::SubscriptionEvent;
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Returned by [`PublishingQueue::wait_for_available`] once waiting was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Waiting for subscription events was cancelled")]
pub struct Cancelled;

/// Unbounded FIFO of published events waiting to be dispatched.
///
/// Any number of producers may enqueue concurrently; a single consumer drains it.
#[derive(Default)]
pub struct PublishingQueue {
    events: Mutex<VecDeque<Arc<SubscriptionEvent>>>,
    available: Notify,
    closed: AtomicBool,
}

impl PublishingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event. Returns `false` when the event has no routable name or
    /// the queue no longer accepts events.
    pub fn enqueue(&self, event: SubscriptionEvent) -> bool {
        if !event.is_routable() || self.is_closed() {
            return false
        }
        self.events.lock().push_back(Arc::new(event));
        self.available.notify_waiters();
        true
    }

    /// Resolves once at least one event is queued. Resolves with [`Cancelled`] when
    /// `cancel` fires or the queue is closed.
    pub async fn wait_for_available(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), Cancelled> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register interest before checking, so an enqueue in between is not missed.
            notified.as_mut().enable();

            if self.is_closed() || cancel.is_cancelled() {
                return Err(Cancelled)
            }
            if !self.is_empty() {
                return Ok(())
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return Err(Cancelled),
            }
        }
    }

    /// Takes the oldest event, if any.
    pub fn try_dequeue(&self) -> Option<Arc<SubscriptionEvent>> {
        self.events.lock().pop_front()
    }

    /// Stops accepting events and releases every waiter.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    struct Schema;

    fn event(name: &str) -> SubscriptionEvent {
        SubscriptionEvent::new::<Schema>(name, json!({}))
    }

    #[test]
    fn enqueue__rejects_events_without_a_name() {
        let queue = PublishingQueue::new();

        assert!(!queue.enqueue(event("")));
        assert!(!queue.enqueue(event("  ")));
        assert!(queue.is_empty());
    }

    #[test]
    fn try_dequeue__returns_events_in_enqueue_order() {
        // given
        let queue = PublishingQueue::new();
        for name in ["first", "second", "third"] {
            assert!(queue.enqueue(event(name)));
        }

        // when
        let names: Vec<_> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|event| event.event_name.clone())
            .collect();

        // then
        assert_eq!(names, vec!["first", "second", "third"]);
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn enqueue__after_close_is_rejected() {
        let queue = PublishingQueue::new();
        queue.close();

        assert!(!queue.enqueue(event("OrderCreated")));
    }

    #[tokio::test]
    async fn wait_for_available__resolves_immediately_when_not_empty() {
        let queue = PublishingQueue::new();
        queue.enqueue(event("OrderCreated"));

        let result = queue.wait_for_available(&CancellationToken::new()).await;

        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn wait_for_available__wakes_up_on_enqueue() {
        // given
        let queue = Arc::new(PublishingQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.wait_for_available(&CancellationToken::new()).await
            })
        };
        tokio::task::yield_now().await;

        // when
        queue.enqueue(event("OrderCreated"));

        // then
        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter should wake up")
            .unwrap();
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn wait_for_available__cancellation_releases_the_waiter() {
        // given
        let queue = Arc::new(PublishingQueue::new());
        let cancel = CancellationToken::new();
        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.wait_for_available(&cancel).await })
        };

        // when
        cancel.cancel();

        // then
        let result = waiter.await.unwrap();
        assert_eq!(result, Err(Cancelled));
    }

    #[tokio::test]
    async fn wait_for_available__close_releases_the_waiter() {
        // given
        let queue = Arc::new(PublishingQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.wait_for_available(&CancellationToken::new()).await
            })
        };
        tokio::task::yield_now().await;

        // when
        queue.close();

        // then
        let result = waiter.await.unwrap();
        assert_eq!(result, Err(Cancelled));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn enqueue__concurrent_producers_lose_no_events() {
        // given
        let queue = Arc::new(PublishingQueue::new());

        // when
        let producers: Vec<_> = (0..8)
            .map(|producer| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for i in 0..100 {
                        queue.enqueue(event(&format!("{producer}-{i}")));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }

        // then
        assert_eq!(queue.len(), 800);
    }
}
