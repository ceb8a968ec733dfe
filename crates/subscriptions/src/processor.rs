use crate::{
    client::Subscription,
    ports::QueryRuntime,
    types::{
        ExecutionContext,
        ExecutionOutcome,
        FieldSource,
        GraphMessage,
        SubscriptionEvent,
    },
};
use std::sync::Arc;

/// Executes a subscription's plan against the data of one event.
#[derive(Clone)]
pub struct SubscriptionEventProcessor {
    runtime: Arc<dyn QueryRuntime>,
}

impl SubscriptionEventProcessor {
    pub fn new(runtime: Arc<dyn QueryRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<dyn QueryRuntime> {
        &self.runtime
    }

    /// Runs `subscription` with the event payload as the source of its field.
    ///
    /// Runtime failures are folded into the returned result as errors.
    pub async fn execute(
        &self,
        subscription: &Subscription,
        event: &SubscriptionEvent,
        collect_metrics: bool,
    ) -> ExecutionOutcome {
        let request = self
            .runtime
            .create_request(subscription.plan().query().clone());
        let mut context =
            ExecutionContext::new(request, subscription.security().clone());
        context.plan = Some(subscription.plan().clone());
        context.source = Some(FieldSource {
            path: subscription.field().clone(),
            data: event.data.clone(),
        });
        context.collect_metrics = collect_metrics;

        match self.runtime.execute_request(context).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(
                    subscription_id = subscription.id(),
                    event_id = %event.id,
                    "Subscription execution failed: {err:?}"
                );
                ExecutionOutcome::failed(vec![GraphMessage::error(err.to_string())])
            }
        }
    }
}
