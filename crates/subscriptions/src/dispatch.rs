//! The background service that moves published events to their listeners.

use crate::{
    client::{
        ClientParams,
        ClientProxy,
    },
    config::{
        Config,
        DispatchConfig,
    },
    error::Error,
    ports::{
        ClientConnection,
        EventRouter,
        GraphSchema,
        QueryRuntime,
        SubscriptionClient,
    },
    protocol::ClientProtocol,
    publisher::{
        SubscriptionEventPublisher,
        gauge_value,
    },
    queue::PublishingQueue,
    router::SubscriptionEventRouter,
    schema_map::EventSchemaMap,
    types::{
        SecurityContext,
        SubscriptionEvent,
    },
};
use graft_metrics::subscription_metrics::subscription_metrics;
use graft_services::{
    RunnableService,
    RunnableTask,
    ServiceRunner,
    StateWatcher,
    TaskNextAction,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::Semaphore,
    task::{
        JoinError,
        JoinSet,
    },
    time::Instant,
};
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for in-flight deliveries before aborting them.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The state shared between the dispatch task, the publishers and the client proxies.
#[derive(Clone)]
pub struct SharedState {
    router: Arc<SubscriptionEventRouter>,
    schema_map: Arc<EventSchemaMap>,
    queue: Arc<PublishingQueue>,
    config: Arc<Config>,
}

impl SharedState {
    pub fn new(config: Config) -> Self {
        Self {
            router: Arc::new(SubscriptionEventRouter::new()),
            schema_map: Arc::new(EventSchemaMap::new()),
            queue: Arc::new(PublishingQueue::new()),
            config: Arc::new(config),
        }
    }

    pub fn router(&self) -> &Arc<SubscriptionEventRouter> {
        &self.router
    }

    pub fn schema_map(&self) -> &Arc<EventSchemaMap> {
        &self.schema_map
    }

    pub fn queue(&self) -> &Arc<PublishingQueue> {
        &self.queue
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn publisher(&self) -> SubscriptionEventPublisher {
        SubscriptionEventPublisher::new(self.queue.clone(), self.config.dispatch.metrics)
    }

    /// Makes the events of `schema` routable.
    pub fn register_schema<S: GraphSchema>(&self, schema: Arc<S>) -> Result<(), Error> {
        self.schema_map.register(schema)
    }

    /// Creates the proxy of a newly connected client. Run it with [`ClientProxy::run`].
    pub fn connect<S, P>(
        &self,
        schema: Arc<S>,
        protocol: P,
        connection: Arc<dyn ClientConnection>,
        runtime: Arc<dyn QueryRuntime>,
        security: SecurityContext,
    ) -> Result<ClientProxy<S, P>, Error>
    where
        S: GraphSchema,
        P: ClientProtocol,
    {
        self.schema_map.register(schema.clone())?;
        Ok(ClientProxy::new(ClientParams {
            schema,
            protocol,
            connection,
            router: self.router.clone(),
            schema_map: self.schema_map.clone(),
            runtime,
            security,
            config: self.config.client.clone(),
        }))
    }
}

pub struct Task {
    shared: SharedState,
    config: DispatchConfig,
    deliveries: JoinSet<()>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    last_alert: Option<Instant>,
}

impl Task {
    pub fn new(shared: SharedState) -> Self {
        let config = shared.config.dispatch.clone();
        let permits = Arc::new(Semaphore::new(config.max_concurrent_deliveries.max(1)));
        Self {
            shared,
            config,
            deliveries: JoinSet::new(),
            permits,
            cancel: CancellationToken::new(),
            last_alert: None,
        }
    }

    /// Spawns one delivery per listener. Returns `false` if the service stopped while
    /// waiting for a delivery slot; the remaining listeners are skipped.
    async fn dispatch(
        &mut self,
        event: Arc<SubscriptionEvent>,
        watcher: &mut StateWatcher,
    ) -> bool {
        if self.config.metrics {
            let metrics = subscription_metrics();
            metrics.events_dispatched.inc();
            metrics.queue_depth.set(gauge_value(self.shared.queue.len()));
        }
        self.alert_on_backlog(Instant::now());

        let event_name = match self
            .shared
            .schema_map
            .resolve_event_name(&event.schema_type_name, &event.event_name)
        {
            Ok(Some(event_name)) => event_name,
            Ok(None) => {
                tracing::debug!(
                    event_id = %event.id,
                    event_name = %event.event_name,
                    "No subscription field listens to the event"
                );
                return true
            }
            Err(err) => {
                tracing::debug!(event_id = %event.id, "Dropping the event: {err}");
                return true
            }
        };

        let clients = self.shared.router.retrieve_clients(&event_name);
        tracing::debug!(
            event_id = %event.id,
            %event_name,
            clients = clients.len(),
            "Dispatching subscription event"
        );
        for client in clients {
            let permit = tokio::select! {
                biased;
                permit = self.permits.clone().acquire_owned() => permit.ok(),
                _ = watcher.while_started() => None,
            };
            let Some(permit) = permit else {
                tracing::debug!(
                    event_id = %event.id,
                    "Stopped while waiting for a delivery slot"
                );
                return false
            };
            let event = event.clone();
            let metrics = self.config.metrics;
            self.deliveries.spawn(async move {
                let _permit = permit;
                deliver(client, event, metrics).await;
            });
        }
        true
    }

    /// Logs a warning when the backlog crosses the threshold, at most once per cooldown.
    fn alert_on_backlog(&mut self, now: Instant) -> bool {
        let Some(threshold) = self.config.alert_threshold else {
            return false
        };
        let pending = self.shared.queue.len();
        if pending < threshold {
            return false
        }
        if let Some(last_alert) = self.last_alert {
            if now.saturating_duration_since(last_alert) < self.config.alert_cooldown {
                return false
            }
        }
        self.last_alert = Some(now);
        tracing::warn!(
            pending,
            threshold,
            "Subscription events are piling up faster than they are delivered"
        );
        true
    }

    fn reap_finished_deliveries(&mut self) {
        while let Some(result) = self.deliveries.try_join_next() {
            log_join_result(result);
        }
    }
}

#[tracing::instrument(skip_all, fields(client_id = %client.id(), event_id = %event.id))]
async fn deliver(
    client: Arc<dyn SubscriptionClient>,
    event: Arc<SubscriptionEvent>,
    metrics: bool,
) {
    let started = Instant::now();
    let result = client.receive_event(event).await;
    if let Err(err) = &result {
        tracing::warn!("Failed to deliver the subscription event: {err:?}");
    }
    if metrics {
        let metrics = subscription_metrics();
        metrics
            .delivery_times
            .observe(started.elapsed().as_secs_f64());
        if result.is_err() {
            metrics.deliveries_failed.inc();
        }
    }
}

fn log_join_result(result: Result<(), JoinError>) {
    if let Err(err) = result {
        if err.is_panic() {
            tracing::error!("A subscription delivery panicked: {err}");
        }
    }
}

#[async_trait::async_trait]
impl RunnableService for Task {
    const NAME: &'static str = "SubscriptionDispatch";
    type SharedData = SharedState;
    type Task = Self;
    type TaskParams = ();

    fn shared_data(&self) -> Self::SharedData {
        self.shared.clone()
    }

    async fn into_task(
        self,
        _: &StateWatcher,
        _: Self::TaskParams,
    ) -> anyhow::Result<Self::Task> {
        Ok(self)
    }
}

impl RunnableTask for Task {
    async fn run(&mut self, watcher: &mut StateWatcher) -> TaskNextAction {
        self.reap_finished_deliveries();

        let available = tokio::select! {
            biased;
            _ = watcher.while_started() => None,
            available = self.shared.queue.wait_for_available(&self.cancel) => Some(available),
        };

        match available {
            Some(Ok(())) => {
                let Some(event) = self.shared.queue.try_dequeue() else {
                    return TaskNextAction::Continue
                };
                if self.dispatch(event, watcher).await {
                    TaskNextAction::Continue
                } else {
                    TaskNextAction::Stop
                }
            }
            Some(Err(_)) | None => TaskNextAction::Stop,
        }
    }

    async fn shutdown(mut self) -> anyhow::Result<()> {
        self.cancel.cancel();
        let in_flight = self.deliveries.len();
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while let Some(result) = self.deliveries.join_next().await {
                log_join_result(result);
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                in_flight,
                remaining = self.deliveries.len(),
                "Aborting subscription deliveries that did not finish in time"
            );
            self.deliveries.abort_all();
        }
        Ok(())
    }
}

pub fn new_service(config: Config) -> ServiceRunner<Task> {
    new_service_with_state(SharedState::new(config))
}

pub fn new_service_with_state(shared: SharedState) -> ServiceRunner<Task> {
    ServiceRunner::new(Task::new(shared))
}
