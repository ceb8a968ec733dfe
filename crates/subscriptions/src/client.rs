//! The server side of one subscription connection.

use crate::{
    config::ClientConfig,
    error::{
        Error,
        TransportError,
    },
    ports::{
        ClientConnection,
        CloseStatus,
        ConnectionState,
        EventRouter,
        GraphSchema,
        MessageType,
        QueryRuntime,
        SubscriptionClient,
    },
    processor::SubscriptionEventProcessor,
    protocol::ClientProtocol,
    publisher::gauge_value,
    schema_map::EventSchemaMap,
    types::{
        ClientId,
        EventName,
        ExecutionContext,
        GraphMessage,
        QueryData,
        QueryOutcome,
        SchemaType,
        SecurityContext,
        SubscriptionEvent,
    },
};
use futures::future::join_all;
use graft_metrics::subscription_metrics::subscription_metrics;
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{
        AtomicBool,
        Ordering,
    },
};
use tokio_util::sync::CancellationToken;

mod registry;
mod timers;

#[cfg(test)]
mod tests;

pub use registry::Subscription;
use registry::SubscriptionRegistry;
use timers::ConnectionTimers;

/// Everything a [`ClientProxy`] is built from.
pub struct ClientParams<S, P> {
    pub schema: Arc<S>,
    pub protocol: P,
    pub connection: Arc<dyn ClientConnection>,
    pub router: Arc<dyn EventRouter>,
    pub schema_map: Arc<EventSchemaMap>,
    pub runtime: Arc<dyn QueryRuntime>,
    pub security: SecurityContext,
    pub config: ClientConfig,
}

/// Holds the subscriptions of one connected client and translates between its
/// transport, its messaging protocol and the query runtime.
///
/// The proxy moves through `Connecting -> Open -> Closing -> Closed`. Once closed,
/// every registration of the client is gone from the router.
pub struct ClientProxy<S, P> {
    inner: Arc<Inner<S, P>>,
}

struct Inner<S, P> {
    id: ClientId,
    schema: Arc<S>,
    protocol: P,
    connection: Arc<dyn ClientConnection>,
    router: Arc<dyn EventRouter>,
    schema_map: Arc<EventSchemaMap>,
    processor: SubscriptionEventProcessor,
    security: SecurityContext,
    config: ClientConfig,
    metrics: bool,
    state: Mutex<ConnectionState>,
    subscriptions: Mutex<SubscriptionRegistry>,
    initialized: AtomicBool,
    counted_as_connected: AtomicBool,
    closing: CancellationToken,
    sending: tokio::sync::Mutex<()>,
}

impl<S, P> Clone for ClientProxy<S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, P> ClientProxy<S, P>
where
    S: GraphSchema,
    P: ClientProtocol,
{
    pub fn new(params: ClientParams<S, P>) -> Self {
        let ClientParams {
            schema,
            protocol,
            connection,
            router,
            schema_map,
            runtime,
            security,
            config,
        } = params;
        let metrics = schema.metrics_enabled();
        Self {
            inner: Arc::new(Inner {
                id: ClientId::new(),
                schema,
                protocol,
                connection,
                router,
                schema_map,
                processor: SubscriptionEventProcessor::new(runtime),
                security,
                config,
                metrics,
                state: Mutex::new(ConnectionState::Connecting),
                subscriptions: Mutex::new(SubscriptionRegistry::default()),
                initialized: AtomicBool::new(false),
                counted_as_connected: AtomicBool::new(false),
                closing: CancellationToken::new(),
                sending: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn id(&self) -> ClientId {
        self.inner.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn protocol(&self) -> &P {
        &self.inner.protocol
    }

    pub fn security(&self) -> &SecurityContext {
        &self.inner.security
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Records that the client finished its protocol handshake.
    /// Returns `false` if it had already done so.
    pub fn mark_initialized(&self) -> bool {
        !self.inner.initialized.swap(true, Ordering::AcqRel)
    }

    /// Opens the transport and processes client messages until the connection ends.
    ///
    /// On every exit path the timers are stopped, the transport is closed and the
    /// client is removed from the router.
    #[tracing::instrument(
        name = "subscription_client",
        skip_all,
        fields(client_id = %self.id(), protocol = P::NAME)
    )]
    pub async fn run(&self) -> Result<(), Error> {
        if self.inner.connection.closed_forever()
            || self.state() != ConnectionState::Connecting
        {
            return Err(Error::ConnectionClosed)
        }
        let _dispose_on_exit = DisposeOnDrop(self);

        if let Err(err) = self.inner.connection.open(P::NAME).await {
            tracing::warn!("Failed to open the client connection: {err}");
            return Err(err.into())
        }
        if !self.transition(ConnectionState::Connecting, ConnectionState::Open) {
            return Err(Error::ConnectionClosed)
        }
        if self.inner.metrics {
            self.inner
                .counted_as_connected
                .store(true, Ordering::Release);
            subscription_metrics().connected_clients.inc();
        }
        tracing::info!("Subscription client connected");

        let result = {
            let _timers = ConnectionTimers::start(self, &self.inner.config);
            self.receive_loop().await
        };

        match &result {
            Ok(()) => self.close(CloseStatus::NormalClosure, "").await,
            Err(err) => {
                tracing::warn!("The receive loop of the client failed: {err}");
                self.close(CloseStatus::InternalError, "Unexpected server error")
                    .await
            }
        }
        tracing::info!("Subscription client disconnected");
        result
    }

    async fn receive_loop(&self) -> Result<(), Error> {
        loop {
            if self.state() != ConnectionState::Open
                || self.inner.connection.state() != ConnectionState::Open
            {
                return Ok(())
            }

            let received = tokio::select! {
                _ = self.inner.closing.cancelled() => return Ok(()),
                received = self.inner.connection.receive_full_message() => received,
            };
            let received = match received {
                Ok(received) => received,
                Err(TransportError::Closed(reason)) => {
                    tracing::debug!("The client went away: {reason}");
                    return Ok(())
                }
                Err(err) => return Err(err.into()),
            };

            match received.message_type {
                MessageType::Close => {
                    tracing::debug!(status = ?received.close_status, "Client sent close");
                    return Ok(())
                }
                MessageType::Binary => {
                    tracing::debug!("Ignoring a binary message");
                }
                MessageType::Text => self.handle_text(&received.data).await,
            }
        }
    }

    async fn handle_text(&self, data: &[u8]) {
        let protocol = &self.inner.protocol;
        match protocol.deserialize_message(data) {
            Ok(message) => {
                if let Err(err) = protocol.on_client_message(self, message).await {
                    tracing::warn!("Failed to handle a client message: {err}");
                }
            }
            Err(err) => {
                tracing::debug!("Received a malformed message: {err}");
                protocol.on_malformed_message(self, err).await;
            }
        }
    }

    /// Serializes and sends one protocol message.
    pub async fn send_message(&self, message: &P::Message) -> Result<(), Error> {
        if self.inner.connection.state() != ConnectionState::Open {
            return Err(Error::ConnectionClosed)
        }
        let data = self.inner.protocol.serialize_message(message)?;
        let _sending = self.inner.sending.lock().await;
        self.inner
            .connection
            .send(data, MessageType::Text, true)
            .await?;
        Ok(())
    }

    /// Executes an operation sent by the client under `id`.
    ///
    /// Subscriptions are registered with the router; any other operation is
    /// executed once and its result returned.
    #[tracing::instrument(skip_all, fields(client_id = %self.id(), subscription_id = id))]
    pub async fn execute_query(&self, id: &str, query: QueryData) -> QueryOutcome {
        let mut reservation = {
            let mut subscriptions = self.inner.subscriptions.lock();
            if !subscriptions.reserve(id) {
                return QueryOutcome::DuplicateId
            }
            if let Some(max) = self.inner.config.max_subscriptions {
                if subscriptions.reserved_count() > max {
                    subscriptions.cancel_reservation(id);
                    return QueryOutcome::SubscriptionLimitReached
                }
            }
            Reservation {
                subscriptions: &self.inner.subscriptions,
                id,
                committed: false,
            }
        };

        let runtime = self.inner.processor.runtime();
        let request = runtime.create_request(query);
        let mut context = ExecutionContext::new(request, self.inner.security.clone());
        context.collect_metrics = self.inner.metrics;

        let outcome = match runtime.execute_request(context).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!("Failed to execute the operation: {err:?}");
                return QueryOutcome::OperationFailure(vec![GraphMessage::error(
                    err.to_string(),
                )])
            }
        };
        let Some(plan) = outcome.subscription else {
            return QueryOutcome::SingleOperationCompleted(outcome.result)
        };
        if !plan.is_valid {
            return QueryOutcome::InvalidSubscription(plan.messages)
        }

        let catalog = match self.inner.schema_map.catalog(&*self.inner.schema) {
            Ok(catalog) => catalog,
            Err(err) => {
                return QueryOutcome::OperationFailure(vec![GraphMessage::error(
                    err.to_string(),
                )])
            }
        };
        let Some(event_name) = catalog.event_name(&plan.field).cloned() else {
            return QueryOutcome::InvalidSubscription(vec![GraphMessage::error(
                format!("The field `{}` is not fed by any subscription event", plan.field),
            )])
        };

        let subscription = Arc::new(Subscription::new(
            id.to_string(),
            plan.field,
            event_name,
            plan.plan,
            self.inner.security.clone(),
        ));
        if !self.register(subscription, &mut reservation) {
            return QueryOutcome::OperationFailure(vec![GraphMessage::error(
                Error::ConnectionClosed.to_string(),
            )])
        }
        QueryOutcome::SubscriptionRegistered
    }

    fn register(
        &self,
        subscription: Arc<Subscription>,
        reservation: &mut Reservation<'_>,
    ) -> bool {
        let event_name = subscription.event_name().clone();
        {
            let mut subscriptions = self.inner.subscriptions.lock();
            if self.state() == ConnectionState::Closed {
                return false
            }
            if subscriptions.activate(subscription) == 1 {
                self.inner.router.add_client(self.as_client(), &event_name);
            }
            reservation.committed = true;
        }

        if self.inner.metrics {
            subscription_metrics().active_subscriptions.inc();
        }
        tracing::debug!(%event_name, "Subscription registered");
        true
    }

    /// Stops the subscription `id`. Returns `false` if it was not active.
    pub fn release_subscription(&self, id: &str) -> bool {
        self.release_with(id, |subscriptions| subscriptions.release(id))
    }

    /// Releases a subscription that completed, unless its id was reused since.
    fn release_completed(&self, subscription: &Arc<Subscription>) -> bool {
        self.release_with(subscription.id(), |subscriptions| {
            subscriptions.release_exact(subscription)
        })
    }

    fn release_with(
        &self,
        id: &str,
        release: impl FnOnce(&mut SubscriptionRegistry) -> Option<(Arc<Subscription>, usize)>,
    ) -> bool {
        let subscription = {
            let mut subscriptions = self.inner.subscriptions.lock();
            let Some((subscription, remaining)) = release(&mut *subscriptions) else {
                return false
            };
            if remaining == 0 {
                self.inner
                    .router
                    .remove_client(self.id(), subscription.event_name());
            }
            subscription
        };

        if self.inner.metrics {
            subscription_metrics().active_subscriptions.dec();
        }
        tracing::debug!(
            client_id = %self.id(),
            subscription_id = id,
            event_name = %subscription.event_name(),
            "Subscription released"
        );
        true
    }

    /// Closes the transport and disposes the proxy. Closing twice is a no-op.
    pub async fn close(&self, status: CloseStatus, reason: &str) {
        {
            let mut state = self.inner.state.lock();
            match *state {
                ConnectionState::Closing | ConnectionState::Closed => return,
                ConnectionState::Connecting | ConnectionState::Open => {
                    *state = ConnectionState::Closing;
                }
            }
        }

        if self.inner.connection.state() == ConnectionState::Open {
            if let Err(err) = self.inner.connection.close(status, reason).await {
                tracing::debug!("Failed to close the client connection: {err}");
            }
        }
        self.inner.closing.cancel();
        self.dispose();
    }

    /// Drops every subscription of the client and unregisters it from the router.
    pub fn dispose(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == ConnectionState::Closed {
                return
            }
            *state = ConnectionState::Closed;
        }
        self.inner.closing.cancel();

        let dropped = {
            let mut subscriptions = self.inner.subscriptions.lock();
            let dropped = subscriptions.clear();
            self.inner.router.remove_client_from_all(self.id());
            dropped
        };

        if self.inner.metrics {
            let metrics = subscription_metrics();
            metrics.active_subscriptions.dec_by(gauge_value(dropped));
            if self
                .inner
                .counted_as_connected
                .swap(false, Ordering::AcqRel)
            {
                metrics.connected_clients.dec();
            }
        }
        tracing::debug!(client_id = %self.id(), dropped, "Client proxy disposed");
    }

    pub(crate) async fn initialization_timed_out(&self) {
        tracing::info!(client_id = %self.id(), "Client did not initialize in time");
        self.inner.protocol.on_initialization_timeout(self).await;
    }

    pub(crate) async fn keep_alive(&self) {
        if self.state() != ConnectionState::Open {
            return
        }
        if let Err(err) = self.inner.protocol.on_keep_alive(self).await {
            tracing::debug!(client_id = %self.id(), "Keep-alive failed: {err}");
        }
    }

    #[tracing::instrument(
        name = "subscription_delivery",
        skip_all,
        fields(client_id = %self.id(), event_id = %event.id)
    )]
    async fn deliver(&self, event: Arc<SubscriptionEvent>) -> Result<(), Error> {
        if self.state() != ConnectionState::Open
            || self.inner.connection.state() != ConnectionState::Open
        {
            return Ok(())
        }
        let schema_type = SchemaType::of::<S>();
        if event.schema_type_name != schema_type.name() {
            return Ok(())
        }

        let event_name = EventName::new(schema_type, event.event_name.as_str());
        let Some(field) = self
            .inner
            .schema_map
            .resolve(&*self.inner.schema, &event_name)?
        else {
            return Ok(())
        };
        if !field.accepts(event.data_type_name.as_deref()) {
            tracing::debug!(
                expected = field.source_type_name(),
                actual = event.data_type_name.as_deref(),
                "Skipping an event with an unexpected payload type"
            );
            return Ok(())
        }

        let subscriptions = self.inner.subscriptions.lock().matching(field.path());
        let results = join_all(
            subscriptions
                .iter()
                .map(|subscription| self.execute_subscription(subscription, &event)),
        )
        .await;

        let mut failures = results.into_iter().filter_map(Result::err);
        match failures.next() {
            Some(err) => {
                let others = failures.count();
                if others > 0 {
                    tracing::warn!(others, "More deliveries of the event failed");
                }
                Err(err)
            }
            None => Ok(()),
        }
    }

    async fn execute_subscription(
        &self,
        subscription: &Arc<Subscription>,
        event: &SubscriptionEvent,
    ) -> Result<(), Error> {
        let outcome = self
            .inner
            .processor
            .execute(subscription, event, self.inner.metrics)
            .await;

        if !outcome.session.skip {
            let message = self
                .inner
                .protocol
                .create_data_message(subscription.id(), &outcome.result);
            if !self.send_delivery(&message).await? {
                return Ok(())
            }
        }

        if outcome.session.complete {
            if let Some(message) =
                self.inner.protocol.create_complete_message(subscription.id())
            {
                if !self.send_delivery(&message).await? {
                    return Ok(())
                }
            }
            self.release_completed(subscription);
        }
        Ok(())
    }

    /// Sends a delivery message. Returns `false` if the connection closed meanwhile.
    async fn send_delivery(&self, message: &P::Message) -> Result<bool, Error> {
        match self.send_message(message).await {
            Ok(()) => Ok(true),
            Err(Error::ConnectionClosed) => {
                tracing::debug!("The connection closed before the delivery was sent");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut state = self.inner.state.lock();
        if *state != from {
            return false
        }
        *state = to;
        true
    }

    fn as_client(&self) -> Arc<dyn SubscriptionClient> {
        Arc::new(self.clone())
    }
}

#[async_trait::async_trait]
impl<S, P> SubscriptionClient for ClientProxy<S, P>
where
    S: GraphSchema,
    P: ClientProtocol,
{
    fn id(&self) -> ClientId {
        self.inner.id
    }

    async fn receive_event(&self, event: Arc<SubscriptionEvent>) -> anyhow::Result<()> {
        self.deliver(event).await.map_err(Into::into)
    }
}

/// An id claimed for an operation in flight; freed unless the operation
/// produced a subscription.
struct Reservation<'a> {
    subscriptions: &'a Mutex<SubscriptionRegistry>,
    id: &'a str,
    committed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.subscriptions.lock().cancel_reservation(self.id);
        }
    }
}

struct DisposeOnDrop<'a, S, P>(&'a ClientProxy<S, P>)
where
    S: GraphSchema,
    P: ClientProtocol;

impl<S, P> Drop for DisposeOnDrop<'_, S, P>
where
    S: GraphSchema,
    P: ClientProtocol,
{
    fn drop(&mut self) {
        self.0.dispose();
    }
}
