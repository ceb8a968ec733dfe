//! In-memory doubles for driving client proxies without a network.

use crate::{
    error::TransportError,
    ports::{
        ClientConnection,
        CloseStatus,
        ConnectionState,
        GraphSchema,
        MessageType,
        QueryRuntime,
        ReceivedMessage,
    },
    types::{
        ExecutionContext,
        ExecutionOutcome,
        ExecutionResult,
        FieldPath,
        FieldSource,
        GraphMessage,
        QueryPlan,
        SessionMarkers,
        SubscriptionField,
        SubscriptionPlan,
    },
};
use parking_lot::Mutex;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;
use std::{
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            AtomicUsize,
            Ordering,
        },
    },
    time::Duration,
};
use tokio::sync::mpsc;

/// How long helpers wait for something to happen before giving up.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// A [`ClientConnection`] backed by channels. The other end is a [`ConnectionHandle`].
pub struct ChannelConnection {
    state: Mutex<ConnectionState>,
    closed_forever: AtomicBool,
    fail_sends: AtomicBool,
    close_frame: Mutex<Option<(CloseStatus, String)>>,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<ReceivedMessage>>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
}

/// The client side of a [`ChannelConnection`].
pub struct ConnectionHandle {
    incoming: mpsc::UnboundedSender<ReceivedMessage>,
    outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    connection: Arc<ChannelConnection>,
}

impl ChannelConnection {
    pub fn pair() -> (Arc<Self>, ConnectionHandle) {
        let (incoming_sender, incoming_receiver) = mpsc::unbounded_channel();
        let (outgoing_sender, outgoing_receiver) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            state: Mutex::new(ConnectionState::Connecting),
            closed_forever: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            close_frame: Mutex::new(None),
            incoming: tokio::sync::Mutex::new(incoming_receiver),
            outgoing: outgoing_sender,
        });
        let handle = ConnectionHandle {
            incoming: incoming_sender,
            outgoing: outgoing_receiver,
            connection: connection.clone(),
        };
        (connection, handle)
    }

    /// The close frame the server sent, if any.
    pub fn close_frame(&self) -> Option<(CloseStatus, String)> {
        self.close_frame.lock().clone()
    }

    /// Makes every following send fail with an I/O error.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    fn mark_closed(&self) {
        *self.state.lock() = ConnectionState::Closed;
        self.closed_forever.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ClientConnection for ChannelConnection {
    async fn open(&self, _protocol: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if *state != ConnectionState::Connecting || self.closed_forever() {
            return Err(TransportError::NotOpen)
        }
        *state = ConnectionState::Open;
        Ok(())
    }

    async fn receive_full_message(&self) -> Result<ReceivedMessage, TransportError> {
        let received = self.incoming.lock().await.recv().await;
        match received {
            Some(message) => {
                if message.message_type == MessageType::Close {
                    self.mark_closed();
                }
                Ok(message)
            }
            None => {
                self.mark_closed();
                Err(TransportError::Closed("the client dropped the connection".into()))
            }
        }
    }

    async fn send(
        &self,
        data: Vec<u8>,
        _message_type: MessageType,
        _end_of_message: bool,
    ) -> Result<(), TransportError> {
        if self.state() != ConnectionState::Open {
            return Err(TransportError::NotOpen)
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Io("simulated send failure".into()))
        }
        self.outgoing
            .send(data)
            .map_err(|_| TransportError::Closed("the client stopped reading".into()))
    }

    async fn close(
        &self,
        status: CloseStatus,
        reason: &str,
    ) -> Result<(), TransportError> {
        *self.close_frame.lock() = Some((status, reason.to_string()));
        self.mark_closed();
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn closed_forever(&self) -> bool {
        self.closed_forever.load(Ordering::SeqCst)
    }
}

impl ConnectionHandle {
    pub fn connection(&self) -> &Arc<ChannelConnection> {
        &self.connection
    }

    pub fn send_text(&self, text: impl Into<String>) {
        let text: String = text.into();
        let _ = self.incoming.send(ReceivedMessage::text(text.into_bytes()));
    }

    pub fn send_json(&self, value: &Value) {
        self.send_text(value.to_string());
    }

    pub fn send_close(&self) {
        let _ = self
            .incoming
            .send(ReceivedMessage::close(CloseStatus::NormalClosure));
    }

    /// Drops the connection without a close handshake.
    pub fn disconnect(&self) {
        self.connection.mark_closed();
    }

    /// The next message sent by the server, or `None` if nothing arrives in time.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let data = tokio::time::timeout(WAIT_TIMEOUT, self.outgoing.recv())
            .await
            .ok()??;
        serde_json::from_slice(&data).ok()
    }

    /// A message the server already sent, without waiting.
    pub fn try_recv_json(&mut self) -> Option<Value> {
        let data = self.outgoing.try_recv().ok()?;
        serde_json::from_slice(&data).ok()
    }
}

/// Polls `condition` until it holds. Returns `false` on timeout.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            return false
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    true
}

/// A scripted [`QueryRuntime`].
///
/// * `subscription { field ... }` creates a subscription on `field`; queries
///   containing `invalid` produce an invalid subscription.
/// * Any other operation completes with `{"echo": <query>}`.
/// * Queries containing `explode` fail.
/// * When executed for an event, the result is `{<field>: <event data>}`, and the
///   `skip`, `complete` and `fail` flags of the event data drive the outcome.
#[derive(Default)]
pub struct FakeRuntime {
    executions: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every execution.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl QueryRuntime for FakeRuntime {
    async fn execute_request(
        &self,
        context: ExecutionContext,
    ) -> anyhow::Result<ExecutionOutcome> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let query = context.request.query.query.clone();
        if query.contains("explode") {
            anyhow::bail!("the runtime exploded")
        }
        if let Some(source) = context.source {
            return event_outcome(source)
        }

        if !query.trim_start().starts_with("subscription") {
            let echo = serde_json::json!({ "echo": query });
            return Ok(ExecutionOutcome::completed(ExecutionResult::data(echo)))
        }
        let field = first_field(&query)
            .ok_or_else(|| anyhow::anyhow!("the subscription selects no field"))?;
        let is_valid = !query.contains("invalid");
        let messages = if is_valid {
            vec![]
        } else {
            vec![GraphMessage::error("The subscription is invalid")]
        };
        Ok(ExecutionOutcome::subscription(SubscriptionPlan {
            field: FieldPath::subscription(&field),
            plan: QueryPlan::new(context.request.query),
            is_valid,
            messages,
        }))
    }
}

fn event_outcome(source: FieldSource) -> anyhow::Result<ExecutionOutcome> {
    let flag = |name: &str| source.data.get(name).and_then(Value::as_bool) == Some(true);
    if flag("fail") {
        anyhow::bail!("the resolver failed for the event")
    }
    let session = SessionMarkers {
        skip: flag("skip"),
        complete: flag("complete"),
    };

    let mut data = serde_json::Map::new();
    data.insert(source.path.field_name().to_string(), source.data);
    let mut outcome =
        ExecutionOutcome::completed(ExecutionResult::data(Value::Object(data)));
    outcome.session = session;
    Ok(outcome)
}

fn first_field(selection: &str) -> Option<String> {
    let (_, body) = selection.split_once('{')?;
    let name: String = body
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (!name.is_empty()).then_some(name)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub total: u64,
}

/// A schema with three subscription fields:
///
/// * `orderCreated`, fed by `orderCreated` events carrying an [`Order`];
/// * `orderShipped`, fed by `OrderShipped` events of any payload;
/// * `orderNotes`, fed by `orderNotes` events of any payload.
#[derive(Debug, Default)]
pub struct OrdersSchema {
    pub metrics: bool,
}

impl GraphSchema for OrdersSchema {
    fn subscription_fields(&self) -> Vec<SubscriptionField> {
        vec![
            SubscriptionField::named("orderCreated").with_source_type::<Order>(),
            SubscriptionField::new(FieldPath::subscription("orderShipped"), "OrderShipped"),
            SubscriptionField::named("orderNotes"),
        ]
    }

    fn metrics_enabled(&self) -> bool {
        self.metrics
    }
}
