//! Interfaces to the outside world: the query runtime, schemas, transports and
//! the routing seam between the dispatcher and the clients.

use crate::{
    error::TransportError,
    types::{
        ClientId,
        EventName,
        ExecutionContext,
        ExecutionOutcome,
        QueryData,
        QueryRequest,
        SubscriptionEvent,
        SubscriptionField,
    },
};
use std::sync::Arc;

/// Executes GraphQL operations on behalf of the subscription subsystem.
#[async_trait::async_trait]
pub trait QueryRuntime: Send + Sync {
    /// Prepares a request from the raw operation sent by a client.
    fn create_request(&self, query: QueryData) -> QueryRequest {
        QueryRequest::from(query)
    }

    /// Runs one operation. A subscription operation returns a
    /// [`SubscriptionPlan`](crate::types::SubscriptionPlan) instead of data.
    async fn execute_request(
        &self,
        context: ExecutionContext,
    ) -> anyhow::Result<ExecutionOutcome>;
}

/// A GraphQL schema that can be subscribed to.
pub trait GraphSchema: Send + Sync + 'static {
    /// Every subscription field of the schema with the event that feeds it.
    fn subscription_fields(&self) -> Vec<SubscriptionField>;

    /// Whether executions against this schema should collect metrics.
    fn metrics_enabled(&self) -> bool {
        false
    }
}

/// The state of a client transport or of a client proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Text,
    Binary,
    Close,
}

/// Close codes understood by the transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    NormalClosure,
    EndpointUnavailable,
    ProtocolError,
    InternalError,
    /// A protocol specific code in the 4000-4999 range.
    Application(u16),
}

impl CloseStatus {
    pub fn code(&self) -> u16 {
        match self {
            CloseStatus::NormalClosure => 1000,
            CloseStatus::EndpointUnavailable => 1001,
            CloseStatus::ProtocolError => 1002,
            CloseStatus::InternalError => 1011,
            CloseStatus::Application(code) => *code,
        }
    }
}

/// One complete message read from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_type: MessageType,
    pub data: Vec<u8>,
    pub close_status: Option<CloseStatus>,
}

impl ReceivedMessage {
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self {
            message_type: MessageType::Text,
            data: data.into(),
            close_status: None,
        }
    }

    pub fn close(status: CloseStatus) -> Self {
        Self {
            message_type: MessageType::Close,
            data: Vec::new(),
            close_status: Some(status),
        }
    }
}

/// A bidirectional message transport to one client, usually a websocket.
///
/// Cancellation is expressed by dropping the returned futures.
#[async_trait::async_trait]
pub trait ClientConnection: Send + Sync {
    /// Completes the handshake using the negotiated sub-protocol.
    async fn open(&self, protocol: &str) -> Result<(), TransportError>;

    /// Reads the next whole message, reassembling fragments.
    async fn receive_full_message(&self) -> Result<ReceivedMessage, TransportError>;

    async fn send(
        &self,
        data: Vec<u8>,
        message_type: MessageType,
        end_of_message: bool,
    ) -> Result<(), TransportError>;

    async fn close(
        &self,
        status: CloseStatus,
        reason: &str,
    ) -> Result<(), TransportError>;

    fn state(&self) -> ConnectionState;

    /// The transport can never be opened again.
    fn closed_forever(&self) -> bool;
}

/// Anything that can receive routed events.
#[async_trait::async_trait]
pub trait SubscriptionClient: Send + Sync {
    fn id(&self) -> ClientId;

    /// Delivers one event. Receivers filter out events they have no use for.
    async fn receive_event(&self, event: Arc<SubscriptionEvent>) -> anyhow::Result<()>;
}

/// The registry of which clients listen to which events.
#[cfg_attr(test, mockall::automock)]
pub trait EventRouter: Send + Sync {
    /// Registers `client` as a listener of `event_name`. Adding twice is a no-op.
    fn add_client(&self, client: Arc<dyn SubscriptionClient>, event_name: &EventName);

    /// Removes one registration. Unknown pairs are ignored.
    fn remove_client(&self, client_id: ClientId, event_name: &EventName);

    /// Removes every registration of a client.
    fn remove_client_from_all(&self, client_id: ClientId);

    /// A snapshot of the listeners of `event_name`.
    fn retrieve_clients(&self, event_name: &EventName) -> Vec<Arc<dyn SubscriptionClient>>;
}
