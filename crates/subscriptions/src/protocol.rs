//! Messaging protocols spoken over a client connection.

use crate::{
    client::ClientProxy,
    error::{
        Error,
        ProtocolError,
    },
    ports::{
        CloseStatus,
        GraphSchema,
    },
    types::ExecutionResult,
};

pub mod graphql_transport_ws;

pub use graphql_transport_ws::GraphqlTransportWs;

/// A subscription messaging protocol.
///
/// The protocol decodes client messages and reacts to them through the
/// [`ClientProxy`] it is attached to. The proxy takes care of registration,
/// delivery and connection lifetime.
#[async_trait::async_trait]
pub trait ClientProtocol: Send + Sync + Sized + 'static {
    /// The websocket sub-protocol name.
    const NAME: &'static str;

    type Message: Send + Sync;

    fn deserialize_message(&self, data: &[u8]) -> Result<Self::Message, ProtocolError>;

    fn serialize_message(&self, message: &Self::Message) -> Result<Vec<u8>, ProtocolError>;

    /// The message carrying one result of the subscription `subscription_id`.
    fn create_data_message(
        &self,
        subscription_id: &str,
        result: &ExecutionResult,
    ) -> Self::Message;

    /// The message telling the client a subscription ended, if the protocol has one.
    fn create_complete_message(&self, subscription_id: &str) -> Option<Self::Message>;

    async fn on_client_message<S: GraphSchema>(
        &self,
        proxy: &ClientProxy<S, Self>,
        message: Self::Message,
    ) -> Result<(), Error>;

    async fn on_malformed_message<S: GraphSchema>(
        &self,
        proxy: &ClientProxy<S, Self>,
        error: ProtocolError,
    ) {
        proxy
            .close(CloseStatus::ProtocolError, &error.to_string())
            .await;
    }

    /// Called periodically while the connection is open.
    async fn on_keep_alive<S: GraphSchema>(
        &self,
        _proxy: &ClientProxy<S, Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Called when the client did not initialize within the configured timeout.
    /// Does nothing unless the protocol defines a reaction.
    async fn on_initialization_timeout<S: GraphSchema>(&self, _proxy: &ClientProxy<S, Self>) {}
}

/// Splits a `Sec-WebSocket-Protocol` header value into protocol names.
pub fn requested_protocols(header: &str) -> impl Iterator<Item = &str> {
    header
        .split(',')
        .map(str::trim)
        .filter(|protocol| !protocol.is_empty())
}

/// Picks the first protocol requested by the client that the server supports.
/// Names are compared case-insensitively; the server's spelling is returned.
pub fn negotiate_protocol<'a, 'b>(
    requested: impl IntoIterator<Item = &'a str>,
    supported: &'b [String],
) -> Option<&'b str> {
    requested.into_iter().find_map(|name| {
        supported
            .iter()
            .find(|supported| supported.eq_ignore_ascii_case(name))
            .map(String::as_str)
    })
}
