//! The `graphql-transport-ws` protocol.
//!
//! Close codes: 4400 for invalid or unexpected messages, 4401 for subscribing
//! before `connection_init`, 4408 for a missed initialization deadline, 4409 for
//! a reused subscription id and 4429 for a repeated `connection_init`.

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
    protocol::ClientProtocol,
    types::{
        ExecutionResult,
        GraphMessage,
        QueryData,
        QueryOutcome,
    },
};
use serde::{
    Deserialize,
    Serialize,
};

pub const PROTOCOL_NAME: &str = "graphql-transport-ws";

const INVALID_MESSAGE: CloseStatus = CloseStatus::Application(4400);
const UNAUTHORIZED: CloseStatus = CloseStatus::Application(4401);
const INITIALIZATION_TIMEOUT: CloseStatus = CloseStatus::Application(4408);
const SUBSCRIBER_EXISTS: CloseStatus = CloseStatus::Application(4409);
const TOO_MANY_INITIALIZATIONS: CloseStatus = CloseStatus::Application(4429);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportWsMessage {
    ConnectionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    Subscribe {
        id: String,
        payload: QueryData,
    },
    Next {
        id: String,
        payload: ExecutionResult,
    },
    Error {
        id: String,
        payload: Vec<GraphMessage>,
    },
    Complete {
        id: String,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphqlTransportWs;

#[async_trait::async_trait]
impl ClientProtocol for GraphqlTransportWs {
    const NAME: &'static str = PROTOCOL_NAME;

    type Message = TransportWsMessage;

    fn deserialize_message(&self, data: &[u8]) -> Result<Self::Message, ProtocolError> {
        serde_json::from_slice(data).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    fn serialize_message(&self, message: &Self::Message) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(message).map_err(ProtocolError::Encoding)
    }

    fn create_data_message(
        &self,
        subscription_id: &str,
        result: &ExecutionResult,
    ) -> Self::Message {
        TransportWsMessage::Next {
            id: subscription_id.to_string(),
            payload: result.clone(),
        }
    }

    fn create_complete_message(&self, subscription_id: &str) -> Option<Self::Message> {
        Some(TransportWsMessage::Complete {
            id: subscription_id.to_string(),
        })
    }

    async fn on_client_message<S: GraphSchema>(
        &self,
        proxy: &ClientProxy<S, Self>,
        message: Self::Message,
    ) -> Result<(), Error> {
        match message {
            TransportWsMessage::ConnectionInit { .. } => {
                if proxy.mark_initialized() {
                    proxy
                        .send_message(&TransportWsMessage::ConnectionAck { payload: None })
                        .await?;
                } else {
                    proxy
                        .close(TOO_MANY_INITIALIZATIONS, "Too many initialisation requests")
                        .await;
                }
            }
            TransportWsMessage::Ping { .. } => {
                proxy
                    .send_message(&TransportWsMessage::Pong { payload: None })
                    .await?;
            }
            TransportWsMessage::Pong { .. } => {}
            TransportWsMessage::Subscribe { id, payload } => {
                if !proxy.is_initialized() {
                    proxy.close(UNAUTHORIZED, "Unauthorized").await;
                    return Ok(())
                }
                self.subscribe(proxy, id, payload).await?;
            }
            TransportWsMessage::Complete { id } => {
                proxy.release_subscription(&id);
            }
            TransportWsMessage::ConnectionAck { .. }
            | TransportWsMessage::Next { .. }
            | TransportWsMessage::Error { .. } => {
                proxy
                    .close(INVALID_MESSAGE, "Unexpected message from the client")
                    .await;
            }
        }
        Ok(())
    }

    async fn on_malformed_message<S: GraphSchema>(
        &self,
        proxy: &ClientProxy<S, Self>,
        _error: ProtocolError,
    ) {
        proxy.close(INVALID_MESSAGE, "Invalid message received").await;
    }

    async fn on_keep_alive<S: GraphSchema>(
        &self,
        proxy: &ClientProxy<S, Self>,
    ) -> Result<(), Error> {
        proxy
            .send_message(&TransportWsMessage::Ping { payload: None })
            .await
    }

    async fn on_initialization_timeout<S: GraphSchema>(&self, proxy: &ClientProxy<S, Self>) {
        proxy
            .close(INITIALIZATION_TIMEOUT, "Connection initialisation timeout")
            .await;
    }
}

impl GraphqlTransportWs {
    async fn subscribe<S: GraphSchema>(
        &self,
        proxy: &ClientProxy<S, Self>,
        id: String,
        query: QueryData,
    ) -> Result<(), Error> {
        match proxy.execute_query(&id, query).await {
            QueryOutcome::SubscriptionRegistered => {}
            QueryOutcome::DuplicateId => {
                proxy
                    .close(SUBSCRIBER_EXISTS, &format!("Subscriber for {id} already exists"))
                    .await;
            }
            QueryOutcome::InvalidSubscription(messages)
            | QueryOutcome::OperationFailure(messages) => {
                proxy
                    .send_message(&TransportWsMessage::Error {
                        id,
                        payload: messages,
                    })
                    .await?;
            }
            QueryOutcome::SubscriptionLimitReached => {
                let message = GraphMessage::error("Too many active subscriptions")
                    .with_code("SUBSCRIPTION_LIMIT");
                proxy
                    .send_message(&TransportWsMessage::Error {
                        id,
                        payload: vec![message],
                    })
                    .await?;
            }
            QueryOutcome::SingleOperationCompleted(result) => {
                proxy
                    .send_message(&TransportWsMessage::Next {
                        id: id.clone(),
                        payload: result,
                    })
                    .await?;
                proxy
                    .send_message(&TransportWsMessage::Complete { id })
                    .await?;
            }
        }
        Ok(())
    }
}
