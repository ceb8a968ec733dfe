//! Routing and delivery of GraphQL subscription events.
//!
//! Producers publish [`SubscriptionEvent`](types::SubscriptionEvent)s through a
//! [`SubscriptionEventPublisher`](publisher::SubscriptionEventPublisher). The
//! dispatch service drains the [`PublishingQueue`](queue::PublishingQueue), looks up
//! the listeners of each event in the [`SubscriptionEventRouter`](router::SubscriptionEventRouter)
//! and hands the event to every listening [`ClientProxy`](client::ClientProxy).
//! Each proxy executes its matching subscriptions and sends the results to its
//! client using the negotiated [`ClientProtocol`](protocol::ClientProtocol).

#![deny(clippy::cast_possible_truncation)]
#![deny(unused_must_use)]

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ports;
pub mod processor;
pub mod protocol;
pub mod publisher;
pub mod queue;
pub mod router;
pub mod schema_map;
pub mod types;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::Config;
pub use dispatch::{
    SharedState,
    new_service,
};
pub use error::Error;

#[cfg(test)]
graft_trace::enable_tracing!();
