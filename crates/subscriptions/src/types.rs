//! Value types shared by the router, the dispatcher and the client proxies.

mod client_id;
mod event;
mod event_name;
mod execution;
mod field;

pub use client_id::ClientId;
pub use event::SubscriptionEvent;
pub use event_name::{
    EventName,
    SchemaType,
};
pub use execution::{
    ExecutionContext,
    ExecutionOutcome,
    ExecutionResult,
    FieldSource,
    GraphMessage,
    QueryData,
    QueryOutcome,
    QueryPlan,
    QueryRequest,
    SecurityContext,
    SessionMarkers,
    SubscriptionPlan,
};
pub use field::{
    FieldPath,
    SubscriptionField,
};
