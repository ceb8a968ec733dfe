use crate::types::FieldPath;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    any::Any,
    fmt,
    sync::Arc,
};

/// The text of an operation as sent by a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryData {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

impl QueryData {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// A request prepared by the query runtime from [`QueryData`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub query: QueryData,
}

impl From<QueryData> for QueryRequest {
    fn from(query: QueryData) -> Self {
        Self { query }
    }
}

/// An execution plan produced by the query runtime.
///
/// The runtime may attach its own compiled form of the operation as an
/// artifact and read it back when the plan is executed for an event.
#[derive(Clone)]
pub struct QueryPlan {
    query: Arc<QueryData>,
    artifact: Option<Arc<dyn Any + Send + Sync>>,
}

impl QueryPlan {
    pub fn new(query: QueryData) -> Self {
        Self {
            query: Arc::new(query),
            artifact: None,
        }
    }

    pub fn with_artifact<T: Any + Send + Sync>(mut self, artifact: T) -> Self {
        self.artifact = Some(Arc::new(artifact));
        self
    }

    pub fn query(&self) -> &QueryData {
        &self.query
    }

    pub fn artifact<T: Any>(&self) -> Option<&T> {
        self.artifact.as_deref()?.downcast_ref()
    }
}

impl fmt::Debug for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPlan")
            .field("query", &self.query)
            .field("has_artifact", &self.artifact.is_some())
            .finish()
    }
}

/// Who is executing an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityContext {
    pub user: Option<String>,
    pub roles: Vec<String>,
}

impl SecurityContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            roles: Vec::new(),
        }
    }
}

/// Pre-resolved data for one field, used as the root value when a subscription
/// is executed for a published event.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSource {
    pub path: FieldPath,
    pub data: serde_json::Value,
}

/// Everything the query runtime needs to run one operation.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub request: QueryRequest,
    pub security: SecurityContext,
    pub plan: Option<QueryPlan>,
    pub source: Option<FieldSource>,
    pub collect_metrics: bool,
}

impl ExecutionContext {
    pub fn new(request: QueryRequest, security: SecurityContext) -> Self {
        Self {
            request,
            security,
            plan: None,
            source: None,
            collect_metrics: false,
        }
    }
}

/// A GraphQL error or diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphMessage {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl GraphMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for GraphMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{code}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// The response of one execution in the usual `{data, errors}` shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphMessage>,
}

impl ExecutionResult {
    pub fn data(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    pub fn errors(errors: Vec<GraphMessage>) -> Self {
        Self { data: None, errors }
    }
}

/// Per-execution flags a resolver can raise while handling an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionMarkers {
    /// Do not send anything to the client for this event.
    pub skip: bool,
    /// Send a completion message and tear the subscription down.
    pub complete: bool,
}

/// A subscription the runtime created while executing an operation.
#[derive(Debug, Clone)]
pub struct SubscriptionPlan {
    pub field: FieldPath,
    pub plan: QueryPlan,
    pub is_valid: bool,
    pub messages: Vec<GraphMessage>,
}

/// What the runtime reports back after executing an operation.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub result: ExecutionResult,
    pub session: SessionMarkers,
    pub subscription: Option<SubscriptionPlan>,
}

impl ExecutionOutcome {
    pub fn completed(result: ExecutionResult) -> Self {
        Self {
            result,
            ..Default::default()
        }
    }

    pub fn failed(messages: Vec<GraphMessage>) -> Self {
        Self::completed(ExecutionResult::errors(messages))
    }

    pub fn subscription(subscription: SubscriptionPlan) -> Self {
        Self {
            subscription: Some(subscription),
            ..Default::default()
        }
    }
}

/// The result of asking a client proxy to execute an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// A subscription was created and is now receiving events.
    SubscriptionRegistered,
    /// The id is already used by a live or in-flight subscription of this client.
    DuplicateId,
    /// The operation is a subscription but the runtime rejected it.
    InvalidSubscription(Vec<GraphMessage>),
    /// The operation was a plain query or mutation and already produced its result.
    SingleOperationCompleted(ExecutionResult),
    /// The runtime failed before producing a result.
    OperationFailure(Vec<GraphMessage>),
    /// The client already holds the maximum number of subscriptions.
    SubscriptionLimitReached,
}
