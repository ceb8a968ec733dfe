use std::{
    any::type_name,
    fmt,
    sync::Arc,
};

/// Location of a field inside a schema, e.g. `[subscription]/orderCreated`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Arc<str>);

impl FieldPath {
    const SUBSCRIPTION_ROOT: &'static str = "[subscription]";

    pub fn new(path: impl Into<Arc<str>>) -> Self {
        Self(path.into())
    }

    /// Path of a top-level field of the subscription root type.
    pub fn subscription(field: &str) -> Self {
        Self(format!("{}/{field}", Self::SUBSCRIPTION_ROOT).into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last segment of the path.
    pub fn field_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldPath({})", self.0)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A subscription field declared by a schema together with the event that feeds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionField {
    path: FieldPath,
    event_name: Arc<str>,
    source_type_name: Option<&'static str>,
}

impl SubscriptionField {
    pub fn new(path: FieldPath, event_name: impl Into<Arc<str>>) -> Self {
        Self {
            path,
            event_name: event_name.into(),
            source_type_name: None,
        }
    }

    /// A top-level subscription field whose event name is the field name itself.
    pub fn named(field: &str) -> Self {
        Self::new(FieldPath::subscription(field), field)
    }

    /// Restricts the field to events whose payload was produced from `T`.
    pub fn with_source_type<T: ?Sized + 'static>(mut self) -> Self {
        self.source_type_name = Some(type_name::<T>());
        self
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn source_type_name(&self) -> Option<&'static str> {
        self.source_type_name
    }

    /// Whether an event carrying `data_type_name` may be delivered to this field.
    /// Fields without an expected source type accept any payload.
    pub fn accepts(&self, data_type_name: Option<&str>) -> bool {
        match self.source_type_name {
            None => true,
            Some(expected) => data_type_name == Some(expected),
        }
    }
}
