use std::{
    any::{
        TypeId,
        type_name,
    },
    fmt,
    hash::{
        Hash,
        Hasher,
    },
    sync::Arc,
};

/// Identity of a schema type. Two values are equal only when they describe the
/// same Rust type; the name is kept for logs and for matching published events.
#[derive(Clone, Copy)]
pub struct SchemaType {
    id: TypeId,
    name: &'static str,
}

impl SchemaType {
    pub fn of<S: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<S>(),
            name: type_name::<S>(),
        }
    }

    /// The fully qualified type name of the schema.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for SchemaType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SchemaType {}

impl Hash for SchemaType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SchemaType").field(&self.name).finish()
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// The key events are routed by: an event name qualified by the schema that owns it.
///
/// Names are compared case-sensitively, so `OrderCreated` and `orderCreated`
/// are different events.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EventName {
    schema: SchemaType,
    name: Arc<str>,
}

impl EventName {
    pub fn new(schema: SchemaType, name: impl Into<Arc<str>>) -> Self {
        Self {
            schema,
            name: name.into(),
        }
    }

    /// Shorthand for `EventName::new(SchemaType::of::<S>(), name)`.
    pub fn of<S: ?Sized + 'static>(name: impl Into<Arc<str>>) -> Self {
        Self::new(SchemaType::of::<S>(), name)
    }

    pub fn schema(&self) -> SchemaType {
        self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventName({}:{})", self.schema.name, self.name)
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.schema.name, self.name)
    }
}
