use crate::{
    error::Error,
    ports::GraphSchema,
    types::{
        EventName,
        FieldPath,
        SchemaType,
        SubscriptionField,
    },
};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::Arc,
};

/// The subscription events of one schema.
#[derive(Debug)]
pub struct SchemaEventCatalog {
    schema: SchemaType,
    fields: HashMap<EventName, SubscriptionField>,
    events: HashMap<FieldPath, EventName>,
}

impl SchemaEventCatalog {
    fn build(schema_type: SchemaType, schema: &dyn GraphSchema) -> Result<Self, Error> {
        let mut fields: HashMap<EventName, SubscriptionField> = HashMap::new();
        let mut events = HashMap::new();

        for field in schema.subscription_fields() {
            let event_name = EventName::new(schema_type, field.event_name());
            if let Some(existing) = fields.get(&event_name) {
                return Err(Error::DuplicateEventName {
                    schema: schema_type.name(),
                    event_name: field.event_name().to_string(),
                    first: existing.path().clone(),
                    second: field.path().clone(),
                })
            }
            events.insert(field.path().clone(), event_name.clone());
            fields.insert(event_name, field);
        }

        Ok(Self {
            schema: schema_type,
            fields,
            events,
        })
    }

    pub fn schema(&self) -> SchemaType {
        self.schema
    }

    pub fn field(&self, event_name: &EventName) -> Option<&SubscriptionField> {
        self.fields.get(event_name)
    }

    /// The event that feeds the subscription field at `path`.
    pub fn event_name(&self, path: &FieldPath) -> Option<&EventName> {
        self.events.get(path)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Lazily built, process-wide mapping from event names to subscription fields.
///
/// A catalog is built once per schema type, on first use, and reused afterwards.
/// Registered schemas are kept so that their catalogs can be rebuilt after [`Self::clear`].
#[derive(Default)]
pub struct EventSchemaMap {
    catalogs: RwLock<HashMap<SchemaType, Arc<SchemaEventCatalog>>>,
    schemas: RwLock<HashMap<SchemaType, Arc<dyn GraphSchema>>>,
}

impl EventSchemaMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the catalog of `schema` eagerly, surfacing configuration errors, and makes
    /// its events resolvable by name.
    pub fn register<S: GraphSchema>(&self, schema: Arc<S>) -> Result<(), Error> {
        self.catalog(&*schema)?;
        let schema: Arc<dyn GraphSchema> = schema;
        self.schemas
            .write()
            .entry(SchemaType::of::<S>())
            .or_insert(schema);
        Ok(())
    }

    /// The catalog of `schema`, building it if this is the first use.
    pub fn catalog<S: GraphSchema>(
        &self,
        schema: &S,
    ) -> Result<Arc<SchemaEventCatalog>, Error> {
        self.catalog_of(SchemaType::of::<S>(), schema)
    }

    fn catalog_of(
        &self,
        schema_type: SchemaType,
        schema: &dyn GraphSchema,
    ) -> Result<Arc<SchemaEventCatalog>, Error> {
        if let Some(catalog) = self.catalogs.read().get(&schema_type) {
            return Ok(catalog.clone())
        }

        let mut catalogs = self.catalogs.write();
        if let Some(catalog) = catalogs.get(&schema_type) {
            return Ok(catalog.clone())
        }
        let catalog = Arc::new(SchemaEventCatalog::build(schema_type, schema)?);
        tracing::debug!(
            schema = schema_type.name(),
            events = catalog.len(),
            "Built subscription event catalog"
        );
        catalogs.insert(schema_type, catalog.clone());
        Ok(catalog)
    }

    /// The field fed by `event_name`, or `None` if the schema declares no such event.
    pub fn resolve<S: GraphSchema>(
        &self,
        schema: &S,
        event_name: &EventName,
    ) -> Result<Option<SubscriptionField>, Error> {
        let catalog = self.catalog(schema)?;
        Ok(catalog.field(event_name).cloned())
    }

    /// Resolves the routing key of a published event from the names it carries.
    ///
    /// Only schemas that were registered, or whose catalog is already built, are
    /// considered.
    pub fn resolve_event_name(
        &self,
        schema_type_name: &str,
        event_name: &str,
    ) -> Result<Option<EventName>, Error> {
        let catalog = self.catalog_by_name(schema_type_name)?;
        let event_name = EventName::new(catalog.schema(), event_name);
        Ok(catalog.field(&event_name).map(|_| event_name))
    }

    fn catalog_by_name(
        &self,
        schema_type_name: &str,
    ) -> Result<Arc<SchemaEventCatalog>, Error> {
        let built = self
            .catalogs
            .read()
            .values()
            .find(|catalog| catalog.schema().name() == schema_type_name)
            .cloned();
        if let Some(catalog) = built {
            return Ok(catalog)
        }

        let registered = self
            .schemas
            .read()
            .iter()
            .find(|(schema_type, _)| schema_type.name() == schema_type_name)
            .map(|(schema_type, schema)| (*schema_type, schema.clone()));
        match registered {
            Some((schema_type, schema)) => self.catalog_of(schema_type, &*schema),
            None => Err(Error::UnknownSchema(schema_type_name.to_string())),
        }
    }

    pub fn schema_count(&self) -> usize {
        self.catalogs.read().len()
    }

    /// Drops every catalog. Registered schemas rebuild theirs on next use.
    pub fn clear(&self) {
        self.catalogs.write().clear();
    }
}
