use serde::{
    Deserialize,
    Serialize,
};
use std::any::type_name;
use uuid::Uuid;

/// A published fact destined for every subscriber of one event name.
///
/// The schema is carried by name so that events can cross process boundaries;
/// the dispatcher resolves it back to a registered schema before routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionEvent {
    pub id: Uuid,
    pub schema_type_name: String,
    pub event_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type_name: Option<String>,
    pub data: serde_json::Value,
}

impl SubscriptionEvent {
    /// Creates an event owned by the schema `S`, stamping it with a fresh id.
    pub fn new<S: ?Sized + 'static>(
        event_name: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema_type_name: type_name::<S>().to_string(),
            event_name: event_name.into(),
            data_type_name: None,
            data,
        }
    }

    /// Records the Rust type the payload was serialized from.
    pub fn with_data_type<T: ?Sized + 'static>(mut self) -> Self {
        self.data_type_name = Some(type_name::<T>().to_string());
        self
    }

    /// Events without a schema or with a blank name can never be routed.
    pub fn is_routable(&self) -> bool {
        !self.schema_type_name.is_empty() && !self.event_name.trim().is_empty()
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    struct Orders;

    #[test_case("OrderCreated" => true; "named event")]
    #[test_case("" => false; "empty name")]
    #[test_case("   " => false; "blank name")]
    fn is_routable__depends_on_the_event_name(name: &str) -> bool {
        SubscriptionEvent::new::<Orders>(name, json!({})).is_routable()
    }

    #[test]
    fn new__stamps_schema_and_data_type_names() {
        // when
        let event = SubscriptionEvent::new::<Orders>("OrderCreated", json!({"id": 1}))
            .with_data_type::<u64>();

        // then
        assert!(event.schema_type_name.ends_with("Orders"));
        assert_eq!(event.data_type_name.as_deref(), Some("u64"));
    }

    #[test]
    fn serialize__uses_camel_case_field_names() {
        // given
        let event = SubscriptionEvent::new::<Orders>("OrderCreated", json!(null));

        // when
        let value = serde_json::to_value(&event).unwrap();

        // then
        assert!(value.get("schemaTypeName").is_some());
        assert!(value.get("eventName").is_some());
        assert!(value.get("dataTypeName").is_none());
    }
}
