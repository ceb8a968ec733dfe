use crate::{
    ports::{
        EventRouter,
        SubscriptionClient,
    },
    types::{
        ClientId,
        EventName,
    },
};
use dashmap::{
    DashMap,
    mapref::entry::Entry,
};
use std::{
    collections::{
        HashMap,
        HashSet,
    },
    sync::Arc,
};

/// Index of event listeners, keyed both by event and by client.
///
/// Keys never map to empty collections: the last removal under a key removes the key.
/// Every mutation holds the client's `client_events` entry while it updates `listeners`,
/// so the two indexes agree for any interleaving of callers.
#[derive(Default)]
pub struct SubscriptionEventRouter {
    listeners: DashMap<EventName, HashMap<ClientId, Arc<dyn SubscriptionClient>>>,
    client_events: DashMap<ClientId, HashSet<EventName>>,
}

impl SubscriptionEventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of clients with at least one registration.
    pub fn client_count(&self) -> usize {
        self.client_events.len()
    }

    /// The number of events with at least one listener.
    pub fn event_count(&self) -> usize {
        self.listeners.len()
    }

    /// The events a client currently listens to.
    pub fn events_of(&self, client_id: ClientId) -> Vec<EventName> {
        self.client_events
            .get(&client_id)
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_registered(&self, client_id: ClientId, event_name: &EventName) -> bool {
        self.listeners
            .get(event_name)
            .is_some_and(|clients| clients.contains_key(&client_id))
    }

    fn detach_listener(&self, client_id: ClientId, event_name: &EventName) {
        if let Entry::Occupied(mut entry) = self.listeners.entry(event_name.clone()) {
            entry.get_mut().remove(&client_id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }
}

impl EventRouter for SubscriptionEventRouter {
    fn add_client(&self, client: Arc<dyn SubscriptionClient>, event_name: &EventName) {
        let client_id = client.id();
        let mut events = self.client_events.entry(client_id).or_default();
        self.listeners
            .entry(event_name.clone())
            .or_default()
            .insert(client_id, client);
        events.insert(event_name.clone());
        drop(events);
        tracing::trace!(%client_id, %event_name, "Client registered for event");
    }

    fn remove_client(&self, client_id: ClientId, event_name: &EventName) {
        if let Entry::Occupied(mut entry) = self.client_events.entry(client_id) {
            self.detach_listener(client_id, event_name);
            entry.get_mut().remove(event_name);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
        tracing::trace!(%client_id, %event_name, "Client unregistered from event");
    }

    fn remove_client_from_all(&self, client_id: ClientId) {
        let Entry::Occupied(entry) = self.client_events.entry(client_id) else {
            return
        };
        for event_name in entry.get() {
            self.detach_listener(client_id, event_name);
        }
        let (_, events) = entry.remove_entry();
        tracing::trace!(%client_id, events = events.len(), "Client unregistered");
    }

    fn retrieve_clients(&self, event_name: &EventName) -> Vec<Arc<dyn SubscriptionClient>> {
        self.listeners
            .get(event_name)
            .map(|clients| clients.values().cloned().collect())
            .unwrap_or_default()
    }
}
