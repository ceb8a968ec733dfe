use crate::types::{
    EventName,
    FieldPath,
    QueryPlan,
    SecurityContext,
};
use std::{
    collections::{
        HashMap,
        HashSet,
        hash_map::Entry,
    },
    sync::Arc,
};

/// A live subscription of one client.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    field: FieldPath,
    event_name: EventName,
    plan: QueryPlan,
    security: SecurityContext,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        field: FieldPath,
        event_name: EventName,
        plan: QueryPlan,
        security: SecurityContext,
    ) -> Self {
        Self {
            id,
            field,
            event_name,
            plan,
            security,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn event_name(&self) -> &EventName {
        &self.event_name
    }

    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    pub fn security(&self) -> &SecurityContext {
        &self.security
    }
}

/// The subscriptions of one client and the ids still being set up.
///
/// An id stays reserved from the moment an operation starts until its
/// subscription is released, so no two operations can race for it.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    reserved: HashSet<String>,
    active: HashMap<String, Arc<Subscription>>,
    per_event: HashMap<EventName, usize>,
}

impl SubscriptionRegistry {
    /// Claims `id`. Returns `false` if it is already in use.
    pub fn reserve(&mut self, id: &str) -> bool {
        if self.reserved.contains(id) {
            return false
        }
        self.reserved.insert(id.to_string())
    }

    /// Gives up a reservation that never became a subscription.
    pub fn cancel_reservation(&mut self, id: &str) {
        if !self.active.contains_key(id) {
            self.reserved.remove(id);
        }
    }

    /// The number of claimed ids, including those still being set up.
    pub fn reserved_count(&self) -> usize {
        self.reserved.len()
    }

    /// Activates a reserved subscription and returns how many active
    /// subscriptions now listen to its event.
    pub fn activate(&mut self, subscription: Arc<Subscription>) -> usize {
        let count = self
            .per_event
            .entry(subscription.event_name().clone())
            .or_default();
        *count = count.saturating_add(1);
        let count = *count;
        self.reserved.insert(subscription.id().to_string());
        self.active.insert(subscription.id().to_string(), subscription);
        count
    }

    /// Removes an active subscription and returns it with the number of
    /// subscriptions still listening to its event.
    pub fn release(&mut self, id: &str) -> Option<(Arc<Subscription>, usize)> {
        let subscription = self.active.remove(id)?;
        self.reserved.remove(id);
        let remaining = match self.per_event.entry(subscription.event_name().clone()) {
            Entry::Occupied(mut entry) => {
                let count = entry.get().saturating_sub(1);
                if count == 0 {
                    entry.remove();
                } else {
                    *entry.get_mut() = count;
                }
                count
            }
            Entry::Vacant(_) => 0,
        };
        Some((subscription, remaining))
    }

    /// Like [`Self::release`], but only if `subscription` itself is still the active
    /// entry under its id.
    pub fn release_exact(
        &mut self,
        subscription: &Arc<Subscription>,
    ) -> Option<(Arc<Subscription>, usize)> {
        match self.active.get(subscription.id()) {
            Some(active) if Arc::ptr_eq(active, subscription) => {
                self.release(subscription.id())
            }
            _ => None,
        }
    }

    /// Active subscriptions bound to the field at `path`.
    pub fn matching(&self, path: &FieldPath) -> Vec<Arc<Subscription>> {
        self.active
            .values()
            .filter(|subscription| subscription.field() == path)
            .cloned()
            .collect()
    }

    /// Removes everything, returning the number of active subscriptions dropped.
    pub fn clear(&mut self) -> usize {
        let active = self.active.len();
        self.active.clear();
        self.reserved.clear();
        self.per_event.clear();
        active
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }
}
