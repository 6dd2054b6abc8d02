use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::delivery::{DeliveryId, DeliveryRecord, Precondition, StatusKind};
use crate::domain::ports::{DeliveryFilter, DeliveryStore, EndpointStore, EventStore, StoreError};
use crate::domain::subscription::{Endpoint, EndpointId, Event, EventId, OwnerId};

/// In-memory implementation of every store port.
///
/// Each map sits behind its own lock; `update_if` holds the delivery write
/// lock across the compare and the swap, which is what makes it atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    endpoints: RwLock<HashMap<EndpointId, Endpoint>>,
    events: RwLock<HashMap<EventId, Event>>,
    deliveries: RwLock<HashMap<DeliveryId, DeliveryRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn select(&self, filter: &DeliveryFilter) -> Vec<DeliveryRecord> {
        let deliveries = self.deliveries.read().await;
        let mut matching: Vec<DeliveryRecord> = deliveries
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        matching
    }
}

#[async_trait]
impl EndpointStore for InMemoryStore {
    async fn insert_endpoint(&self, endpoint: Endpoint) -> Result<(), StoreError> {
        let mut endpoints = self.endpoints.write().await;
        if endpoints.contains_key(&endpoint.id) {
            return Err(StoreError::Conflict(format!("endpoint {}", endpoint.id)));
        }
        endpoints.insert(endpoint.id, endpoint);
        Ok(())
    }

    async fn endpoint(&self, id: EndpointId) -> Result<Option<Endpoint>, StoreError> {
        Ok(self.endpoints.read().await.get(&id).cloned())
    }

    async fn endpoints_for_owner(&self, owner: &OwnerId) -> Result<Vec<Endpoint>, StoreError> {
        let endpoints = self.endpoints.read().await;
        let mut owned: Vec<Endpoint> = endpoints
            .values()
            .filter(|e| &e.owner == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(owned)
    }

    async fn active_for_event(&self, event_id: EventId) -> Result<Vec<Endpoint>, StoreError> {
        let subscribed = match self.events.read().await.get(&event_id) {
            Some(event) => event.endpoint_ids.clone(),
            None => return Ok(Vec::new()),
        };

        let endpoints = self.endpoints.read().await;
        Ok(subscribed
            .iter()
            .filter_map(|id| endpoints.get(id))
            .filter(|e| e.active)
            .cloned()
            .collect())
    }

    async fn update_endpoint(&self, endpoint: Endpoint) -> Result<bool, StoreError> {
        let mut endpoints = self.endpoints.write().await;
        match endpoints.get_mut(&endpoint.id) {
            Some(current) => {
                *current = endpoint;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_endpoint(&self, id: EndpointId) -> Result<bool, StoreError> {
        let mut endpoints = self.endpoints.write().await;
        if endpoints.remove(&id).is_none() {
            return Ok(false);
        }

        for event in self.events.write().await.values_mut() {
            event.endpoint_ids.remove(&id);
        }
        let mut deliveries = self.deliveries.write().await;
        let before = deliveries.len();
        deliveries.retain(|_, record| record.endpoint_id != id);
        debug!(endpoint_id = %id, deliveries = before - deliveries.len(), "Endpoint deleted");
        Ok(true)
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn insert_event(&self, event: Event) -> Result<(), StoreError> {
        let mut events = self.events.write().await;
        if events
            .values()
            .any(|e| e.owner == event.owner && e.name == event.name)
        {
            return Err(StoreError::Conflict(format!("event name {}", event.name)));
        }
        events.insert(event.id, event);
        Ok(())
    }

    async fn event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        Ok(self.events.read().await.get(&id).cloned())
    }

    async fn find_by_name_and_owner(
        &self,
        name: &str,
        owner: &OwnerId,
    ) -> Result<Option<Event>, StoreError> {
        let events = self.events.read().await;
        Ok(events
            .values()
            .find(|e| e.name == name && &e.owner == owner)
            .cloned())
    }

    async fn events_for_owner(&self, owner: &OwnerId) -> Result<Vec<Event>, StoreError> {
        let events = self.events.read().await;
        let mut owned: Vec<Event> = events
            .values()
            .filter(|e| &e.owner == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(owned)
    }

    async fn update_event(&self, event: Event) -> Result<bool, StoreError> {
        let mut events = self.events.write().await;
        if !events.contains_key(&event.id) {
            return Ok(false);
        }
        if events
            .values()
            .any(|e| e.id != event.id && e.owner == event.owner && e.name == event.name)
        {
            return Err(StoreError::Conflict(format!("event name {}", event.name)));
        }
        events.insert(event.id, event);
        Ok(true)
    }

    async fn delete_event(&self, id: EventId) -> Result<bool, StoreError> {
        let mut events = self.events.write().await;
        if events.remove(&id).is_none() {
            return Ok(false);
        }

        let mut deliveries = self.deliveries.write().await;
        let before = deliveries.len();
        deliveries.retain(|_, record| record.event_id != id);
        debug!(event_id = %id, deliveries = before - deliveries.len(), "Event deleted");
        Ok(true)
    }
}

#[async_trait]
impl DeliveryStore for InMemoryStore {
    async fn insert_delivery(&self, record: DeliveryRecord) -> Result<(), StoreError> {
        let mut deliveries = self.deliveries.write().await;
        if deliveries.contains_key(&record.id) {
            return Err(StoreError::Conflict(format!("delivery {}", record.id)));
        }
        deliveries.insert(record.id, record);
        Ok(())
    }

    async fn delivery(&self, id: DeliveryId) -> Result<Option<DeliveryRecord>, StoreError> {
        Ok(self.deliveries.read().await.get(&id).cloned())
    }

    async fn update_if(
        &self,
        expected: Precondition,
        record: DeliveryRecord,
    ) -> Result<bool, StoreError> {
        let mut deliveries = self.deliveries.write().await;
        let Some(current) = deliveries.get_mut(&record.id) else {
            return Ok(false);
        };

        if current.precondition() != expected {
            debug!(
                delivery_id = %record.id,
                expected = %expected.status,
                actual = %current.kind(),
                "Conditional update lost"
            );
            return Ok(false);
        }

        *current = record;
        Ok(true)
    }

    async fn due_for_retry(
        &self,
        now: OffsetDateTime,
        max_tries: u32,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let deliveries = self.deliveries.read().await;
        let mut due: Vec<DeliveryRecord> = deliveries
            .values()
            .filter(|r| r.is_due(now) && r.attempt_count < max_tries)
            .cloned()
            .collect();
        due.sort_by_key(|r| r.next_retry_at());
        Ok(due)
    }

    async fn stale(&self, cutoff: OffsetDateTime) -> Result<Vec<DeliveryRecord>, StoreError> {
        let deliveries = self.deliveries.read().await;
        Ok(deliveries
            .values()
            .filter(|r| matches!(r.kind(), StatusKind::Pending | StatusKind::Retrying))
            .filter(|r| r.updated_at < cutoff)
            .cloned()
            .collect())
    }

    async fn list_deliveries(
        &self,
        filter: &DeliveryFilter,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let matching = self.select(filter).await;
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(matching
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .collect())
    }

    async fn count_by_status(
        &self,
        filter: &DeliveryFilter,
    ) -> Result<HashMap<StatusKind, usize>, StoreError> {
        let deliveries = self.deliveries.read().await;
        let mut counts: HashMap<StatusKind, usize> = HashMap::new();
        for record in deliveries.values().filter(|r| filter.matches(r)) {
            *counts.entry(record.kind()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
