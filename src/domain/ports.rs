/*
   This module specifies the API by which the delivery engine talks to the
   persistence glue and the work queue.
*/

use async_trait::async_trait;
use std::collections::HashMap;
use time::{Date, OffsetDateTime};

use crate::domain::delivery::{DeliveryId, DeliveryRecord, Precondition, StatusKind};
use crate::domain::subscription::{Endpoint, EndpointId, Event, EventId, OwnerId};

/// Error type for store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Record already exists: {0}")]
    Conflict(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Error type for work queue operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Queue lane '{0}' is closed")]
    Closed(String),
}

/// A unit of work on the delivery lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryTask {
    pub delivery_id: DeliveryId,

    /// The task is invisible to consumers until this instant.
    pub not_before: Option<OffsetDateTime>,
}

/// Query over delivery records.
///
/// `scope` restricts results to deliveries of the given events, which is how
/// ownership is applied; `None` means unrestricted. The date bounds are
/// inclusive and compare the UTC calendar date of `created_at`.
#[derive(Debug, Clone, Default)]
pub struct DeliveryFilter {
    pub scope: Option<Vec<EventId>>,
    pub status: Option<StatusKind>,
    pub endpoint_id: Option<EndpointId>,
    pub event_id: Option<EventId>,
    pub created_from: Option<Date>,
    pub created_to: Option<Date>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl DeliveryFilter {
    pub fn matches(&self, record: &DeliveryRecord) -> bool {
        self.scope
            .as_ref()
            .is_none_or(|events| events.contains(&record.event_id))
            && self.status.is_none_or(|status| record.kind() == status)
            && self.endpoint_id.is_none_or(|id| record.endpoint_id == id)
            && self.event_id.is_none_or(|id| record.event_id == id)
            && self.created_from.is_none_or(|from| created_on(record) >= from)
            && self.created_to.is_none_or(|to| created_on(record) <= to)
    }
}

fn created_on(record: &DeliveryRecord) -> Date {
    record.created_at.to_offset(time::UtcOffset::UTC).date()
}

#[async_trait]
pub trait EndpointStore: Send + Sync {
    async fn insert_endpoint(&self, endpoint: Endpoint) -> Result<(), StoreError>;
    async fn endpoint(&self, id: EndpointId) -> Result<Option<Endpoint>, StoreError>;
    async fn endpoints_for_owner(&self, owner: &OwnerId) -> Result<Vec<Endpoint>, StoreError>;
    /// Endpoints subscribed to the event that are currently active.
    async fn active_for_event(&self, event_id: EventId) -> Result<Vec<Endpoint>, StoreError>;
    /// Replace a stored endpoint. Returns whether it existed.
    async fn update_endpoint(&self, endpoint: Endpoint) -> Result<bool, StoreError>;
    /// Remove an endpoint together with its subscriptions and deliveries.
    async fn delete_endpoint(&self, id: EndpointId) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Fails with `Conflict` when the owner already has an event with this name.
    async fn insert_event(&self, event: Event) -> Result<(), StoreError>;
    async fn event(&self, id: EventId) -> Result<Option<Event>, StoreError>;
    async fn find_by_name_and_owner(
        &self,
        name: &str,
        owner: &OwnerId,
    ) -> Result<Option<Event>, StoreError>;
    async fn events_for_owner(&self, owner: &OwnerId) -> Result<Vec<Event>, StoreError>;
    /// Replace a stored event, keeping names unique per owner. Returns whether it existed.
    async fn update_event(&self, event: Event) -> Result<bool, StoreError>;
    /// Remove an event together with its deliveries.
    async fn delete_event(&self, id: EventId) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn insert_delivery(&self, record: DeliveryRecord) -> Result<(), StoreError>;
    async fn delivery(&self, id: DeliveryId) -> Result<Option<DeliveryRecord>, StoreError>;

    /// Replace the stored record only if it still matches `expected`.
    /// Returns whether the write was applied.
    async fn update_if(
        &self,
        expected: Precondition,
        record: DeliveryRecord,
    ) -> Result<bool, StoreError>;

    /// Failed records whose `next_retry_at` has passed and whose budget remains.
    async fn due_for_retry(
        &self,
        now: OffsetDateTime,
        max_tries: u32,
    ) -> Result<Vec<DeliveryRecord>, StoreError>;

    /// Pending or retrying records not updated since `cutoff`.
    async fn stale(&self, cutoff: OffsetDateTime) -> Result<Vec<DeliveryRecord>, StoreError>;

    /// Matching records, newest first.
    async fn list_deliveries(
        &self,
        filter: &DeliveryFilter,
    ) -> Result<Vec<DeliveryRecord>, StoreError>;

    async fn count_by_status(
        &self,
        filter: &DeliveryFilter,
    ) -> Result<HashMap<StatusKind, usize>, StoreError>;
}

/// Named lane of background work consumed by the delivery workers.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    fn lane(&self) -> &str;

    async fn enqueue(
        &self,
        delivery_id: DeliveryId,
        not_before: Option<OffsetDateTime>,
    ) -> Result<(), QueueError>;

    /// Wait for the next visible task. `None` once the queue is closed.
    async fn dequeue(&self) -> Option<DeliveryTask>;
}
