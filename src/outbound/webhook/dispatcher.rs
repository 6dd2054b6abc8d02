use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::domain::ports::{DeliveryStore, EndpointStore, EventStore, WorkQueue};
use crate::domain::{
    DeliveryError, DeliveryId, DeliveryRecord, EndpointId, OwnerId, StatusKind,
};

/// Reference to a delivery created by a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryRef {
    pub id: DeliveryId,
    pub endpoint_id: EndpointId,
    pub status: StatusKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerReport {
    pub created_count: usize,
    pub deliveries: Vec<DeliveryRef>,
}

/// Fans a triggered event out to one delivery per active subscribed endpoint.
pub struct Dispatcher {
    endpoints: Arc<dyn EndpointStore>,
    events: Arc<dyn EventStore>,
    deliveries: Arc<dyn DeliveryStore>,
    queue: Arc<dyn WorkQueue>,
}

impl Dispatcher {
    pub fn new(
        endpoints: Arc<dyn EndpointStore>,
        events: Arc<dyn EventStore>,
        deliveries: Arc<dyn DeliveryStore>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            endpoints,
            events,
            deliveries,
            queue,
        }
    }

    /// Create and schedule deliveries for `event_name` owned by `owner`.
    ///
    /// An event with no active subscribers is a valid, empty fanout. A failed
    /// enqueue leaves the record `pending` for the recovery sweep and does not
    /// fail the trigger.
    pub async fn trigger(
        &self,
        event_name: &str,
        owner: &OwnerId,
        payload: Value,
    ) -> Result<TriggerReport, DeliveryError> {
        if !payload.is_object() {
            return Err(DeliveryError::Validation(
                "payload must be a JSON object".to_string(),
            ));
        }

        let event = self
            .events
            .find_by_name_and_owner(event_name, owner)
            .await?
            .ok_or(DeliveryError::NotFound("Event"))?;

        let endpoints = self.endpoints.active_for_event(event.id).await?;
        let mut deliveries = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            let record = DeliveryRecord::pending(
                event.id,
                endpoint.id,
                payload.clone(),
                OffsetDateTime::now_utc(),
            );
            let delivery_ref = DeliveryRef {
                id: record.id,
                endpoint_id: record.endpoint_id,
                status: record.kind(),
            };

            self.deliveries.insert_delivery(record).await?;

            if let Err(e) = self.queue.enqueue(delivery_ref.id, None).await {
                warn!(
                    delivery_id = %delivery_ref.id,
                    lane = %self.queue.lane(),
                    error = %e,
                    "Failed to enqueue delivery, leaving it for recovery"
                );
            }

            deliveries.push(delivery_ref);
        }

        info!(
            event = %event.name,
            event_id = %event.id,
            deliveries_created = deliveries.len(),
            "Event triggered"
        );

        Ok(TriggerReport {
            created_count: deliveries.len(),
            deliveries,
        })
    }

    /// Manually re-arm a retry-eligible failed delivery.
    ///
    /// A record that a concurrent sweep already reactivated is returned as is,
    /// whether the sweep won before the read or at the conditional update;
    /// nothing is enqueued in that case. An enqueue failure after a winning
    /// update leaves the record `pending` for the recovery sweep.
    pub async fn retry_delivery(
        &self,
        owner: &OwnerId,
        delivery_id: DeliveryId,
    ) -> Result<DeliveryRecord, DeliveryError> {
        let record = self
            .deliveries
            .delivery(delivery_id)
            .await?
            .ok_or(DeliveryError::NotFound("Delivery"))?;

        let owned = self
            .events
            .event(record.event_id)
            .await?
            .is_some_and(|event| &event.owner == owner);
        if !owned {
            return Err(DeliveryError::Forbidden);
        }

        if record.is_reactivated() {
            info!(delivery_id = %record.id, "Delivery already re-armed concurrently");
            return Ok(record);
        }
        if !record.is_retry_eligible() {
            return Err(DeliveryError::InvalidState(
                "Only failed deliveries can be retried".to_string(),
            ));
        }

        let expected = record.precondition();
        let mut rearmed = record.clone();
        rearmed
            .rearm(OffsetDateTime::now_utc())
            .map_err(|e| DeliveryError::InvalidState(e.to_string()))?;

        if self.deliveries.update_if(expected, rearmed.clone()).await? {
            match self.queue.enqueue(rearmed.id, None).await {
                Ok(()) => info!(delivery_id = %rearmed.id, "Delivery queued for manual retry"),
                Err(e) => warn!(
                    delivery_id = %rearmed.id,
                    lane = %self.queue.lane(),
                    error = %e,
                    "Failed to enqueue manual retry, leaving it for recovery"
                ),
            }
            Ok(rearmed)
        } else {
            info!(delivery_id = %rearmed.id, "Delivery already re-armed concurrently");
            let current = self.deliveries.delivery(delivery_id).await?;
            Ok(current.unwrap_or(rearmed))
        }
    }
}
