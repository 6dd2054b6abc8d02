use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ports::{DeliveryFilter, StoreError};
use crate::domain::{DeliveryError, DeliveryRecord, Endpoint, EndpointId, Event, EventId, OwnerId};
use crate::server::AppState;
use crate::server::auth::Owner;
use crate::server::responses::{ApiError, Message};

const RECENT_DELIVERIES: usize = 20;

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub name: String,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub endpoint_ids: Vec<Uuid>,
}

/// Partial update. `endpoint_ids`, when present, replaces the subscription set.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateEventRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub endpoint_ids: Option<Vec<Uuid>>,
}

/// An event with its subscribed endpoints and latest deliveries.
#[derive(Debug, Serialize)]
pub struct EventDetail {
    #[serde(flatten)]
    pub event: Event,
    pub endpoints: Vec<Endpoint>,
    pub deliveries: Vec<DeliveryRecord>,
}

/// Register an event. Endpoint ids the caller does not own are ignored.
pub async fn create_event(
    State(state): State<AppState>,
    Owner(owner): Owner,
    request: Result<Json<CreateEventRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let Json(request) = request?;

    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("The name field is required."));
    }

    let subscribed = owned_endpoint_ids(&state, &owner, request.endpoint_ids).await?;

    let mut event = Event::new(owner, name.to_string()).subscribe_to(subscribed);
    if let Some(description) = request.description {
        event = event.with_description(description);
    }
    if let Some(metadata) = request.metadata {
        event = event.with_metadata(metadata);
    }

    state
        .events
        .insert_event(event.clone())
        .await
        .map_err(name_taken)?;
    tracing::info!(event_id = %event.id, event = %event.name, "Event registered");

    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn list_events(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<Vec<Event>>, ApiError> {
    Ok(Json(state.events.events_for_owner(&owner).await?))
}

pub async fn show_event(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<EventDetail>, ApiError> {
    let event = owned_event(&state, &owner, &id).await?;

    let mut endpoints = Vec::with_capacity(event.endpoint_ids.len());
    for id in &event.endpoint_ids {
        if let Some(endpoint) = state.endpoints.endpoint(*id).await? {
            endpoints.push(endpoint);
        }
    }
    endpoints.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    let filter = DeliveryFilter {
        event_id: Some(event.id),
        limit: Some(RECENT_DELIVERIES),
        ..DeliveryFilter::default()
    };
    let deliveries = state.deliveries.list_deliveries(&filter).await?;

    Ok(Json(EventDetail {
        event,
        endpoints,
        deliveries,
    }))
}

pub async fn update_event(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    request: Result<Json<UpdateEventRequest>, JsonRejection>,
) -> Result<Json<Event>, ApiError> {
    let Json(request) = request?;
    let mut event = owned_event(&state, &owner, &id).await?;

    if let Some(name) = request.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::validation("The name field is required."));
        }
        event.name = name.to_string();
    }
    if let Some(description) = request.description {
        event.description = Some(description);
    }
    if let Some(metadata) = request.metadata {
        event.metadata = Some(metadata);
    }
    if let Some(ids) = request.endpoint_ids {
        event.endpoint_ids = owned_endpoint_ids(&state, &owner, ids)
            .await?
            .into_iter()
            .collect();
    }

    if !state
        .events
        .update_event(event.clone())
        .await
        .map_err(name_taken)?
    {
        return Err(ApiError::not_found("Event"));
    }
    tracing::info!(event_id = %event.id, event = %event.name, "Event updated");

    Ok(Json(event))
}

pub async fn delete_event(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<Message>, ApiError> {
    let event = owned_event(&state, &owner, &id).await?;

    if !state.events.delete_event(event.id).await? {
        return Err(ApiError::not_found("Event"));
    }
    tracing::info!(event_id = %event.id, event = %event.name, "Event deleted");

    Ok(Json(Message {
        message: "Event deleted successfully",
    }))
}

/// Keep the ids owned by `owner`; an id matching no endpoint at all is a validation error.
async fn owned_endpoint_ids(
    state: &AppState,
    owner: &OwnerId,
    ids: Vec<Uuid>,
) -> Result<Vec<EndpointId>, ApiError> {
    let mut owned = Vec::with_capacity(ids.len());
    for id in ids.into_iter().map(EndpointId) {
        match state.endpoints.endpoint(id).await? {
            Some(endpoint) if &endpoint.owner == owner => owned.push(id),
            Some(_) => {}
            None => {
                return Err(ApiError::validation(format!(
                    "The selected endpoint {id} is invalid."
                )));
            }
        }
    }
    Ok(owned)
}

async fn owned_event(state: &AppState, owner: &OwnerId, raw: &str) -> Result<Event, ApiError> {
    let id = Uuid::parse_str(raw)
        .map(EventId)
        .map_err(|_| ApiError::not_found("Event"))?;

    match state.events.event(id).await? {
        Some(event) if &event.owner == owner => Ok(event),
        Some(_) => Err(DeliveryError::Forbidden.into()),
        None => Err(ApiError::not_found("Event")),
    }
}

fn name_taken(err: StoreError) -> ApiError {
    match err {
        StoreError::Conflict(_) => ApiError::validation("The name has already been taken."),
        e => e.into(),
    }
}
