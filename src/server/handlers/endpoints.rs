use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ports::DeliveryFilter;
use crate::domain::{DeliveryError, DeliveryRecord, Endpoint, EndpointId, Event, OwnerId};
use crate::outbound::webhook::generate_secret;
use crate::server::AppState;
use crate::server::auth::Owner;
use crate::server::responses::{ApiError, Message};

const MAX_URL_LENGTH: usize = 2048;
const RECENT_DELIVERIES: usize = 10;

#[derive(Debug, Deserialize)]
pub struct CreateEndpointRequest {
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    #[serde(default = "default_active", alias = "is_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateEndpointRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    #[serde(alias = "is_active")]
    pub active: Option<bool>,
}

/// An endpoint with the events it is subscribed to and its latest deliveries.
#[derive(Debug, Serialize)]
pub struct EndpointDetail {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    pub events: Vec<Event>,
    pub deliveries: Vec<DeliveryRecord>,
}

/// Creation response; the only place the signing secret is ever shown.
#[derive(Debug, Serialize)]
pub struct CreatedEndpoint {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    pub secret: String,
}

pub async fn create_endpoint(
    State(state): State<AppState>,
    Owner(owner): Owner,
    request: Result<Json<CreateEndpointRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedEndpoint>), ApiError> {
    let Json(request) = request?;

    if request.name.trim().is_empty() {
        return Err(ApiError::validation("The name field is required."));
    }
    validate_url(&request.url)?;

    let secret = generate_secret();
    let mut endpoint =
        Endpoint::new(owner, request.url, secret.clone()).with_name(request.name);
    if let Some(description) = request.description {
        endpoint = endpoint.with_description(description);
    }
    if !request.active {
        endpoint.disable();
    }

    state.endpoints.insert_endpoint(endpoint.clone()).await?;
    tracing::info!(endpoint_id = %endpoint.id, "Endpoint registered");

    Ok((StatusCode::CREATED, Json(CreatedEndpoint { endpoint, secret })))
}

pub async fn list_endpoints(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<Vec<Endpoint>>, ApiError> {
    Ok(Json(state.endpoints.endpoints_for_owner(&owner).await?))
}

pub async fn show_endpoint(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<EndpointDetail>, ApiError> {
    let endpoint = owned_endpoint(&state, &owner, &id).await?;

    let events = state
        .events
        .events_for_owner(&owner)
        .await?
        .into_iter()
        .filter(|event| event.is_subscribed(&endpoint.id))
        .collect();

    let filter = DeliveryFilter {
        endpoint_id: Some(endpoint.id),
        limit: Some(RECENT_DELIVERIES),
        ..DeliveryFilter::default()
    };
    let deliveries = state.deliveries.list_deliveries(&filter).await?;

    Ok(Json(EndpointDetail {
        endpoint,
        events,
        deliveries,
    }))
}

pub async fn update_endpoint(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    request: Result<Json<UpdateEndpointRequest>, JsonRejection>,
) -> Result<Json<Endpoint>, ApiError> {
    let Json(request) = request?;
    let mut endpoint = owned_endpoint(&state, &owner, &id).await?;

    if let Some(name) = request.name {
        if name.trim().is_empty() {
            return Err(ApiError::validation("The name field is required."));
        }
        endpoint.name = Some(name);
    }
    if let Some(url) = request.url {
        validate_url(&url)?;
        endpoint.url = url;
    }
    if let Some(description) = request.description {
        endpoint.description = Some(description);
    }
    match request.active {
        Some(true) => endpoint.enable(),
        Some(false) => endpoint.disable(),
        None => {}
    }

    if !state.endpoints.update_endpoint(endpoint.clone()).await? {
        return Err(ApiError::not_found("Endpoint"));
    }
    tracing::info!(endpoint_id = %endpoint.id, active = endpoint.active, "Endpoint updated");

    Ok(Json(endpoint))
}

pub async fn delete_endpoint(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<Message>, ApiError> {
    let endpoint = owned_endpoint(&state, &owner, &id).await?;

    if !state.endpoints.delete_endpoint(endpoint.id).await? {
        return Err(ApiError::not_found("Endpoint"));
    }
    tracing::info!(endpoint_id = %endpoint.id, "Endpoint deleted");

    Ok(Json(Message {
        message: "Endpoint deleted successfully",
    }))
}

/// Look up an endpoint by its path id: 404 when unknown, 403 when owned by someone else.
async fn owned_endpoint(state: &AppState, owner: &OwnerId, raw: &str) -> Result<Endpoint, ApiError> {
    let id = Uuid::parse_str(raw)
        .map(EndpointId)
        .map_err(|_| ApiError::not_found("Endpoint"))?;

    match state.endpoints.endpoint(id).await? {
        Some(endpoint) if &endpoint.owner == owner => Ok(endpoint),
        Some(_) => Err(DeliveryError::Forbidden.into()),
        None => Err(ApiError::not_found("Endpoint")),
    }
}

fn validate_url(raw: &str) -> Result<(), ApiError> {
    if raw.len() > MAX_URL_LENGTH {
        return Err(ApiError::validation("The url may not be greater than 2048 characters."));
    }
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(ApiError::validation("The url must be a valid URL.")),
    }
}
