use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};

use crate::domain::DeliveryId;
use crate::outbound::webhook::DeliveryRef;
use crate::server::AppState;
use crate::server::auth::Owner;
use crate::server::handlers::deliveries::parse_delivery_id;
use crate::server::responses::ApiError;

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub message: &'static str,
    pub event: String,
    pub deliveries_created: usize,
    pub deliveries: Vec<DeliveryRef>,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub message: &'static str,
    pub delivery_id: DeliveryId,
}

pub async fn trigger(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(event_name): Path<String>,
    request: Result<Json<TriggerRequest>, JsonRejection>,
) -> Result<Json<TriggerResponse>, ApiError> {
    let Json(request) = request?;

    let report = state
        .dispatcher
        .trigger(&event_name, &owner, request.payload)
        .await?;

    let message = if report.created_count == 0 {
        "No active endpoints configured for this event"
    } else {
        "Webhook event triggered successfully"
    };

    Ok(Json(TriggerResponse {
        message,
        event: event_name,
        deliveries_created: report.created_count,
        deliveries: report.deliveries,
    }))
}

pub async fn retry_delivery(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<RetryResponse>, ApiError> {
    let delivery_id = parse_delivery_id(&id)?;
    let record = state.dispatcher.retry_delivery(&owner, delivery_id).await?;

    Ok(Json(RetryResponse {
        message: "Delivery retry initiated",
        delivery_id: record.id,
    }))
}
