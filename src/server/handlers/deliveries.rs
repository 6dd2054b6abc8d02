use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use time::Date;
use time::format_description::well_known::Iso8601;
use uuid::Uuid;

use crate::domain::ports::DeliveryFilter;
use crate::domain::{
    DeliveryError, DeliveryId, DeliveryRecord, Endpoint, EndpointId, Event, EventId, OwnerId,
    StatusKind,
};
use crate::server::AppState;
use crate::server::auth::Owner;
use crate::server::responses::{ApiError, Page};

pub const PER_PAGE: usize = 20;

#[derive(Debug, Default, Deserialize)]
pub struct DeliveryQuery {
    pub status: Option<String>,
    pub endpoint_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    /// `YYYY-MM-DD`, inclusive.
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub page: Option<usize>,
}

/// A delivery with the event and endpoint it belongs to.
#[derive(Debug, Serialize)]
pub struct DeliveryDetail {
    #[serde(flatten)]
    pub delivery: DeliveryRecord,
    pub event: Event,
    pub endpoint: Option<Endpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub pending: usize,
    pub retrying: usize,
    /// Percentage of successful deliveries, two decimals.
    pub success_rate: f64,
}

fn parse_date(field: &str, raw: Option<&str>) -> Result<Option<Date>, ApiError> {
    raw.map(|raw| {
        Date::parse(raw, &Iso8601::DATE)
            .map_err(|_| ApiError::validation(format!("The {field} is not a valid date.")))
    })
    .transpose()
}

pub(crate) fn parse_delivery_id(raw: &str) -> Result<DeliveryId, ApiError> {
    Uuid::parse_str(raw)
        .map(DeliveryId)
        .map_err(|_| ApiError::not_found("Delivery"))
}

/// Filter restricted to deliveries of the owner's events.
async fn owner_scope(state: &AppState, owner: &OwnerId) -> Result<DeliveryFilter, ApiError> {
    let events = state.events.events_for_owner(owner).await?;
    Ok(DeliveryFilter {
        scope: Some(events.into_iter().map(|e| e.id).collect()),
        ..DeliveryFilter::default()
    })
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    Owner(owner): Owner,
    query: Result<Query<DeliveryQuery>, QueryRejection>,
) -> Result<Json<Page<DeliveryRecord>>, ApiError> {
    let Query(query) = query?;

    let mut filter = owner_scope(&state, &owner).await?;
    filter.status = query
        .status
        .as_deref()
        .map(str::parse::<StatusKind>)
        .transpose()
        .map_err(ApiError::validation)?;
    filter.endpoint_id = query.endpoint_id.map(EndpointId);
    filter.event_id = query.event_id.map(EventId);
    filter.created_from = parse_date("from date", query.from_date.as_deref())?;
    filter.created_to = parse_date("to date", query.to_date.as_deref())?;

    let total: usize = state
        .deliveries
        .count_by_status(&filter)
        .await?
        .values()
        .sum();

    let page = query.page.unwrap_or(1).max(1);
    filter.offset = page.saturating_sub(1).saturating_mul(PER_PAGE);
    filter.limit = Some(PER_PAGE);
    let data = state.deliveries.list_deliveries(&filter).await?;

    Ok(Json(Page::new(data, page, PER_PAGE, total)))
}

pub async fn show_delivery(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<DeliveryDetail>, ApiError> {
    let id = parse_delivery_id(&id)?;
    let delivery = state
        .deliveries
        .delivery(id)
        .await?
        .ok_or(DeliveryError::NotFound("Delivery"))?;

    let event = match state.events.event(delivery.event_id).await? {
        Some(event) if event.owner == owner => event,
        _ => return Err(DeliveryError::Forbidden.into()),
    };
    let endpoint = state.endpoints.endpoint(delivery.endpoint_id).await?;

    Ok(Json(DeliveryDetail {
        delivery,
        event,
        endpoint,
    }))
}

pub async fn delivery_stats(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<DeliveryStats>, ApiError> {
    let filter = owner_scope(&state, &owner).await?;
    let counts = state.deliveries.count_by_status(&filter).await?;

    let count = |kind: StatusKind| counts.get(&kind).copied().unwrap_or(0);
    Ok(Json(DeliveryStats::new(
        count(StatusKind::Success),
        count(StatusKind::Failed),
        count(StatusKind::Pending),
        count(StatusKind::Retrying),
    )))
}

impl DeliveryStats {
    pub fn new(successful: usize, failed: usize, pending: usize, retrying: usize) -> Self {
        let total = successful + failed + pending + retrying;
        let success_rate = if total > 0 {
            (successful as f64 / total as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        Self {
            total,
            successful,
            failed,
            pending,
            retrying,
            success_rate,
        }
    }
}
