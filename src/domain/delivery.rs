use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::subscription::{EndpointId, EventId};

/// Identifier of a delivery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(pub Uuid);

impl DeliveryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a delivery, carrying the timestamps that only exist in that state.
///
/// `Failed { next_retry_at: Some(_) }` is retry-eligible; `Failed { next_retry_at: None }`
/// is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,

    Retrying,

    Success {
        #[serde(with = "time::serde::rfc3339")]
        delivered_at: OffsetDateTime,
    },

    Failed {
        #[serde(with = "time::serde::rfc3339::option")]
        next_retry_at: Option<OffsetDateTime>,
    },
}

impl DeliveryStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            DeliveryStatus::Pending => StatusKind::Pending,
            DeliveryStatus::Retrying => StatusKind::Retrying,
            DeliveryStatus::Success { .. } => StatusKind::Success,
            DeliveryStatus::Failed { .. } => StatusKind::Failed,
        }
    }
}

/// Status discriminant used for queries, filters and conditional updates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Pending,

    Retrying,

    Success,

    Failed,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Pending => "pending",
            StatusKind::Retrying => "retrying",
            StatusKind::Success => "success",
            StatusKind::Failed => "failed",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StatusKind::Pending),
            "retrying" => Ok(StatusKind::Retrying),
            "success" => Ok(StatusKind::Success),
            "failed" => Ok(StatusKind::Failed),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot move delivery from {from} to {to}")]
    Illegal { from: StatusKind, to: StatusKind },

    #[error("delivery has exhausted its retry budget")]
    NotRetryEligible,
}

/// Guard for a conditional store update.
///
/// The write only applies if the stored record still has this status and
/// attempt count. Every attempt bumps the count, so a record that went through
/// a full cycle in between never matches a stale precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precondition {
    pub status: StatusKind,
    pub attempt_count: u32,
}

/// One attempt-sequence of sending a payload to one endpoint for one triggered event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryRecord {
    pub id: DeliveryId,

    pub event_id: EventId,

    pub endpoint_id: EndpointId,

    /// Snapshot taken at trigger time, never modified afterwards.
    pub payload: serde_json::Value,

    #[serde(flatten)]
    pub status: DeliveryStatus,

    pub response_code: Option<u16>,

    pub response_body: Option<String>,

    pub attempt_count: u32,

    /// Consecutive infrastructure-level exceptions.
    pub exception_count: u32,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl DeliveryRecord {
    /// Create a pending delivery
    pub fn pending(
        event_id: EventId,
        endpoint_id: EndpointId,
        payload: serde_json::Value,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: DeliveryId::new(),
            event_id,
            endpoint_id,
            payload,
            status: DeliveryStatus::Pending,
            response_code: None,
            response_body: None,
            attempt_count: 0,
            exception_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> StatusKind {
        self.status.kind()
    }

    pub fn delivered_at(&self) -> Option<OffsetDateTime> {
        match self.status {
            DeliveryStatus::Success { delivered_at } => Some(delivered_at),
            _ => None,
        }
    }

    pub fn next_retry_at(&self) -> Option<OffsetDateTime> {
        match self.status {
            DeliveryStatus::Failed { next_retry_at } => next_retry_at,
            _ => None,
        }
    }

    pub fn is_retry_eligible(&self) -> bool {
        self.next_retry_at().is_some()
    }

    /// Back in the pipeline after a failure: re-armed and waiting, or claimed
    /// again by a worker.
    pub fn is_reactivated(&self) -> bool {
        match self.kind() {
            StatusKind::Pending => self.attempt_count >= 1,
            StatusKind::Retrying => self.attempt_count >= 2,
            _ => false,
        }
    }

    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        self.next_retry_at().is_some_and(|at| at <= now)
    }

    /// Precondition matching the record as it is now.
    pub fn precondition(&self) -> Precondition {
        Precondition {
            status: self.kind(),
            attempt_count: self.attempt_count,
        }
    }

    /// Claim the record for an attempt: `pending → retrying`, bumping the attempt count.
    pub fn begin_attempt(&mut self, now: OffsetDateTime) -> Result<(), TransitionError> {
        self.expect(StatusKind::Pending, StatusKind::Retrying)?;
        self.attempt_count += 1;
        self.status = DeliveryStatus::Retrying;
        self.updated_at = now;
        Ok(())
    }

    /// `retrying → success`
    pub fn record_success(
        &mut self,
        response_code: u16,
        response_body: String,
        now: OffsetDateTime,
    ) -> Result<(), TransitionError> {
        self.expect(StatusKind::Retrying, StatusKind::Success)?;
        self.status = DeliveryStatus::Success { delivered_at: now };
        self.response_code = Some(response_code);
        self.response_body = Some(response_body);
        self.exception_count = 0;
        self.updated_at = now;
        Ok(())
    }

    /// `retrying → failed`. `next_retry_at` is `None` when the budget is exhausted.
    pub fn record_failure(
        &mut self,
        response_code: Option<u16>,
        response_body: String,
        next_retry_at: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> Result<(), TransitionError> {
        self.expect(StatusKind::Retrying, StatusKind::Failed)?;
        self.status = DeliveryStatus::Failed { next_retry_at };
        self.response_code = response_code;
        self.response_body = Some(response_body);
        self.exception_count = 0;
        self.updated_at = now;
        Ok(())
    }

    /// `retrying → failed` after an infrastructure error, counting it toward the circuit breaker.
    pub fn record_exception(
        &mut self,
        error: String,
        next_retry_at: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> Result<(), TransitionError> {
        self.expect(StatusKind::Retrying, StatusKind::Failed)?;
        self.status = DeliveryStatus::Failed { next_retry_at };
        self.response_code = None;
        self.response_body = Some(error);
        self.exception_count += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Terminal failure without retry. Allowed from any state except `success`.
    pub fn abandon(&mut self, reason: String, now: OffsetDateTime) -> Result<(), TransitionError> {
        if self.kind() == StatusKind::Success {
            return Err(TransitionError::Illegal {
                from: StatusKind::Success,
                to: StatusKind::Failed,
            });
        }
        self.status = DeliveryStatus::Failed {
            next_retry_at: None,
        };
        self.response_code = None;
        self.response_body = Some(reason);
        self.updated_at = now;
        Ok(())
    }

    /// `failed (retry-eligible) → pending`
    pub fn rearm(&mut self, now: OffsetDateTime) -> Result<(), TransitionError> {
        self.expect(StatusKind::Failed, StatusKind::Pending)?;
        if !self.is_retry_eligible() {
            return Err(TransitionError::NotRetryEligible);
        }
        self.status = DeliveryStatus::Pending;
        self.updated_at = now;
        Ok(())
    }

    /// Bump `updated_at` without changing state.
    pub fn touch(&mut self, now: OffsetDateTime) {
        self.updated_at = now;
    }

    fn expect(&self, from: StatusKind, to: StatusKind) -> Result<(), TransitionError> {
        if self.kind() == from {
            Ok(())
        } else {
            Err(TransitionError::Illegal {
                from: self.kind(),
                to,
            })
        }
    }
}
