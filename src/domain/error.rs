use thiserror::Error;

use super::ports::{QueueError, StoreError};

/// Errors surfaced synchronously by the dispatcher and the management API.
///
/// Delivery failures are never reported here; they live on the record.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("{0}")]
    InvalidState(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
