pub mod delivery;
pub mod error;
pub mod ports;
pub mod subscription;

pub use delivery::{DeliveryId, DeliveryRecord, DeliveryStatus, Precondition, StatusKind};
pub use error::DeliveryError;
pub use subscription::{Endpoint, EndpointId, Event, EventId, OwnerId};
