// Webhook delivery engine
//
//   dispatcher       – fans a trigger out into pending deliveries and enqueues them
//   delivery_service – worker pool executing one signed HTTP attempt per task
//   retry_sweep      – periodic requeue of due retries and recovery of orphans
//
// Leaf components: delivery_queue, hmac_signer, http_client, retry_strategy

pub mod delivery_queue;
pub mod delivery_service;
pub mod dispatcher;
pub mod hmac_signer;
pub mod http_client;
pub mod retry_strategy;
pub mod retry_sweep;

// Re-export commonly used types
pub use delivery_queue::DeliveryQueue;
pub use delivery_service::{AttemptOutcome, DeliveryService};
pub use dispatcher::{DeliveryRef, Dispatcher, TriggerReport};
pub use hmac_signer::{format_signature_header, generate_secret, parse_signature_header};
pub use http_client::{HttpClientError, WebhookHttpClient};
pub use retry_strategy::RetryStrategy;
pub use retry_sweep::{RetrySweeper, SweepReport};
