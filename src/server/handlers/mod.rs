pub mod deliveries;
pub mod endpoints;
pub mod events;
pub mod health;
pub mod root;
pub mod webhooks;
