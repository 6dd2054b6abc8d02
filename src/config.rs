use std::collections::HashMap;
use std::time::Duration;

use config::{Config as ConfigLib, ConfigBuilder, ConfigError, Environment, builder::DefaultState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub delivery: DeliveryConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Worker pool and outbound request settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub max_tries: u32,
    pub request_timeout_secs: u64,
    pub worker_count: usize,
    /// Bytes of the receiver's response kept on the record.
    pub response_body_limit: usize,
    pub user_agent: String,
    pub queue_lane: String,
    /// Consecutive infrastructure errors before a delivery is abandoned.
    pub max_exceptions: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub interval_secs: u64,
    pub stale_after_secs: u64,
}

impl DeliveryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    fn load_with_sources(env_vars: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults()?;
        // If env_vars is provided, we use it instead of system environment
        // This is to avoid systems variables pollution across tests
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // Use system environment variables
            // Should be in the format APP_SERVER__PORT or APP_DELIVERY__WORKER_COUNT
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the worker pool and the sweep timer cannot run with.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.delivery.worker_count == 0 {
            return Err(ConfigError::Message(
                "delivery.worker_count must be greater than 0".to_string(),
            ));
        }
        if self.sweep.interval_secs == 0 {
            return Err(ConfigError::Message(
                "sweep.interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Set default values for the configuration.
    /// This is used when no environment variables or config file are provided
    fn set_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        ConfigLib::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("delivery.max_tries", 5)?
            .set_default("delivery.request_timeout_secs", 30)?
            .set_default("delivery.worker_count", 4)?
            .set_default("delivery.response_body_limit", 1024)?
            .set_default("delivery.user_agent", "Webhook-Management-Platform/1.0")?
            .set_default("delivery.queue_lane", "webhooks")?
            .set_default("delivery.max_exceptions", 3)?
            .set_default("sweep.interval_secs", 60)?
            .set_default("sweep.stale_after_secs", 600)
    }
}
