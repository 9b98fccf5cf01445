//! Configuration for the courier simulator.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use waybill_engine::{BackoffStrategy, ClientConfig, DrainConfig, RetryPolicy};

use crate::{
    policy::{AlwaysFound, OutcomePolicy, Probabilistic},
    workers::SearchSettings,
};

const CONFIG_FILE: &str = "courier.toml";
const ENV_PREFIX: &str = "COURIER_";

/// Courier simulator configuration.
///
/// Loaded in priority order, highest first:
/// 1. Environment variables prefixed with `COURIER_` (plus the bare
///    `DATABASE_URL`)
/// 2. `courier.toml` in the working directory
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// PostgreSQL connection URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Maximum number of pooled connections.
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    /// HTTP bind address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Inbound request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Upper bound on waiting for workers at shutdown, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Delivery service webhook receiving status changes.
    #[serde(default = "default_delivery_webhook_url")]
    pub delivery_webhook_url: String,
    /// Outbound call timeout in seconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Sleep between drains in seconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Sleep after a failed cycle in seconds.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,
    /// Rows claimed per cycle by each worker.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Delay between search steps in seconds.
    #[serde(default = "default_search_delay")]
    pub search_delay_secs: u64,
    /// Chance that a search round finds a courier. `1.0` always finds one.
    #[serde(default = "default_found_probability")]
    pub found_probability: f64,
    /// Cap on concurrent webhooks per cycle.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Attempts per delivery webhook.
    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,
    /// Base backoff delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Maximum backoff delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Jitter factor between 0.0 and 1.0.
    #[serde(default = "default_jitter_factor")]
    pub retry_jitter_factor: f64,
}

impl Config {
    /// Loads defaults, then `courier.toml`, then environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result fails
    /// validation.
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::file(CONFIG_FILE))
                .merge(Env::raw().only(&["DATABASE_URL"]))
                .merge(Env::prefixed(ENV_PREFIX)),
        )
    }

    /// Extracts and validates configuration from `figment`.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction or validation fails.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("failed to load courier configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Parses the bind address.
    ///
    /// # Errors
    ///
    /// Returns an error if `listen_addr` is not a socket address.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_addr.parse().with_context(|| format!("invalid listen_addr {}", self.listen_addr))
    }

    /// Outbound client configuration for delivery webhooks.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.call_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.retry_max_attempts,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                max_delay: Duration::from_millis(self.retry_max_delay_ms),
                jitter_factor: self.retry_jitter_factor,
                backoff_strategy: BackoffStrategy::Exponential,
            },
            ..ClientConfig::default()
        }
    }

    /// Drain loop timing shared by the three workers.
    pub fn drain_config(&self) -> DrainConfig {
        DrainConfig {
            tick_interval: Duration::from_secs(self.tick_interval_secs),
            error_backoff: Duration::from_secs(self.error_backoff_secs),
        }
    }

    /// Delay between search steps.
    pub fn search_delay(&self) -> Duration {
        Duration::from_secs(self.search_delay_secs)
    }

    /// Worker settings.
    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            batch_size: self.batch_size,
            search_delay: self.search_delay(),
            max_concurrent_calls: self.max_concurrent_calls,
        }
    }

    /// Outcome policy for the configured found probability.
    pub fn outcome_policy(&self) -> Arc<dyn OutcomePolicy> {
        if self.found_probability >= 1.0 {
            Arc::new(AlwaysFound)
        } else {
            Arc::new(Probabilistic::new(self.found_probability))
        }
    }

    fn validate(&self) -> Result<()> {
        if self.database_max_connections == 0 {
            anyhow::bail!("database_max_connections must be greater than 0");
        }
        self.listen_addr()?;

        if self.delivery_webhook_url.is_empty() {
            anyhow::bail!("delivery_webhook_url must be set");
        }
        if self.tick_interval_secs == 0 {
            anyhow::bail!("tick_interval_secs must be greater than 0");
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }
        if self.max_concurrent_calls == 0 {
            anyhow::bail!("max_concurrent_calls must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.found_probability) {
            anyhow::bail!("found_probability must be between 0.0 and 1.0");
        }
        if self.retry_max_attempts == 0 {
            anyhow::bail!("retry_max_attempts must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            anyhow::bail!("retry_jitter_factor must be between 0.0 and 1.0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            listen_addr: default_listen_addr(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            delivery_webhook_url: default_delivery_webhook_url(),
            call_timeout_secs: default_call_timeout(),
            tick_interval_secs: default_tick_interval(),
            error_backoff_secs: default_error_backoff(),
            batch_size: default_batch_size(),
            search_delay_secs: default_search_delay(),
            found_probability: default_found_probability(),
            max_concurrent_calls: default_max_concurrent_calls(),
            retry_max_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
            retry_jitter_factor: default_jitter_factor(),
        }
    }
}

fn default_database_url() -> String {
    "postgresql://localhost/waybill_courier".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_listen_addr() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_delivery_webhook_url() -> String {
    "http://127.0.0.1:8080/webhook".to_string()
}

fn default_call_timeout() -> u64 {
    10
}

fn default_tick_interval() -> u64 {
    waybill_engine::DEFAULT_TICK_INTERVAL_SECS
}

fn default_error_backoff() -> u64 {
    5
}

fn default_batch_size() -> usize {
    100
}

fn default_search_delay() -> u64 {
    300
}

fn default_found_probability() -> f64 {
    1.0
}

fn default_max_concurrent_calls() -> usize {
    waybill_engine::DEFAULT_MAX_CONCURRENT_CALLS
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_jitter_factor() -> f64 {
    0.25
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use waybill_core::ShipmentId;

    use super::*;
    use crate::policy::SearchOutcome;

    fn with(key: &str, value: impl Serialize) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Serialized::default(key, value))
    }

    #[test]
    fn defaults_match_the_simulator_timings() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.listen_addr().unwrap().port(), 9090);
        assert_eq!(config.search_delay(), Duration::from_secs(300));
        assert_eq!(config.delivery_webhook_url, "http://127.0.0.1:8080/webhook");
        assert_eq!(config.outcome_policy().resolve(&ShipmentId::from("s")), SearchOutcome::Found);
    }

    #[test]
    fn overrides_are_extracted() {
        let config = Config::from_figment(with("search_delay_secs", 30)).unwrap();
        assert_eq!(config.search_settings().search_delay, Duration::from_secs(30));

        let config = Config::from_figment(with("found_probability", 0.0)).unwrap();
        assert_eq!(config.outcome_policy().resolve(&ShipmentId::from("s")), SearchOutcome::NotFound);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_figment(with("found_probability", 1.5)).is_err());
        assert!(Config::from_figment(with("batch_size", 0)).is_err());
        assert!(Config::from_figment(with("listen_addr", "nowhere")).is_err());
        assert!(Config::from_figment(with("delivery_webhook_url", "")).is_err());
    }
}
