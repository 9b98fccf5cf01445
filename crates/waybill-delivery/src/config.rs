//! Configuration for the delivery service.

use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use chrono::FixedOffset;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use waybill_engine::{BackoffStrategy, ClientConfig, DrainConfig, RetryPolicy};

use crate::service::RedispatchPolicy;

const CONFIG_FILE: &str = "delivery.toml";
const ENV_PREFIX: &str = "DELIVERY_";

/// Delivery service configuration.
///
/// Loaded in priority order, highest first:
/// 1. Environment variables prefixed with `DELIVERY_` (plus the bare
///    `DATABASE_URL`)
/// 2. `delivery.toml` in the working directory
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL.
    ///
    /// Environment variable: `DELIVERY_DATABASE_URL` or `DATABASE_URL`
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Maximum number of pooled connections.
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    // Server
    /// HTTP bind address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Inbound request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Upper bound on waiting for workers at shutdown, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    // Collaborators
    /// Base URL of the 3PL service.
    #[serde(default = "default_courier_url")]
    pub courier_url: String,
    /// Core webhook URL. When unset, core notifications are only logged.
    #[serde(default)]
    pub core_webhook_url: Option<String>,
    /// Outbound call timeout in seconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    // Workers
    /// Sleep between drains in seconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Sleep after a failed cycle in seconds.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,
    /// How far ahead of its window a queued shipment becomes pending.
    #[serde(default = "default_pending_lookahead")]
    pub pending_lookahead_secs: u64,
    /// Rows claimed per pending cycle.
    #[serde(default = "default_batch_size")]
    pub pending_batch_size: usize,
    /// Rows claimed per dispatch cycle.
    #[serde(default = "default_batch_size")]
    pub dispatch_batch_size: usize,
    /// Cap on concurrent outbound calls per cycle.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    // Webhook
    /// First local hour at which `not_found` no longer re-requests a courier.
    #[serde(default = "default_cutoff_hour")]
    pub redispatch_cutoff_hour: u32,
    /// Offset east of UTC, in seconds, used to read the local hour.
    #[serde(default)]
    pub utc_offset_secs: i32,

    // Retry
    /// Attempts per core notification.
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
    /// Loads defaults, then `delivery.toml`, then environment overrides.
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
        let config: Self = figment.extract().context("failed to load delivery configuration")?;
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

    /// Retry policy for core notifications.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter_factor: self.retry_jitter_factor,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }

    /// Outbound client configuration.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.call_timeout_secs),
            retry: self.retry_policy(),
            ..ClientConfig::default()
        }
    }

    /// Drain loop timing shared by both workers.
    pub fn drain_config(&self) -> DrainConfig {
        DrainConfig {
            tick_interval: Duration::from_secs(self.tick_interval_secs),
            error_backoff: Duration::from_secs(self.error_backoff_secs),
        }
    }

    /// Cutoff rule for `not_found` re-dispatch.
    pub fn redispatch_policy(&self) -> RedispatchPolicy {
        let utc_offset = FixedOffset::east_opt(self.utc_offset_secs)
            .unwrap_or_else(|| RedispatchPolicy::default().utc_offset);
        RedispatchPolicy { cutoff_hour: self.redispatch_cutoff_hour, utc_offset }
    }

    fn validate(&self) -> Result<()> {
        if self.database_max_connections == 0 {
            anyhow::bail!("database_max_connections must be greater than 0");
        }
        self.listen_addr()?;

        if self.tick_interval_secs == 0 {
            anyhow::bail!("tick_interval_secs must be greater than 0");
        }
        if self.pending_batch_size == 0 || self.dispatch_batch_size == 0 {
            anyhow::bail!("batch sizes must be greater than 0");
        }
        if self.max_concurrent_calls == 0 {
            anyhow::bail!("max_concurrent_calls must be greater than 0");
        }
        if self.redispatch_cutoff_hour > 24 {
            anyhow::bail!("redispatch_cutoff_hour must be between 0 and 24");
        }
        if FixedOffset::east_opt(self.utc_offset_secs).is_none() {
            anyhow::bail!("utc_offset_secs must be within one day");
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
            courier_url: default_courier_url(),
            core_webhook_url: None,
            call_timeout_secs: default_call_timeout(),
            tick_interval_secs: default_tick_interval(),
            error_backoff_secs: default_error_backoff(),
            pending_lookahead_secs: default_pending_lookahead(),
            pending_batch_size: default_batch_size(),
            dispatch_batch_size: default_batch_size(),
            max_concurrent_calls: default_max_concurrent_calls(),
            redispatch_cutoff_hour: default_cutoff_hour(),
            utc_offset_secs: 0,
            retry_max_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
            retry_jitter_factor: default_jitter_factor(),
        }
    }
}

fn default_database_url() -> String {
    "postgresql://localhost/waybill_delivery".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_courier_url() -> String {
    "http://127.0.0.1:9090".to_string()
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

fn default_pending_lookahead() -> u64 {
    3600
}

fn default_batch_size() -> usize {
    100
}

fn default_max_concurrent_calls() -> usize {
    waybill_engine::DEFAULT_MAX_CONCURRENT_CALLS
}

fn default_cutoff_hour() -> u32 {
    23
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
