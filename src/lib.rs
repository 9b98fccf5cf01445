//! Process bootstrap shared by the `waybill-delivery` and `waybill-courier`
//! binaries: tracing, database pool, shutdown signal.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Initializes tracing with environment-based configuration.
///
/// `RUST_LOG` overrides the default filter.
///
/// # Errors
///
/// Returns an error if `RUST_LOG` is set but cannot be parsed.
pub fn init_tracing() -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new("info,waybill=debug,tower_http=debug")
            .context("invalid default log filter")?,
    };

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("tracing already initialized")?;
    Ok(())
}

/// Opens a connection pool, retrying while the database comes up, and
/// verifies it with `SELECT 1`.
///
/// # Errors
///
/// Returns an error once every attempt has failed.
pub async fn create_database_pool(url: &str, max_connections: u32) -> Result<PgPool> {
    let mut attempt = 1;

    loop {
        let connected = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(url)
            .await;

        match connected {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .execute(&pool)
                    .await
                    .context("failed to verify database connection")?;
                return Ok(pool);
            },
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                warn!(attempt, max_attempts = CONNECT_ATTEMPTS, error = %e, "database connection failed, retrying");
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                attempt += 1;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool after retries");
            },
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
#[allow(clippy::expect_used)]
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C"),
        () = terminate => info!("received SIGTERM"),
    }
}

/// Hides the password of a database URL for logging.
pub fn mask_database_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}
