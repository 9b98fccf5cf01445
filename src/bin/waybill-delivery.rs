//! Delivery service.
//!
//! Accepts shipments, dispatches couriers through the 3PL and relays status
//! webhooks to the core collaborator.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use waybill::{create_database_pool, init_tracing, mask_database_url, shutdown_signal};
use waybill_core::{storage::schema, RealClock};
use waybill_delivery::{Config, DeliveryApp, Dependencies};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let config = Config::load()?;
    info!(
        database_url = %mask_database_url(&config.database_url),
        listen_addr = %config.listen_addr,
        courier_url = %config.courier_url,
        "configuration loaded"
    );

    let pool = create_database_pool(&config.database_url, config.database_max_connections).await?;
    schema::ensure_delivery_schema(&pool).await.context("failed to create shipments table")?;
    info!("database ready");

    let listener = TcpListener::bind(config.listen_addr()?)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    let deps = Dependencies::production(&config, pool.clone(), Arc::new(RealClock::new()))?;
    DeliveryApp::new(config, deps).serve(listener, shutdown_signal()).await?;

    pool.close().await;
    info!("delivery shutdown complete");
    Ok(())
}
