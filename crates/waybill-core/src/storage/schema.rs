//! Schema bootstrap.
//!
//! Each service owns one table. `ensure_schema` creates both so a single
//! database can back a local deployment and the integration tests.

use sqlx::PgPool;

use crate::error::Result;

const SHIPMENTS: &str = r#"
    CREATE TABLE IF NOT EXISTS shipments (
        uid TEXT PRIMARY KEY,
        user_uid TEXT NOT NULL,
        user_address TEXT NOT NULL,
        origin_lat DOUBLE PRECISION NOT NULL,
        origin_long DOUBLE PRECISION NOT NULL,
        destination_lat DOUBLE PRECISION NOT NULL,
        destination_long DOUBLE PRECISION NOT NULL,
        window_start TIMESTAMPTZ NOT NULL,
        window_end TIMESTAMPTZ NOT NULL,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

const SHIPMENTS_STATUS_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_shipments_status_window
    ON shipments(status, window_start)
    WHERE status IN ('queued', 'pending')
"#;

const COURIER_REQUESTS: &str = r#"
    CREATE TABLE IF NOT EXISTS courier_requests (
        shipment_uid TEXT PRIMARY KEY,
        next_check_at TIMESTAMPTZ NOT NULL,
        retries INTEGER NOT NULL CHECK (retries BETWEEN 0 AND 3),
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

const COURIER_REQUESTS_STATUS_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_courier_requests_status_check
    ON courier_requests(status, next_check_at)
"#;

/// Creates the delivery-side `shipments` table if missing.
///
/// # Errors
///
/// Returns `CoreError::Database` if a statement fails.
pub async fn ensure_delivery_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(SHIPMENTS).execute(pool).await?;
    sqlx::query(SHIPMENTS_STATUS_INDEX).execute(pool).await?;
    Ok(())
}

/// Creates the courier-side `courier_requests` table if missing.
///
/// # Errors
///
/// Returns `CoreError::Database` if a statement fails.
pub async fn ensure_courier_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(COURIER_REQUESTS).execute(pool).await?;
    sqlx::query(COURIER_REQUESTS_STATUS_INDEX).execute(pool).await?;
    Ok(())
}

/// Creates every waybill table.
///
/// # Errors
///
/// Returns `CoreError::Database` if a statement fails.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    ensure_delivery_schema(pool).await?;
    ensure_courier_schema(pool).await
}
