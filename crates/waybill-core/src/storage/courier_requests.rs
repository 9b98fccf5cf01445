//! Repository for courier tracking rows kept by the 3PL simulator.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    claim::{self, ClaimOutcome, ClaimTable, Transition},
    error::Result,
    models::{CourierRequest, CourierStatus, ShipmentId},
};

/// Courier request table access.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns the shared pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Records an intake call for `uid` as a single upsert.
    ///
    /// The first call creates the row in `requested` with one retry. Each
    /// further call increments retries up to [`CourierRequest::MAX_RETRIES`];
    /// a call arriving when retries are already saturated forces the row to
    /// `found`. Every call reschedules the next check to `next_check_at`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the statement fails.
    pub async fn intake(
        &self,
        uid: &ShipmentId,
        next_check_at: DateTime<Utc>,
    ) -> Result<CourierRequest> {
        let request = sqlx::query_as::<_, CourierRequest>(
            r#"
            INSERT INTO courier_requests (shipment_uid, next_check_at, retries, status)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (shipment_uid) DO UPDATE SET
                retries = LEAST(courier_requests.retries + 1, $4),
                status = CASE
                    WHEN courier_requests.retries >= $4 THEN $5
                    ELSE courier_requests.status
                END,
                next_check_at = EXCLUDED.next_check_at
            RETURNING shipment_uid, next_check_at, retries, status
            "#,
        )
        .bind(uid)
        .bind(next_check_at)
        .bind(CourierStatus::Requested)
        .bind(CourierRequest::MAX_RETRIES)
        .bind(CourierStatus::Found)
        .fetch_one(&*self.pool)
        .await?;

        Ok(request)
    }

    /// Finds a tracking row by shipment identifier.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find(&self, uid: &ShipmentId) -> Result<Option<CourierRequest>> {
        let request = sqlx::query_as::<_, CourierRequest>(
            "SELECT shipment_uid, next_check_at, retries, status \
             FROM courier_requests WHERE shipment_uid = $1",
        )
        .bind(uid)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(request)
    }

    /// Claims up to `limit` rows in `source` due at or before `due_before`
    /// and applies the transition chosen by `assign` to each.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` on any transaction failure.
    pub async fn claim<F>(
        &self,
        source: CourierStatus,
        due_before: DateTime<Utc>,
        limit: usize,
        assign: F,
    ) -> Result<ClaimOutcome>
    where
        F: FnMut(&ShipmentId) -> Transition,
    {
        claim::claim_batch(
            &self.pool,
            ClaimTable::COURIER_REQUESTS,
            source.as_str(),
            Some(due_before),
            limit,
            assign,
        )
        .await
    }

    /// Counts rows in a status.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_status(&self, status: CourierStatus) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM courier_requests WHERE status = $1")
                .bind(status)
                .fetch_one(&*self.pool)
                .await?;

        Ok(count)
    }
}
