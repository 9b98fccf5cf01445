//! Repository for delivery-side shipments.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};

use crate::{
    claim::{self, ClaimOutcome, ClaimTable, Transition},
    error::Result,
    models::{Shipment, ShipmentId, ShipmentStatus},
};

const COLUMNS: &str = "uid, user_uid, user_address, origin_lat, origin_long, \
                       destination_lat, destination_long, window_start, window_end, status";

/// Shipment table access.
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

    /// Inserts a new shipment.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ConstraintViolation` for a duplicate identifier.
    pub async fn insert(&self, shipment: &Shipment) -> Result<()> {
        self.insert_impl(&*self.pool, shipment).await
    }

    /// Inserts a new shipment within a transaction.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ConstraintViolation` for a duplicate identifier.
    pub async fn insert_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        shipment: &Shipment,
    ) -> Result<()> {
        self.insert_impl(&mut **tx, shipment).await
    }

    async fn insert_impl<'e, E>(&self, executor: E, shipment: &Shipment) -> Result<()>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO shipments (
                uid, user_uid, user_address,
                origin_lat, origin_long, destination_lat, destination_long,
                window_start, window_end, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&shipment.uid)
        .bind(&shipment.user_uid)
        .bind(&shipment.user_address)
        .bind(shipment.routing.origin.lat)
        .bind(shipment.routing.origin.long)
        .bind(shipment.routing.destination.lat)
        .bind(shipment.routing.destination.long)
        .bind(shipment.window.start_time)
        .bind(shipment.window.end_time)
        .bind(shipment.status)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Finds a shipment by identifier.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find(&self, uid: &ShipmentId) -> Result<Option<Shipment>> {
        let sql = format!("SELECT {COLUMNS} FROM shipments WHERE uid = $1");
        let shipment =
            sqlx::query_as::<_, Shipment>(&sql).bind(uid).fetch_optional(&*self.pool).await?;
        Ok(shipment)
    }

    /// Promotes up to `limit` queued shipments whose window starts at or
    /// before `due_before` to `pending`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` on any transaction failure.
    pub async fn promote_queued(
        &self,
        due_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<ClaimOutcome> {
        claim::claim_batch(
            &self.pool,
            ClaimTable::SHIPMENTS,
            ShipmentStatus::Queued.as_str(),
            Some(due_before),
            limit,
            |_| Transition::to(ShipmentStatus::Pending.as_str()),
        )
        .await
    }

    /// Locks up to `limit` pending shipments inside `tx`, skipping the
    /// identifiers in `exclude`.
    ///
    /// The locks are held until the transaction ends, so the caller can make
    /// the courier request before committing the status change.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the query fails.
    pub async fn lock_pending_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        limit: usize,
        exclude: &[ShipmentId],
    ) -> Result<Vec<Shipment>> {
        let (shipments, _skipped) = claim::lock_due_rows(
            tx,
            ClaimTable::SHIPMENTS,
            COLUMNS,
            ShipmentStatus::Pending.as_str(),
            None,
            limit,
            exclude,
        )
        .await?;
        Ok(shipments)
    }

    /// Marks the given shipments as `requested` inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the update fails.
    pub async fn mark_requested_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        uids: &[ShipmentId],
    ) -> Result<u64> {
        claim::apply_transition(
            tx,
            ClaimTable::SHIPMENTS,
            uids,
            Transition::to(ShipmentStatus::Requested.as_str()),
        )
        .await
    }

    /// Moves a shipment from `from` to `to` if it is currently in `from`.
    ///
    /// Returns whether a row changed.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn transition(
        &self,
        uid: &ShipmentId,
        from: ShipmentStatus,
        to: ShipmentStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE shipments SET status = $1 WHERE uid = $2 AND status = $3")
            .bind(to)
            .bind(uid)
            .bind(from)
            .execute(&*self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts shipments in a status.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_status(&self, status: ShipmentStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shipments WHERE status = $1")
            .bind(status)
            .fetch_one(&*self.pool)
            .await?;

        Ok(count)
    }
}
