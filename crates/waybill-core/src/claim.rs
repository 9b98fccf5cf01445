//! Batch claim engine.
//!
//! A claim opens a transaction, selects up to `limit` due rows in a source
//! status with `FOR UPDATE SKIP LOCKED`, moves them to their target status and
//! commits. Rows locked by a concurrent claimer are skipped rather than
//! waited on, so any number of workers can partition a backlog without a
//! lock service and without ever owning the same row twice.
//!
//! An empty [`ClaimOutcome`] means the backlog is exhausted for this cycle.
//! Rows that fail to decode are logged and left untouched; their status never
//! advanced, so the next cycle reclaims them.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, warn};

use crate::{error::Result, models::ShipmentId};

/// Columns the claim engine needs to know about a table.
///
/// Identifiers are compile-time constants; they are interpolated into SQL and
/// must never come from input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimTable {
    /// Table name.
    pub table: &'static str,
    /// Text primary key holding the shipment identifier.
    pub key_column: &'static str,
    /// Lowercase text status column.
    pub status_column: &'static str,
    /// Timestamp compared against the claim's due bound.
    pub due_column: &'static str,
}

impl ClaimTable {
    /// Delivery-side shipments, due when their window starts.
    pub const SHIPMENTS: Self = Self {
        table: "shipments",
        key_column: "uid",
        status_column: "status",
        due_column: "window_start",
    };

    /// Courier-side tracking rows, due at their next check.
    pub const COURIER_REQUESTS: Self = Self {
        table: "courier_requests",
        key_column: "shipment_uid",
        status_column: "status",
        due_column: "next_check_at",
    };
}

/// Target state for a claimed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transition {
    /// Status written to the row.
    pub status: &'static str,
    /// New due time; `None` keeps the current one.
    pub due_at: Option<DateTime<Utc>>,
}

impl Transition {
    /// Moves a row to `status` and keeps its due time.
    pub const fn to(status: &'static str) -> Self {
        Self { status, due_at: None }
    }

    /// Also reschedules the row.
    #[must_use]
    pub fn due_at(mut self, due_at: DateTime<Utc>) -> Self {
        self.due_at = Some(due_at);
        self
    }
}

/// Rows moved by one claim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimOutcome {
    /// Claimed identifiers with the transition each received, in due order.
    pub claimed: Vec<(ShipmentId, Transition)>,
    /// Locked rows dropped because they could not be decoded.
    pub skipped: usize,
}

impl ClaimOutcome {
    /// True when no row was claimed.
    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }

    /// Number of claimed rows.
    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    /// Claimed identifiers only.
    pub fn ids(&self) -> Vec<ShipmentId> {
        self.claimed.iter().map(|(id, _)| id.clone()).collect()
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Locks up to `limit` due rows in `source` status and decodes them as `T`.
///
/// The rows stay locked until `tx` ends. `columns` is the select list.
/// Rows whose key is in `exclude` are never selected. Rows that fail to
/// decode are logged and dropped; the second element of the result counts
/// them.
///
/// # Errors
///
/// Returns `CoreError::Database` when the query fails.
pub async fn lock_due_rows<T>(
    tx: &mut Transaction<'_, Postgres>,
    table: ClaimTable,
    columns: &str,
    source: &str,
    due_before: Option<DateTime<Utc>>,
    limit: usize,
    exclude: &[ShipmentId],
) -> Result<(Vec<T>, usize)>
where
    T: for<'r> FromRow<'r, PgRow>,
{
    let sql = format!(
        "SELECT {columns} FROM {table} \
         WHERE {status} = $1 AND ($2::timestamptz IS NULL OR {due} <= $2) \
           AND NOT ({key} = ANY($4)) \
         ORDER BY {due} ASC, {key} ASC \
         LIMIT $3 \
         FOR UPDATE SKIP LOCKED",
        table = table.table,
        status = table.status_column,
        due = table.due_column,
        key = table.key_column,
    );
    let exclude: Vec<&str> = exclude.iter().map(ShipmentId::as_str).collect();

    let rows = sqlx::query(&sql)
        .bind(source)
        .bind(due_before)
        .bind(limit_param(limit))
        .bind(&exclude)
        .fetch_all(&mut **tx)
        .await?;

    let mut decoded = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for row in &rows {
        match T::from_row(row) {
            Ok(value) => decoded.push(value),
            Err(e) => {
                skipped += 1;
                warn!(table = table.table, source, error = %e, "dropping undecodable row from batch");
            },
        }
    }

    Ok((decoded, skipped))
}

/// Locks up to `limit` due identifiers in `source` status.
///
/// # Errors
///
/// Returns `CoreError::Database` when the query fails.
pub async fn lock_due(
    tx: &mut Transaction<'_, Postgres>,
    table: ClaimTable,
    source: &str,
    due_before: Option<DateTime<Utc>>,
    limit: usize,
) -> Result<(Vec<ShipmentId>, usize)> {
    let (keys, skipped): (Vec<ClaimKey>, usize) =
        lock_due_rows(tx, table, table.key_column, source, due_before, limit, &[]).await?;
    Ok((keys.into_iter().map(|k| k.0).collect(), skipped))
}

/// Applies `transition` to every row in `keys`.
///
/// # Errors
///
/// Returns `CoreError::Database` when the update fails.
pub async fn apply_transition(
    tx: &mut Transaction<'_, Postgres>,
    table: ClaimTable,
    keys: &[ShipmentId],
    transition: Transition,
) -> Result<u64> {
    if keys.is_empty() {
        return Ok(0);
    }

    let sql = format!(
        "UPDATE {table} SET {status} = $1, {due} = COALESCE($2, {due}) WHERE {key} = ANY($3)",
        table = table.table,
        status = table.status_column,
        due = table.due_column,
        key = table.key_column,
    );
    let keys: Vec<&str> = keys.iter().map(ShipmentId::as_str).collect();

    let result = sqlx::query(&sql)
        .bind(transition.status)
        .bind(transition.due_at)
        .bind(&keys)
        .execute(&mut **tx)
        .await?;

    Ok(result.rows_affected())
}

/// Claims a batch and transitions it in one transaction.
///
/// `assign` picks the transition for each claimed identifier, which lets a
/// single claim split rows between outcomes (found vs. not found).
///
/// # Errors
///
/// Any transaction-level failure (begin, select, update, commit) returns
/// `CoreError::Database` and leaves every row untouched.
pub async fn claim_batch<F>(
    pool: &PgPool,
    table: ClaimTable,
    source: &str,
    due_before: Option<DateTime<Utc>>,
    limit: usize,
    mut assign: F,
) -> Result<ClaimOutcome>
where
    F: FnMut(&ShipmentId) -> Transition,
{
    let mut tx = pool.begin().await?;

    let (keys, skipped) = lock_due(&mut tx, table, source, due_before, limit).await?;
    if keys.is_empty() {
        tx.rollback().await?;
        return Ok(ClaimOutcome { claimed: Vec::new(), skipped });
    }

    let claimed: Vec<(ShipmentId, Transition)> = keys
        .into_iter()
        .map(|key| {
            let transition = assign(&key);
            (key, transition)
        })
        .collect();

    let mut groups: Vec<(Transition, Vec<ShipmentId>)> = Vec::new();
    for (key, transition) in &claimed {
        match groups.iter_mut().find(|(t, _)| t == transition) {
            Some((_, members)) => members.push(key.clone()),
            None => groups.push((*transition, vec![key.clone()])),
        }
    }
    for (transition, members) in &groups {
        apply_transition(&mut tx, table, members, *transition).await?;
    }

    tx.commit().await?;

    debug!(table = table.table, source, claimed = claimed.len(), skipped, "claimed batch");
    Ok(ClaimOutcome { claimed, skipped })
}

struct ClaimKey(ShipmentId);

impl<'r> FromRow<'r, PgRow> for ClaimKey {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self(row.try_get(0)?))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn transition_keeps_due_time_by_default() {
        let t = Transition::to("pending");
        assert_eq!(t.due_at, None);

        let due = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).single().unwrap_or_default();
        assert_eq!(Transition::to("searching").due_at(due).due_at, Some(due));
    }

    #[test]
    fn outcome_reports_ids_in_order() {
        let outcome = ClaimOutcome {
            claimed: vec![
                (ShipmentId::from("a"), Transition::to("found")),
                (ShipmentId::from("b"), Transition::to("requested")),
            ],
            skipped: 1,
        };
        assert_eq!(outcome.ids(), vec![ShipmentId::from("a"), ShipmentId::from("b")]);
        assert_eq!(outcome.len(), 2);
        assert!(ClaimOutcome::default().is_empty());
    }
}
