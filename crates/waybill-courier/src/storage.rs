//! Storage abstraction for the courier simulator.
//!
//! Intake and the search workers depend on [`CourierStore`]. The PostgreSQL
//! adapter delegates to the courier request repository; the in-memory
//! [`mock::MockCourierStore`] reproduces its upsert and skip-locked claim
//! semantics for tests.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use tracing::warn;
use waybill_core::{
    storage::Storage, ClaimOutcome, CourierRequest, CourierStatus, Result, ShipmentId, Transition,
};

/// Picks the transition for each claimed row.
pub type Assign<'a> = &'a (dyn Fn(&ShipmentId) -> Transition + Send + Sync);

/// Courier request persistence required by the simulator.
pub trait CourierStore: Send + Sync + 'static {
    /// Records an intake call as one atomic upsert.
    ///
    /// Creates the row in `requested` with one retry, or increments retries
    /// up to the cap, forcing `found` once the cap was already reached.
    /// `next_check_at` is written either way.
    fn intake(
        &self,
        uid: ShipmentId,
        next_check_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<CourierRequest>> + Send + '_>>;

    /// Finds a tracking row.
    fn find(
        &self,
        uid: ShipmentId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CourierRequest>>> + Send + '_>>;

    /// Claims up to `limit` rows in `source` due at or before `due_before`
    /// and applies the transition `assign` picks for each.
    fn claim<'a>(
        &'a self,
        source: CourierStatus,
        due_before: DateTime<Utc>,
        limit: usize,
        assign: Assign<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<ClaimOutcome>> + Send + 'a>>;

    /// Verifies the store is reachable.
    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production store backed by PostgreSQL.
pub struct PostgresCourierStore {
    storage: Arc<Storage>,
}

impl PostgresCourierStore {
    /// Creates a new PostgreSQL store adapter.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl CourierStore for PostgresCourierStore {
    fn intake(
        &self,
        uid: ShipmentId,
        next_check_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<CourierRequest>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.courier_requests.intake(&uid, next_check_at).await })
    }

    fn find(
        &self,
        uid: ShipmentId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CourierRequest>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.courier_requests.find(&uid).await })
    }

    fn claim<'a>(
        &'a self,
        source: CourierStatus,
        due_before: DateTime<Utc>,
        limit: usize,
        assign: Assign<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<ClaimOutcome>> + Send + 'a>> {
        Box::pin(async move {
            let outcome =
                self.storage.courier_requests.claim(source, due_before, limit, assign).await?;
            if outcome.skipped > 0 {
                warn!(%source, skipped = outcome.skipped, "courier rows skipped on decode failure");
            }
            Ok(outcome)
        })
    }

    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.health_check().await })
    }
}

pub mod mock {
    //! In-memory courier store for tests.
    //!
    //! Intake and claims run under a single write lock, matching the atomic
    //! upsert and claim transaction. Rows can be marked as locked by another
    //! transaction to exercise skip-locked behaviour.

    use std::{
        collections::{HashMap, HashSet},
        future::Future,
        pin::Pin,
        sync::Arc,
    };

    use chrono::{DateTime, Utc};
    use tokio::sync::RwLock;
    use waybill_core::{
        ClaimOutcome, CoreError, CourierRequest, CourierStatus, Result, ShipmentId,
    };

    use super::{Assign, CourierStore};

    /// Mock store for exercising intake and workers without a database.
    #[derive(Debug, Clone, Default)]
    pub struct MockCourierStore {
        rows: Arc<RwLock<HashMap<ShipmentId, CourierRequest>>>,
        locked: Arc<RwLock<HashSet<ShipmentId>>>,
        error: Arc<RwLock<Option<String>>>,
    }

    impl MockCourierStore {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds a row as-is, replacing any existing one.
        pub async fn put(&self, request: CourierRequest) {
            self.rows.write().await.insert(request.shipment_uid.clone(), request);
        }

        /// Marks a row as locked by a concurrent transaction.
        pub async fn lock_row(&self, uid: impl Into<ShipmentId>) {
            self.locked.write().await.insert(uid.into());
        }

        /// Fails the next intake or claim with a database error.
        pub async fn inject_error(&self, message: impl Into<String>) {
            *self.error.write().await = Some(message.into());
        }

        /// Current copy of a row.
        pub async fn get(&self, uid: &ShipmentId) -> Option<CourierRequest> {
            self.rows.read().await.get(uid).cloned()
        }

        /// Number of rows in `status`.
        pub async fn count(&self, status: CourierStatus) -> usize {
            self.rows.read().await.values().filter(|r| r.status == status).count()
        }

        /// Total number of rows.
        pub async fn len(&self) -> usize {
            self.rows.read().await.len()
        }

        async fn take_error(&self) -> Result<()> {
            match self.error.write().await.take() {
                Some(message) => Err(CoreError::Database(message)),
                None => Ok(()),
            }
        }
    }

    impl CourierStore for MockCourierStore {
        fn intake(
            &self,
            uid: ShipmentId,
            next_check_at: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<CourierRequest>> + Send + '_>> {
            Box::pin(async move {
                self.take_error().await?;

                let mut rows = self.rows.write().await;
                let row = rows
                    .entry(uid.clone())
                    .and_modify(|row| {
                        if row.is_saturated() {
                            row.status = CourierStatus::Found;
                        }
                        row.retries = (row.retries + 1).min(CourierRequest::MAX_RETRIES);
                        row.next_check_at = next_check_at;
                    })
                    .or_insert_with(|| CourierRequest {
                        shipment_uid: uid,
                        next_check_at,
                        retries: 1,
                        status: CourierStatus::Requested,
                    });
                Ok(row.clone())
            })
        }

        fn find(
            &self,
            uid: ShipmentId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<CourierRequest>>> + Send + '_>> {
            Box::pin(async move { Ok(self.rows.read().await.get(&uid).cloned()) })
        }

        fn claim<'a>(
            &'a self,
            source: CourierStatus,
            due_before: DateTime<Utc>,
            limit: usize,
            assign: Assign<'a>,
        ) -> Pin<Box<dyn Future<Output = Result<ClaimOutcome>> + Send + 'a>> {
            Box::pin(async move {
                self.take_error().await?;

                let mut rows = self.rows.write().await;
                let locked = self.locked.read().await;

                let mut due: Vec<&CourierRequest> = rows
                    .values()
                    .filter(|r| r.status == source && r.next_check_at <= due_before)
                    .filter(|r| !locked.contains(&r.shipment_uid))
                    .collect();
                due.sort_by(|a, b| {
                    a.next_check_at.cmp(&b.next_check_at).then(a.shipment_uid.cmp(&b.shipment_uid))
                });
                let ids: Vec<ShipmentId> =
                    due.into_iter().take(limit).map(|r| r.shipment_uid.clone()).collect();

                let mut claimed = Vec::with_capacity(ids.len());
                for uid in ids {
                    let transition = assign(&uid);
                    let status: CourierStatus = transition.status.parse()?;
                    if let Some(row) = rows.get_mut(&uid) {
                        row.status = status;
                        if let Some(due_at) = transition.due_at {
                            row.next_check_at = due_at;
                        }
                    }
                    claimed.push((uid, transition));
                }

                Ok(ClaimOutcome { claimed, skipped: 0 })
            })
        }

        fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                match self.error.read().await.as_ref() {
                    Some(message) => Err(CoreError::Database(message.clone())),
                    None => Ok(()),
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use chrono::TimeDelta;

    use super::{mock::MockCourierStore, *};

    #[tokio::test]
    async fn second_intake_increments_retries_on_one_row() {
        let store = MockCourierStore::new();
        let now = Utc::now();

        store.intake("s-1".into(), now).await.unwrap();
        let row = store.intake("s-1".into(), now + TimeDelta::minutes(1)).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(row.retries, 2);
        assert_eq!(row.status, CourierStatus::Requested);
        assert_eq!(row.next_check_at, now + TimeDelta::minutes(1));
    }

    #[tokio::test]
    async fn fourth_intake_forces_found() {
        let store = MockCourierStore::new();
        let now = Utc::now();

        for _ in 0..3 {
            let row = store.intake("s-1".into(), now).await.unwrap();
            assert_eq!(row.status, CourierStatus::Requested);
        }
        let row = store.intake("s-1".into(), now).await.unwrap();

        assert_eq!(row.retries, CourierRequest::MAX_RETRIES);
        assert_eq!(row.status, CourierStatus::Found);
    }

    #[tokio::test]
    async fn claim_skips_locked_and_future_rows() {
        let store = MockCourierStore::new();
        let now = Utc::now();
        store.intake("due".into(), now - TimeDelta::seconds(1)).await.unwrap();
        store.intake("locked".into(), now - TimeDelta::seconds(1)).await.unwrap();
        store.intake("later".into(), now + TimeDelta::minutes(5)).await.unwrap();
        store.lock_row("locked").await;

        let to_searching = |_: &ShipmentId| Transition::to("searching");
        let outcome = store.claim(CourierStatus::Requested, now, 10, &to_searching).await.unwrap();

        assert_eq!(outcome.ids(), vec![ShipmentId::from("due")]);
        assert_eq!(store.count(CourierStatus::Searching).await, 1);
        assert_eq!(store.count(CourierStatus::Requested).await, 2);
    }

    #[tokio::test]
    async fn injected_error_fails_one_claim() {
        let store = MockCourierStore::new();
        store.inject_error("connection reset").await;

        let keep = |_: &ShipmentId| Transition::to("searching");
        let first = store.claim(CourierStatus::Requested, Utc::now(), 10, &keep).await;
        let second = store.claim(CourierStatus::Requested, Utc::now(), 10, &keep).await;

        assert!(first.is_err());
        assert!(second.unwrap().is_empty());
    }
}
