//! Storage abstraction for the delivery service.
//!
//! Use cases and workers depend on [`ShipmentStore`] rather than on the
//! PostgreSQL repositories directly, so the state machine can be exercised
//! against the in-memory [`mock::MockShipmentStore`], which honours the same
//! skip-locked claim semantics.

use std::{future::Future, pin::Pin, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;
use waybill_core::{
    storage::Storage, CoreError, Result, Shipment, ShipmentId, ShipmentStatus,
};

/// Performs the courier requests for a claimed batch of pending shipments.
///
/// Returns the identifiers whose request succeeded; only those advance to
/// `requested`.
#[async_trait]
pub trait ShipmentDispatcher: Send + Sync {
    /// Requests couriers for `shipments`.
    async fn dispatch(&self, shipments: &[Shipment]) -> Vec<ShipmentId>;
}

/// Result of one dispatch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Pending rows locked by the cycle.
    pub claimed: usize,
    /// Rows advanced to `requested`.
    pub requested: Vec<ShipmentId>,
    /// Rows whose request failed and stayed `pending`.
    pub failed: Vec<ShipmentId>,
}

impl DispatchOutcome {
    fn split(batch: &[Shipment], requested: Vec<ShipmentId>) -> Self {
        let failed = batch
            .iter()
            .filter(|s| !requested.contains(&s.uid))
            .map(|s| s.uid.clone())
            .collect();
        Self { claimed: batch.len(), requested, failed }
    }
}

/// Shipment persistence required by the delivery service.
pub trait ShipmentStore: Send + Sync + 'static {
    /// Inserts a new shipment.
    ///
    /// Fails with `CoreError::ConstraintViolation` if the identifier exists.
    fn insert(&self, shipment: Shipment) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Finds a shipment by identifier.
    fn find(
        &self,
        uid: ShipmentId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Shipment>>> + Send + '_>>;

    /// Claims up to `limit` queued shipments whose window starts at or before
    /// `due_before` and moves them to `pending`.
    fn promote_queued(
        &self,
        due_before: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ShipmentId>>> + Send + '_>>;

    /// Locks up to `limit` pending shipments not listed in `exclude`, hands
    /// them to `dispatcher` and moves the successfully dispatched ones to
    /// `requested`.
    ///
    /// The row locks are held across the dispatch so concurrent dispatchers
    /// never request a courier for the same shipment.
    fn dispatch_pending<'a>(
        &'a self,
        limit: usize,
        exclude: &'a [ShipmentId],
        dispatcher: &'a dyn ShipmentDispatcher,
    ) -> Pin<Box<dyn Future<Output = Result<DispatchOutcome>> + Send + 'a>>;

    /// Moves a `requested` shipment to `shipped`. Returns whether it moved.
    fn mark_shipped(
        &self,
        uid: ShipmentId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Verifies the store is reachable.
    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production store backed by PostgreSQL.
pub struct PostgresShipmentStore {
    storage: Arc<Storage>,
}

impl PostgresShipmentStore {
    /// Creates a new PostgreSQL store adapter.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl ShipmentStore for PostgresShipmentStore {
    fn insert(&self, shipment: Shipment) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.shipments.insert(&shipment).await })
    }

    fn find(
        &self,
        uid: ShipmentId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Shipment>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.shipments.find(&uid).await })
    }

    fn promote_queued(
        &self,
        due_before: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ShipmentId>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            let outcome = storage.shipments.promote_queued(due_before, limit).await?;
            if outcome.skipped > 0 {
                warn!(skipped = outcome.skipped, "queued shipments skipped on decode failure");
            }
            Ok(outcome.ids())
        })
    }

    fn dispatch_pending<'a>(
        &'a self,
        limit: usize,
        exclude: &'a [ShipmentId],
        dispatcher: &'a dyn ShipmentDispatcher,
    ) -> Pin<Box<dyn Future<Output = Result<DispatchOutcome>> + Send + 'a>> {
        Box::pin(async move {
            let pool = self.storage.pool();
            let mut tx = pool.begin().await?;

            let shipments = self.storage.shipments.lock_pending_in_tx(&mut tx, limit, exclude).await?;
            if shipments.is_empty() {
                tx.rollback().await?;
                return Ok(DispatchOutcome::default());
            }

            let requested = dispatcher.dispatch(&shipments).await;
            if !requested.is_empty() {
                self.storage.shipments.mark_requested_in_tx(&mut tx, &requested).await?;
            }
            tx.commit().await?;

            Ok(DispatchOutcome::split(&shipments, requested))
        })
    }

    fn mark_shipped(
        &self,
        uid: ShipmentId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage
                .shipments
                .transition(&uid, ShipmentStatus::Requested, ShipmentStatus::Shipped)
                .await
        })
    }

    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.health_check().await })
    }
}

fn duplicate(uid: &ShipmentId) -> CoreError {
    CoreError::ConstraintViolation(format!("shipment {uid} already exists"))
}

pub mod mock {
    //! In-memory shipment store for tests.
    //!
    //! Claims happen under a single write lock, so they are atomic the way a
    //! claim transaction is. Rows can be marked as locked by another
    //! transaction to exercise skip-locked behaviour, and a dispatch holds its
    //! rows locked while the dispatcher runs.

    use std::{
        collections::{HashMap, HashSet},
        future::Future,
        pin::Pin,
        sync::Arc,
    };

    use chrono::{DateTime, Utc};
    use tokio::sync::RwLock;
    use waybill_core::{CoreError, Result, Shipment, ShipmentId, ShipmentStatus};

    use super::{duplicate, DispatchOutcome, ShipmentDispatcher, ShipmentStore};

    /// Mock store for exercising delivery logic without a database.
    #[derive(Debug, Clone, Default)]
    pub struct MockShipmentStore {
        shipments: Arc<RwLock<HashMap<ShipmentId, Shipment>>>,
        locked: Arc<RwLock<HashSet<ShipmentId>>>,
        error: Arc<RwLock<Option<String>>>,
    }

    impl MockShipmentStore {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds a shipment as-is, replacing any existing row.
        pub async fn put(&self, shipment: Shipment) {
            self.shipments.write().await.insert(shipment.uid.clone(), shipment);
        }

        /// Marks a row as locked by a concurrent transaction.
        pub async fn lock_row(&self, uid: impl Into<ShipmentId>) {
            self.locked.write().await.insert(uid.into());
        }

        /// Releases a row locked with [`Self::lock_row`].
        pub async fn unlock_row(&self, uid: &ShipmentId) {
            self.locked.write().await.remove(uid);
        }

        /// Fails the next claim or dispatch with a database error.
        pub async fn inject_error(&self, message: impl Into<String>) {
            *self.error.write().await = Some(message.into());
        }

        /// Current status of a shipment.
        pub async fn status_of(&self, uid: &ShipmentId) -> Option<ShipmentStatus> {
            self.shipments.read().await.get(uid).map(|s| s.status)
        }

        /// Number of shipments in `status`.
        pub async fn count(&self, status: ShipmentStatus) -> usize {
            self.shipments.read().await.values().filter(|s| s.status == status).count()
        }

        /// Total number of shipments.
        pub async fn len(&self) -> usize {
            self.shipments.read().await.len()
        }

        async fn take_error(&self) -> Result<()> {
            match self.error.write().await.take() {
                Some(message) => Err(CoreError::Database(message)),
                None => Ok(()),
            }
        }

        /// Selects up to `limit` unlocked rows in `status` outside `exclude`,
        /// earliest window first.
        fn select_due(
            shipments: &HashMap<ShipmentId, Shipment>,
            locked: &HashSet<ShipmentId>,
            status: ShipmentStatus,
            due_before: Option<DateTime<Utc>>,
            limit: usize,
            exclude: &[ShipmentId],
        ) -> Vec<ShipmentId> {
            let mut due: Vec<&Shipment> = shipments
                .values()
                .filter(|s| s.status == status && !locked.contains(&s.uid))
                .filter(|s| !exclude.contains(&s.uid))
                .filter(|s| due_before.map_or(true, |cutoff| s.window.start_time <= cutoff))
                .collect();
            due.sort_by(|a, b| a.window.start_time.cmp(&b.window.start_time).then(a.uid.cmp(&b.uid)));
            due.into_iter().take(limit).map(|s| s.uid.clone()).collect()
        }
    }

    impl ShipmentStore for MockShipmentStore {
        fn insert(
            &self,
            shipment: Shipment,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                let mut shipments = self.shipments.write().await;
                if shipments.contains_key(&shipment.uid) {
                    return Err(duplicate(&shipment.uid));
                }
                shipments.insert(shipment.uid.clone(), shipment);
                Ok(())
            })
        }

        fn find(
            &self,
            uid: ShipmentId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Shipment>>> + Send + '_>> {
            Box::pin(async move { Ok(self.shipments.read().await.get(&uid).cloned()) })
        }

        fn promote_queued(
            &self,
            due_before: DateTime<Utc>,
            limit: usize,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<ShipmentId>>> + Send + '_>> {
            Box::pin(async move {
                self.take_error().await?;

                let mut shipments = self.shipments.write().await;
                let locked = self.locked.read().await;
                let ids = Self::select_due(
                    &shipments,
                    &locked,
                    ShipmentStatus::Queued,
                    Some(due_before),
                    limit,
                    &[],
                );
                for uid in &ids {
                    if let Some(shipment) = shipments.get_mut(uid) {
                        shipment.status = ShipmentStatus::Pending;
                    }
                }
                Ok(ids)
            })
        }

        fn dispatch_pending<'a>(
            &'a self,
            limit: usize,
            exclude: &'a [ShipmentId],
            dispatcher: &'a dyn ShipmentDispatcher,
        ) -> Pin<Box<dyn Future<Output = Result<DispatchOutcome>> + Send + 'a>> {
            Box::pin(async move {
                self.take_error().await?;

                let batch: Vec<Shipment> = {
                    let shipments = self.shipments.read().await;
                    let mut locked = self.locked.write().await;
                    let ids = Self::select_due(
                        &shipments,
                        &locked,
                        ShipmentStatus::Pending,
                        None,
                        limit,
                        exclude,
                    );
                    locked.extend(ids.iter().cloned());
                    ids.iter().filter_map(|uid| shipments.get(uid).cloned()).collect()
                };
                if batch.is_empty() {
                    return Ok(DispatchOutcome::default());
                }

                let requested = dispatcher.dispatch(&batch).await;

                let mut shipments = self.shipments.write().await;
                for uid in &requested {
                    if let Some(shipment) = shipments.get_mut(uid) {
                        shipment.status = ShipmentStatus::Requested;
                    }
                }
                let mut locked = self.locked.write().await;
                for shipment in &batch {
                    locked.remove(&shipment.uid);
                }

                Ok(DispatchOutcome::split(&batch, requested))
            })
        }

        fn mark_shipped(
            &self,
            uid: ShipmentId,
        ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
            Box::pin(async move {
                let mut shipments = self.shipments.write().await;
                match shipments.get_mut(&uid) {
                    Some(shipment) if shipment.status == ShipmentStatus::Requested => {
                        shipment.status = ShipmentStatus::Shipped;
                        Ok(true)
                    },
                    _ => Ok(false),
                }
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
    use waybill_core::{DeliveryWindow, Location, RoutingInfo};

    use super::{mock::MockShipmentStore, *};

    fn shipment(uid: &str, start: DateTime<Utc>, status: ShipmentStatus) -> Shipment {
        Shipment {
            uid: ShipmentId::new(uid),
            user_uid: "user".into(),
            user_address: "addr".into(),
            routing: RoutingInfo {
                origin: Location { lat: 0.0, long: 0.0 },
                destination: Location { lat: 1.0, long: 1.0 },
            },
            window: DeliveryWindow::starting_at(start),
            status,
        }
    }

    /// Accepts every shipment except those whose uid starts with "bad".
    struct PickyDispatcher;

    #[async_trait]
    impl ShipmentDispatcher for PickyDispatcher {
        async fn dispatch(&self, shipments: &[Shipment]) -> Vec<ShipmentId> {
            shipments
                .iter()
                .filter(|s| !s.uid.as_str().starts_with("bad"))
                .map(|s| s.uid.clone())
                .collect()
        }
    }

    #[tokio::test]
    async fn mock_rejects_duplicate_insert() {
        let store = MockShipmentStore::new();
        let now = Utc::now();
        store.insert(shipment("s-1", now, ShipmentStatus::Queued)).await.unwrap();

        let err = store.insert(shipment("s-1", now, ShipmentStatus::Queued)).await.unwrap_err();

        assert!(matches!(err, CoreError::ConstraintViolation(_)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn promote_respects_lookahead_and_locks() {
        let store = MockShipmentStore::new();
        let now = Utc::now();
        store.put(shipment("soon", now + TimeDelta::minutes(30), ShipmentStatus::Queued)).await;
        store.put(shipment("later", now + TimeDelta::hours(5), ShipmentStatus::Queued)).await;
        store.put(shipment("held", now, ShipmentStatus::Queued)).await;
        store.lock_row("held").await;

        let promoted = store.promote_queued(now + TimeDelta::hours(1), 10).await.unwrap();

        assert_eq!(promoted, vec![ShipmentId::new("soon")]);
        assert_eq!(store.status_of(&"held".into()).await, Some(ShipmentStatus::Queued));
    }

    #[tokio::test]
    async fn dispatch_advances_only_successful_rows() {
        let store = MockShipmentStore::new();
        let now = Utc::now();
        store.put(shipment("good", now, ShipmentStatus::Pending)).await;
        store.put(shipment("bad", now, ShipmentStatus::Pending)).await;

        let outcome = store.dispatch_pending(10, &[], &PickyDispatcher).await.unwrap();

        assert_eq!(outcome.claimed, 2);
        assert_eq!(outcome.requested, vec![ShipmentId::new("good")]);
        assert_eq!(outcome.failed, vec![ShipmentId::new("bad")]);
        assert_eq!(store.status_of(&"bad".into()).await, Some(ShipmentStatus::Pending));
        assert_eq!(store.status_of(&"good".into()).await, Some(ShipmentStatus::Requested));
    }

    #[tokio::test]
    async fn dispatch_passes_over_excluded_rows() {
        let store = MockShipmentStore::new();
        let now = Utc::now();
        store.put(shipment("bad", now - TimeDelta::hours(1), ShipmentStatus::Pending)).await;
        store.put(shipment("good", now, ShipmentStatus::Pending)).await;

        let outcome = store.dispatch_pending(1, &[ShipmentId::new("bad")], &PickyDispatcher).await.unwrap();

        assert_eq!(outcome.requested, vec![ShipmentId::new("good")]);
        assert_eq!(store.status_of(&"bad".into()).await, Some(ShipmentStatus::Pending));
    }

    #[tokio::test]
    async fn mark_shipped_is_guarded() {
        let store = MockShipmentStore::new();
        let now = Utc::now();
        store.put(shipment("req", now, ShipmentStatus::Requested)).await;
        store.put(shipment("pend", now, ShipmentStatus::Pending)).await;

        assert!(store.mark_shipped("req".into()).await.unwrap());
        assert!(!store.mark_shipped("pend".into()).await.unwrap());
        assert!(!store.mark_shipped("missing".into()).await.unwrap());
    }

    #[tokio::test]
    async fn injected_error_fails_one_claim() {
        let store = MockShipmentStore::new();
        store.inject_error("connection reset").await;

        assert!(store.promote_queued(Utc::now(), 10).await.is_err());
        assert!(store.promote_queued(Utc::now(), 10).await.is_ok());
    }
}
