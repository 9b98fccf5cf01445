//! Background workers driving shipments from `queued` to `requested`.
//!
//! Both run under a [`waybill_engine::DrainLoop`]. The pending worker only
//! touches the store. The dispatch worker requests couriers for a claimed
//! batch with bounded concurrency while the batch stays locked, then tells
//! the core collaborator about every shipment that advanced.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::TimeDelta;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use waybill_core::{Clock, NotificationStatus, Shipment, ShipmentId, StatusNotification};
use waybill_engine::{fan_out, DrainTask, Result};

use crate::{
    collaborators::{CoreNotifier, ThirdPartyLogistics},
    storage::{ShipmentDispatcher, ShipmentStore},
};

/// Promotes queued shipments whose window opens within the lookahead.
pub struct PendingWorker {
    store: Arc<dyn ShipmentStore>,
    clock: Arc<dyn Clock>,
    lookahead: Duration,
    batch_size: usize,
}

impl PendingWorker {
    /// Creates the worker.
    pub fn new(
        store: Arc<dyn ShipmentStore>,
        clock: Arc<dyn Clock>,
        lookahead: Duration,
        batch_size: usize,
    ) -> Self {
        Self { store, clock, lookahead, batch_size }
    }
}

#[async_trait]
impl DrainTask for PendingWorker {
    fn name(&self) -> &'static str {
        "pending"
    }

    async fn run_cycle(&self) -> Result<usize> {
        let lookahead = TimeDelta::from_std(self.lookahead).unwrap_or(TimeDelta::MAX);
        let due_before = self.clock.now_utc().checked_add_signed(lookahead);
        let Some(due_before) = due_before else {
            warn!("lookahead overflows the calendar, nothing promoted");
            return Ok(0);
        };

        let promoted = self.store.promote_queued(due_before, self.batch_size).await?;
        if !promoted.is_empty() {
            debug!(batch_len = promoted.len(), "shipments moved to pending");
        }
        Ok(promoted.len())
    }
}

/// Requests couriers for pending shipments.
///
/// Shipments whose request failed are passed over for the rest of the
/// drain, so a run of failing rows never hides the healthy ones behind
/// them. The drain ends once no unseen pending row is left; the failed rows
/// become eligible again on the next tick.
pub struct DispatchWorker {
    store: Arc<dyn ShipmentStore>,
    courier: Arc<dyn ThirdPartyLogistics>,
    core: Arc<dyn CoreNotifier>,
    batch_size: usize,
    max_concurrent_calls: usize,
    failed_this_drain: Mutex<Vec<ShipmentId>>,
}

impl DispatchWorker {
    /// Creates the worker.
    pub fn new(
        store: Arc<dyn ShipmentStore>,
        courier: Arc<dyn ThirdPartyLogistics>,
        core: Arc<dyn CoreNotifier>,
        batch_size: usize,
        max_concurrent_calls: usize,
    ) -> Self {
        Self {
            store,
            courier,
            core,
            batch_size,
            max_concurrent_calls,
            failed_this_drain: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ShipmentDispatcher for DispatchWorker {
    async fn dispatch(&self, shipments: &[Shipment]) -> Vec<ShipmentId> {
        let results = fan_out(0..shipments.len(), self.max_concurrent_calls, |i| async move {
            let shipment = &shipments[i];
            let result = self.courier.request_courier(shipment).await;
            (shipment, result)
        })
        .await;

        results
            .into_iter()
            .filter_map(|(shipment, result)| match result {
                Ok(()) => Some(shipment.uid.clone()),
                Err(error) => {
                    warn!(
                        shipment_uid = %shipment.uid,
                        error = %error,
                        "courier request failed, shipment stays pending"
                    );
                    None
                },
            })
            .collect()
    }
}

#[async_trait]
impl DrainTask for DispatchWorker {
    fn name(&self) -> &'static str {
        "dispatch"
    }

    async fn run_cycle(&self) -> Result<usize> {
        let exclude = self.failed_this_drain.lock().await.clone();
        let outcome = self.store.dispatch_pending(self.batch_size, &exclude, self).await?;
        if outcome.claimed == 0 {
            let mut failed = self.failed_this_drain.lock().await;
            if !failed.is_empty() {
                debug!(failed = failed.len(), "drain finished, failed shipments retry next tick");
                failed.clear();
            }
            return Ok(0);
        }

        info!(
            batch_len = outcome.claimed,
            requested = outcome.requested.len(),
            failed = outcome.failed.len(),
            "dispatch batch committed"
        );
        self.failed_this_drain.lock().await.extend(outcome.failed.iter().cloned());

        let core = &self.core;
        fan_out(outcome.requested, self.max_concurrent_calls, |uid| async move {
            let uid = &uid;
            let notification = StatusNotification::new(uid.clone(), NotificationStatus::Requested);
            if let Err(error) = core.notify(&notification).await {
                warn!(shipment_uid = %uid, error = %error, "core notification dropped");
            }
        })
        .await;

        Ok(outcome.claimed)
    }
}
