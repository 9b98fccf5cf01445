//! Search workers of the courier simulator.
//!
//! ```text
//! requested ──searching──▶ searching ──finding──▶ found ──shipping──▶ shipped
//!     ▲                        │
//!     └──── not found ─────────┘
//! ```
//!
//! Each worker claims a batch and commits the transition first, then posts a
//! webhook per claimed row with bounded concurrency. A failed webhook is
//! logged and dropped; the row has already moved on.
//!
//! A miss re-arms the row on its own: it searches again one search delay
//! later whether or not delivery re-requests it, and keeps doing so past
//! delivery's cutoff hour. Only the outcome policy ends the cycle, and a
//! re-request from delivery just bumps `retries` until the fourth intake
//! forces `found`. The default [`crate::AlwaysFound`] policy never misses.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, warn};
use waybill_core::{
    ClaimOutcome, Clock, CourierStatus, NotificationStatus, ShipmentId, StatusNotification,
    Transition,
};
use waybill_engine::{fan_out, DrainTask, Result};

use crate::{
    notifier::DeliveryNotifier,
    policy::{OutcomePolicy, SearchOutcome},
    storage::CourierStore,
};

/// Settings shared by the three workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchSettings {
    /// Rows claimed per cycle.
    pub batch_size: usize,
    /// Delay between search steps.
    pub search_delay: Duration,
    /// Cap on concurrent webhooks per cycle.
    pub max_concurrent_calls: usize,
}

impl SearchSettings {
    fn delay(&self) -> TimeDelta {
        TimeDelta::from_std(self.search_delay).unwrap_or(TimeDelta::MAX)
    }

    fn after_delay(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.delay()).unwrap_or(now)
    }
}

/// Claim, store and notification handles shared by every worker.
#[derive(Clone)]
struct Pipeline {
    store: Arc<dyn CourierStore>,
    notifier: Arc<dyn DeliveryNotifier>,
    clock: Arc<dyn Clock>,
    settings: SearchSettings,
}

impl Pipeline {
    /// Posts one webhook per claimed row, mapping each transition to the
    /// status reported.
    async fn notify_claimed<F>(&self, worker: &'static str, outcome: &ClaimOutcome, status_of: F)
    where
        F: Fn(&Transition) -> NotificationStatus,
    {
        if outcome.is_empty() {
            return;
        }
        info!(worker, batch_len = outcome.len(), "courier batch committed");

        let notifier = &self.notifier;
        let notifications: Vec<StatusNotification> = outcome
            .claimed
            .iter()
            .map(|(uid, transition)| StatusNotification::new(uid.clone(), status_of(transition)))
            .collect();

        fan_out(notifications, self.settings.max_concurrent_calls, |notification| async move {
            let notification = &notification;
            if let Err(error) = notifier.notify(notification).await {
                warn!(
                    worker,
                    shipment_uid = %notification.shipment_uid,
                    status = %notification.status,
                    error = %error,
                    "delivery webhook dropped"
                );
            }
        })
        .await;
    }
}

/// Starts the search for requested rows that are due.
pub struct SearchingWorker {
    pipeline: Pipeline,
}

impl SearchingWorker {
    /// Creates the worker.
    pub fn new(
        store: Arc<dyn CourierStore>,
        notifier: Arc<dyn DeliveryNotifier>,
        clock: Arc<dyn Clock>,
        settings: SearchSettings,
    ) -> Self {
        Self { pipeline: Pipeline { store, notifier, clock, settings } }
    }
}

#[async_trait]
impl DrainTask for SearchingWorker {
    fn name(&self) -> &'static str {
        "searching"
    }

    async fn run_cycle(&self) -> Result<usize> {
        let p = &self.pipeline;
        let now = p.clock.now_utc();
        let to_searching = Transition::to(CourierStatus::Searching.as_str())
            .due_at(p.settings.after_delay(now));
        let assign = move |_: &ShipmentId| to_searching;

        let outcome =
            p.store.claim(CourierStatus::Requested, now, p.settings.batch_size, &assign).await?;
        p.notify_claimed(self.name(), &outcome, |_| NotificationStatus::Searching).await;

        Ok(outcome.len())
    }
}

/// Resolves searches that finish within the next search delay.
///
/// A found courier moves the row to `found`. A miss puts it back in
/// `requested` one search delay out so the search starts over, and reports
/// `not_found`.
pub struct FindingWorker {
    pipeline: Pipeline,
    policy: Arc<dyn OutcomePolicy>,
}

impl FindingWorker {
    /// Creates the worker.
    pub fn new(
        store: Arc<dyn CourierStore>,
        notifier: Arc<dyn DeliveryNotifier>,
        clock: Arc<dyn Clock>,
        policy: Arc<dyn OutcomePolicy>,
        settings: SearchSettings,
    ) -> Self {
        Self { pipeline: Pipeline { store, notifier, clock, settings }, policy }
    }
}

#[async_trait]
impl DrainTask for FindingWorker {
    fn name(&self) -> &'static str {
        "finding"
    }

    async fn run_cycle(&self) -> Result<usize> {
        let p = &self.pipeline;
        let now = p.clock.now_utc();
        let horizon = p.settings.after_delay(now);

        let found = Transition::to(CourierStatus::Found.as_str());
        let rearm = Transition::to(CourierStatus::Requested.as_str()).due_at(horizon);
        let policy = &self.policy;
        let assign = move |uid: &ShipmentId| match policy.resolve(uid) {
            SearchOutcome::Found => found,
            SearchOutcome::NotFound => rearm,
        };

        let outcome =
            p.store.claim(CourierStatus::Searching, horizon, p.settings.batch_size, &assign).await?;
        p.notify_claimed(self.name(), &outcome, |transition| {
            if *transition == found {
                NotificationStatus::Found
            } else {
                NotificationStatus::NotFound
            }
        })
        .await;

        Ok(outcome.len())
    }
}

/// Ships found rows that are due, stamping the ship time.
pub struct ShippingWorker {
    pipeline: Pipeline,
}

impl ShippingWorker {
    /// Creates the worker.
    pub fn new(
        store: Arc<dyn CourierStore>,
        notifier: Arc<dyn DeliveryNotifier>,
        clock: Arc<dyn Clock>,
        settings: SearchSettings,
    ) -> Self {
        Self { pipeline: Pipeline { store, notifier, clock, settings } }
    }
}

#[async_trait]
impl DrainTask for ShippingWorker {
    fn name(&self) -> &'static str {
        "shipping"
    }

    async fn run_cycle(&self) -> Result<usize> {
        let p = &self.pipeline;
        let now = p.clock.now_utc();
        let shipped = Transition::to(CourierStatus::Shipped.as_str()).due_at(now);
        let assign = move |_: &ShipmentId| shipped;

        let outcome = p.store.claim(CourierStatus::Found, now, p.settings.batch_size, &assign).await?;
        p.notify_claimed(self.name(), &outcome, |_| NotificationStatus::Shipped).await;

        Ok(outcome.len())
    }
}
