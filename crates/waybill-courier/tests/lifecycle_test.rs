//! Full search lifecycle driven through drain loops on a virtual clock.

#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use waybill_core::{CourierStatus, NotificationStatus, ShipmentId, TestClock};
use waybill_courier::{
    notifier::mock::RecordingDeliveryNotifier, storage::mock::MockCourierStore, Config,
    CourierApp, Dependencies, IntakeInput, OutcomePolicy, Scripted, SearchOutcome,
};
use waybill_engine::{DrainConfig, DrainLoop};

struct Simulator {
    app: CourierApp,
    store: MockCourierStore,
    notifier: RecordingDeliveryNotifier,
    clock: TestClock,
}

impl Simulator {
    fn new(policy: Arc<dyn OutcomePolicy>) -> Self {
        let store = MockCourierStore::new();
        let notifier = RecordingDeliveryNotifier::new();
        let clock = TestClock::at(Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap());
        let config = Config { batch_size: 10, ..Config::default() };
        let app = CourierApp::new(
            config,
            Dependencies {
                store: Arc::new(store.clone()),
                notifier: Arc::new(notifier.clone()),
                policy,
                clock: Arc::new(clock.clone()),
            },
        );
        Self { app, store, notifier, clock }
    }

    async fn intake(&self, uid: &str) {
        let input = IntakeInput { shipment_uid: uid.into(), ..IntakeInput::default() };
        self.app.intake().intake(input).await.unwrap();
    }

    /// One tick: every worker drains in pipeline order.
    async fn tick(&self) {
        let config = DrainConfig {
            tick_interval: Duration::from_secs(10),
            error_backoff: Duration::from_secs(1),
        };
        for worker in self.app.workers() {
            let drain = DrainLoop::new(
                worker,
                config.clone(),
                Arc::new(self.clock.clone()),
                CancellationToken::new(),
            );
            drain.drain_once().await.unwrap();
        }
    }

    fn wait(&self, minutes: u64) {
        self.clock.advance(Duration::from_secs(minutes * 60));
    }

    async fn status(&self, uid: &str) -> CourierStatus {
        self.store.get(&ShipmentId::from(uid)).await.unwrap().status
    }
}

#[tokio::test]
async fn request_is_searched_found_and_shipped() {
    let sim = Simulator::new(Arc::new(waybill_courier::AlwaysFound));
    sim.intake("s-1").await;

    sim.tick().await;
    assert_eq!(sim.status("s-1").await, CourierStatus::Requested);

    sim.wait(5);
    sim.tick().await;
    assert_eq!(sim.status("s-1").await, CourierStatus::Found);

    sim.wait(5);
    sim.tick().await;
    assert_eq!(sim.status("s-1").await, CourierStatus::Shipped);

    assert_eq!(
        sim.notifier.statuses_for("s-1").await,
        vec![NotificationStatus::Searching, NotificationStatus::Found, NotificationStatus::Shipped]
    );
}

#[tokio::test]
async fn not_found_round_searches_again() {
    let policy = Scripted::new(SearchOutcome::Found).then("s-1", &[SearchOutcome::NotFound]);
    let sim = Simulator::new(Arc::new(policy));
    sim.intake("s-1").await;

    sim.wait(5);
    sim.tick().await;
    assert_eq!(sim.status("s-1").await, CourierStatus::Requested);

    sim.wait(5);
    sim.tick().await;
    assert_eq!(sim.status("s-1").await, CourierStatus::Found);

    assert_eq!(
        sim.notifier.statuses_for("s-1").await,
        vec![
            NotificationStatus::Searching,
            NotificationStatus::NotFound,
            NotificationStatus::Searching,
            NotificationStatus::Found,
        ]
    );
}

#[tokio::test]
async fn saturated_intake_skips_the_search() {
    let sim = Simulator::new(Arc::new(waybill_courier::AlwaysNotFound));
    for _ in 0..4 {
        sim.intake("s-1").await;
    }
    assert_eq!(sim.status("s-1").await, CourierStatus::Found);

    sim.wait(5);
    sim.tick().await;

    assert_eq!(sim.status("s-1").await, CourierStatus::Shipped);
    assert_eq!(sim.notifier.statuses_for("s-1").await, vec![NotificationStatus::Shipped]);
}

#[tokio::test]
async fn backlog_larger_than_a_batch_drains_in_one_tick() {
    let sim = Simulator::new(Arc::new(waybill_courier::AlwaysFound));
    for i in 0..25 {
        sim.intake(&format!("s-{i:02}")).await;
    }

    sim.wait(5);
    let searching = DrainLoop::new(
        sim.app.workers()[0].clone(),
        DrainConfig { tick_interval: Duration::from_secs(10), error_backoff: Duration::from_secs(1) },
        Arc::new(sim.clock.clone()),
        CancellationToken::new(),
    );

    assert_eq!(searching.drain_once().await.unwrap(), 25);
    assert_eq!(searching.stats().read().await.cycles, 4);
    assert_eq!(sim.store.count(CourierStatus::Searching).await, 25);
}
