//! Outcome of a courier search round.
//!
//! The finding worker asks an [`OutcomePolicy`] whether a courier turned up
//! for each claimed row. Production runs with [`AlwaysFound`] unless a found
//! probability below one is configured; tests script the outcome per
//! shipment so the `not_found` path can be driven deliberately.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::Mutex,
};

use rand::Rng;
use waybill_core::ShipmentId;

/// Result of one search round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// A courier was assigned.
    Found,
    /// No courier this round; the search re-arms.
    NotFound,
}

/// Decides the outcome of a search round.
pub trait OutcomePolicy: Send + Sync + fmt::Debug {
    /// Resolves the round for `uid`.
    fn resolve(&self, uid: &ShipmentId) -> SearchOutcome;
}

/// Every search finds a courier.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysFound;

impl OutcomePolicy for AlwaysFound {
    fn resolve(&self, _uid: &ShipmentId) -> SearchOutcome {
        SearchOutcome::Found
    }
}

/// No search finds a courier.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysNotFound;

impl OutcomePolicy for AlwaysNotFound {
    fn resolve(&self, _uid: &ShipmentId) -> SearchOutcome {
        SearchOutcome::NotFound
    }
}

/// Finds a courier with a fixed probability.
#[derive(Debug, Clone, Copy)]
pub struct Probabilistic {
    found_probability: f64,
}

impl Probabilistic {
    /// Creates a policy finding a courier with `found_probability`, clamped
    /// to `[0, 1]`.
    pub fn new(found_probability: f64) -> Self {
        let found_probability =
            if found_probability.is_nan() { 1.0 } else { found_probability.clamp(0.0, 1.0) };
        Self { found_probability }
    }

    /// Probability of a found outcome.
    pub fn found_probability(&self) -> f64 {
        self.found_probability
    }
}

impl OutcomePolicy for Probabilistic {
    fn resolve(&self, _uid: &ShipmentId) -> SearchOutcome {
        if rand::rng().random_bool(self.found_probability) {
            SearchOutcome::Found
        } else {
            SearchOutcome::NotFound
        }
    }
}

/// Replays queued outcomes per shipment, falling back to a default.
#[derive(Debug)]
pub struct Scripted {
    script: Mutex<HashMap<ShipmentId, VecDeque<SearchOutcome>>>,
    fallback: SearchOutcome,
}

impl Scripted {
    /// Creates a script that answers `fallback` once a shipment's queue runs
    /// dry.
    pub fn new(fallback: SearchOutcome) -> Self {
        Self { script: Mutex::new(HashMap::new()), fallback }
    }

    /// Queues `outcomes` for `uid`, in order.
    #[must_use]
    pub fn then(self, uid: impl Into<ShipmentId>, outcomes: &[SearchOutcome]) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(uid.into())
            .or_default()
            .extend(outcomes.iter().copied());
        self
    }
}

impl OutcomePolicy for Scripted {
    fn resolve(&self, uid: &ShipmentId) -> SearchOutcome {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get_mut(uid)
            .and_then(VecDeque::pop_front)
            .unwrap_or(self.fallback)
    }
}
