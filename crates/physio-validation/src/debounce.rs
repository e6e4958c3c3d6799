//! Persistence debouncing of detector observations.
//!
//! An observation is only confirmed once the same (error type, side) has been
//! observed on every evaluation for at least the patient-adjusted persistence
//! window. One evaluation without it resets the key completely.

use physio_core::{PatientLevel, Side, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::detectors::ErrorObservation;
use crate::thresholds::{ErrorType, ThresholdRegistry};

/// An observation that persisted long enough to be shown to the patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedError {
    pub observation: ErrorObservation,
    /// Injury-risk weight from the registry at confirmation time
    pub risk_weight: u32,
    /// First evaluation of the current uninterrupted run
    pub first_detected: Timestamp,
    pub confirmed_at: Timestamp,
    /// True only on the evaluation where the error became confirmed
    pub newly_confirmed: bool,
}

pub type DebounceKey = (ErrorType, Side);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DebounceState {
    Pending { since: Timestamp },
    Confirmed { since: Timestamp, confirmed_at: Timestamp },
}

#[derive(Debug, Clone, Default)]
pub struct PersistenceDebouncer {
    states: HashMap<DebounceKey, DebounceState>,
}

impl PersistenceDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one evaluation's observations and return every error that is
    /// currently confirmed.
    ///
    /// Observations whose type is missing from the registry are dropped.
    pub fn update(
        &mut self,
        observations: &[ErrorObservation],
        now: Timestamp,
        registry: &ThresholdRegistry,
        level: PatientLevel,
    ) -> Vec<ConfirmedError> {
        // Strongest observation per key for this evaluation, in input order
        let mut current: Vec<(DebounceKey, &ErrorObservation)> = Vec::new();
        for obs in observations {
            let key = (obs.error_type, obs.side);
            match current.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) if obs.value > entry.1.value => entry.1 = obs,
                Some(_) => {}
                None => current.push((key, obs)),
            }
        }

        self.states.retain(|key, _| current.iter().any(|(k, _)| k == key));

        let mut confirmed = Vec::new();
        for (key, obs) in current {
            let (Some(config), Some(risk_weight)) =
                (registry.get(key.0), registry.risk_weight(key.0))
            else {
                tracing::warn!("Dropping observation for uncatalogued error type {}", key.0);
                self.states.remove(&key);
                continue;
            };
            let persistence_ms = i64::try_from(config.adjusted_persistence_ms(level))
                .unwrap_or(i64::MAX / 1_000_000);
            let persistence_ns = persistence_ms * 1_000_000;

            let state = *self
                .states
                .entry(key)
                .or_insert(DebounceState::Pending { since: now });

            let (since, confirmed_at, newly_confirmed) = match state {
                DebounceState::Confirmed { since, confirmed_at } => (since, confirmed_at, false),
                DebounceState::Pending { since } => {
                    if now.as_nanos() - since.as_nanos() < persistence_ns {
                        continue;
                    }
                    self.states.insert(
                        key,
                        DebounceState::Confirmed {
                            since,
                            confirmed_at: now,
                        },
                    );
                    tracing::debug!(
                        "Confirmed {} ({}) after {}ms",
                        key.0,
                        key.1.as_str(),
                        now.millis_since(since)
                    );
                    (since, now, true)
                }
            };

            confirmed.push(ConfirmedError {
                observation: obs.clone(),
                risk_weight,
                first_detected: since,
                confirmed_at,
                newly_confirmed,
            });
        }
        confirmed
    }

    pub fn is_confirmed(&self, key: DebounceKey) -> bool {
        matches!(self.states.get(&key), Some(DebounceState::Confirmed { .. }))
    }

    pub fn tracked_keys(&self) -> usize {
        self.states.len()
    }

    pub fn reset(&mut self) {
        self.states.clear();
    }
}
