//! Severity and injury-risk prioritisation of confirmed errors.

use physio_core::{PatientLevel, Side};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::debounce::ConfirmedError;
use crate::detectors::Severity;
use crate::thresholds::{ErrorType, MeasurementUnit, ThresholdRegistry};

/// A confirmed error ready for presentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedError {
    pub rank: usize,
    pub error_type: ErrorType,
    pub severity: Severity,
    pub side: Side,
    pub value: f64,
    pub unit: MeasurementUnit,
    pub risk_weight: u32,
    pub newly_confirmed: bool,
    pub provisional: bool,
    pub feedback: String,
    pub error: ConfirmedError,
}

/// Ordering used for display: injury risk first, then severity, then the
/// earliest detection, then type and side so the order is total.
pub fn priority_order(a: &ConfirmedError, b: &ConfirmedError) -> Ordering {
    b.risk_weight
        .cmp(&a.risk_weight)
        .then(b.observation.severity.cmp(&a.observation.severity))
        .then(a.first_detected.cmp(&b.first_detected))
        .then(a.observation.error_type.cmp(&b.observation.error_type))
        .then(a.observation.side.cmp(&b.observation.side))
}

/// Sort confirmed errors by priority and keep at most `max_shown`
pub fn rank(mut errors: Vec<ConfirmedError>, max_shown: usize) -> Vec<ConfirmedError> {
    errors.sort_by(priority_order);
    errors.truncate(max_shown);
    errors
}

/// Rank confirmed errors for a patient level and attach feedback text
pub fn rank_for_level(
    errors: Vec<ConfirmedError>,
    registry: &ThresholdRegistry,
    level: PatientLevel,
) -> Vec<RankedError> {
    rank(errors, registry.max_errors_shown(level))
        .into_iter()
        .enumerate()
        .map(|(i, error)| {
            let obs = &error.observation;
            RankedError {
                rank: i + 1,
                error_type: obs.error_type,
                severity: obs.severity,
                side: obs.side,
                value: obs.value,
                unit: obs.unit,
                risk_weight: error.risk_weight,
                newly_confirmed: error.newly_confirmed,
                provisional: obs.error_type.is_provisional(),
                feedback: feedback_text(obs.error_type, obs.severity, obs.side),
                error,
            }
        })
        .collect()
}

/// English cue for an error. Localization happens outside the engine and can
/// key on the error type instead.
pub fn feedback_text(error_type: ErrorType, severity: Severity, side: Side) -> String {
    let cue = match error_type {
        ErrorType::KneeValgus => "push your knee out over your toes",
        ErrorType::KneeVarus => "keep your knee in line with your foot",
        ErrorType::HeelLift => "keep your heel down on the floor",
        ErrorType::PosteriorPelvicTilt => "keep your lower back neutral at the bottom",
        ErrorType::InsufficientSquatDepth => "try to sit a little deeper",
        ErrorType::ShoulderHiking => "relax your shoulder down away from your ear",
        ErrorType::TrunkLean => "keep your trunk upright",
        ErrorType::ShoulderInternalRotation => "keep your forearm rotating outward",
        ErrorType::IncompleteShoulderRange => "lift your arm a little higher",
        ErrorType::ElbowDrift => "keep your elbow tucked at your side",
        ErrorType::ShoulderCompensation => "keep your upper arm still",
        ErrorType::WristDeviation => "keep your wrist in line with your forearm",
    };
    let prefix = match severity {
        Severity::Critical => "Stop and reset: ",
        Severity::Warning | Severity::Good => "",
    };
    let mut text = format!("{}{}", prefix, cue);
    if side != Side::Bilateral && !matches!(error_type, ErrorType::TrunkLean) {
        text.push_str(&format!(" ({} side)", side.as_str()));
    }
    capitalize(&text)
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
