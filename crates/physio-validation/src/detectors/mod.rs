//! Compensatory movement detectors.
//!
//! Every detector is a pure function of the current frame, a synchronized
//! reference frame and the body side, returning at most one
//! [`ErrorObservation`]. They share the same contract:
//!
//! - **Confidence gate**: any required keypoint below the minimum visibility
//!   in either frame means no observation.
//! - **Directionality**: only deviations in the clinically adverse direction
//!   relative to the reference count.
//! - **Magnitude**: below the (patient-level adjusted) threshold nothing is
//!   emitted; between threshold and critical ceiling is a warning; at or
//!   above the ceiling is critical.
//! - **Normalization**: distance measures are expressed as a percentage of an
//!   anatomical span measured in the same frame.
//!
//! Dispatch is a closed `match` over [`ErrorType`], so adding an error type
//! forces a detector to be added alongside it.

mod lower_body;
mod sequence;
mod upper_body;

pub use lower_body::*;
pub use sequence::*;
pub use upper_body::*;

use physio_core::{PatientLevel, PoseFrame, Side, Timestamp};
use serde::{Deserialize, Serialize};

use crate::thresholds::{ErrorType, MeasurementUnit, ThresholdRegistry};

/// Severity classification of a deviation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Good,
    Warning,
    Critical,
}

/// A single detector's finding for one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObservation {
    pub error_type: ErrorType,
    pub severity: Severity,
    pub side: Side,
    /// Magnitude of the deviation from the reference
    pub value: f64,
    pub unit: MeasurementUnit,
    pub timestamp: Timestamp,
}

/// Shared read-only inputs for a detector run
#[derive(Debug, Clone, Copy)]
pub struct DetectionContext<'a> {
    pub registry: &'a ThresholdRegistry,
    pub level: PatientLevel,
    /// Minimum keypoint confidence for a keypoint to be used at all
    pub min_visibility: f32,
}

impl<'a> DetectionContext<'a> {
    pub fn new(registry: &'a ThresholdRegistry, level: PatientLevel, min_visibility: f32) -> Self {
        Self {
            registry,
            level,
            min_visibility,
        }
    }

    /// Classify a deviation against the adjusted threshold and ceiling.
    /// Returns `None` below threshold or for an uncatalogued type.
    pub fn classify(&self, error_type: ErrorType, deviation: f64) -> Option<Severity> {
        let config = self.registry.get(error_type)?;
        if !deviation.is_finite() || deviation < config.adjusted_threshold(self.level) {
            return None;
        }
        match config.adjusted_critical(self.level) {
            Some(critical) if deviation >= critical => Some(Severity::Critical),
            _ => Some(Severity::Warning),
        }
    }

    /// Build an observation if `deviation` crosses the threshold
    pub fn observe(
        &self,
        error_type: ErrorType,
        deviation: f64,
        side: Side,
        timestamp: Timestamp,
    ) -> Option<ErrorObservation> {
        let severity = self.classify(error_type, deviation)?;
        Some(ErrorObservation {
            error_type,
            severity,
            side,
            value: deviation,
            unit: error_type.unit(),
            timestamp,
        })
    }
}

/// Exercises with a known set of applicable detectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseKind {
    Squat,
    ShoulderFlexion,
    ShoulderAbduction,
    ShoulderExternalRotation,
    BicepCurl,
}

impl ExerciseKind {
    /// Error types checked frame by frame
    pub fn frame_errors(&self) -> &'static [ErrorType] {
        match self {
            ExerciseKind::Squat => &[
                ErrorType::KneeValgus,
                ErrorType::KneeVarus,
                ErrorType::HeelLift,
                ErrorType::PosteriorPelvicTilt,
                ErrorType::TrunkLean,
            ],
            ExerciseKind::ShoulderFlexion | ExerciseKind::ShoulderAbduction => &[
                ErrorType::ShoulderHiking,
                ErrorType::TrunkLean,
                ErrorType::IncompleteShoulderRange,
            ],
            ExerciseKind::ShoulderExternalRotation => &[
                ErrorType::ShoulderInternalRotation,
                ErrorType::ShoulderHiking,
                ErrorType::TrunkLean,
            ],
            ExerciseKind::BicepCurl => &[
                ErrorType::ElbowDrift,
                ErrorType::ShoulderCompensation,
                ErrorType::WristDeviation,
                ErrorType::ShoulderHiking,
            ],
        }
    }

    /// Error types checked over a whole repetition or clip
    pub fn sequence_errors(&self) -> &'static [ErrorType] {
        match self {
            ExerciseKind::Squat => &[ErrorType::InsufficientSquatDepth],
            _ => &[],
        }
    }
}

/// Sides a detector is evaluated for
pub fn sides_for(error_type: ErrorType) -> &'static [Side] {
    match error_type {
        ErrorType::TrunkLean => &[Side::Bilateral],
        _ => &[Side::Left, Side::Right],
    }
}

/// Run the frame-level detector for `error_type`.
///
/// Sequence-level types never produce an observation here.
pub fn detect_frame(
    error_type: ErrorType,
    current: &PoseFrame,
    reference: &PoseFrame,
    side: Side,
    ctx: &DetectionContext<'_>,
) -> Option<ErrorObservation> {
    match error_type {
        ErrorType::KneeValgus => detect_knee_valgus(current, reference, side, ctx),
        ErrorType::KneeVarus => detect_knee_varus(current, reference, side, ctx),
        ErrorType::HeelLift => detect_heel_lift(current, reference, side, ctx),
        ErrorType::PosteriorPelvicTilt => {
            detect_posterior_pelvic_tilt(current, reference, side, ctx)
        }
        ErrorType::TrunkLean => detect_trunk_lean(current, reference, ctx),
        ErrorType::ShoulderHiking => detect_shoulder_hiking(current, reference, side, ctx),
        ErrorType::ShoulderInternalRotation => {
            detect_shoulder_internal_rotation(current, reference, side, ctx)
        }
        ErrorType::IncompleteShoulderRange => {
            detect_incomplete_shoulder_range(current, reference, side, ctx)
        }
        ErrorType::ElbowDrift => detect_elbow_drift(current, reference, side, ctx),
        ErrorType::ShoulderCompensation => {
            detect_shoulder_compensation(current, reference, side, ctx)
        }
        ErrorType::WristDeviation => detect_wrist_deviation(current, reference, side, ctx),
        ErrorType::InsufficientSquatDepth => None,
    }
}

/// Run the sequence-level detector for `error_type`.
///
/// Frame-level types never produce an observation here.
pub fn detect_sequence(
    error_type: ErrorType,
    user: &[PoseFrame],
    reference: &[PoseFrame],
    side: Side,
    ctx: &DetectionContext<'_>,
) -> Option<ErrorObservation> {
    match error_type {
        ErrorType::InsufficientSquatDepth => {
            detect_insufficient_squat_depth(user, reference, side, ctx)
        }
        _ => None,
    }
}

/// Run every frame-level detector applicable to `exercise` and concatenate
/// the results.
pub fn run_frame_detectors(
    exercise: ExerciseKind,
    current: &PoseFrame,
    reference: &PoseFrame,
    ctx: &DetectionContext<'_>,
) -> Vec<ErrorObservation> {
    exercise
        .frame_errors()
        .iter()
        .flat_map(|&error_type| {
            sides_for(error_type)
                .iter()
                .filter_map(move |&side| detect_frame(error_type, current, reference, side, ctx))
        })
        .collect()
}

/// Run every sequence-level detector applicable to `exercise`
pub fn run_sequence_detectors(
    exercise: ExerciseKind,
    user: &[PoseFrame],
    reference: &[PoseFrame],
    ctx: &DetectionContext<'_>,
) -> Vec<ErrorObservation> {
    exercise
        .sequence_errors()
        .iter()
        .flat_map(|&error_type| {
            sides_for(error_type)
                .iter()
                .filter_map(move |&side| detect_sequence(error_type, user, reference, side, ctx))
        })
        .collect()
}
