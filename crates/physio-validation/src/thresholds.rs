//! Clinical threshold catalogue and injury-risk weights.
//!
//! The catalogue is loaded once, validated, and frozen into a
//! [`ThresholdRegistry`] that the engine shares read-only. Patient level
//! scales thresholds at read time; the registry itself never changes.

use physio_core::{Error, PatientLevel, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Compensatory movement patterns the engine can detect
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    KneeValgus,
    KneeVarus,
    HeelLift,
    PosteriorPelvicTilt,
    InsufficientSquatDepth,
    ShoulderHiking,
    TrunkLean,
    ShoulderInternalRotation,
    IncompleteShoulderRange,
    ElbowDrift,
    ShoulderCompensation,
    WristDeviation,
}

impl ErrorType {
    pub const ALL: [ErrorType; 12] = [
        ErrorType::KneeValgus,
        ErrorType::KneeVarus,
        ErrorType::HeelLift,
        ErrorType::PosteriorPelvicTilt,
        ErrorType::InsufficientSquatDepth,
        ErrorType::ShoulderHiking,
        ErrorType::TrunkLean,
        ErrorType::ShoulderInternalRotation,
        ErrorType::IncompleteShoulderRange,
        ErrorType::ElbowDrift,
        ErrorType::ShoulderCompensation,
        ErrorType::WristDeviation,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            ErrorType::KneeValgus => "knee_valgus",
            ErrorType::KneeVarus => "knee_varus",
            ErrorType::HeelLift => "heel_lift",
            ErrorType::PosteriorPelvicTilt => "posterior_pelvic_tilt",
            ErrorType::InsufficientSquatDepth => "insufficient_squat_depth",
            ErrorType::ShoulderHiking => "shoulder_hiking",
            ErrorType::TrunkLean => "trunk_lean",
            ErrorType::ShoulderInternalRotation => "shoulder_internal_rotation",
            ErrorType::IncompleteShoulderRange => "incomplete_shoulder_range",
            ErrorType::ElbowDrift => "elbow_drift",
            ErrorType::ShoulderCompensation => "shoulder_compensation",
            ErrorType::WristDeviation => "wrist_deviation",
        }
    }

    /// Evaluated over a whole pose sequence rather than frame by frame
    pub fn is_sequence_level(&self) -> bool {
        matches!(self, ErrorType::InsufficientSquatDepth)
    }

    /// The measure is a placeholder proxy that has not been clinically validated
    pub fn is_provisional(&self) -> bool {
        matches!(self, ErrorType::ShoulderInternalRotation)
    }

    pub fn unit(&self) -> MeasurementUnit {
        match self {
            ErrorType::KneeValgus
            | ErrorType::KneeVarus
            | ErrorType::HeelLift
            | ErrorType::ShoulderHiking
            | ErrorType::ElbowDrift => MeasurementUnit::Percent,
            ErrorType::PosteriorPelvicTilt
            | ErrorType::InsufficientSquatDepth
            | ErrorType::TrunkLean
            | ErrorType::ShoulderInternalRotation
            | ErrorType::IncompleteShoulderRange
            | ErrorType::ShoulderCompensation
            | ErrorType::WristDeviation => MeasurementUnit::Degrees,
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementUnit {
    /// Percent of a per-frame anatomical reference span
    Percent,
    Degrees,
}

impl MeasurementUnit {
    pub fn symbol(&self) -> &'static str {
        match self {
            MeasurementUnit::Percent => "%",
            MeasurementUnit::Degrees => "°",
        }
    }
}

/// Threshold and persistence scaling for one patient level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelScaling {
    pub threshold: f64,
    pub persistence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelMultipliers {
    pub beginner: LevelScaling,
    pub intermediate: LevelScaling,
    pub advanced: LevelScaling,
}

impl LevelMultipliers {
    /// Beginners get looser thresholds and longer persistence windows,
    /// advanced patients tighter ones.
    pub fn standard() -> Self {
        Self {
            beginner: LevelScaling {
                threshold: 1.2,
                persistence: 1.5,
            },
            intermediate: LevelScaling {
                threshold: 1.0,
                persistence: 1.0,
            },
            advanced: LevelScaling {
                threshold: 0.85,
                persistence: 0.8,
            },
        }
    }

    pub fn for_level(&self, level: PatientLevel) -> LevelScaling {
        match level {
            PatientLevel::Beginner => self.beginner,
            PatientLevel::Intermediate => self.intermediate,
            PatientLevel::Advanced => self.advanced,
        }
    }
}

/// Clinical threshold for one error type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Deviation at which a warning starts
    pub threshold: f64,
    /// Deviation at or above which the error is critical
    pub critical: Option<f64>,
    /// How long the condition must hold before it is confirmed
    pub persistence_ms: u64,
    pub multipliers: LevelMultipliers,
    pub description: String,
    /// Literature or protocol the value comes from
    pub source: String,
}

impl ThresholdConfig {
    pub fn adjusted_threshold(&self, level: PatientLevel) -> f64 {
        adjusted_threshold(self.threshold, self.multipliers.for_level(level))
    }

    pub fn adjusted_critical(&self, level: PatientLevel) -> Option<f64> {
        self.critical
            .map(|c| adjusted_threshold(c, self.multipliers.for_level(level)))
    }

    pub fn adjusted_persistence_ms(&self, level: PatientLevel) -> u64 {
        adjusted_persistence(self.persistence_ms, self.multipliers.for_level(level))
    }

    fn validate(&self, error_type: ErrorType) -> Result<()> {
        let malformed = |reason: String| Error::MalformedThreshold {
            error_type: error_type.key().to_string(),
            reason,
        };

        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(malformed(format!(
                "threshold must be positive, got {}",
                self.threshold
            )));
        }
        if let Some(critical) = self.critical {
            if !critical.is_finite() || critical < self.threshold {
                return Err(malformed(format!(
                    "critical {} must be >= threshold {}",
                    critical, self.threshold
                )));
            }
        }
        for level in PatientLevel::ALL {
            let scaling = self.multipliers.for_level(level);
            if !(scaling.threshold.is_finite() && scaling.threshold > 0.0)
                || !(scaling.persistence.is_finite() && scaling.persistence >= 0.0)
            {
                return Err(malformed(format!("invalid multipliers for {:?}", level)));
            }
        }
        Ok(())
    }
}

/// Scale a base threshold by a patient level's multiplier
pub fn adjusted_threshold(base: f64, scaling: LevelScaling) -> f64 {
    base * scaling.threshold
}

/// Scale a base persistence window by a patient level's multiplier
pub fn adjusted_persistence(base_ms: u64, scaling: LevelScaling) -> u64 {
    (base_ms as f64 * scaling.persistence).round() as u64
}

/// Maximum number of errors surfaced at once, per patient level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayLimits {
    pub beginner: usize,
    pub intermediate: usize,
    pub advanced: usize,
}

impl DisplayLimits {
    pub fn for_level(&self, level: PatientLevel) -> usize {
        match level {
            PatientLevel::Beginner => self.beginner,
            PatientLevel::Intermediate => self.intermediate,
            PatientLevel::Advanced => self.advanced,
        }
    }
}

impl Default for DisplayLimits {
    fn default() -> Self {
        Self {
            beginner: 2,
            intermediate: 3,
            advanced: 5,
        }
    }
}

/// Versioned, serializable threshold catalogue as shipped to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCatalogue {
    pub version: String,
    pub thresholds: BTreeMap<ErrorType, ThresholdConfig>,
    pub risk_weights: BTreeMap<ErrorType, u32>,
    #[serde(default)]
    pub display_limits: DisplayLimits,
}

impl ThresholdCatalogue {
    /// Parse a catalogue. Malformed JSON or unknown error-type keys are
    /// reported as an invalid configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::ConfigInvalid(format!("threshold catalogue: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Built-in clinical catalogue
    pub fn clinical_defaults() -> Self {
        // (type, threshold, critical, persistence ms, risk weight, description, source)
        let table: [(ErrorType, f64, f64, u64, u32, &str, &str); 12] = [
            (
                ErrorType::KneeValgus,
                8.0,
                10.0,
                300,
                100,
                "Knee collapses medially relative to the ankle (% of stance width)",
                "Frontal-plane projection angle screening",
            ),
            (
                ErrorType::KneeVarus,
                8.0,
                12.0,
                400,
                70,
                "Knee drifts laterally relative to the ankle (% of stance width)",
                "Frontal-plane projection angle screening",
            ),
            (
                ErrorType::HeelLift,
                5.0,
                10.0,
                300,
                60,
                "Heel rises off the floor (% of shank length)",
                "Ankle dorsiflexion screening",
            ),
            (
                ErrorType::PosteriorPelvicTilt,
                10.0,
                20.0,
                500,
                80,
                "Pelvis tucks under at depth (degrees of hip closure)",
                "Lumbopelvic control assessment",
            ),
            (
                ErrorType::InsufficientSquatDepth,
                10.0,
                25.0,
                0,
                30,
                "Minimum knee angle shallower than the reference (degrees)",
                "Squat depth protocol",
            ),
            (
                ErrorType::ShoulderHiking,
                5.0,
                10.0,
                400,
                50,
                "Shoulder elevates toward the ear (% of shoulder width)",
                "Scapular dyskinesis observation",
            ),
            (
                ErrorType::TrunkLean,
                10.0,
                20.0,
                500,
                75,
                "Trunk inclines away from vertical (degrees)",
                "Trunk compensation assessment",
            ),
            (
                ErrorType::ShoulderInternalRotation,
                15.0,
                30.0,
                500,
                65,
                "Forearm drops during external rotation (degrees, provisional proxy)",
                "Unvalidated height-ratio proxy",
            ),
            (
                ErrorType::IncompleteShoulderRange,
                15.0,
                30.0,
                600,
                20,
                "Arm elevation short of the reference (degrees)",
                "AAOS shoulder range of motion",
            ),
            (
                ErrorType::ElbowDrift,
                10.0,
                20.0,
                400,
                40,
                "Elbow leaves the side of the body (% of upper arm length)",
                "Isolation exercise form guidance",
            ),
            (
                ErrorType::ShoulderCompensation,
                15.0,
                30.0,
                400,
                45,
                "Shoulder flexes to assist an elbow exercise (degrees)",
                "Isolation exercise form guidance",
            ),
            (
                ErrorType::WristDeviation,
                15.0,
                25.0,
                400,
                35,
                "Forearm deviates outward from the reference line (degrees)",
                "Isolation exercise form guidance",
            ),
        ];

        let mut thresholds = BTreeMap::new();
        let mut risk_weights = BTreeMap::new();
        for (error_type, threshold, critical, persistence_ms, risk, description, source) in table {
            thresholds.insert(
                error_type,
                ThresholdConfig {
                    threshold,
                    critical: Some(critical),
                    persistence_ms,
                    multipliers: LevelMultipliers::standard(),
                    description: description.to_string(),
                    source: source.to_string(),
                },
            );
            risk_weights.insert(error_type, risk);
        }

        Self {
            version: "2024.1".to_string(),
            thresholds,
            risk_weights,
            display_limits: DisplayLimits::default(),
        }
    }
}

/// Validated, immutable lookup of thresholds and injury-risk weights
#[derive(Debug, Clone)]
pub struct ThresholdRegistry {
    catalogue: ThresholdCatalogue,
    risk_order: Vec<ErrorType>,
}

impl ThresholdRegistry {
    /// Validate a catalogue. Every known error type must have a well-formed
    /// threshold and a risk weight; an incomplete catalogue is rejected.
    pub fn from_catalogue(catalogue: ThresholdCatalogue) -> Result<Self> {
        if catalogue.version.trim().is_empty() {
            return Err(Error::ConfigInvalid(
                "threshold catalogue has no version".to_string(),
            ));
        }
        for error_type in ErrorType::ALL {
            let config = catalogue.thresholds.get(&error_type).ok_or_else(|| {
                Error::MissingThreshold {
                    error_type: error_type.key().to_string(),
                }
            })?;
            config.validate(error_type)?;
            if !catalogue.risk_weights.contains_key(&error_type) {
                return Err(Error::MissingRiskWeight {
                    error_type: error_type.key().to_string(),
                });
            }
        }
        for level in PatientLevel::ALL {
            if catalogue.display_limits.for_level(level) == 0 {
                return Err(Error::ConfigInvalid(format!(
                    "display limit for {:?} must be at least 1",
                    level
                )));
            }
        }

        let mut risk_order: Vec<ErrorType> = ErrorType::ALL.to_vec();
        risk_order.sort_by(|a, b| {
            let wa = catalogue.risk_weights.get(a).copied().unwrap_or(0);
            let wb = catalogue.risk_weights.get(b).copied().unwrap_or(0);
            wb.cmp(&wa).then(a.cmp(b))
        });

        Ok(Self {
            catalogue,
            risk_order,
        })
    }

    pub fn clinical() -> Result<Self> {
        Self::from_catalogue(ThresholdCatalogue::clinical_defaults())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_catalogue(ThresholdCatalogue::from_json(json)?)
    }

    pub fn version(&self) -> &str {
        &self.catalogue.version
    }

    /// Threshold for an error type, or `None` if the type is not catalogued
    pub fn get(&self, error_type: ErrorType) -> Option<&ThresholdConfig> {
        self.catalogue.thresholds.get(&error_type)
    }

    pub fn require(&self, error_type: ErrorType) -> Result<&ThresholdConfig> {
        self.get(error_type).ok_or_else(|| Error::MissingThreshold {
            error_type: error_type.key().to_string(),
        })
    }

    pub fn risk_weight(&self, error_type: ErrorType) -> Option<u32> {
        self.catalogue.risk_weights.get(&error_type).copied()
    }

    /// All known error types, highest injury risk first
    pub fn injury_risk_order(&self) -> &[ErrorType] {
        &self.risk_order
    }

    pub fn max_errors_shown(&self, level: PatientLevel) -> usize {
        self.catalogue.display_limits.for_level(level)
    }

    pub fn catalogue(&self) -> &ThresholdCatalogue {
        &self.catalogue
    }
}
