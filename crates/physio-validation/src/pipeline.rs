//! Validation pipeline orchestrating filtering, detection, debouncing,
//! ranking and ROM tracking for one subject.

use std::collections::BTreeMap;
use std::sync::Arc;

use physio_core::{Error, PatientLevel, PoseFrame, Result, SessionId, Side, Timestamp};
use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, ScoringConfig};
use crate::debounce::{ConfirmedError, PersistenceDebouncer};
use crate::detectors::{
    run_frame_detectors, run_sequence_detectors, DetectionContext, ErrorObservation,
    ExerciseKind, Severity,
};
use crate::filtering::PoseFilter;
use crate::ranking::{rank_for_level, RankedError};
use crate::rom::{CameraAngle, RomMovement, RomResult, RomSession, RomTracker};
use crate::thresholds::{ErrorType, ThresholdRegistry};

/// Outcome of evaluating one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub timestamp: Timestamp,
    pub exercise: Option<ExerciseKind>,
    /// Confirmed errors in display order, limited per patient level
    pub errors: Vec<RankedError>,
    /// Number of confirmed errors before the display limit
    pub confirmed_count: usize,
    pub rom: Option<RomResult>,
    /// ROM session closed by its inactivity timeout on this frame
    pub ended_session: Option<RomSession>,
    /// Quality score (0-100)
    pub score: f64,
    pub passed: bool,
}

/// How often an error appeared over a recorded clip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrequency {
    pub error_type: ErrorType,
    pub side: Side,
    pub frames: usize,
    /// Share of analyzed frames (0-1)
    pub fraction: f64,
}

/// Outcome of re-scoring a whole recorded clip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceReport {
    pub exercise: ExerciseKind,
    pub frames_analyzed: usize,
    pub errors: Vec<RankedError>,
    pub frequencies: Vec<ErrorFrequency>,
    pub score: f64,
    pub passed: bool,
}

/// Movement validation engine for a single subject.
///
/// Holds per-session state (filter, debouncer, ROM tracker) and must not be
/// shared between subjects. The threshold registry is immutable and shared.
pub struct ValidationEngine {
    registry: Arc<ThresholdRegistry>,
    config: EngineConfig,
    exercise: Option<ExerciseKind>,
    filter: PoseFilter,
    debouncer: PersistenceDebouncer,
    rom: RomTracker,
}

impl ValidationEngine {
    pub fn new(registry: Arc<ThresholdRegistry>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            "Validation engine using threshold catalogue {} ({:?} level)",
            registry.version(),
            config.patient_level
        );

        Ok(Self {
            filter: PoseFilter::new(config.filter, config.min_visibility),
            rom: RomTracker::new(config.rom),
            debouncer: PersistenceDebouncer::new(),
            exercise: None,
            registry,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ThresholdRegistry {
        &self.registry
    }

    pub fn exercise(&self) -> Option<ExerciseKind> {
        self.exercise
    }

    /// Select the exercise whose detectors run on each frame. Pending
    /// confirmations from the previous exercise are discarded.
    pub fn set_exercise(&mut self, exercise: ExerciseKind) {
        for error_type in exercise.frame_errors() {
            if error_type.is_provisional() {
                tracing::warn!(
                    "{} detection for {:?} uses a provisional 2D proxy",
                    error_type,
                    exercise
                );
            }
        }
        tracing::info!("Exercise set to {:?}", exercise);
        self.exercise = Some(exercise);
        self.debouncer.reset();
    }

    pub fn patient_level(&self) -> PatientLevel {
        self.config.patient_level
    }

    pub fn set_patient_level(&mut self, level: PatientLevel) {
        self.config.patient_level = level;
        self.debouncer.reset();
    }

    /// Evaluate one frame against its synchronized reference frame.
    ///
    /// Frames must arrive with strictly increasing timestamps.
    pub fn evaluate(
        &mut self,
        frame: &PoseFrame,
        reference: &PoseFrame,
    ) -> Result<ValidationResult> {
        let filtered = self.filter.apply(frame).map_err(|err| {
            tracing::debug!("Rejected frame at {}ms: {}", frame.timestamp.as_millis(), err);
            err
        })?;
        let timestamp = filtered.timestamp;
        let level = self.config.patient_level;

        let observations = match self.exercise {
            Some(exercise) => {
                let ctx = DetectionContext::new(&self.registry, level, self.config.min_visibility);
                run_frame_detectors(exercise, &filtered, reference, &ctx)
            }
            None => Vec::new(),
        };
        let confirmed = self
            .debouncer
            .update(&observations, timestamp, &self.registry, level);

        let (score, passed) = quality_score(&confirmed, &self.config.scoring);
        let confirmed_count = confirmed.len();
        let errors = rank_for_level(confirmed, &self.registry, level);

        let ended_session = self.rom.check_inactivity(timestamp);
        let rom = if self.rom.is_active() {
            match self
                .rom
                .track_frame(&filtered, timestamp, filtered.overall_confidence)
            {
                Ok(result) => result,
                Err(err) if err.is_sequencing() => {
                    tracing::debug!("ROM frame skipped: {}", err);
                    None
                }
                Err(err) => return Err(err),
            }
        } else {
            None
        };

        Ok(ValidationResult {
            timestamp,
            exercise: self.exercise,
            errors,
            confirmed_count,
            rom,
            ended_session,
            score,
            passed,
        })
    }

    /// Re-score a recorded clip against a reference clip of the same
    /// repetition. Frames are paired by index; no debouncing is applied and
    /// engine state is untouched.
    pub fn analyze_sequence(
        &self,
        user: &[PoseFrame],
        reference: &[PoseFrame],
    ) -> Result<SequenceReport> {
        let exercise = self
            .exercise
            .ok_or_else(|| Error::InvalidInput("no exercise selected".to_string()))?;
        if user.is_empty() || reference.is_empty() {
            return Err(Error::InvalidInput("empty frame sequence".to_string()));
        }
        for pair in user.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(Error::NonMonotonicTimestamp {
                    previous_ms: pair[0].timestamp.as_millis(),
                    current_ms: pair[1].timestamp.as_millis(),
                });
            }
        }
        if user.len() != reference.len() {
            tracing::debug!(
                "Clip lengths differ ({} vs {}), comparing the first {} frames",
                user.len(),
                reference.len(),
                user.len().min(reference.len())
            );
        }

        let level = self.config.patient_level;
        let ctx = DetectionContext::new(&self.registry, level, self.config.min_visibility);

        // Worst observation, first occurrence and frame count per (type, side)
        let mut seen: BTreeMap<(ErrorType, Side), (ErrorObservation, Timestamp, usize)> =
            BTreeMap::new();
        let frames_analyzed = user.len().min(reference.len());
        for (current, target) in user.iter().zip(reference) {
            for obs in run_frame_detectors(exercise, current, target, &ctx) {
                seen.entry((obs.error_type, obs.side))
                    .and_modify(|(worst, _, count)| {
                        *count += 1;
                        if obs.value > worst.value {
                            *worst = obs.clone();
                        }
                    })
                    .or_insert_with(|| (obs.clone(), obs.timestamp, 1));
            }
        }

        let frequencies = seen
            .iter()
            .map(|(&(error_type, side), &(_, _, frames))| ErrorFrequency {
                error_type,
                side,
                frames,
                fraction: frames as f64 / frames_analyzed as f64,
            })
            .collect();

        let sequence_observations = run_sequence_detectors(exercise, user, reference, &ctx)
            .into_iter()
            .map(|obs| {
                let first = obs.timestamp;
                (obs, first)
            });
        let confirmed: Vec<ConfirmedError> = seen
            .into_values()
            .map(|(obs, first, _)| (obs, first))
            .chain(sequence_observations)
            .filter_map(|(observation, first_detected)| {
                let risk_weight = self.registry.risk_weight(observation.error_type)?;
                Some(ConfirmedError {
                    observation,
                    risk_weight,
                    first_detected,
                    confirmed_at: first_detected,
                    newly_confirmed: false,
                })
            })
            .collect();

        let (score, passed) = quality_score(&confirmed, &self.config.scoring);
        Ok(SequenceReport {
            exercise,
            frames_analyzed,
            errors: rank_for_level(confirmed, &self.registry, level),
            frequencies,
            score,
            passed,
        })
    }

    /// Start a ROM session. `now` must be on the same clock as frame
    /// timestamps.
    pub fn start_rom_session(
        &mut self,
        movement: RomMovement,
        side: Side,
        camera_angle: CameraAngle,
        now: Timestamp,
    ) -> Result<SessionId> {
        self.rom.start_session(movement, side, camera_angle, now)
    }

    pub fn end_rom_session(&mut self, now: Timestamp) -> Result<RomSession> {
        self.rom.end_session(now)
    }

    /// Timer hook for the frame loop: closes the ROM session if it has been
    /// inactive past its timeout.
    pub fn check_inactivity(&mut self, now: Timestamp) -> Option<RomSession> {
        self.rom.check_inactivity(now)
    }

    pub fn rom_tracker(&self) -> &RomTracker {
        &self.rom
    }

    /// Clear filter, debouncer and timestamp state for a new set. ROM
    /// sessions and their history are kept.
    pub fn reset(&mut self) {
        self.filter.reset();
        self.debouncer.reset();
        tracing::debug!("Validation engine state reset");
    }
}

/// 100 minus severity penalties, clamped. Passing requires reaching the pass
/// score with no critical error.
fn quality_score(errors: &[ConfirmedError], scoring: &ScoringConfig) -> (f64, bool) {
    let mut penalty = 0.0;
    let mut any_critical = false;
    for error in errors {
        match error.observation.severity {
            Severity::Critical => {
                penalty += scoring.critical_penalty;
                any_critical = true;
            }
            Severity::Warning => penalty += scoring.warning_penalty,
            Severity::Good => {}
        }
    }
    let score = (100.0 - penalty).clamp(0.0, 100.0);
    (score, score >= scoring.pass_score && !any_critical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::test_support::standing_pose;
    use crate::filtering::OneEuroParams;
    use crate::rom::SessionEndReason;
    use physio_core::Keypoint;

    fn engine(level: PatientLevel) -> ValidationEngine {
        let mut config = EngineConfig::new(OneEuroParams::new(1.0, 0.007, 1.0).unwrap());
        config.patient_level = level;
        let registry = Arc::new(ThresholdRegistry::clinical().unwrap());
        let mut engine = ValidationEngine::new(registry, config).unwrap();
        engine.set_exercise(ExerciseKind::Squat);
        engine
    }

    /// Standing pose with the left knee collapsed inward to `knee_x`
    fn valgus(ms: i64, knee_x: f64) -> PoseFrame {
        standing_pose(ms, &[(Keypoint::LeftKnee, knee_x, 300.0)])
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = EngineConfig::new(OneEuroParams::new(1.0, 0.0, 1.0).unwrap());
        config.min_visibility = -0.1;
        let registry = Arc::new(ThresholdRegistry::clinical().unwrap());
        assert!(ValidationEngine::new(registry, config).is_err());
    }

    #[test]
    fn test_clean_movement_passes() {
        let mut engine = engine(PatientLevel::Intermediate);
        for ms in (0..=500).step_by(50) {
            let result = engine
                .evaluate(&standing_pose(ms, &[]), &standing_pose(ms, &[]))
                .unwrap();
            assert!(result.errors.is_empty());
            assert_eq!(result.score, 100.0);
            assert!(result.passed);
        }
    }

    #[test]
    fn test_critical_valgus_confirmed_after_persistence() {
        let mut engine = engine(PatientLevel::Intermediate);
        for ms in (0..300).step_by(50) {
            let result = engine.evaluate(&valgus(ms, 186.0), &standing_pose(ms, &[])).unwrap();
            assert!(result.errors.is_empty(), "confirmed early at {}ms", ms);
        }

        let result = engine.evaluate(&valgus(300, 186.0), &standing_pose(300, &[])).unwrap();
        assert_eq!(result.errors.len(), 1);
        let error = &result.errors[0];
        assert_eq!(error.error_type, ErrorType::KneeValgus);
        assert_eq!(error.side, Side::Left);
        assert_eq!(error.severity, Severity::Critical);
        assert!(error.newly_confirmed);
        assert_eq!(result.score, 75.0);
        assert!(!result.passed);

        let result = engine.evaluate(&valgus(350, 186.0), &standing_pose(350, &[])).unwrap();
        assert!(!result.errors[0].newly_confirmed);
    }

    #[test]
    fn test_warning_still_passes() {
        let mut engine = engine(PatientLevel::Intermediate);
        let mut last = None;
        for ms in (0..=400).step_by(50) {
            last = Some(engine.evaluate(&valgus(ms, 189.0), &standing_pose(ms, &[])).unwrap());
        }
        let result = last.unwrap();
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].severity, Severity::Warning);
        assert_eq!(result.score, 90.0);
        assert!(result.passed);
    }

    #[test]
    fn test_beginner_tolerates_mild_deviation() {
        let mut engine = engine(PatientLevel::Beginner);
        for ms in (0..=1_000).step_by(50) {
            let result = engine.evaluate(&valgus(ms, 189.0), &standing_pose(ms, &[])).unwrap();
            assert!(result.errors.is_empty());
        }
    }

    #[test]
    fn test_non_increasing_timestamp_rejected() {
        let mut engine = engine(PatientLevel::Intermediate);
        engine.evaluate(&standing_pose(100, &[]), &standing_pose(100, &[])).unwrap();
        let err = engine
            .evaluate(&standing_pose(100, &[]), &standing_pose(100, &[]))
            .unwrap_err();
        assert!(matches!(err, Error::NonMonotonicTimestamp { .. }));

        engine.reset();
        assert!(engine.evaluate(&standing_pose(50, &[]), &standing_pose(50, &[])).is_ok());
    }

    #[test]
    fn test_reset_clears_pending_errors() {
        let mut engine = engine(PatientLevel::Intermediate);
        for ms in (0..=250).step_by(50) {
            engine.evaluate(&valgus(ms, 186.0), &standing_pose(ms, &[])).unwrap();
        }
        engine.reset();
        let result = engine.evaluate(&valgus(300, 186.0), &standing_pose(300, &[])).unwrap();
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_rom_tracked_while_session_active() {
        let mut engine = engine(PatientLevel::Intermediate);
        let result = engine.evaluate(&standing_pose(0, &[]), &standing_pose(0, &[])).unwrap();
        assert!(result.rom.is_none());

        engine
            .start_rom_session(
                RomMovement::ShoulderFlexion,
                Side::Left,
                CameraAngle::Side,
                Timestamp::from_millis(0),
            )
            .unwrap();
        let result = engine.evaluate(&standing_pose(50, &[]), &standing_pose(50, &[])).unwrap();
        let rom = result.rom.unwrap();
        assert_eq!(rom.movement, RomMovement::ShoulderFlexion);
        assert!(rom.peak_angle < 30.0);

        let session = engine.end_rom_session(Timestamp::from_millis(100)).unwrap();
        assert_eq!(session.frame_count(), 1);
        assert_eq!(engine.rom_tracker().history().len(), 1);
    }

    #[test]
    fn test_recovers_from_non_finite_first_frame() {
        let mut engine = engine(PatientLevel::Intermediate);
        let broken = valgus(0, f64::NAN);
        let result = engine.evaluate(&broken, &standing_pose(0, &[])).unwrap();
        assert!(result.errors.is_empty());

        let mut last = None;
        for ms in (50..=400).step_by(50) {
            last = Some(engine.evaluate(&valgus(ms, 186.0), &standing_pose(ms, &[])).unwrap());
        }
        let result = last.unwrap();
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].error_type, ErrorType::KneeValgus);
        assert_eq!(result.errors[0].side, Side::Left);
    }

    #[test]
    fn test_timed_out_rom_session_is_reported() {
        let mut engine = engine(PatientLevel::Intermediate);
        let id = engine
            .start_rom_session(
                RomMovement::ShoulderFlexion,
                Side::Left,
                CameraAngle::Side,
                Timestamp::from_millis(0),
            )
            .unwrap();
        let result = engine.evaluate(&standing_pose(50, &[]), &standing_pose(50, &[])).unwrap();
        assert!(result.rom.is_some());
        assert!(result.ended_session.is_none());

        let late = 50 + engine.config().rom.inactivity_timeout_ms as i64;
        let result = engine
            .evaluate(&standing_pose(late, &[]), &standing_pose(late, &[]))
            .unwrap();
        assert!(result.rom.is_none());
        let ended = result.ended_session.unwrap();
        assert_eq!(ended.id, id);
        assert_eq!(ended.end_reason, Some(SessionEndReason::Inactivity));
        assert_eq!(ended.frame_count(), 1);

        let next = late + 50;
        let result = engine
            .evaluate(&standing_pose(next, &[]), &standing_pose(next, &[]))
            .unwrap();
        assert!(result.ended_session.is_none());
        assert!(!engine.rom_tracker().is_active());
    }

    #[test]
    fn test_analyze_sequence() {
        let engine = engine(PatientLevel::Intermediate);
        let user: Vec<_> = (0..10)
            .map(|i| if i < 4 { valgus(i * 50, 186.0) } else { standing_pose(i * 50, &[]) })
            .collect();
        let reference: Vec<_> = (0..10).map(|i| standing_pose(i * 50, &[])).collect();

        let report = engine.analyze_sequence(&user, &reference).unwrap();
        assert_eq!(report.frames_analyzed, 10);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].error_type, ErrorType::KneeValgus);
        assert_eq!(report.errors[0].error.first_detected, Timestamp::from_millis(0));
        assert_eq!(report.frequencies.len(), 1);
        assert_eq!(report.frequencies[0].frames, 4);
        assert!((report.frequencies[0].fraction - 0.4).abs() < 1e-12);
        assert!(!report.passed);
    }

    #[test]
    fn test_analyze_sequence_requires_exercise() {
        let config = EngineConfig::new(OneEuroParams::new(1.0, 0.007, 1.0).unwrap());
        let registry = Arc::new(ThresholdRegistry::clinical().unwrap());
        let engine = ValidationEngine::new(registry, config).unwrap();
        let frames = vec![standing_pose(0, &[])];
        assert!(matches!(
            engine.analyze_sequence(&frames, &frames),
            Err(Error::InvalidInput(_))
        ));
    }
}
