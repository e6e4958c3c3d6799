//! Range-of-motion session tracking.
//!
//! One session at a time: idle → `start_session` → active → `track_frame`...
//! → `end_session` (or inactivity timeout) → idle, with the finalized session
//! appended to history.

use physio_core::geometry::angle_at_vertex;
use physio_core::{Error, Keypoint, PoseFrame, Position2D, Result, SessionId, Side, Timestamp};
use serde::{Deserialize, Serialize};

/// Movement measured by a ROM session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RomMovement {
    #[serde(rename = "forward_flexion")]
    ShoulderFlexion,
    ShoulderAbduction,
    ShoulderExtension,
    ElbowFlexion,
    KneeFlexion,
    HipFlexion,
}

impl RomMovement {
    pub const ALL: [RomMovement; 6] = [
        RomMovement::ShoulderFlexion,
        RomMovement::ShoulderAbduction,
        RomMovement::ShoulderExtension,
        RomMovement::ElbowFlexion,
        RomMovement::KneeFlexion,
        RomMovement::HipFlexion,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            RomMovement::ShoulderFlexion => "forward_flexion",
            RomMovement::ShoulderAbduction => "shoulder_abduction",
            RomMovement::ShoulderExtension => "shoulder_extension",
            RomMovement::ElbowFlexion => "elbow_flexion",
            RomMovement::KneeFlexion => "knee_flexion",
            RomMovement::HipFlexion => "hip_flexion",
        }
    }

    /// Clinical full-range standard in degrees
    pub fn clinical_standard(&self) -> f64 {
        match self {
            RomMovement::ShoulderFlexion => 180.0,
            RomMovement::ShoulderAbduction => 180.0,
            RomMovement::ShoulderExtension => 60.0,
            RomMovement::ElbowFlexion => 150.0,
            RomMovement::KneeFlexion => 135.0,
            RomMovement::HipFlexion => 120.0,
        }
    }

    /// Typical adult range in degrees
    pub fn population_mean(&self) -> f64 {
        match self {
            RomMovement::ShoulderFlexion => 165.0,
            RomMovement::ShoulderAbduction => 170.0,
            RomMovement::ShoulderExtension => 50.0,
            RomMovement::ElbowFlexion => 145.0,
            RomMovement::KneeFlexion => 130.0,
            RomMovement::HipFlexion => 115.0,
        }
    }

    /// Camera placement under which the 2D angle is meaningful
    pub fn recommended_camera(&self) -> CameraAngle {
        match self {
            RomMovement::ShoulderAbduction => CameraAngle::Front,
            _ => CameraAngle::Side,
        }
    }

    /// Keypoints forming the measured angle, vertex in the middle
    fn joints(&self, side: Side) -> [Keypoint; 3] {
        let pick = |l, r| side.pick(l, r);
        let shoulder = pick(Keypoint::LeftShoulder, Keypoint::RightShoulder);
        let elbow = pick(Keypoint::LeftElbow, Keypoint::RightElbow);
        let wrist = pick(Keypoint::LeftWrist, Keypoint::RightWrist);
        let hip = pick(Keypoint::LeftHip, Keypoint::RightHip);
        let knee = pick(Keypoint::LeftKnee, Keypoint::RightKnee);
        let ankle = pick(Keypoint::LeftAnkle, Keypoint::RightAnkle);
        match self {
            RomMovement::ShoulderFlexion
            | RomMovement::ShoulderAbduction
            | RomMovement::ShoulderExtension => [hip, shoulder, elbow],
            RomMovement::ElbowFlexion => [shoulder, elbow, wrist],
            RomMovement::KneeFlexion => [hip, knee, ankle],
            RomMovement::HipFlexion => [shoulder, hip, knee],
        }
    }

    /// Movement angle in degrees, or `None` if a joint is not visible
    pub fn measure(&self, frame: &PoseFrame, side: Side, min_confidence: f32) -> Option<f64> {
        let [a, b, c] = frame.visible_all(self.joints(side), min_confidence)?;
        Some(self.angle_from(&a, &b, &c))
    }

    fn angle_from(&self, a: &Position2D, b: &Position2D, c: &Position2D) -> f64 {
        let inner = angle_at_vertex(a, b, c);
        match self {
            // Arm hanging along the trunk is 0
            RomMovement::ShoulderFlexion
            | RomMovement::ShoulderAbduction
            | RomMovement::ShoulderExtension => inner,
            // Straight limb is 0
            RomMovement::ElbowFlexion | RomMovement::KneeFlexion | RomMovement::HipFlexion => {
                180.0 - inner
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraAngle {
    Front,
    Side,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementQuality {
    Fair,
    Good,
    Excellent,
}

impl MeasurementQuality {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.85 {
            MeasurementQuality::Excellent
        } else if confidence >= 0.7 {
            MeasurementQuality::Good
        } else {
            MeasurementQuality::Fair
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    Explicit,
    Inactivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RomConfig {
    /// Frames below this confidence are not accepted
    pub min_confidence: f32,
    pub inactivity_timeout_ms: u64,
}

impl Default for RomConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            inactivity_timeout_ms: 10_000,
        }
    }
}

impl RomConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(Error::ConfigInvalid(format!(
                "ROM min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        if self.inactivity_timeout_ms == 0 {
            return Err(Error::ConfigInvalid(
                "ROM inactivity timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Record of one range-of-motion session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RomSession {
    pub id: SessionId,
    pub movement: RomMovement,
    pub side: Side,
    pub camera_angle: CameraAngle,
    /// Camera angle differs from the movement's recommended placement
    pub camera_mismatch: bool,
    pub angles: Vec<f64>,
    pub timestamps: Vec<Timestamp>,
    pub peak_angle: f64,
    pub average_angle: f64,
    pub started_at: Timestamp,
    pub last_activity: Timestamp,
    pub ended_at: Option<Timestamp>,
    pub end_reason: Option<SessionEndReason>,
    #[serde(skip)]
    angle_sum: f64,
}

impl RomSession {
    fn new(movement: RomMovement, side: Side, camera_angle: CameraAngle, now: Timestamp) -> Self {
        Self {
            id: SessionId::new(),
            movement,
            side,
            camera_angle,
            camera_mismatch: camera_angle != movement.recommended_camera(),
            angles: Vec::new(),
            timestamps: Vec::new(),
            peak_angle: 0.0,
            average_angle: 0.0,
            started_at: now,
            last_activity: now,
            ended_at: None,
            end_reason: None,
            angle_sum: 0.0,
        }
    }

    fn record(&mut self, angle: f64, timestamp: Timestamp) {
        self.angles.push(angle);
        self.timestamps.push(timestamp);
        self.angle_sum += angle;
        if self.angles.len() == 1 || angle > self.peak_angle {
            self.peak_angle = angle;
        }
        self.average_angle = self.angle_sum / self.angles.len() as f64;
        self.last_activity = timestamp;
    }

    fn deadline(&self, timeout_ms: u64) -> Timestamp {
        self.last_activity.plus_millis(timeout_ms)
    }

    pub fn is_closed(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn frame_count(&self) -> usize {
        self.angles.len()
    }

    /// Elapsed time from start to end (or to the last accepted frame while open)
    pub fn duration_ms(&self) -> i64 {
        self.ended_at
            .unwrap_or(self.last_activity)
            .millis_since(self.started_at)
    }

    pub fn percent_of_standard(&self) -> f64 {
        self.peak_angle / self.movement.clinical_standard() * 100.0
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Import an exported session. The record must satisfy the session
    /// invariants: one timestamp per angle, non-decreasing timestamps, and a
    /// peak and average that match the angle history.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut session: RomSession = serde_json::from_str(json)?;
        session.angle_sum = session.angles.iter().sum();
        session.check_invariants()?;
        Ok(session)
    }

    fn check_invariants(&self) -> Result<()> {
        if self.angles.len() != self.timestamps.len() {
            return Err(Error::InvalidInput(format!(
                "ROM session has {} angles but {} timestamps",
                self.angles.len(),
                self.timestamps.len()
            )));
        }
        if self.angles.iter().any(|a| !a.is_finite()) {
            return Err(Error::InvalidInput(
                "ROM session angle history contains non-finite values".to_string(),
            ));
        }
        if let Some(pair) = self.timestamps.windows(2).find(|pair| pair[1] < pair[0]) {
            return Err(Error::NonMonotonicTimestamp {
                previous_ms: pair[0].as_millis(),
                current_ms: pair[1].as_millis(),
            });
        }

        let (peak, average) = if self.angles.is_empty() {
            (0.0, 0.0)
        } else {
            let peak = self.angles.iter().copied().fold(f64::MIN, f64::max);
            (peak, self.angle_sum / self.angles.len() as f64)
        };
        if self.peak_angle != peak {
            return Err(Error::InvalidInput(format!(
                "ROM session peak {} does not match history maximum {}",
                self.peak_angle, peak
            )));
        }
        if (self.average_angle - average).abs() > 1e-9 * average.abs().max(1.0) {
            return Err(Error::InvalidInput(format!(
                "ROM session average {} does not match history mean {}",
                self.average_angle, average
            )));
        }
        Ok(())
    }
}

/// Per-frame ROM outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RomResult {
    pub session_id: SessionId,
    pub movement: RomMovement,
    pub side: Side,
    pub current_angle: f64,
    pub peak_angle: f64,
    pub average_angle: f64,
    pub clinical_standard: f64,
    pub population_mean: f64,
    pub percent_of_standard: f64,
    pub percent_of_population: f64,
    pub quality: MeasurementQuality,
    pub feedback: String,
}

/// Feedback keyed to the percentage of the clinical standard achieved
pub fn rom_feedback(percent_of_standard: f64) -> &'static str {
    if percent_of_standard >= 100.0 {
        "Full range of motion achieved"
    } else if percent_of_standard >= 90.0 {
        "Excellent, almost at full range"
    } else if percent_of_standard >= 75.0 {
        "Good progress, keep moving a little further"
    } else if percent_of_standard >= 50.0 {
        "Keep working on your range"
    } else {
        "Limited range, move only as far as is comfortable"
    }
}

#[derive(Debug, Clone)]
pub struct RomTracker {
    config: RomConfig,
    active: Option<RomSession>,
    history: Vec<RomSession>,
}

impl RomTracker {
    pub fn new(config: RomConfig) -> Self {
        Self {
            config,
            active: None,
            history: Vec::new(),
        }
    }

    pub fn config(&self) -> &RomConfig {
        &self.config
    }

    pub fn start_session(
        &mut self,
        movement: RomMovement,
        side: Side,
        camera_angle: CameraAngle,
        now: Timestamp,
    ) -> Result<SessionId> {
        self.check_inactivity(now);
        if let Some(active) = &self.active {
            return Err(Error::SessionAlreadyActive {
                session_id: active.id.to_string(),
            });
        }

        let session = RomSession::new(movement, side, camera_angle, now);
        if session.camera_mismatch {
            tracing::warn!(
                "Camera angle {:?} is not recommended for {} (expected {:?})",
                camera_angle,
                movement.key(),
                movement.recommended_camera()
            );
        }
        tracing::info!(
            "Started ROM session {} for {} ({})",
            session.id,
            movement.key(),
            side.as_str()
        );
        let id = session.id;
        self.active = Some(session);
        Ok(id)
    }

    /// Track one frame. Returns `Ok(None)` when the frame is not accepted
    /// (low confidence or joints not visible).
    pub fn track_frame(
        &mut self,
        frame: &PoseFrame,
        timestamp: Timestamp,
        confidence: f32,
    ) -> Result<Option<RomResult>> {
        let timeout_ms = self.config.inactivity_timeout_ms;
        let session = self.active.as_ref().ok_or(Error::NoActiveSession)?;

        if timestamp >= session.deadline(timeout_ms) {
            let session_id = session.id.to_string();
            self.finish(SessionEndReason::Inactivity, timestamp);
            return Err(Error::SessionExpired { session_id });
        }
        if timestamp < session.last_activity {
            return Err(Error::NonMonotonicTimestamp {
                previous_ms: session.last_activity.as_millis(),
                current_ms: timestamp.as_millis(),
            });
        }
        if confidence < self.config.min_confidence {
            tracing::debug!(
                "Skipping ROM frame at {}ms with confidence {:.2}",
                timestamp.as_millis(),
                confidence
            );
            return Ok(None);
        }

        let min_confidence = self.config.min_confidence;
        let Some(session) = self.active.as_mut() else {
            return Err(Error::NoActiveSession);
        };
        let Some(angle) = session.movement.measure(frame, session.side, min_confidence) else {
            return Ok(None);
        };
        session.record(angle, timestamp);

        let movement = session.movement;
        let percent_of_standard = session.percent_of_standard();
        Ok(Some(RomResult {
            session_id: session.id,
            movement,
            side: session.side,
            current_angle: angle,
            peak_angle: session.peak_angle,
            average_angle: session.average_angle,
            clinical_standard: movement.clinical_standard(),
            population_mean: movement.population_mean(),
            percent_of_standard,
            percent_of_population: session.peak_angle / movement.population_mean() * 100.0,
            quality: MeasurementQuality::from_confidence(confidence),
            feedback: rom_feedback(percent_of_standard).to_string(),
        }))
    }

    /// End the active session. A session whose deadline has already passed
    /// is closed as timed out instead.
    pub fn end_session(&mut self, now: Timestamp) -> Result<RomSession> {
        let session = self.active.as_ref().ok_or(Error::NoActiveSession)?;
        let reason = if now >= session.deadline(self.config.inactivity_timeout_ms) {
            SessionEndReason::Inactivity
        } else {
            SessionEndReason::Explicit
        };
        self.finish(reason, now).ok_or(Error::NoActiveSession)
    }

    /// Close the active session if its inactivity deadline has passed
    pub fn check_inactivity(&mut self, now: Timestamp) -> Option<RomSession> {
        let deadline = self
            .active
            .as_ref()?
            .deadline(self.config.inactivity_timeout_ms);
        if now < deadline {
            return None;
        }
        self.finish(SessionEndReason::Inactivity, now)
    }

    fn finish(&mut self, reason: SessionEndReason, now: Timestamp) -> Option<RomSession> {
        let mut session = self.active.take()?;
        session.ended_at = Some(match reason {
            SessionEndReason::Explicit => now.max(session.last_activity),
            SessionEndReason::Inactivity => session.last_activity,
        });
        session.end_reason = Some(reason);

        match reason {
            SessionEndReason::Inactivity => tracing::warn!(
                "ROM session {} timed out after {}ms without activity",
                session.id,
                self.config.inactivity_timeout_ms
            ),
            SessionEndReason::Explicit => tracing::info!(
                "Ended ROM session {} started {}: peak {:.1}, {} frames",
                session.id,
                session.started_at.to_datetime(),
                session.peak_angle,
                session.frame_count()
            ),
        }

        self.history.push(session.clone());
        Some(session)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_session(&self) -> Option<&RomSession> {
        self.active.as_ref()
    }

    pub fn history(&self) -> &[RomSession] {
        &self.history
    }

    /// Best peak recorded across finished sessions for a movement and side
    pub fn best_peak(&self, movement: RomMovement, side: Side) -> Option<f64> {
        self.history
            .iter()
            .filter(|s| s.movement == movement && s.side == side && !s.angles.is_empty())
            .map(|s| s.peak_angle)
            .fold(None, |best, peak| match best {
                Some(b) if b >= peak => Some(b),
                _ => Some(peak),
            })
    }

    /// Drop the active session without recording it
    pub fn reset(&mut self) {
        self.active = None;
    }
}
