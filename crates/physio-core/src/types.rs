//! Fundamental types for the movement validation engine.
//!
//! Positions are image-space coordinates as delivered by the pose estimator:
//! `x` grows to the right of the frame, `y` grows downward.

use chrono::{DateTime, Utc};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a range-of-motion session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic timestamp with nanosecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    pub fn as_millis(&self) -> i64 {
        self.0 / 1_000_000
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Signed milliseconds elapsed since `earlier`
    pub fn millis_since(&self, earlier: Timestamp) -> i64 {
        (self.0 - earlier.0) / 1_000_000
    }

    pub fn plus_millis(&self, millis: u64) -> Self {
        let delta = i64::try_from(millis).unwrap_or(i64::MAX / 1_000_000);
        Self(self.0.saturating_add(delta.saturating_mul(1_000_000)))
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.0)
    }
}

/// 2D position in image space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position2D {
    pub x: f64,
    pub y: f64,
}

impl Position2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn origin() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn to_nalgebra(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }

    pub fn distance_to(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Body side an observation or measurement refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
    Bilateral,
}

impl Side {
    /// Pick the keypoint belonging to this side. Bilateral resolves to the left one.
    pub fn pick(&self, left: Keypoint, right: Keypoint) -> Keypoint {
        match self {
            Side::Left | Side::Bilateral => left,
            Side::Right => right,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
            Side::Bilateral => "bilateral",
        }
    }
}

/// Coarse experience / recovery-stage classification of the patient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatientLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl PatientLevel {
    pub const ALL: [PatientLevel; 3] = [
        PatientLevel::Beginner,
        PatientLevel::Intermediate,
        PatientLevel::Advanced,
    ];
}

/// 17-joint skeletal keypoint definition (COCO format)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Keypoint {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl Keypoint {
    pub const COUNT: usize = 17;

    pub const ALL: [Keypoint; Keypoint::COUNT] = [
        Keypoint::Nose,
        Keypoint::LeftEye,
        Keypoint::RightEye,
        Keypoint::LeftEar,
        Keypoint::RightEar,
        Keypoint::LeftShoulder,
        Keypoint::RightShoulder,
        Keypoint::LeftElbow,
        Keypoint::RightElbow,
        Keypoint::LeftWrist,
        Keypoint::RightWrist,
        Keypoint::LeftHip,
        Keypoint::RightHip,
        Keypoint::LeftKnee,
        Keypoint::RightKnee,
        Keypoint::LeftAnkle,
        Keypoint::RightAnkle,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Keypoint detection with confidence score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeypointDetection {
    pub keypoint: Keypoint,
    pub position: Position2D,
    /// Visibility / confidence in [0, 1]
    pub confidence: f32,
}

impl KeypointDetection {
    pub fn new(keypoint: Keypoint, position: Position2D, confidence: f32) -> Self {
        Self {
            keypoint,
            position,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// One subject's keypoints at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseFrame {
    pub timestamp: Timestamp,
    pub keypoints: [Option<KeypointDetection>; Keypoint::COUNT],
    pub overall_confidence: f32,
}

impl PoseFrame {
    pub fn new(timestamp: Timestamp, overall_confidence: f32) -> Self {
        Self {
            timestamp,
            keypoints: [None; Keypoint::COUNT],
            overall_confidence,
        }
    }

    /// Build a frame from `(keypoint, x, y, confidence)` tuples; the overall
    /// confidence is the mean of the supplied keypoint confidences.
    pub fn from_points(timestamp: Timestamp, points: &[(Keypoint, f64, f64, f32)]) -> Self {
        let mut frame = Self::new(timestamp, 0.0);
        for &(keypoint, x, y, confidence) in points {
            frame.set(KeypointDetection::new(keypoint, Position2D::new(x, y), confidence));
        }
        frame.overall_confidence = frame.average_confidence();
        frame
    }

    pub fn set(&mut self, detection: KeypointDetection) {
        self.keypoints[detection.keypoint.index()] = Some(detection);
    }

    pub fn get(&self, keypoint: Keypoint) -> Option<&KeypointDetection> {
        self.keypoints[keypoint.index()].as_ref()
    }

    /// Confidence of a keypoint; absent keypoints count as zero
    pub fn confidence_of(&self, keypoint: Keypoint) -> f32 {
        self.get(keypoint).map_or(0.0, |kp| kp.confidence)
    }

    /// Position of a keypoint if its confidence reaches `min_confidence`
    pub fn visible(&self, keypoint: Keypoint, min_confidence: f32) -> Option<Position2D> {
        self.get(keypoint)
            .filter(|kp| kp.confidence >= min_confidence && kp.position.is_finite())
            .map(|kp| kp.position)
    }

    /// Positions of all requested keypoints, or `None` if any is not visible
    pub fn visible_all<const N: usize>(
        &self,
        keypoints: [Keypoint; N],
        min_confidence: f32,
    ) -> Option<[Position2D; N]> {
        let mut out = [Position2D::origin(); N];
        for (slot, keypoint) in out.iter_mut().zip(keypoints) {
            *slot = self.visible(keypoint, min_confidence)?;
        }
        Some(out)
    }

    pub fn average_confidence(&self) -> f32 {
        let (sum, count) = self
            .keypoints
            .iter()
            .flatten()
            .fold((0.0f32, 0usize), |(s, c), kp| (s + kp.confidence, c + 1));
        if count > 0 {
            sum / count as f32
        } else {
            0.0
        }
    }
}
