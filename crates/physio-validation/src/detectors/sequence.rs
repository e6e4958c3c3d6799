//! Sequence-level detectors that look at a whole repetition or clip.

use physio_core::{angle_at_vertex, Keypoint, PoseFrame, Side, Timestamp};

use super::{DetectionContext, ErrorObservation};
use crate::thresholds::ErrorType;

/// Smallest knee angle (hip-knee-ankle) across the sequence and the time it
/// occurred. Frames with any joint below minimum visibility are skipped.
pub fn min_knee_angle(
    frames: &[PoseFrame],
    side: Side,
    min_visibility: f32,
) -> Option<(f64, Timestamp)> {
    let joints = [
        side.pick(Keypoint::LeftHip, Keypoint::RightHip),
        side.pick(Keypoint::LeftKnee, Keypoint::RightKnee),
        side.pick(Keypoint::LeftAnkle, Keypoint::RightAnkle),
    ];
    frames
        .iter()
        .filter_map(|frame| {
            let [hip, knee, ankle] = frame.visible_all(joints, min_visibility)?;
            Some((angle_at_vertex(&hip, &knee, &ankle), frame.timestamp))
        })
        .fold(None, |best: Option<(f64, Timestamp)>, (angle, ts)| match best {
            Some((min, _)) if min <= angle => best,
            _ => Some((angle, ts)),
        })
}

/// Insufficient squat depth: the user's deepest knee angle stays shallower
/// than the reference's deepest knee angle by more than the threshold.
pub fn detect_insufficient_squat_depth(
    user: &[PoseFrame],
    reference: &[PoseFrame],
    side: Side,
    ctx: &DetectionContext<'_>,
) -> Option<ErrorObservation> {
    let (user_min, at) = min_knee_angle(user, side, ctx.min_visibility)?;
    let (reference_min, _) = min_knee_angle(reference, side, ctx.min_visibility)?;
    ctx.observe(
        ErrorType::InsufficientSquatDepth,
        user_min - reference_min,
        side,
        at,
    )
}
