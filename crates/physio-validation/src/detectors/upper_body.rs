//! Upper-body compensation detectors (shoulder and arm isolation work).

use nalgebra::Vector2;
use physio_core::{
    angle_at_vertex, distance, percent_of_span, segment, signed_angle_between, Keypoint, PoseFrame,
    Side,
};

use super::{DetectionContext, ErrorObservation};
use crate::thresholds::ErrorType;

/// Ear-to-shoulder vertical gap as a percentage of shoulder width
fn ear_shoulder_gap(frame: &PoseFrame, side: Side, min_visibility: f32) -> Option<f64> {
    let [ear, left_shoulder, right_shoulder] = frame.visible_all(
        [
            side.pick(Keypoint::LeftEar, Keypoint::RightEar),
            Keypoint::LeftShoulder,
            Keypoint::RightShoulder,
        ],
        min_visibility,
    )?;
    let shoulder = match side {
        Side::Right => right_shoulder,
        Side::Left | Side::Bilateral => left_shoulder,
    };
    let width = distance(&left_shoulder, &right_shoulder);
    Some(percent_of_span(shoulder.y - ear.y, width))
}

/// Shoulder hiking: the shoulder rises toward the ear compared with the
/// reference.
pub fn detect_shoulder_hiking(
    current: &PoseFrame,
    reference: &PoseFrame,
    side: Side,
    ctx: &DetectionContext<'_>,
) -> Option<ErrorObservation> {
    let user = ear_shoulder_gap(current, side, ctx.min_visibility)?;
    let target = ear_shoulder_gap(reference, side, ctx.min_visibility)?;
    ctx.observe(ErrorType::ShoulderHiking, target - user, side, current.timestamp)
}

/// Forearm elevation proxy in degrees: +90 wrist straight above the elbow,
/// -90 straight below.
fn forearm_elevation(frame: &PoseFrame, side: Side, min_visibility: f32) -> Option<f64> {
    let [elbow, wrist] = frame.visible_all(
        [
            side.pick(Keypoint::LeftElbow, Keypoint::RightElbow),
            side.pick(Keypoint::LeftWrist, Keypoint::RightWrist),
        ],
        min_visibility,
    )?;
    let forearm = distance(&elbow, &wrist);
    let ratio = percent_of_span(elbow.y - wrist.y, forearm) / 100.0;
    Some(ratio.clamp(-1.0, 1.0).asin().to_degrees())
}

/// Shoulder internal rotation during external-rotation work.
///
/// Provisional: the measure is a forearm height-ratio proxy, not a true
/// rotation angle, and has not been clinically validated.
pub fn detect_shoulder_internal_rotation(
    current: &PoseFrame,
    reference: &PoseFrame,
    side: Side,
    ctx: &DetectionContext<'_>,
) -> Option<ErrorObservation> {
    let user = forearm_elevation(current, side, ctx.min_visibility)?;
    let target = forearm_elevation(reference, side, ctx.min_visibility)?;
    ctx.observe(
        ErrorType::ShoulderInternalRotation,
        target - user,
        side,
        current.timestamp,
    )
}

/// Arm elevation angle at the shoulder (hip-shoulder-elbow)
fn arm_elevation(frame: &PoseFrame, side: Side, min_visibility: f32) -> Option<f64> {
    let [hip, shoulder, elbow] = frame.visible_all(
        [
            side.pick(Keypoint::LeftHip, Keypoint::RightHip),
            side.pick(Keypoint::LeftShoulder, Keypoint::RightShoulder),
            side.pick(Keypoint::LeftElbow, Keypoint::RightElbow),
        ],
        min_visibility,
    )?;
    Some(angle_at_vertex(&hip, &shoulder, &elbow))
}

/// Incomplete shoulder range: the arm stops short of the reference elevation.
pub fn detect_incomplete_shoulder_range(
    current: &PoseFrame,
    reference: &PoseFrame,
    side: Side,
    ctx: &DetectionContext<'_>,
) -> Option<ErrorObservation> {
    let user = arm_elevation(current, side, ctx.min_visibility)?;
    let target = arm_elevation(reference, side, ctx.min_visibility)?;
    ctx.observe(
        ErrorType::IncompleteShoulderRange,
        target - user,
        side,
        current.timestamp,
    )
}

/// Shoulder compensation: during an elbow isolation exercise the upper arm
/// swings forward or out beyond the reference.
pub fn detect_shoulder_compensation(
    current: &PoseFrame,
    reference: &PoseFrame,
    side: Side,
    ctx: &DetectionContext<'_>,
) -> Option<ErrorObservation> {
    let user = arm_elevation(current, side, ctx.min_visibility)?;
    let target = arm_elevation(reference, side, ctx.min_visibility)?;
    ctx.observe(
        ErrorType::ShoulderCompensation,
        user - target,
        side,
        current.timestamp,
    )
}

/// Horizontal elbow offset from the shoulder in percent of upper-arm length
fn elbow_offset(frame: &PoseFrame, side: Side, min_visibility: f32) -> Option<f64> {
    let [shoulder, elbow] = frame.visible_all(
        [
            side.pick(Keypoint::LeftShoulder, Keypoint::RightShoulder),
            side.pick(Keypoint::LeftElbow, Keypoint::RightElbow),
        ],
        min_visibility,
    )?;
    let upper_arm = distance(&shoulder, &elbow);
    Some(percent_of_span((elbow.x - shoulder.x).abs(), upper_arm))
}

/// Elbow drift: the elbow leaves the side of the body during an isolation
/// exercise.
pub fn detect_elbow_drift(
    current: &PoseFrame,
    reference: &PoseFrame,
    side: Side,
    ctx: &DetectionContext<'_>,
) -> Option<ErrorObservation> {
    let user = elbow_offset(current, side, ctx.min_visibility)?;
    let target = elbow_offset(reference, side, ctx.min_visibility)?;
    ctx.observe(ErrorType::ElbowDrift, user - target, side, current.timestamp)
}

/// Forearm direction (elbow to wrist) and whether the arm's shoulder sits on
/// the image-right of the body midline
fn forearm_direction(
    frame: &PoseFrame,
    side: Side,
    min_visibility: f32,
) -> Option<(Vector2<f64>, bool)> {
    let [elbow, wrist, left_shoulder, right_shoulder] = frame.visible_all(
        [
            side.pick(Keypoint::LeftElbow, Keypoint::RightElbow),
            side.pick(Keypoint::LeftWrist, Keypoint::RightWrist),
            Keypoint::LeftShoulder,
            Keypoint::RightShoulder,
        ],
        min_visibility,
    )?;
    let shoulder = match side {
        Side::Right => right_shoulder,
        Side::Left | Side::Bilateral => left_shoulder,
    };
    let midline = (left_shoulder.x + right_shoulder.x) / 2.0;
    Some((segment(&elbow, &wrist), shoulder.x >= midline))
}

/// Wrist deviation: the forearm rotates outward, away from the body midline,
/// relative to the reference forearm.
pub fn detect_wrist_deviation(
    current: &PoseFrame,
    reference: &PoseFrame,
    side: Side,
    ctx: &DetectionContext<'_>,
) -> Option<ErrorObservation> {
    let (user, image_right) = forearm_direction(current, side, ctx.min_visibility)?;
    let (target, _) = forearm_direction(reference, side, ctx.min_visibility)?;
    // On screen, outward is clockwise for an arm left of the midline and
    // counter-clockwise for one right of it
    let rotation = signed_angle_between(&target, &user);
    let outward = if image_right { -rotation } else { rotation };
    ctx.observe(ErrorType::WristDeviation, outward, side, current.timestamp)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::Severity;
    use super::*;
    use crate::thresholds::{MeasurementUnit, ThresholdRegistry};
    use physio_core::PatientLevel;

    fn registry() -> ThresholdRegistry {
        ThresholdRegistry::clinical().unwrap()
    }

    #[test]
    fn test_shoulder_hiking() {
        let registry = registry();
        let ctx = DetectionContext::new(&registry, PatientLevel::Intermediate, 0.5);
        let reference = standing_pose(0, &[]);
        // Left shoulder rises 9 px toward the ear: 15% of the 60 px shoulder width.
        let current = standing_pose(
            0,
            &[
                (Keypoint::LeftShoulder, 180.0, 51.0),
                (Keypoint::RightShoulder, 120.0, 51.0),
                (Keypoint::RightEar, 140.0, 11.0),
            ],
        );
        let obs = detect_shoulder_hiking(&current, &reference, Side::Left, &ctx).unwrap();
        assert!((obs.value - 15.0).abs() < 1e-9);
        assert_eq!(obs.severity, Severity::Critical);
        assert_eq!(obs.unit, MeasurementUnit::Percent);
        // The right side moved with its ear, so its gap is unchanged.
        assert!(detect_shoulder_hiking(&current, &reference, Side::Right, &ctx).is_none());
        // Depressing the shoulder is not hiking.
        let depressed = standing_pose(0, &[(Keypoint::LeftShoulder, 180.0, 70.0)]);
        assert!(detect_shoulder_hiking(&depressed, &reference, Side::Left, &ctx).is_none());
    }

    #[test]
    fn test_shoulder_internal_rotation_proxy() {
        let registry = registry();
        let ctx = DetectionContext::new(&registry, PatientLevel::Intermediate, 0.5);
        // Reference forearm horizontal (0 degrees elevation).
        let reference = standing_pose(0, &[(Keypoint::LeftWrist, 245.0, 120.0)]);
        // User forearm drops 30 degrees below horizontal.
        let drop = 30.0f64.to_radians();
        let current = standing_pose(
            0,
            &[(Keypoint::LeftWrist, 185.0 + 60.0 * drop.cos(), 120.0 + 60.0 * drop.sin())],
        );
        let obs =
            detect_shoulder_internal_rotation(&current, &reference, Side::Left, &ctx).unwrap();
        assert!((obs.value - 30.0).abs() < 1e-6);
        assert!(obs.error_type.is_provisional());
        // Raising the forearm is the intended motion.
        let raised = standing_pose(0, &[(Keypoint::LeftWrist, 185.0, 60.0)]);
        assert!(detect_shoulder_internal_rotation(&raised, &reference, Side::Left, &ctx).is_none());
    }

    #[test]
    fn test_incomplete_range_and_compensation_are_opposites() {
        let registry = registry();
        let ctx = DetectionContext::new(&registry, PatientLevel::Intermediate, 0.5);
        // Reference arm horizontal: hip-shoulder-elbow = 90 degrees.
        let reference = standing_pose(
            0,
            &[
                (Keypoint::RightHip, 120.0, 200.0),
                (Keypoint::RightElbow, 60.0, 60.0),
            ],
        );
        // User only reaches 45 degrees.
        let short = standing_pose(
            0,
            &[
                (Keypoint::RightHip, 120.0, 200.0),
                (Keypoint::RightElbow, 60.0, 120.0),
            ],
        );
        let obs = detect_incomplete_shoulder_range(&short, &reference, Side::Right, &ctx).unwrap();
        assert!((obs.value - 45.0).abs() < 1e-9);
        assert!(detect_shoulder_compensation(&short, &reference, Side::Right, &ctx).is_none());

        let comp = detect_shoulder_compensation(&reference, &short, Side::Right, &ctx).unwrap();
        assert_eq!(comp.severity, Severity::Critical);
        assert!(detect_incomplete_shoulder_range(&reference, &short, Side::Right, &ctx).is_none());
    }

    #[test]
    fn test_elbow_drift() {
        let registry = registry();
        let ctx = DetectionContext::new(&registry, PatientLevel::Intermediate, 0.5);
        let reference = standing_pose(0, &[(Keypoint::LeftElbow, 180.0, 120.0)]);
        // Elbow swings 36 px out on a 60 px upper arm: 60% offset.
        let current = standing_pose(0, &[(Keypoint::LeftElbow, 216.0, 108.0)]);
        let obs = detect_elbow_drift(&current, &reference, Side::Left, &ctx).unwrap();
        assert!((obs.value - 60.0).abs() < 1e-9);
        assert_eq!(obs.severity, Severity::Critical);
        assert!(detect_elbow_drift(&reference, &reference, Side::Left, &ctx).is_none());
    }

    #[test]
    fn test_wrist_deviation_outward_only() {
        let registry = registry();
        let ctx = DetectionContext::new(&registry, PatientLevel::Intermediate, 0.5);
        let reference = standing_pose(0, &[]);
        // Right forearm angles 20 degrees outward (toward smaller x on the right side).
        let angle = 20.0f64.to_radians();
        let outward = standing_pose(
            0,
            &[(Keypoint::RightWrist, 115.0 - 60.0 * angle.sin(), 120.0 + 60.0 * angle.cos())],
        );
        let obs = detect_wrist_deviation(&outward, &reference, Side::Right, &ctx).unwrap();
        assert!((obs.value - 20.0).abs() < 1e-6);
        assert_eq!(obs.severity, Severity::Warning);

        let inward = standing_pose(
            0,
            &[(Keypoint::RightWrist, 115.0 + 60.0 * angle.sin(), 120.0 + 60.0 * angle.cos())],
        );
        assert!(detect_wrist_deviation(&inward, &reference, Side::Right, &ctx).is_none());
    }
}
