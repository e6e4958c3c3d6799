//! Lower-body compensation detectors (squat family).

use physio_core::{
    angle_at_vertex, distance, inclination_from_vertical, midpoint, percent_of_span, Keypoint,
    PoseFrame, Side,
};

use super::{DetectionContext, ErrorObservation};
use crate::thresholds::ErrorType;

/// Medial offset of the knee relative to its ankle, as a percentage of stance
/// width. Positive when the knee sits closer to the body midline than the ankle.
fn medial_knee_offset(frame: &PoseFrame, side: Side, min_visibility: f32) -> Option<f64> {
    let knee_kp = side.pick(Keypoint::LeftKnee, Keypoint::RightKnee);
    let [knee, left_ankle, right_ankle] = frame.visible_all(
        [knee_kp, Keypoint::LeftAnkle, Keypoint::RightAnkle],
        min_visibility,
    )?;
    let ankle = match side {
        Side::Right => right_ankle,
        Side::Left | Side::Bilateral => left_ankle,
    };

    let stance_width = (left_ankle.x - right_ankle.x).abs();
    let midline = (left_ankle.x + right_ankle.x) / 2.0;
    let medial = (ankle.x - midline).abs() - (knee.x - midline).abs();
    Some(percent_of_span(medial, stance_width))
}

/// Knee valgus: the knee moves more medially than in the reference.
pub fn detect_knee_valgus(
    current: &PoseFrame,
    reference: &PoseFrame,
    side: Side,
    ctx: &DetectionContext<'_>,
) -> Option<ErrorObservation> {
    let user = medial_knee_offset(current, side, ctx.min_visibility)?;
    let target = medial_knee_offset(reference, side, ctx.min_visibility)?;
    ctx.observe(ErrorType::KneeValgus, user - target, side, current.timestamp)
}

/// Knee varus: the knee moves more laterally than in the reference.
pub fn detect_knee_varus(
    current: &PoseFrame,
    reference: &PoseFrame,
    side: Side,
    ctx: &DetectionContext<'_>,
) -> Option<ErrorObservation> {
    let user = medial_knee_offset(current, side, ctx.min_visibility)?;
    let target = medial_knee_offset(reference, side, ctx.min_visibility)?;
    ctx.observe(ErrorType::KneeVarus, target - user, side, current.timestamp)
}

/// Heel lift: the ankle rises above its reference height, measured in
/// percent of the current shank length. Frames are expected in normalized
/// image coordinates with the reference clip aligned to the user's framing.
pub fn detect_heel_lift(
    current: &PoseFrame,
    reference: &PoseFrame,
    side: Side,
    ctx: &DetectionContext<'_>,
) -> Option<ErrorObservation> {
    let joints = [
        side.pick(Keypoint::LeftKnee, Keypoint::RightKnee),
        side.pick(Keypoint::LeftAnkle, Keypoint::RightAnkle),
    ];
    let [knee, ankle] = current.visible_all(joints, ctx.min_visibility)?;
    let [_, ref_ankle] = reference.visible_all(joints, ctx.min_visibility)?;

    let shank = distance(&knee, &ankle);
    let rise = percent_of_span(ref_ankle.y - ankle.y, shank);
    ctx.observe(ErrorType::HeelLift, rise, side, current.timestamp)
}

/// Posterior pelvic tilt ("butt wink"): at depth, the trunk-thigh angle
/// closes further than in the reference. Only evaluated while the user's hip
/// is at or below knee height.
pub fn detect_posterior_pelvic_tilt(
    current: &PoseFrame,
    reference: &PoseFrame,
    side: Side,
    ctx: &DetectionContext<'_>,
) -> Option<ErrorObservation> {
    let joints = [
        side.pick(Keypoint::LeftShoulder, Keypoint::RightShoulder),
        side.pick(Keypoint::LeftHip, Keypoint::RightHip),
        side.pick(Keypoint::LeftKnee, Keypoint::RightKnee),
    ];
    let [shoulder, hip, knee] = current.visible_all(joints, ctx.min_visibility)?;
    let [ref_shoulder, ref_hip, ref_knee] = reference.visible_all(joints, ctx.min_visibility)?;

    if hip.y < knee.y {
        return None;
    }

    let user = angle_at_vertex(&shoulder, &hip, &knee);
    let target = angle_at_vertex(&ref_shoulder, &ref_hip, &ref_knee);
    ctx.observe(ErrorType::PosteriorPelvicTilt, target - user, side, current.timestamp)
}

/// Signed trunk inclination and the side the trunk leans toward
fn trunk_inclination(frame: &PoseFrame, min_visibility: f32) -> Option<(f64, Side)> {
    let [ls, rs, lh, rh] = frame.visible_all(
        [
            Keypoint::LeftShoulder,
            Keypoint::RightShoulder,
            Keypoint::LeftHip,
            Keypoint::RightHip,
        ],
        min_visibility,
    )?;
    let inclination = inclination_from_vertical(&midpoint(&ls, &rs), &midpoint(&lh, &rh));
    // Positive inclination leans toward larger x; map that to whichever
    // shoulder appears on that side of the image.
    let toward_left = (inclination > 0.0) == (ls.x > rs.x);
    let side = if toward_left { Side::Left } else { Side::Right };
    Some((inclination, side))
}

/// Trunk lean: the trunk inclines further from vertical than the reference.
/// Evaluated once for the whole body; the reported side is the lean direction.
pub fn detect_trunk_lean(
    current: &PoseFrame,
    reference: &PoseFrame,
    ctx: &DetectionContext<'_>,
) -> Option<ErrorObservation> {
    let (user, side) = trunk_inclination(current, ctx.min_visibility)?;
    let (target, _) = trunk_inclination(reference, ctx.min_visibility)?;
    ctx.observe(
        ErrorType::TrunkLean,
        user.abs() - target.abs(),
        side,
        current.timestamp,
    )
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
    fn test_knee_valgus_critical_at_ceiling() {
        // Stance width 100 px. User knee 12 px medial of the ankle (12%),
        // reference knee 2 px medial (2%): a 10 point deviation.
        let registry = registry();
        let ctx = DetectionContext::new(&registry, PatientLevel::Intermediate, 0.5);
        let reference = standing_pose(0, &[(Keypoint::LeftKnee, 198.0, 300.0)]);
        let current = standing_pose(40, &[(Keypoint::LeftKnee, 188.0, 300.0)]);

        let obs = detect_knee_valgus(&current, &reference, Side::Left, &ctx).unwrap();
        assert_eq!(obs.severity, Severity::Critical);
        assert_eq!(obs.value, 10.0);
        assert_eq!(obs.unit, MeasurementUnit::Percent);
        assert_eq!(obs.side, Side::Left);
        assert_eq!(obs.timestamp, current.timestamp);
    }

    #[test]
    fn test_knee_valgus_warning_band() {
        let registry = registry();
        let ctx = DetectionContext::new(&registry, PatientLevel::Intermediate, 0.5);
        let reference = standing_pose(0, &[]);
        // 11% medial vs 2% reference: deviation 9.
        let current = standing_pose(0, &[(Keypoint::RightKnee, 111.0, 300.0)]);
        let obs = detect_knee_valgus(&current, &reference, Side::Right, &ctx).unwrap();
        assert_eq!(obs.severity, Severity::Warning);
        assert_eq!(obs.value, 9.0);
    }

    #[test]
    fn test_knee_valgus_is_directional() {
        let registry = registry();
        let ctx = DetectionContext::new(&registry, PatientLevel::Intermediate, 0.5);
        let reference = standing_pose(0, &[]);
        // Knee moves laterally instead: varus, not valgus.
        let current = standing_pose(0, &[(Keypoint::LeftKnee, 215.0, 300.0)]);
        assert!(detect_knee_valgus(&current, &reference, Side::Left, &ctx).is_none());
        let varus = detect_knee_varus(&current, &reference, Side::Left, &ctx).unwrap();
        assert_eq!(varus.error_type, ErrorType::KneeVarus);
        assert_eq!(varus.value, 17.0);
        assert_eq!(varus.severity, Severity::Critical);
    }

    #[test]
    fn test_knee_valgus_low_confidence_declines() {
        let registry = registry();
        let ctx = DetectionContext::new(&registry, PatientLevel::Intermediate, 0.5);
        let reference = standing_pose(0, &[]);
        let mut current = standing_pose(0, &[(Keypoint::LeftKnee, 170.0, 300.0)]);
        if let Some(ankle) = current.keypoints[Keypoint::RightAnkle.index()].as_mut() {
            ankle.confidence = 0.3;
        }
        assert!(detect_knee_valgus(&current, &reference, Side::Left, &ctx).is_none());
    }

    #[test]
    fn test_heel_lift() {
        let registry = registry();
        let ctx = DetectionContext::new(&registry, PatientLevel::Intermediate, 0.5);
        let reference = standing_pose(0, &[]);
        // Shank 100 px; ankle 12 px higher than reference.
        let current = standing_pose(
            0,
            &[
                (Keypoint::LeftKnee, 200.0, 288.0),
                (Keypoint::LeftAnkle, 200.0, 388.0),
            ],
        );
        let obs = detect_heel_lift(&current, &reference, Side::Left, &ctx).unwrap();
        assert_eq!(obs.value, 12.0);
        assert_eq!(obs.severity, Severity::Critical);
        // Ankle lower than the reference is not a heel lift.
        let sunk = standing_pose(0, &[(Keypoint::LeftAnkle, 200.0, 420.0)]);
        assert!(detect_heel_lift(&sunk, &reference, Side::Left, &ctx).is_none());
    }

    #[test]
    fn test_posterior_pelvic_tilt_only_at_depth() {
        let registry = registry();
        let ctx = DetectionContext::new(&registry, PatientLevel::Intermediate, 0.5);
        // Reference at depth: shoulder straight above the hip, thigh horizontal (90 degrees).
        let reference = standing_pose(
            0,
            &[
                (Keypoint::LeftShoulder, 170.0, 200.0),
                (Keypoint::LeftHip, 170.0, 300.0),
                (Keypoint::LeftKnee, 270.0, 300.0),
            ],
        );
        // User collapses the trunk forward over the thigh: 45 degrees.
        let current = standing_pose(
            0,
            &[
                (Keypoint::LeftShoulder, 270.0, 200.0),
                (Keypoint::LeftHip, 170.0, 300.0),
                (Keypoint::LeftKnee, 270.0, 300.0),
            ],
        );
        let obs = detect_posterior_pelvic_tilt(&current, &reference, Side::Left, &ctx).unwrap();
        assert!((obs.value - 45.0).abs() < 1e-9);
        assert_eq!(obs.severity, Severity::Critical);

        // Same trunk collapse while still above parallel is ignored.
        let shallow = standing_pose(
            0,
            &[
                (Keypoint::LeftShoulder, 270.0, 150.0),
                (Keypoint::LeftHip, 170.0, 250.0),
                (Keypoint::LeftKnee, 270.0, 300.0),
            ],
        );
        assert!(detect_posterior_pelvic_tilt(&shallow, &reference, Side::Left, &ctx).is_none());
    }

    #[test]
    fn test_trunk_lean_reports_direction() {
        let registry = registry();
        let ctx = DetectionContext::new(&registry, PatientLevel::Intermediate, 0.5);
        let reference = standing_pose(0, &[]);
        // Shoulders shift 140 px toward the left shoulder's side of the image.
        let current = standing_pose(
            0,
            &[
                (Keypoint::LeftShoulder, 320.0, 60.0),
                (Keypoint::RightShoulder, 260.0, 60.0),
            ],
        );
        let obs = detect_trunk_lean(&current, &reference, &ctx).unwrap();
        assert_eq!(obs.side, Side::Left);
        assert_eq!(obs.severity, Severity::Critical);
        let expected = 140.0f64.atan2(140.0).to_degrees();
        assert!((obs.value - expected).abs() < 1e-9);
    }
}
