//! Geometry kernel: angles and distances over keypoints.
//!
//! Every function here is pure and total. Degenerate input (coincident
//! points, zero-length spans, non-finite coordinates) yields 0 instead of NaN
//! so downstream classification never sees an undefined value.

use nalgebra::Vector2;

use crate::types::Position2D;

/// Squared length below which a segment is treated as a single point
const DEGENERATE_EPS: f64 = 1e-12;

/// Angle at vertex `b` formed by `a-b-c`, in degrees within [0, 180].
///
/// Uses the bearing difference `atan2(c - b) - atan2(a - b)`, folded onto the
/// smaller of the two possible angles.
pub fn angle_at_vertex(a: &Position2D, b: &Position2D, c: &Position2D) -> f64 {
    if !(a.is_finite() && b.is_finite() && c.is_finite()) {
        return 0.0;
    }
    let ba = a.to_nalgebra() - b.to_nalgebra();
    let bc = c.to_nalgebra() - b.to_nalgebra();
    if ba.norm_squared() < DEGENERATE_EPS || bc.norm_squared() < DEGENERATE_EPS {
        return 0.0;
    }

    let radians = bc.y.atan2(bc.x) - ba.y.atan2(ba.x);
    let mut degrees = radians.to_degrees().abs();
    if degrees > 180.0 {
        degrees = 360.0 - degrees;
    }
    degrees.clamp(0.0, 180.0)
}

/// Euclidean distance between two points
pub fn distance(p: &Position2D, q: &Position2D) -> f64 {
    let d = p.distance_to(q);
    if d.is_finite() {
        d
    } else {
        0.0
    }
}

/// Convert an on-screen offset to physical units using a known reference
/// span (stance width, limb length) measured in the same frame.
pub fn pixels_to_physical_units(
    pixels: f64,
    reference_span_pixels: f64,
    reference_span_physical: f64,
) -> f64 {
    if !reference_span_pixels.is_finite() || reference_span_pixels.abs() < DEGENERATE_EPS {
        return 0.0;
    }
    let value = pixels * reference_span_physical / reference_span_pixels;
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// `value` expressed as a percentage of `span`; 0 when the span is degenerate
pub fn percent_of_span(value: f64, span: f64) -> f64 {
    pixels_to_physical_units(value, span, 100.0)
}

pub fn midpoint(p: &Position2D, q: &Position2D) -> Position2D {
    Position2D::new((p.x + q.x) / 2.0, (p.y + q.y) / 2.0)
}

/// Signed inclination of the segment `bottom -> top` from image vertical, in
/// degrees. Positive when `top` sits to the right of `bottom`.
pub fn inclination_from_vertical(top: &Position2D, bottom: &Position2D) -> f64 {
    let v = Vector2::new(top.x - bottom.x, bottom.y - top.y);
    if !v.x.is_finite() || !v.y.is_finite() || v.norm_squared() < DEGENERATE_EPS {
        return 0.0;
    }
    v.x.atan2(v.y).to_degrees()
}

/// Signed angle rotating `from` onto `to`, in degrees within (-180, 180].
/// Positive is counter-clockwise in a y-up frame (clockwise on screen).
pub fn signed_angle_between(from: &Vector2<f64>, to: &Vector2<f64>) -> f64 {
    if from.norm_squared() < DEGENERATE_EPS || to.norm_squared() < DEGENERATE_EPS {
        return 0.0;
    }
    let cross = from.x * to.y - from.y * to.x;
    let angle = cross.atan2(from.dot(to)).to_degrees();
    if angle.is_finite() {
        angle
    } else {
        0.0
    }
}

/// Direction vector from `from` to `to`
pub fn segment(from: &Position2D, to: &Position2D) -> Vector2<f64> {
    to.to_nalgebra() - from.to_nalgebra()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn p(x: f64, y: f64) -> Position2D {
        Position2D::new(x, y)
    }

    #[test]
    fn test_right_angle() {
        let angle = angle_at_vertex(&p(0.0, 0.0), &p(1.0, 0.0), &p(1.0, 1.0));
        assert!((angle - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_straight_and_folded() {
        assert!((angle_at_vertex(&p(0.0, 0.0), &p(1.0, 0.0), &p(2.0, 0.0)) - 180.0).abs() < 1e-9);
        assert!(angle_at_vertex(&p(2.0, 0.0), &p(0.0, 0.0), &p(1.0, 0.0)).abs() < 1e-9);
    }

    #[test]
    fn test_reflex_folds_to_smaller_angle() {
        // Bearings of -135 and +135 degrees differ by 270; the smaller angle is 90.
        let angle = angle_at_vertex(&p(-1.0, -1.0), &p(0.0, 0.0), &p(-1.0, 1.0));
        assert!((angle - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_inputs_return_zero() {
        let a = p(3.0, 4.0);
        assert_eq!(angle_at_vertex(&a, &a, &p(5.0, 5.0)), 0.0);
        assert_eq!(angle_at_vertex(&p(f64::NAN, 0.0), &a, &p(5.0, 5.0)), 0.0);
        assert_eq!(pixels_to_physical_units(10.0, 0.0, 30.0), 0.0);
        assert_eq!(percent_of_span(5.0, 0.0), 0.0);
        assert_eq!(inclination_from_vertical(&a, &a), 0.0);
        assert_eq!(signed_angle_between(&Vector2::zeros(), &Vector2::new(1.0, 0.0)), 0.0);
    }

    #[test]
    fn test_pixels_to_physical_units() {
        // 40 px stance width is 30 cm, so 8 px is 6 cm.
        assert!((pixels_to_physical_units(8.0, 40.0, 30.0) - 6.0).abs() < 1e-12);
        assert_eq!(percent_of_span(12.0, 100.0), 12.0);
    }

    #[test]
    fn test_inclination_from_vertical() {
        assert!(inclination_from_vertical(&p(0.0, 0.0), &p(0.0, 10.0)).abs() < 1e-12);
        let lean = inclination_from_vertical(&p(10.0, 0.0), &p(0.0, 10.0));
        assert!((lean - 45.0).abs() < 1e-9);
        let other = inclination_from_vertical(&p(-10.0, 0.0), &p(0.0, 10.0));
        assert!((other + 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_signed_angle_between() {
        let x = Vector2::new(1.0, 0.0);
        let y = Vector2::new(0.0, 1.0);
        assert!((signed_angle_between(&x, &y) - 90.0).abs() < 1e-9);
        assert!((signed_angle_between(&y, &x) + 90.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_angle_symmetric_and_bounded(
            ax in -500.0f64..500.0, ay in -500.0f64..500.0,
            bx in -500.0f64..500.0, by in -500.0f64..500.0,
            cx in -500.0f64..500.0, cy in -500.0f64..500.0,
        ) {
            let (a, b, c) = (p(ax, ay), p(bx, by), p(cx, cy));
            let forward = angle_at_vertex(&a, &b, &c);
            let swapped = angle_at_vertex(&c, &b, &a);
            prop_assert!(forward.is_finite());
            prop_assert!((0.0..=180.0).contains(&forward));
            prop_assert!((forward - swapped).abs() < 1e-9);
        }

        #[test]
        fn prop_collinear_is_zero_or_straight(
            bx in -100.0f64..100.0, by in -100.0f64..100.0,
            dx in 1.0f64..10.0, dy in -10.0f64..10.0,
            s in 1i32..20, t in -20i32..20,
        ) {
            prop_assume!(t != 0);
            let b = p(bx, by);
            let a = p(bx + dx * f64::from(s), by + dy * f64::from(s));
            let c = p(bx + dx * f64::from(t), by + dy * f64::from(t));
            let angle = angle_at_vertex(&a, &b, &c);
            prop_assert!(!angle.is_nan());
            prop_assert!(angle < 1e-6 || (angle - 180.0).abs() < 1e-6);
        }
    }
}
