use glam::{DQuat, Quat, Vec3, Vec4};

/// Source units are meters, engine units are centimeters.
pub const UNIT_SCALE: f32 = 100.0;

/// Zero-order spherical harmonic basis constant.
#[allow(clippy::excessive_precision)]
pub const SH_C0: f32 = 0.28209479177387814;

/// Highest `f_rest_N` index (exclusive) looked up in a header, degree 3.
pub const MAX_SH_REST: usize = 45;

// Largest f32 below 1.0.
const SIGMOID_MAX: f32 = 1.0 - f32::EPSILON / 2.0;

/// Logistic sigmoid, kept inside the open interval (0, 1) even when the f32
/// result would saturate.
#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    let y = 1.0 / (1.0 + (-x).exp());
    if y.is_nan() {
        return 0.5;
    }
    y.clamp(f32::MIN_POSITIVE, SIGMOID_MAX)
}

/// Right-handed Y-up meters to left-handed Z-up centimeters.
#[inline]
pub fn convert_position(x: f32, y: f32, z: f32) -> Vec3 {
    Vec3::new(x, -z, -y) * UNIT_SCALE
}

#[inline]
pub fn convert_scale(s0: f32, s1: f32, s2: f32) -> Vec3 {
    Vec3::new(sigmoid(s0), sigmoid(s1), sigmoid(s2)) * UNIT_SCALE
}

/// Raw order is (w, x, y, z). A zero or non-finite quaternion maps to identity.
///
/// The length is taken in f64 so very large or very small f32 components
/// neither overflow nor underflow.
#[inline]
pub fn convert_orientation(w: f32, x: f32, y: f32, z: f32) -> Quat {
    let q = DQuat::from_xyzw(x as f64, y as f64, z as f64, w as f64);
    let len = q.length();
    if len == 0.0 || !len.is_finite() {
        return Quat::IDENTITY;
    }
    (q * len.recip()).as_quat()
}

#[inline]
pub fn convert_opacity(raw: f32) -> f32 {
    sigmoid(raw)
}

/// Linear color from the zero-order coefficients, alpha is the already
/// activated opacity.
#[inline]
pub fn sh_to_color(sh0: Vec3, opacity: f32) -> Vec4 {
    let rgb = (sh0 * SH_C0 + Vec3::splat(0.5)).clamp(Vec3::ZERO, Vec3::ONE);
    rgb.extend(opacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_swaps_axes_and_scales() {
        let p = convert_position(1.0, 2.0, 3.0);
        assert_eq!(p, Vec3::new(100.0, -300.0, -200.0));
    }

    #[test]
    fn orientation_is_unit_length() {
        let inputs = [
            (1.0, 0.0, 0.0, 0.0),
            (0.5, 0.5, 0.5, 0.5),
            (3.0, -4.0, 12.0, 0.1),
            (1e-3, 2e-3, 0.0, 0.0),
            (-7.5, 1e6, 3.0, -2.0),
        ];
        for (w, x, y, z) in inputs {
            let q = convert_orientation(w, x, y, z);
            assert!((q.length() - 1.0).abs() < 1e-5, "{:?} -> {:?}", (w, x, y, z), q);
        }
    }

    #[test]
    fn orientation_keeps_raw_component_order() {
        let q = convert_orientation(2.0, 0.0, 0.0, 0.0);
        assert_eq!(q, Quat::IDENTITY);
        let q = convert_orientation(0.0, 0.0, 0.0, 5.0);
        assert_eq!(q, Quat::from_xyzw(0.0, 0.0, 1.0, 0.0));
    }

    #[test]
    fn zero_quaternion_becomes_identity() {
        assert_eq!(convert_orientation(0.0, 0.0, 0.0, 0.0), Quat::IDENTITY);
        assert_eq!(convert_orientation(f32::NAN, 0.0, 0.0, 0.0), Quat::IDENTITY);
        assert_eq!(convert_orientation(f32::INFINITY, 0.0, 0.0, 0.0), Quat::IDENTITY);
    }

    #[test]
    fn extreme_magnitudes_keep_their_rotation() {
        let x_axis = Quat::from_xyzw(1.0, 0.0, 0.0, 0.0);
        assert_eq!(convert_orientation(0.0, 1e20, 0.0, 0.0), x_axis);
        assert_eq!(convert_orientation(0.0, 1e-23, 0.0, 0.0), x_axis);
        assert_eq!(convert_orientation(0.0, f32::MAX, 0.0, 0.0), x_axis);
        assert_eq!(convert_orientation(0.0, f32::from_bits(1), 0.0, 0.0), x_axis);

        let q = convert_orientation(3e30, 0.0, 4e30, 0.0);
        assert!(q.abs_diff_eq(Quat::from_xyzw(0.0, 0.8, 0.0, 0.6), 1e-6));
        let q = convert_orientation(3e-30, 0.0, 4e-30, 0.0);
        assert!(q.abs_diff_eq(Quat::from_xyzw(0.0, 0.8, 0.0, 0.6), 1e-6));
    }

    #[test]
    fn activations_stay_in_range() {
        for v in [-1e30, -500.0, -88.0, -10.0, -1.0, 0.0, 1.0, 10.0, 88.0, 500.0, 1e30] {
            let o = convert_opacity(v);
            assert!(o > 0.0 && o < 1.0, "opacity({}) = {}", v, o);
            let s = convert_scale(v, v, v);
            assert!(s.x > 0.0 && s.x <= 100.0, "scale({}) = {}", v, s.x);
        }
        assert_eq!(convert_opacity(0.0), 0.5);
    }

    #[test]
    fn color_is_clamped() {
        let c = sh_to_color(Vec3::new(0.0, 10.0, -10.0), 0.25);
        assert_eq!(c, Vec4::new(0.5, 1.0, 0.0, 0.25));
    }
}
