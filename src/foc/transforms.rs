// Coordinate transformations for FOC (Field Oriented Control)
// Clarke/Park, inverse Park, plus electrical angle helpers

use core::f32::consts::{PI, TAU};
use libm::{floorf, sqrtf};

const ONE_DIV_SQRT3: f32 = 0.577_350_3; // 1 / sqrt(3)

/// Fast (cos, sin) of an angle in radians
///
/// Uses idsp::cossin() (~40 cycles on Cortex-M) instead of libm::cosf/sinf.
/// The angle may be any finite value; it is wrapped to [-π, π) first.
#[inline]
pub fn cos_sin(theta: f32) -> (f32, f32) {
    // idsp phase: i32::MIN..i32::MAX maps to -π..π
    let wrapped = normalize_angle(theta + PI) - PI;

    const SCALE: f32 = 2147483648.0 / PI; // 2^31 / π
    let phase: i32 = (wrapped * SCALE) as i32;

    let (cos_i32, sin_i32) = idsp::cossin(phase);

    const I32_TO_F32: f32 = 1.0 / 2147483648.0; // 1 / 2^31
    (cos_i32 as f32 * I32_TO_F32, sin_i32 as f32 * I32_TO_F32)
}

/// Inverse Park transformation (dq → αβ)
///
/// # Arguments
/// * `vd` - d-axis voltage (aligned with rotor flux)
/// * `vq` - q-axis voltage (produces torque)
/// * `theta` - Electrical angle in radians
///
/// # Returns
/// Tuple of (v_alpha, v_beta) in the stationary frame
pub fn inverse_park(vd: f32, vq: f32, theta: f32) -> (f32, f32) {
    let (cos_theta, sin_theta) = cos_sin(theta);

    let v_alpha = vd * cos_theta - vq * sin_theta;
    let v_beta = vd * sin_theta + vq * cos_theta;

    (v_alpha, v_beta)
}

/// Park transformation (αβ → dq)
pub fn park(i_alpha: f32, i_beta: f32, theta: f32) -> (f32, f32) {
    let (cos_theta, sin_theta) = cos_sin(theta);

    let i_d = i_alpha * cos_theta + i_beta * sin_theta;
    let i_q = -i_alpha * sin_theta + i_beta * cos_theta;

    (i_d, i_q)
}

/// Clarke transformation from two measured phase currents (ab → αβ)
///
/// Assumes a balanced three-phase load (i_a + i_b + i_c = 0).
pub fn clarke(i_a: f32, i_b: f32) -> (f32, f32) {
    let i_alpha = i_a;
    let i_beta = ONE_DIV_SQRT3 * i_a + 2.0 * ONE_DIV_SQRT3 * i_b;
    (i_alpha, i_beta)
}

/// Limit voltage vector to maximum magnitude
///
/// Applies circular limiting in the dq frame so that the magnitude
/// never exceeds `max_voltage`. A non-positive limit yields zero.
pub fn limit_voltage(vd: f32, vq: f32, max_voltage: f32) -> (f32, f32) {
    if !(max_voltage > 0.0) {
        return (0.0, 0.0);
    }

    let magnitude = sqrtf(vd * vd + vq * vq);

    if magnitude > max_voltage {
        let scale = max_voltage / magnitude;
        (vd * scale, vq * scale)
    } else {
        (vd, vq)
    }
}

/// Normalize angle to range [0, 2π)
pub fn normalize_angle(angle: f32) -> f32 {
    let normalized = angle - TAU * floorf(angle / TAU);
    // floorf rounding can land exactly on TAU for tiny negative inputs
    if normalized >= TAU {
        0.0
    } else {
        normalized
    }
}

/// Electrical angle from the (unbounded) mechanical shaft angle
///
/// `mechanical × pole_pairs × direction − zero_offset`, normalized to [0, 2π).
pub fn electrical_angle(mechanical: f32, pole_pairs: u8, direction: f32, zero_offset: f32) -> f32 {
    normalize_angle(mechanical * pole_pairs as f32 * direction - zero_offset)
}
