// Space Vector PWM (SVPWM) phase voltage generation
//
// Based on the calebfletcher/foc approach:
// https://github.com/calebfletcher/foc
//
// Uses the x/y/z coordinate transform and sign-based sector detection
// instead of trigonometric functions. Outputs are phase voltages in
// [0, v_ref] centered on v_ref / 2, ready for the driver's duty conversion.

const SQRT3: f32 = 1.732_050_8; // sqrt(3)

/// Space vector modulation of an αβ voltage command
///
/// # Arguments
/// * `v_alpha` - Alpha-axis voltage command (volts)
/// * `v_beta` - Beta-axis voltage command (volts)
/// * `v_ref` - Reference voltage the phases swing over, normally `min(voltage_limit, supply)`
///
/// # Returns
/// `[v_u, v_v, v_w]`, each in `[0, v_ref]`
pub fn space_vector(v_alpha: f32, v_beta: f32, v_ref: f32) -> [f32; 3] {
    if !(v_ref > 0.0) {
        return [0.0; 3];
    }

    let v_alpha_norm = v_alpha / v_ref;
    let v_beta_norm = v_beta / v_ref;

    let sqrt_3_alpha = SQRT3 * v_alpha_norm;
    let x = v_beta_norm;
    let y = (v_beta_norm + sqrt_3_alpha) / 2.0;
    let z = (v_beta_norm - sqrt_3_alpha) / 2.0;

    let sector: u8 = match (x >= 0.0, y >= 0.0, z >= 0.0) {
        (true, true, false) => 1,
        (_, true, true) => 2,
        (true, false, true) => 3,
        (false, false, true) => 4,
        (_, false, false) => 5,
        (false, true, false) => 6,
    };

    // ta, tb, tc in [-1, 1]
    let (ta, tb, tc) = match sector {
        1 | 4 => (x - z, x + z, -x + z),
        2 | 5 => (y - z, y + z, -y - z),
        _ => (y - x, -y + x, -y - x),
    };

    [
        ((ta + 1.0) / 2.0 * v_ref).clamp(0.0, v_ref),
        ((tb + 1.0) / 2.0 * v_ref).clamp(0.0, v_ref),
        ((tc + 1.0) / 2.0 * v_ref).clamp(0.0, v_ref),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_svpwm_zero_voltage_is_centered() {
        let [u, v, w] = space_vector(0.0, 0.0, 12.0);
        assert!(approx_eq(u, 6.0));
        assert!(approx_eq(v, 6.0));
        assert!(approx_eq(w, 6.0));
    }

    #[test]
    fn test_svpwm_sector1() {
        let [u, v, w] = space_vector(6.0, 0.0, 12.0);
        assert!(u > v && u > w);
    }

    #[test]
    fn test_svpwm_stays_within_reference() {
        for step in 0..36 {
            let theta = step as f32 * 10.0_f32.to_radians();
            let [u, v, w] = space_vector(20.0 * theta.cos(), 20.0 * theta.sin(), 7.0);
            for phase in [u, v, w] {
                assert!((0.0..=7.0).contains(&phase));
            }
        }
    }

    #[test]
    fn test_svpwm_alpha_only_is_symmetric() {
        let [u, v, w] = space_vector(2.0, 0.0, 12.0);
        assert!(u > 6.0);
        assert!(approx_eq(v, w));
    }

    #[test]
    fn test_zero_reference_is_off() {
        assert_eq!(space_vector(3.0, 1.0, 0.0), [0.0; 3]);
        assert_eq!(space_vector(3.0, 1.0, -1.0), [0.0; 3]);
    }
}
