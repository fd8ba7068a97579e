// PID controller with integral clamping and output ramp

/// One PID gain set as carried on the bus
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidGains {
    /// Proportional gain
    pub p: f32,
    /// Integral gain
    pub i: f32,
    /// Derivative gain
    pub d: f32,
    /// Maximum output change per second (0 = unlimited)
    pub ramp: f32,
    /// Output low-pass filter time constant in seconds (0 = unfiltered)
    pub tf: f32,
}

impl PidGains {
    pub const fn new(p: f32, i: f32, d: f32, ramp: f32, tf: f32) -> Self {
        Self { p, i, d, ramp, tf }
    }
}

/// PID controller
///
/// The integral uses the trapezoidal rule and is clamped to the output
/// limit, so it can never wind up past what the stage is allowed to emit.
/// The ramp caps `|Δoutput|` to `ramp × dt` per update.
pub struct PidController {
    integral: f32,
    error_prev: f32,
    output_prev: f32,
}

impl PidController {
    pub const fn new() -> Self {
        Self {
            integral: 0.0,
            error_prev: 0.0,
            output_prev: 0.0,
        }
    }

    /// Update the controller
    ///
    /// # Arguments
    /// * `gains` - Gain set to use for this step
    /// * `error` - Setpoint minus measurement
    /// * `limit` - Symmetric output limit (±limit)
    /// * `dt` - Time step (seconds)
    ///
    /// # Returns
    /// Controller output in `[-limit, limit]`
    pub fn update(&mut self, gains: &PidGains, error: f32, limit: f32, dt: f32) -> f32 {
        let limit = if limit.is_finite() { limit.abs() } else { 0.0 };
        if !error.is_finite() || !(dt > 0.0) {
            return self.output_prev.clamp(-limit, limit);
        }

        let p_term = gains.p * error;

        self.integral += gains.i * dt * 0.5 * (error + self.error_prev);
        self.integral = self.integral.clamp(-limit, limit);

        let d_term = gains.d * (error - self.error_prev) / dt;

        let mut output = (p_term + self.integral + d_term).clamp(-limit, limit);

        if gains.ramp > 0.0 {
            let max_step = gains.ramp * dt;
            output = output.clamp(self.output_prev - max_step, self.output_prev + max_step);
        }

        self.error_prev = error;
        self.output_prev = output;
        output
    }

    /// Reset the integral and history to zero
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.error_prev = 0.0;
        self.output_prev = 0.0;
    }

    /// Get the last output
    pub fn output(&self) -> f32 {
        self.output_prev
    }

    /// Get the current integral term
    pub fn integral(&self) -> f32 {
        self.integral
    }
}

impl Default for PidController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 0.001;

    #[test]
    fn test_proportional_only() {
        let gains = PidGains::new(2.0, 0.0, 0.0, 0.0, 0.0);
        let mut pid = PidController::new();
        assert_eq!(pid.update(&gains, 1.5, 10.0, DT), 3.0);
    }

    #[test]
    fn test_output_is_limited() {
        let gains = PidGains::new(100.0, 0.0, 0.0, 0.0, 0.0);
        let mut pid = PidController::new();
        assert_eq!(pid.update(&gains, 1.0, 7.0, DT), 7.0);
        assert_eq!(pid.update(&gains, -1.0, 7.0, DT), -7.0);
    }

    #[test]
    fn test_integral_does_not_wind_up() {
        let gains = PidGains::new(0.1, 1000.0, 0.0, 0.0, 0.0);
        let mut pid = PidController::new();
        for _ in 0..10_000 {
            pid.update(&gains, 5.0, 2.0, DT);
        }
        assert_eq!(pid.integral(), 2.0);

        // One step of opposite error must immediately pull the output down
        let out = pid.update(&gains, -5.0, 2.0, DT);
        assert!(out < 2.0);
    }

    #[test]
    fn test_ramp_limits_rate_of_change() {
        let gains = PidGains::new(10.0, 0.0, 0.0, 100.0, 0.0);
        let mut pid = PidController::new();
        // 100 units/s at 1 ms = 0.1 per step
        let out = pid.update(&gains, 1.0, 20.0, DT);
        assert!((out - 0.1).abs() < 1e-6);
        let out = pid.update(&gains, 1.0, 20.0, DT);
        assert!((out - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_nan_error_holds_last_output() {
        let gains = PidGains::new(1.0, 0.0, 0.0, 0.0, 0.0);
        let mut pid = PidController::new();
        pid.update(&gains, 0.5, 10.0, DT);
        assert_eq!(pid.update(&gains, f32::NAN, 10.0, DT), 0.5);
        assert_eq!(pid.integral(), 0.0);
    }

    #[test]
    fn test_reset() {
        let gains = PidGains::new(1.0, 10.0, 0.0, 0.0, 0.0);
        let mut pid = PidController::new();
        pid.update(&gains, 1.0, 10.0, DT);
        pid.reset();
        assert_eq!(pid.output(), 0.0);
        assert_eq!(pid.integral(), 0.0);
    }
}
