// First-order low-pass filter

/// Exponential low-pass filter with time constant `tf`
///
/// `y = α·y_prev + (1 − α)·x`, `α = tf / (tf + dt)`.
pub struct LowPassFilter {
    y_prev: f32,
    primed: bool,
}

/// Gaps longer than this reset the filter to the raw input [s]
const STALE_GAP: f32 = 0.3;

impl LowPassFilter {
    pub const fn new() -> Self {
        Self {
            y_prev: 0.0,
            primed: false,
        }
    }

    pub fn filter(&mut self, x: f32, tf: f32, dt: f32) -> f32 {
        if !x.is_finite() {
            return self.y_prev;
        }
        if !self.primed || !(tf > 0.0) || !(dt > 0.0) || dt > STALE_GAP {
            self.y_prev = x;
            self.primed = true;
            return x;
        }

        let alpha = tf / (tf + dt);
        self.y_prev = alpha * self.y_prev + (1.0 - alpha) * x;
        self.y_prev
    }

    pub fn value(&self) -> f32 {
        self.y_prev
    }

    pub fn reset(&mut self) {
        self.y_prev = 0.0;
        self.primed = false;
    }
}

impl Default for LowPassFilter {
    fn default() -> Self {
        Self::new()
    }
}
