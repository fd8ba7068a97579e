//! 多回転トラッキングと速度推定
//!
//! 生カウンタの差分が半周を超えたら±1回転のラップとみなして補正する。
//! 角度は回転数と1回転内カウントから組み立てる。

use core::f32::consts::TAU;

use crate::foc::LowPassFilter;

/// 回転数カウンタ
#[derive(Debug, Clone, Copy)]
pub struct RevolutionCounter {
    /// 1回転あたりのカウント数
    cpr: i32,
    raw: u16,
    rotations: i32,
    /// 初回読み取り前
    primed: bool,
}

impl RevolutionCounter {
    pub const fn new(bits: u8) -> Self {
        Self {
            cpr: 1 << bits,
            raw: 0,
            rotations: 0,
            primed: false,
        }
    }

    /// 新しい生カウントを取り込み、ラップ補正後の差分カウントを返す
    ///
    /// 初回は差分0（ラップ補正なし）。
    pub fn update(&mut self, raw: u16) -> i32 {
        let raw = raw as i32 & (self.cpr - 1);
        if !self.primed {
            self.primed = true;
            self.raw = raw as u16;
            return 0;
        }

        let half = self.cpr / 2;
        let mut delta = raw - self.raw as i32;
        if delta > half {
            // 0 → max を跨いだ（逆転）
            self.rotations -= 1;
            delta -= self.cpr;
        } else if delta < -half {
            // max → 0 を跨いだ（正転）
            self.rotations += 1;
            delta += self.cpr;
        }

        self.raw = raw as u16;
        delta
    }

    pub fn raw(&self) -> u16 {
        self.raw
    }

    pub fn rotations(&self) -> i32 {
        self.rotations
    }

    /// 1カウントあたりの角度 [rad]
    pub fn radians_per_count(&self) -> f32 {
        TAU / self.cpr as f32
    }

    /// 1回転内の角度 [rad]
    pub fn sensor_angle(&self) -> f32 {
        self.raw as f32 * self.radians_per_count()
    }

    /// 多回転角度 [rad]
    pub fn angle(&self) -> f32 {
        self.rotations as f32 * TAU + self.sensor_angle()
    }
}

/// タイムスタンプ付き差分からの角速度推定
pub struct VelocityEstimator {
    prev_us: Option<u64>,
    tf: f32,
    lpf: LowPassFilter,
    velocity: f32,
}

impl VelocityEstimator {
    pub const fn new(tf: f32) -> Self {
        Self {
            prev_us: None,
            tf,
            lpf: LowPassFilter::new(),
            velocity: 0.0,
        }
    }

    /// 差分カウントと時刻から速度を更新
    pub fn update(&mut self, delta_counts: i32, radians_per_count: f32, now_us: u64) {
        let Some(prev_us) = self.prev_us.replace(now_us) else {
            return;
        };
        if now_us <= prev_us {
            // 時刻が進んでいなければ前回値を維持
            return;
        }

        let dt = (now_us - prev_us) as f32 * 1e-6;
        let raw_velocity = delta_counts as f32 * radians_per_count / dt;
        self.velocity = self.lpf.filter(raw_velocity, self.tf, dt);
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    pub fn reset(&mut self) {
        self.prev_us = None;
        self.lpf.reset();
        self.velocity = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(rc: &RevolutionCounter) -> i64 {
        rc.rotations() as i64 * 16384 + rc.raw() as i64
    }

    #[test]
    fn test_first_update_has_zero_delta() {
        let mut rc = RevolutionCounter::new(14);
        assert_eq!(rc.update(16000), 0);
        assert_eq!(rc.rotations(), 0);
    }

    #[test]
    fn test_backward_wrap() {
        let mut rc = RevolutionCounter::new(14);
        rc.update(3);
        assert_eq!(rc.update(16380), -7);
        assert_eq!(rc.rotations(), -1);
        assert_eq!(counts(&rc), -4);
    }

    #[test]
    fn test_constant_forward_rotation_is_monotonic() {
        let mut rc = RevolutionCounter::new(14);
        let mut raw: u16 = 16000;
        let mut prev = {
            rc.update(raw);
            counts(&rc)
        };
        for _ in 0..1000 {
            raw = (raw + 700) % 16384;
            rc.update(raw);
            let now = counts(&rc);
            assert_eq!(now - prev, 700);
            prev = now;
        }
    }

    #[test]
    fn test_velocity_ignores_stalled_clock() {
        let mut v = VelocityEstimator::new(0.0);
        v.update(0, 1.0, 100);
        v.update(10, 1.0, 1_100);
        assert!((v.velocity() - 10_000.0).abs() < 1e-2);
        v.update(50, 1.0, 1_100);
        assert!((v.velocity() - 10_000.0).abs() < 1e-2);
    }
}
