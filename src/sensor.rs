//! 磁気角度センサ
//!
//! `AngleSensor`はレジスタから生カウントを読むだけのハードウェア層。
//! `Encoder`がそれをラップし、多回転角度と角速度を追跡する。

pub mod mt6701;
pub mod tracker;

pub use mt6701::Mt6701;
pub use tracker::{RevolutionCounter, VelocityEstimator};

use crate::fmt::*;

/// センサ読み取りエラー（一時的、次周期で再試行）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    /// デバイスがACKを返さない
    NoAcknowledge,
    /// その他のバスエラー（アービトレーション、タイムアウト等）
    Bus,
}

/// 生カウントを返す角度センサ
pub trait AngleSensor {
    /// カウンタのビット幅
    fn resolution_bits(&self) -> u8;

    /// 1回分のカウンタ値を読む（`0..2^bits`）
    fn read_raw_count(&mut self) -> Result<u16, SensorError>;
}

/// 1回のサンプル
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AngleSample {
    /// 生カウンタ値
    pub raw: u16,
    /// 1回転内のセンサ角度 [rad]、[0, 2π)
    pub sensor_angle: f32,
    /// 多回転角度 [rad]
    pub angle: f32,
    /// 角速度 [rad/s]（フィルタ済み）
    pub velocity: f32,
}

/// 多回転トラッキング付きエンコーダ
pub struct Encoder<S: AngleSensor> {
    sensor: S,
    revolutions: RevolutionCounter,
    velocity: VelocityEstimator,
}

impl<S: AngleSensor> Encoder<S> {
    /// エンコーダを初期化
    ///
    /// # Arguments
    /// * `sensor` - 初期化済みのセンサ（バス設定は呼び出し側）
    /// * `velocity_tf` - 速度LPF時定数 [s]
    pub fn new(sensor: S, velocity_tf: f32) -> Self {
        let bits = sensor.resolution_bits();
        info!("encoder: {} bit, cpr {}", bits, 1u32 << bits);
        Self {
            sensor,
            revolutions: RevolutionCounter::new(bits),
            velocity: VelocityEstimator::new(velocity_tf),
        }
    }

    /// センサを読んで状態を更新
    ///
    /// 読み取り失敗時は回転数・角度を変えずにエラーを返す（最後の有効値を保持）。
    pub fn update(&mut self, now_us: u64) -> Result<AngleSample, SensorError> {
        let raw = self.sensor.read_raw_count()?;
        let delta = self.revolutions.update(raw);
        self.velocity
            .update(delta, self.revolutions.radians_per_count(), now_us);
        Ok(self.sample())
    }

    /// 最後に有効だったサンプル
    pub fn sample(&self) -> AngleSample {
        AngleSample {
            raw: self.revolutions.raw(),
            sensor_angle: self.revolutions.sensor_angle(),
            angle: self.revolutions.angle(),
            velocity: self.velocity.velocity(),
        }
    }

    /// 多回転角度 [rad]
    pub fn read_angle(&self) -> f32 {
        self.revolutions.angle()
    }

    /// 角速度 [rad/s]、2サンプル未満なら0
    pub fn read_velocity(&self) -> f32 {
        self.velocity.velocity()
    }

    /// 最後に有効だった生カウンタ値
    pub fn read_raw_count(&self) -> u16 {
        self.revolutions.raw()
    }

    /// 回転数 [rev]
    pub fn rotations(&self) -> i32 {
        self.revolutions.rotations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f32::consts::TAU;

    /// 事前に決めた値を順に返す
    struct ScriptedSensor {
        script: &'static [Option<u16>],
        next: usize,
    }

    impl AngleSensor for ScriptedSensor {
        fn resolution_bits(&self) -> u8 {
            14
        }

        fn read_raw_count(&mut self) -> Result<u16, SensorError> {
            let value = self.script[self.next.min(self.script.len() - 1)];
            self.next += 1;
            value.ok_or(SensorError::Bus)
        }
    }

    fn encoder(script: &'static [Option<u16>]) -> Encoder<ScriptedSensor> {
        Encoder::new(ScriptedSensor { script, next: 0 }, 0.0)
    }

    const COUNT: f32 = TAU / 16384.0;

    #[test]
    fn test_wrap_forward_is_small_positive_step() {
        let mut enc = encoder(&[Some(16383), Some(2)]);
        let a = enc.update(0).unwrap().angle;
        let b = enc.update(1_000).unwrap().angle;
        assert!(((b - a) - 3.0 * COUNT).abs() < 1e-5);
        assert_eq!(enc.rotations(), 1);
    }

    #[test]
    fn test_mixed_sequence_has_no_large_jumps() {
        let mut enc = encoder(&[Some(100), Some(150), Some(16380), Some(20)]);
        let mut angles = [0.0f32; 4];
        for (i, angle) in angles.iter_mut().enumerate() {
            *angle = enc.update(i as u64 * 1_000).unwrap().angle;
        }
        let deltas = [
            (angles[1] - angles[0]) / COUNT,
            (angles[2] - angles[1]) / COUNT,
            (angles[3] - angles[2]) / COUNT,
        ];
        assert!((deltas[0] - 50.0).abs() < 0.01);
        assert!((deltas[1] + 154.0).abs() < 0.01);
        assert!((deltas[2] - 24.0).abs() < 0.01);
    }

    #[test]
    fn test_read_angle_is_idempotent() {
        let mut enc = encoder(&[Some(4000), Some(4000)]);
        enc.update(0).unwrap();
        let first = enc.read_angle();
        assert_eq!(enc.read_angle(), first);
        enc.update(1_000).unwrap();
        assert_eq!(enc.read_angle(), first);
    }

    #[test]
    fn test_read_error_keeps_last_value() {
        let mut enc = encoder(&[Some(16000), None, Some(100)]);
        let before = enc.update(0).unwrap();
        assert_eq!(enc.update(1_000), Err(SensorError::Bus));
        assert_eq!(enc.read_raw_count(), 16000);
        assert_eq!(enc.read_angle(), before.angle);

        // the next good read is still a forward wrap, not a spurious one
        enc.update(2_000).unwrap();
        assert_eq!(enc.rotations(), 1);
    }

    #[test]
    fn test_velocity_needs_two_samples() {
        let mut enc = encoder(&[Some(0), Some(164)]);
        assert_eq!(enc.update(0).unwrap().velocity, 0.0);
        let v = enc.update(10_000).unwrap().velocity;
        // 164 counts in 10 ms
        assert!((v - 164.0 * COUNT / 0.01).abs() < 1e-3);
    }
}
