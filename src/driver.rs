//! ブリッジ駆動の抽象化
//!
//! 相電圧指令 [V] を電源電圧に対するデューティ比に変換し、`PwmOutput`へ書き込む。
//! ハードウェア側（TIM1 など）は`PwmOutput`を実装するだけでよい。

use libm::roundf;

use crate::fmt::*;

/// PWM出力ハードウェア
pub trait PwmOutput {
    /// デューティ値の最大（=100%）
    fn max_duty(&self) -> u16;

    /// 各チャネルのデューティを設定
    ///
    /// 2相: `[A+, A-, B+, B-]`、3相: `[U, V, W]`
    fn set_duties(&mut self, duties: &[u16]);

    /// 全チャネルの出力を有効化
    fn enable(&mut self);

    /// 全チャネルの出力を無効化
    fn disable(&mut self);
}

/// ブリッジ構成
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PhaseLayout {
    /// 2相（ステッピングモーター、Hブリッジ×2、4チャネル）
    TwoPhase,
    /// 3相（BLDC、3ハーフブリッジ）
    ThreePhase,
}

/// 相電圧指令 [V]
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PhaseVoltages {
    /// コイル電圧（符号付き、符号でHブリッジのどちらのレグを駆動するか決まる）
    TwoPhase([f32; 2]),
    /// 相電圧（0以上）
    ThreePhase([f32; 3]),
}

/// ドライバ設定
#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    pub layout: PhaseLayout,
    /// PWM周波数 [Hz]（タイマー設定はハードウェア側）
    pub pwm_frequency_hz: u32,
    /// デューティ上限の余白（0.0〜1.0）、上アーム・下アームの貫通防止
    pub dead_zone: f32,
}

/// 相電圧 → デューティ変換つきドライバ
pub struct PhaseDriver<P: PwmOutput> {
    pwm: P,
    config: DriverConfig,
    enabled: bool,
    supply_voltage: f32,
    voltage_limit: f32,
}

impl<P: PwmOutput> PhaseDriver<P> {
    /// ドライバを初期化（デューティ0、出力無効の状態で開始）
    pub fn new(pwm: P, config: DriverConfig, supply_voltage: f32) -> Self {
        let mut driver = Self {
            pwm,
            config: DriverConfig {
                dead_zone: config.dead_zone.clamp(0.0, 1.0),
                ..config
            },
            enabled: false,
            supply_voltage,
            voltage_limit: 0.0,
        };
        driver.disable();
        info!(
            "driver initialized: {:?}, {} Hz, dead zone {}",
            config.layout, config.pwm_frequency_hz, driver.config.dead_zone
        );
        driver
    }

    pub fn layout(&self) -> PhaseLayout {
        self.config.layout
    }

    pub fn pwm(&self) -> &P {
        &self.pwm
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 出力を有効化（デューティは0のまま）
    pub fn enable(&mut self) {
        if !self.enabled {
            self.write_zero();
            self.pwm.enable();
            self.enabled = true;
        }
    }

    /// 全相を即座にデューティ0にして出力を無効化
    pub fn disable(&mut self) {
        self.write_zero();
        self.pwm.disable();
        self.enabled = false;
    }

    /// 電源電圧を更新 [V]
    pub fn set_supply_voltage(&mut self, voltage: f32) {
        self.supply_voltage = voltage;
    }

    /// 電圧リミットを更新 [V]
    pub fn set_voltage_limit(&mut self, limit: f32) {
        self.voltage_limit = limit;
    }

    /// 相電圧を出力
    ///
    /// 各相は `[0, min(voltage_limit, supply)]` にクランプしてからデューティに変換する。
    /// 無効化中は何もしない。
    pub fn set_phase_voltages(&mut self, voltages: &PhaseVoltages) {
        if !self.enabled {
            return;
        }

        match (*voltages, self.config.layout) {
            (PhaseVoltages::TwoPhase([a, b]), PhaseLayout::TwoPhase) => {
                let (a_pos, a_neg) = self.bridge_duties(a);
                let (b_pos, b_neg) = self.bridge_duties(b);
                self.pwm.set_duties(&[a_pos, a_neg, b_pos, b_neg]);
            }
            (PhaseVoltages::ThreePhase([u, v, w]), PhaseLayout::ThreePhase) => {
                let duties = [self.duty(u), self.duty(v), self.duty(w)];
                self.pwm.set_duties(&duties);
            }
            _ => {
                error!("phase voltage layout mismatch, disabling output");
                self.disable();
            }
        }
    }

    /// 符号でレグを選ぶ（正: +側、負: −側）
    fn bridge_duties(&self, voltage: f32) -> (u16, u16) {
        let duty = self.duty(voltage.abs());
        if voltage >= 0.0 {
            (duty, 0)
        } else {
            (0, duty)
        }
    }

    /// 電圧 [V] → デューティ値
    fn duty(&self, voltage: f32) -> u16 {
        if !voltage.is_finite() || !(self.supply_voltage > 0.0) {
            return 0;
        }
        let limit = self.voltage_limit.min(self.supply_voltage).max(0.0);
        let ratio = (voltage.clamp(0.0, limit) / self.supply_voltage).min(1.0 - self.config.dead_zone);
        let max_duty = self.pwm.max_duty() as f32;
        roundf(ratio * max_duty).clamp(0.0, max_duty) as u16
    }

    fn write_zero(&mut self) {
        match self.config.layout {
            PhaseLayout::TwoPhase => self.pwm.set_duties(&[0; 4]),
            PhaseLayout::ThreePhase => self.pwm.set_duties(&[0; 3]),
        }
    }
}
