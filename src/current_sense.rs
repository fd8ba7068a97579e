//! インライン電流センス
//!
//! シャント抵抗 + アンプの2相をADCで読み、アンペアに換算する。
//! `A = (raw × Vref / full_scale − offset) / R_shunt / gain`

use crate::config::params::current_sense as params;
use crate::fmt::*;

/// 2相ぶんのADC読み取り
pub trait PhaseCurrentAdc {
    /// (相A, 相B) の生ADC値を1回ずつ変換
    fn read_raw(&mut self) -> [u16; 2];
}

/// 電流センスを持たないボード用
pub struct NoCurrentSense;

impl PhaseCurrentAdc for NoCurrentSense {
    fn read_raw(&mut self) -> [u16; 2] {
        [0; 2]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CurrentSenseConfig {
    /// シャント抵抗 [Ω]
    pub shunt_resistance: f32,
    /// アンプゲイン
    pub amp_gain: f32,
    /// ADC基準電圧 [V]
    pub vref: f32,
    /// ADCフルスケール（12bit = 4096）
    pub full_scale: f32,
}

impl Default for CurrentSenseConfig {
    fn default() -> Self {
        Self {
            shunt_resistance: params::DEFAULT_SHUNT_RESISTANCE,
            amp_gain: params::DEFAULT_AMP_GAIN,
            vref: params::ADC_VREF,
            full_scale: params::ADC_FULL_SCALE,
        }
    }
}

/// 相電流 [A]
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhaseCurrents {
    pub a: f32,
    pub b: f32,
}

impl PhaseCurrents {
    pub const INVALID: Self = Self {
        a: f32::NAN,
        b: f32::NAN,
    };

    pub fn is_valid(&self) -> bool {
        self.a.is_finite() && self.b.is_finite()
    }
}

pub struct InlineCurrentSense<A: PhaseCurrentAdc> {
    adc: A,
    config: CurrentSenseConfig,
    /// ゼロ電流時のADC電圧 [V]
    offset: [f32; 2],
}

impl<A: PhaseCurrentAdc> InlineCurrentSense<A> {
    pub fn new(adc: A, config: CurrentSenseConfig) -> Self {
        if !Self::scale_valid(&config) {
            error!("current sense: shunt resistance or gain not set, readings disabled");
        }
        Self {
            adc,
            config,
            offset: [0.0; 2],
        }
    }

    /// ゼロ電流オフセットを平均して校正（ドライバ無効中に呼ぶこと）
    pub fn calibrate_offsets(&mut self, samples: u16) {
        if samples == 0 {
            return;
        }
        let mut sum = [0.0f32; 2];
        for _ in 0..samples {
            let raw = self.adc.read_raw();
            sum[0] += self.raw_to_volts(raw[0]);
            sum[1] += self.raw_to_volts(raw[1]);
        }
        self.offset = [sum[0] / samples as f32, sum[1] / samples as f32];
        info!("current sense offsets: {} V, {} V", self.offset[0], self.offset[1]);
    }

    /// 相電流を読む
    ///
    /// シャント抵抗またはゲインが0・未設定なら`PhaseCurrents::INVALID`（NaN）。
    pub fn read_phase_currents(&mut self) -> PhaseCurrents {
        if !Self::scale_valid(&self.config) {
            return PhaseCurrents::INVALID;
        }
        let raw = self.adc.read_raw();
        let scale = self.config.shunt_resistance * self.config.amp_gain;
        PhaseCurrents {
            a: (self.raw_to_volts(raw[0]) - self.offset[0]) / scale,
            b: (self.raw_to_volts(raw[1]) - self.offset[1]) / scale,
        }
    }

    pub fn offsets(&self) -> [f32; 2] {
        self.offset
    }

    fn raw_to_volts(&self, raw: u16) -> f32 {
        raw as f32 * self.config.vref / self.config.full_scale
    }

    fn scale_valid(config: &CurrentSenseConfig) -> bool {
        let r = config.shunt_resistance;
        let g = config.amp_gain;
        r.is_finite() && g.is_finite() && r != 0.0 && g != 0.0 && config.full_scale > 0.0
    }
}
