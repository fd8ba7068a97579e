//! DC Bus Voltage Monitoring
//!
//! 分圧回路経由でDCバス電圧を監視し、過電圧/低電圧保護を提供します。
//! フィルタ後の電圧はドライバの電源電圧としても使われる。

use crate::config::params::{current_sense, supply};
use crate::fmt::*;

/// 電圧監視パラメータ
#[derive(Debug, Clone, Copy)]
pub struct VoltageMonitorConfig {
    /// 分圧抵抗の上側 [Ω]
    pub r_upper: f32,
    /// 分圧抵抗の下側 [Ω]
    pub r_lower: f32,
    /// ADC分解能（12ビット = 4096）
    pub adc_max: u16,
    /// ADC基準電圧 [V]
    pub vref: f32,
    /// ローパスフィルタ係数（0.0-1.0）
    pub filter_alpha: f32,
    /// 過電圧しきい値 [V]
    pub overvoltage_threshold: f32,
    /// 低電圧しきい値 [V]
    pub undervoltage_threshold: f32,
}

impl Default for VoltageMonitorConfig {
    fn default() -> Self {
        Self {
            r_upper: supply::DIVIDER_R_UPPER,
            r_lower: supply::DIVIDER_R_LOWER,
            adc_max: current_sense::ADC_FULL_SCALE as u16,
            vref: current_sense::ADC_VREF,
            filter_alpha: supply::FILTER_ALPHA,
            overvoltage_threshold: supply::OVERVOLTAGE_THRESHOLD,
            undervoltage_threshold: supply::UNDERVOLTAGE_THRESHOLD,
        }
    }
}

/// 電圧監視状態
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SupplyState {
    /// 現在の電圧 [V]（フィルタ済み）
    pub voltage: f32,
    /// 過電圧フラグ
    pub overvoltage: bool,
    /// 低電圧フラグ
    pub undervoltage: bool,
}

impl SupplyState {
    /// 初回計測前の想定値（定格電圧、フォルトなし）
    pub const fn new() -> Self {
        Self {
            voltage: supply::DEFAULT_VOLTAGE,
            overvoltage: false,
            undervoltage: false,
        }
    }

    /// 電圧が正常範囲内かチェック
    pub fn is_voltage_ok(&self) -> bool {
        !self.overvoltage && !self.undervoltage
    }
}

impl Default for SupplyState {
    fn default() -> Self {
        Self::new()
    }
}

/// 電圧監視コントローラ
pub struct SupplyMonitor {
    config: VoltageMonitorConfig,
    state: SupplyState,
    primed: bool,
}

impl SupplyMonitor {
    pub fn new(config: VoltageMonitorConfig) -> Self {
        Self {
            config,
            state: SupplyState::new(),
            primed: false,
        }
    }

    /// ADC生値から実電圧を計算 [V]
    pub fn adc_to_voltage(&self, adc_raw: u16) -> f32 {
        let v_adc = (adc_raw as f32 / self.config.adc_max as f32) * self.config.vref;

        // V_bus = V_adc * (R_upper + R_lower) / R_lower
        let divider_ratio = (self.config.r_upper + self.config.r_lower) / self.config.r_lower;
        v_adc * divider_ratio
    }

    /// 電圧を更新し、過電圧/低電圧をチェック
    ///
    /// 初回はフィルタを計測値で初期化する（起動時の誤検出防止）。
    pub fn update(&mut self, adc_raw: u16) -> SupplyState {
        let voltage_raw = self.adc_to_voltage(adc_raw);

        if self.primed {
            // filtered = alpha * raw + (1 - alpha) * filtered_prev
            let alpha = self.config.filter_alpha;
            self.state.voltage = alpha * voltage_raw + (1.0 - alpha) * self.state.voltage;
        } else {
            self.state.voltage = voltage_raw;
            self.primed = true;
        }

        let was_ok = self.state.is_voltage_ok();
        self.state.overvoltage = self.state.voltage > self.config.overvoltage_threshold;
        self.state.undervoltage = self.state.voltage < self.config.undervoltage_threshold;

        // 状態遷移時のみログ
        if was_ok && self.state.overvoltage {
            error!(
                "OVERVOLTAGE detected! Bus voltage: {}V (threshold: {}V)",
                self.state.voltage, self.config.overvoltage_threshold
            );
        }
        if was_ok && self.state.undervoltage {
            error!(
                "UNDERVOLTAGE detected! Bus voltage: {}V (threshold: {}V)",
                self.state.voltage, self.config.undervoltage_threshold
            );
        }
        if !was_ok && self.state.is_voltage_ok() {
            info!("Bus voltage recovered: {}V", self.state.voltage);
        }

        self.state
    }

    pub fn state(&self) -> SupplyState {
        self.state
    }

    /// しきい値を更新
    pub fn set_thresholds(&mut self, overvoltage: f32, undervoltage: f32) {
        self.config.overvoltage_threshold = overvoltage;
        self.config.undervoltage_threshold = undervoltage;
        info!(
            "Voltage thresholds updated: OV={}V, UV={}V",
            overvoltage, undervoltage
        );
    }
}
