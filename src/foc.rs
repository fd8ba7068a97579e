// FOC (Field Oriented Control) module
// Magnetic-encoder FOC cascade: angle → velocity → torque (voltage or current)

pub mod controller;
pub mod lowpass;
pub mod modulation;
pub mod pid;
pub mod svpwm;
pub mod transforms;

pub use controller::{DqCommand, Feedback, FocController};
pub use lowpass::LowPassFilter;
pub use modulation::phase_voltages;
pub use pid::{PidController, PidGains};
pub use transforms::{electrical_angle, inverse_park, limit_voltage, normalize_angle};

/// モーター制御モード
///
/// バス上の`controller`フィールドのコード値をそのまま判別子に使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ControlMode {
    /// 出力停止
    Disabled = 0,
    /// トルク（電圧または電流）指令、角度フィードバックあり
    TorqueClosedLoop = 1,
    /// 速度フィードバック制御
    VelocityClosedLoop = 2,
    /// 位置フィードバック制御（位置 → 速度 → トルク）
    AngleClosedLoop = 3,
    /// q軸電圧を直接指令
    TorqueVoltageOpenLoop = 4,
    /// 速度指令から電気角を合成（センサレス）
    VelocityOpenLoop = 5,
    /// 位置指令に向けて電気角を合成（センサレス）
    AngleOpenLoop = 6,
}

impl ControlMode {
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// センサ角度を使うモードか
    pub const fn is_closed_loop(self) -> bool {
        matches!(
            self,
            Self::TorqueClosedLoop | Self::VelocityClosedLoop | Self::AngleClosedLoop
        )
    }
}

impl TryFrom<u8> for ControlMode {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Disabled),
            1 => Ok(Self::TorqueClosedLoop),
            2 => Ok(Self::VelocityClosedLoop),
            3 => Ok(Self::AngleClosedLoop),
            4 => Ok(Self::TorqueVoltageOpenLoop),
            5 => Ok(Self::VelocityOpenLoop),
            6 => Ok(Self::AngleOpenLoop),
            other => Err(other),
        }
    }
}

/// トルク指令の実現方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TorqueMode {
    /// 相抵抗と逆起電力から電圧を推定（電流センス不要）
    Voltage = 0,
    /// dq電流フィードバック
    Current = 1,
}

impl TryFrom<u8> for TorqueMode {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Voltage),
            1 => Ok(Self::Current),
            other => Err(other),
        }
    }
}

/// センサの回転方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Normal,
    Reversed,
}

impl Direction {
    /// +1.0 / -1.0
    pub const fn multiplier(self) -> f32 {
        match self {
            Self::Normal => 1.0,
            Self::Reversed => -1.0,
        }
    }

    pub const fn from_reversed(reversed: bool) -> Self {
        if reversed {
            Self::Reversed
        } else {
            Self::Normal
        }
    }

    pub const fn is_reversed(self) -> bool {
        matches!(self, Self::Reversed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_mode_codes_round_trip() {
        for code in 0..=6u8 {
            let mode = ControlMode::try_from(code).unwrap();
            assert_eq!(mode.code(), code);
        }
        assert_eq!(ControlMode::try_from(7), Err(7));
        assert_eq!(ControlMode::try_from(1), Ok(ControlMode::TorqueClosedLoop));
    }

    #[test]
    fn test_direction_multiplier() {
        assert_eq!(Direction::Normal.multiplier(), 1.0);
        assert_eq!(Direction::from_reversed(true).multiplier(), -1.0);
    }
}
