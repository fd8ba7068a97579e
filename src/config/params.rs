//! モーター制御とハードウェアの設定パラメータ（デフォルト値）
//!
//! ここの値は起動時の`NodeParams`と`StoredConfig`の初期値になる。
//! 運用中の値はCAN経由で書き換えられる。

/// 相抵抗 [Ω]
pub const DEFAULT_PHASE_RESISTANCE: f32 = 1.3;

/// 相インダクタンス [H]（0 = 未設定）
pub const DEFAULT_PHASE_INDUCTANCE: f32 = 0.0;

/// 逆起電力定数 [V·s/rad]（0 = 未設定）
pub const DEFAULT_BEMF_CONSTANT: f32 = 0.0;

/// 極対数（ステッピングモーター 200step/rev = 50極対）
pub const DEFAULT_POLE_PAIRS: u8 = 50;

/// 電圧リミット [V]
pub const DEFAULT_VOLTAGE_LIMIT: f32 = 7.0;

/// 電流リミット [A]（0 = 電圧リミットのみ）
pub const DEFAULT_CURRENT_LIMIT: f32 = 2.0;

/// 速度リミット [rad/s]
pub const DEFAULT_VELOCITY_LIMIT: f32 = 20.0;

/// 制御周期 [μs]（1kHz）
pub const DEFAULT_CONTROL_PERIOD_US: u64 = 1_000;

/// センサ読み取り失敗が何周期連続したらストールと見なすか
pub const DEFAULT_SENSOR_STALL_TICKS: u32 = 50;

/// 速度ループのPIDゲイン
pub mod velocity_pid {
    pub const P: f32 = 0.5;
    pub const I: f32 = 10.0;
    pub const D: f32 = 0.0;
    /// 出力変化率リミット [単位/s]
    pub const RAMP: f32 = 1000.0;
    /// 速度LPF時定数 [s]
    pub const TF: f32 = 0.005;
}

/// 位置ループのPIDゲイン
pub mod angle_pid {
    pub const P: f32 = 0.5;
    pub const I: f32 = 0.0;
    pub const D: f32 = 0.0;
    /// 0 = ランプ無効
    pub const RAMP: f32 = 0.0;
    pub const TF: f32 = 0.0;
}

/// 電流ループのPIDゲイン（dq軸共通）
pub mod current_pid {
    pub const P: f32 = 3.0;
    pub const I: f32 = 300.0;
    pub const D: f32 = 0.0;
    pub const RAMP: f32 = 0.0;
    pub const TF: f32 = 0.005;
}

/// PWM設定
pub mod pwm {
    /// PWM周波数 [Hz]（25kHz）
    pub const DEFAULT_FREQUENCY_HZ: u32 = 25_000;

    /// デッドゾーン（デューティ比上限からの余白、0.0〜1.0）
    pub const DEFAULT_DEAD_ZONE: f32 = 0.02;

    /// デッドタイム（タイマーカウント）
    pub const DEFAULT_DEAD_TIME: u16 = 100;
}

/// CAN設定
pub mod can {
    /// CANビットレート（1Mbps）
    pub const DEFAULT_BITRATE: u32 = 1_000_000;

    /// バス上のノード数（パートナー計算の法）
    pub const NODE_COUNT: u8 = 4;

    /// パートナーノードのオフセット（`(node + 2) % 4`）
    pub const PARTNER_OFFSET: u8 = 2;

    /// テレメトリ送信タイムアウト [ms]（キュー満杯なら破棄）
    pub const TX_TIMEOUT_MS: u64 = 2;
}

/// テレメトリ設定
pub mod telemetry {
    /// 制御周期何回に1回角度を送信するか
    pub const DEFAULT_DOWNSAMPLE: u16 = 10;
}

/// MT6701 磁気角度センサ
pub mod sensor {
    /// I2Cデバイスアドレス
    pub const MT6701_ADDRESS: u8 = 0x06;

    /// 角度レジスタ（MSB、続けてLSB）
    pub const MT6701_ANGLE_REGISTER: u8 = 0x03;

    /// 分解能 [bit]
    pub const MT6701_RESOLUTION_BITS: u8 = 14;

    /// I2Cクロック [Hz]
    pub const I2C_FREQUENCY_HZ: u32 = 400_000;

    /// 速度LPF時定数 [s]
    pub const DEFAULT_VELOCITY_TF: f32 = 0.002;
}

/// インライン電流センス
pub mod current_sense {
    /// シャント抵抗 [Ω]
    pub const DEFAULT_SHUNT_RESISTANCE: f32 = 0.523;

    /// アンプゲイン（OPAMP PGA x4）
    pub const DEFAULT_AMP_GAIN: f32 = 4.0;

    /// ADC基準電圧 [V]
    pub const ADC_VREF: f32 = 3.3;

    /// ADCフルスケール（12bit）
    pub const ADC_FULL_SCALE: f32 = 4096.0;
}

/// DCバス電圧監視
pub mod supply {
    /// 起動直後（未計測）の想定電源電圧 [V]
    pub const DEFAULT_VOLTAGE: f32 = 24.0;

    /// 過電圧しきい値 [V]
    pub const OVERVOLTAGE_THRESHOLD: f32 = 30.0;

    /// 低電圧しきい値 [V]
    pub const UNDERVOLTAGE_THRESHOLD: f32 = 10.0;

    /// 監視周期 [ms]
    pub const MONITOR_PERIOD_MS: u64 = 10;

    /// 分圧回路: 33.3kΩ + 3.3kΩ（V_bus = V_adc * 11.09、最大 ≈ 36.6V）
    pub const DIVIDER_R_UPPER: f32 = 33_300.0;
    pub const DIVIDER_R_LOWER: f32 = 3_300.0;

    /// ローパスフィルタ係数（0.0-1.0、大きいほど応答速度が速い）
    pub const FILTER_ALPHA: f32 = 0.1;
}
