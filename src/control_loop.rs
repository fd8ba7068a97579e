//! 制御ループ本体
//!
//! 固定周期で呼ばれる`tick`が、センサ読み取り → FOC計算 → 変調 → PWM出力 →
//! テレメトリ生成までを1周期ぶん行う。ハードウェアはトレイト経由なので
//! ホスト上のテストからもそのまま回せる。

use crate::can_protocol::feedback::status;
use crate::can_protocol::NodeIndex;
use crate::config::params;
use crate::coordination::{Downsampler, TelemetrySample};
use crate::current_sense::{InlineCurrentSense, PhaseCurrentAdc};
use crate::driver::{PhaseDriver, PhaseLayout, PhaseVoltages, PwmOutput};
use crate::fmt::*;
use crate::foc::transforms::clarke;
use crate::foc::{phase_voltages, ControlMode, DqCommand, Feedback, FocController, TorqueMode};
use crate::node::NodeParams;
use crate::sensor::{AngleSample, AngleSensor, Encoder};
use crate::voltage_monitor::SupplyState;

/// 出力停止の原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    /// センサ読み取りが連続で失敗（リセットまでラッチ）
    SensorStall,
    /// 電源電圧が範囲外（復帰すれば解除）
    Supply,
}

#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    /// 制御周期 [μs]
    pub control_period_us: u64,
    /// 連続失敗がこの周期数に達したらストール
    pub sensor_stall_ticks: u32,
    /// ステータスログの間隔 [周期]、0 = ログなし
    pub log_interval: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            control_period_us: params::DEFAULT_CONTROL_PERIOD_US,
            sensor_stall_ticks: params::DEFAULT_SENSOR_STALL_TICKS,
            log_interval: 1000,
        }
    }
}

/// 1周期の結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    /// 最後に有効だった角度サンプル
    pub sample: AngleSample,
    /// この周期でセンサ読み取りに成功したか
    pub sensor_ok: bool,
    pub command: DqCommand,
    /// ドライバへ渡した相電圧（出力停止中は`None`）
    pub voltages: Option<PhaseVoltages>,
    pub fault: Option<Fault>,
    /// 間引き後のテレメトリ
    pub telemetry: Option<TelemetrySample>,
}

pub struct ControlLoop<S: AngleSensor, P: PwmOutput, A: PhaseCurrentAdc> {
    node: NodeIndex,
    encoder: Encoder<S>,
    current_sense: Option<InlineCurrentSense<A>>,
    driver: PhaseDriver<P>,
    foc: FocController,
    downsampler: Downsampler,
    config: LoopConfig,
    dt: f32,
    failed_reads: u32,
    stalled: bool,
    tick_count: u32,
}

impl<S: AngleSensor, P: PwmOutput, A: PhaseCurrentAdc> ControlLoop<S, P, A> {
    pub fn new(
        node: NodeIndex,
        encoder: Encoder<S>,
        current_sense: Option<InlineCurrentSense<A>>,
        driver: PhaseDriver<P>,
        config: LoopConfig,
    ) -> Self {
        let dt = config.control_period_us.max(1) as f32 / 1_000_000.0;
        info!(
            "control loop: node {}, {}us period, stall after {} failed reads",
            node.get(),
            config.control_period_us,
            config.sensor_stall_ticks
        );
        Self {
            node,
            encoder,
            current_sense,
            driver,
            foc: FocController::new(),
            downsampler: Downsampler::new(),
            config,
            dt,
            failed_reads: 0,
            stalled: false,
            tick_count: 0,
        }
    }

    pub fn set_node(&mut self, node: NodeIndex) {
        self.node = node;
    }

    pub fn driver(&self) -> &PhaseDriver<P> {
        &self.driver
    }

    pub fn encoder(&self) -> &Encoder<S> {
        &self.encoder
    }

    /// ラッチ中の故障
    pub fn latched_fault(&self) -> Option<Fault> {
        self.stalled.then_some(Fault::SensorStall)
    }

    /// 1制御周期
    ///
    /// # Arguments
    /// * `params` - 周期の先頭で取得したノード設定
    /// * `supply` - 最新の電源電圧状態
    /// * `now_us` - 単調増加のタイムスタンプ [μs]
    pub fn tick(&mut self, params: &NodeParams, supply: SupplyState, now_us: u64) -> TickReport {
        self.tick_count = self.tick_count.wrapping_add(1);

        // 1. 角度センサ読み取り
        let sensor_ok = self.read_sensor(now_us);
        let sample = self.encoder.sample();

        // 2. 停止条件
        let fault = if self.stalled {
            Some(Fault::SensorStall)
        } else if !supply.is_voltage_ok() {
            Some(Fault::Supply)
        } else {
            None
        };

        self.driver.set_supply_voltage(supply.voltage);
        self.driver.set_voltage_limit(params.voltage_limit);

        let (command, voltages) = if fault.is_some() {
            if self.driver.is_enabled() {
                error!("node {}: output disabled by {:?}", self.node.get(), fault);
            }
            self.driver.disable();
            self.foc.reset();
            (DqCommand::ZERO, None)
        } else {
            // 3. FOC計算（読み取り失敗の周期はNaNを渡して直前の安全な出力を保持）
            let feedback = Feedback {
                sensor_angle: if sensor_ok { sample.angle } else { f32::NAN },
                sensor_turn_angle: if sensor_ok { sample.sensor_angle } else { f32::NAN },
                sensor_velocity: if sensor_ok { sample.velocity } else { f32::NAN },
                currents_ab: self.read_currents(params),
            };
            let command = self.foc.update(params, &feedback, supply.voltage, self.dt);

            if params.controller == ControlMode::Disabled {
                self.driver.disable();
                (command, None)
            } else {
                // 4. 変調してドライバへ
                self.driver.enable();
                let v_ref = params.effective_voltage_limit(supply.voltage);
                let voltages = phase_voltages(&command, self.driver.layout(), v_ref);
                self.driver.set_phase_voltages(&voltages);
                (command, Some(voltages))
            }
        };

        // 5. テレメトリ（シャフト座標系）
        let telemetry = if self.downsampler.tick(params.telemetry_divisor) {
            let direction = params.sensor_direction.multiplier();
            Some(TelemetrySample {
                node: self.node,
                angle: sample.angle * direction,
                velocity: sample.velocity * direction,
                current: command.uq,
                status: self.status_bits(supply),
            })
        } else {
            None
        };

        if self.config.log_interval > 0 && self.tick_count % self.config.log_interval == 0 {
            debug!(
                "node {}: {:?} angle={} vel={} uq={} ud={}",
                self.node.get(),
                params.controller,
                sample.angle,
                sample.velocity,
                command.uq,
                command.ud
            );
        }

        TickReport {
            sample,
            sensor_ok,
            command,
            voltages,
            fault,
            telemetry,
        }
    }

    fn read_sensor(&mut self, now_us: u64) -> bool {
        match self.encoder.update(now_us) {
            Ok(_) => {
                self.failed_reads = 0;
                true
            }
            Err(e) => {
                self.failed_reads = self.failed_reads.saturating_add(1);
                if !self.stalled && self.failed_reads >= self.config.sensor_stall_ticks.max(1) {
                    error!(
                        "node {}: angle sensor stalled ({:?} x{}), latching fault",
                        self.node.get(),
                        e,
                        self.failed_reads
                    );
                    self.stalled = true;
                } else {
                    trace!("sensor read failed: {:?}", e);
                }
                false
            }
        }
    }

    /// 電流モードのときだけ読む。無効値なら`None`（電圧モードで代替）
    fn read_currents(&mut self, params: &NodeParams) -> Option<(f32, f32)> {
        if params.torque_mode != TorqueMode::Current {
            return None;
        }
        let currents = self.current_sense.as_mut()?.read_phase_currents();
        if !currents.is_valid() {
            return None;
        }
        Some(match self.driver.layout() {
            PhaseLayout::TwoPhase => (currents.a, currents.b),
            PhaseLayout::ThreePhase => clarke(currents.a, currents.b),
        })
    }

    fn status_bits(&self, supply: SupplyState) -> u8 {
        let mut bits = 0;
        if self.driver.is_enabled() {
            bits |= status::ENABLED;
        }
        if self.stalled {
            bits |= status::SENSOR_FAULT;
        }
        if !supply.is_voltage_ok() {
            bits |= status::SUPPLY_FAULT;
        }
        bits
    }
}
