//! FOC制御カスケード
//!
//! 位置 → 速度 → トルク（電圧 / 電流）の多段ループと、センサを使わない
//! オープンループモードを1周期ぶん計算して dq 電圧指令を返す。
//! PWMへの変調と出力は呼び出し側（`ControlLoop`）が行う。

use core::f32::consts::TAU;

use super::lowpass::LowPassFilter;
use super::pid::{PidController, PidGains};
use super::transforms::{electrical_angle, limit_voltage, normalize_angle, park};
use super::{ControlMode, TorqueMode};
use crate::fmt::*;
use crate::node::NodeParams;

/// 1周期ぶんの計測値
#[derive(Debug, Clone, Copy)]
pub struct Feedback {
    /// センサ角度 [rad]（多回転、方向補正前）。位置ループ用
    pub sensor_angle: f32,
    /// 1回転内のセンサ角度 [rad]、[0, 2π)。電気角はこちらから求める
    pub sensor_turn_angle: f32,
    /// センサ角速度 [rad/s]（方向補正前）
    pub sensor_velocity: f32,
    /// 静止座標系の電流 (iα, iβ) [A]、電流センスなし・無効値なら`None`
    pub currents_ab: Option<(f32, f32)>,
}

/// dq電圧指令
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DqCommand {
    pub ud: f32,
    pub uq: f32,
    /// 変調に使う電気角 [rad]、[0, 2π)
    pub electrical_angle: f32,
}

impl DqCommand {
    pub const ZERO: Self = Self {
        ud: 0.0,
        uq: 0.0,
        electrical_angle: 0.0,
    };
}

/// PID + 出力LPF の1段
struct Stage {
    pid: PidController,
    lpf: LowPassFilter,
}

impl Stage {
    const fn new() -> Self {
        Self {
            pid: PidController::new(),
            lpf: LowPassFilter::new(),
        }
    }

    fn update(&mut self, gains: &PidGains, error: f32, limit: f32, dt: f32) -> f32 {
        let out = self.pid.update(gains, error, limit, dt);
        self.lpf.filter(out, gains.tf, dt).clamp(-limit, limit)
    }

    fn reset(&mut self) {
        self.pid.reset();
        self.lpf.reset();
    }
}

/// FOCコントローラ
pub struct FocController {
    angle: Stage,
    velocity: Stage,
    current_q: Stage,
    current_d: Stage,
    /// オープンループ用の合成シャフト角 [rad]
    openloop_angle: f32,
    mode: ControlMode,
    last_safe: DqCommand,
}

impl FocController {
    pub const fn new() -> Self {
        Self {
            angle: Stage::new(),
            velocity: Stage::new(),
            current_q: Stage::new(),
            current_d: Stage::new(),
            openloop_angle: 0.0,
            mode: ControlMode::Disabled,
            last_safe: DqCommand::ZERO,
        }
    }

    /// 現在のモード（前回`update`時点）
    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    /// 全ループの積分・フィルタ状態をクリア
    pub fn reset(&mut self) {
        self.angle.reset();
        self.velocity.reset();
        self.current_q.reset();
        self.current_d.reset();
        self.last_safe = DqCommand::ZERO;
    }

    /// 1制御周期ぶんの計算
    ///
    /// # Arguments
    /// * `params` - 周期の先頭で取得したノード設定のスナップショット
    /// * `feedback` - センサ・電流計測値
    /// * `supply_voltage` - 電源電圧 [V]
    /// * `dt` - 制御周期 [s]
    ///
    /// # Returns
    /// `|(ud, uq)| <= min(voltage_limit, supply)` を常に満たす dq 指令
    pub fn update(
        &mut self,
        params: &NodeParams,
        feedback: &Feedback,
        supply_voltage: f32,
        dt: f32,
    ) -> DqCommand {
        let voltage_limit = params.effective_voltage_limit(supply_voltage);

        if params.controller != self.mode {
            self.enter_mode(params, feedback);
        }

        let direction = params.sensor_direction.multiplier();
        let shaft_angle = feedback.sensor_angle * direction;
        let shaft_velocity = feedback.sensor_velocity * direction;
        // 多回転角はf32の丸めで回転数とともに誤差が増えるので1回転内の角度を使う
        let measured_electrical = electrical_angle(
            feedback.sensor_turn_angle,
            params.pole_pairs,
            direction,
            params.zero_electrical_angle,
        );

        let command = match params.controller {
            ControlMode::Disabled => DqCommand::ZERO,
            ControlMode::TorqueClosedLoop
            | ControlMode::VelocityClosedLoop
            | ControlMode::AngleClosedLoop => {
                if !(shaft_angle.is_finite() && shaft_velocity.is_finite()) {
                    return self.hold(voltage_limit);
                }
                let torque_limit = params.torque_limit(voltage_limit);
                let torque = match params.controller {
                    ControlMode::AngleClosedLoop => {
                        let velocity_target = self.angle.update(
                            &params.angle_pid,
                            params.target - shaft_angle,
                            params.velocity_limit,
                            dt,
                        );
                        self.velocity_stage(params, velocity_target, shaft_velocity, torque_limit, dt)
                    }
                    ControlMode::VelocityClosedLoop => {
                        let velocity_target =
                            params.target.clamp(-params.velocity_limit, params.velocity_limit);
                        self.velocity_stage(params, velocity_target, shaft_velocity, torque_limit, dt)
                    }
                    _ => params.target.clamp(-torque_limit, torque_limit),
                };
                self.torque_to_dq(
                    params,
                    torque,
                    shaft_velocity,
                    measured_electrical,
                    feedback.currents_ab,
                    voltage_limit,
                    dt,
                )
            }
            ControlMode::TorqueVoltageOpenLoop => {
                if !measured_electrical.is_finite() {
                    return self.hold(voltage_limit);
                }
                DqCommand {
                    ud: 0.0,
                    uq: params.target.clamp(-voltage_limit, voltage_limit),
                    electrical_angle: measured_electrical,
                }
            }
            ControlMode::VelocityOpenLoop => {
                let velocity = params.target.clamp(-params.velocity_limit, params.velocity_limit);
                if !velocity.is_finite() {
                    return self.hold(voltage_limit);
                }
                self.openloop_angle = normalize_angle(self.openloop_angle + velocity * dt);
                self.openloop_command(params, voltage_limit)
            }
            ControlMode::AngleOpenLoop => {
                let error = params.target - self.openloop_angle;
                if !error.is_finite() {
                    return self.hold(voltage_limit);
                }
                let max_step = params.velocity_limit.abs() * dt;
                self.openloop_angle += error.clamp(-max_step, max_step);
                self.openloop_command(params, voltage_limit)
            }
        };

        self.finish(command, voltage_limit)
    }

    fn enter_mode(&mut self, params: &NodeParams, feedback: &Feedback) {
        debug!("FOC mode {:?} -> {:?}", self.mode, params.controller);
        self.reset();
        let shaft_angle = feedback.sensor_angle * params.sensor_direction.multiplier();
        self.openloop_angle = if shaft_angle.is_finite() {
            shaft_angle
        } else {
            0.0
        };
        if params.controller == ControlMode::VelocityOpenLoop {
            self.openloop_angle = normalize_angle(self.openloop_angle);
        }
        self.mode = params.controller;
    }

    fn velocity_stage(
        &mut self,
        params: &NodeParams,
        velocity_target: f32,
        shaft_velocity: f32,
        torque_limit: f32,
        dt: f32,
    ) -> f32 {
        self.velocity.update(
            &params.velocity_pid,
            velocity_target - shaft_velocity,
            torque_limit,
            dt,
        )
    }

    /// トルク指令 → dq電圧
    #[allow(clippy::too_many_arguments)]
    fn torque_to_dq(
        &mut self,
        params: &NodeParams,
        torque: f32,
        shaft_velocity: f32,
        electrical: f32,
        currents_ab: Option<(f32, f32)>,
        voltage_limit: f32,
        dt: f32,
    ) -> DqCommand {
        if params.torque_mode == TorqueMode::Current {
            if let Some((i_alpha, i_beta)) = currents_ab {
                let (i_d, i_q) = park(i_alpha, i_beta, electrical);
                let uq = self
                    .current_q
                    .update(&params.current_pid, torque - i_q, voltage_limit, dt);
                let ud = self
                    .current_d
                    .update(&params.current_pid, -i_d, voltage_limit, dt);
                return DqCommand {
                    ud,
                    uq,
                    electrical_angle: electrical,
                };
            }
            // 電流値が無効な周期は電圧モードで代替
        }

        let (ud, uq) = if params.torque_in_amps() && params.phase_resistance > 0.0 {
            let bemf = params.bemf_constant * shaft_velocity;
            let uq = torque * params.phase_resistance + bemf;
            let ud = if params.phase_inductance > 0.0 {
                -torque * shaft_velocity * params.pole_pairs as f32 * params.phase_inductance
            } else {
                0.0
            };
            (ud, uq)
        } else {
            (0.0, torque)
        };

        DqCommand {
            ud: ud.clamp(-voltage_limit, voltage_limit),
            uq: uq.clamp(-voltage_limit, voltage_limit),
            electrical_angle: electrical,
        }
    }

    fn openloop_command(&self, params: &NodeParams, voltage_limit: f32) -> DqCommand {
        let uq = if params.current_limit > 0.0 && params.phase_resistance > 0.0 {
            (params.current_limit * params.phase_resistance).min(voltage_limit)
        } else {
            voltage_limit
        };
        DqCommand {
            ud: 0.0,
            uq,
            electrical_angle: electrical_angle(self.openloop_angle, params.pole_pairs, 1.0, 0.0),
        }
    }

    /// 最終クランプ。非有限値なら直前の安全な出力を保持する。
    fn finish(&mut self, command: DqCommand, voltage_limit: f32) -> DqCommand {
        let finite = command.ud.is_finite()
            && command.uq.is_finite()
            && command.electrical_angle.is_finite();
        if !finite {
            error!("non-finite FOC output, holding last safe command");
            return self.hold(voltage_limit);
        }

        let (ud, uq) = limit_voltage(command.ud, command.uq, voltage_limit);
        self.last_safe = DqCommand {
            ud,
            uq,
            electrical_angle: command.electrical_angle.clamp(0.0, TAU),
        };
        self.last_safe
    }

    fn hold(&mut self, voltage_limit: f32) -> DqCommand {
        let (ud, uq) = limit_voltage(self.last_safe.ud, self.last_safe.uq, voltage_limit);
        self.last_safe.ud = ud;
        self.last_safe.uq = uq;
        self.last_safe
    }
}

impl Default for FocController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foc::Direction;
    use libm::sqrtf;

    const DT: f32 = 0.001;

    fn feedback(angle: f32, velocity: f32) -> Feedback {
        Feedback {
            sensor_angle: angle,
            sensor_turn_angle: normalize_angle(angle),
            sensor_velocity: velocity,
            currents_ab: None,
        }
    }

    fn magnitude(c: &DqCommand) -> f32 {
        sqrtf(c.ud * c.ud + c.uq * c.uq)
    }

    fn torque_node() -> NodeParams {
        let mut node = NodeParams::new();
        node.phase_resistance = 1.3;
        node.phase_inductance = 0.029;
        node.bemf_constant = 25.0;
        node.voltage_limit = 7.0;
        node.current_limit = 2.0;
        node.velocity_limit = 20.0;
        node.controller = ControlMode::TorqueClosedLoop;
        node
    }

    #[test]
    fn test_disabled_outputs_zero() {
        let mut foc = FocController::new();
        let node = NodeParams::new();
        let out = foc.update(&node, &feedback(1.0, 0.0), 24.0, DT);
        assert_eq!(out, DqCommand::ZERO);
    }

    #[test]
    fn test_torque_voltage_mode_uses_resistance() {
        let mut foc = FocController::new();
        let mut node = torque_node();
        node.bemf_constant = 0.0;
        node.target = 1.0;
        let out = foc.update(&node, &feedback(0.0, 0.0), 24.0, DT);
        assert!((out.uq - 1.3).abs() < 1e-6);
        assert_eq!(out.ud, 0.0);
    }

    #[test]
    fn test_torque_target_clamped_to_current_limit() {
        let mut foc = FocController::new();
        let mut node = torque_node();
        node.bemf_constant = 0.0;
        node.target = 100.0;
        let out = foc.update(&node, &feedback(0.0, 0.0), 24.0, DT);
        // 2 A × 1.3 Ω
        assert!((out.uq - 2.6).abs() < 1e-5);
    }

    #[test]
    fn test_output_never_exceeds_voltage_limit() {
        let mut foc = FocController::new();
        let mut node = torque_node();
        node.target = 2.0;
        // large back-EMF term pushes uq far past the limit
        for i in 0..100 {
            let out = foc.update(&node, &feedback(i as f32 * 0.01, 15.0), 24.0, DT);
            assert!(magnitude(&out) <= 7.0 + 1e-4);
        }
    }

    #[test]
    fn test_supply_below_limit_wins() {
        let mut foc = FocController::new();
        let mut node = torque_node();
        node.current_limit = 0.0;
        node.target = 10.0;
        let out = foc.update(&node, &feedback(0.0, 0.0), 5.0, DT);
        assert!(magnitude(&out) <= 5.0 + 1e-5);
    }

    #[test]
    fn test_nan_sensor_holds_last_safe_output() {
        let mut foc = FocController::new();
        let mut node = torque_node();
        node.bemf_constant = 0.0;
        node.target = 1.0;
        let good = foc.update(&node, &feedback(0.5, 0.0), 24.0, DT);

        let held = foc.update(&node, &feedback(f32::NAN, 0.0), 24.0, DT);
        assert_eq!(held, good);

        // tightened limit still applies to the held command
        node.voltage_limit = 0.5;
        let held = foc.update(&node, &feedback(f32::NAN, f32::NAN), 24.0, DT);
        assert!(magnitude(&held) <= 0.5 + 1e-6);
    }

    #[test]
    fn test_velocity_loop_drives_toward_target() {
        let mut foc = FocController::new();
        let mut node = torque_node();
        node.controller = ControlMode::VelocityClosedLoop;
        node.bemf_constant = 0.0;
        node.target = 5.0;
        let out = foc.update(&node, &feedback(0.0, 0.0), 24.0, DT);
        assert!(out.uq > 0.0);

        node.target = -5.0;
        let mut out = DqCommand::ZERO;
        for _ in 0..50 {
            out = foc.update(&node, &feedback(0.0, 0.0), 24.0, DT);
        }
        assert!(out.uq < 0.0);
    }

    #[test]
    fn test_angle_loop_velocity_target_is_limited() {
        let mut foc = FocController::new();
        let mut node = torque_node();
        node.controller = ControlMode::AngleClosedLoop;
        node.velocity_limit = 1.0;
        node.angle_pid = PidGains::new(100.0, 0.0, 0.0, 0.0, 0.0);
        node.velocity_pid = PidGains::new(1.0, 0.0, 0.0, 0.0, 0.0);
        node.bemf_constant = 0.0;
        node.target = 50.0;
        let out = foc.update(&node, &feedback(0.0, 0.0), 24.0, DT);
        // velocity target capped at 1 rad/s, P=1 → 1 A → 1.3 V
        assert!((out.uq - 1.3).abs() < 1e-5);
    }

    #[test]
    fn test_reversed_direction_flips_measured_angle() {
        let mut foc = FocController::new();
        let mut node = torque_node();
        node.controller = ControlMode::AngleClosedLoop;
        node.sensor_direction = Direction::Reversed;
        node.angle_pid = PidGains::new(1.0, 0.0, 0.0, 0.0, 0.0);
        node.velocity_pid = PidGains::new(1.0, 0.0, 0.0, 0.0, 0.0);
        node.bemf_constant = 0.0;
        node.target = 0.0;
        // sensor reads +0.5, shaft is at -0.5, so the loop pushes positive
        let out = foc.update(&node, &feedback(0.5, 0.0), 24.0, DT);
        assert!(out.uq > 0.0);
    }

    #[test]
    fn test_velocity_openloop_advances_angle() {
        let mut foc = FocController::new();
        let mut node = torque_node();
        node.controller = ControlMode::VelocityOpenLoop;
        node.pole_pairs = 1;
        node.target = 10.0;
        let first = foc.update(&node, &feedback(0.0, 0.0), 24.0, DT);
        let second = foc.update(&node, &feedback(0.0, 0.0), 24.0, DT);
        assert!((second.electrical_angle - first.electrical_angle - 0.01).abs() < 1e-5);
        // I·R = 2.6 V
        assert!((second.uq - 2.6).abs() < 1e-5);
    }

    #[test]
    fn test_angle_openloop_steps_at_velocity_limit() {
        let mut foc = FocController::new();
        let mut node = torque_node();
        node.controller = ControlMode::AngleOpenLoop;
        node.pole_pairs = 1;
        node.velocity_limit = 2.0;
        node.target = 1.0;
        let out = foc.update(&node, &feedback(0.0, 0.0), 24.0, DT);
        assert!((out.electrical_angle - 0.002).abs() < 1e-5);
    }

    #[test]
    fn test_current_mode_falls_back_without_currents() {
        let mut foc = FocController::new();
        let mut node = torque_node();
        node.torque_mode = TorqueMode::Current;
        node.bemf_constant = 0.0;
        node.target = 1.0;
        let out = foc.update(&node, &feedback(0.0, 0.0), 24.0, DT);
        assert!((out.uq - 1.3).abs() < 1e-6);
    }

    #[test]
    fn test_current_mode_reacts_to_measured_current() {
        let mut foc = FocController::new();
        let mut node = torque_node();
        node.torque_mode = TorqueMode::Current;
        node.current_pid = PidGains::new(1.0, 0.0, 0.0, 0.0, 0.0);
        node.target = 1.0;
        let fb = Feedback {
            sensor_angle: 0.0,
            sensor_turn_angle: 0.0,
            sensor_velocity: 0.0,
            currents_ab: Some((0.0, 0.0)),
        };
        let out = foc.update(&node, &fb, 24.0, DT);
        assert!((out.uq - 1.0).abs() < 1e-5);

        // already at target q current: no q voltage needed
        let mut foc = FocController::new();
        let fb = Feedback {
            currents_ab: Some((0.0, 1.0)),
            ..fb
        };
        let out = foc.update(&node, &fb, 24.0, DT);
        assert!(out.uq.abs() < 1e-4);
    }

    #[test]
    fn test_electrical_angle_exact_after_many_turns() {
        let mut foc = FocController::new();
        let mut node = torque_node();
        node.controller = ControlMode::TorqueVoltageOpenLoop;
        node.target = 1.0;

        // raw 100 of 16384 after 20000 forward turns
        let turn = 100.0 * TAU / 16384.0;
        let fb = Feedback {
            sensor_angle: 20_000.0 * TAU + turn,
            sensor_turn_angle: turn,
            sensor_velocity: 0.0,
            currents_ab: None,
        };
        let out = foc.update(&node, &fb, 24.0, DT);
        let expected = electrical_angle(turn, node.pole_pairs, 1.0, node.zero_electrical_angle);
        assert!((out.electrical_angle - expected).abs() < 1e-5);
    }
}
