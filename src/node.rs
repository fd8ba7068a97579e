//! Per-motor node configuration
//!
//! `NodeParams` is everything about a motor that the bus can change:
//! electrical model, limits, sensor linkage, mode, gains and setpoint.
//! Measured state (angle, velocity, integrators) lives in the control loop.

use crate::can_protocol::{FieldUpdate, PidStage, PidTerm};
use crate::config::params;
use crate::fmt::*;
use crate::foc::{ControlMode, Direction, PidGains, TorqueMode};

/// How a node chooses its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum NodeRole {
    /// Target comes only from bus `Target` writes
    Independent = 0,
    /// Partner angle telemetry becomes the target
    Follower = 1,
}

impl TryFrom<u8> for NodeRole {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Independent),
            1 => Ok(Self::Follower),
            other => Err(other),
        }
    }
}

/// Runtime-tunable parameters of one motor node
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeParams {
    /// Phase resistance [Ω], 0 = unknown
    pub phase_resistance: f32,
    /// Phase inductance [H], 0 = unknown
    pub phase_inductance: f32,
    /// Back-EMF constant [V·s/rad], 0 = unknown
    pub bemf_constant: f32,
    pub pole_pairs: u8,
    /// [V]
    pub voltage_limit: f32,
    /// [A], 0 = not set
    pub current_limit: f32,
    /// [rad/s]
    pub velocity_limit: f32,
    pub sensor_direction: Direction,
    /// [rad]
    pub zero_electrical_angle: f32,
    pub controller: ControlMode,
    pub torque_mode: TorqueMode,
    pub velocity_pid: PidGains,
    pub angle_pid: PidGains,
    pub current_pid: PidGains,
    /// Torque [A or V], velocity [rad/s] or angle [rad] depending on `controller`
    pub target: f32,
    pub role: NodeRole,
    /// Last partner angle received, NaN until the first one arrives
    pub partner_angle: f32,
    /// Telemetry is published every `telemetry_divisor` ticks
    pub telemetry_divisor: u16,
}

impl NodeParams {
    /// Power-on defaults, output disabled
    pub const fn new() -> Self {
        Self {
            phase_resistance: params::DEFAULT_PHASE_RESISTANCE,
            phase_inductance: params::DEFAULT_PHASE_INDUCTANCE,
            bemf_constant: params::DEFAULT_BEMF_CONSTANT,
            pole_pairs: params::DEFAULT_POLE_PAIRS,
            voltage_limit: params::DEFAULT_VOLTAGE_LIMIT,
            current_limit: params::DEFAULT_CURRENT_LIMIT,
            velocity_limit: params::DEFAULT_VELOCITY_LIMIT,
            sensor_direction: Direction::Normal,
            zero_electrical_angle: 0.0,
            controller: ControlMode::Disabled,
            torque_mode: TorqueMode::Voltage,
            velocity_pid: PidGains::new(
                params::velocity_pid::P,
                params::velocity_pid::I,
                params::velocity_pid::D,
                params::velocity_pid::RAMP,
                params::velocity_pid::TF,
            ),
            angle_pid: PidGains::new(
                params::angle_pid::P,
                params::angle_pid::I,
                params::angle_pid::D,
                params::angle_pid::RAMP,
                params::angle_pid::TF,
            ),
            current_pid: PidGains::new(
                params::current_pid::P,
                params::current_pid::I,
                params::current_pid::D,
                params::current_pid::RAMP,
                params::current_pid::TF,
            ),
            target: 0.0,
            role: NodeRole::Independent,
            partner_angle: f32::NAN,
            telemetry_divisor: params::telemetry::DEFAULT_DOWNSAMPLE,
        }
    }

    /// Apply one decoded bus field
    ///
    /// Returns `false` when the update carried nothing for this struct
    /// (storage commands, feedback records) or its value was rejected.
    pub fn apply(&mut self, update: &FieldUpdate) -> bool {
        match *update {
            FieldUpdate::Stop => {
                self.set_controller(ControlMode::Disabled);
                true
            }
            FieldUpdate::Resistance(v) => store(&mut self.phase_resistance, v),
            FieldUpdate::Inductance(v) => store(&mut self.phase_inductance, v),
            FieldUpdate::BemfConstant(v) => store(&mut self.bemf_constant, v),
            FieldUpdate::VelocityLimit(v) => store(&mut self.velocity_limit, v),
            FieldUpdate::VoltageLimit(v) => store(&mut self.voltage_limit, v),
            FieldUpdate::CurrentLimit(v) => store(&mut self.current_limit, v),
            FieldUpdate::ZeroElectricAngle(v) => store(&mut self.zero_electrical_angle, v),
            FieldUpdate::SensorConfig {
                direction,
                controller,
            } => {
                self.sensor_direction = direction;
                self.set_controller(controller);
                true
            }
            FieldUpdate::PolePairs(pp) if pp > 0 => {
                self.pole_pairs = pp;
                true
            }
            FieldUpdate::PolePairs(_) => false,
            FieldUpdate::Gain { stage, term, value } => {
                let gains = self.gains_mut(stage);
                let slot = match term {
                    PidTerm::P => &mut gains.p,
                    PidTerm::I => &mut gains.i,
                    PidTerm::D => &mut gains.d,
                    PidTerm::Ramp => &mut gains.ramp,
                    PidTerm::Tf => &mut gains.tf,
                };
                store(slot, value)
            }
            FieldUpdate::Controller(mode) => {
                self.set_controller(mode);
                true
            }
            FieldUpdate::Target(v) => store(&mut self.target, v),
            FieldUpdate::TorqueMode(mode) => {
                self.torque_mode = mode;
                true
            }
            FieldUpdate::Role(role) => {
                self.role = role;
                true
            }
            FieldUpdate::TelemetryDivisor(divisor) => {
                self.telemetry_divisor = divisor.max(1);
                true
            }
            FieldUpdate::PartnerAngle(angle) => {
                if !store(&mut self.partner_angle, angle) {
                    return false;
                }
                if self.role == NodeRole::Follower {
                    self.target = angle;
                }
                true
            }
            FieldUpdate::Storage(_) | FieldUpdate::Feedback(_) => false,
        }
    }

    /// Change control mode
    ///
    /// `Disabled` zeroes the voltage and current limits; the host has to
    /// resend them before enabling again.
    pub fn set_controller(&mut self, mode: ControlMode) {
        if mode == ControlMode::Disabled {
            self.voltage_limit = 0.0;
            self.current_limit = 0.0;
        }
        if mode != self.controller {
            info!("controller {:?} -> {:?}", self.controller, mode);
        }
        self.controller = mode;
    }

    fn gains_mut(&mut self, stage: PidStage) -> &mut PidGains {
        match stage {
            PidStage::Velocity => &mut self.velocity_pid,
            PidStage::Angle => &mut self.angle_pid,
            PidStage::Current => &mut self.current_pid,
        }
    }

    /// `min(voltage_limit, supply)`, never negative
    pub fn effective_voltage_limit(&self, supply_voltage: f32) -> f32 {
        let limit = if supply_voltage.is_finite() {
            self.voltage_limit.min(supply_voltage)
        } else {
            0.0
        };
        if limit > 0.0 {
            limit
        } else {
            0.0
        }
    }

    /// Whether torque targets are in amperes
    ///
    /// Current limit is authoritative once it is set and the node can turn
    /// amperes into volts (known resistance or current feedback).
    pub fn torque_in_amps(&self) -> bool {
        self.current_limit > 0.0
            && (self.phase_resistance > 0.0 || self.torque_mode == TorqueMode::Current)
    }

    /// Symmetric limit for torque targets, in the unit of [`Self::torque_in_amps`]
    pub fn torque_limit(&self, voltage_limit: f32) -> f32 {
        if self.torque_in_amps() {
            self.current_limit
        } else {
            voltage_limit
        }
    }
}

impl Default for NodeParams {
    fn default() -> Self {
        Self::new()
    }
}

fn store(slot: &mut f32, value: f32) -> bool {
    if value.is_finite() {
        *slot = value;
        true
    } else {
        error!("rejected non-finite parameter value");
        false
    }
}
