// dq voltage command → per-phase voltages for the bridge layout

use super::controller::DqCommand;
use super::svpwm::space_vector;
use super::transforms::inverse_park;
use crate::driver::{PhaseLayout, PhaseVoltages};

/// Modulate a dq command into phase voltages
///
/// * Two-phase (stepper H-bridges): αβ are the two coil voltages, signed.
/// * Three-phase: space vector modulation centered on `v_ref / 2`.
pub fn phase_voltages(command: &DqCommand, layout: PhaseLayout, v_ref: f32) -> PhaseVoltages {
    let (v_alpha, v_beta) = inverse_park(command.ud, command.uq, command.electrical_angle);
    match layout {
        PhaseLayout::TwoPhase => PhaseVoltages::TwoPhase([v_alpha, v_beta]),
        PhaseLayout::ThreePhase => PhaseVoltages::ThreePhase(space_vector(v_alpha, v_beta, v_ref)),
    }
}
