//! モーター制御タスク
//!
//! 1kHz固定周期で`ControlLoop::tick`を回します。バスは待たない。

use embassy_stm32::{i2c::I2c, mode::Blocking};
use embassy_time::{Duration, Instant, Ticker};

use echo_foc::control_loop::ControlLoop;
use echo_foc::sensor::Mt6701;

use crate::fmt::*;
use crate::motor_driver::{AdcCurrentReader, MotorDriver};
use crate::state::{local_node, supply_state, TELEMETRY};

pub type NodeControlLoop =
    ControlLoop<Mt6701<I2c<'static, Blocking>>, MotorDriver, AdcCurrentReader>;

/// モーター制御タスク
#[embassy_executor::task]
pub async fn motor_control_task(mut control: NodeControlLoop, control_period_us: u64) {
    info!("Motor control task started ({}us period)", control_period_us);

    let node = local_node();
    let mut revision = node.revision();
    control.set_node(node.index());

    let mut ticker = Ticker::every(Duration::from_micros(control_period_us));

    loop {
        ticker.next().await;

        // 1. 周期の先頭でパラメータを取得（周期中は変わらない）
        let params = node.snapshot();
        let current_revision = node.revision();
        if current_revision != revision {
            revision = current_revision;
            control.set_node(node.index());
        }

        // 2. 制御計算と出力
        let report = control.tick(&params, supply_state(), Instant::now().as_micros());

        // 3. テレメトリは最新値だけ渡す（ブロックしない）
        if let Some(sample) = report.telemetry {
            TELEMETRY.publish(sample);
        }
    }
}
