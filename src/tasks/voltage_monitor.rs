//! 電圧監視タスク
//!
//! DCバス電圧を監視し、制御ループが参照する電源状態を更新します。
//! 過電圧/低電圧の間は制御ループが出力を止める。

use embassy_stm32::{
    adc::{Adc, AnyAdcChannel},
    peripherals,
};
use embassy_time::{Duration, Ticker};

use echo_foc::config::params::supply;
use echo_foc::voltage_monitor::{SupplyMonitor, VoltageMonitorConfig};

use crate::fmt::*;
use crate::state::SUPPLY_STATE;

/// 電圧監視タスク
#[embassy_executor::task]
pub async fn voltage_monitor_task(
    mut adc: Adc<'static, peripherals::ADC2>,
    mut voltage_pin: AnyAdcChannel<peripherals::ADC2>,
) {
    let config = VoltageMonitorConfig::default();
    info!(
        "Voltage monitor task started: OV={}V, UV={}V",
        config.overvoltage_threshold, config.undervoltage_threshold
    );

    let mut monitor = SupplyMonitor::new(config);
    let mut ticker = Ticker::every(Duration::from_millis(supply::MONITOR_PERIOD_MS));

    // デバッグログ用カウンタ（1秒ごと）
    let log_every = (1000 / supply::MONITOR_PERIOD_MS.max(1)) as u32;
    let mut log_counter = 0u32;

    loop {
        ticker.next().await;

        let adc_raw = adc.blocking_read(&mut voltage_pin);
        let state = monitor.update(adc_raw);
        SUPPLY_STATE.lock(|s| s.set(state));

        log_counter += 1;
        if log_counter >= log_every {
            log_counter = 0;
            debug!(
                "[Voltage Monitor] Bus: {}V (ADC: {}), OV: {}, UV: {}",
                state.voltage, adc_raw, state.overvoltage, state.undervoltage
            );
        }
    }
}
