#![no_std]
#![no_main]

mod eeprom;
mod fmt;
mod hardware;
mod motor_driver;
mod state;
mod tasks;

#[cfg(not(feature = "defmt"))]
use panic_halt as _;
#[cfg(feature = "defmt")]
use {defmt_rtt as _, panic_probe as _};

use embassy_executor::Spawner;
use embassy_stm32::{
    adc::{Adc, AdcChannel, SampleTime},
    can,
    crc::Crc,
    flash::Flash,
    gpio::OutputType,
    i2c::I2c,
    time::Hertz,
    timer::{
        complementary_pwm::{ComplementaryPwm, ComplementaryPwmPin},
        low_level::CountingMode,
        simple_pwm::PwmPin,
    },
};
use embassy_time::{Duration, Timer};

use echo_foc::config::params;
use echo_foc::control_loop::{ControlLoop, LoopConfig};
use echo_foc::current_sense::{CurrentSenseConfig, InlineCurrentSense};
use echo_foc::driver::{DriverConfig, PhaseDriver, PhaseLayout};
use echo_foc::sensor::{Encoder, Mt6701};

use eeprom::{ConfigStore, HardwareCrc};
use fmt::*;
use hardware::Irqs;
use motor_driver::{AdcCurrentReader, MotorDriver};
use tasks::{can_rx_task, can_tx_task, motor_control_task, storage_task, voltage_monitor_task};

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // ハードウェア初期化
    let config = hardware::create_clock_config();
    let p = embassy_stm32::init(config);

    info!("═══════════════════════════════════════════════════════");
    info!("   echo-foc • MT6701 FOC node • STM32G431VB @ 170MHz");
    info!("═══════════════════════════════════════════════════════");

    // 設定をフラッシュから読み込み（失敗時はデフォルトで初期化）
    let flash = Flash::new_blocking(p.FLASH);
    let Some(crc_config) = hardware::crc_config() else {
        error!("CRC configuration rejected, halting");
        return;
    };
    let crc = Crc::new(p.CRC, crc_config);
    let mut store = ConfigStore::new(flash, HardwareCrc(crc));
    let stored = store.load_or_initialize();

    let node = state::local_node();
    node.set_index(stored.node_index);
    node.replace(stored.params);
    info!(
        "Config loaded: node {}, pole pairs {}, V limit {}V, role {:?}",
        stored.node_index.get(),
        stored.params.pole_pairs,
        stored.params.voltage_limit,
        stored.params.role
    );
    spawner.spawn(storage_task(store)).unwrap();

    // CAN初期化＆タスク起動
    let mut can_configurator = can::CanConfigurator::new(p.FDCAN1, p.PA11, p.PA12, Irqs);
    can_configurator.properties().set_standard_filter(
        can::filter::StandardFilterSlot::_0,
        can::filter::StandardFilter::accept_all_into_fifo0(),
    );
    can_configurator.set_bitrate(params::can::DEFAULT_BITRATE);
    let can = can_configurator.start(can::OperatingMode::NormalOperationMode);
    let (can_tx, can_rx, _properties) = can.split();
    spawner.spawn(can_rx_task(can_rx)).unwrap();
    spawner.spawn(can_tx_task(can_tx)).unwrap();

    // ADC初期化
    let mut adc1 = Adc::new(p.ADC1);
    adc1.set_sample_time(SampleTime::CYCLES12_5);
    let mut adc2 = Adc::new(p.ADC2);
    adc2.set_sample_time(SampleTime::CYCLES640_5);

    // 電圧監視タスク起動（PC1 = ADC2_IN7）
    let voltage_pin = p.PC1.degrade_adc();
    spawner
        .spawn(voltage_monitor_task(adc2, voltage_pin))
        .unwrap();

    // 電流センス（PA0 = ADC1_IN1、PA1 = ADC1_IN2、外付けアンプ出力）
    let current_reader = AdcCurrentReader::new(adc1, p.PA0.degrade_adc(), p.PA1.degrade_adc());
    let mut current_sense = InlineCurrentSense::new(current_reader, CurrentSenseConfig::default());

    // MT6701（I2C1: PA15 = SCL、PB7 = SDA）
    let i2c = I2c::new_blocking(
        p.I2C1,
        p.PA15,
        p.PB7,
        Hertz(params::sensor::I2C_FREQUENCY_HZ),
        Default::default(),
    );
    let encoder = Encoder::new(Mt6701::new(i2c), params::sensor::DEFAULT_VELOCITY_TF);

    // PWM初期化（TIM1、3相相補PWM）
    let mut uvw_pwm = ComplementaryPwm::new(
        p.TIM1,
        Some(PwmPin::new(p.PE9, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(p.PE8, OutputType::PushPull)),
        Some(PwmPin::new(p.PE11, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(p.PE10, OutputType::PushPull)),
        Some(PwmPin::new(p.PE13, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(p.PE12, OutputType::PushPull)),
        None,
        None,
        Hertz(params::pwm::DEFAULT_FREQUENCY_HZ),
        CountingMode::EdgeAlignedUp,
    );
    uvw_pwm.set_dead_time(params::pwm::DEFAULT_DEAD_TIME);

    let driver = PhaseDriver::new(
        MotorDriver::new(uvw_pwm),
        DriverConfig {
            layout: PhaseLayout::ThreePhase,
            pwm_frequency_hz: params::pwm::DEFAULT_FREQUENCY_HZ,
            dead_zone: params::pwm::DEFAULT_DEAD_ZONE,
        },
        params::supply::DEFAULT_VOLTAGE,
    );

    // 出力無効のうちに電流オフセットを校正
    Timer::after(Duration::from_millis(10)).await;
    current_sense.calibrate_offsets(256);

    let control = ControlLoop::new(
        stored.node_index,
        encoder,
        Some(current_sense),
        driver,
        LoopConfig::default(),
    );

    info!("Starting FOC motor control...");
    spawner
        .spawn(motor_control_task(control, params::DEFAULT_CONTROL_PERIOD_US))
        .unwrap();
}
