//! モータードライバー・センサのハードウェア実装
//!
//! ライブラリ側のトレイト（`PwmOutput`、`PhaseCurrentAdc`）をSTM32の
//! ペリフェラルで実装します。

use embassy_stm32::{
    adc::{Adc, AnyAdcChannel},
    peripherals,
    timer::{complementary_pwm::ComplementaryPwm, Channel},
};

use echo_foc::current_sense::PhaseCurrentAdc;
use echo_foc::driver::PwmOutput;

/// 3相モータードライバー（TIM1 相補PWM）
pub struct MotorDriver {
    pwm: ComplementaryPwm<'static, peripherals::TIM1>,
    max_duty: u16,
}

impl MotorDriver {
    pub fn new(pwm: ComplementaryPwm<'static, peripherals::TIM1>) -> Self {
        let max_duty = pwm.get_max_duty();
        Self { pwm, max_duty }
    }
}

const CHANNELS: [Channel; 3] = [Channel::Ch1, Channel::Ch2, Channel::Ch3];

impl PwmOutput for MotorDriver {
    fn max_duty(&self) -> u16 {
        self.max_duty
    }

    fn set_duties(&mut self, duties: &[u16]) {
        for (&ch, &duty) in CHANNELS.iter().zip(duties) {
            self.pwm.set_duty(ch, duty);
        }
    }

    fn enable(&mut self) {
        for ch in CHANNELS {
            self.pwm.enable(ch);
        }
    }

    fn disable(&mut self) {
        for ch in CHANNELS {
            self.pwm.disable(ch);
        }
    }
}

/// ADC1で2相のシャントアンプ出力を読む
pub struct AdcCurrentReader {
    adc: Adc<'static, peripherals::ADC1>,
    phase_a: AnyAdcChannel<peripherals::ADC1>,
    phase_b: AnyAdcChannel<peripherals::ADC1>,
}

impl AdcCurrentReader {
    pub fn new(
        adc: Adc<'static, peripherals::ADC1>,
        phase_a: AnyAdcChannel<peripherals::ADC1>,
        phase_b: AnyAdcChannel<peripherals::ADC1>,
    ) -> Self {
        Self {
            adc,
            phase_a,
            phase_b,
        }
    }
}

impl PhaseCurrentAdc for AdcCurrentReader {
    fn read_raw(&mut self) -> [u16; 2] {
        [
            self.adc.blocking_read(&mut self.phase_a),
            self.adc.blocking_read(&mut self.phase_b),
        ]
    }
}
