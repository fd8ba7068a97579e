//! MT6701 磁気角度センサ（I2C）
//!
//! 角度レジスタ0x03(MSB)・0x04(LSB)を連続読み出しし、
//! ビッグエンディアン16bitを2bit右シフトして14bitカウントを得る。

use embedded_hal::i2c::{Error as _, ErrorKind, I2c};

use super::{AngleSensor, SensorError};
use crate::config::params::sensor::{
    MT6701_ADDRESS, MT6701_ANGLE_REGISTER, MT6701_RESOLUTION_BITS,
};

pub struct Mt6701<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> Mt6701<I> {
    /// デフォルトアドレス(0x06)で作成
    pub fn new(i2c: I) -> Self {
        Self::with_address(i2c, MT6701_ADDRESS)
    }

    pub fn with_address(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }
}

impl<I: I2c> AngleSensor for Mt6701<I> {
    fn resolution_bits(&self) -> u8 {
        MT6701_RESOLUTION_BITS
    }

    fn read_raw_count(&mut self) -> Result<u16, SensorError> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(self.address, &[MT6701_ANGLE_REGISTER], &mut buf)
            .map_err(|e| match e.kind() {
                ErrorKind::NoAcknowledge(_) => SensorError::NoAcknowledge,
                _ => SensorError::Bus,
            })?;
        Ok(u16::from_be_bytes(buf) >> 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorType, NoAcknowledgeSource, Operation};

    struct FakeBus {
        reply: [u8; 2],
        fail: bool,
        last_register: Option<u8>,
        last_address: Option<u8>,
    }

    impl ErrorType for FakeBus {
        type Error = ErrorKind;
    }

    impl I2c for FakeBus {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            if self.fail {
                return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
            }
            self.last_address = Some(address);
            for op in operations {
                match op {
                    Operation::Write(bytes) => self.last_register = bytes.first().copied(),
                    Operation::Read(buf) => buf.copy_from_slice(&self.reply[..buf.len()]),
                }
            }
            Ok(())
        }
    }

    fn bus(reply: [u8; 2]) -> FakeBus {
        FakeBus {
            reply,
            fail: false,
            last_register: None,
            last_address: None,
        }
    }

    #[test]
    fn test_count_is_upper_14_bits_big_endian() {
        let mut sensor = Mt6701::new(bus([0xFF, 0xFF]));
        assert_eq!(sensor.read_raw_count(), Ok(16383));

        // 0x1234 >> 2
        let mut sensor = Mt6701::new(bus([0x12, 0x34]));
        assert_eq!(sensor.read_raw_count(), Ok(0x048D));
    }

    #[test]
    fn test_reads_angle_register_at_device_address() {
        let mut sensor = Mt6701::new(bus([0, 0]));
        sensor.read_raw_count().unwrap();
        let bus = &sensor.i2c;
        assert_eq!(bus.last_address, Some(0x06));
        assert_eq!(bus.last_register, Some(0x03));
    }

    #[test]
    fn test_nack_maps_to_sensor_error() {
        let mut b = bus([0, 0]);
        b.fail = true;
        let mut sensor = Mt6701::new(b);
        assert_eq!(sensor.read_raw_count(), Err(SensorError::NoAcknowledge));
    }
}
