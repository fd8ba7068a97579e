// Packed motor feedback record (7 bytes)
//
// Bit layout, LSB first over a little-endian 56-bit word:
//   [0..20)  position   signed, 2^-12 rev per LSB (±128 rev)
//   [20..32) current    signed, 10 mA per LSB (±20.47 A)
//   [32..44) velocity   signed, 0.05 rad/s per LSB (±102.35 rad/s)
//   [44]     wraparound position left the ±128 rev window
//   [45..48) status     see `status`
//   [48..56) crc        CRC-8 (poly 0x07, init 0) over bytes 0..6

use core::f32::consts::TAU;

use libm::roundf;

/// Status bits
pub mod status {
    /// Output stage enabled
    pub const ENABLED: u8 = 0b001;
    /// Sensor fault latched
    pub const SENSOR_FAULT: u8 = 0b010;
    /// Supply out of range
    pub const SUPPLY_FAULT: u8 = 0b100;
}

const POSITION_BITS: u32 = 20;
const CURRENT_BITS: u32 = 12;
const VELOCITY_BITS: u32 = 12;

const POSITION_LSB: f32 = TAU / 4096.0;
const CURRENT_LSB: f32 = 0.01;
const VELOCITY_LSB: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FeedbackError {
    CrcMismatch { expected: u8, actual: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FeedbackRecord {
    /// Shaft angle [rad], within ±128 rev once decoded
    pub position: f32,
    /// q-axis current [A]
    pub current: f32,
    /// Shaft velocity [rad/s]
    pub velocity: f32,
    pub wrapped: bool,
    /// 3-bit status, see [`status`]
    pub status: u8,
}

impl FeedbackRecord {
    pub const LEN: usize = 7;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let position_counts = quantize_i64(self.position, POSITION_LSB);
        let window = 1i64 << (POSITION_BITS - 1);
        let wrapped = self.wrapped || position_counts >= window || position_counts < -window;

        let mut word: u64 = 0;
        word |= to_field(position_counts, POSITION_BITS);
        word |= saturate(quantize_i64(self.current, CURRENT_LSB), CURRENT_BITS) << 20;
        word |= saturate(quantize_i64(self.velocity, VELOCITY_LSB), VELOCITY_BITS) << 32;
        word |= (wrapped as u64) << 44;
        word |= ((self.status & 0x07) as u64) << 45;

        let le = word.to_le_bytes();
        let mut out = [0u8; Self::LEN];
        out[..6].copy_from_slice(&le[..6]);
        out[6] = crc8(&out[..6]);
        out
    }

    pub fn decode(bytes: &[u8; Self::LEN]) -> Result<Self, FeedbackError> {
        let expected = crc8(&bytes[..6]);
        if expected != bytes[6] {
            return Err(FeedbackError::CrcMismatch {
                expected,
                actual: bytes[6],
            });
        }

        let mut le = [0u8; 8];
        le[..6].copy_from_slice(&bytes[..6]);
        let word = u64::from_le_bytes(le);

        Ok(Self {
            position: sign_extend(word, POSITION_BITS) as f32 * POSITION_LSB,
            current: sign_extend(word >> 20, CURRENT_BITS) as f32 * CURRENT_LSB,
            velocity: sign_extend(word >> 32, VELOCITY_BITS) as f32 * VELOCITY_LSB,
            wrapped: (word >> 44) & 1 != 0,
            status: ((word >> 45) & 0x07) as u8,
        })
    }
}

fn quantize_i64(value: f32, lsb: f32) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    // `as` saturates out-of-range floats
    roundf(value / lsb) as i64
}

/// Two's complement truncation (position wraps inside its window)
fn to_field(value: i64, bits: u32) -> u64 {
    (value as u64) & ((1u64 << bits) - 1)
}

fn saturate(value: i64, bits: u32) -> u64 {
    let max = (1i64 << (bits - 1)) - 1;
    let min = -(1i64 << (bits - 1));
    to_field(value.clamp(min, max), bits)
}

fn sign_extend(word: u64, bits: u32) -> i64 {
    let field = word & ((1u64 << bits) - 1);
    let shift = 64 - bits;
    ((field << shift) as i64) >> shift
}

/// CRC-8, polynomial 0x07, init 0x00
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(position: f32, current: f32, velocity: f32) -> FeedbackRecord {
        FeedbackRecord {
            position,
            current,
            velocity,
            wrapped: false,
            status: status::ENABLED,
        }
    }

    #[test]
    fn test_crc8_check_value() {
        // CRC-8/SMBUS check value
        assert_eq!(crc8(b"123456789"), 0xF4);
    }

    #[test]
    fn test_values_survive_quantization() {
        let decoded = FeedbackRecord::decode(&record(-3.0, 1.23, 12.5).encode()).unwrap();
        assert!((decoded.position + 3.0).abs() <= POSITION_LSB / 2.0);
        assert!((decoded.current - 1.23).abs() <= CURRENT_LSB / 2.0 + 1e-6);
        assert!((decoded.velocity - 12.5).abs() < 1e-6);
        assert_eq!(decoded.status, status::ENABLED);
        assert!(!decoded.wrapped);
    }

    #[test]
    fn test_out_of_range_saturates_and_flags_wrap() {
        let decoded =
            FeedbackRecord::decode(&record(200.0 * TAU, 100.0, -500.0).encode()).unwrap();
        assert!(decoded.wrapped);
        assert!((decoded.current - 20.47).abs() < 1e-4);
        assert!((decoded.velocity + 102.4).abs() < 1e-4);
    }

    #[test]
    fn test_corrupted_record_is_rejected() {
        let mut bytes = record(1.0, 0.5, 2.0).encode();
        bytes[2] ^= 0x10;
        assert!(matches!(
            FeedbackRecord::decode(&bytes),
            Err(FeedbackError::CrcMismatch { .. })
        ));
    }
}
