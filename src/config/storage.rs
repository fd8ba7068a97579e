//! 設定パラメータの永続化レコード
//!
//! `NodeParams`の保存対象フィールドとノード番号を、固定長のリトルエンディアン
//! バイト列にシリアライズする。末尾4バイトがCRC32。
//! 制御モード・目標値・パートナー角度は保存しない（起動時は常にDisabled）。

use crate::can_protocol::NodeIndex;
use crate::foc::{ControlMode, Direction, PidGains, TorqueMode};
use crate::node::{NodeParams, NodeRole};

/// 設定データのマジックナンバー（"ECHO"のASCII）
pub const CONFIG_MAGIC: u32 = 0x4F48_4345;

/// 現在の設定バージョン
pub const CONFIG_VERSION: u16 = 1;

/// レコード長（フラッシュのダブルワード書き込み単位に揃える）
pub const RECORD_LEN: usize = 112;

const CRC_OFFSET: usize = RECORD_LEN - 4;

/// CRC計算器
///
/// ターゲットではCRCペリフェラル、テストではソフトウェア実装を使う。
/// どちらも CRC-32/MPEG-2（poly 0x04C11DB7, init 0xFFFFFFFF, 反転なし）。
pub trait ConfigChecksum {
    fn checksum(&mut self, data: &[u8]) -> u32;
}

/// ソフトウェア CRC-32/MPEG-2
#[derive(Debug, Default, Clone, Copy)]
pub struct Crc32Mpeg2;

impl ConfigChecksum for Crc32Mpeg2 {
    fn checksum(&mut self, data: &[u8]) -> u32 {
        let mut crc: u32 = 0xFFFF_FFFF;
        for &byte in data {
            crc ^= (byte as u32) << 24;
            for _ in 0..8 {
                crc = if crc & 0x8000_0000 != 0 {
                    (crc << 1) ^ 0x04C1_1DB7
                } else {
                    crc << 1
                };
            }
        }
        crc
    }
}

/// 設定読み込みエラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    InvalidSize,
    InvalidMagic,
    VersionMismatch,
    CrcMismatch,
    /// 列挙値・範囲外のフィールド
    InvalidField,
}

/// 永続化される設定
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StoredConfig {
    pub node_index: NodeIndex,
    pub params: NodeParams,
}

impl StoredConfig {
    pub const fn default() -> Self {
        Self {
            node_index: NodeIndex::wrapping(0),
            params: NodeParams::new(),
        }
    }

    /// バイト列へシリアライズ（CRC込み）
    pub fn to_bytes(&self, crc: &mut impl ConfigChecksum) -> [u8; RECORD_LEN] {
        let p = &self.params;
        let mut w = Writer::new();
        w.u32(CONFIG_MAGIC);
        w.u16(CONFIG_VERSION);
        w.u8(self.node_index.get());
        w.u8(p.role as u8);
        w.u8(p.pole_pairs);
        w.u8(p.sensor_direction.is_reversed() as u8);
        w.u8(p.torque_mode as u8);
        w.u8(0);
        w.u16(p.telemetry_divisor);
        for v in [
            p.phase_resistance,
            p.phase_inductance,
            p.bemf_constant,
            p.voltage_limit,
            p.current_limit,
            p.velocity_limit,
            p.zero_electrical_angle,
        ] {
            w.f32(v);
        }
        for gains in [&p.velocity_pid, &p.angle_pid, &p.current_pid] {
            w.gains(gains);
        }

        let mut bytes = w.finish();
        let sum = crc.checksum(&bytes[..CRC_OFFSET]);
        bytes[CRC_OFFSET..].copy_from_slice(&sum.to_le_bytes());
        bytes
    }

    /// バイト列から復元（マジック・バージョン・CRCを検証）
    pub fn from_bytes(bytes: &[u8], crc: &mut impl ConfigChecksum) -> Result<Self, StorageError> {
        if bytes.len() < RECORD_LEN {
            return Err(StorageError::InvalidSize);
        }
        let bytes = &bytes[..RECORD_LEN];

        let mut r = Reader::new(bytes);
        if r.u32() != CONFIG_MAGIC {
            return Err(StorageError::InvalidMagic);
        }
        if r.u16() != CONFIG_VERSION {
            return Err(StorageError::VersionMismatch);
        }

        let stored_crc = u32::from_le_bytes([
            bytes[CRC_OFFSET],
            bytes[CRC_OFFSET + 1],
            bytes[CRC_OFFSET + 2],
            bytes[CRC_OFFSET + 3],
        ]);
        if crc.checksum(&bytes[..CRC_OFFSET]) != stored_crc {
            return Err(StorageError::CrcMismatch);
        }

        let node_index = NodeIndex::new(r.u8()).ok_or(StorageError::InvalidField)?;
        let role = NodeRole::try_from(r.u8()).map_err(|_| StorageError::InvalidField)?;
        let pole_pairs = r.u8();
        let sensor_direction = Direction::from_reversed(r.u8() != 0);
        let torque_mode = TorqueMode::try_from(r.u8()).map_err(|_| StorageError::InvalidField)?;
        let _reserved = r.u8();
        let telemetry_divisor = r.u16().max(1);

        let mut params = NodeParams::new();
        params.role = role;
        params.pole_pairs = pole_pairs.max(1);
        params.sensor_direction = sensor_direction;
        params.torque_mode = torque_mode;
        params.telemetry_divisor = telemetry_divisor;
        params.phase_resistance = r.f32();
        params.phase_inductance = r.f32();
        params.bemf_constant = r.f32();
        params.voltage_limit = r.f32();
        params.current_limit = r.f32();
        params.velocity_limit = r.f32();
        params.zero_electrical_angle = r.f32();
        params.velocity_pid = r.gains();
        params.angle_pid = r.gains();
        params.current_pid = r.gains();
        params.controller = ControlMode::Disabled;

        Ok(Self { node_index, params })
    }
}

struct Writer {
    buf: [u8; RECORD_LEN],
    pos: usize,
}

impl Writer {
    fn new() -> Self {
        Self {
            buf: [0; RECORD_LEN],
            pos: 0,
        }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    fn u16(&mut self, v: u16) {
        self.put(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.put(&v.to_le_bytes());
    }

    fn gains(&mut self, g: &PidGains) {
        for v in [g.p, g.i, g.d, g.ramp, g.tf] {
            self.f32(v);
        }
    }

    fn finish(self) -> [u8; RECORD_LEN] {
        self.buf
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }

    fn gains(&mut self) -> PidGains {
        PidGains::new(self.f32(), self.f32(), self.f32(), self.f32(), self.f32())
    }
}

// header 14 + 7 floats + 3 gain sets must fit ahead of the CRC
const _: () = assert!(14 + 7 * 4 + 3 * 5 * 4 <= CRC_OFFSET);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_mpeg2_check_value() {
        assert_eq!(Crc32Mpeg2.checksum(b"123456789"), 0x0376_E6E7);
    }

    #[test]
    fn test_default_config() {
        let config = StoredConfig::default();
        assert_eq!(config.node_index.get(), 0);
        assert_eq!(config.params.controller, ControlMode::Disabled);
    }

    #[test]
    fn test_saved_fields_are_restored() {
        let mut config = StoredConfig::default();
        config.node_index = NodeIndex::new(3).unwrap();
        config.params.phase_resistance = 2.2;
        config.params.angle_pid.d = 0.125;
        config.params.role = NodeRole::Follower;
        config.params.sensor_direction = Direction::Reversed;
        config.params.controller = ControlMode::VelocityClosedLoop;
        config.params.target = 9.0;

        let bytes = config.to_bytes(&mut Crc32Mpeg2);
        let restored = StoredConfig::from_bytes(&bytes, &mut Crc32Mpeg2).unwrap();

        assert_eq!(restored.node_index.get(), 3);
        assert_eq!(restored.params.phase_resistance, 2.2);
        assert_eq!(restored.params.angle_pid.d, 0.125);
        assert_eq!(restored.params.role, NodeRole::Follower);
        assert_eq!(restored.params.sensor_direction, Direction::Reversed);
        // runtime-only state is not persisted
        assert_eq!(restored.params.controller, ControlMode::Disabled);
        assert_eq!(restored.params.target, 0.0);
    }

    #[test]
    fn test_corruption_is_detected() {
        let mut bytes = StoredConfig::default().to_bytes(&mut Crc32Mpeg2);
        bytes[20] ^= 0x01;
        assert_eq!(
            StoredConfig::from_bytes(&bytes, &mut Crc32Mpeg2),
            Err(StorageError::CrcMismatch)
        );
    }

    #[test]
    fn test_erased_flash_is_invalid_magic() {
        let bytes = [0xFFu8; RECORD_LEN];
        assert_eq!(
            StoredConfig::from_bytes(&bytes, &mut Crc32Mpeg2),
            Err(StorageError::InvalidMagic)
        );
        assert_eq!(
            StoredConfig::from_bytes(&bytes[..10], &mut Crc32Mpeg2),
            Err(StorageError::InvalidSize)
        );
    }

    #[test]
    fn test_record_fits_flash_page() {
        assert!(RECORD_LEN <= 2048);
        assert_eq!(RECORD_LEN % 8, 0);
    }
}
