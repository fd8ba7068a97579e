//! フラッシュメモリベースのEEPROM実装
//!
//! STM32G431VBの最終フラッシュページ（ページ63）を使用して設定を保存

use embassy_stm32::{
    crc::Crc,
    flash::{Blocking, Flash},
};

use echo_foc::config::{ConfigChecksum, StorageError, StoredConfig, RECORD_LEN};

use crate::fmt::*;

/// STM32G431VBのフラッシュページサイズ（2KB）
pub const FLASH_PAGE_SIZE: u32 = 2048;

/// 最終ページの開始アドレス（128KB - 2KB = 0x0801F800）
pub const LAST_PAGE_START: u32 = 0x0801_F800;

/// `Flash`のオフセット（フラッシュ先頭からの相対）
const LAST_PAGE_OFFSET: u32 = LAST_PAGE_START - 0x0800_0000;

/// EEPROM操作のエラー型
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EepromError {
    FlashReadError,
    FlashEraseError,
    FlashWriteError,
    /// レコードの検証エラー
    Invalid(StorageError),
}

/// CRCペリフェラル（CRC-32/MPEG-2 設定済み）
pub struct HardwareCrc(pub Crc<'static>);

impl ConfigChecksum for HardwareCrc {
    fn checksum(&mut self, data: &[u8]) -> u32 {
        self.0.reset();
        self.0.feed_bytes(data)
    }
}

pub struct ConfigStore {
    flash: Flash<'static, Blocking>,
    crc: HardwareCrc,
}

impl ConfigStore {
    pub fn new(flash: Flash<'static, Blocking>, crc: HardwareCrc) -> Self {
        Self { flash, crc }
    }

    /// フラッシュから設定を読み込む
    pub fn read(&mut self) -> Result<StoredConfig, EepromError> {
        info!("Reading config from flash at 0x{:08X}", LAST_PAGE_START);

        let mut buffer = [0u8; RECORD_LEN];
        self.flash
            .blocking_read(LAST_PAGE_OFFSET, &mut buffer)
            .map_err(|e| {
                error!("Flash read failed: {:?}", e);
                EepromError::FlashReadError
            })?;

        StoredConfig::from_bytes(&buffer, &mut self.crc).map_err(|e| {
            error!("Stored config rejected: {:?}", e);
            EepromError::Invalid(e)
        })
    }

    /// フラッシュに設定を書き込む
    pub fn write(&mut self, config: &StoredConfig) -> Result<(), EepromError> {
        let data = config.to_bytes(&mut self.crc);

        info!("Erasing flash page at 0x{:08X}", LAST_PAGE_START);
        self.flash
            .blocking_erase(LAST_PAGE_OFFSET, LAST_PAGE_OFFSET + FLASH_PAGE_SIZE)
            .map_err(|e| {
                error!("Flash erase failed: {:?}", e);
                EepromError::FlashEraseError
            })?;

        self.flash
            .blocking_write(LAST_PAGE_OFFSET, &data)
            .map_err(|e| {
                error!("Flash write failed: {:?}", e);
                EepromError::FlashWriteError
            })?;

        info!("Config saved ({} bytes)", data.len());
        Ok(())
    }

    /// 設定を読み込み、失敗時はデフォルト設定で初期化
    pub fn load_or_initialize(&mut self) -> StoredConfig {
        match self.read() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load config: {:?}, initializing with defaults", e);
                let config = StoredConfig::default();
                if let Err(e) = self.write(&config) {
                    error!("Failed to write default config: {:?}, using in-memory defaults", e);
                }
                config
            }
        }
    }
}
