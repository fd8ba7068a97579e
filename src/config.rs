//! Configuration module
//!
//! デフォルトパラメータと、フラッシュに保存する設定レコードを提供します。
//! フラッシュへの読み書き自体はファームウェア側（`eeprom`）が行う。

pub mod params;
pub mod storage;

pub use storage::{ConfigChecksum, Crc32Mpeg2, StorageError, StoredConfig, RECORD_LEN};

/// CAN経由の永続化コマンド
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageCommand {
    /// 現在の設定をフラッシュへ保存
    Save,
    /// フラッシュから再読み込み
    Reload,
    /// デフォルトに戻して保存
    ResetDefaults,
}
