//! 設定保存タスク
//!
//! CAN受信タスクからの要求でフラッシュの読み書きを行う。
//! 制御ループからは呼ばない（消去中はフラッシュがストールするため）。

use echo_foc::config::{StorageCommand, StoredConfig};

use crate::eeprom::ConfigStore;
use crate::fmt::*;
use crate::state::{local_node, STORAGE_REQUEST};

#[embassy_executor::task]
pub async fn storage_task(mut store: ConfigStore) {
    info!("Storage task started");
    let node = local_node();

    loop {
        let command = STORAGE_REQUEST.wait().await;

        match command {
            StorageCommand::Save => {
                let config = StoredConfig {
                    node_index: node.index(),
                    params: node.snapshot(),
                };
                match store.write(&config) {
                    Ok(()) => info!("Config saved successfully"),
                    Err(e) => error!("Failed to save config: {:?}", e),
                }
            }
            StorageCommand::Reload => match store.read() {
                Ok(config) => {
                    node.set_index(config.node_index);
                    node.replace(config.params);
                    info!("Config reloaded: node {}", config.node_index.get());
                }
                Err(e) => error!("Failed to reload config: {:?}", e),
            },
            StorageCommand::ResetDefaults => {
                let config = StoredConfig {
                    node_index: node.index(),
                    ..StoredConfig::default()
                };
                if let Err(e) = store.write(&config) {
                    error!("Failed to write default config: {:?}", e);
                }
                node.replace(config.params);
                info!("Config reset to defaults");
            }
        }
    }
}
