//! タスクモジュール
//!
//! 各タスクの実装を分離して管理します。

pub mod can;
pub mod motor_control;
pub mod storage;
pub mod voltage_monitor;

// タスク関数を再エクスポート
pub use can::{can_rx_task, can_tx_task};
pub use motor_control::motor_control_task;
pub use storage::storage_task;
pub use voltage_monitor::voltage_monitor_task;
