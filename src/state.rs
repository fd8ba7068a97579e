//! グローバル共有状態管理
//!
//! タスク間で共有される状態。ノード設定は`NodeTable`が、テレメトリは
//! 最新値1個だけを保持する`TelemetryChannel`が持つ。

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;

use echo_foc::can_protocol::NodeIndex;
use echo_foc::config::StorageCommand;
use echo_foc::coordination::{NodeTable, SharedNode, TelemetryChannel};
use echo_foc::voltage_monitor::SupplyState;

/// このボードが受け持つノード（起動時にフラッシュのノード番号で再バインド）
pub static NODES: NodeTable<1> = NodeTable::new([SharedNode::new(NodeIndex::wrapping(0))]);

/// 制御ループ → CAN送信タスク
pub static TELEMETRY: TelemetryChannel = TelemetryChannel::new();

/// 電圧監視ステータス（制御ループが毎周期読む）
pub static SUPPLY_STATE: Mutex<CriticalSectionRawMutex, Cell<SupplyState>> =
    Mutex::new(Cell::new(SupplyState::new()));

/// CAN受信 → ストレージタスク
pub static STORAGE_REQUEST: Signal<CriticalSectionRawMutex, StorageCommand> = Signal::new();

/// 最新の電源状態
pub fn supply_state() -> SupplyState {
    SUPPLY_STATE.lock(|s| s.get())
}

/// このボードのノード
pub fn local_node() -> &'static SharedNode {
    &NODES.nodes()[0]
}
