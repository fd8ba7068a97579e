//! CAN通信タスク
//!
//! 受信と送信は別タスク。送信が詰まっても受信側のパラメータ反映は遅れない。
//! 受信: フレームを`NodeTable`へ渡してノード設定を更新する。
//! 送信: 制御ループからの最新テレメトリをパートナー角度とフィードバックとして送る。
//! 送信が詰まったらそのサンプルは捨てる（再送しない）。

use embassy_stm32::can::{self, CanRx, CanTx};
use embassy_time::{with_timeout, Duration};
use embedded_can::Error as _;

use echo_foc::can_protocol::{BusMessage, PartnerMap};
use echo_foc::config::params;
use echo_foc::coordination::Dispatch;

use crate::fmt::*;
use crate::state::{NODES, STORAGE_REQUEST, TELEMETRY};

/// CAN受信タスク - フレームをノード設定へ反映
#[embassy_executor::task]
pub async fn can_rx_task(mut rx: CanRx<'static>) {
    info!("CAN RX task started");

    loop {
        let envelope = match rx.read().await {
            Ok(envelope) => envelope,
            Err(e) => {
                NODES.on_bus_error(e.kind());
                continue;
            }
        };
        let message = match BusMessage::from_frame(&envelope.frame) {
            Ok(message) => message,
            Err(e) => {
                debug!("CAN frame ignored: {:?}", e);
                continue;
            }
        };
        match NODES.on_receive(&message) {
            Dispatch::Storage(node, command) => {
                info!("node {}: storage command {:?}", node.get(), command);
                STORAGE_REQUEST.signal(command);
            }
            Dispatch::Feedback(node, record) => {
                // 自分のインデックスで他のコントローラが送信している
                error!(
                    "node {}: index in use by another controller (status {})",
                    node.get(),
                    record.status
                );
            }
            _ => {}
        }
    }
}

/// CAN送信タスク - 最新テレメトリを送信
#[embassy_executor::task]
pub async fn can_tx_task(mut tx: CanTx<'static>) {
    let partners = PartnerMap::DEFAULT;
    let tx_timeout = Duration::from_millis(params::can::TX_TIMEOUT_MS);

    info!("CAN TX task started");

    loop {
        let sample = TELEMETRY.next().await;
        let messages = [sample.partner_message(&partners), sample.feedback_message()];
        for message in messages {
            let Some(frame) = message.to_frame::<can::frame::Frame>() else {
                error!("CAN frame build failed: id 0x{:03X}", message.id.raw());
                continue;
            };
            if with_timeout(tx_timeout, tx.write(&frame)).await.is_err() {
                debug!("CAN TX busy, telemetry sample dropped");
                break;
            }
        }
    }
}
