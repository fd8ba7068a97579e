//! echo-foc: FOC motor node
//!
//! ハードウェア非依存の制御スタック一式。ファームウェア（`main.rs`）は
//! ここのトレイトを実装してタスクから呼び出すだけ。

#![cfg_attr(not(test), no_std)]

mod fmt;

pub mod can_protocol;
pub mod config;
pub mod control_loop;
pub mod coordination;
pub mod current_sense;
pub mod driver;
pub mod foc;
pub mod node;
pub mod sensor;
pub mod voltage_monitor;
