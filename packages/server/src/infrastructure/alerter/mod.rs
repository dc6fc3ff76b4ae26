//! Alerter 実装
//!
//! - `log`: tracing にエラーとして出力するだけの実装
//! - `webhook`: JSON を HTTP POST する実装

pub mod log;
pub mod webhook;

pub use log::LogAlerter;
pub use webhook::WebhookAlerter;
