//! Scheduler 実装
//!
//! - `tokio_timer`: tokio タスクと `sleep` による実装（本番用）
//! - `manual`: 明示的に実行するまで溜めておく実装（テストやシミュレーション用）

pub mod manual;
pub mod tokio_timer;

pub use manual::ManualScheduler;
pub use tokio_timer::TokioScheduler;
