//! 遅延実行スケジューラの trait 定義
//!
//! 「N 秒後にこの処理を実行する」だけを提供する。キャンセルは持たない:
//! 遅延タスク側が実行時に現在の状態を再確認し、不要なら何もしない。

use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;
use uuid::Uuid;

use super::{ConnectionContext, Timestamp, UserId};

/// スケジュールされる処理本体
pub type ScheduledFuture = BoxFuture<'static, ()>;

/// スケジュールされる処理の種別（ログと観測用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum ScheduledJob {
    FinalizeDisconnection {
        user_id: UserId,
        context: ConnectionContext,
    },
}

/// スケジュール済みタスクのハンドル
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub job: ScheduledJob,
    /// 実行予定時刻
    pub run_at: Timestamp,
    #[serde(skip)]
    pub delay: Duration,
}

/// Scheduler trait
pub trait Scheduler: Send + Sync {
    /// `delay` 経過後に `task` を実行するよう登録する
    fn schedule(&self, delay: Duration, job: ScheduledJob, task: ScheduledFuture)
    -> ScheduledTask;
}
