//! 帯域外アラート送信の trait 定義

use async_trait::async_trait;
use serde::Serialize;

use super::{AlertError, ConnectionContext, Timestamp, UserId};

/// 重要なスコープで障害が起きたときに送るアラート
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub operation: &'static str,
    pub user_id: UserId,
    pub context: ConnectionContext,
    pub error: String,
    pub raised_at: Timestamp,
}

impl Alert {
    /// 人が読むための 1 行メッセージ
    pub fn summary(&self) -> String {
        format!(
            "presence operation '{}' failed for user '{}' in {}: {}",
            self.operation, self.user_id, self.context, self.error
        )
    }
}

/// Alerter trait
///
/// 呼び出し側から見て fire-and-forget。送信失敗は元のエラーを置き換えない。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<(), AlertError>;
}
