//! ログ出力のみの Alerter 実装

use async_trait::async_trait;

use crate::domain::{Alert, AlertError, Alerter};

/// アラートを `tracing::error!` で出力する Alerter
///
/// 外部の通知先が設定されていない場合のデフォルト。
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn notify(&self, alert: &Alert) -> Result<(), AlertError> {
        tracing::error!(
            operation = alert.operation,
            user_id = %alert.user_id,
            context = %alert.context,
            "ALERT: {}",
            alert.summary()
        );
        Ok(())
    }
}
