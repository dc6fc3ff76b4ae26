//! UseCase: 障害の封じ込め
//!
//! 状態を変更する操作のエラーをログに残し、重要なスコープ（デフォルトはディベート）
//! ではアラートも送る。アラートは別タスクでタイムアウト付きで送り、呼び出し元は待たない。
//! 送信の失敗は元のエラーを置き換えない。
//!
//! Coordinator の各操作と、スケジューラから無人で実行される最終切断の両方がこのポリシーを使う。

use std::sync::Arc;

use kehai_shared::time::Clock;
use tokio::task::JoinHandle;

use crate::{
    config::PresenceConfig,
    domain::{Alert, Alerter, ConnectionContext, Timestamp, UserId},
};

use super::error::PresenceError;

/// エラーのログ出力とアラート送信のポリシー
#[derive(Clone)]
pub struct FailureContainment {
    alerter: Arc<dyn Alerter>,
    config: Arc<PresenceConfig>,
    clock: Arc<dyn Clock>,
}

impl FailureContainment {
    pub fn new(
        alerter: Arc<dyn Alerter>,
        config: Arc<PresenceConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            alerter,
            config,
            clock,
        }
    }

    /// エラーならログに残し、重要なスコープではアラートを送る。結果はそのまま返す
    pub fn contain<T>(
        &self,
        operation: &'static str,
        user_id: &UserId,
        context: &ConnectionContext,
        result: Result<T, PresenceError>,
    ) -> Result<T, PresenceError> {
        if let Err(e) = &result {
            tracing::error!(
                "Presence operation '{}' failed for '{}' in {}: {}",
                operation,
                user_id,
                context,
                e
            );
            if self.config.is_critical(&context.kind) {
                self.raise_alert(operation, user_id, context, e);
            }
        }
        result
    }

    /// アラートを別タスクで送る
    pub fn raise_alert(
        &self,
        operation: &'static str,
        user_id: &UserId,
        context: &ConnectionContext,
        error: &PresenceError,
    ) -> JoinHandle<()> {
        let alert = Alert {
            operation,
            user_id: user_id.clone(),
            context: context.clone(),
            error: error.to_string(),
            raised_at: Timestamp::new(self.clock.now_millis()),
        };
        let alerter = self.alerter.clone();
        let timeout = self.config.alert_timeout();

        tokio::spawn(async move {
            match tokio::time::timeout(timeout, alerter.notify(&alert)).await {
                Ok(Ok(())) => tracing::debug!("Alert sent: {}", alert.summary()),
                Ok(Err(e)) => {
                    tracing::warn!("Failed to send alert for '{}': {}", alert.operation, e)
                }
                Err(_) => tracing::warn!(
                    "Alert for '{}' timed out after {}ms",
                    alert.operation,
                    timeout.as_millis()
                ),
            }
        })
    }
}


#[cfg(test)]
mod tests {
    use super::recording::{RecordingAlerter, next_alert};
    use super::*;
    use crate::domain::{AlertError, RepositoryError};
    use async_trait::async_trait;
    use kehai_shared::time::ManualClock;
    use std::time::Duration;

    const START: i64 = 1_700_000_000_000;

    fn alice() -> UserId {
        UserId::new("alice".to_string()).unwrap()
    }

    fn debate() -> ConnectionContext {
        ConnectionContext::parse("debate", "d-1").unwrap()
    }

    fn lobby() -> ConnectionContext {
        ConnectionContext::parse("room", "lobby").unwrap()
    }

    fn store_failure() -> PresenceError {
        PresenceError::Repository(RepositoryError::Unavailable("connection refused".to_string()))
    }

    fn create_containment(alerter: Arc<dyn Alerter>, config: PresenceConfig) -> FailureContainment {
        FailureContainment::new(
            alerter,
            Arc::new(config),
            Arc::new(ManualClock::new(START)),
        )
    }

    #[tokio::test]
    async fn test_contain_alerts_in_critical_context() {
        // テスト項目: 重要なスコープでのエラーはアラートが送られ、元のエラーがそのまま返される
        // given (前提条件):
        let (alerter, mut alerts) = RecordingAlerter::new();
        let containment = create_containment(alerter, PresenceConfig::default());

        // when (操作):
        let result: Result<(), _> =
            containment.contain("handle_disconnection", &alice(), &debate(), Err(store_failure()));

        // then (期待する結果):
        assert_eq!(result, Err(store_failure()));
        let alert = next_alert(&mut alerts).await;
        assert_eq!(alert.operation, "handle_disconnection");
        assert_eq!(alert.context, debate());
        assert_eq!(alert.raised_at, Timestamp::new(START));
    }

    #[tokio::test]
    async fn test_contain_does_not_alert_in_regular_context_or_on_success() {
        // テスト項目: 待合室でのエラーや成功した操作ではアラートを送らない
        // given (前提条件):
        let (alerter, mut alerts) = RecordingAlerter::new();
        let containment = create_containment(alerter, PresenceConfig::default());

        // when (操作):
        let failed: Result<(), _> =
            containment.contain("handle_disconnection", &alice(), &lobby(), Err(store_failure()));
        let succeeded = containment.contain("handle_disconnection", &alice(), &debate(), Ok(7));
        tokio::task::yield_now().await;

        // then (期待する結果):
        assert_eq!(failed, Err(store_failure()));
        assert_eq!(succeeded, Ok(7));
        assert!(alerts.try_recv().is_err());
    }

    struct StalledAlerter;

    #[async_trait]
    impl Alerter for StalledAlerter {
        async fn notify(&self, _alert: &Alert) -> Result<(), AlertError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_contain_returns_without_waiting_for_alert() {
        // テスト項目: アラートの送信先が応答しなくても、呼び出し元はすぐに元のエラーを受け取る
        // given (前提条件):
        let config = PresenceConfig {
            alert_timeout_ms: 60_000,
            ..PresenceConfig::default()
        };
        let containment = create_containment(Arc::new(StalledAlerter), config);

        // when (操作):
        let result: Result<(), _> = tokio::time::timeout(Duration::from_millis(500), async {
            containment.contain("handle_reconnection", &alice(), &debate(), Err(store_failure()))
        })
        .await
        .expect("containment should not wait for the alert");

        // then (期待する結果):
        assert_eq!(result, Err(store_failure()));
    }

    #[tokio::test]
    async fn test_stalled_alert_is_bounded_by_timeout() {
        // テスト項目: 応答しないアラート送信はタイムアウトで打ち切られ、送信タスクが終了する
        // given (前提条件):
        let config = PresenceConfig {
            alert_timeout_ms: 20,
            ..PresenceConfig::default()
        };
        let containment = create_containment(Arc::new(StalledAlerter), config);

        // when (操作):
        let handle = containment.raise_alert("handle_reconnection", &alice(), &debate(), &store_failure());

        // then (期待する結果):
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("alert task should stop at the timeout")
            .unwrap();
    }

    struct RejectingAlerter;

    #[async_trait]
    impl Alerter for RejectingAlerter {
        async fn notify(&self, _alert: &Alert) -> Result<(), AlertError> {
            Err(AlertError::DeliveryFailed("503".to_string()))
        }
    }

    #[tokio::test]
    async fn test_alert_failure_does_not_mask_original_error() {
        // テスト項目: アラートの送信に失敗しても元のエラーが返され、送信タスクはパニックしない
        // given (前提条件):
        let containment = create_containment(Arc::new(RejectingAlerter), PresenceConfig::default());

        // when (操作):
        let result: Result<(), _> = containment.contain(
            "handle_graceful_disconnection",
            &alice(),
            &debate(),
            Err(store_failure()),
        );
        let handle = containment.raise_alert(
            "handle_graceful_disconnection",
            &alice(),
            &debate(),
            &store_failure(),
        );

        // then (期待する結果):
        assert_eq!(result, Err(store_failure()));
        handle.await.unwrap();
    }
}
