//! UseCase: 切断シグナルの処理
//!
//! 切断シグナルを受け取ったら一時切断として記録し、猶予期間の経過後に
//! 最終切断を行うタスクをスケジュールする。タスクはキャンセルしない:
//! 実行時にレコードが再接続済みなら何もしない。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - 切断の記録と最終切断タスクのスケジュール
//! - 重複シグナルで 2 つ目のタスクがスケジュールされないこと
//! - 猶予期間内の再接続で最終切断が no-op になること
//! - 異常な切断頻度の検知（閾値ちょうど / 1 つ下）
//!
//! ### どのような状況を想定しているか
//! - 正常系：切断 → 猶予期間経過 → 最終切断
//! - エッジケース：猶予期間内の再接続、重複した切断シグナル
//! - 異常系：データストア障害（検知は false、スケジュールされた最終切断はログとアラート）

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use kehai_shared::time::Clock;

use crate::{
    config::PresenceConfig,
    domain::{
        ClientInfo, ConnectionContext, ConnectionRecordRepository, ConnectionStatus, HistoryQuery,
        ScheduledFuture, ScheduledJob, ScheduledTask, Scheduler, Timestamp, UserDirectory, UserId,
    },
};

use super::{
    connection_logger::ConnectionLogger, error::PresenceError,
    failure_containment::FailureContainment,
};

/// 切断シグナルを処理するユースケース
pub struct DisconnectionHandler {
    logger: Arc<ConnectionLogger>,
    users: Arc<dyn UserDirectory>,
    /// 切断頻度の集計に使う（書き込みは Logger 経由のみ）
    repository: Arc<dyn ConnectionRecordRepository>,
    scheduler: Arc<dyn Scheduler>,
    /// スケジュールされた最終切断の失敗を報告する
    containment: FailureContainment,
    config: Arc<PresenceConfig>,
    clock: Arc<dyn Clock>,
}

impl DisconnectionHandler {
    pub fn new(
        logger: Arc<ConnectionLogger>,
        users: Arc<dyn UserDirectory>,
        repository: Arc<dyn ConnectionRecordRepository>,
        scheduler: Arc<dyn Scheduler>,
        containment: FailureContainment,
        config: Arc<PresenceConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            logger,
            users,
            repository,
            scheduler,
            containment,
            config,
            clock,
        }
    }

    /// 切断シグナルを処理
    ///
    /// # Returns
    ///
    /// * `Ok(Some(task))` - 一時切断を記録し、最終切断をスケジュールした
    /// * `Ok(None)` - ユーザーが存在しない、または接続中ではなかった
    pub async fn handle(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
        client: &ClientInfo,
    ) -> Result<Option<ScheduledTask>, PresenceError> {
        if !self.users.user_exists(user_id).await? {
            tracing::debug!("Ignoring disconnection from unknown user '{}'", user_id);
            return Ok(None);
        }

        let grace_period = self.calculate_grace_period(context);
        let mut extra = BTreeMap::new();
        extra.insert(
            "grace_period_secs".to_string(),
            serde_json::json!(grace_period.as_secs()),
        );

        if self
            .logger
            .record_disconnection(user_id, context, client, extra)
            .await?
            .is_none()
        {
            return Ok(None);
        }

        let logger = self.logger.clone();
        let containment = self.containment.clone();
        let (owner, scope) = (user_id.clone(), context.clone());
        let task: ScheduledFuture = Box::pin(async move {
            run_finalization(&logger, &containment, &owner, &scope).await;
        });
        let scheduled = self.scheduler.schedule(
            grace_period,
            ScheduledJob::FinalizeDisconnection {
                user_id: user_id.clone(),
                context: context.clone(),
            },
            task,
        );
        tracing::info!(
            "Scheduled finalization of '{}' in {} after {}s (task {})",
            user_id,
            context,
            grace_period.as_secs(),
            scheduled.id
        );

        if self.detect_abnormal_disconnection(user_id, context).await {
            tracing::warn!(
                "Abnormal disconnection frequency for '{}' in {} ({} or more within {}s)",
                user_id,
                context,
                self.config.disconnection_threshold,
                self.config.analysis_window_secs
            );
        }

        Ok(Some(scheduled))
    }

    /// スコープの種類ごとの猶予期間
    pub fn calculate_grace_period(&self, context: &ConnectionContext) -> Duration {
        self.config.grace_period(&context.kind)
    }

    /// 分析期間内の一時切断の回数が閾値以上かどうか
    ///
    /// 集計に失敗した場合は `false` を返す。
    pub async fn detect_abnormal_disconnection(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
    ) -> bool {
        let since = Timestamp::new(self.clock.now_millis())
            .minus_secs(self.config.analysis_window().as_secs());
        let query = HistoryQuery {
            user_id: user_id.clone(),
            context: Some(context.clone()),
            since,
        };

        match self.repository.find_history(query).await {
            Ok(records) => {
                let count: usize = records
                    .iter()
                    .map(|record| {
                        record.count_transitions_into(
                            ConnectionStatus::TemporarilyDisconnected,
                            since,
                        )
                    })
                    .sum();
                count >= self.config.disconnection_threshold
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to count disconnections of '{}' in {}: {}",
                    user_id,
                    context,
                    e
                );
                false
            }
        }
    }

    /// 最終切断を記録し、失敗はログとアラートで報告する（呼び出し元には返さない）
    pub async fn finalize_disconnection(&self, user_id: &UserId, context: &ConnectionContext) {
        run_finalization(&self.logger, &self.containment, user_id, context).await;
    }
}

/// 猶予期間の経過後にスケジューラから実行される最終切断
async fn run_finalization(
    logger: &ConnectionLogger,
    containment: &FailureContainment,
    user_id: &UserId,
    context: &ConnectionContext,
) {
    let result = logger.record_final_disconnection(user_id, context).await;
    // the error is already logged and alerted on
    let _ = containment.contain("finalize_disconnection", user_id, context, result);
}
