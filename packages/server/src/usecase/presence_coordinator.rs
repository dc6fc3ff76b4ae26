//! UseCase: プレゼンスのファサード
//!
//! トランスポート層や他のドメインから呼ばれる唯一の入り口。
//! 呼び出しを Logger / 各 Handler / Analyzer に振り分け、エラーを封じ込める。
//!
//! - 状態を変更する操作のエラーはログに残して呼び出し元に返す
//! - `finalize_disconnection` はスケジューラから無人で呼ばれるため、エラーを返さない
//! - 重要なスコープ（デフォルトはディベート）での障害はアラートも送る。
//!   アラートは別タスクで送られ、呼び出し元の応答を遅らせない
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - `update_last_seen` の分岐（接続なし、接続中、一時切断中、終端状態）
//! - 障害時のアラート送信とエラーの再送出
//!
//! ### どのような状況を想定しているか
//! - 正常系：ハートビートによる接続・再接続
//! - 異常系：データストア障害、アラート送信の失敗・タイムアウト

use std::sync::Arc;

use kehai_shared::time::Clock;
use serde::Serialize;

use crate::{
    config::PresenceConfig,
    domain::{
        Alerter, ClientInfo, ConnectionContext, ConnectionRecord,
        ConnectionRecordRepository, ConnectionStatus, ScheduledTask, Scheduler, Timestamp,
        UserDirectory, UserId,
    },
};

use super::{
    connection_analyzer::{ConnectionAnalyzer, ConnectionStats, PatternReport, QualityScore},
    connection_logger::ConnectionLogger,
    disconnection_handler::DisconnectionHandler,
    error::PresenceError,
    failure_containment::FailureContainment,
    reconnection_handler::{ReconnectionHandler, ReconnectionStats},
};

/// `update_last_seen` で実際に行われた処理
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "record", rename_all = "snake_case")]
pub enum LastSeenOutcome {
    /// 接続中のレコードにハートビートを記録した
    Heartbeat,
    /// 一時切断中のレコードを再接続させた
    Reconnected,
    /// 新しいセッションを開始した
    Connected(ConnectionRecord),
    /// 何もしなかった（存在しないユーザー、競合した別のシグナルが先に処理された）
    Ignored,
}

impl LastSeenOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            LastSeenOutcome::Heartbeat => "heartbeat",
            LastSeenOutcome::Reconnected => "reconnected",
            LastSeenOutcome::Connected(_) => "connected",
            LastSeenOutcome::Ignored => "ignored",
        }
    }
}

/// プレゼンスのファサード
pub struct PresenceCoordinator {
    logger: Arc<ConnectionLogger>,
    disconnection: DisconnectionHandler,
    reconnection: ReconnectionHandler,
    analyzer: ConnectionAnalyzer,
    containment: FailureContainment,
    config: Arc<PresenceConfig>,
    clock: Arc<dyn Clock>,
}

impl PresenceCoordinator {
    pub fn new(
        logger: Arc<ConnectionLogger>,
        disconnection: DisconnectionHandler,
        reconnection: ReconnectionHandler,
        analyzer: ConnectionAnalyzer,
        containment: FailureContainment,
        config: Arc<PresenceConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            logger,
            disconnection,
            reconnection,
            analyzer,
            containment,
            config,
            clock,
        }
    }

    /// 外部の依存からユースケース一式を組み立てる
    pub fn with_collaborators(
        repository: Arc<dyn ConnectionRecordRepository>,
        users: Arc<dyn UserDirectory>,
        scheduler: Arc<dyn Scheduler>,
        alerter: Arc<dyn Alerter>,
        config: PresenceConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = Arc::new(config);
        let containment = FailureContainment::new(alerter, config.clone(), clock.clone());
        let logger = Arc::new(ConnectionLogger::new(
            repository.clone(),
            users.clone(),
            clock.clone(),
        ));
        let disconnection = DisconnectionHandler::new(
            logger.clone(),
            users.clone(),
            repository.clone(),
            scheduler,
            containment.clone(),
            config.clone(),
            clock.clone(),
        );
        let reconnection = ReconnectionHandler::new(
            logger.clone(),
            users,
            repository.clone(),
            config.clone(),
            clock.clone(),
        );
        let analyzer = ConnectionAnalyzer::new(repository, config.clone(), clock.clone());

        Self::new(
            logger,
            disconnection,
            reconnection,
            analyzer,
            containment,
            config,
            clock,
        )
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// 注入された時計の現在時刻
    pub fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    // ========================================
    // 状態を変更する操作
    // ========================================

    pub async fn record_initial_connection(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
        client: &ClientInfo,
    ) -> Result<Option<ConnectionRecord>, PresenceError> {
        let result = self
            .logger
            .record_initial_connection(user_id, context, client)
            .await;
        self.containment
            .contain("record_initial_connection", user_id, context, result)
    }

    pub async fn handle_disconnection(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
        client: &ClientInfo,
    ) -> Result<Option<ScheduledTask>, PresenceError> {
        let result = self.disconnection.handle(user_id, context, client).await;
        self.containment
            .contain("handle_disconnection", user_id, context, result)
    }

    pub async fn handle_reconnection(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
    ) -> Result<bool, PresenceError> {
        let result = self.reconnection.handle(user_id, context).await;
        self.containment
            .contain("handle_reconnection", user_id, context, result)
    }

    /// 明示的な退出（猶予期間なしで終端状態にする）
    pub async fn handle_graceful_disconnection(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
        reason: Option<String>,
    ) -> Result<Option<ConnectionRecord>, PresenceError> {
        let result = self
            .logger
            .record_graceful_disconnection(user_id, context, reason)
            .await;
        self.containment
            .contain("handle_graceful_disconnection", user_id, context, result)
    }

    /// 最終切断を記録する。エラーは呼び出し元に返さない
    pub async fn finalize_disconnection(&self, user_id: &UserId, context: &ConnectionContext) {
        self.disconnection
            .finalize_disconnection(user_id, context)
            .await;
    }

    /// クライアントからの定期的なシグナル
    ///
    /// 現在の状態によって、ハートビート・暗黙の再接続・新しいセッションの開始のいずれかを行う。
    pub async fn update_last_seen(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
        client: &ClientInfo,
    ) -> Result<LastSeenOutcome, PresenceError> {
        let result = self.apply_last_seen(user_id, context, client).await;
        self.containment
            .contain("update_last_seen", user_id, context, result)
    }

    async fn apply_last_seen(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
        client: &ClientInfo,
    ) -> Result<LastSeenOutcome, PresenceError> {
        let status = self
            .logger
            .current_record(user_id, context)
            .await?
            .map(|record| record.status);

        let outcome = match status {
            Some(ConnectionStatus::Connected) => {
                if self.logger.update_heartbeat(user_id, context).await? {
                    LastSeenOutcome::Heartbeat
                } else {
                    LastSeenOutcome::Ignored
                }
            }
            Some(ConnectionStatus::TemporarilyDisconnected) => {
                if self.reconnection.handle(user_id, context).await? {
                    LastSeenOutcome::Reconnected
                } else {
                    LastSeenOutcome::Ignored
                }
            }
            None | Some(ConnectionStatus::Disconnected)
            | Some(ConnectionStatus::GracefullyDisconnected) => match self
                .logger
                .record_initial_connection(user_id, context, client)
                .await?
            {
                Some(record) => LastSeenOutcome::Connected(record),
                None => LastSeenOutcome::Ignored,
            },
        };
        Ok(outcome)
    }

    // ========================================
    // 読み取り専用のクエリ
    // ========================================

    pub async fn get_connection_state(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
    ) -> Result<Option<ConnectionStatus>, PresenceError> {
        Ok(self
            .logger
            .current_record(user_id, context)
            .await?
            .map(|record| record.status))
    }

    pub async fn get_connection_record(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
    ) -> Result<Option<ConnectionRecord>, PresenceError> {
        self.logger.current_record(user_id, context).await
    }

    /// 全てのスコープを合わせた直近 `hours` 時間の統計
    pub async fn get_connection_quality(
        &self,
        user_id: &UserId,
        hours: u32,
    ) -> Result<ConnectionStats, PresenceError> {
        self.analyzer
            .get_basic_connection_stats(user_id, None, hours)
            .await
    }

    pub async fn detect_anomalous_patterns(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
    ) -> PatternReport {
        self.analyzer
            .analyze_connection_patterns(user_id, context)
            .await
    }

    pub async fn get_connection_quality_score(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
    ) -> Result<QualityScore, PresenceError> {
        self.analyzer
            .calculate_connection_quality_score(user_id, context)
            .await
    }

    pub async fn get_reconnection_stats(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
        hours: u32,
    ) -> Result<ReconnectionStats, PresenceError> {
        self.reconnection
            .get_reconnection_stats(user_id, context, hours)
            .await
    }
}
