//! UseCase: 再接続シグナルの処理
//!
//! 一時切断中のレコードを CONNECTED に戻す。猶予期間は再接続を妨げない:
//! 最終切断タスクより先にデータストアに届いた方が勝つ。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - 再接続の可否判定（未知のユーザー、接続中、終端状態、重複シグナル）
//! - 再接続メタデータの組み立て
//! - 再接続統計の集計
//!
//! ### どのような状況を想定しているか
//! - 正常系：一時切断 → 再接続
//! - エッジケース：同じ「戻ってきた」シグナルの重複、猶予期間を過ぎてからの再接続
//! - 異常系：終端状態のレコードへの再接続

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use kehai_shared::time::Clock;
use serde::Serialize;

use crate::{
    config::PresenceConfig,
    domain::{
        ConnectionContext, ConnectionRecord, ConnectionRecordRepository, ConnectionStatus,
        HistoryQuery, ReconnectionMetadata, Timestamp, UserDirectory, UserId, state_machine,
    },
};

use super::{connection_logger::ConnectionLogger, error::PresenceError};

/// 再接続の統計
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconnectionStats {
    pub reconnection_count: usize,
    /// 平均切断時間（秒）
    pub average_disconnection_duration: f64,
    pub analysis_period_hours: u32,
}

/// 再接続シグナルを処理するユースケース
pub struct ReconnectionHandler {
    logger: Arc<ConnectionLogger>,
    users: Arc<dyn UserDirectory>,
    repository: Arc<dyn ConnectionRecordRepository>,
    config: Arc<PresenceConfig>,
    clock: Arc<dyn Clock>,
}

impl ReconnectionHandler {
    pub fn new(
        logger: Arc<ConnectionLogger>,
        users: Arc<dyn UserDirectory>,
        repository: Arc<dyn ConnectionRecordRepository>,
        config: Arc<PresenceConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            logger,
            users,
            repository,
            config,
            clock,
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    /// 再接続シグナルを処理
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - 再接続（またはレコードがない場合の新規接続）を記録した
    /// * `Ok(false)` - 何もしなかった
    pub async fn handle(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
    ) -> Result<bool, PresenceError> {
        if !self.users.user_exists(user_id).await? {
            tracing::debug!("Ignoring reconnection from unknown user '{}'", user_id);
            return Ok(false);
        }

        let current = self.logger.current_record(user_id, context).await?;
        if let Some(record) = &current {
            if record.status == ConnectionStatus::Connected {
                tracing::debug!("'{}' is already connected to {}", user_id, context);
                return Ok(false);
            }
            if self.reconnected_recently(record) && has_unreconciled_disconnection(record) {
                tracing::warn!(
                    "Duplicate reconnection signal for '{}' in {}, ignoring",
                    user_id,
                    context
                );
                return Ok(false);
            }
        }

        if !validate_reconnection(current.as_ref()) {
            tracing::warn!(
                "Rejected reconnection of '{}' to {}: session already ended",
                user_id,
                context
            );
            return Ok(false);
        }

        self.logger.record_reconnection(user_id, context).await
    }

    /// 現在のレコードが直近に再接続したばかりかどうか
    pub async fn is_reconnection_in_progress(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
    ) -> Result<bool, PresenceError> {
        Ok(self
            .logger
            .current_record(user_id, context)
            .await?
            .is_some_and(|record| self.reconnected_recently(&record)))
    }

    /// `reconnected_at` が直近（デフォルト 60 秒以内）かどうか
    pub fn reconnected_recently(&self, record: &ConnectionRecord) -> bool {
        let recency = Duration::from_secs(self.config.reconnection_recency_secs);
        let now = self.now();
        record
            .reconnected_at
            .is_some_and(|reconnected_at| now.seconds_since(reconnected_at) < recency.as_secs_f64())
    }

    /// 再接続メタデータを組み立てる（レコードは変更しない）
    pub fn build_reconnection_metadata(
        &self,
        record: &ConnectionRecord,
        extra: BTreeMap<String, serde_json::Value>,
    ) -> ReconnectionMetadata {
        ReconnectionMetadata::build(record, self.now(), extra)
    }

    /// 直近 `hours` 時間の再接続の統計
    pub async fn get_reconnection_stats(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
        hours: u32,
    ) -> Result<ReconnectionStats, PresenceError> {
        let now = self.now();
        let since = now.minus_secs(u64::from(hours) * 3600);
        let records = self
            .repository
            .find_history(HistoryQuery {
                user_id: user_id.clone(),
                context: Some(context.clone()),
                since,
            })
            .await?;

        let durations: Vec<f64> = records
            .iter()
            .flat_map(|record| record.disconnection_episodes())
            .filter(|episode| episode.is_reconnection())
            .filter(|episode| episode.ended_at.is_some_and(|ended_at| ended_at >= since))
            .map(|episode| episode.duration_secs(now))
            .collect();

        let average_disconnection_duration = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        Ok(ReconnectionStats {
            reconnection_count: durations.len(),
            average_disconnection_duration,
            analysis_period_hours: hours,
        })
    }
}

/// 一時切断中で、その切断が直前の再接続より前のものかどうか
///
/// 書き込みは直列化されるため、通常の流れでは切断時刻は再接続時刻以降になる。
/// 切断時刻の方が古い一時切断は、既に再接続で処理済みの切断が後から書き込まれたもの。
/// 同じミリ秒の切断は再接続の後に起きた新しい切断として扱う。
pub fn has_unreconciled_disconnection(record: &ConnectionRecord) -> bool {
    record.status == ConnectionStatus::TemporarilyDisconnected
        && match (record.disconnected_at, record.reconnected_at) {
            (Some(disconnected_at), Some(reconnected_at)) => disconnected_at < reconnected_at,
            _ => false,
        }
}

/// 再接続が可能かどうか（終端状態のレコードは不可）
pub fn validate_reconnection(record: Option<&ConnectionRecord>) -> bool {
    state_machine::can_reconnect(record)
}
