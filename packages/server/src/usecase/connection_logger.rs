//! UseCase: 接続レコードの記録
//!
//! 接続レコードを書き込む唯一のコンポーネント。全ての変更は
//! `ConnectionRecordRepository::update_current` のトランザクション内で、
//! 現在の状態を再確認してから行う。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - 初回接続、一時切断、再接続、最終切断、正常切断、ハートビートの記録
//!
//! ### なぜこのテストが必要か
//! - 重複・順序の入れ替わったシグナルでも二重遷移しないことを保証
//! - メタデータ（切断時間など）が正しく記録されることを確認
//!
//! ### どのような状況を想定しているか
//! - 正常系：接続 → 切断 → 再接続 → 切断 → 最終切断
//! - エッジケース：重複した切断シグナル、切断中のハートビート
//! - 異常系：存在しないユーザー、データストア障害

use std::{collections::BTreeMap, sync::Arc};

use kehai_shared::time::Clock;

use crate::domain::{
    ClientInfo, ConnectionContext, ConnectionRecord, ConnectionRecordRepository,
    ConnectionStatus, ConnectionType, ReconnectionMetadata, RecordChange, Timestamp,
    UserDirectory, UserId, state_machine,
};

use super::error::PresenceError;

/// 接続レコードを記録するユースケース
pub struct ConnectionLogger {
    /// Repository（データアクセス層の抽象化）
    repository: Arc<dyn ConnectionRecordRepository>,
    /// UserDirectory（ID ストアの抽象化）
    users: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
}

impl ConnectionLogger {
    /// 新しい ConnectionLogger を作成
    pub fn new(
        repository: Arc<dyn ConnectionRecordRepository>,
        users: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            users,
            clock,
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    /// 現在のレコードを取得
    pub async fn current_record(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
    ) -> Result<Option<ConnectionRecord>, PresenceError> {
        Ok(self.repository.find_current(user_id, context).await?)
    }

    /// 初回接続を記録
    ///
    /// # Returns
    ///
    /// * `Ok(Some(record))` - 作成したレコード、または既に CONNECTED なら既存のレコード
    /// * `Ok(None)` - ユーザーが存在しない
    pub async fn record_initial_connection(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
        client: &ClientInfo,
    ) -> Result<Option<ConnectionRecord>, PresenceError> {
        if let Some(current) = self.repository.find_current(user_id, context).await? {
            if current.status == ConnectionStatus::Connected {
                tracing::debug!("'{}' is already connected to {}", user_id, context);
                return Ok(Some(current));
            }
        }

        if !self.users.user_exists(user_id).await? {
            tracing::debug!("Ignoring connection from unknown user '{}'", user_id);
            return Ok(None);
        }

        let now = self.now();
        let (owner, scope, client) = (user_id.clone(), context.clone(), client.clone());
        let tx = self
            .repository
            .update_current(
                user_id,
                context,
                Box::new(move |current: Option<ConnectionRecord>| match current {
                    Some(record) if record.status == ConnectionStatus::Connected => {
                        RecordChange::Keep
                    }
                    current => {
                        let opened = ConnectionRecord::open(
                            owner,
                            scope,
                            now,
                            ConnectionType::Initial,
                            &client,
                        );
                        match current {
                            // its pending finalization only ever sees the new record
                            Some(mut retired)
                                if retired.status == ConnectionStatus::TemporarilyDisconnected =>
                            {
                                retired.transition(ConnectionStatus::Disconnected, now);
                                retired.metadata.finalized_at = Some(now);
                                RecordChange::Supersede { retired, opened }
                            }
                            _ => RecordChange::Write(opened),
                        }
                    }
                }),
            )
            .await?;

        match tx.written {
            Some(record) => {
                tracing::info!("'{}' connected to {} (record {})", user_id, context, record.id);
                Ok(Some(record))
            }
            // a concurrent signal connected first
            None => Ok(tx.previous),
        }
    }

    /// 一時切断を記録
    ///
    /// # Returns
    ///
    /// * `Ok(Some(record))` - TEMPORARILY_DISCONNECTED に遷移したレコード
    /// * `Ok(None)` - レコードがない、または CONNECTED ではない（既に切断処理中など）
    pub async fn record_disconnection(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
        client: &ClientInfo,
        extra: BTreeMap<String, serde_json::Value>,
    ) -> Result<Option<ConnectionRecord>, PresenceError> {
        let now = self.now();
        let client = client.clone();
        let tx = self
            .repository
            .update_current(
                user_id,
                context,
                Box::new(move |current: Option<ConnectionRecord>| match current {
                    Some(mut record) if state_machine::can_disconnect(Some(&record)) => {
                        record.transition(ConnectionStatus::TemporarilyDisconnected, now);
                        record.metadata.connection_type = Some(ConnectionType::Disconnection);
                        record.metadata.stamp_client(&client);
                        record.metadata.timestamp = Some(now);
                        record.metadata.merge_extensions(extra);
                        RecordChange::Write(record)
                    }
                    _ => RecordChange::Keep,
                }),
            )
            .await?;

        match &tx.written {
            Some(_) => tracing::info!("'{}' temporarily disconnected from {}", user_id, context),
            None => tracing::debug!(
                "Ignoring disconnection of '{}' from {} (status: {:?})",
                user_id,
                context,
                tx.previous.as_ref().map(|record| record.status)
            ),
        }
        Ok(tx.written)
    }

    /// 再接続を記録
    ///
    /// 一時切断中のレコードを CONNECTED に戻す。レコードがなければ新規接続として作成する。
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - 状態を変更した
    /// * `Ok(false)` - 既に CONNECTED、または終端状態で何もしなかった
    pub async fn record_reconnection(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
    ) -> Result<bool, PresenceError> {
        let now = self.now();
        let (owner, scope) = (user_id.clone(), context.clone());
        let tx = self
            .repository
            .update_current(
                user_id,
                context,
                Box::new(move |current: Option<ConnectionRecord>| match current {
                    None => RecordChange::Write(ConnectionRecord::open(
                        owner,
                        scope,
                        now,
                        ConnectionType::Reconnection,
                        &ClientInfo::default(),
                    )),
                    Some(mut record)
                        if record.status == ConnectionStatus::TemporarilyDisconnected =>
                    {
                        let reconnection = ReconnectionMetadata::build(&record, now, BTreeMap::new());
                        record.transition(ConnectionStatus::Connected, now);
                        record.metadata.connection_type = Some(ConnectionType::Reconnection);
                        record.metadata.reconnection = Some(reconnection);
                        RecordChange::Write(record)
                    }
                    Some(_) => RecordChange::Keep,
                }),
            )
            .await?;

        match (&tx.previous, &tx.written) {
            (_, None) => {
                tracing::debug!("No reconnection to record for '{}' in {}", user_id, context);
                Ok(false)
            }
            (None, Some(_)) => {
                tracing::info!(
                    "'{}' reconnected to {} without a prior record, treated as a fresh connection",
                    user_id,
                    context
                );
                Ok(true)
            }
            (Some(_), Some(record)) => {
                let duration = record
                    .metadata
                    .reconnection
                    .as_ref()
                    .map(|reconnection| reconnection.disconnection_duration)
                    .unwrap_or_default();
                tracing::info!(
                    "'{}' reconnected to {} after {:.1}s",
                    user_id,
                    context,
                    duration
                );
                Ok(true)
            }
        }
    }

    /// 最終切断を記録
    ///
    /// TEMPORARILY_DISCONNECTED のときだけ DISCONNECTED に遷移する。
    /// それ以外（再接続済みなど）では何もしない。
    pub async fn record_final_disconnection(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
    ) -> Result<Option<ConnectionRecord>, PresenceError> {
        let now = self.now();
        let tx = self
            .repository
            .update_current(
                user_id,
                context,
                Box::new(move |current: Option<ConnectionRecord>| match current {
                    Some(mut record)
                        if record.status == ConnectionStatus::TemporarilyDisconnected =>
                    {
                        record.transition(ConnectionStatus::Disconnected, now);
                        record.metadata.finalized_at = Some(now);
                        RecordChange::Write(record)
                    }
                    _ => RecordChange::Keep,
                }),
            )
            .await?;

        match &tx.written {
            Some(_) => tracing::info!("'{}' finally disconnected from {}", user_id, context),
            None => tracing::debug!(
                "Skipping finalization of '{}' in {} (status: {:?})",
                user_id,
                context,
                tx.previous.as_ref().map(|record| record.status)
            ),
        }
        Ok(tx.written)
    }

    /// 明示的な退出を記録
    pub async fn record_graceful_disconnection(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
        reason: Option<String>,
    ) -> Result<Option<ConnectionRecord>, PresenceError> {
        let now = self.now();
        let tx = self
            .repository
            .update_current(
                user_id,
                context,
                Box::new(move |current: Option<ConnectionRecord>| match current {
                    Some(mut record) if state_machine::can_disconnect(Some(&record)) => {
                        record.transition(ConnectionStatus::GracefullyDisconnected, now);
                        record.metadata.connection_type =
                            Some(ConnectionType::GracefulDisconnection);
                        record.metadata.graceful_reason = reason;
                        RecordChange::Write(record)
                    }
                    _ => RecordChange::Keep,
                }),
            )
            .await?;

        if tx.written.is_some() {
            tracing::info!("'{}' left {}", user_id, context);
        }
        Ok(tx.written)
    }

    /// ハートビートを記録
    ///
    /// CONNECTED のときだけ `last_heartbeat` を更新する。切断中のクライアントからの
    /// ハートビートで状態を復活させることはしない。
    pub async fn update_heartbeat(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
    ) -> Result<bool, PresenceError> {
        let now = self.now();
        let tx = self
            .repository
            .update_current(
                user_id,
                context,
                Box::new(move |current: Option<ConnectionRecord>| match current {
                    Some(mut record) if record.status == ConnectionStatus::Connected => {
                        record.metadata.last_heartbeat = Some(now);
                        record.updated_at = now;
                        RecordChange::Write(record)
                    }
                    _ => RecordChange::Keep,
                }),
            )
            .await?;

        Ok(tx.written.is_some())
    }
}
