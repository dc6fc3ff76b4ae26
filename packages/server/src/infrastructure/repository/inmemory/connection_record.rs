//! InMemory Connection Record Repository 実装
//!
//! ドメイン層が定義する ConnectionRecordRepository trait の具体的な実装。
//! HashMap をインメモリ DB として使用します。
//!
//! 全ての読み書きは 1 つの `Mutex` の下で行うため、`update_current` の
//! 読み取り → 判断 → 書き込みは他のシグナルに割り込まれない。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    ConnectionContext, ConnectionRecord, ConnectionRecordRepository, ConnectionStatus,
    HistoryQuery, RecordChange, RecordId, RecordTransaction, RecordUpdate, RepositoryError,
    UserId,
};

type RecordKey = (UserId, ConnectionContext);

#[derive(Default)]
struct RecordTable {
    /// 全てのレコード（置き換えられたセッションも含む）
    records: HashMap<RecordId, ConnectionRecord>,
    /// (ユーザー, スコープ) ごとの現在のレコード
    current: HashMap<RecordKey, RecordId>,
}

impl RecordTable {
    fn current_record(&self, key: &RecordKey) -> Option<&ConnectionRecord> {
        self.current.get(key).and_then(|id| self.records.get(id))
    }
}

/// インメモリ Connection Record Repository 実装
#[derive(Default)]
pub struct InMemoryConnectionRecordRepository {
    table: Mutex<RecordTable>,
}

impl InMemoryConnectionRecordRepository {
    /// 新しい InMemoryConnectionRecordRepository を作成
    pub fn new() -> Self {
        Self::default()
    }

    /// 既存のレコードを取り込む（移行や分析用の履歴データ投入）
    ///
    /// 同じキーに現在のレコードがなければ、または取り込むレコードの方が新しければ
    /// 現在のレコードとして扱う。
    pub async fn import_record(&self, record: ConnectionRecord) {
        let mut table = self.table.lock().await;
        let key = (record.user_id.clone(), record.context.clone());
        let is_newer = table
            .current_record(&key)
            .is_none_or(|current| current.created_at <= record.created_at);
        if is_newer {
            table.current.insert(key, record.id);
        }
        table.records.insert(record.id, record);
    }

    /// 保存されている全レコード数
    pub async fn count_records(&self) -> usize {
        self.table.lock().await.records.len()
    }
}

#[async_trait]
impl ConnectionRecordRepository for InMemoryConnectionRecordRepository {
    async fn find_current(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
    ) -> Result<Option<ConnectionRecord>, RepositoryError> {
        let table = self.table.lock().await;
        let key = (user_id.clone(), context.clone());
        Ok(table.current_record(&key).cloned())
    }

    async fn update_current(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
        update: RecordUpdate,
    ) -> Result<RecordTransaction, RepositoryError> {
        let mut table = self.table.lock().await;
        let key = (user_id.clone(), context.clone());
        let previous = table.current_record(&key).cloned();

        let (retired, record) = match update(previous.clone()) {
            RecordChange::Keep => {
                return Ok(RecordTransaction {
                    previous,
                    written: None,
                });
            }
            RecordChange::Write(record) => (None, record),
            RecordChange::Supersede { retired, opened } => (Some(retired), opened),
        };

        if let Some(foreign) = retired
            .iter()
            .chain([&record])
            .find(|record| record.user_id != *user_id || record.context != *context)
        {
            return Err(RepositoryError::TransactionFailed(format!(
                "record {} does not belong to {} in {}",
                foreign.id, user_id, context
            )));
        }

        if let Some(retired) = retired {
            if previous.as_ref().map(|current| current.id) != Some(retired.id) {
                return Err(RepositoryError::TransactionFailed(format!(
                    "record {} is not the current record of {} in {}",
                    retired.id, user_id, context
                )));
            }
            table.records.insert(retired.id, retired);
        }

        table.current.insert(key, record.id);
        table.records.insert(record.id, record.clone());

        Ok(RecordTransaction {
            previous,
            written: Some(record),
        })
    }

    async fn find_history(
        &self,
        query: HistoryQuery,
    ) -> Result<Vec<ConnectionRecord>, RepositoryError> {
        let table = self.table.lock().await;
        let mut records: Vec<ConnectionRecord> = table
            .records
            .values()
            .filter(|record| record.user_id == query.user_id)
            .filter(|record| {
                query
                    .context
                    .as_ref()
                    .is_none_or(|context| record.context == *context)
            })
            .filter(|record| {
                record.updated_at >= query.since
                    || record.status == ConnectionStatus::TemporarilyDisconnected
            })
            .cloned()
            .collect();

        // Sort by created_at for consistent ordering
        records.sort_by_key(|record| record.created_at);

        Ok(records)
    }
}
