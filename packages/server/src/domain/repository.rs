//! Repository trait 定義
//!
//! ドメイン層が必要とするデータアクセスのインターフェースを定義します。
//! 具体的な実装は Infrastructure 層が提供します（依存性の逆転）。

use async_trait::async_trait;

use super::{ConnectionContext, ConnectionRecord, RepositoryError, Timestamp, UserId};

/// トランザクション内で現在のレコードに対して適用する更新
///
/// 現在のレコード（なければ `None`）を受け取り、書き込むかどうかを決める。
pub type RecordUpdate = Box<dyn FnOnce(Option<ConnectionRecord>) -> RecordChange + Send>;

/// 更新関数の判断結果
#[derive(Debug, Clone, PartialEq)]
pub enum RecordChange {
    /// 何も書き込まない
    Keep,
    /// レコードを書き込む
    ///
    /// 現在のレコードと同じ ID ならその場で置き換え、
    /// 異なる ID なら新しい現在のレコードとして追加する（旧レコードは履歴に残る）。
    Write(ConnectionRecord),
    /// 現在のレコードを閉じ、新しいレコードを現在のレコードにする
    ///
    /// `retired` は現在のレコードと同じ ID でなければならず、その最終状態として履歴に残る。
    Supersede {
        retired: ConnectionRecord,
        opened: ConnectionRecord,
    },
}

/// `update_current` の結果
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordTransaction {
    /// 更新前の現在のレコード
    pub previous: Option<ConnectionRecord>,
    /// 書き込まれたレコード（`Keep` の場合は `None`）
    pub written: Option<ConnectionRecord>,
}

/// 履歴検索の条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub user_id: UserId,
    /// `None` の場合は全てのスコープが対象
    pub context: Option<ConnectionContext>,
    pub since: Timestamp,
}

/// Connection Record Repository trait
///
/// UseCase 層はこの trait に依存し、Infrastructure 層の具体的な実装には依存しない。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectionRecordRepository: Send + Sync {
    /// (ユーザー, スコープ) の現在のレコードを取得
    async fn find_current(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
    ) -> Result<Option<ConnectionRecord>, RepositoryError>;

    /// 現在のレコードを読み取り、更新関数の結果を書き込む
    ///
    /// 読み取りから書き込みまでが 1 つのトランザクションとして原子的に実行されるため、
    /// 同じキーへの並行シグナルが同じ状態を観測して競合する更新を行うことはない。
    async fn update_current(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
        update: RecordUpdate,
    ) -> Result<RecordTransaction, RepositoryError>;

    /// 履歴レコードを取得
    ///
    /// `since` 以降に更新されたレコードに加え、一時切断のまま残っているレコードも返す。
    async fn find_history(
        &self,
        query: HistoryQuery,
    ) -> Result<Vec<ConnectionRecord>, RepositoryError>;
}

/// ユーザーの存在確認（ID ストア）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_exists(&self, user_id: &UserId) -> Result<bool, RepositoryError>;
}
