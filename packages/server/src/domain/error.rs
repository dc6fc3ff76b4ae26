//! ドメイン層のエラー型

use thiserror::Error;

/// Value Object の検証エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueObjectError {
    #[error("user_id must not be empty")]
    EmptyUserId,

    #[error("context_id must not be empty")]
    EmptyContextId,

    #[error("context_type must not be empty")]
    EmptyContextType,

    #[error("{kind} is too long (max {max} characters, got {actual})")]
    TooLong {
        kind: &'static str,
        max: usize,
        actual: usize,
    },

    #[error("{kind} contains whitespace or control characters: '{value}'")]
    InvalidCharacters { kind: &'static str, value: String },
}

/// データストア（接続レコード、ユーザーディレクトリ）のエラー
///
/// 呼び出し側にとってはインフラ障害であり、ルーチンな「見つからない」は含まない。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("transaction failed: {0}")]
    TransactionFailed(String),
}

/// アラート送信のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlertError {
    #[error("alert delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("alert delivery timed out after {0} ms")]
    Timeout(u64),
}
