//! UseCase 層のエラー型

use thiserror::Error;

use crate::domain::RepositoryError;

/// プレゼンス処理のエラー
///
/// 「ユーザーが存在しない」「不正な遷移」は想定内の事象なので `None` / `false` で返し、
/// ここにはインフラ障害だけが入る。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresenceError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
