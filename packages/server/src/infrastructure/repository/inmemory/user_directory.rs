//! InMemory User Directory 実装

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{RepositoryError, UserDirectory, UserId};

/// インメモリのユーザーディレクトリ
///
/// `permissive` モードでは形式が正しい全ての UserId を既知のユーザーとして扱う
/// （外部の ID ストアを持たないスタンドアロン起動用）。
pub struct InMemoryUserDirectory {
    users: Mutex<HashSet<UserId>>,
    permissive: bool,
}

impl InMemoryUserDirectory {
    /// 登録済みユーザーのみを許可するディレクトリを作成
    pub fn new(users: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            users: Mutex::new(users.into_iter().collect()),
            permissive: false,
        }
    }

    /// 全てのユーザーを許可するディレクトリを作成
    pub fn permissive() -> Self {
        Self {
            users: Mutex::new(HashSet::new()),
            permissive: true,
        }
    }

    pub async fn register(&self, user_id: UserId) {
        self.users.lock().await.insert(user_id);
    }

    pub async fn remove(&self, user_id: &UserId) {
        self.users.lock().await.remove(user_id);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn user_exists(&self, user_id: &UserId) -> Result<bool, RepositoryError> {
        if self.permissive {
            return Ok(true);
        }
        Ok(self.users.lock().await.contains(user_id))
    }
}
