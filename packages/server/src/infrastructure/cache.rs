//! TTL 付きのインメモリキャッシュ
//!
//! 集計結果のように再計算が高価で、多少古くても問題ない値を保持する。

use std::{collections::HashMap, hash::Hash, sync::Arc, time::Duration};

use kehai_shared::time::Clock;
use tokio::sync::Mutex;

struct CacheEntry<V> {
    value: V,
    expires_at: i64,
}

/// TTL 付きキャッシュ
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// 有効期限内の値を取得する。期限切れの値は取り除く
    pub async fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// 値を保存する。同時に期限切れのエントリを全て取り除く
    pub async fn insert(&self, key: K, value: V) {
        let now = self.clock.now_millis();
        let expires_at = now + self.ttl.as_millis() as i64;
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(key, CacheEntry { value, expires_at });
    }

    pub async fn entry_count(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kehai_shared::time::ManualClock;

    #[tokio::test]
    async fn test_get_returns_value_within_ttl() {
        // テスト項目: TTL 内であればキャッシュした値が返される
        // given (前提条件):
        let clock = Arc::new(ManualClock::new(0));
        let cache = TtlCache::new(Duration::from_secs(60), clock.clone());
        cache.insert("alice", 42).await;

        // when (操作):
        clock.advance_secs(59);
        let value = cache.get(&"alice").await;

        // then (期待する結果):
        assert_eq!(value, Some(42));
    }

    #[tokio::test]
    async fn test_get_drops_expired_value() {
        // テスト項目: TTL を過ぎた値は返されず、キャッシュから取り除かれる
        // given (前提条件):
        let clock = Arc::new(ManualClock::new(0));
        let cache = TtlCache::new(Duration::from_secs(60), clock.clone());
        cache.insert("alice", 42).await;

        // when (操作):
        clock.advance_secs(60);
        let value = cache.get(&"alice").await;

        // then (期待する結果):
        assert_eq!(value, None);
        assert_eq!(cache.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_insert_evicts_expired_entries() {
        // テスト項目: 挿入時に期限切れのエントリだけが取り除かれる
        // given (前提条件):
        let clock = Arc::new(ManualClock::new(0));
        let cache = TtlCache::new(Duration::from_secs(60), clock.clone());
        cache.insert("alice", 1).await;
        clock.advance_secs(30);
        cache.insert("bob", 2).await;

        // when (操作):
        clock.advance_secs(40);
        cache.insert("carol", 3).await;

        // then (期待する結果):
        assert_eq!(cache.entry_count().await, 2);
        assert_eq!(cache.get(&"alice").await, None);
        assert_eq!(cache.get(&"bob").await, Some(2));
    }
}
