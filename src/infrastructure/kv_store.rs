//! 键值存储 - 基础设施层
//!
//! 进度通道的底层存储：按 key 覆盖写入、带过期时间。
//! 单个 key 的读写是原子的，最后一次写入生效。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::AppResult;

/// 键值存储能力
#[async_trait]
pub trait KvStore: Send + Sync {
    /// 写入并设置过期时间
    async fn set(&self, key: &str, value: String, ttl: Duration) -> AppResult<()>;

    /// 读取，不存在或已过期返回 None
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    async fn delete(&self, key: &str) -> AppResult<()>;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// 进程内存储实现
///
/// 线程安全、可克隆，过期条目在读取或 `purge_expired` 时清除
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 清理所有已过期的条目，返回清理数量
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> AppResult<()> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // 已过期，顺手删除
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn last_write_wins() {
        let store = MemoryKvStore::new();
        store.set("k", "one".to_string(), Duration::from_secs(60)).await.unwrap();
        store.set("k", "two".to_string(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryKvStore::new();
        store.set("k", "v".to_string(), Duration::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired() {
        let store = MemoryKvStore::new();
        store.set("short", "v".to_string(), Duration::from_secs(1)).await.unwrap();
        store.set("long", "v".to_string(), Duration::from_secs(100)).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.purge_expired().await, 1);
        assert!(store.get("long").await.unwrap().is_some());
    }
}
