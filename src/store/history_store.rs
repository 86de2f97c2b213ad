//! 品种历史序列存储
//!
//! 后端放在一把独立的读写锁后面，与快照表互不阻塞。
//! `PriceStore` 需要跨表原子操作时，先拿历史写锁再拿快照写锁。

use crate::common::{AppError, Observation, Result};
use crate::store::backend::{EvictionReport, HistoryBackend};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// 追加、截断与淘汰都经过这里，保证长度上限
pub struct HistoryStore {
    backend: RwLock<Box<dyn HistoryBackend>>,
    max_history_per_symbol: usize,
}

/// 持有写锁期间可执行的操作
pub struct HistoryWriteGuard<'a> {
    guard: RwLockWriteGuard<'a, Box<dyn HistoryBackend>>,
    max_len: usize,
}

/// 持有读锁期间可执行的查询
pub struct HistoryReadGuard<'a> {
    guard: RwLockReadGuard<'a, Box<dyn HistoryBackend>>,
}

impl HistoryStore {
    pub fn new(backend: Box<dyn HistoryBackend>, max_history_per_symbol: usize) -> Self {
        Self {
            backend: RwLock::new(backend),
            max_history_per_symbol: max_history_per_symbol.max(1),
        }
    }

    pub async fn write(&self) -> HistoryWriteGuard<'_> {
        HistoryWriteGuard {
            guard: self.backend.write().await,
            max_len: self.max_history_per_symbol,
        }
    }

    pub async fn read(&self) -> HistoryReadGuard<'_> {
        HistoryReadGuard {
            guard: self.backend.read().await,
        }
    }
}

impl HistoryWriteGuard<'_> {
    /// 追加观测；时间戳早于该品种最新条目时拒绝，保持序列不递减
    pub fn append(&mut self, observation: &Observation) -> Result<usize> {
        if let Some(last) = self.guard.last(&observation.symbol)? {
            if observation.timestamp_ms < last.timestamp_ms {
                return Err(AppError::InvalidObservation(format!(
                    "{} 时间戳 {} 早于已存储的最新时间戳 {}",
                    observation.symbol, observation.timestamp_ms, last.timestamp_ms
                )));
            }
        }
        self.guard.append(observation, self.max_len)
    }

    pub fn evict_before(&mut self, cutoff_ms: i64) -> Result<EvictionReport> {
        self.guard.evict_before(cutoff_ms)
    }

    pub fn remove_symbol(&mut self, symbol: &str) -> Result<usize> {
        self.guard.remove_symbol(symbol)
    }

    pub fn symbols(&self) -> Result<Vec<String>> {
        self.guard.symbols()
    }

    pub fn last(&self, symbol: &str) -> Result<Option<Observation>> {
        self.guard.last(symbol)
    }

    pub fn backend_name(&self) -> &'static str {
        self.guard.name()
    }
}

impl HistoryReadGuard<'_> {
    pub fn latest(&self, symbol: &str, limit: usize) -> Result<Vec<Observation>> {
        self.guard.latest(symbol, limit)
    }

    pub fn range(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Observation>> {
        self.guard.range(symbol, start_ms, end_ms)
    }

    pub fn last(&self, symbol: &str) -> Result<Option<Observation>> {
        self.guard.last(symbol)
    }

    pub fn len(&self, symbol: &str) -> Result<usize> {
        self.guard.len(symbol)
    }

    pub fn symbols(&self) -> Result<Vec<String>> {
        self.guard.symbols()
    }

    pub fn total_entries(&self) -> Result<usize> {
        self.guard.total_entries()
    }

    pub fn is_ready(&self) -> bool {
        self.guard.is_ready()
    }

    pub fn backend_name(&self) -> &'static str {
        self.guard.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::MemoryHistoryBackend;

    #[tokio::test]
    async fn test_append_rejects_out_of_order() {
        let store = HistoryStore::new(Box::new(MemoryHistoryBackend::new()), 10);
        {
            let mut w = store.write().await;
            w.append(&Observation::new("BTCUSDT", 100.0, 1.0, 20)).unwrap();
            // 时间相同允许
            w.append(&Observation::new("BTCUSDT", 101.0, 1.0, 20)).unwrap();
            let err = w.append(&Observation::new("BTCUSDT", 102.0, 1.0, 10)).unwrap_err();
            assert!(matches!(err, AppError::InvalidObservation(_)));
        }
        let r = store.read().await;
        assert_eq!(r.len("BTCUSDT").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_length_bound() {
        let store = HistoryStore::new(Box::new(MemoryHistoryBackend::new()), 3);
        let mut w = store.write().await;
        for i in 1..=10 {
            w.append(&Observation::new("ETHUSDT", 10.0, 1.0, i)).unwrap();
        }
        drop(w);
        let r = store.read().await;
        assert_eq!(r.len("ETHUSDT").unwrap(), 3, "长度不应超过上限");
        assert_eq!(r.latest("ETHUSDT", 0).unwrap()[0].timestamp_ms, 8);
    }
}
