//! 最新行情快照缓存，每个品种一条，写入即覆盖

use crate::common::Observation;
use std::collections::HashMap;
use tokio::sync::{RwLock, RwLockWriteGuard};

#[derive(Default)]
pub struct SnapshotCache {
    table: RwLock<HashMap<String, Observation>>,
}

pub type SnapshotWriteGuard<'a> = RwLockWriteGuard<'a, HashMap<String, Observation>>;

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn write(&self) -> SnapshotWriteGuard<'_> {
        self.table.write().await
    }

    pub async fn get(&self, symbol: &str) -> Option<Observation> {
        self.table.read().await.get(symbol).cloned()
    }

    pub async fn price(&self, symbol: &str) -> Option<f64> {
        self.table.read().await.get(symbol).map(|o| o.price)
    }

    pub async fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.table.read().await.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replace_on_write() {
        let cache = SnapshotCache::new();
        {
            let mut w = cache.write().await;
            w.insert("BTCUSDT".to_string(), Observation::new("BTCUSDT", 100.0, 1.0, 1));
            w.insert("BTCUSDT".to_string(), Observation::new("BTCUSDT", 105.0, 1.0, 2));
        }
        assert_eq!(cache.len().await, 1, "每个品种只保留一条快照");
        assert_eq!(cache.price("BTCUSDT").await, Some(105.0));
        assert!(cache.get("ETHUSDT").await.is_none());
    }
}
