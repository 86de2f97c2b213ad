//! 成交量排名索引
//!
//! 按24小时成交额（USDT）降序排列，成交额相同时按品种名排序。
//! 条目完全由快照派生，不单独作为数据源。

use crate::common::{Observation, VolumeRankEntry};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::{RwLock, RwLockWriteGuard};

/// 排名键：成交额降序，品种名升序
#[derive(Debug, Clone)]
struct RankKey {
    volume_usd: f64,
    symbol: String,
}

impl PartialEq for RankKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankKey {}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .volume_usd
            .total_cmp(&self.volume_usd)
            .then_with(|| self.symbol.cmp(&other.symbol))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct VolumeRanking {
    entries: HashMap<String, VolumeRankEntry>,
    ranking: BTreeSet<RankKey>,
}

impl VolumeRanking {
    /// 用最新观测更新品种的排名
    pub fn upsert(&mut self, observation: &Observation) {
        self.remove(&observation.symbol);
        self.ranking.insert(RankKey {
            volume_usd: observation.volume_usd,
            symbol: observation.symbol.clone(),
        });
        self.entries.insert(
            observation.symbol.clone(),
            VolumeRankEntry {
                symbol: observation.symbol.clone(),
                volume: observation.volume_24h,
                volume_usd: observation.volume_usd,
            },
        );
    }

    pub fn remove(&mut self, symbol: &str) -> bool {
        match self.entries.remove(symbol) {
            Some(old) => {
                self.ranking.remove(&RankKey {
                    volume_usd: old.volume_usd,
                    symbol: old.symbol,
                });
                true
            }
            None => false,
        }
    }

    pub fn top(&self, n: usize) -> Vec<VolumeRankEntry> {
        self.ranking
            .iter()
            .take(n)
            .filter_map(|key| self.entries.get(&key.symbol).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// 带独立读写锁的成交量索引
#[derive(Default)]
pub struct VolumeIndex {
    inner: RwLock<VolumeRanking>,
}

impl VolumeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, VolumeRanking> {
        self.inner.write().await
    }

    pub async fn top(&self, n: usize) -> Vec<VolumeRankEntry> {
        self.inner.read().await.top(n)
    }

    /// 从快照全量重建
    pub async fn rebuild<'a>(&self, snapshots: impl IntoIterator<Item = &'a Observation>) {
        let mut ranking = VolumeRanking::default();
        for observation in snapshots {
            ranking.upsert(observation);
        }
        *self.inner.write().await = ranking;
    }
}
