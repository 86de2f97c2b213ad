//! 历史序列的后端存储策略
//!
//! `HistoryStore` 只通过 `HistoryBackend` 访问数据，进程内内存与SQLite两种实现可互换。

use crate::common::{Observation, Result};
use std::collections::{HashMap, VecDeque};

/// 一次按时间淘汰的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvictionReport {
    /// 删除的条目总数
    pub removed: usize,
    /// 历史被清空的品种
    pub emptied_symbols: Vec<String>,
}

/// 历史序列后端
///
/// 同一品种内的条目按写入顺序存放，调用方保证时间戳不递减。
/// 写方法要求 `&mut self`，由 `HistoryStore` 的读写锁串行化。
pub trait HistoryBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// 后端当前是否可用
    fn is_ready(&self) -> bool;

    /// 追加一条观测，并把该品种截断到 `max_len` 条，返回被截掉的条数
    fn append(&mut self, observation: &Observation, max_len: usize) -> Result<usize>;

    /// 最近 `limit` 条，按时间从旧到新；`limit == 0` 表示全部
    fn latest(&self, symbol: &str, limit: usize) -> Result<Vec<Observation>>;

    /// 时间戳落在 `[start_ms, end_ms]` 内的条目，按时间从旧到新
    fn range(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Observation>>;

    /// 该品种最新的一条
    fn last(&self, symbol: &str) -> Result<Option<Observation>>;

    /// 该品种的条目数，不存在时为0
    fn len(&self, symbol: &str) -> Result<usize>;

    /// 所有有历史的品种
    fn symbols(&self) -> Result<Vec<String>>;

    /// 全部条目数
    fn total_entries(&self) -> Result<usize>;

    /// 删除所有时间戳早于 `cutoff_ms` 的条目
    fn evict_before(&mut self, cutoff_ms: i64) -> Result<EvictionReport>;

    /// 删除一个品种的全部历史，返回删除条数
    fn remove_symbol(&mut self, symbol: &str) -> Result<usize>;
}

/// 进程内存后端
#[derive(Debug, Default)]
pub struct MemoryHistoryBackend {
    series: HashMap<String, VecDeque<Observation>>,
}

impl MemoryHistoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryBackend for MemoryHistoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn append(&mut self, observation: &Observation, max_len: usize) -> Result<usize> {
        let series = self.series.entry(observation.symbol.clone()).or_default();
        series.push_back(observation.clone());

        let mut trimmed = 0;
        while series.len() > max_len {
            series.pop_front();
            trimmed += 1;
        }
        Ok(trimmed)
    }

    fn latest(&self, symbol: &str, limit: usize) -> Result<Vec<Observation>> {
        let Some(series) = self.series.get(symbol) else {
            return Ok(Vec::new());
        };
        let skip = if limit == 0 { 0 } else { series.len().saturating_sub(limit) };
        Ok(series.iter().skip(skip).cloned().collect())
    }

    fn range(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Observation>> {
        let Some(series) = self.series.get(symbol) else {
            return Ok(Vec::new());
        };
        Ok(series
            .iter()
            .filter(|o| o.timestamp_ms >= start_ms && o.timestamp_ms <= end_ms)
            .cloned()
            .collect())
    }

    fn last(&self, symbol: &str) -> Result<Option<Observation>> {
        Ok(self.series.get(symbol).and_then(|s| s.back().cloned()))
    }

    fn len(&self, symbol: &str) -> Result<usize> {
        Ok(self.series.get(symbol).map_or(0, |s| s.len()))
    }

    fn symbols(&self) -> Result<Vec<String>> {
        Ok(self.series.keys().cloned().collect())
    }

    fn total_entries(&self) -> Result<usize> {
        Ok(self.series.values().map(|s| s.len()).sum())
    }

    fn evict_before(&mut self, cutoff_ms: i64) -> Result<EvictionReport> {
        let mut report = EvictionReport::default();

        for (symbol, series) in self.series.iter_mut() {
            // 序列按时间有序，从头部弹出即可
            while series.front().is_some_and(|o| o.timestamp_ms < cutoff_ms) {
                series.pop_front();
                report.removed += 1;
            }
            if series.is_empty() {
                report.emptied_symbols.push(symbol.clone());
            }
        }

        for symbol in &report.emptied_symbols {
            self.series.remove(symbol);
        }
        Ok(report)
    }

    fn remove_symbol(&mut self, symbol: &str) -> Result<usize> {
        Ok(self.series.remove(symbol).map_or(0, |s| s.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_append_trims_oldest() {
        let mut backend = MemoryHistoryBackend::new();
        for i in 1..=5 {
            let trimmed = backend.append(&Observation::new("BTCUSDT", 100.0 + i as f64, 1.0, i), 3).unwrap();
            assert_eq!(trimmed, if i > 3 { 1 } else { 0 });
        }

        let all = backend.latest("BTCUSDT", 0).unwrap();
        let ts: Vec<i64> = all.iter().map(|o| o.timestamp_ms).collect();
        assert_eq!(ts, vec![3, 4, 5], "应丢弃最旧的条目");

        let last_two = backend.latest("BTCUSDT", 2).unwrap();
        assert_eq!(last_two[0].timestamp_ms, 4);
        assert_eq!(backend.len("BTCUSDT").unwrap(), 3);
        assert_eq!(backend.len("ETHUSDT").unwrap(), 0);
    }

    #[test]
    fn test_memory_range_and_evict() {
        let mut backend = MemoryHistoryBackend::new();
        for i in 1..=4 {
            backend.append(&Observation::new("BTCUSDT", 100.0, 1.0, i * 10), 100).unwrap();
        }
        backend.append(&Observation::new("ETHUSDT", 10.0, 1.0, 5), 100).unwrap();

        let range = backend.range("BTCUSDT", 15, 30).unwrap();
        assert_eq!(range.len(), 2);

        let report = backend.evict_before(25).unwrap();
        assert_eq!(report.removed, 3, "BTCUSDT删除2条，ETHUSDT删除1条");
        assert_eq!(report.emptied_symbols, vec!["ETHUSDT".to_string()]);
        assert_eq!(backend.symbols().unwrap(), vec!["BTCUSDT".to_string()]);
        assert_eq!(backend.total_entries().unwrap(), 2);
    }
}
