//! 价格存储门面
//!
//! 组合历史序列、最新快照、成交量排名和通知中心四个子存储。
//! 跨表操作的加锁顺序固定为：历史 → 快照 → 成交量，写入与清理都遵守这个顺序。

use crate::common::{
    now_ms, AppError, Observation, Result, StorageConfig, StoreEvent, VolumeRankEntry,
};
use crate::store::backend::HistoryBackend;
use crate::store::history_store::HistoryStore;
use crate::store::notification_hub::{HubStats, NotificationHub, StoreListener, SubscriptionId};
use crate::store::snapshot_cache::SnapshotCache;
use crate::store::volume_index::VolumeIndex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// 存储整体统计
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub backend: &'static str,
    pub backend_ready: bool,
    pub symbols: usize,
    pub history_entries: usize,
    pub ingested: u64,
    pub rejected: u64,
    pub removed_by_cleanup: u64,
    pub notifications_dropped: u64,
    pub notifications: HubStats,
}

/// 单个品种的统计
#[derive(Debug, Clone, Serialize)]
pub struct SymbolStats {
    pub symbol: String,
    pub history_len: usize,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
    pub current_price: Option<f64>,
    pub volume_usd: Option<f64>,
}

/// 一批观测的写入结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub rejected: usize,
}

#[derive(Debug, Default)]
struct StoreCounters {
    ingested: AtomicU64,
    rejected: AtomicU64,
    removed_by_cleanup: AtomicU64,
}

pub struct PriceStore {
    history: HistoryStore,
    snapshots: SnapshotCache,
    volume: VolumeIndex,
    hub: NotificationHub,
    max_symbols: usize,
    counters: StoreCounters,
}

impl PriceStore {
    /// 创建存储并从后端已有的历史恢复快照与成交量排名
    ///
    /// 后端在启动阶段不可读属于致命错误，直接返回。
    #[instrument(target = "价格存储", skip_all, fields(backend = backend.name()), err)]
    pub async fn new(config: &StorageConfig, backend: Box<dyn HistoryBackend>) -> Result<Self> {
        if !backend.is_ready() {
            return Err(AppError::BackendUnavailable(format!(
                "{} 后端启动时不可用",
                backend.name()
            )));
        }

        let store = Self {
            history: HistoryStore::new(backend, config.max_history_per_symbol),
            snapshots: SnapshotCache::new(),
            volume: VolumeIndex::new(),
            hub: NotificationHub::new(config.notification_queue_capacity),
            max_symbols: config.max_symbols,
            counters: StoreCounters::default(),
        };
        store.restore().await?;
        Ok(store)
    }

    /// 超出品种上限的品种连同历史一起删除，保证每个有历史的品种都有快照
    async fn restore(&self) -> Result<()> {
        let mut history = self.history.write().await;
        let mut snapshots = self.snapshots.write().await;

        let mut symbols = history.symbols()?;
        symbols.sort();
        let mut dropped = 0usize;
        for symbol in symbols {
            if snapshots.len() >= self.max_symbols {
                let removed = history.remove_symbol(&symbol)?;
                debug!(target: "价格存储", %symbol, removed, "超出品种上限，历史已删除");
                dropped += 1;
                continue;
            }
            if let Some(last) = history.last(&symbol)? {
                snapshots.insert(symbol, last);
            }
        }
        if dropped > 0 {
            warn!(target: "价格存储", max_symbols = self.max_symbols, dropped_symbols = dropped, "历史中的品种数超过上限，多出的品种未恢复并已删除");
        }
        self.volume.rebuild(snapshots.values()).await;

        if !snapshots.is_empty() {
            info!(target: "价格存储", log_type = "module", event_name = "StoreRestored", restored_symbols = snapshots.len(), backend = history.backend_name(), "已从历史后端恢复快照");
        }
        Ok(())
    }

    /// 写入一条观测
    ///
    /// 历史追加、快照替换和排名更新在持锁期间一起完成，释放锁之后才投递通知。
    pub async fn ingest(&self, observation: Observation) -> Result<()> {
        let result = self.ingest_inner(&observation).await;
        match &result {
            Ok(()) => {
                self.counters.ingested.fetch_add(1, Ordering::Relaxed);
                self.hub.publish(StoreEvent::Updated(observation));
            }
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(target: "价格存储", symbol = %observation.symbol, error = %e, "观测被拒绝");
            }
        }
        result
    }

    async fn ingest_inner(&self, observation: &Observation) -> Result<()> {
        if let Some(reason) = observation.validation_error() {
            return Err(AppError::InvalidObservation(reason));
        }

        let mut history = self.history.write().await;
        let mut snapshots = self.snapshots.write().await;

        if !snapshots.contains_key(&observation.symbol) && snapshots.len() >= self.max_symbols {
            return Err(AppError::StorageFull {
                max_symbols: self.max_symbols,
            });
        }

        let trimmed = history.append(observation)?;
        if trimmed > 0 {
            debug!(target: "价格存储", symbol = %observation.symbol, trimmed, "历史超出上限，已截断最旧条目");
        }

        snapshots.insert(observation.symbol.clone(), observation.clone());
        self.volume.write().await.upsert(observation);
        Ok(())
    }

    /// 逐条写入一批观测，单条失败只记录日志
    pub async fn ingest_batch(&self, observations: Vec<Observation>) -> IngestReport {
        let mut report = IngestReport::default();
        for observation in observations {
            let symbol = observation.symbol.clone();
            match self.ingest(observation).await {
                Ok(()) => report.accepted += 1,
                Err(e) => {
                    report.rejected += 1;
                    warn!(target: "价格存储", %symbol, error = %e, error_type = e.get_error_type_summary(), "写入观测失败");
                }
            }
        }
        report
    }

    pub async fn current_price(&self, symbol: &str) -> Option<f64> {
        self.snapshots.price(symbol).await
    }

    pub async fn snapshot(&self, symbol: &str) -> Option<Observation> {
        self.snapshots.get(symbol).await
    }

    /// 最近 `limit` 条历史，从旧到新；`limit == 0` 返回全部
    ///
    /// 后端故障按未找到处理。
    pub async fn history(&self, symbol: &str, limit: usize) -> Result<Vec<Observation>> {
        let result = self.history.read().await.latest(symbol, limit);
        self.non_empty_or_not_found(symbol, result)
    }

    /// 时间戳落在 `[start_ms, end_ms]` 内的历史
    pub async fn history_range(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Observation>> {
        let result = self.history.read().await.range(symbol, start_ms, end_ms);
        self.non_empty_or_not_found(symbol, result)
    }

    fn non_empty_or_not_found(&self, symbol: &str, result: Result<Vec<Observation>>) -> Result<Vec<Observation>> {
        match result {
            Ok(entries) if entries.is_empty() => Err(AppError::SymbolNotFound(symbol.to_string())),
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(target: "价格存储", symbol, error = %e, "读取历史失败，按未找到处理");
                Err(AppError::SymbolNotFound(symbol.to_string()))
            }
        }
    }

    pub async fn top_by_volume(&self, n: usize) -> Vec<VolumeRankEntry> {
        self.volume.top(n).await
    }

    /// 当前所有品种，按名称排序
    pub async fn get_symbols(&self) -> Vec<String> {
        self.snapshots.symbols().await
    }

    /// 删除早于 `max_age` 的历史，返回删除条数
    pub async fn clean_old_data(&self, max_age: Duration) -> Result<usize> {
        self.clean_old_data_at(max_age.as_millis() as i64, now_ms()).await
    }

    /// 以给定的当前时间执行清理
    ///
    /// 历史被清空的品种同时从快照和排名中删除，读者看不到只有快照没有历史的中间状态。
    #[instrument(target = "价格存储", skip(self), err)]
    pub async fn clean_old_data_at(&self, max_age_ms: i64, now_ms: i64) -> Result<usize> {
        let cutoff_ms = now_ms - max_age_ms;

        let emptied = {
            let mut history = self.history.write().await;
            let mut snapshots = self.snapshots.write().await;
            let mut volume = self.volume.write().await;

            let report = history.evict_before(cutoff_ms)?;
            for symbol in &report.emptied_symbols {
                snapshots.remove(symbol);
                volume.remove(symbol);
            }

            self.counters
                .removed_by_cleanup
                .fetch_add(report.removed as u64, Ordering::Relaxed);
            if report.removed > 0 {
                info!(target: "价格存储", event_name = "HistoryCleaned", removed = report.removed, removed_symbols = report.emptied_symbols.len(), cutoff_ms, "过期历史已清理");
            }
            (report.removed, report.emptied_symbols)
        };

        let (removed, emptied_symbols) = emptied;
        for symbol in emptied_symbols {
            self.hub.publish(StoreEvent::Removed { symbol });
        }
        Ok(removed)
    }

    /// 订阅单个品种，或用 `"*"` 订阅全部品种
    pub fn subscribe(&self, symbol: &str, listener: StoreListener) -> SubscriptionId {
        self.hub.subscribe(symbol, listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }

    pub async fn stats(&self) -> StoreStats {
        let (backend, backend_ready, history_entries) = {
            let history = self.history.read().await;
            let entries = history.total_entries().unwrap_or_else(|e| {
                warn!(target: "价格存储", error = %e, "统计历史条目失败");
                0
            });
            (history.backend_name(), history.is_ready(), entries)
        };
        let notifications = self.hub.stats();

        StoreStats {
            backend,
            backend_ready,
            symbols: self.snapshots.len().await,
            history_entries,
            ingested: self.counters.ingested.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            removed_by_cleanup: self.counters.removed_by_cleanup.load(Ordering::Relaxed),
            notifications_dropped: notifications.dropped,
            notifications,
        }
    }

    pub async fn symbol_stats(&self, symbol: &str) -> Result<SymbolStats> {
        let entries = self.history(symbol, 0).await?;
        let snapshot = self.snapshots.get(symbol).await;

        Ok(SymbolStats {
            symbol: symbol.to_string(),
            history_len: entries.len(),
            first_timestamp: entries.first().map(|o| o.timestamp_ms),
            last_timestamp: entries.last().map(|o| o.timestamp_ms),
            current_price: snapshot.as_ref().map(|o| o.price),
            volume_usd: snapshot.as_ref().map(|o| o.volume_usd),
        })
    }

    /// 停止通知分发，已入队的事件会先处理完
    pub async fn shutdown(&self) {
        self.hub.shutdown().await;
    }
}
