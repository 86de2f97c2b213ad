// src/pipeline/mod.rs
//! 分析流水线
//!
//! 每个周期：取品种集合 → 按品种读取历史窗口 → 依次运行已注册的分析器 →
//! 过滤链 → 把通过的信号交给投递边界。
//! 单个分析器的失败或 panic 只计入它自己的统计，不影响其他分析器和品种。

pub mod filters;
pub mod scheduler;

pub use filters::{
    ConfidenceFilter, FilterChain, FilterContext, FilterStats, RateLimitFilter, SignalFilter,
    VolumeFilter,
};

use crate::analysis::Analyzer;
use crate::common::{now_ms, AppError, PipelineConfig, Signal};
use crate::store::PriceStore;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn, Instrument};

/// 通过过滤链的信号的去处，实现方不得阻塞
pub trait SignalForwarder: Send + Sync {
    fn forward(&self, signal: Signal);
}

/// 单个分析器的运行计数
#[derive(Debug, Default)]
pub struct AnalyzerStats {
    calls: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    insufficient_data: AtomicU64,
    disabled: AtomicU64,
    panics: AtomicU64,
    signals: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalyzerStatsSnapshot {
    pub name: String,
    pub calls: u64,
    pub successes: u64,
    pub errors: u64,
    pub insufficient_data: u64,
    pub disabled: u64,
    pub panics: u64,
    pub signals: u64,
}

impl AnalyzerStats {
    fn snapshot(&self, name: &str) -> AnalyzerStatsSnapshot {
        AnalyzerStatsSnapshot {
            name: name.to_string(),
            calls: self.calls.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            insufficient_data: self.insufficient_data.load(Ordering::Relaxed),
            disabled: self.disabled.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            signals: self.signals.load(Ordering::Relaxed),
        }
    }
}

struct RegisteredAnalyzer {
    analyzer: Arc<dyn Analyzer>,
    stats: AnalyzerStats,
}

impl RegisteredAnalyzer {
    /// 调用分析器并记账，panic 被捕获并计为错误
    fn run(&self, symbol: &str, window: &[crate::common::Observation], now_ms: i64) -> Vec<Signal> {
        self.stats.calls.fetch_add(1, Ordering::Relaxed);
        let name = self.analyzer.name();

        match catch_unwind(AssertUnwindSafe(|| self.analyzer.analyze(window, now_ms))) {
            Ok(Ok(signals)) => {
                self.stats.successes.fetch_add(1, Ordering::Relaxed);
                self.stats.signals.fetch_add(signals.len() as u64, Ordering::Relaxed);
                signals
            }
            Ok(Err(e)) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                match e {
                    AppError::InsufficientData { .. } => {
                        self.stats.insufficient_data.fetch_add(1, Ordering::Relaxed);
                        debug!(target: "分析流水线", analyzer = name, symbol, error = %e, "数据不足，跳过");
                    }
                    AppError::AnalyzerDisabled(_) => {
                        self.stats.disabled.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => warn!(target: "分析流水线", analyzer = name, symbol, error = %e, "分析器返回错误"),
                }
                Vec::new()
            }
            Err(_) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.stats.panics.fetch_add(1, Ordering::Relaxed);
                error!(target: "分析流水线", analyzer = name, symbol, "分析器发生panic，已隔离");
                Vec::new()
            }
        }
    }
}

/// 一个分析周期的结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub symbols: usize,
    /// 没有可用历史而跳过的品种
    pub skipped_symbols: usize,
    pub signals_generated: usize,
    pub signals_forwarded: usize,
    pub duration_ms: u64,
    pub forwarded: Vec<Signal>,
}

#[derive(Default)]
struct SymbolOutcome {
    skipped: bool,
    generated: usize,
    forwarded: Vec<Signal>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub cycles: u64,
    pub signals_forwarded: u64,
    pub analyzers: Vec<AnalyzerStatsSnapshot>,
    pub filters: FilterStats,
}

pub struct AnalysisPipeline {
    store: Arc<PriceStore>,
    config: PipelineConfig,
    analyzers: Arc<Vec<RegisteredAnalyzer>>,
    filters: Arc<FilterChain>,
    forwarder: Option<Arc<dyn SignalForwarder>>,
    cycles: AtomicU64,
    signals_forwarded: AtomicU64,
}

impl AnalysisPipeline {
    pub fn new(store: Arc<PriceStore>, config: PipelineConfig, filters: FilterChain) -> Self {
        Self {
            store,
            config,
            analyzers: Arc::new(Vec::new()),
            filters: Arc::new(filters),
            forwarder: None,
            cycles: AtomicU64::new(0),
            signals_forwarded: AtomicU64::new(0),
        }
    }

    /// 注册分析器，必须在第一次运行周期之前完成
    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        if let Some(analyzers) = Arc::get_mut(&mut self.analyzers) {
            analyzers.push(RegisteredAnalyzer {
                analyzer,
                stats: AnalyzerStats::default(),
            });
        }
        self
    }

    pub fn with_forwarder(mut self, forwarder: Arc<dyn SignalForwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    /// 每个品种读取的窗口长度：配置值与各启用分析器最少数据点中的最大者
    pub fn window_size(&self) -> usize {
        self.analyzers
            .iter()
            .filter(|r| r.analyzer.is_enabled())
            .map(|r| r.analyzer.min_data_points())
            .fold(self.config.window_size, usize::max)
    }

    pub async fn run_cycle(&self) -> CycleReport {
        self.run_cycle_at(now_ms()).await
    }

    #[instrument(target = "分析流水线", skip(self), fields(window_size = self.window_size()))]
    pub async fn run_cycle_at(&self, now_ms: i64) -> CycleReport {
        let started = Instant::now();
        let symbols = if self.config.symbols.is_empty() {
            self.store.get_symbols().await
        } else {
            self.config.symbols.clone()
        };
        let window_size = self.window_size();

        let semaphore = Arc::new(Semaphore::new(self.config.worker_count.max(1)));
        let mut handles = Vec::with_capacity(symbols.len());

        for symbol in &symbols {
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let analyzers = self.analyzers.clone();
            let filters = self.filters.clone();
            let symbol = symbol.clone();

            let span = tracing::debug_span!("analyze_symbol", symbol = %symbol);
            let handle = tokio::spawn(
                async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return SymbolOutcome::default(),
                    };
                    analyze_symbol(&store, &analyzers, &filters, &symbol, window_size, now_ms).await
                }
                .instrument(span),
            );
            handles.push(handle);
        }

        let mut report = CycleReport {
            symbols: symbols.len(),
            ..CycleReport::default()
        };
        for handle in handles {
            match handle.await {
                Ok(outcome) => {
                    if outcome.skipped {
                        report.skipped_symbols += 1;
                    }
                    report.signals_generated += outcome.generated;
                    report.forwarded.extend(outcome.forwarded);
                }
                Err(e) => error!(target: "分析流水线", error = %e, "品种分析任务异常退出"),
            }
        }

        if let Some(forwarder) = &self.forwarder {
            for signal in &report.forwarded {
                forwarder.forward(signal.clone());
            }
        }

        report.signals_forwarded = report.forwarded.len();
        report.duration_ms = started.elapsed().as_millis() as u64;
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.signals_forwarded
            .fetch_add(report.signals_forwarded as u64, Ordering::Relaxed);

        info!(
            target: "分析流水线",
            log_type = "low_freq",
            symbols = report.symbols,
            skipped = report.skipped_symbols,
            generated = report.signals_generated,
            forwarded = report.signals_forwarded,
            duration_ms = report.duration_ms,
            "分析周期完成"
        );
        report
    }

    pub fn analyzer_stats(&self) -> Vec<AnalyzerStatsSnapshot> {
        self.analyzers
            .iter()
            .map(|r| r.stats.snapshot(r.analyzer.name()))
            .collect()
    }

    pub fn filter_stats(&self) -> FilterStats {
        self.filters.stats()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            signals_forwarded: self.signals_forwarded.load(Ordering::Relaxed),
            analyzers: self.analyzer_stats(),
            filters: self.filter_stats(),
        }
    }
}

async fn analyze_symbol(
    store: &PriceStore,
    analyzers: &[RegisteredAnalyzer],
    filters: &FilterChain,
    symbol: &str,
    window_size: usize,
    now_ms: i64,
) -> SymbolOutcome {
    // 分析器拿到的是窗口副本，清理与分析并发也不会看到中间状态
    let window = match store.history(symbol, window_size).await {
        Ok(window) => window,
        Err(e) => {
            debug!(target: "分析流水线", symbol, error = %e, "品种没有可用历史");
            return SymbolOutcome {
                skipped: true,
                ..SymbolOutcome::default()
            };
        }
    };

    let mut generated = Vec::new();
    for registered in analyzers {
        generated.extend(registered.run(symbol, &window, now_ms));
    }

    let ctx = FilterContext {
        volume_usd: store.snapshot(symbol).await.map(|o| o.volume_usd),
        now_ms,
    };
    let count = generated.len();
    let forwarded = generated
        .into_iter()
        .filter(|signal| filters.apply(signal, &ctx))
        .collect();

    SymbolOutcome {
        skipped: false,
        generated: count,
        forwarded,
    }
}
