//! 周期任务：行情拉取、过期清理、分析周期
//!
//! 三个任务相互独立，都在 `select!` 中同时等待定时器与关闭信号。
//! 已经开始的一轮工作会完整执行，结束后才会观察到关闭信号。

use super::AnalysisPipeline;
use crate::common::{Result, TickerSource};
use crate::store::{IngestReport, PriceStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

/// 拉取一批行情并逐条写入存储
pub async fn ingest_once(source: &dyn TickerSource, store: &PriceStore) -> Result<IngestReport> {
    let observations = source.fetch_tickers().await?;
    let report = store.ingest_batch(observations).await;
    debug!(target: "行情拉取", source = source.name(), accepted = report.accepted, rejected = report.rejected, "本轮写入完成");
    Ok(report)
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

#[instrument(target = "行情拉取", skip_all, name = "run_ingest_task")]
pub async fn run_ingest_task(
    source: Arc<dyn TickerSource>,
    store: Arc<PriceStore>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(target: "行情拉取", log_type = "module", source = source.name(), period_secs = period.as_secs(), "行情拉取任务已启动");
    let mut interval = ticker(period);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            },
            _ = interval.tick() => {
                // 失败只记录，下一轮定时拉取即重试
                if let Err(e) = ingest_once(source.as_ref(), &store).await {
                    warn!(target: "行情拉取", error = %e, error_type = e.get_error_type_summary(), retryable = e.is_retryable(), "拉取行情失败");
                }
            }
        }
    }
    info!(target: "行情拉取", log_type = "module", "行情拉取任务已停止");
}

#[instrument(target = "过期清理", skip_all, name = "run_cleanup_task")]
pub async fn run_cleanup_task(
    store: Arc<PriceStore>,
    period: Duration,
    retention: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(target: "过期清理", log_type = "module", period_secs = period.as_secs(), retention_secs = retention.as_secs(), "过期清理任务已启动");
    let mut interval = ticker(period);
    // 第一次 tick 立即触发，启动时没有需要清理的数据
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            },
            _ = interval.tick() => {
                match store.clean_old_data(retention).await {
                    Ok(removed) => debug!(target: "过期清理", removed, "清理完成"),
                    Err(e) => warn!(target: "过期清理", error = %e, "清理失败，等待下一轮"),
                }
            }
        }
    }
    info!(target: "过期清理", log_type = "module", "过期清理任务已停止");
}

#[instrument(target = "分析流水线", skip_all, name = "run_analysis_task")]
pub async fn run_analysis_task(
    pipeline: Arc<AnalysisPipeline>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(target: "分析流水线", log_type = "module", period_secs = period.as_secs(), window_size = pipeline.window_size(), "分析任务已启动");
    let mut interval = ticker(period);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            },
            _ = interval.tick() => {
                pipeline.run_cycle().await;
            }
        }
    }
    info!(target: "分析流水线", log_type = "module", "分析任务已停止");
}
