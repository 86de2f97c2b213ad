// 行情存储与信号分析服务
//
// 启动顺序：配置 → 日志 → 存储 → 投递队列 → 分析器 → 周期任务 → 查询接口。
// 收到 Ctrl+C 后广播关闭信号，等待各任务退出，再排空投递队列与存储通知。

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use ticker_signal::analysis::{build_stateless_analyzers, CounterAnalyzer};
use ticker_signal::common::config::constants::DEFAULT_CONFIG_PATH;
use ticker_signal::common::logging_setup::init_logging;
use ticker_signal::common::{AppConfig, BinanceTickerSource, TickerSource};
use ticker_signal::notify::{LogSink, SignalDispatcher, SignalSink, WebhookSink};
use ticker_signal::pipeline::scheduler::{run_analysis_task, run_cleanup_task, run_ingest_task};
use ticker_signal::pipeline::{AnalysisPipeline, FilterChain};
use ticker_signal::store::{open_backend, PriceStore};
use ticker_signal::web::{run_web_server, AppState};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

#[derive(Parser, Debug)]
#[command(name = "signal_server", about = "币安永续合约行情存储与信号分析服务")]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::from_file(&args.config)?;

    // guard 存活期间文件日志才会被刷新
    let _guard = init_logging(&config.logging)?;

    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        error!(target: "应用生命周期", panic_info = %panic_info, "程序发生未捕获的Panic");
        original_hook(panic_info);
    }));

    info!(target: "应用生命周期", log_type = "low_freq", path = %args.config, "配置文件加载成功");

    let result = run_app(config).await;
    match &result {
        Ok(()) => info!(target: "应用生命周期", log_type = "low_freq", "应用程序正常关闭"),
        Err(e) => error!(target: "应用生命周期", error = ?e, "应用因顶层错误而异常退出"),
    }
    result
}

#[instrument(target = "应用生命周期", skip_all, name = "run_app")]
async fn run_app(config: AppConfig) -> Result<()> {
    info!(target: "应用生命周期", log_type = "low_freq", "信号分析服务启动中...");

    // 1. 存储
    let backend = open_backend(&config.storage)?;
    let store = Arc::new(PriceStore::new(&config.storage, backend).await?);

    // 2. 投递队列
    let dispatcher = if config.notification.enabled {
        let mut sinks: Vec<Arc<dyn SignalSink>> = vec![Arc::new(LogSink)];
        if let Some(webhook) = WebhookSink::from_config(&config.notification)? {
            sinks.push(Arc::new(webhook));
        }
        Some(Arc::new(SignalDispatcher::new(config.notification.queue_capacity, sinks)))
    } else {
        warn!(target: "应用生命周期", log_type = "low_freq", "通知已禁用，通过过滤的信号只计数不投递");
        None
    };

    // 3. 分析器与流水线
    let filters = FilterChain::from_config(&config.filters);
    let mut pipeline = AnalysisPipeline::new(store.clone(), config.pipeline.clone(), filters);
    for analyzer in build_stateless_analyzers(&config.analyzers) {
        pipeline = pipeline.with_analyzer(analyzer);
    }

    let counter = if config.counter.enabled {
        let mut counter = CounterAnalyzer::new(config.counter.clone());
        if let (Some(dispatcher), true) = (&dispatcher, config.counter.notify_on_signal) {
            counter = counter.with_notifier(dispatcher.clone());
        }
        let counter = Arc::new(counter);
        pipeline = pipeline.with_analyzer(counter.clone());
        Some(counter)
    } else {
        None
    };

    if let Some(dispatcher) = &dispatcher {
        pipeline = pipeline.with_forwarder(dispatcher.clone());
    }
    let pipeline = Arc::new(pipeline);

    // 4. 周期任务
    let source: Arc<dyn TickerSource> = Arc::new(BinanceTickerSource::new(&config.ingest)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    handles.push((
        "ingest",
        tokio::spawn(run_ingest_task(
            source,
            store.clone(),
            Duration::from_secs(config.ingest.poll_interval_secs),
            shutdown_rx.clone(),
        )),
    ));
    handles.push((
        "cleanup",
        tokio::spawn(run_cleanup_task(
            store.clone(),
            Duration::from_secs(config.storage.cleanup_interval_secs),
            Duration::from_secs(config.storage.retention_period_secs),
            shutdown_rx.clone(),
        )),
    ));
    handles.push((
        "analysis",
        tokio::spawn(run_analysis_task(
            pipeline.clone(),
            Duration::from_secs(config.pipeline.analysis_interval_secs),
            shutdown_rx.clone(),
        )),
    ));

    // 5. 查询接口
    let web_handle = if config.web.enabled {
        let state = AppState {
            store: store.clone(),
            pipeline: Some(pipeline.clone()),
            dispatcher: dispatcher.clone(),
            counter,
        };
        let bind_addr = config.web.bind_addr.clone();
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move { run_web_server(state, &bind_addr, rx).await }))
    } else {
        None
    };

    // 6. 等待关闭信号
    info!(target: "应用生命周期", "所有服务已启动，等待关闭信号 (Ctrl+C)...");
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!(target: "应用生命周期", log_type = "low_freq", reason = "received_ctrl_c", "接收到关闭信号，开始优雅关闭");
        }
        Err(e) => {
            error!(target: "应用生命周期", error = %e, "监听关闭信号失败，立即开始关闭");
        }
    }
    let _ = shutdown_tx.send(true);

    for (task, handle) in handles {
        if let Err(e) = handle.await {
            error!(target: "应用生命周期", task, panic = ?e, "后台任务在退出时发生 panic");
        }
    }

    if let Some(handle) = web_handle {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(target: "应用生命周期", error = %e, "查询接口异常退出"),
            Err(e) => error!(target: "应用生命周期", task = "web", panic = ?e, "查询接口在退出时发生 panic"),
        }
    }

    // 7. 排空投递队列与存储通知
    if let Some(dispatcher) = &dispatcher {
        dispatcher.stop().await;
    }
    store.shutdown().await;

    let stats = pipeline.stats();
    info!(target: "应用生命周期", log_type = "low_freq", cycles = stats.cycles, signals_forwarded = stats.signals_forwarded, "服务已停止");
    Ok(())
}
