//! 统一日志系统初始化模块
//!
//! 控制台输出与按天滚动的文件输出共用同一个过滤器，`RUST_LOG` 优先于配置文件中的级别。

use crate::common::{AppError, LoggingConfig, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// 自定义Guard trait，避免dyn Drop警告
pub trait LogGuard: Send + Sync {}

/// 空的Guard实现，用于未启用文件日志时的占位符
pub struct DummyGuard;

impl LogGuard for DummyGuard {}

impl LogGuard for WorkerGuard {}

/// 构建业务日志过滤器，压低第三方库的噪音
fn build_filter(log_level: &str) -> EnvFilter {
    let filter_str = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        format!("{},hyper=warn,reqwest=warn,rusqlite=warn,tower_http=info", log_level)
    });
    EnvFilter::new(filter_str)
}

/// 初始化日志系统，返回的 guard 必须在 main 中保持存活直到退出
pub fn init_logging(config: &LoggingConfig) -> Result<Box<dyn LogGuard>> {
    let console_layer = if config.enable_console_output {
        Some(
            fmt::layer()
                .with_target(true)
                .with_filter(build_filter(&config.log_level)),
        )
    } else {
        None
    };

    let (file_layer, guard): (Option<_>, Box<dyn LogGuard>) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "signal_server.log");
            let (writer, worker_guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(build_filter(&config.log_level));
            (Some(layer), Box::new(worker_guard))
        }
        None => (None, Box::new(DummyGuard)),
    };

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| AppError::ConfigError(format!("日志系统初始化失败: {}", e)))?;

    Ok(guard)
}
