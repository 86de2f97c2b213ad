// 导出共享模块
pub mod api;
pub mod config;
pub mod error;
pub mod logging_setup;
pub mod models;

// 重新导出常用类型，方便使用
pub use api::{BinanceTickerSource, TickerSource};
pub use config::{
    AnalyzerConfig, AnalyzersConfig, AppConfig, BackendKind, CounterConfig, CounterWindow,
    FilterConfig, IngestConfig, LoggingConfig, NotificationConfig, PipelineConfig, StorageConfig,
    WebConfig,
};
pub use error::{AppError, Result};
pub use models::{
    change_percent, time_ordered, Direction, Observation, Signal, SignalKind, StoreEvent,
    VolumeRankEntry,
};

/// 当前UTC时间（毫秒）
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
