//! 信号服务配置模块
//!
//! 配置从TOML文件加载，所有默认值集中在 `constants` 中，由各段的 `Default` 实现使用。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use crate::common::{AppError, Result};

/// 系统配置常量
pub mod constants {
    /// 默认配置文件路径
    pub const DEFAULT_CONFIG_PATH: &str = "config/SignalConfig.toml";

    /// 每个品种默认保留的最大历史条数
    pub const DEFAULT_MAX_HISTORY_PER_SYMBOL: usize = 1000;

    /// 默认支持的最大品种数
    pub const DEFAULT_MAX_SYMBOLS: usize = 1000;

    /// 默认清理间隔（秒）
    pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;

    /// 默认历史保留时长（秒）
    pub const DEFAULT_RETENTION_PERIOD_SECS: u64 = 24 * 60 * 60;

    /// 默认通知队列容量
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

    /// 默认行情拉取间隔（秒）
    pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

    /// 默认分析周期（秒）
    pub const DEFAULT_ANALYSIS_INTERVAL_SECS: u64 = 60;

    /// 默认分析并发数
    pub const DEFAULT_WORKER_COUNT: usize = 4;

    /// 币安U本位合约API地址
    pub const DEFAULT_API_URL: &str = "https://fapi.binance.com";
}

use constants::*;

/// 信号服务总配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub analyzers: AnalyzersConfig,

    #[serde(default)]
    pub counter: CounterConfig,

    #[serde(default)]
    pub filters: FilterConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub notification: NotificationConfig,

    #[serde(default)]
    pub web: WebConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 历史存储后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Sqlite,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 每个品种最多保留的历史条数
    pub max_history_per_symbol: usize,

    /// 最多容纳的品种数
    pub max_symbols: usize,

    /// 清理任务间隔（秒）
    pub cleanup_interval_secs: u64,

    /// 历史数据保留时长（秒）
    pub retention_period_secs: u64,

    /// 历史存储后端
    pub backend: BackendKind,

    /// SQLite 数据库路径
    pub sqlite_path: String,

    /// SQLite 连接池大小
    pub sqlite_pool_size: u32,

    /// 存储变更通知队列容量
    pub notification_queue_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_history_per_symbol: DEFAULT_MAX_HISTORY_PER_SYMBOL,
            max_symbols: DEFAULT_MAX_SYMBOLS,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            retention_period_secs: DEFAULT_RETENTION_PERIOD_SECS,
            backend: BackendKind::Memory,
            sqlite_path: "data/ticker_history.db".to_string(),
            sqlite_pool_size: 4,
            notification_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}


/// 单个分析器的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub enabled: bool,
    pub weight: f64,
    pub min_confidence: f64,
    pub min_data_points: usize,
    /// 分析器私有参数，例如 min_growth / continuity_threshold
    pub custom_settings: HashMap<String, f64>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: 1.0,
            min_confidence: 10.0,
            min_data_points: 3,
            custom_settings: HashMap::new(),
        }
    }
}

impl AnalyzerConfig {
    /// 读取私有参数，缺省时使用给定默认值
    pub fn setting(&self, key: &str, default: f64) -> f64 {
        self.custom_settings.get(key).copied().unwrap_or(default)
    }

    pub fn with_setting(mut self, key: &str, value: f64) -> Self {
        self.custom_settings.insert(key.to_string(), value);
        self
    }

    /// 校验已配置的私有参数，未配置的键使用分析器内置默认值
    fn validate_settings(&self, name: &str) -> Result<()> {
        for key in POSITIVE_SETTINGS {
            if let Some(value) = self.custom_settings.get(key) {
                if !value.is_finite() || *value <= 0.0 {
                    return Err(AppError::ConfigError(format!("分析器 {} 的 {} 必须为正数", name, key)));
                }
            }
        }

        if let Some(value) = self.custom_settings.get("min_volume") {
            if !value.is_finite() || *value < 0.0 {
                return Err(AppError::ConfigError(format!("分析器 {} 的 min_volume 不能为负数", name)));
            }
        }

        if let Some(value) = self.custom_settings.get("continuity_threshold") {
            if !(0.0..=1.0).contains(value) {
                return Err(AppError::ConfigError(format!("分析器 {} 的 continuity_threshold 必须在 0-1 之间", name)));
            }
        }

        if let Some(value) = self.custom_settings.get("min_continuous_points") {
            if !value.is_finite() || *value < 2.0 {
                return Err(AppError::ConfigError(format!("分析器 {} 的 min_continuous_points 至少为2", name)));
            }
        }

        if let (Some(low), Some(high)) = (
            self.custom_settings.get("low_volatility"),
            self.custom_settings.get("high_volatility"),
        ) {
            if low >= high {
                return Err(AppError::ConfigError(format!("分析器 {} 的 low_volatility 必须小于 high_volatility", name)));
            }
        }
        Ok(())
    }
}

/// 必须为正数的私有参数
const POSITIVE_SETTINGS: [&str; 8] = [
    "min_growth",
    "min_fall",
    "data_points_saturation",
    "spike_multiplier",
    "min_price_change",
    "min_volume_change",
    "low_volatility",
    "high_volatility",
];

/// 四个无状态分析器的配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzersConfig {
    pub growth: AnalyzerConfig,
    pub fall: AnalyzerConfig,
    pub continuous: AnalyzerConfig,
    pub volume: AnalyzerConfig,
}

/// 计数分析器支持的统计窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CounterWindow {
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl CounterWindow {
    pub const ALL: [CounterWindow; 6] = [
        CounterWindow::M5,
        CounterWindow::M15,
        CounterWindow::M30,
        CounterWindow::H1,
        CounterWindow::H4,
        CounterWindow::D1,
    ];

    pub fn minutes(&self) -> u64 {
        match self {
            CounterWindow::M5 => 5,
            CounterWindow::M15 => 15,
            CounterWindow::M30 => 30,
            CounterWindow::H1 => 60,
            CounterWindow::H4 => 240,
            CounterWindow::D1 => 1440,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.minutes() * 60 * 1000) as i64
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CounterWindow::M5 => "5m",
            CounterWindow::M15 => "15m",
            CounterWindow::M30 => "30m",
            CounterWindow::H1 => "1h",
            CounterWindow::H4 => "4h",
            CounterWindow::D1 => "1d",
        }
    }
}

impl fmt::Display for CounterWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CounterWindow {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        CounterWindow::ALL
            .iter()
            .copied()
            .find(|w| w.as_str() == s)
            .ok_or_else(|| AppError::ConfigError(format!("不支持的计数窗口: {}", s)))
    }
}

/// 计数分析器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    pub enabled: bool,
    /// 基础周期（分钟），决定窗口内最多计数多少次
    pub base_period_minutes: u64,
    pub selected_window: CounterWindow,
    /// 上涨计数阈值（百分比）
    pub growth_threshold: f64,
    /// 下跌计数阈值（百分比，正数）
    pub fall_threshold: f64,
    pub track_growth: bool,
    pub track_fall: bool,
    pub notify_on_signal: bool,
    pub min_data_points: usize,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_period_minutes: 1,
            selected_window: CounterWindow::M15,
            growth_threshold: 0.5,
            fall_threshold: 0.5,
            track_growth: true,
            track_fall: true,
            notify_on_signal: true,
            min_data_points: 2,
        }
    }
}

/// 信号过滤配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// 置信度下限
    pub min_confidence: f64,
    /// 24小时成交额下限（USDT）
    pub min_volume_usd: f64,
    /// 同一品种两次信号的最小间隔（秒）
    pub rate_limit_secs: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_confidence: 30.0,
            min_volume_usd: 0.0,
            rate_limit_secs: 300,
        }
    }
}

/// 分析流水线配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub analysis_interval_secs: u64,
    /// 并发分析的品种数
    pub worker_count: usize,
    /// 分析窗口长度，小于分析器要求时取分析器要求
    pub window_size: usize,
    /// 只分析这些品种，空表示全部已存储品种
    pub symbols: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysis_interval_secs: DEFAULT_ANALYSIS_INTERVAL_SECS,
            worker_count: DEFAULT_WORKER_COUNT,
            window_size: 10,
            symbols: Vec::new(),
        }
    }
}

/// 行情拉取配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub api_url: String,
    pub poll_interval_secs: u64,
    /// 只保留以此结尾的品种
    pub quote_asset: String,
    pub request_timeout_secs: u64,
    pub fetch_funding_rate: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            quote_asset: "USDT".to_string(),
            request_timeout_secs: 10,
            fetch_funding_rate: true,
        }
    }
}

/// 通知配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub queue_capacity: usize,
    /// 推送地址，未配置时只写日志
    pub webhook_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            webhook_url: None,
            request_timeout_secs: 10,
        }
    }
}

/// 查询接口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub bind_addr: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别 (trace, debug, info, warn, error)
    pub log_level: String,

    /// 是否输出到控制台
    pub enable_console_output: bool,

    /// 日志文件目录，未配置时不写文件
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            enable_console_output: true,
            log_dir: Some("logs".to_string()),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML文本解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::ConfigError(format!("解析配置文件失败: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.storage.max_history_per_symbol == 0 {
            return Err(AppError::ConfigError("每品种最大历史条数必须大于0".to_string()));
        }

        if self.storage.max_symbols == 0 {
            return Err(AppError::ConfigError("最大品种数必须大于0".to_string()));
        }

        if self.storage.cleanup_interval_secs == 0 || self.storage.retention_period_secs == 0 {
            return Err(AppError::ConfigError("清理间隔和保留时长必须大于0".to_string()));
        }

        if self.storage.backend == BackendKind::Sqlite {
            if self.storage.sqlite_path.is_empty() {
                return Err(AppError::ConfigError("SQLite 后端需要配置 sqlite_path".to_string()));
            }
            if self.storage.sqlite_pool_size == 0 {
                return Err(AppError::ConfigError("数据库连接池大小必须大于0".to_string()));
            }
        }

        if self.storage.notification_queue_capacity == 0 || self.notification.queue_capacity == 0 {
            return Err(AppError::ConfigError("通知队列容量必须大于0".to_string()));
        }

        for (name, analyzer) in [
            ("growth", &self.analyzers.growth),
            ("fall", &self.analyzers.fall),
            ("continuous", &self.analyzers.continuous),
            ("volume", &self.analyzers.volume),
        ] {
            if analyzer.min_data_points < 2 {
                return Err(AppError::ConfigError(format!("分析器 {} 的 min_data_points 至少为2", name)));
            }
            if !(0.0..=100.0).contains(&analyzer.min_confidence) {
                return Err(AppError::ConfigError(format!("分析器 {} 的 min_confidence 必须在 0-100 之间", name)));
            }
            analyzer.validate_settings(name)?;
        }

        if self.counter.base_period_minutes == 0 {
            return Err(AppError::ConfigError("计数基础周期必须大于0".to_string()));
        }
        if self.counter.growth_threshold <= 0.0 || self.counter.fall_threshold <= 0.0 {
            return Err(AppError::ConfigError("计数阈值必须为正数".to_string()));
        }

        if self.pipeline.worker_count == 0 || self.pipeline.analysis_interval_secs == 0 {
            return Err(AppError::ConfigError("分析并发数和分析间隔必须大于0".to_string()));
        }

        if self.ingest.api_url.is_empty() || self.ingest.poll_interval_secs == 0 {
            return Err(AppError::ConfigError("行情API地址不能为空，拉取间隔必须大于0".to_string()));
        }

        if let Some(url) = &self.notification.webhook_url {
            if url.is_empty() {
                return Err(AppError::ConfigError("webhook_url 不能为空字符串".to_string()));
            }
        }

        Ok(())
    }
}
