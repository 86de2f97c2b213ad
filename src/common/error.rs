use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid observation: {0}")]
    InvalidObservation(String),

    #[error("Storage full: symbol table already holds {max_symbols} symbols")]
    StorageFull { max_symbols: usize },

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Insufficient data: required {required}, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Analyzer disabled: {0}")]
    AnalyzerDisabled(String),

    #[error("Backing store unavailable: {0}")]
    BackendUnavailable(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Web server error: {0}")]
    WebServerError(String),
}

impl From<r2d2::Error> for AppError {
    fn from(e: r2d2::Error) -> Self {
        // 连接池取不到连接，说明后端存储不可用
        AppError::BackendUnavailable(format!("连接池获取连接失败: {}", e))
    }
}

impl AppError {
    /// 获取错误类型的简洁摘要，用于日志聚合和错误分类
    ///
    /// 返回稳定的类别字符串，按业务影响命名
    pub fn get_error_type_summary(&self) -> &'static str {
        match self {
            // 行情数据写入相关
            AppError::InvalidObservation(_) => "ticker_observation_rejected",
            AppError::StorageFull { .. } => "ticker_symbol_table_full",
            AppError::SymbolNotFound(_) => "ticker_symbol_unknown",

            // 分析相关
            AppError::InsufficientData { .. } => "signal_window_too_short",
            AppError::AnalyzerDisabled(_) => "signal_analyzer_disabled",

            // 存储相关
            AppError::BackendUnavailable(_) => "ticker_backend_unavailable",
            AppError::DatabaseError(_) => "ticker_persistence_failed",
            AppError::SqliteError(_) => "ticker_storage_operation_failed",

            // 行情获取相关
            AppError::ApiError(_) => "ticker_data_acquisition_failed",
            AppError::HttpError(_) => "market_data_connection_failed",
            AppError::JsonError(_) => "ticker_data_parsing_failed",

            // 系统资源相关
            AppError::IoError(_) => "ticker_file_operation_failed",
            AppError::ChannelError(_) => "signal_dispatch_pipeline_failed",
            AppError::ConfigError(_) => "signal_service_configuration_invalid",
            AppError::WebServerError(_) => "signal_api_server_failed",
        }
    }

    /// 检查错误是否为可重试类型
    ///
    /// 存储内部从不重试，这里只给调度任务判断下一周期是否值得再试
    pub fn is_retryable(&self) -> bool {
        match self {
            // 网络与后端的瞬时故障
            AppError::HttpError(_) |
            AppError::ApiError(_) |
            AppError::BackendUnavailable(_) |
            AppError::ChannelError(_) |
            AppError::IoError(_) => true,

            AppError::DatabaseError(msg) => {
                msg.contains("locked") || msg.contains("busy") || msg.contains("timeout")
            },
            AppError::SqliteError(_) => true,

            // 数据本身有问题，重试没有意义
            AppError::InvalidObservation(_) |
            AppError::StorageFull { .. } |
            AppError::SymbolNotFound(_) |
            AppError::InsufficientData { .. } |
            AppError::AnalyzerDisabled(_) |
            AppError::JsonError(_) |
            AppError::ConfigError(_) |
            AppError::WebServerError(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
