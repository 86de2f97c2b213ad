// 导出模块
pub mod analysis;
pub mod common;
pub mod notify;
pub mod pipeline;
pub mod store;
pub mod web;

// 常用类型
pub use common::{AppConfig, AppError, Observation, Result, Signal};
pub use pipeline::AnalysisPipeline;
pub use store::PriceStore;
