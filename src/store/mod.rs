// src/store/mod.rs
pub mod backend;
pub mod history_store;
pub mod notification_hub;
pub mod price_store;
pub mod snapshot_cache;
pub mod sqlite_backend;
pub mod volume_index;


pub use backend::{EvictionReport, HistoryBackend, MemoryHistoryBackend};
pub use notification_hub::{HubStats, StoreListener, SubscriptionId, WILDCARD};
pub use price_store::{IngestReport, PriceStore, StoreStats, SymbolStats};
pub use sqlite_backend::SqliteHistoryBackend;

use crate::common::{BackendKind, Result, StorageConfig};
use tracing::info;

/// 按配置创建历史后端
pub fn open_backend(config: &StorageConfig) -> Result<Box<dyn HistoryBackend>> {
    let backend: Box<dyn HistoryBackend> = match config.backend {
        BackendKind::Memory => Box::new(MemoryHistoryBackend::new()),
        BackendKind::Sqlite => Box::new(SqliteHistoryBackend::open(
            &config.sqlite_path,
            config.sqlite_pool_size,
        )?),
    };
    info!(target: "价格存储", log_type = "module", backend = backend.name(), "历史后端已选定");
    Ok(backend)
}
