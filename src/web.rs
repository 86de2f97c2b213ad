//! 只读查询接口
//!
//! 品种列表、最新价格、历史切片、成交额排名与各组件统计，不提供任何写操作。

use crate::analysis::{CounterAnalyzer, CounterStateSnapshot};
use crate::common::{AppError, Observation, Result, VolumeRankEntry};
use crate::notify::{DispatcherStats, SignalDispatcher};
use crate::pipeline::{AnalysisPipeline, PipelineStats};
use crate::store::{PriceStore, StoreStats, SymbolStats};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

const DEFAULT_HISTORY_LIMIT: usize = 100;
const DEFAULT_TOP_N: usize = 10;

/// Web服务器的共享状态
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<PriceStore>,
    pub pipeline: Option<Arc<AnalysisPipeline>>,
    pub dispatcher: Option<Arc<SignalDispatcher>>,
    pub counter: Option<Arc<CounterAnalyzer>>,
}

impl AppState {
    pub fn new(store: Arc<PriceStore>) -> Self {
        Self {
            store,
            pipeline: None,
            dispatcher: None,
            counter: None,
        }
    }
}

/// 接口错误响应
#[derive(Debug)]
pub struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        ApiError(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            AppError::SymbolNotFound(_) => StatusCode::NOT_FOUND,
            AppError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
            kind: self.0.get_error_type_summary(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PriceResponse {
    pub symbol: String,
    pub price: f64,
    pub timestamp_ms: i64,
}

#[derive(Debug, Deserialize, Default)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TopQuery {
    pub n: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub store: StoreStats,
    pub pipeline: Option<PipelineStats>,
    pub dispatcher: Option<DispatcherStats>,
}

#[derive(Debug, Serialize)]
pub struct SymbolStatsResponse {
    #[serde(flatten)]
    pub stats: SymbolStats,
    pub counter: Option<CounterStateSnapshot>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/symbols", get(symbols_handler))
        .route("/api/price/:symbol", get(price_handler))
        .route("/api/history/:symbol", get(history_handler))
        .route("/api/top", get(top_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/stats/:symbol", get(symbol_stats_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn symbols_handler(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.store.get_symbols().await)
}

pub async fn price_handler(
    Path(symbol): Path<String>,
    State(state): State<AppState>,
) -> std::result::Result<Json<PriceResponse>, ApiError> {
    let symbol = symbol.to_uppercase();
    let snapshot = state
        .store
        .snapshot(&symbol)
        .await
        .ok_or_else(|| AppError::SymbolNotFound(symbol.clone()))?;
    Ok(Json(PriceResponse {
        symbol,
        price: snapshot.price,
        timestamp_ms: snapshot.timestamp_ms,
    }))
}

pub async fn history_handler(
    Path(symbol): Path<String>,
    Query(query): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> std::result::Result<Json<Vec<Observation>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let history = state.store.history(&symbol.to_uppercase(), limit).await?;
    Ok(Json(history))
}

pub async fn top_handler(
    Query(query): Query<TopQuery>,
    State(state): State<AppState>,
) -> Json<Vec<VolumeRankEntry>> {
    Json(state.store.top_by_volume(query.n.unwrap_or(DEFAULT_TOP_N)).await)
}

pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        store: state.store.stats().await,
        pipeline: state.pipeline.as_ref().map(|p| p.stats()),
        dispatcher: state.dispatcher.as_ref().map(|d| d.stats()),
    })
}

pub async fn symbol_stats_handler(
    Path(symbol): Path<String>,
    State(state): State<AppState>,
) -> std::result::Result<Json<SymbolStatsResponse>, ApiError> {
    let symbol = symbol.to_uppercase();
    let stats = state.store.symbol_stats(&symbol).await?;
    let counter = state.counter.as_ref().and_then(|c| c.state_snapshot(&symbol));
    Ok(Json(SymbolStatsResponse { stats, counter }))
}

/// 启动查询服务，收到关闭信号后优雅退出
#[instrument(target = "查询接口", skip(state, shutdown_rx), err)]
pub async fn run_web_server(
    state: AppState,
    bind_addr: &str,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| AppError::WebServerError(format!("绑定地址 {} 失败: {}", bind_addr, e)))?;
    info!(target: "查询接口", log_type = "low_freq", addr = %bind_addr, "查询接口已启动");

    let shutdown = async move {
        while shutdown_rx.changed().await.is_ok() {
            if *shutdown_rx.borrow() {
                break;
            }
        }
    };

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| {
            error!(target: "查询接口", error = %e, "查询接口遇到致命错误");
            AppError::WebServerError(format!("Web服务器错误: {}", e))
        })?;

    info!(target: "查询接口", log_type = "low_freq", "查询接口已关闭");
    Ok(())
}
