//! 币安U本位合约24小时行情接口
//!
//! 行情来源只负责把原始ticker转换成 `Observation`，写入存储由拉取任务完成。

use crate::common::{AppError, IngestConfig, Observation, Result};
use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// 行情来源，按固定周期被拉取任务调用
pub trait TickerSource: Send + Sync {
    fn name(&self) -> &str;

    /// 拉取一批最新行情
    fn fetch_tickers(&self) -> BoxFuture<'_, Result<Vec<Observation>>>;
}

/// `/fapi/v1/ticker/24hr` 的原始返回
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceRawTicker {
    pub symbol: String,
    pub price_change_percent: String,
    pub last_price: String,
    pub high_price: String,
    pub low_price: String,
    pub volume: String,
    pub quote_volume: String,
    pub close_time: i64,
}

/// `/fapi/v1/premiumIndex` 的原始返回
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceRawPremiumIndex {
    pub symbol: String,
    pub last_funding_rate: String,
}

fn parse_field(symbol: &str, name: &str, raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|e| AppError::ApiError(format!("{} 字段 {} 解析失败: {} ({})", symbol, name, raw, e)))
}

impl BinanceRawTicker {
    /// 转换为内部观测，资金费率由调用方补充
    ///
    /// 24小时ticker不含持仓量，`/fapi/v1/openInterest` 只能逐品种查询，这里不拉取，持仓量固定为0。
    pub fn to_observation(&self, funding_rate: f64) -> Result<Observation> {
        Ok(Observation {
            symbol: self.symbol.clone(),
            price: parse_field(&self.symbol, "lastPrice", &self.last_price)?,
            volume_24h: parse_field(&self.symbol, "volume", &self.volume)?,
            volume_usd: parse_field(&self.symbol, "quoteVolume", &self.quote_volume)?,
            timestamp_ms: self.close_time,
            open_interest: 0.0,
            funding_rate,
            change_24h: parse_field(&self.symbol, "priceChangePercent", &self.price_change_percent)?,
            high_24h: parse_field(&self.symbol, "highPrice", &self.high_price)?,
            low_24h: parse_field(&self.symbol, "lowPrice", &self.low_price)?,
        })
    }
}

/// 币安24小时ticker行情来源
#[derive(Clone, Debug)]
pub struct BinanceTickerSource {
    api_url: String,
    quote_asset: String,
    fetch_funding_rate: bool,
    client: Client,
}

impl BinanceTickerSource {
    /// 创建新的行情来源
    #[instrument(target = "行情接口", skip_all, err)]
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.request_timeout_secs.min(10)))
            .build()
            .map_err(|e| AppError::ApiError(format!("创建HTTP客户端失败: {}", e)))?;

        info!(target: "行情接口", log_type = "module", endpoint = %config.api_url, "初始化币安行情接口");
        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            quote_asset: config.quote_asset.clone(),
            fetch_funding_rate: config.fetch_funding_rate,
            client,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.api_url, path);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ApiError(format!("请求 {} 失败: {} - {}", url, status, body)));
        }
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// 拉取资金费率，失败时返回空表，不影响价格数据
    async fn fetch_funding_rates(&self) -> HashMap<String, f64> {
        match self.get_json::<Vec<BinanceRawPremiumIndex>>("/fapi/v1/premiumIndex").await {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|r| r.last_funding_rate.parse::<f64>().ok().map(|rate| (r.symbol, rate)))
                .collect(),
            Err(e) => {
                warn!(target: "行情接口", error = %e, "获取资金费率失败，本轮资金费率记为0");
                HashMap::new()
            }
        }
    }

    #[instrument(target = "行情接口", skip(self), err)]
    async fn fetch_all(&self) -> Result<Vec<Observation>> {
        let tickers: Vec<BinanceRawTicker> = self.get_json("/fapi/v1/ticker/24hr").await?;
        let funding_rates = if self.fetch_funding_rate {
            self.fetch_funding_rates().await
        } else {
            HashMap::new()
        };

        Ok(convert_tickers(tickers, &self.quote_asset, &funding_rates))
    }
}

/// 过滤计价资产并转换，解析失败的行跳过
pub fn convert_tickers(
    tickers: Vec<BinanceRawTicker>,
    quote_asset: &str,
    funding_rates: &HashMap<String, f64>,
) -> Vec<Observation> {
    let total = tickers.len();
    let observations: Vec<Observation> = tickers
        .into_iter()
        .filter(|t| quote_asset.is_empty() || t.symbol.ends_with(quote_asset))
        .filter_map(|t| {
            let funding_rate = funding_rates.get(&t.symbol).copied().unwrap_or(0.0);
            match t.to_observation(funding_rate) {
                Ok(obs) => Some(obs),
                Err(e) => {
                    warn!(target: "行情接口", symbol = %t.symbol, error = %e, "ticker解析失败，跳过");
                    None
                }
            }
        })
        .collect();

    debug!(target: "行情接口", total, kept = observations.len(), "ticker转换完成");
    observations
}

impl TickerSource for BinanceTickerSource {
    fn name(&self) -> &str {
        "binance_futures_24hr"
    }

    fn fetch_tickers(&self) -> BoxFuture<'_, Result<Vec<Observation>>> {
        Box::pin(self.fetch_all())
    }
}
