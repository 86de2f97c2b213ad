//! 行情与信号的核心数据类型

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 单次行情观测 - 一个品种在某一时刻的24小时ticker快照
///
/// 写入存储后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// 交易品种
    pub symbol: String,
    /// 最新价格
    pub price: f64,
    /// 24小时成交量（基础资产）
    pub volume_24h: f64,
    /// 24小时成交额（USDT）
    pub volume_usd: f64,
    /// 观测时间戳（毫秒）
    pub timestamp_ms: i64,
    /// 持仓量，行情来源不提供时为0
    pub open_interest: f64,
    /// 资金费率
    pub funding_rate: f64,
    /// 24小时涨跌幅（百分比）
    pub change_24h: f64,
    /// 24小时最高价
    pub high_24h: f64,
    /// 24小时最低价
    pub low_24h: f64,
}

impl Observation {
    /// 只带价格和成交量的简化构造，其余字段取0
    pub fn new(symbol: impl Into<String>, price: f64, volume_24h: f64, timestamp_ms: i64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            volume_24h,
            volume_usd: price * volume_24h,
            timestamp_ms,
            open_interest: 0.0,
            funding_rate: 0.0,
            change_24h: 0.0,
            high_24h: price,
            low_24h: price,
        }
    }

    /// 写入前的合法性检查，返回拒绝原因
    pub fn validation_error(&self) -> Option<String> {
        if self.symbol.is_empty() {
            return Some("品种名为空".to_string());
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Some(format!("价格必须为正数: {}", self.price));
        }
        if self.timestamp_ms == 0 {
            return Some("时间戳为0".to_string());
        }
        if self.volume_24h < 0.0 || self.volume_usd < 0.0 {
            return Some(format!("成交量不能为负: volume={}, volume_usd={}", self.volume_24h, self.volume_usd));
        }
        None
    }
}

/// 计算区间涨跌幅（百分比）
pub fn change_percent(first_price: f64, last_price: f64) -> f64 {
    if first_price == 0.0 {
        return 0.0;
    }
    (last_price - first_price) / first_price * 100.0
}

/// 按时间戳升序排列窗口，时间相同的保持原有顺序
pub fn time_ordered(window: &[Observation]) -> Vec<Observation> {
    let mut ordered = window.to_vec();
    ordered.sort_by_key(|o| o.timestamp_ms);
    ordered
}

/// 信号类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Growth,
    Fall,
    Continuous,
    Volume,
    CounterGrowth,
    CounterFall,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Growth => "growth",
            SignalKind::Fall => "fall",
            SignalKind::Continuous => "continuous",
            SignalKind::Volume => "volume",
            SignalKind::CounterGrowth => "counter_growth",
            SignalKind::CounterFall => "counter_fall",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 信号方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    /// 根据涨跌幅判断方向
    pub fn from_change(change_percent: f64) -> Self {
        if change_percent > 0.0 {
            Direction::Up
        } else if change_percent < 0.0 {
            Direction::Down
        } else {
            Direction::Flat
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Flat => "flat",
        }
    }
}

/// 分析器输出的信号，创建后不再修改
///
/// 下跌类信号的 `change_percent` 为负数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub kind: SignalKind,
    pub direction: Direction,
    pub change_percent: f64,
    /// 置信度 0-100
    pub confidence: f64,
    pub data_points: usize,
    pub start_price: f64,
    pub end_price: f64,
    pub timestamp_ms: i64,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Signal {
    /// 以窗口首尾观测构造信号，置信度截断到 [0,100]
    pub fn from_window(
        kind: SignalKind,
        direction: Direction,
        first: &Observation,
        last: &Observation,
        data_points: usize,
        confidence: f64,
    ) -> Self {
        Self {
            symbol: last.symbol.clone(),
            kind,
            direction,
            change_percent: change_percent(first.price, last.price),
            confidence: confidence.clamp(0.0, 100.0),
            data_points,
            start_price: first.price,
            end_price: last.price,
            timestamp_ms: last.timestamp_ms,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// 成交量排名条目，完全由快照数据派生
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeRankEntry {
    pub symbol: String,
    pub volume: f64,
    pub volume_usd: f64,
}

/// 存储变更事件，由通知中心分发给订阅者
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// 品种有新的观测写入
    Updated(Observation),
    /// 品种的全部历史已被清理，品种被移除
    Removed { symbol: String },
}

impl StoreEvent {
    pub fn symbol(&self) -> &str {
        match self {
            StoreEvent::Updated(obs) => &obs.symbol,
            StoreEvent::Removed { symbol } => symbol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_validation() {
        assert!(Observation::new("BTCUSDT", 100.0, 1.0, 1).validation_error().is_none());
        assert!(Observation::new("BTCUSDT", 0.0, 1.0, 1).validation_error().is_some(), "价格为0应被拒绝");
        assert!(Observation::new("BTCUSDT", -1.0, 1.0, 1).validation_error().is_some());
        assert!(Observation::new("BTCUSDT", f64::NAN, 1.0, 1).validation_error().is_some());
        assert!(Observation::new("BTCUSDT", 1.0, 1.0, 0).validation_error().is_some(), "时间戳为0应被拒绝");
        assert!(Observation::new("BTCUSDT", 1.0, -1.0, 1).validation_error().is_some());
        assert!(Observation::new("", 1.0, 1.0, 1).validation_error().is_some());
    }

    #[test]
    fn test_change_percent_and_direction() {
        assert!((change_percent(100.0, 102.0) - 2.0).abs() < 1e-9);
        assert!((change_percent(100.0, 97.0) + 3.0).abs() < 1e-9);
        assert_eq!(Direction::from_change(0.5), Direction::Up);
        assert_eq!(Direction::from_change(-0.5), Direction::Down);
        assert_eq!(Direction::from_change(0.0), Direction::Flat);
    }

    #[test]
    fn test_signal_kind_serde_name() {
        let json = serde_json::to_string(&SignalKind::CounterGrowth).unwrap();
        assert_eq!(json, "\"counter_growth\"");
        assert_eq!(SignalKind::CounterFall.to_string(), "counter_fall");
    }
}
