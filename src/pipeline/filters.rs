//! 信号过滤链：置信度下限 → 成交额下限 → 品种限频
//!
//! 过滤器按顺序执行，第一个拒绝的过滤器记一次拒绝，信号不再往后传。

use crate::common::{FilterConfig, Signal};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::trace;

/// 过滤时可用的上下文
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterContext {
    /// 品种最新快照的24小时成交额，品种已被移除时为 None
    pub volume_usd: Option<f64>,
    pub now_ms: i64,
}

pub trait SignalFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn accept(&self, signal: &Signal, ctx: &FilterContext) -> bool;
}

pub struct ConfidenceFilter {
    min_confidence: f64,
}

impl ConfidenceFilter {
    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }
}

impl SignalFilter for ConfidenceFilter {
    fn name(&self) -> &'static str {
        "confidence"
    }

    fn accept(&self, signal: &Signal, _ctx: &FilterContext) -> bool {
        signal.confidence >= self.min_confidence
    }
}

pub struct VolumeFilter {
    min_volume_usd: f64,
}

impl VolumeFilter {
    pub fn new(min_volume_usd: f64) -> Self {
        Self { min_volume_usd }
    }
}

impl SignalFilter for VolumeFilter {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn accept(&self, _signal: &Signal, ctx: &FilterContext) -> bool {
        if self.min_volume_usd <= 0.0 {
            return true;
        }
        ctx.volume_usd.map_or(false, |v| v >= self.min_volume_usd)
    }
}

/// 同一品种在间隔内只放行一个信号
pub struct RateLimitFilter {
    interval_ms: i64,
    last_passed: Mutex<HashMap<String, i64>>,
}

impl RateLimitFilter {
    pub fn new(interval_ms: i64) -> Self {
        Self {
            interval_ms,
            last_passed: Mutex::new(HashMap::new()),
        }
    }
}

impl SignalFilter for RateLimitFilter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn accept(&self, signal: &Signal, ctx: &FilterContext) -> bool {
        let mut last_passed = self.last_passed.lock().unwrap_or_else(|e| e.into_inner());
        match last_passed.get(&signal.symbol) {
            Some(last) if ctx.now_ms - last < self.interval_ms => false,
            _ => {
                last_passed.insert(signal.symbol.clone(), ctx.now_ms);
                true
            }
        }
    }
}

struct FilterSlot {
    filter: Box<dyn SignalFilter>,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterStats {
    pub passed: u64,
    pub rejected: BTreeMap<String, u64>,
}

pub struct FilterChain {
    slots: Vec<FilterSlot>,
    passed: AtomicU64,
}

impl FilterChain {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            passed: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new()
            .with_filter(Box::new(ConfidenceFilter::new(config.min_confidence)))
            .with_filter(Box::new(VolumeFilter::new(config.min_volume_usd)))
            .with_filter(Box::new(RateLimitFilter::new(config.rate_limit_secs as i64 * 1000)))
    }

    pub fn with_filter(mut self, filter: Box<dyn SignalFilter>) -> Self {
        self.slots.push(FilterSlot {
            filter,
            rejected: AtomicU64::new(0),
        });
        self
    }

    /// 信号是否通过全部过滤器
    pub fn apply(&self, signal: &Signal, ctx: &FilterContext) -> bool {
        for slot in &self.slots {
            if !slot.filter.accept(signal, ctx) {
                slot.rejected.fetch_add(1, Ordering::Relaxed);
                trace!(target: "分析流水线", symbol = %signal.symbol, kind = %signal.kind, filter = slot.filter.name(), "信号被过滤");
                return false;
            }
        }
        self.passed.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn stats(&self) -> FilterStats {
        FilterStats {
            passed: self.passed.load(Ordering::Relaxed),
            rejected: self
                .slots
                .iter()
                .map(|slot| (slot.filter.name().to_string(), slot.rejected.load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Direction, Observation, SignalKind};

    fn signal(symbol: &str, confidence: f64) -> Signal {
        let first = Observation::new(symbol, 100.0, 1.0, 1);
        let last = Observation::new(symbol, 102.0, 1.0, 2);
        Signal::from_window(SignalKind::Growth, Direction::Up, &first, &last, 2, confidence)
    }

    fn ctx(volume_usd: f64, now_ms: i64) -> FilterContext {
        FilterContext {
            volume_usd: Some(volume_usd),
            now_ms,
        }
    }

    #[test]
    fn test_chain_order_and_stats() {
        let chain = FilterChain::from_config(&FilterConfig {
            min_confidence: 50.0,
            min_volume_usd: 1_000.0,
            rate_limit_secs: 60,
        });

        assert!(!chain.apply(&signal("BTCUSDT", 40.0), &ctx(5_000.0, 0)), "置信度不足");
        assert!(!chain.apply(&signal("BTCUSDT", 80.0), &ctx(500.0, 0)), "成交额不足");
        assert!(chain.apply(&signal("BTCUSDT", 80.0), &ctx(5_000.0, 0)));
        assert!(!chain.apply(&signal("BTCUSDT", 90.0), &ctx(5_000.0, 30_000)), "限频期内");
        assert!(chain.apply(&signal("ETHUSDT", 90.0), &ctx(5_000.0, 30_000)), "限频按品种独立");
        assert!(chain.apply(&signal("BTCUSDT", 90.0), &ctx(5_000.0, 60_000)));

        let stats = chain.stats();
        assert_eq!(stats.passed, 3);
        assert_eq!(stats.rejected["confidence"], 1);
        assert_eq!(stats.rejected["volume"], 1);
        assert_eq!(stats.rejected["rate_limit"], 1);
    }

    #[test]
    fn test_volume_filter_requires_snapshot() {
        let filter = VolumeFilter::new(100.0);
        let removed = FilterContext {
            volume_usd: None,
            now_ms: 0,
        };
        assert!(!filter.accept(&signal("BTCUSDT", 80.0), &removed));
        assert!(VolumeFilter::new(0.0).accept(&signal("BTCUSDT", 80.0), &removed));
    }
}
