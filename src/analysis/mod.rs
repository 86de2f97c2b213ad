// src/analysis/mod.rs
//! 分析器
//!
//! 四个无状态分析器是窗口加配置的纯函数；`CounterAnalyzer` 是唯一带状态的分析器，
//! 按品种维护滚动计数窗口。

pub mod continuous;
pub mod counter;
pub mod fall;
pub mod growth;
pub mod volume;

pub use continuous::ContinuousRunAnalyzer;
pub use counter::{CounterAnalyzer, CounterNotification, CounterStateSnapshot};
pub use fall::FallAnalyzer;
pub use growth::GrowthAnalyzer;
pub use volume::VolumeAnalyzer;

use crate::common::{
    time_ordered, AnalyzerConfig, AnalyzersConfig, AppError, Observation, Result, Signal,
};
use std::sync::Arc;

/// 分析器接口
///
/// `analyze` 接收单个品种的窗口副本，不修改存储。
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_enabled(&self) -> bool;

    /// 运行所需的最少数据点
    fn min_data_points(&self) -> usize;

    /// `now_ms` 只有带状态的分析器使用
    fn analyze(&self, window: &[Observation], now_ms: i64) -> Result<Vec<Signal>>;
}

/// 检查启用状态与数据量，并返回按时间排序的窗口
pub(crate) fn prepare_window(
    name: &str,
    enabled: bool,
    min_data_points: usize,
    window: &[Observation],
) -> Result<Vec<Observation>> {
    if !enabled {
        return Err(AppError::AnalyzerDisabled(name.to_string()));
    }
    if window.len() < min_data_points {
        return Err(AppError::InsufficientData {
            required: min_data_points,
            actual: window.len(),
        });
    }
    Ok(time_ordered(window))
}

/// 无状态分析器至少需要首尾两个点
pub(crate) fn stateless_min_points(config: &AnalyzerConfig) -> usize {
    config.min_data_points.max(2)
}

/// 按配置构建四个无状态分析器
pub fn build_stateless_analyzers(config: &AnalyzersConfig) -> Vec<Arc<dyn Analyzer>> {
    vec![
        Arc::new(GrowthAnalyzer::new(config.growth.clone())),
        Arc::new(FallAnalyzer::new(config.fall.clone())),
        Arc::new(ContinuousRunAnalyzer::new(config.continuous.clone())),
        Arc::new(VolumeAnalyzer::new(config.volume.clone())),
    ]
}

/// 相邻价格的逐步收益率（百分比）
pub(crate) fn step_returns(window: &[Observation]) -> Vec<f64> {
    window
        .windows(2)
        .filter(|pair| pair[0].price > 0.0)
        .map(|pair| (pair[1].price - pair[0].price) / pair[0].price * 100.0)
        .collect()
}

/// 总体标准差，样本不足两个时为0
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::common::Observation;

    /// 按价格序列构造窗口，时间戳间隔一分钟
    pub fn window(symbol: &str, prices: &[f64]) -> Vec<Observation> {
        prices
            .iter()
            .enumerate()
            .map(|(i, price)| Observation::new(symbol, *price, 1_000.0, 60_000 * (i as i64 + 1)))
            .collect()
    }

    /// 按价格与成交量序列构造窗口
    pub fn window_with_volume(symbol: &str, points: &[(f64, f64)]) -> Vec<Observation> {
        points
            .iter()
            .enumerate()
            .map(|(i, (price, volume))| Observation::new(symbol, *price, *volume, 60_000 * (i as i64 + 1)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::window;

    #[test]
    fn test_prepare_window_orders_and_checks() {
        let mut w = window("BTCUSDT", &[1.0, 2.0, 3.0]);
        w.swap(0, 2);
        let ordered = prepare_window("test", true, 3, &w).unwrap();
        assert_eq!(ordered[0].price, 1.0, "窗口应按时间排序");

        assert!(matches!(
            prepare_window("test", true, 5, &w),
            Err(AppError::InsufficientData { required: 5, actual: 3 })
        ));
        assert!(matches!(
            prepare_window("test", false, 1, &w),
            Err(AppError::AnalyzerDisabled(_))
        ));
    }

    #[test]
    fn test_std_dev() {
        assert_eq!(std_dev(&[1.0]), 0.0);
        assert!((std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.0).abs() < 1e-9);
    }
}
