//! 下跌分析器
//!
//! 与上涨分析器同构，置信度在幅度上取绝对值，另外按逐步收益率的波动率加减分。
//! 信号的 `change_percent` 保持负数。

use super::{prepare_window, stateless_min_points, std_dev, step_returns, Analyzer};
use crate::common::{change_percent, AnalyzerConfig, Direction, Observation, Result, Signal, SignalKind};

const DEFAULT_MIN_FALL: f64 = 0.5;
const DEFAULT_CONTINUITY_THRESHOLD: f64 = 0.5;
const DEFAULT_SATURATION: f64 = 10.0;
const DEFAULT_LOW_VOLATILITY: f64 = 1.0;
const DEFAULT_HIGH_VOLATILITY: f64 = 5.0;
const VOLATILITY_ADJUSTMENT: f64 = 10.0;

pub struct FallAnalyzer {
    config: AnalyzerConfig,
}

impl FallAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    fn confidence(&self, abs_change: f64, continuity: f64, data_points: usize, volatility: f64) -> f64 {
        let continuity_threshold = self
            .config
            .setting("continuity_threshold", DEFAULT_CONTINUITY_THRESHOLD);
        let saturation = self
            .config
            .setting("data_points_saturation", DEFAULT_SATURATION)
            .max(1.0);

        let magnitude = (abs_change * 10.0).min(40.0);
        let continuity_score = if continuity > continuity_threshold {
            continuity * 30.0
        } else {
            0.0
        };
        let size_score = (data_points as f64 / saturation).min(1.0) * 30.0;

        // 平稳下跌加分，剧烈震荡减分
        let volatility_adjustment =
            if volatility < self.config.setting("low_volatility", DEFAULT_LOW_VOLATILITY) {
                VOLATILITY_ADJUSTMENT
            } else if volatility > self.config.setting("high_volatility", DEFAULT_HIGH_VOLATILITY) {
                -VOLATILITY_ADJUSTMENT
            } else {
                0.0
            };

        (magnitude + continuity_score + size_score + volatility_adjustment).clamp(0.0, 100.0)
    }
}

/// 相邻点中价格不上升的比例
fn falling_continuity(window: &[Observation]) -> f64 {
    let pairs = window.len().saturating_sub(1);
    if pairs == 0 {
        return 0.0;
    }
    let falling = window.windows(2).filter(|p| p[1].price <= p[0].price).count();
    falling as f64 / pairs as f64
}

impl Analyzer for FallAnalyzer {
    fn name(&self) -> &'static str {
        "fall"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn min_data_points(&self) -> usize {
        stateless_min_points(&self.config)
    }

    fn analyze(&self, window: &[Observation], _now_ms: i64) -> Result<Vec<Signal>> {
        let window = prepare_window(self.name(), self.config.enabled, self.min_data_points(), window)?;
        let (first, last) = (&window[0], &window[window.len() - 1]);

        let change = change_percent(first.price, last.price);
        let min_fall = self.config.setting("min_fall", DEFAULT_MIN_FALL);
        if change > -min_fall {
            return Ok(Vec::new());
        }

        let continuity = falling_continuity(&window);
        let volatility = std_dev(&step_returns(&window));
        let confidence = self.confidence(change.abs(), continuity, window.len(), volatility);
        if confidence < self.config.min_confidence {
            return Ok(Vec::new());
        }

        let signal = Signal::from_window(SignalKind::Fall, Direction::Down, first, last, window.len(), confidence)
            .with_meta("continuity", continuity)
            .with_meta("volatility", volatility)
            .with_meta("weight", self.config.weight);
        Ok(vec![signal])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::window;

    #[test]
    fn test_steady_fall_gets_low_volatility_bonus() {
        let a = FallAnalyzer::new(AnalyzerConfig::default());
        let signals = a.analyze(&window("BTCUSDT", &[100.0, 99.0, 98.0]), 0).unwrap();
        assert_eq!(signals.len(), 1);

        let s = &signals[0];
        assert!((s.change_percent + 2.0).abs() < 1e-9, "下跌信号的涨跌幅应为负数");
        assert_eq!(s.direction, Direction::Down);
        // 20 + 30 + 9 + 10
        assert!((s.confidence - 69.0).abs() < 1e-6);
    }

    #[test]
    fn test_choppy_fall_gets_penalty() {
        let a = FallAnalyzer::new(AnalyzerConfig::default());
        let steady = a.analyze(&window("ETHUSDT", &[100.0, 98.0, 96.0, 94.0]), 0).unwrap();
        let choppy = a.analyze(&window("ETHUSDT", &[100.0, 80.0, 100.0, 94.0]), 0).unwrap();
        assert_eq!(steady.len(), 1);
        assert_eq!(choppy.len(), 1);
        assert!(choppy[0].confidence < steady[0].confidence, "高波动应降低置信度");
    }

    #[test]
    fn test_never_emits_above_negative_threshold() {
        let a = FallAnalyzer::new(AnalyzerConfig::default().with_setting("min_fall", 1.0));
        for prices in [
            vec![100.0, 99.5, 99.1],
            vec![100.0, 101.0, 102.0],
            vec![100.0, 90.0, 99.5],
        ] {
            for s in a.analyze(&window("SOLUSDT", &prices), 0).unwrap() {
                assert!(s.change_percent <= -1.0, "信号跌幅不应小于阈值: {:?}", prices);
            }
        }
        assert!(a.analyze(&window("SOLUSDT", &[100.0, 99.5, 99.1]), 0).unwrap().is_empty());
    }
}
