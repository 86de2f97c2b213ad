//! 上涨分析器

use super::{prepare_window, stateless_min_points, Analyzer};
use crate::common::{change_percent, AnalyzerConfig, Direction, Observation, Result, Signal, SignalKind};

const DEFAULT_MIN_GROWTH: f64 = 0.5;
const DEFAULT_CONTINUITY_THRESHOLD: f64 = 0.5;
const DEFAULT_SATURATION: f64 = 10.0;

/// 窗口涨幅达到阈值时发出上涨信号
pub struct GrowthAnalyzer {
    config: AnalyzerConfig,
}

impl GrowthAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// 置信度 = 幅度项(≤40) + 连续性项(≤30) + 数据量项(≤30)
    fn confidence(&self, change: f64, continuity: f64, data_points: usize) -> f64 {
        let continuity_threshold = self
            .config
            .setting("continuity_threshold", DEFAULT_CONTINUITY_THRESHOLD);
        let saturation = self
            .config
            .setting("data_points_saturation", DEFAULT_SATURATION)
            .max(1.0);

        let magnitude = (change * 10.0).min(40.0);
        let continuity_score = if continuity > continuity_threshold {
            continuity * 30.0
        } else {
            0.0
        };
        let size_score = (data_points as f64 / saturation).min(1.0) * 30.0;

        (magnitude + continuity_score + size_score).min(100.0)
    }
}

/// 相邻点中价格不下降的比例
fn rising_continuity(window: &[Observation]) -> f64 {
    let pairs = window.len().saturating_sub(1);
    if pairs == 0 {
        return 0.0;
    }
    let rising = window.windows(2).filter(|p| p[1].price >= p[0].price).count();
    rising as f64 / pairs as f64
}

impl Analyzer for GrowthAnalyzer {
    fn name(&self) -> &'static str {
        "growth"
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
        let min_growth = self.config.setting("min_growth", DEFAULT_MIN_GROWTH);
        if change < min_growth {
            return Ok(Vec::new());
        }

        let continuity = rising_continuity(&window);
        let confidence = self.confidence(change, continuity, window.len());
        if confidence < self.config.min_confidence {
            return Ok(Vec::new());
        }

        let signal = Signal::from_window(SignalKind::Growth, Direction::Up, first, last, window.len(), confidence)
            .with_meta("continuity", continuity)
            .with_meta("weight", self.config.weight);
        Ok(vec![signal])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::window;
    use crate::common::AppError;

    fn analyzer() -> GrowthAnalyzer {
        GrowthAnalyzer::new(
            AnalyzerConfig::default()
                .with_setting("min_growth", 0.5)
                .with_setting("continuity_threshold", 0.5),
        )
    }

    #[test]
    fn test_three_point_growth() {
        let signals = analyzer().analyze(&window("BTCUSDT", &[100.0, 101.0, 102.0]), 0).unwrap();
        assert_eq!(signals.len(), 1, "应恰好发出一个信号");

        let s = &signals[0];
        assert!((s.change_percent - 2.0).abs() < 1e-9);
        assert_eq!(s.direction, Direction::Up);
        assert_eq!(s.kind, SignalKind::Growth);
        // 20 + 30 + 9
        assert!((s.confidence - 59.0).abs() < 1e-9);
        assert_eq!(s.timestamp_ms, 180_000);
    }

    #[test]
    fn test_below_threshold_emits_nothing() {
        let signals = analyzer().analyze(&window("BTCUSDT", &[100.0, 100.1, 100.2]), 0).unwrap();
        assert!(signals.is_empty());

        let signals = analyzer().analyze(&window("BTCUSDT", &[100.0, 99.0, 98.0]), 0).unwrap();
        assert!(signals.is_empty(), "下跌窗口不应产生上涨信号");
    }

    #[test]
    fn test_never_emits_below_min_growth() {
        let a = analyzer();
        for prices in [
            vec![100.0, 100.2, 100.49],
            vec![100.0, 110.0, 100.4],
            vec![100.0, 95.0, 100.5, 101.0],
        ] {
            for s in a.analyze(&window("ETHUSDT", &prices), 0).unwrap() {
                assert!(s.change_percent >= 0.5, "信号涨幅不应低于阈值: {:?}", prices);
            }
        }
    }

    #[test]
    fn test_min_confidence_gate() {
        let strict = GrowthAnalyzer::new(AnalyzerConfig {
            min_confidence: 90.0,
            ..AnalyzerConfig::default()
        });
        assert!(strict.analyze(&window("BTCUSDT", &[100.0, 101.0, 102.0]), 0).unwrap().is_empty());
    }

    #[test]
    fn test_insufficient_data_and_disabled() {
        let err = analyzer().analyze(&window("BTCUSDT", &[100.0, 101.0]), 0).unwrap_err();
        assert!(matches!(err, AppError::InsufficientData { required: 3, actual: 2 }));

        let disabled = GrowthAnalyzer::new(AnalyzerConfig {
            enabled: false,
            ..AnalyzerConfig::default()
        });
        assert!(matches!(
            disabled.analyze(&window("BTCUSDT", &[1.0, 2.0, 3.0]), 0),
            Err(AppError::AnalyzerDisabled(_))
        ));
    }

    #[test]
    fn test_pure_function() {
        let w = window("BTCUSDT", &[100.0, 100.5, 101.0, 103.0]);
        let a = analyzer();
        assert_eq!(a.analyze(&w, 1).unwrap(), a.analyze(&w, 999).unwrap(), "无状态分析器结果应相同");
    }
}
