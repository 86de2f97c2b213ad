//! 成交量分析器
//!
//! 同一窗口上做三项相互独立的检查，每项最多产生一个信号：
//! 平均成交量高于下限、成交量突增、价量同向（确认）或反向（背离）。

use super::{prepare_window, stateless_min_points, Analyzer};
use crate::common::{change_percent, AnalyzerConfig, Direction, Observation, Result, Signal, SignalKind};

const DEFAULT_MIN_VOLUME: f64 = 1_000_000.0;
const DEFAULT_SPIKE_MULTIPLIER: f64 = 3.0;
const DEFAULT_MIN_PRICE_CHANGE: f64 = 1.0;
const DEFAULT_MIN_VOLUME_CHANGE: f64 = 10.0;

pub const PATTERN_HIGH_VOLUME: &str = "high_volume";
pub const PATTERN_SPIKE: &str = "volume_spike";
pub const PATTERN_CONFIRMATION: &str = "price_volume_confirmation";
pub const PATTERN_DIVERGENCE: &str = "price_volume_divergence";

pub struct VolumeAnalyzer {
    config: AnalyzerConfig,
}

impl VolumeAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    fn signal(&self, window: &[Observation], confidence: f64, pattern: &str) -> Signal {
        let (first, last) = (&window[0], &window[window.len() - 1]);
        let direction = Direction::from_change(change_percent(first.price, last.price));
        Signal::from_window(SignalKind::Volume, direction, first, last, window.len(), confidence)
            .with_meta("pattern", pattern)
            .with_meta("weight", self.config.weight)
    }

    fn check_average(&self, window: &[Observation]) -> Option<Signal> {
        let min_volume = self.config.setting("min_volume", DEFAULT_MIN_VOLUME);
        if min_volume <= 0.0 {
            return None;
        }
        let average = window.iter().map(|o| o.volume_24h).sum::<f64>() / window.len() as f64;
        if average <= min_volume {
            return None;
        }

        let ratio = average / min_volume;
        let confidence = (ratio * 50.0).min(100.0);
        Some(
            self.signal(window, confidence, PATTERN_HIGH_VOLUME)
                .with_meta("average_volume", average)
                .with_meta("volume_ratio", ratio),
        )
    }

    /// 最大成交量超过其余点均值的若干倍
    fn check_spike(&self, window: &[Observation]) -> Option<Signal> {
        let multiplier = self.config.setting("spike_multiplier", DEFAULT_SPIKE_MULTIPLIER);
        let (peak_index, peak) = window
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.volume_24h.total_cmp(&b.1.volume_24h))?;

        let rest: Vec<f64> = window
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != peak_index)
            .map(|(_, o)| o.volume_24h)
            .collect();
        if rest.is_empty() {
            return None;
        }
        let rest_mean = rest.iter().sum::<f64>() / rest.len() as f64;
        if rest_mean <= 0.0 {
            return None;
        }

        let ratio = peak.volume_24h / rest_mean;
        if ratio <= multiplier {
            return None;
        }
        let confidence = (ratio * 20.0).min(100.0);
        Some(
            self.signal(window, confidence, PATTERN_SPIKE)
                .with_meta("spike_ratio", ratio)
                .with_meta("spike_timestamp_ms", peak.timestamp_ms),
        )
    }

    fn check_co_movement(&self, window: &[Observation]) -> Option<Signal> {
        let (first, last) = (&window[0], &window[window.len() - 1]);
        if first.volume_24h <= 0.0 {
            return None;
        }
        let price_change = change_percent(first.price, last.price);
        let volume_change = change_percent(first.volume_24h, last.volume_24h);

        if price_change.abs() < self.config.setting("min_price_change", DEFAULT_MIN_PRICE_CHANGE)
            || volume_change.abs() < self.config.setting("min_volume_change", DEFAULT_MIN_VOLUME_CHANGE)
        {
            return None;
        }

        let (pattern, confidence) = if price_change.signum() == volume_change.signum() {
            (
                PATTERN_CONFIRMATION,
                (price_change.abs() * 10.0 + volume_change.abs() * 0.5).min(100.0),
            )
        } else {
            (
                PATTERN_DIVERGENCE,
                (price_change.abs() * 5.0 + volume_change.abs() * 0.25).min(100.0),
            )
        };
        Some(
            self.signal(window, confidence, pattern)
                .with_meta("volume_change_percent", volume_change),
        )
    }
}

impl Analyzer for VolumeAnalyzer {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn min_data_points(&self) -> usize {
        stateless_min_points(&self.config)
    }

    fn analyze(&self, window: &[Observation], _now_ms: i64) -> Result<Vec<Signal>> {
        let window = prepare_window(self.name(), self.config.enabled, self.min_data_points(), window)?;

        let signals = [
            self.check_average(&window),
            self.check_spike(&window),
            self.check_co_movement(&window),
        ]
        .into_iter()
        .flatten()
        .filter(|s| s.confidence >= self.config.min_confidence)
        .collect();
        Ok(signals)
    }
}
