//! 连续单调走势分析器

use super::{prepare_window, stateless_min_points, Analyzer};
use crate::common::{change_percent, AnalyzerConfig, Direction, Observation, Result, Signal, SignalKind};

const DEFAULT_MIN_CONTINUOUS_POINTS: f64 = 3.0;

/// 一段严格单调的走势，`start..=end` 为窗口下标
#[derive(Debug, Clone, Copy, PartialEq)]
struct Run {
    start: usize,
    end: usize,
    direction: Direction,
}

impl Run {
    fn points(&self) -> usize {
        self.end - self.start + 1
    }
}

/// 找出最长的严格单调段，价格持平会打断走势；长度相同时取较新的一段
fn longest_run(window: &[Observation]) -> Option<Run> {
    let mut best: Option<Run> = None;
    let mut current: Option<Run> = None;

    for i in 1..window.len() {
        let step = window[i].price - window[i - 1].price;
        let direction = if step > 0.0 {
            Direction::Up
        } else if step < 0.0 {
            Direction::Down
        } else {
            Direction::Flat
        };

        current = match (current, direction) {
            (_, Direction::Flat) => None,
            (Some(run), d) if run.direction == d => Some(Run { end: i, ..run }),
            (_, d) => Some(Run {
                start: i - 1,
                end: i,
                direction: d,
            }),
        };

        if let Some(run) = current {
            if best.map_or(true, |b| run.points() >= b.points()) {
                best = Some(run);
            }
        }
    }
    best
}

pub struct ContinuousRunAnalyzer {
    config: AnalyzerConfig,
}

impl ContinuousRunAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    fn min_run_points(&self) -> usize {
        self.config
            .setting("min_continuous_points", DEFAULT_MIN_CONTINUOUS_POINTS)
            .max(2.0) as usize
    }
}

impl Analyzer for ContinuousRunAnalyzer {
    fn name(&self) -> &'static str {
        "continuous"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn min_data_points(&self) -> usize {
        stateless_min_points(&self.config)
    }

    fn analyze(&self, window: &[Observation], _now_ms: i64) -> Result<Vec<Signal>> {
        let window = prepare_window(self.name(), self.config.enabled, self.min_data_points(), window)?;

        let run = match longest_run(&window) {
            Some(run) if run.points() >= self.min_run_points() => run,
            _ => return Ok(Vec::new()),
        };

        let (first, last) = (&window[run.start], &window[run.end]);
        let change = change_percent(first.price, last.price);
        let confidence =
            ((run.points() as f64 * 20.0).min(60.0) + (change.abs() * 2.0).min(40.0)).min(100.0);
        if confidence < self.config.min_confidence {
            return Ok(Vec::new());
        }

        let signal = Signal::from_window(
            SignalKind::Continuous,
            run.direction,
            first,
            last,
            run.points(),
            confidence,
        )
        .with_meta("run_start_ms", first.timestamp_ms)
        .with_meta("window_points", window.len())
        .with_meta("weight", self.config.weight);
        Ok(vec![signal])
    }
}
