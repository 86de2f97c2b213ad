//! 周期计数分析器
//!
//! 每个品种维护一个滚动窗口，统计窗口内上涨与下跌越过阈值的次数。
//! 每次调用在计数前先检查是否需要重置：窗口到期、计数达到上限、或配置的窗口已变更。
//!
//! 同一品种的状态由各自的互斥锁串行化，不同品种互不阻塞。

use super::Analyzer;
use crate::common::{
    change_percent, time_ordered, AppError, CounterConfig, CounterWindow, Direction, Observation,
    Result, Signal, SignalKind,
};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

const MIN_SIGNALS_PER_WINDOW: u64 = 5;
const MAX_SIGNALS_PER_WINDOW: u64 = 15;

/// 窗口内的计数上限：窗口分钟数 / 基础周期，限制在 [5, 15]
pub fn max_signals_for_window(window: CounterWindow, base_period_minutes: u64) -> u64 {
    (window.minutes() / base_period_minutes.max(1)).clamp(MIN_SIGNALS_PER_WINDOW, MAX_SIGNALS_PER_WINDOW)
}

/// 计数越过阈值时交给外部投递的通知
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterNotification {
    pub symbol: String,
    pub signal_type: SignalKind,
    pub current_count: u64,
    pub total_count: u64,
    pub window: CounterWindow,
    pub percentage: f64,
    pub change_percent: f64,
    pub timestamp_ms: i64,
}

/// 通知投递边界，实现方不得阻塞调用方
pub trait CounterNotifier: Send + Sync {
    fn notify(&self, notification: CounterNotification);
}

#[derive(Debug, Clone)]
struct CounterState {
    selected_window: CounterWindow,
    base_period_minutes: u64,
    window_start_ms: i64,
    window_end_ms: i64,
    signal_tally: u64,
    growth_tally: u64,
    fall_tally: u64,
    last_signal_ms: Option<i64>,
    resets: u64,
}

impl CounterState {
    fn new(now_ms: i64, settings: &CounterConfig) -> Self {
        Self {
            selected_window: settings.selected_window,
            base_period_minutes: settings.base_period_minutes,
            window_start_ms: now_ms,
            window_end_ms: now_ms + settings.selected_window.duration_ms(),
            signal_tally: 0,
            growth_tally: 0,
            fall_tally: 0,
            last_signal_ms: None,
            resets: 0,
        }
    }

    fn max_signals(&self) -> u64 {
        max_signals_for_window(self.selected_window, self.base_period_minutes)
    }

    fn needs_reset(&self, now_ms: i64, settings: &CounterConfig) -> bool {
        now_ms >= self.window_end_ms
            || self.signal_tally >= self.max_signals()
            || self.selected_window != settings.selected_window
            || self.base_period_minutes != settings.base_period_minutes
    }

    fn reset(&mut self, now_ms: i64, settings: &CounterConfig) {
        let resets = self.resets + 1;
        *self = Self::new(now_ms, settings);
        self.resets = resets;
    }
}

/// 计数状态的只读副本
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterStateSnapshot {
    pub symbol: String,
    pub selected_window: CounterWindow,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub signal_tally: u64,
    pub growth_tally: u64,
    pub fall_tally: u64,
    pub max_signals: u64,
    pub last_signal_ms: Option<i64>,
    pub resets: u64,
}

pub struct CounterAnalyzer {
    settings: RwLock<CounterConfig>,
    states: DashMap<String, Arc<Mutex<CounterState>>>,
    notifier: Option<Arc<dyn CounterNotifier>>,
}

impl CounterAnalyzer {
    pub fn new(settings: CounterConfig) -> Self {
        Self {
            settings: RwLock::new(settings),
            states: DashMap::new(),
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn CounterNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn settings(&self) -> CounterConfig {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 切换统计窗口，各品种在下一次调用时重置
    pub fn set_window(&self, window: CounterWindow) {
        let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
        if settings.selected_window != window {
            info!(target: "计数分析器", log_type = "module", event_name = "CounterWindowChanged", from = %settings.selected_window, to = %window, "计数窗口已切换");
            settings.selected_window = window;
        }
    }

    pub fn max_signals(&self) -> u64 {
        let settings = self.settings();
        max_signals_for_window(settings.selected_window, settings.base_period_minutes)
    }

    pub fn state_snapshot(&self, symbol: &str) -> Option<CounterStateSnapshot> {
        let state = self.states.get(symbol)?.value().clone();
        let state = state.lock().unwrap_or_else(|e| e.into_inner());
        Some(CounterStateSnapshot {
            symbol: symbol.to_string(),
            selected_window: state.selected_window,
            window_start_ms: state.window_start_ms,
            window_end_ms: state.window_end_ms,
            signal_tally: state.signal_tally,
            growth_tally: state.growth_tally,
            fall_tally: state.fall_tally,
            max_signals: state.max_signals(),
            last_signal_ms: state.last_signal_ms,
            resets: state.resets,
        })
    }

    pub fn tracked_symbols(&self) -> usize {
        self.states.len()
    }

    fn state_for(&self, symbol: &str, now_ms: i64, settings: &CounterConfig) -> Arc<Mutex<CounterState>> {
        self.states
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CounterState::new(now_ms, settings))))
            .value()
            .clone()
    }
}

impl Analyzer for CounterAnalyzer {
    fn name(&self) -> &'static str {
        "counter"
    }

    fn is_enabled(&self) -> bool {
        self.settings().enabled
    }

    fn min_data_points(&self) -> usize {
        self.settings().min_data_points.max(2)
    }

    fn analyze(&self, window: &[Observation], now_ms: i64) -> Result<Vec<Signal>> {
        let settings = self.settings();
        if !settings.enabled {
            return Err(AppError::AnalyzerDisabled(self.name().to_string()));
        }
        let required = settings.min_data_points.max(2);
        if window.len() < required {
            return Err(AppError::InsufficientData {
                required,
                actual: window.len(),
            });
        }

        let window = time_ordered(window);
        let (first, last) = (&window[0], &window[window.len() - 1]);
        let symbol = last.symbol.as_str();
        let change = change_percent(first.price, last.price);

        let state = self.state_for(symbol, now_ms, &settings);
        let (signal, notification) = {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());

            if state.needs_reset(now_ms, &settings) {
                debug!(target: "计数分析器", symbol, tally = state.signal_tally, window_end_ms = state.window_end_ms, "计数窗口重置");
                state.reset(now_ms, &settings);
            }

            let (kind, direction, count) = if settings.track_growth && change > settings.growth_threshold {
                state.growth_tally += 1;
                (SignalKind::CounterGrowth, Direction::Up, state.growth_tally)
            } else if settings.track_fall && change < -settings.fall_threshold {
                state.fall_tally += 1;
                (SignalKind::CounterFall, Direction::Down, state.fall_tally)
            } else {
                return Ok(Vec::new());
            };
            state.signal_tally += 1;
            state.last_signal_ms = Some(now_ms);

            let max_signals = state.max_signals();
            let percentage = state.signal_tally as f64 / max_signals as f64 * 100.0;

            let mut signal = Signal::from_window(kind, direction, first, last, window.len(), percentage)
                .with_meta("current_count", state.signal_tally)
                .with_meta("total_count", max_signals)
                .with_meta("direction_count", count)
                .with_meta("window", state.selected_window.as_str());
            signal.timestamp_ms = now_ms;

            let notification = settings.notify_on_signal.then(|| CounterNotification {
                symbol: symbol.to_string(),
                signal_type: kind,
                current_count: state.signal_tally,
                total_count: max_signals,
                window: state.selected_window,
                percentage,
                change_percent: change,
                timestamp_ms: now_ms,
            });
            (signal, notification)
        };

        if let (Some(notifier), Some(notification)) = (&self.notifier, notification) {
            notifier.notify(notification);
        }
        Ok(vec![signal])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::window;

    const MINUTE: i64 = 60_000;

    fn rising() -> Vec<Observation> {
        window("BTCUSDT", &[100.0, 101.0])
    }

    fn falling() -> Vec<Observation> {
        window("BTCUSDT", &[100.0, 99.0])
    }

    #[derive(Default)]
    struct CollectingNotifier {
        received: Mutex<Vec<CounterNotification>>,
    }

    impl CounterNotifier for CollectingNotifier {
        fn notify(&self, notification: CounterNotification) {
            self.received.lock().unwrap().push(notification);
        }
    }

    #[test]
    fn test_max_signals_is_clamped() {
        assert_eq!(max_signals_for_window(CounterWindow::M15, 1), 15);
        assert_eq!(max_signals_for_window(CounterWindow::M5, 1), 5);
        assert_eq!(max_signals_for_window(CounterWindow::M5, 5), 5, "下限为5");
        assert_eq!(max_signals_for_window(CounterWindow::D1, 1), 15, "上限为15");
        for window in CounterWindow::ALL {
            for base in [1, 2, 3, 7, 15, 60, 240, 10_000] {
                let max = max_signals_for_window(window, base);
                assert!((5..=15).contains(&max), "{} / {} = {}", window, base, max);
            }
        }
    }

    #[test]
    fn test_sixteenth_call_resets() {
        let counter = CounterAnalyzer::new(CounterConfig::default());
        assert_eq!(counter.max_signals(), 15);

        let t0 = 1_000_000;
        for i in 0..15 {
            let signals = counter.analyze(&rising(), t0 + i).unwrap();
            assert_eq!(signals.len(), 1);
            assert_eq!(signals[0].kind, SignalKind::CounterGrowth);
        }
        let state = counter.state_snapshot("BTCUSDT").unwrap();
        assert_eq!(state.signal_tally, 15);
        assert_eq!(state.resets, 0);

        let signals = counter.analyze(&rising(), t0 + 15).unwrap();
        let state = counter.state_snapshot("BTCUSDT").unwrap();
        assert_eq!(state.signal_tally, 1, "第16次调用应先重置再计数");
        assert_eq!(state.resets, 1);
        assert_eq!(state.window_start_ms, t0 + 15);
        assert!((signals[0].confidence - 100.0 / 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_tally_never_exceeds_max() {
        let counter = CounterAnalyzer::new(CounterConfig {
            selected_window: CounterWindow::M5,
            ..CounterConfig::default()
        });
        for i in 0..40 {
            let w = if i % 3 == 0 { falling() } else { rising() };
            counter.analyze(&w, 1_000 + i).unwrap();
            let state = counter.state_snapshot("BTCUSDT").unwrap();
            assert!(state.signal_tally <= state.max_signals);
            assert_eq!(state.signal_tally, state.growth_tally + state.fall_tally);
        }
    }

    #[test]
    fn test_window_expiry_resets() {
        let counter = CounterAnalyzer::new(CounterConfig::default());
        let t0 = 0;
        counter.analyze(&rising(), t0).unwrap();
        counter.analyze(&falling(), t0 + MINUTE).unwrap();

        let state = counter.state_snapshot("BTCUSDT").unwrap();
        assert_eq!((state.growth_tally, state.fall_tally), (1, 1));
        assert_eq!(state.window_end_ms, t0 + 15 * MINUTE);

        counter.analyze(&falling(), t0 + 15 * MINUTE).unwrap();
        let state = counter.state_snapshot("BTCUSDT").unwrap();
        assert_eq!((state.growth_tally, state.fall_tally), (0, 1), "窗口到期后应重置");
        assert_eq!(state.window_end_ms, t0 + 30 * MINUTE);
    }

    #[test]
    fn test_window_change_resets() {
        let counter = CounterAnalyzer::new(CounterConfig::default());
        counter.analyze(&rising(), 0).unwrap();
        counter.analyze(&rising(), 1).unwrap();

        counter.set_window(CounterWindow::H1);
        let signals = counter.analyze(&rising(), 2).unwrap();
        let state = counter.state_snapshot("BTCUSDT").unwrap();
        assert_eq!(state.selected_window, CounterWindow::H1);
        assert_eq!(state.signal_tally, 1);
        assert_eq!(state.window_end_ms, 2 + 60 * MINUTE);
        assert_eq!(signals[0].metadata["window"], "1h");
    }

    #[test]
    fn test_quiet_window_does_not_count() {
        let counter = CounterAnalyzer::new(CounterConfig::default());
        let signals = counter.analyze(&window("BTCUSDT", &[100.0, 100.1]), 0).unwrap();
        assert!(signals.is_empty());
        assert_eq!(counter.state_snapshot("BTCUSDT").unwrap().signal_tally, 0);
    }

    #[test]
    fn test_tracking_switches() {
        let counter = CounterAnalyzer::new(CounterConfig {
            track_fall: false,
            ..CounterConfig::default()
        });
        assert!(counter.analyze(&falling(), 0).unwrap().is_empty());
        assert_eq!(counter.analyze(&rising(), 1).unwrap().len(), 1);
    }

    #[test]
    fn test_notification_handoff() {
        let notifier = Arc::new(CollectingNotifier::default());
        let counter = CounterAnalyzer::new(CounterConfig::default()).with_notifier(notifier.clone());

        counter.analyze(&falling(), 10).unwrap();
        let received = notifier.received.lock().unwrap();
        assert_eq!(received.len(), 1);

        let n = &received[0];
        assert_eq!(n.symbol, "BTCUSDT");
        assert_eq!(n.signal_type, SignalKind::CounterFall);
        assert_eq!((n.current_count, n.total_count), (1, 15));
        assert_eq!(n.window, CounterWindow::M15);
        assert!((n.change_percent + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_symbols_are_independent() {
        let counter = Arc::new(CounterAnalyzer::new(CounterConfig::default()));
        let handles: Vec<_> = ["BTCUSDT", "ETHUSDT", "SOLUSDT"]
            .into_iter()
            .map(|symbol| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    let w = window(symbol, &[100.0, 102.0]);
                    for i in 0..10 {
                        counter.analyze(&w, i).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.tracked_symbols(), 3);
        for symbol in ["BTCUSDT", "ETHUSDT", "SOLUSDT"] {
            assert_eq!(counter.state_snapshot(symbol).unwrap().growth_tally, 10);
        }
    }

    #[test]
    fn test_same_symbol_calls_are_serialized() {
        let counter = Arc::new(CounterAnalyzer::new(CounterConfig::default()));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    let mut emitted = 0u64;
                    for i in 0..100 {
                        let w = if (t + i) % 2 == 0 { rising() } else { falling() };
                        let signals = counter.analyze(&w, 0).unwrap();
                        emitted += signals.len() as u64;
                        for signal in &signals {
                            let current = signal.metadata["current_count"].as_u64().unwrap();
                            assert!((1..=15).contains(&current), "计数越界: {}", current);
                        }

                        let snapshot = counter.state_snapshot("BTCUSDT").unwrap();
                        assert!(snapshot.signal_tally <= snapshot.max_signals);
                        assert_eq!(snapshot.signal_tally, snapshot.growth_tally + snapshot.fall_tally);
                    }
                    emitted
                })
            })
            .collect();
        let emitted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

        // 800 次调用各计一次：每满 15 次重置一次，没有丢失或重复的计数
        assert_eq!(emitted, 800);
        let snapshot = counter.state_snapshot("BTCUSDT").unwrap();
        assert_eq!(snapshot.resets, 800 / 15);
        assert_eq!(snapshot.signal_tally, 800 % 15);
    }

    #[test]
    fn test_disabled_and_insufficient() {
        let counter = CounterAnalyzer::new(CounterConfig::default());
        assert!(matches!(
            counter.analyze(&window("BTCUSDT", &[100.0]), 0),
            Err(AppError::InsufficientData { required: 2, actual: 1 })
        ));

        let disabled = CounterAnalyzer::new(CounterConfig {
            enabled: false,
            ..CounterConfig::default()
        });
        assert!(matches!(disabled.analyze(&rising(), 0), Err(AppError::AnalyzerDisabled(_))));
    }
}
