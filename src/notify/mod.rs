// src/notify/mod.rs
//! 信号投递边界
//!
//! 流水线与计数分析器只负责把消息交出去；投递在独立的工作任务中进行，
//! 队列满时丢弃，投递失败只记录日志，不重试。

pub mod dispatcher;
pub mod sinks;

pub use dispatcher::{DispatcherStats, SignalDispatcher};
pub use sinks::{LogSink, WebhookSink};

use crate::analysis::CounterNotification;
use crate::common::{Direction, Result, Signal, SignalKind};
use futures::future::BoxFuture;
use serde::Serialize;

/// 交给外部投递的消息
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OutboundMessage {
    Signal(Signal),
    Counter(CounterNotification),
}

impl OutboundMessage {
    pub fn symbol(&self) -> &str {
        match self {
            OutboundMessage::Signal(signal) => &signal.symbol,
            OutboundMessage::Counter(notification) => &notification.symbol,
        }
    }

    /// 聊天机器人风格的单行文本
    pub fn render_text(&self) -> String {
        match self {
            OutboundMessage::Signal(signal) => format!(
                "[{}] {} {} {:+.2}% 置信度 {:.1} ({}个数据点, {} → {})",
                kind_label(signal.kind),
                signal.symbol,
                direction_label(signal.direction),
                signal.change_percent,
                signal.confidence,
                signal.data_points,
                signal.start_price,
                signal.end_price,
            ),
            OutboundMessage::Counter(n) => format!(
                "[{}] {} {}窗口内第 {}/{} 次 ({:.1}%) 涨跌幅 {:+.2}%",
                kind_label(n.signal_type),
                n.symbol,
                n.window,
                n.current_count,
                n.total_count,
                n.percentage,
                n.change_percent,
            ),
        }
    }
}

fn kind_label(kind: SignalKind) -> &'static str {
    match kind {
        SignalKind::Growth => "上涨",
        SignalKind::Fall => "下跌",
        SignalKind::Continuous => "连续走势",
        SignalKind::Volume => "成交量",
        SignalKind::CounterGrowth => "计数上涨",
        SignalKind::CounterFall => "计数下跌",
    }
}

fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::Up => "↑",
        Direction::Down => "↓",
        Direction::Flat => "→",
    }
}

/// 消息的最终去处
pub trait SignalSink: Send + Sync {
    fn name(&self) -> &str;

    fn deliver<'a>(&'a self, message: &'a OutboundMessage) -> BoxFuture<'a, Result<()>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{CounterWindow, Observation};

    #[test]
    fn test_render_text() {
        let first = Observation::new("BTCUSDT", 100.0, 1.0, 1);
        let last = Observation::new("BTCUSDT", 98.0, 1.0, 2);
        let signal = Signal::from_window(SignalKind::Fall, Direction::Down, &first, &last, 3, 69.0);
        assert_eq!(
            OutboundMessage::Signal(signal).render_text(),
            "[下跌] BTCUSDT ↓ -2.00% 置信度 69.0 (3个数据点, 100 → 98)"
        );

        let counter = OutboundMessage::Counter(CounterNotification {
            symbol: "ETHUSDT".to_string(),
            signal_type: SignalKind::CounterGrowth,
            current_count: 3,
            total_count: 15,
            window: CounterWindow::M15,
            percentage: 20.0,
            change_percent: 0.8,
            timestamp_ms: 1,
        });
        assert_eq!(counter.symbol(), "ETHUSDT");
        assert_eq!(counter.render_text(), "[计数上涨] ETHUSDT 15m窗口内第 3/15 次 (20.0%) 涨跌幅 +0.80%");
    }

    #[test]
    fn test_serialized_shape() {
        let first = Observation::new("BTCUSDT", 100.0, 1.0, 1);
        let signal = Signal::from_window(SignalKind::Growth, Direction::Up, &first, &first, 2, 50.0);
        let value = serde_json::to_value(OutboundMessage::Signal(signal)).unwrap();
        assert_eq!(value["type"], "signal");
        assert_eq!(value["payload"]["kind"], "growth");
        assert_eq!(value["payload"]["direction"], "up");
    }
}
