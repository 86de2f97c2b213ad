//! 有界投递队列
//!
//! `submit` 只做一次 `try_send`，不会阻塞分析周期。
//! 单个工作任务按顺序把消息交给每个 sink，sink 的错误与 panic 都只计数。

use super::{OutboundMessage, SignalSink};
use crate::analysis::counter::{CounterNotification, CounterNotifier};
use crate::common::Signal;
use crate::pipeline::SignalForwarder;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

#[derive(Debug, Default)]
struct DispatchCounters {
    dispatched: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    panics: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatcherStats {
    pub dispatched: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
    pub panics: u64,
}

pub struct SignalDispatcher {
    sender: mpsc::Sender<OutboundMessage>,
    counters: Arc<DispatchCounters>,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SignalDispatcher {
    /// 创建投递队列并启动工作任务，必须在 tokio 运行时内调用
    pub fn new(capacity: usize, sinks: Vec<Arc<dyn SignalSink>>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(DispatchCounters::default());

        info!(target: "通知分发", log_type = "module", capacity, sinks = sinks.len(), "信号投递队列已启动");
        let worker = tokio::spawn(
            run_worker(receiver, shutdown_rx, sinks, counters.clone())
                .instrument(tracing::info_span!("signal_dispatch_worker")),
        );

        Self {
            sender,
            counters,
            closed: AtomicBool::new(false),
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// 交出一条消息，队列满或已停止时丢弃
    pub fn submit(&self, message: OutboundMessage) -> bool {
        if self.closed.load(Ordering::Acquire) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.sender.try_send(message) {
            Ok(()) => {
                self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(message)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(target: "通知分发", symbol = message.symbol(), "投递队列已满，消息被丢弃");
                false
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(target: "通知分发", symbol = message.symbol(), "投递队列已关闭，消息被丢弃");
                false
            }
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            panics: self.counters.panics.load(Ordering::Relaxed),
        }
    }

    /// 停止接收新消息，把队列里剩余的消息投递完再返回
    pub async fn stop(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(target: "通知分发", error = %e, "投递任务异常退出");
            }
        }
        let stats = self.stats();
        info!(target: "通知分发", log_type = "module", delivered = stats.delivered, failed = stats.failed, dropped = stats.dropped, "信号投递队列已停止");
    }
}

impl SignalForwarder for SignalDispatcher {
    fn forward(&self, signal: Signal) {
        self.submit(OutboundMessage::Signal(signal));
    }
}

impl CounterNotifier for SignalDispatcher {
    fn notify(&self, notification: CounterNotification) {
        self.submit(OutboundMessage::Counter(notification));
    }
}

async fn deliver_to_sinks(message: &OutboundMessage, sinks: &[Arc<dyn SignalSink>], counters: &DispatchCounters) {
    for sink in sinks {
        match AssertUnwindSafe(sink.deliver(message)).catch_unwind().await {
            Ok(Ok(())) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(target: "通知分发", sink = sink.name(), symbol = message.symbol(), error = %e, "投递失败，不重试");
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                counters.panics.fetch_add(1, Ordering::Relaxed);
                error!(target: "通知分发", sink = sink.name(), symbol = message.symbol(), "投递时发生panic，已隔离");
            }
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<OutboundMessage>,
    mut shutdown_rx: watch::Receiver<bool>,
    sinks: Vec<Arc<dyn SignalSink>>,
    counters: Arc<DispatchCounters>,
) {
    loop {
        tokio::select! {
            biased;
            maybe_message = receiver.recv() => {
                match maybe_message {
                    Some(message) => deliver_to_sinks(&message, &sinks, &counters).await,
                    None => break,
                }
            }
            _ = shutdown_rx.changed() => {
                receiver.close();
                while let Some(message) = receiver.recv().await {
                    deliver_to_sinks(&message, &sinks, &counters).await;
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{AppError, Direction, Observation, Result, SignalKind};
    use futures::future::BoxFuture;

    #[derive(Default)]
    struct CollectingSink {
        received: Mutex<Vec<String>>,
    }

    impl SignalSink for CollectingSink {
        fn name(&self) -> &str {
            "collecting"
        }

        fn deliver<'a>(&'a self, message: &'a OutboundMessage) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.received.lock().unwrap().push(message.symbol().to_string());
                Ok(())
            })
        }
    }

    struct FailingSink;

    impl SignalSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        fn deliver<'a>(&'a self, _message: &'a OutboundMessage) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Err(AppError::ApiError("webhook returned 500".to_string())) })
        }
    }

    struct PanickingSink;

    impl SignalSink for PanickingSink {
        fn name(&self) -> &str {
            "panicking"
        }

        fn deliver<'a>(&'a self, _message: &'a OutboundMessage) -> BoxFuture<'a, Result<()>> {
            Box::pin(async {
                if true {
                    panic!("sink bug");
                }
                Ok(())
            })
        }
    }

    fn signal(symbol: &str) -> Signal {
        let o = Observation::new(symbol, 1.0, 1.0, 1);
        Signal::from_window(SignalKind::Growth, Direction::Up, &o, &o, 2, 50.0)
    }

    #[tokio::test]
    async fn test_stop_drains_queue() {
        let sink = Arc::new(CollectingSink::default());
        let dispatcher = SignalDispatcher::new(16, vec![sink.clone() as Arc<dyn SignalSink>]);
        for symbol in ["A", "B", "C"] {
            dispatcher.forward(signal(symbol));
        }
        dispatcher.stop().await;

        assert_eq!(*sink.received.lock().unwrap(), vec!["A", "B", "C"], "停止前应投递完队列中的消息");
        assert_eq!(dispatcher.stats().delivered, 3);
        assert!(!dispatcher.submit(OutboundMessage::Signal(signal("D"))), "停止后不再接收");
    }

    #[tokio::test]
    async fn test_sink_failures_are_isolated() {
        let sink = Arc::new(CollectingSink::default());
        let dispatcher = SignalDispatcher::new(
            16,
            vec![
                Arc::new(FailingSink) as Arc<dyn SignalSink>,
                Arc::new(PanickingSink),
                sink.clone(),
            ],
        );
        dispatcher.forward(signal("BTCUSDT"));
        dispatcher.stop().await;

        let stats = dispatcher.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.panics, 1);
        assert_eq!(*sink.received.lock().unwrap(), vec!["BTCUSDT"]);
    }

    #[tokio::test]
    async fn test_submit_after_worker_exit_drops() {
        let dispatcher = SignalDispatcher::new(4, vec![]);
        // 工作任务退出后接收端已关闭，但 stop 尚未被调用
        dispatcher.shutdown_tx.send(true).unwrap();
        let worker = dispatcher.worker.lock().unwrap().take().unwrap();
        worker.await.unwrap();

        assert!(!dispatcher.submit(OutboundMessage::Signal(signal("X"))));
        let stats = dispatcher.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.dispatched, 0);
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        // 工作任务尚未运行时连续提交，超出容量的消息被丢弃
        let dispatcher = SignalDispatcher::new(2, vec![]);
        let accepted = (0..10).filter(|_| dispatcher.submit(OutboundMessage::Signal(signal("X")))).count();
        assert!(accepted >= 2);
        assert_eq!(dispatcher.stats().dropped as usize, 10 - accepted);
        dispatcher.stop().await;
    }
}
