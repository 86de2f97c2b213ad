//! 存储变更通知中心
//!
//! 写入路径只做一次 `try_send`，队列满时直接丢弃并计数，从不阻塞写入方。
//! 单个分发任务按订阅关系把事件交给监听者，监听者的 panic 被捕获并计数。

use crate::common::StoreEvent;
use dashmap::DashMap;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// 订阅全部品种时使用的通配符
pub const WILDCARD: &str = "*";

/// 存储事件监听者
pub type StoreListener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

/// 订阅句柄，用于取消订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    symbol: String,
    listener: StoreListener,
}

#[derive(Debug, Default)]
struct HubCounters {
    published: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    listener_panics: AtomicU64,
}

/// 通知中心统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct HubStats {
    pub published: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub listener_panics: u64,
    pub subscribers: usize,
}

pub struct NotificationHub {
    sender: mpsc::Sender<StoreEvent>,
    subscriptions: Arc<DashMap<u64, Subscription>>,
    next_id: AtomicU64,
    counters: Arc<HubCounters>,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationHub {
    /// 创建通知中心并启动分发任务，必须在 tokio 运行时内调用
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let subscriptions: Arc<DashMap<u64, Subscription>> = Arc::new(DashMap::new());
        let counters = Arc::new(HubCounters::default());

        let handle = tokio::spawn(
            run_dispatcher(receiver, shutdown_rx, subscriptions.clone(), counters.clone())
                .instrument(tracing::info_span!("store_notification_dispatcher")),
        );

        Self {
            sender,
            subscriptions,
            next_id: AtomicU64::new(1),
            counters,
            closed: AtomicBool::new(false),
            shutdown_tx,
            dispatcher: Mutex::new(Some(handle)),
        }
    }

    /// 订阅某个品种的事件，`"*"` 订阅全部品种
    pub fn subscribe(&self, symbol: &str, listener: StoreListener) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.insert(
            id,
            Subscription {
                symbol: symbol.to_string(),
                listener,
            },
        );
        debug!(target: "通知中心", subscription_id = id, symbol, "新增订阅");
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(&id.0).is_some()
    }

    /// 投递事件，队列满或已关闭时丢弃
    pub fn publish(&self, event: StoreEvent) {
        if self.closed.load(Ordering::Acquire) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match self.sender.try_send(event) {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(target: "通知中心", symbol = %event.symbol(), "通知队列已满，事件被丢弃");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            published: self.counters.published.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            listener_panics: self.counters.listener_panics.load(Ordering::Relaxed),
            subscribers: self.subscriptions.len(),
        }
    }

    /// 停止接收新事件，等待分发任务把已入队的事件处理完
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(target: "通知中心", error = %e, "分发任务异常退出");
            }
        }
        info!(target: "通知中心", log_type = "module", "通知中心已停止");
    }
}

fn deliver(event: &StoreEvent, subscriptions: &DashMap<u64, Subscription>, counters: &HubCounters) {
    // 先拷出匹配的监听者，避免回调期间持有分片锁
    let listeners: Vec<(u64, StoreListener)> = subscriptions
        .iter()
        .filter(|entry| entry.symbol == WILDCARD || entry.symbol == event.symbol())
        .map(|entry| (*entry.key(), entry.listener.clone()))
        .collect();

    for (id, listener) in listeners {
        match catch_unwind(AssertUnwindSafe(|| listener(event))) {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                counters.listener_panics.fetch_add(1, Ordering::Relaxed);
                error!(target: "通知中心", subscription_id = id, symbol = %event.symbol(), "监听者发生panic，已隔离");
            }
        }
    }
}

async fn run_dispatcher(
    mut receiver: mpsc::Receiver<StoreEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
    subscriptions: Arc<DashMap<u64, Subscription>>,
    counters: Arc<HubCounters>,
) {
    loop {
        tokio::select! {
            biased;
            maybe_event = receiver.recv() => {
                match maybe_event {
                    Some(event) => deliver(&event, &subscriptions, &counters),
                    None => break,
                }
            }
            _ = shutdown_rx.changed() => {
                // 排空剩余事件后退出
                while let Ok(event) = receiver.try_recv() {
                    deliver(&event, &subscriptions, &counters);
                }
                break;
            }
        }
    }
    debug!(target: "通知中心", "分发任务已退出");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Observation;
    use std::time::Duration;

    fn updated(symbol: &str) -> StoreEvent {
        StoreEvent::Updated(Observation::new(symbol, 1.0, 1.0, 1))
    }

    #[tokio::test]
    async fn test_symbol_and_wildcard_routing() {
        let hub = NotificationHub::new(16);
        let (tx_all, mut rx_all) = mpsc::unbounded_channel();
        let (tx_btc, mut rx_btc) = mpsc::unbounded_channel();

        hub.subscribe(WILDCARD, Arc::new(move |e: &StoreEvent| {
            let _ = tx_all.send(e.symbol().to_string());
        }));
        hub.subscribe("BTCUSDT", Arc::new(move |e: &StoreEvent| {
            let _ = tx_btc.send(e.symbol().to_string());
        }));

        hub.publish(updated("BTCUSDT"));
        hub.publish(updated("ETHUSDT"));
        hub.shutdown().await;

        let mut all = Vec::new();
        while let Ok(s) = rx_all.try_recv() {
            all.push(s);
        }
        assert_eq!(all, vec!["BTCUSDT", "ETHUSDT"], "通配符订阅应收到全部事件");

        assert_eq!(rx_btc.try_recv().unwrap(), "BTCUSDT");
        assert!(rx_btc.try_recv().is_err(), "品种订阅只应收到本品种事件");
    }

    #[tokio::test]
    async fn test_listener_panic_is_isolated() {
        let hub = NotificationHub::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();

        hub.subscribe(WILDCARD, Arc::new(|_e: &StoreEvent| panic!("listener failure")));
        hub.subscribe(WILDCARD, Arc::new(move |e: &StoreEvent| {
            let _ = tx.send(e.symbol().to_string());
        }));

        hub.publish(updated("SOLUSDT"));
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(got.as_deref(), Some("SOLUSDT"), "panic不应影响其他监听者");

        hub.shutdown().await;
        assert_eq!(hub.stats().listener_panics, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_and_publish_after_shutdown() {
        let hub = NotificationHub::new(4);
        let id = hub.subscribe("BTCUSDT", Arc::new(|_e: &StoreEvent| {}));
        assert_eq!(hub.stats().subscribers, 1);
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));

        hub.shutdown().await;
        hub.publish(updated("BTCUSDT"));
        assert_eq!(hub.stats().dropped, 1, "关闭后的事件应计为丢弃");
    }
}
