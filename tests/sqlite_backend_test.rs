use tempfile::TempDir;
use ticker_signal::common::{BackendKind, Observation, StorageConfig};
use ticker_signal::store::{open_backend, HistoryBackend, PriceStore, SqliteHistoryBackend};

fn obs(symbol: &str, price: f64, ts: i64) -> Observation {
    Observation::new(symbol, price, 100.0, ts)
}

#[test]
fn test_sqlite_append_trims_and_orders() {
    let dir = TempDir::new().unwrap();
    let mut backend = SqliteHistoryBackend::open(dir.path().join("history.db"), 2).unwrap();
    assert!(backend.is_ready());

    for (i, price) in [1.0, 2.0, 3.0, 4.0].iter().enumerate() {
        backend.append(&obs("BTCUSDT", *price, (i as i64 + 1) * 1_000), 3).unwrap();
    }

    let latest = backend.latest("BTCUSDT", 0).unwrap();
    let prices: Vec<f64> = latest.iter().map(|o| o.price).collect();
    assert_eq!(prices, vec![2.0, 3.0, 4.0], "超出上限时应丢弃最旧的记录");
    assert_eq!(backend.latest("BTCUSDT", 2).unwrap().len(), 2);
    assert_eq!(backend.last("BTCUSDT").unwrap().unwrap().price, 4.0);
    assert_eq!(backend.len("BTCUSDT").unwrap(), 3);
}

#[test]
fn test_sqlite_range_evict_and_remove() {
    let dir = TempDir::new().unwrap();
    let mut backend = SqliteHistoryBackend::open(dir.path().join("history.db"), 2).unwrap();
    for ts in [1_000, 2_000, 3_000] {
        backend.append(&obs("BTCUSDT", 10.0, ts), 100).unwrap();
    }
    backend.append(&obs("ETHUSDT", 5.0, 1_000), 100).unwrap();

    let range = backend.range("BTCUSDT", 2_000, 3_000).unwrap();
    assert_eq!(range.len(), 2);

    let report = backend.evict_before(2_500).unwrap();
    assert_eq!(report.removed, 3);
    assert_eq!(report.emptied_symbols, vec!["ETHUSDT".to_string()]);
    assert_eq!(backend.symbols().unwrap(), vec!["BTCUSDT".to_string()]);

    assert_eq!(backend.remove_symbol("BTCUSDT").unwrap(), 1);
    assert_eq!(backend.total_entries().unwrap(), 0);
}

#[tokio::test]
async fn test_store_restores_from_sqlite() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig {
        backend: BackendKind::Sqlite,
        sqlite_path: dir.path().join("history.db").to_string_lossy().into_owned(),
        ..StorageConfig::default()
    };

    {
        let store = PriceStore::new(&config, open_backend(&config).unwrap()).await.unwrap();
        store.ingest(obs("BTCUSDT", 100.0, 1_000)).await.unwrap();
        store.ingest(obs("BTCUSDT", 101.0, 2_000)).await.unwrap();
        store.ingest(Observation::new("ETHUSDT", 10.0, 10_000.0, 1_000)).await.unwrap();
        store.shutdown().await;
    }

    let store = PriceStore::new(&config, open_backend(&config).unwrap()).await.unwrap();
    assert_eq!(store.get_symbols().await, vec!["BTCUSDT", "ETHUSDT"]);
    assert_eq!(store.current_price("BTCUSDT").await, Some(101.0));
    assert_eq!(store.history("BTCUSDT", 0).await.unwrap().len(), 2);

    let top = store.top_by_volume(1).await;
    assert_eq!(top[0].symbol, "ETHUSDT", "成交额排名应随快照一起恢复");
}
