use ticker_signal::common::{AppConfig, BackendKind, CounterWindow};

#[test]
fn test_shipped_config_loads() {
    let path = format!("{}/config/SignalConfig.toml", env!("CARGO_MANIFEST_DIR"));
    let config = AppConfig::from_file(&path).expect("随仓库发布的配置文件应能通过校验");

    assert_eq!(config.storage.backend, BackendKind::Memory);
    assert_eq!(config.counter.selected_window, CounterWindow::M15);
    assert_eq!(config.analyzers.growth.setting("min_growth", 0.0), 0.5);
    assert_eq!(config.analyzers.volume.setting("min_volume", 0.0), 1_000_000.0);
    assert!(config.notification.webhook_url.is_none());
}
