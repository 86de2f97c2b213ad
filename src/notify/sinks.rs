//! 投递目标：日志与 Webhook

use super::{OutboundMessage, SignalSink};
use crate::common::{AppError, NotificationConfig, Result};
use futures::future::BoxFuture;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{info, instrument};

/// 把消息写进日志，没有配置 webhook 时的默认去处
#[derive(Debug, Default, Clone)]
pub struct LogSink;

impl SignalSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn deliver<'a>(&'a self, message: &'a OutboundMessage) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            info!(target: "信号输出", symbol = message.symbol(), "{}", message.render_text());
            Ok(())
        })
    }
}

/// 以 JSON POST 到聊天机器人风格的 webhook
#[derive(Debug, Clone)]
pub struct WebhookSink {
    url: String,
    client: Client,
}

impl WebhookSink {
    #[instrument(target = "信号输出", skip_all, err)]
    pub fn new(url: &str, request_timeout: Duration) -> Result<Self> {
        if url.trim().is_empty() {
            return Err(AppError::ConfigError("webhook_url 不能为空".to_string()));
        }
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AppError::ApiError(format!("创建HTTP客户端失败: {}", e)))?;

        info!(target: "信号输出", log_type = "module", "Webhook投递已配置");
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    /// 按通知配置创建，未配置 URL 时返回 None
    pub fn from_config(config: &NotificationConfig) -> Result<Option<Self>> {
        match config.webhook_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(Some(Self::new(
                url,
                Duration::from_secs(config.request_timeout_secs),
            )?)),
            _ => Ok(None),
        }
    }

    pub fn payload(message: &OutboundMessage) -> serde_json::Value {
        json!({
            "text": message.render_text(),
            "message": message,
        })
    }

    async fn post(&self, message: &OutboundMessage) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&Self::payload(message))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ApiError(format!("webhook返回 {}: {}", status, body)));
        }
        Ok(())
    }
}

impl SignalSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    fn deliver<'a>(&'a self, message: &'a OutboundMessage) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.post(message))
    }
}
