//! Webhook Alerter 実装
//!
//! アラートを JSON として設定された URL に POST する。

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::{Alert, AlertError, Alerter};

/// Webhook に送る JSON ペイロード
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: String,
    alert: &'a Alert,
}

/// HTTP POST でアラートを送る Alerter
pub struct WebhookAlerter {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlerter {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Alerter for WebhookAlerter {
    async fn notify(&self, alert: &Alert) -> Result<(), AlertError> {
        let payload = WebhookPayload {
            text: alert.summary(),
            alert,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AlertError::DeliveryFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AlertError::DeliveryFailed(format!(
                "webhook responded with {}",
                response.status()
            )));
        }

        tracing::debug!("Alert delivered to webhook for '{}'", alert.user_id);
        Ok(())
    }
}
