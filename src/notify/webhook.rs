//! Chat gateway webhook

use super::{Notification, Notifier};
use crate::config::NotifierConfig;
use crate::error::{OrchestratorError, OrchestratorResult};

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct Envelope<'a> {
    user_id: &'a str,
    notification: &'a Notification,
}

/// POSTs `{user_id, notification}` to the chat gateway
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    auth_token: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: String, config: &NotifierConfig) -> OrchestratorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| OrchestratorError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            auth_token: config.auth_token.clone().filter(|t| !t.is_empty()),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, user_id: &str, notification: &Notification) -> OrchestratorResult<()> {
        let failed = |message: String| OrchestratorError::NotificationDelivery {
            user_id: user_id.to_string(),
            message,
        };

        let mut request = self.client.post(&self.url).json(&Envelope {
            user_id,
            notification,
        });
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| failed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("gateway returned {}: {}", status, body)));
        }

        debug!("Delivered {} notification to {}", notification.name(), user_id);
        Ok(())
    }
}
