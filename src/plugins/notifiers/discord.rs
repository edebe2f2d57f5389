use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::config::DiscordConfig;
use crate::plugins::traits::{
    NotificationKind, NotificationResult, NotifierPlugin, RunNotification,
};
use crate::utils::error::{AppError, Result};

// Discord rejects embed descriptions longer than this.
const MAX_DESCRIPTION_CHARS: usize = 4096;

pub struct DiscordNotifier {
    client: Client,
    webhook_url: String,
    username: Option<String>,
}

impl DiscordNotifier {
    pub fn new(webhook_url: impl Into<String>, username: Option<String>) -> Self {
        DiscordNotifier {
            client: Client::new(),
            webhook_url: webhook_url.into(),
            username,
        }
    }

    pub fn from_config(config: &DiscordConfig) -> Result<Self> {
        let webhook_url = config
            .webhook_url
            .as_deref()
            .ok_or_else(|| AppError::notification("discord", "Missing webhook_url"))?;
        url::Url::parse(webhook_url).map_err(|e| {
            AppError::notification("discord", format!("Invalid webhook URL: {}", e))
        })?;

        Ok(Self::new(webhook_url, config.username.clone()))
    }

    fn get_embed_color(kind: NotificationKind) -> u32 {
        match kind {
            NotificationKind::Completed => 0x00ff00,
            NotificationKind::NoJobs => 0x0099ff,
            NotificationKind::Crashed => 0xff0000,
        }
    }

    fn create_webhook_payload(&self, notification: &RunNotification) -> serde_json::Value {
        let description: String = notification
            .body
            .chars()
            .take(MAX_DESCRIPTION_CHARS)
            .collect();

        let mut payload = json!({
            "embeds": [{
                "title": notification.subject,
                "description": description,
                "color": Self::get_embed_color(notification.kind),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }]
        });

        if let Some(username) = &self.username {
            payload["username"] = json!(username);
        }

        payload
    }
}

#[async_trait]
impl NotifierPlugin for DiscordNotifier {
    fn name(&self) -> &str {
        "Discord Notifier"
    }

    fn plugin_type(&self) -> &str {
        "discord"
    }

    async fn notify(&self, notification: &RunNotification) -> Result<NotificationResult> {
        let payload = self.create_webhook_payload(notification);

        let response = match self.client.post(&self.webhook_url).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => {
                return Ok(NotificationResult {
                    success: false,
                    message_id: None,
                    error: Some(e.to_string()),
                });
            }
        };

        let status = response.status();
        if status.is_success() {
            Ok(NotificationResult {
                success: true,
                message_id: Some(format!("discord-{}", chrono::Utc::now().timestamp())),
                error: None,
            })
        } else {
            let body = response.text().await.unwrap_or_default();
            Ok(NotificationResult {
                success: false,
                message_id: None,
                error: Some(format!("Discord returned HTTP {}: {}", status, body)),
            })
        }
    }
}
