use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::notifiers::{DiscordNotifier, EmailNotifier, LogNotifier};
use super::sinks::{JsonLinesSink, SqliteSink};
use super::traits::{NotificationResult, NotifierPlugin, RunNotification, SinkPlugin, SinkRequest};
use crate::config::{AppConfig, SinkKind};
use crate::models::Table;
use crate::utils::error::{AppError, Result};

pub type NotifierPluginBox = Box<dyn NotifierPlugin>;
pub type SinkPluginBox = Box<dyn SinkPlugin>;

#[derive(Clone)]
pub struct PluginManager {
    notifiers: Arc<RwLock<HashMap<String, NotifierPluginBox>>>,
    sinks: Arc<RwLock<HashMap<String, SinkPluginBox>>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self {
            notifiers: Arc::new(RwLock::new(HashMap::new())),
            sinks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a notifier plugin
    pub async fn register_notifier(&self, plugin: NotifierPluginBox) {
        let plugin_type = plugin.plugin_type().to_string();

        let mut notifiers = self.notifiers.write().await;
        notifiers.insert(plugin_type, plugin);
    }

    /// Register a sink plugin
    pub async fn register_sink(&self, plugin: SinkPluginBox) {
        let plugin_type = plugin.plugin_type().to_string();

        let mut sinks = self.sinks.write().await;
        sinks.insert(plugin_type, plugin);
    }

    pub async fn has_notifier(&self, plugin_type: &str) -> bool {
        let notifiers = self.notifiers.read().await;
        notifiers.contains_key(plugin_type)
    }

    pub async fn has_sink(&self, plugin_type: &str) -> bool {
        let sinks = self.sinks.read().await;
        sinks.contains_key(plugin_type)
    }

    pub async fn list_notifier_types(&self) -> Vec<String> {
        let notifiers = self.notifiers.read().await;
        let mut types: Vec<String> = notifiers.keys().cloned().collect();
        types.sort();
        types
    }

    pub async fn list_sink_types(&self) -> Vec<String> {
        let sinks = self.sinks.read().await;
        let mut types: Vec<String> = sinks.keys().cloned().collect();
        types.sort();
        types
    }

    /// Registers the log notifier plus every channel and the sink the
    /// configuration enables.
    pub async fn initialize_from_config(&self, config: &AppConfig) -> Result<()> {
        self.register_notifier(Box::new(LogNotifier::new())).await;

        if config.notifications.smtp.enabled {
            let email = EmailNotifier::from_smtp(&config.notifications.smtp)?;
            self.register_notifier(Box::new(email)).await;
        }

        if config.notifications.discord.webhook_url.is_some() {
            let discord = DiscordNotifier::from_config(&config.notifications.discord)?;
            self.register_notifier(Box::new(discord)).await;
        }

        match config.sink.kind {
            SinkKind::Sqlite => {
                let sink =
                    SqliteSink::connect(&config.sink.database_url, config.sink.max_connections)
                        .await?;
                self.register_sink(Box::new(sink)).await;
            }
            SinkKind::Jsonl => {
                self.register_sink(Box::new(JsonLinesSink::new(&config.sink.directory)))
                    .await;
            }
        }

        Ok(())
    }

    /// Sends `notification` through every registered notifier. A failing
    /// channel is logged and never stops the others.
    pub async fn notify_all(
        &self,
        notification: &RunNotification,
    ) -> Vec<(String, NotificationResult)> {
        let notifiers = self.notifiers.read().await;
        let mut results = Vec::with_capacity(notifiers.len());

        for (plugin_type, notifier) in notifiers.iter() {
            let result = match notifier.notify(notification).await {
                Ok(result) => result,
                Err(e) => NotificationResult {
                    success: false,
                    message_id: None,
                    error: Some(e.to_string()),
                },
            };
            if let Some(error) = result.error.as_deref().filter(|_| !result.success) {
                tracing::warn!("Notifier {} failed: {}", plugin_type, error);
            }
            results.push((plugin_type.clone(), result));
        }

        results
    }

    /// Write a table using a sink plugin
    pub async fn write_table(
        &self,
        plugin_type: &str,
        table: &Table,
        request: &SinkRequest,
    ) -> Result<usize> {
        let sinks = self.sinks.read().await;
        match sinks.get(plugin_type) {
            Some(sink) => sink.write(table, request).await,
            None => Err(AppError::sink(
                plugin_type,
                format!("Sink plugin '{}' not found", plugin_type),
            )),
        }
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}
