use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::utils::error::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Completed,
    NoJobs,
    Crashed,
}

/// End-of-run message. Subject and body are plain text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunNotification {
    pub kind: NotificationKind,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationResult {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

/// Trait for implementing notification methods (email, Discord, etc.)
#[async_trait]
pub trait NotifierPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn plugin_type(&self) -> &str;

    /// Delivery problems the channel reports are returned as an unsuccessful
    /// `NotificationResult`; `Err` is reserved for messages that could not
    /// even be built.
    async fn notify(&self, notification: &RunNotification) -> Result<NotificationResult>;
}
