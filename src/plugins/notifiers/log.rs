use async_trait::async_trait;

use crate::plugins::traits::{
    NotificationKind, NotificationResult, NotifierPlugin, RunNotification,
};
use crate::utils::error::Result;

/// Writes notifications to the tracing log. Always registered so that a run
/// outcome is recorded even with no delivery channel configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        LogNotifier
    }
}

#[async_trait]
impl NotifierPlugin for LogNotifier {
    fn name(&self) -> &str {
        "Log Notifier"
    }

    fn plugin_type(&self) -> &str {
        "log"
    }

    async fn notify(&self, notification: &RunNotification) -> Result<NotificationResult> {
        match notification.kind {
            NotificationKind::Crashed => {
                tracing::error!("{}\n{}", notification.subject, notification.body)
            }
            _ => tracing::info!("{}\n{}", notification.subject, notification.body),
        }

        Ok(NotificationResult {
            success: true,
            message_id: None,
            error: None,
        })
    }
}
