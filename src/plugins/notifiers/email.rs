use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, SinglePart, header};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::SmtpConfig;
use crate::plugins::traits::{NotificationResult, NotifierPlugin, RunNotification};
use crate::utils::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub credentials: Option<(String, String)>,
    pub from: Mailbox,
    pub to: Mailbox,
    pub use_tls: bool,
}

impl EmailConfig {
    pub fn from_smtp(config: &SmtpConfig) -> Result<Self> {
        let from_address = config
            .from_address
            .as_deref()
            .or(config.username.as_deref())
            .ok_or_else(|| AppError::notification("email", "Missing from_address"))?;
        let to_address = config
            .to_address
            .as_deref()
            .ok_or_else(|| AppError::notification("email", "Missing to_address"))?;

        let from = format!("{} <{}>", config.from_name, from_address)
            .parse::<Mailbox>()
            .map_err(|e| AppError::notification("email", format!("Invalid from address: {}", e)))?;
        let to = to_address
            .parse::<Mailbox>()
            .map_err(|e| AppError::notification("email", format!("Invalid to address: {}", e)))?;

        let credentials = match (&config.username, &config.password) {
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
            _ => None,
        };

        Ok(EmailConfig {
            smtp_server: config.host.clone(),
            smtp_port: config.port,
            credentials,
            from,
            to,
            use_tls: config.use_tls,
        })
    }
}

pub struct EmailNotifier {
    config: EmailConfig,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        EmailNotifier { config }
    }

    pub fn from_smtp(config: &SmtpConfig) -> Result<Self> {
        Ok(Self::new(EmailConfig::from_smtp(config)?))
    }

    fn format_html_body(&self, notification: &RunNotification) -> String {
        let escaped = notification
            .body
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;");
        format!(
            r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; margin: 20px;">
    <h3>{}</h3>
    <pre>{}</pre>
</body>
</html>
"#,
            notification.subject, escaped
        )
    }

    fn build_message(&self, notification: &RunNotification) -> Result<Message> {
        Message::builder()
            .from(self.config.from.clone())
            .to(self.config.to.clone())
            .subject(notification.subject.clone())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(notification.body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(self.format_html_body(notification)),
                    ),
            )
            .map_err(|e| AppError::notification("email", format!("Failed to build message: {}", e)))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = if self.config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_server)
                .map_err(|e| AppError::notification("email", format!("Invalid SMTP relay: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.smtp_server)
        }
        .port(self.config.smtp_port);

        let builder = match &self.config.credentials {
            Some((username, password)) => {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            }
            None => builder,
        };

        Ok(builder.build())
    }
}

#[async_trait]
impl NotifierPlugin for EmailNotifier {
    fn name(&self) -> &str {
        "Email Notifier"
    }

    fn plugin_type(&self) -> &str {
        "email"
    }

    async fn notify(&self, notification: &RunNotification) -> Result<NotificationResult> {
        let email = self.build_message(notification)?;
        let mailer = self.transport()?;

        match mailer.send(email).await {
            Ok(_response) => Ok(NotificationResult {
                success: true,
                message_id: Some(format!("email-{}", chrono::Utc::now().timestamp())),
                error: None,
            }),
            Err(e) => Ok(NotificationResult {
                success: false,
                message_id: None,
                error: Some(e.to_string()),
            }),
        }
    }
}
