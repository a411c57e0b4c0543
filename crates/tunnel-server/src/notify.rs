//! Notification Sinks
//!
//! Fire-and-forget side channels: a Telegram bot for operator alerts and a
//! mail sink for config delivery. Neither is on the critical path; every
//! failure is logged and swallowed.

use async_trait::async_trait;

/// Operator alerting on subscription events
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Used when no Telegram credentials are configured
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, message: &str) {
        tracing::debug!(message, "notification (no sink configured)");
    }
}

/// Telegram bot notifier
pub struct TelegramNotifier {
    http: reqwest::Client,
    token: String,
    chat_id: String,
    prefix: String,
}

impl TelegramNotifier {
    pub fn new(
        token: impl Into<String>,
        chat_id: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
            chat_id: chat_id.into(),
            prefix: prefix.into(),
        }
    }

    /// `None` when `TELEGRAM_TOKEN`/`TELEGRAM_CHATID` are unset
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("TELEGRAM_TOKEN").ok()?;
        let chat_id = std::env::var("TELEGRAM_CHATID").ok()?;
        let prefix = std::env::var("TELEGRAM_PREFIX").unwrap_or_default();
        Some(Self::new(token, chat_id, prefix))
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) {
        let text = if self.prefix.is_empty() {
            message.to_string()
        } else {
            format!("[{}] {}", self.prefix, message)
        };

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let result = self
            .http
            .get(&url)
            .query(&[("chat_id", self.chat_id.as_str()), ("text", &text)])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        if let Err(e) = result {
            tracing::warn!(%e, "telegram notification failed");
        }
    }
}

/// Config-file delivery to a user-supplied address
#[async_trait]
pub trait MailSink: Send + Sync {
    async fn send_config(&self, address: &str, config: &str, valid_until: &str);
}

/// Stub sink: email delivery is an external collaborator; this logs the
/// request so operators can see it was made
pub struct LogMailSink;

#[async_trait]
impl MailSink for LogMailSink {
    async fn send_config(&self, address: &str, _config: &str, valid_until: &str) {
        tracing::info!(address, valid_until, "config email requested");
    }
}
