use crate::config::NotificationConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TicketsIssued,
    WithdrawalRequested,
    WithdrawalReviewed,
    WithdrawalProcessed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub recipient: String,
    pub payload: Value,
}

impl Notification {
    pub fn new(kind: NotificationKind, recipient: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            recipient: recipient.into(),
            payload,
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(2),
        }
    }
}

/// Fire-and-forget front of the notification sink. `notify` only enqueues,
/// a worker delivers with retries, so callers never wait on email.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationDispatcher {
    pub fn spawn(sink: Arc<dyn NotificationSink>, policy: RetryPolicy) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                let sink = sink.clone();
                tokio::spawn(async move {
                    deliver_with_retry(sink.as_ref(), &notification, policy).await;
                });
            }
            log::info!("Notification dispatcher stopped");
        });
        Self { tx }
    }

    pub fn notify(&self, notification: Notification) {
        let kind = notification.kind;
        if self.tx.send(notification).is_err() {
            log::warn!("Notification dropped, dispatcher is closed: kind={kind:?}");
        }
    }
}

async fn deliver_with_retry(
    sink: &dyn NotificationSink,
    notification: &Notification,
    policy: RetryPolicy,
) -> bool {
    let mut backoff = policy.initial_backoff;
    for attempt in 1..=policy.max_attempts {
        match sink.deliver(notification).await {
            Ok(()) => return true,
            Err(e) if attempt < policy.max_attempts => {
                log::warn!(
                    "Notification delivery failed (attempt {attempt}/{}): kind={:?}, recipient={}, error={e}",
                    policy.max_attempts,
                    notification.kind,
                    notification.recipient
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(e) => {
                log::error!(
                    "Notification given up after {attempt} attempts: kind={:?}, recipient={}, error={e}",
                    notification.kind,
                    notification.recipient
                );
            }
        }
    }
    false
}

/// Used when no email provider is configured
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) -> AppResult<()> {
        log::info!(
            "Notification (not sent): kind={:?}, recipient={}, payload={}",
            notification.kind,
            notification.recipient,
            notification.payload
        );
        Ok(())
    }
}

pub fn render_email(notification: &Notification) -> (String, String) {
    let p = &notification.payload;
    let text = |key: &str| match p.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => String::new(),
    };
    match notification.kind {
        NotificationKind::TicketsIssued => (
            format!("Your tickets for {}", text("event_title")),
            format!(
                "<p>Payment {} confirmed. {} ticket(s) issued: {}.</p>",
                text("reference"),
                text("ticket_count"),
                text("ticket_numbers")
            ),
        ),
        NotificationKind::WithdrawalRequested => (
            "Withdrawal request received".to_string(),
            format!(
                "<p>We received your withdrawal request #{} for {} (fee {}, you receive {}).</p>",
                text("withdrawal_id"),
                text("amount"),
                text("fee"),
                text("net_amount")
            ),
        ),
        NotificationKind::WithdrawalReviewed => (
            format!("Withdrawal request {}", text("status")),
            format!(
                "<p>Your withdrawal request #{} was {}. {}</p>",
                text("withdrawal_id"),
                text("status"),
                text("comment")
            ),
        ),
        NotificationKind::WithdrawalProcessed => (
            "Withdrawal paid out".to_string(),
            format!(
                "<p>Withdrawal #{} of {} has been paid out. Reference: {}.</p>",
                text("withdrawal_id"),
                text("net_amount"),
                text("transaction_ref")
            ),
        ),
    }
}

pub struct ResendEmailSink {
    client: Client,
    config: NotificationConfig,
    api_key: String,
}

impl ResendEmailSink {
    pub fn new(config: NotificationConfig) -> AppResult<Self> {
        let api_key = config
            .resend_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::ConfigError("Resend API key is not configured".to_string()))?;
        Ok(Self {
            client: Client::new(),
            config,
            api_key,
        })
    }
}

#[async_trait]
impl NotificationSink for ResendEmailSink {
    async fn deliver(&self, notification: &Notification) -> AppResult<()> {
        let (subject, html) = render_email(notification);
        let body = json!({
            "from": format!("{} <{}>", self.config.from_name, self.config.from_email),
            "to": [notification.recipient],
            "subject": subject,
            "html": html,
        });

        let response = self
            .client
            .post("https://api.resend.com/emails")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            log::info!(
                "Email sent: kind={:?}, recipient={}",
                notification.kind,
                notification.recipient
            );
            Ok(())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(AppError::ExternalApiError(format!(
                "email sending failed: {error_text}"
            )))
        }
    }
}

/// Picks the Resend sink when a key is configured, otherwise logs only
pub fn sink_from_config(config: &NotificationConfig) -> Arc<dyn NotificationSink> {
    match ResendEmailSink::new(config.clone()) {
        Ok(sink) => Arc::new(sink),
        Err(_) => {
            log::warn!("RESEND_API_KEY not set, notifications will only be logged");
            Arc::new(LogSink)
        }
    }
}
