/// Notification fan-out
///
/// Delivery is best-effort: every recipient is tried once, concurrently, and
/// a failure for one recipient never affects the others or the caller.
pub mod telegram;

pub use telegram::TelegramSender;

use chrono::{DateTime, Local};
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::RecipientId;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("message transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("message rejected ({status}): {description}")]
    Rejected { status: u16, description: String },
}

/// Delivers a single text message to one recipient
#[async_trait::async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, recipient: &RecipientId, text: &str) -> Result<(), SendError>;
}

/// Writes messages to the log instead of delivering them
#[derive(Debug, Default)]
pub struct LogSender;

#[async_trait::async_trait]
impl MessageSender for LogSender {
    async fn send_message(&self, recipient: &RecipientId, text: &str) -> Result<(), SendError> {
        info!(%recipient, "{text}");
        Ok(())
    }
}

/// A target was booked
#[derive(Debug, Clone)]
pub struct SuccessEvent {
    pub target_name: String,
    pub timestamp: DateTime<Local>,
}

impl SuccessEvent {
    pub fn now(target_name: impl Into<String>) -> Self {
        Self { target_name: target_name.into(), timestamp: Local::now() }
    }

    /// HTML message body
    pub fn render(&self) -> String {
        format!(
            "SUCCESS!\n\nTime: {}\nResult: <b><i>{}</i></b> was booked successfully!",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            escape_html(&self.target_name),
        )
    }
}

/// Outcome of one fan-out
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: Vec<(RecipientId, String)>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed.len()
    }
}

pub struct Notifier {
    sender: Arc<dyn MessageSender>,
}

impl Notifier {
    pub fn new(sender: Arc<dyn MessageSender>) -> Self {
        Self { sender }
    }

    /// Tell every recipient that a target succeeded
    pub async fn notify(&self, recipients: &[RecipientId], event: &SuccessEvent) -> DeliveryReport {
        info!(
            slot = %event.target_name,
            recipients = recipients.len(),
            "Sending success notification"
        );
        self.broadcast(recipients, &event.render()).await
    }

    /// Send `text` to each recipient independently.
    ///
    /// All outcomes are gathered; failures are logged and reported, never
    /// propagated or retried.
    pub async fn broadcast(&self, recipients: &[RecipientId], text: &str) -> DeliveryReport {
        let deliveries = recipients.iter().map(|recipient| async move {
            let outcome = self.sender.send_message(recipient, text).await;
            (recipient, outcome)
        });

        let mut report = DeliveryReport::default();
        for (recipient, outcome) in join_all(deliveries).await {
            match outcome {
                Ok(()) => {
                    debug!(%recipient, "Message delivered");
                    report.delivered += 1;
                }
                Err(error) => {
                    warn!(%recipient, %error, "Failed to deliver message");
                    report.failed.push((recipient.clone(), error.to_string()));
                }
            }
        }
        report
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
