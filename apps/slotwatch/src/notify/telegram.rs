use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{MessageSender, SendError};
use crate::store::RecipientId;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Delivers messages through the Telegram Bot API `sendMessage` method
pub struct TelegramSender {
    client: reqwest::Client,
    endpoint: String,
}

impl TelegramSender {
    pub fn new(api_base: &str, token: &str, timeout: Duration) -> Result<Self, SendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let endpoint = format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), token);

        Ok(Self { client, endpoint })
    }
}

#[async_trait::async_trait]
impl MessageSender for TelegramSender {
    async fn send_message(&self, recipient: &RecipientId, text: &str) -> Result<(), SendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "chat_id": recipient.as_str(),
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .await?;

        let status = response.status();
        let body: ApiResponse = response.json().await?;

        if status.is_success() && body.ok {
            Ok(())
        } else {
            Err(SendError::Rejected {
                status: status.as_u16(),
                description: body.description.unwrap_or_default(),
            })
        }
    }
}
