use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use super::types::Target;

/// Why a single probe produced no usable answer
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("endpoint answered with status {0}")]
    Status(StatusCode),
    #[error("response body is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Sends one probe to a target and returns the decoded response body
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &Target) -> Result<Value, ProbeError>;
}

/// POSTs the target's request document as JSON
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("slotwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Prober for HttpProber {
    async fn probe(&self, target: &Target) -> Result<Value, ProbeError> {
        let response = self.client.post(&target.endpoint).json(&target.body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(ProbeError::Decode)
    }
}
