use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::ApiConfig;
use crate::messages::ExtractedContext;

/// Where the selection was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceHint {
    #[serde(rename = "whatsapp_web")]
    MessagingClient,
    #[serde(rename = "generic_web")]
    Generic,
}

/// Body of a token-mode send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundPayload {
    pub text: String,
    pub page_url: String,
    pub source_hint: SourceHint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ExtractedContext>,
}

/// Body of a phone-mode send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneOrder {
    pub phone: String,
    pub body_text: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized (401): {body}")]
    Unauthorized { body: String },
    #[error("backend error ({status}): {body}")]
    Status { status: StatusCode, body: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Client for the Wady inbox API.
pub struct InboxClient {
    client: reqwest::Client,
    config: ApiConfig,
}

impl InboxClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// Token mode: bearer-authenticated ingest of one selection.
    pub async fn send_message(
        &self,
        token: &str,
        payload: &OutboundPayload,
    ) -> Result<Value, ApiError> {
        let url = self.config.messages_url();
        debug!("Posting selection to {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await?;

        read_response(response).await
    }

    /// Phone mode: unauthenticated order post.
    pub async fn send_order(&self, order: &PhoneOrder) -> Result<Value, ApiError> {
        let url = self.config.phone_url();
        debug!("Posting order to {}", url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(order)
            .send()
            .await?;

        read_response(response).await
    }
}

/// Map non-2xx to errors; a 2xx body that is not JSON reads as `{}`.
async fn read_response(response: reqwest::Response) -> Result<Value, ApiError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Unauthorized { body });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status { status, body });
    }

    let body = response.text().await.unwrap_or_default();
    Ok(serde_json::from_str(&body).unwrap_or_else(|_| Value::Object(Default::default())))
}
