//! Best-effort delivery of human-readable status messages.

use std::{sync::Arc, time::Duration};

use alloy::transports::http::reqwest::{self, header::CONTENT_TYPE};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook answered with status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

/// Logs `text` and forwards it to `sink`. Delivery failures are logged, never returned.
pub async fn announce(sink: &dyn Notifier, text: &str) {
    info!("{text}");
    if let Err(e) = sink.send(text).await {
        warn!("failed to deliver notification: {e}");
    }
}

/// Console-only sink; [`announce`] already logs every message.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, _text: &str) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload {
    content: String,
}

/// Posts messages to a Discord-compatible webhook as code blocks.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(url: Url) -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_else(|err| {
                warn!(?err, "webhook client build failed; using default client");
                reqwest::Client::new()
            });
        Self { client, url }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            content: format!("```{text}```"),
        };
        let res = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&payload)?)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(NotifyError::Rejected(res.status().as_u16()));
        }
        Ok(())
    }
}

/// A webhook sink when `url` is set, console output otherwise.
pub fn sink_for(url: Option<&Url>) -> Arc<dyn Notifier> {
    match url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    }
}
