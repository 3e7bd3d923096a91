use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info};

use crate::config::TeamsConfig;
use crate::destination::Destination;
use crate::message::{render, MessageRequest};

/// A message Graph accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostedMessage {
    pub id: String,
    pub url: String,
}

/// A non-success answer from Graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: u16,
    pub message: String,
}

/// Outcome of one delivery attempt that reached Graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Posted(PostedMessage),
    Rejected(Rejection),
}

/// Failures that happen before Graph gives a usable answer.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Failed to send request to {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to parse Graph response ({status}): {source}")]
    Decode {
        status: u16,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    id: String,
    #[serde(rename = "webUrl")]
    web_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

pub struct GraphClient {
    client: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    pub fn new(config: &TeamsConfig) -> Result<Self, GraphError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(GraphError::Client)?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    /// Render `request`, resolve `destination` and deliver it.
    pub async fn send(
        &self,
        access_token: &str,
        destination: &Destination,
        request: &MessageRequest,
    ) -> Result<DeliveryResult, GraphError> {
        let url = destination.url(&self.base_url);
        let markup = render(request);
        info!("Sending message to {}", destination);
        self.deliver(access_token, &url, &markup).await
    }

    /// POST html `markup` to `url`. No retries: every failure is returned
    /// to the caller as-is.
    pub async fn deliver(
        &self,
        access_token: &str,
        url: &str,
        markup: &str,
    ) -> Result<DeliveryResult, GraphError> {
        let payload = json!({
            "body": {
                "contentType": "html",
                "content": markup,
            }
        });

        debug!("Posting to {}: {}", url, markup);

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", access_token))
            .json(&payload)
            .send()
            .await
            .map_err(|source| GraphError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| GraphError::Transport {
                url: url.to_string(),
                source,
            })?;

        if status.is_success() {
            let created: CreatedMessage =
                serde_json::from_str(&body).map_err(|source| GraphError::Decode {
                    status: status.as_u16(),
                    source,
                })?;
            debug!("Posted message {} to {}", created.id, url);
            return Ok(DeliveryResult::Posted(PostedMessage {
                id: created.id,
                url: created.web_url,
            }));
        }

        error!(
            "Status code {}, {}, failed to send message to {}: {}",
            status.as_u16(),
            body,
            url,
            payload
        );

        // Gateways in front of Graph sometimes answer without the JSON error
        // envelope; keep the raw body as the message then.
        let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => envelope.error.message,
            Err(_) if body.trim().is_empty() => status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string(),
            Err(_) => body,
        };

        Ok(DeliveryResult::Rejected(Rejection {
            status: status.as_u16(),
            message,
        }))
    }
}
