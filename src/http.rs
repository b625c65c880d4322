//! JSON-over-HTTP with retry and backoff.
//!
//! Shared by the embedding and LLM providers:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("{service} API error {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("{service} connection error: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },
    #[error("{service} returned an unreadable response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
    #[error("{service} request failed after retries")]
    Exhausted { service: &'static str },
}

pub fn client(timeout_secs: u64) -> Result<Client, RequestError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RequestError::Transport {
            service: "http",
            message: e.to_string(),
        })
}

pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

/// Send the request built by `build` until it succeeds or retries run out,
/// and decode the body as JSON.
pub async fn send_json(
    service: &'static str,
    max_retries: u32,
    build: impl Fn() -> RequestBuilder,
) -> Result<serde_json::Value, RequestError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff(attempt);
            debug!(service, attempt, delay_secs = delay.as_secs(), "Retrying request");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| RequestError::Decode {
                            service,
                            message: e.to_string(),
                        });
                }

                let body = response.text().await.unwrap_or_default();
                let err = RequestError::Status {
                    service,
                    status: status.as_u16(),
                    body,
                };
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                last_err = Some(RequestError::Transport {
                    service,
                    message: e.to_string(),
                });
            }
        }
    }

    Err(last_err.unwrap_or(RequestError::Exhausted { service }))
}
