//! JSON-over-HTTP plumbing shared by the embedding, LLM, and search clients.
//!
//! Retry strategy for [`post_json`]:
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, ... capped at 32s)
//! - other 4xx → fail immediately with [`Error::InvalidResponse`]
//! - connection errors and timeouts → retry
//!
//! When retries are exhausted the last failure is reported as
//! [`Error::UpstreamUnavailable`].

use std::time::Duration;

use crate::error::{Error, Result};

pub fn build_client(timeout_secs: u64, accept_invalid_certs: bool) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()?;
    Ok(client)
}

/// Credentials attached to a request.
#[derive(Debug, Clone, Copy)]
pub enum Auth<'a> {
    None,
    Bearer(&'a str),
    Basic { username: &'a str, password: &'a str },
}

pub async fn post_json(
    client: &reqwest::Client,
    service: &'static str,
    url: &str,
    auth: Auth<'_>,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(service, attempt, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        request = match auth {
            Auth::None => request,
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
        };

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| Error::invalid_response(service, e.to_string()));
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(Error::upstream(
                        service,
                        format!("HTTP {}: {}", status, body_text),
                    ));
                    continue;
                }

                return Err(Error::invalid_response(
                    service,
                    format!("HTTP {}: {}", status, body_text),
                ));
            }
            Err(e) => {
                last_err = Some(Error::upstream(service, format!("{} ({})", e, url)));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::upstream(service, "request failed after retries")))
}
