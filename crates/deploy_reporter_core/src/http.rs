use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::debug;

use crate::config::HttpSettings;

/// Blocking HTTP client shared by the tracker, wiki and chat collaborators.
pub struct ApiClient {
    client: Client,
    settings: HttpSettings,
    request_count: usize,
}

impl ApiClient {
    pub fn new(settings: HttpSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .user_agent(settings.user_agent.clone())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            settings,
            request_count: 0,
        })
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    pub fn request_json<F>(&mut self, service: &str, build: F) -> Result<Value>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let response = self
            .execute(service, build, false)?
            .ok_or_else(|| anyhow::anyhow!("{service} returned no response"))?;
        response
            .json()
            .with_context(|| format!("failed to decode {service} JSON response"))
    }

    /// Like `request_json`, but a 404 yields `None` instead of an error.
    pub fn request_optional_json<F>(&mut self, service: &str, build: F) -> Result<Option<Value>>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        match self.execute(service, build, true)? {
            Some(response) => response
                .json()
                .map(Some)
                .with_context(|| format!("failed to decode {service} JSON response")),
            None => Ok(None),
        }
    }

    pub fn request_text<F>(&mut self, service: &str, build: F) -> Result<String>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let response = self
            .execute(service, build, false)?
            .ok_or_else(|| anyhow::anyhow!("{service} returned no response"))?;
        response
            .text()
            .with_context(|| format!("failed to read {service} response body"))
    }

    fn execute<F>(&mut self, service: &str, build: F, allow_missing: bool) -> Result<Option<Response>>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let max_retries = self.settings.max_retries;
        for attempt in 0..=max_retries {
            self.request_count += 1;
            match build(&self.client).send() {
                Ok(response) => {
                    let status = response.status();
                    if allow_missing && status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            debug!(service, %status, attempt, "retrying request");
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        let body = response.text().unwrap_or_default();
                        bail!(
                            "{service} request failed with HTTP {status}: {}",
                            truncate(&body, 300)
                        );
                    }
                    return Ok(Some(response));
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        debug!(service, attempt, "retrying after transport error");
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).with_context(|| format!("failed to call {service}"));
                }
            }
        }

        bail!("{service} request exhausted retry budget")
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .settings
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut output = value.chars().take(max_chars).collect::<String>();
    output.push('…');
    output
}
