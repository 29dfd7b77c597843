//! HTTP access for adapters
//!
//! The client is created on first use, reused for every attempt of every
//! request the adapter makes, and dropped by [`HttpFetcher::close`], which the
//! adapter's cleanup step calls on every exit path of a run.

use reqwest::{redirect::Policy, Client};
use std::sync::Mutex;
use tariff_common::types::SourceConfig;
use tracing::debug;

use crate::retry::{FetchError, RetryExecutor};

const USER_AGENT: &str = concat!("tariff-pipeline/", env!("CARGO_PKG_VERSION"));
const MAX_REDIRECTS: usize = 10;

/// Response body of a successful fetch
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl FetchedBody {
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.contains("json"))
            .unwrap_or_else(|| {
                let trimmed = self.body.trim_start();
                trimmed.starts_with('{') || trimmed.starts_with('[')
            })
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    config: SourceConfig,
    client: Mutex<Option<Client>>,
}

impl HttpFetcher {
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            config: config.clone(),
            client: Mutex::new(None),
        }
    }

    fn client(&self) -> Result<Client, FetchError> {
        let mut slot = self
            .client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let redirect = if self.config.follow_redirects {
            Policy::limited(MAX_REDIRECTS)
        } else {
            Policy::none()
        };

        let client = Client::builder()
            .timeout(self.config.request_timeout())
            .redirect(redirect)
            .danger_accept_invalid_certs(!self.config.verify_ssl)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::permanent(format!("failed to build HTTP client: {}", e)))?;

        debug!(source_id = %self.config.source_id, "HTTP client created");
        *slot = Some(client.clone());
        Ok(client)
    }

    /// GET `url` through the retry executor
    pub async fn get(
        &self,
        executor: &RetryExecutor,
        url: &str,
    ) -> Result<FetchedBody, FetchError> {
        let client = self.client()?;

        executor
            .execute("GET", url, |_| {
                let client = client.clone();
                async move {
                    let response = client.get(url).send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        return Err(FetchError::from_status(status.as_u16(), url));
                    }

                    let content_type = response
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let final_url = response.url().to_string();
                    let body = response.text().await?;

                    Ok(FetchedBody {
                        url: final_url,
                        status: status.as_u16(),
                        content_type,
                        body,
                    })
                }
            })
            .await
    }

    pub fn is_open(&self) -> bool {
        self.client
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Release the client. Returns whether one was open.
    pub fn close(&self) -> bool {
        let released = self
            .client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .is_some();
        if released {
            debug!(source_id = %self.config.source_id, "HTTP client released");
        }
        released
    }
}
