use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{ExtractOutcome, Extractor};
use crate::error::Result;
use crate::models::Platform;

const DIRECT_MEDIA_EXTENSIONS: [&str; 4] = [".mp4", ".webm", ".mov", ".m4v"];

#[derive(Debug, Serialize)]
struct ResolveRequest<'a> {
    url: &'a str,
    platform: Platform,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum ResolveStatus {
    Ok,
    Error,
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct ResolveResponse {
    status: ResolveStatus,
    url: Option<String>,
    message: Option<String>,
}

impl ResolveResponse {
    fn into_outcome(self) -> ExtractOutcome {
        match self.status {
            ResolveStatus::Ok => match self.url {
                Some(url) if !url.trim().is_empty() => ExtractOutcome::Success(url),
                _ => ExtractOutcome::Error("resolver returned no media url".to_string()),
            },
            ResolveStatus::Error => ExtractOutcome::Error(
                self.message
                    .unwrap_or_else(|| "could not extract video".to_string()),
            ),
            ResolveStatus::Unsupported => ExtractOutcome::NotSupported,
        }
    }
}

/// Extractor backed by an HTTP resolver service.
///
/// The service receives `{"url", "platform"}` and answers with
/// `{"status": "ok" | "error" | "unsupported", "url"?, "message"?}`.
pub struct ResolverClient {
    client: Client,
    endpoint: Option<String>,
}

impl ResolverClient {
    pub fn new(endpoint: Option<String>, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client, endpoint })
    }

    async fn resolve(&self, endpoint: &str, url: &str, platform: Platform) -> Result<ExtractOutcome> {
        let response = self
            .client
            .post(endpoint)
            .json(&ResolveRequest { url, platform })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Ok(ExtractOutcome::Error(format!(
                "resolver request failed: {} {}",
                status,
                body.trim()
            )));
        }

        let body: ResolveResponse = response.json().await?;
        Ok(body.into_outcome())
    }
}

#[async_trait]
impl Extractor for ResolverClient {
    async fn extract(&self, url: &str, platform: Platform) -> ExtractOutcome {
        if let Some(direct) = direct_media_url(url) {
            tracing::debug!("{} is already a media file", url);
            return ExtractOutcome::Success(direct);
        }

        let Some(endpoint) = &self.endpoint else {
            return ExtractOutcome::Error("no resolver endpoint configured".to_string());
        };

        match self.resolve(endpoint, url, platform).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!("Failed to resolve {}: {}", url, e);
                ExtractOutcome::Error(e.to_string())
            }
        }
    }
}

/// Links that already point at a media file need no extraction.
fn direct_media_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let path = url.path().to_ascii_lowercase();
    DIRECT_MEDIA_EXTENSIONS
        .iter()
        .any(|ext| path.ends_with(ext))
        .then(|| url.to_string())
}
