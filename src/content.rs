//! Remote project content: link policy, fetching, and content hashing

use crate::config::FetchConfig;
use crate::crypto::sha256_hex;
use crate::error::{CredError, Result};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

const GITHUB_HOST: &str = "github.com";
const GITHUB_RAW_HOST: &str = "raw.githubusercontent.com";
const LINKEDIN_HOST: &str = "linkedin.com";

/// Rewrite a project link into the URL whose bytes get hashed.
///
/// GitHub page links are turned into raw-content links so the hash covers the
/// file itself rather than the rendered HTML around it.
pub fn normalize_project_link(link: &str) -> Result<String> {
    let link = link.trim();
    if link.is_empty() {
        return Err(CredError::InvalidInput("Link is required".to_string()));
    }

    let parsed = Url::parse(link)
        .map_err(|e| CredError::InvalidInput(format!("Invalid link: {}", e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(CredError::InvalidInput(
            "Link must be an http(s) URL".to_string(),
        ));
    }

    if link.contains(GITHUB_HOST) && !link.contains(GITHUB_RAW_HOST) {
        Ok(link
            .replace(GITHUB_HOST, GITHUB_RAW_HOST)
            .replace("/blob/", "/"))
    } else {
        Ok(link.to_string())
    }
}

/// Profile links must point at GitHub or LinkedIn.
pub fn validate_profile_link(link: &str) -> Result<()> {
    if link.contains(GITHUB_HOST) || link.contains(LINKEDIN_HOST) {
        Ok(())
    } else {
        Err(CredError::InvalidInput("Not a valid link".to_string()))
    }
}

pub fn hash_content(bytes: &[u8]) -> String {
    sha256_hex(bytes)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedContent {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchedContent {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Source of remote bytes. Transport failures are errors; HTTP error statuses are not.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedContent>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| CredError::FetchError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedContent> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CredError::FetchError(e.to_string()))?;

        let status = response.status().as_u16();
        if let Some(len) = response.content_length() {
            if len as usize > self.max_body_bytes {
                return Err(CredError::FetchError(format!(
                    "Content of {} bytes exceeds the {} byte limit",
                    len, self.max_body_bytes
                )));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| CredError::FetchError(e.to_string()))?
        {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(CredError::FetchError(format!(
                    "Content exceeds the {} byte limit",
                    self.max_body_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(url = %url, status, bytes = body.len(), "content.fetched");
        Ok(FetchedContent { status, body })
    }
}
