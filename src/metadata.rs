//! Token metadata documents and URI resolution.
//!
//! Token URIs come in three shapes: plain http(s), content-addressed
//! `ipfs://` URIs resolved through a gateway, and inline `data:` URIs,
//! either base64 or percent-encoded.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;

pub const DEFAULT_IPFS_GATEWAY: &str = "https://ipfs.io/ipfs/";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_RETRIES: u32 = 3;

/// A parsed metadata document. Every field is optional on chain, so
/// everything defaults to empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub attributes: Vec<DocumentTrait>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DocumentTrait {
    #[serde(rename = "trait_type")]
    pub trait_type: String,
    pub value: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("malformed metadata document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported uri scheme in `{0}`")]
    UnsupportedScheme(String),
    #[error("invalid data uri: {0}")]
    DataUri(String),
    #[error("metadata unavailable for `{0}`")]
    Unavailable(String),
}

/// Fetches and parses a metadata document for a token URI.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self, uri: &str) -> Result<TokenDocument, MetadataError>;
}

/// HTTP-backed [`MetadataSource`] with gateway resolution and retries.
pub struct HttpMetadataFetcher {
    client: reqwest::Client,
    ipfs_gateway: String,
}

impl Default for HttpMetadataFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpMetadataFetcher {
    pub fn new() -> Self {
        Self::with_gateway(DEFAULT_IPFS_GATEWAY)
    }

    pub fn with_gateway(gateway: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, ipfs_gateway: gateway.into() }
    }

    async fn get_with_retry(&self, url: &str) -> Result<String, MetadataError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0;
        loop {
            match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.text().await?);
                }
                Ok(response) => {
                    return Err(MetadataError::Status(response.status().as_u16()));
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= MAX_RETRIES {
                        return Err(MetadataError::Http(err));
                    }
                    tracing::debug!(
                        target: "bazaar::metadata",
                        url,
                        attempt,
                        error = %err,
                        "metadata fetch failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataFetcher {
    async fn fetch(&self, uri: &str) -> Result<TokenDocument, MetadataError> {
        let raw = if uri.starts_with("data:") {
            decode_data_uri(uri)?
        } else {
            let url = normalize_uri(uri, &self.ipfs_gateway)?;
            self.get_with_retry(&url).await?
        };
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Rewrites a token URI into a fetchable https URL.
pub fn normalize_uri(uri: &str, gateway: &str) -> Result<String, MetadataError> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(uri.to_string());
    }
    if let Some(rest) = uri.strip_prefix("ipfs://") {
        // Some minters emit ipfs://ipfs/<cid>.
        let cid = rest.strip_prefix("ipfs/").unwrap_or(rest);
        let gateway = gateway.strip_suffix('/').unwrap_or(gateway);
        return Ok(format!("{gateway}/{cid}"));
    }
    Err(MetadataError::UnsupportedScheme(uri.to_string()))
}

fn decode_data_uri(uri: &str) -> Result<String, MetadataError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| MetadataError::DataUri(uri.to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| MetadataError::DataUri("missing payload separator".to_string()))?;
    if header.ends_with(";base64") {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|err| MetadataError::DataUri(err.to_string()))?;
        String::from_utf8(bytes).map_err(|err| MetadataError::DataUri(err.to_string()))
    } else {
        urlencoding::decode(payload)
            .map(|decoded| decoded.into_owned())
            .map_err(|err| MetadataError::DataUri(err.to_string()))
    }
}
