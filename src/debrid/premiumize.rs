//! Premiumize debrid backend
//!
//! JSON-over-HTTPS client for the Premiumize API. The API key is read from
//! the live settings snapshot on every call, so a key pasted into settings
//! mid-session takes effect on the next request.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use super::{DebridKind, DebridService};
use crate::error::CoreResult;
use crate::models::{DirectDownloadLink, Transfer};
use crate::settings::SettingsStore;

const PREMIUMIZE_API: &str = "https://www.premiumize.me/api";

/// Premiumize API client
pub struct PremiumizeClient {
    base_url: String,
    client: reqwest::Client,
    settings: Arc<SettingsStore>,
}

impl PremiumizeClient {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self::with_base_url(settings, PREMIUMIZE_API)
    }

    /// Create a client with a custom base URL (for testing)
    pub fn with_base_url(settings: Arc<SettingsStore>, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            settings,
        }
    }

    fn api_key(&self) -> Option<String> {
        self.settings
            .snapshot()
            .premiumize_api_key
            .filter(|k| !k.is_empty())
    }

    /// Whether the configured key belongs to an active premium account
    pub async fn is_premium(&self) -> CoreResult<bool> {
        let Some(key) = self.api_key() else {
            return Ok(false);
        };

        let response: AccountInfoResponse = self
            .client
            .get(format!("{}/account/info", self.base_url))
            .query(&[("apikey", key.as_str())])
            .send()
            .await?
            .json()
            .await?;

        Ok(response.premium_until.unwrap_or(0) > 0)
    }
}

#[async_trait]
impl DebridService for PremiumizeClient {
    fn kind(&self) -> DebridKind {
        DebridKind::Premiumize
    }

    fn is_authenticated(&self) -> bool {
        self.api_key().is_some()
    }

    async fn check(&self, magnet: &str) -> CoreResult<bool> {
        let Some(key) = self.api_key() else {
            return Ok(false);
        };

        let response: CacheCheckResponse = self
            .client
            .get(format!("{}/cache/check", self.base_url))
            .query(&[("apikey", key.as_str()), ("items[]", magnet)])
            .send()
            .await?
            .json()
            .await?;

        Ok(response.response.iter().any(|cached| *cached))
    }

    async fn direct_download_links(&self, magnet: &str) -> CoreResult<Vec<DirectDownloadLink>> {
        let Some(key) = self.api_key() else {
            return Ok(Vec::new());
        };

        let response: DirectDlResponse = self
            .client
            .post(format!(
                "{}/transfer/directdl?apikey={}",
                self.base_url, key
            ))
            .form(&[("src", magnet)])
            .send()
            .await?
            .json()
            .await?;

        Ok(response.content.unwrap_or_default())
    }

    async fn create_transfer(&self, magnet: &str) -> CoreResult<String> {
        let Some(key) = self.api_key() else {
            return Ok(String::new());
        };

        let response: CreateTransferResponse = self
            .client
            .post(format!("{}/transfer/create?apikey={}", self.base_url, key))
            .form(&[("src", magnet)])
            .send()
            .await?
            .json()
            .await?;

        Ok(response.id.unwrap_or_default())
    }

    async fn transfers(&self) -> CoreResult<Vec<Transfer>> {
        let Some(key) = self.api_key() else {
            return Ok(Vec::new());
        };

        let response: TransferListResponse = self
            .client
            .get(format!("{}/transfer/list", self.base_url))
            .query(&[("apikey", key.as_str())])
            .send()
            .await?
            .json()
            .await?;

        Ok(response.transfers.unwrap_or_default())
    }
}

// =============================================================================
// Response Structures (internal deserialization)
// =============================================================================

#[derive(Debug, Deserialize)]
struct CacheCheckResponse {
    #[serde(default)]
    response: Vec<bool>,
}

#[derive(Debug, Deserialize)]
struct DirectDlResponse {
    content: Option<Vec<DirectDownloadLink>>,
}

#[derive(Debug, Deserialize)]
struct CreateTransferResponse {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransferListResponse {
    transfers: Option<Vec<Transfer>>,
}

#[derive(Debug, Deserialize)]
struct AccountInfoResponse {
    premium_until: Option<i64>,
}
