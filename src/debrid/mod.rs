//! Debrid resolution: magnet references to direct HTTP links
//!
//! `DebridContext` routes every call to the backend currently selected in
//! settings. The selection is read fresh per call, so a runtime
//! reconfiguration never leaves a stale backend in play. Missing credentials
//! short-circuit to empty/false results instead of erroring, which lets the
//! orchestrator silently skip debrid-backed resolution when unconfigured.

pub mod premiumize;

pub use premiumize::PremiumizeClient;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::models::{DirectDownloadLink, StreamDescriptor, Transfer};
use crate::provider::StreamResolver;
use crate::settings::SettingsStore;

// =============================================================================
// Contract
// =============================================================================

/// Closed set of known debrid backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DebridKind {
    #[default]
    Premiumize,
    RealDebrid,
}

impl fmt::Display for DebridKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebridKind::Premiumize => write!(f, "Premiumize"),
            DebridKind::RealDebrid => write!(f, "Real-Debrid"),
        }
    }
}

/// One debrid backend. Implementations own their transport encoding.
#[async_trait]
pub trait DebridService: Send + Sync {
    fn kind(&self) -> DebridKind;

    /// Whether a usable credential is configured
    fn is_authenticated(&self) -> bool;

    /// Cached-availability check. `Ok(false)` when no credential is set.
    async fn check(&self, magnet: &str) -> CoreResult<bool>;

    /// Convert a magnet reference to direct links. Empty on missing credential.
    async fn direct_download_links(&self, magnet: &str) -> CoreResult<Vec<DirectDownloadLink>>;

    /// Start a transfer; returns its id without waiting for completion
    async fn create_transfer(&self, magnet: &str) -> CoreResult<String>;

    /// Point-in-time transfer snapshot; callers own their polling cadence
    async fn transfers(&self) -> CoreResult<Vec<Transfer>>;
}

// =============================================================================
// Episode Heuristic
// =============================================================================

/// Best-effort episode index extraction from a free-form release filename.
/// Returns None when nothing matches; absence is not an error.
pub fn parse_episode_number(file_name: &str) -> Option<u32> {
    // Ordered: explicit episode markers first, bare "- NN" separators last
    let patterns = [
        r"S\d+E(\d{1,4})",
        r"[Ee](?:pisode|p)\.?\s*(\d{1,4})",
        r"#(\d{1,4})",
        r"-\s*(\d{1,4})(?:\s|\.|\[|v\d|$)",
    ];

    for pattern in patterns {
        let re = Regex::new(pattern).ok()?;
        if let Some(caps) = re.captures(file_name) {
            if let Some(num) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
                return Some(num);
            }
        }
    }

    None
}

// =============================================================================
// Debrid Context
// =============================================================================

/// Routes magnet operations to the backend selected in live settings.
/// The backend registry is immutable after construction; only the *selection*
/// changes at runtime, and it is re-read on every call.
pub struct DebridContext {
    services: HashMap<DebridKind, Arc<dyn DebridService>>,
    settings: Arc<SettingsStore>,
    transfer_created: broadcast::Sender<String>,
}

impl DebridContext {
    pub fn new(services: Vec<Arc<dyn DebridService>>, settings: Arc<SettingsStore>) -> Self {
        let services = services.into_iter().map(|s| (s.kind(), s)).collect();
        let (transfer_created, _) = broadcast::channel(16);
        Self {
            services,
            settings,
            transfer_created,
        }
    }

    /// Notifications for every transfer created through this context,
    /// consumed by progress-polling collaborators.
    pub fn transfer_created(&self) -> broadcast::Receiver<String> {
        self.transfer_created.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.active()
            .map(|s| s.is_authenticated())
            .unwrap_or(false)
    }

    pub async fn check(&self, magnet: &str) -> CoreResult<bool> {
        match self.active() {
            Some(service) => service.check(magnet).await,
            None => Ok(false),
        }
    }

    /// Direct links with episode indices assigned from filenames
    pub async fn direct_download_links(
        &self,
        magnet: &str,
    ) -> CoreResult<Vec<DirectDownloadLink>> {
        let Some(service) = self.active() else {
            return Ok(Vec::new());
        };

        let mut links = service.direct_download_links(magnet).await?;
        for link in &mut links {
            link.episode = parse_episode_number(link.file_name());
            if link.episode.is_none() {
                debug!(file = link.file_name(), "no episode number in filename");
            }
        }
        Ok(links)
    }

    pub async fn create_transfer(&self, magnet: &str) -> CoreResult<String> {
        let Some(service) = self.active() else {
            return Ok(String::new());
        };

        let id = service.create_transfer(magnet).await?;
        if !id.is_empty() {
            // receivers may come and go; a lagging or absent consumer is fine
            let _ = self.transfer_created.send(id.clone());
        }
        Ok(id)
    }

    pub async fn transfers(&self) -> CoreResult<Vec<Transfer>> {
        match self.active() {
            Some(service) => service.transfers().await,
            None => Ok(Vec::new()),
        }
    }

    /// Backend for the kind selected in the current settings snapshot
    fn active(&self) -> Option<&Arc<dyn DebridService>> {
        let kind = self.settings.snapshot().debrid_service;
        let service = self.services.get(&kind);
        if service.is_none() {
            warn!(%kind, "selected debrid backend is not registered");
        }
        service
    }
}

// =============================================================================
// Debrid-backed Stream Resolver
// =============================================================================

/// `StreamResolver` over a magnet reference: episodes are the links whose
/// filenames carried an index, each exposed under a single "default" quality.
pub struct DebridStreamResolver {
    context: Arc<DebridContext>,
}

impl DebridStreamResolver {
    pub fn new(context: Arc<DebridContext>) -> Self {
        Self { context }
    }

    async fn indexed_links(&self, magnet: &str) -> CoreResult<Vec<DirectDownloadLink>> {
        let mut links: Vec<_> = self
            .context
            .direct_download_links(magnet)
            .await?
            .into_iter()
            .filter(|l| l.episode.is_some())
            .collect();
        links.sort_by_key(|l| l.episode);
        Ok(links)
    }
}

#[async_trait]
impl StreamResolver for DebridStreamResolver {
    async fn episode_count(&self, magnet: &str) -> CoreResult<u32> {
        Ok(self.indexed_links(magnet).await?.len() as u32)
    }

    async fn resolve_stream(&self, magnet: &str, episode: u32) -> CoreResult<StreamDescriptor> {
        let links = self.indexed_links(magnet).await?;
        let total = links.len() as u32;

        let link = links
            .into_iter()
            .find(|l| l.episode == Some(episode))
            .ok_or(CoreError::EpisodeOutOfRange {
                requested: episode,
                total,
            })?;

        let url = link.stream_link.clone().unwrap_or_else(|| link.link.clone());
        Ok(StreamDescriptor::new(episode).with_quality("default", url))
    }
}
