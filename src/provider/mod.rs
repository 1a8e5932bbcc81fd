//! Pluggable content providers
//!
//! A provider is a capability set over one content source: a catalog that
//! searches titles, and a stream resolver that enumerates episodes and
//! fetches playable descriptors. Provider-specific scraping is a black box
//! behind these traits; the core only dictates the contracts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::CoreResult;
use crate::models::{CatalogResult, ResultPair, StreamDescriptor};

// =============================================================================
// Contracts
// =============================================================================

/// Catalog capability: search one content source.
///
/// A returned empty list is a valid "no match" outcome, not an error.
/// Transport and parse failures surface as `CoreError::ResolutionFailed`.
#[async_trait]
pub trait ProviderCatalog: Send + Sync {
    /// Search by free text. Finite, not restartable; a new call re-issues
    /// the underlying request.
    async fn search(&self, query: &str) -> CoreResult<Vec<CatalogResult>>;

    /// Direct external-id lookup. Optional capability; `Ok(None)` signals
    /// "fall back to text search".
    async fn search_by_id(&self, _id: i64) -> CoreResult<Option<ResultPair>> {
        Ok(None)
    }
}

/// Stream capability: enumerate and resolve episodes of one audio variant.
///
/// Idempotent for a fixed `(url, episode)` pair within a session: repeated
/// calls return an equivalent descriptor with stable quality keys.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Number of available episodes behind an audio-variant url
    async fn episode_count(&self, url: &str) -> CoreResult<u32>;

    /// Fetch the playable descriptor for a 1-based episode index.
    /// Fails with `EpisodeOutOfRange` when the index exceeds the count.
    async fn resolve_stream(&self, url: &str, episode: u32) -> CoreResult<StreamDescriptor>;
}

// =============================================================================
// Provider Registry
// =============================================================================

/// Closed set of known providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    GogoAnime,
    AllAnime,
    Yugen,
    /// Magnet-based sources resolved through the debrid context
    Torrent,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::GogoAnime => write!(f, "GogoAnime"),
            ProviderKind::AllAnime => write!(f, "AllAnime"),
            ProviderKind::Yugen => write!(f, "Yugen"),
            ProviderKind::Torrent => write!(f, "Torrent"),
        }
    }
}

/// Catalog + resolver bundle for one provider
#[derive(Clone)]
pub struct ProviderHandle {
    pub catalog: Arc<dyn ProviderCatalog>,
    pub resolver: Arc<dyn StreamResolver>,
}

impl ProviderHandle {
    pub fn new(catalog: Arc<dyn ProviderCatalog>, resolver: Arc<dyn StreamResolver>) -> Self {
        Self { catalog, resolver }
    }
}

/// Immutable registry mapping provider kind to implementation.
/// Built once at startup, looked up by key at call time; never mutated.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, ProviderHandle>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration, used during startup wiring only
    pub fn with(mut self, kind: ProviderKind, handle: ProviderHandle) -> Self {
        self.providers.insert(kind, handle);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&ProviderHandle> {
        self.providers.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ProviderKind> + '_ {
        self.providers.keys().copied()
    }
}
