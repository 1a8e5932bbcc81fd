//! Data structures and types for aniflow
//!
//! Contains all shared models used across the core organized by domain:
//! - **Tracking**: externally-synced watch progress
//! - **Catalog**: provider search results and audio variants
//! - **Streams**: resolved stream descriptors and qualities
//! - **Debrid**: direct download links and transfers
//! - **Timestamps**: intro/outro skip intervals
//! - **Playback**: persisted resume state

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Tracking Models
// =============================================================================

/// Watch status as understood by the external tracking service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    #[default]
    NotWatching,
    Watching,
    Completed,
    OnHold,
    Dropped,
}

impl fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingStatus::NotWatching => write!(f, "Not Watching"),
            TrackingStatus::Watching => write!(f, "Watching"),
            TrackingStatus::Completed => write!(f, "Completed"),
            TrackingStatus::OnHold => write!(f, "On Hold"),
            TrackingStatus::Dropped => write!(f, "Dropped"),
        }
    }
}

/// Externally-synced watch progress for one anime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Tracking {
    pub watched_episodes: u32,
    pub status: TrackingStatus,
    pub start_date: Option<NaiveDate>,
    pub finish_date: Option<NaiveDate>,
}

/// A tracked show. Identity is the external id; `tracking` is the only
/// field that changes during a watch session and is replaced wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimeReference {
    pub id: i64,
    pub title: String,
    pub total_episodes: Option<u32>,
    pub tracking: Option<Tracking>,
}

impl AnimeReference {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            total_episodes: None,
            tracking: None,
        }
    }

    /// Episodes watched so far, 0 when untracked
    pub fn watched_episodes(&self) -> u32 {
        self.tracking
            .as_ref()
            .map(|t| t.watched_episodes)
            .unwrap_or(0)
    }
}

impl fmt::Display for AnimeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.total_episodes {
            Some(n) => write!(f, "{} ({} eps)", self.title, n),
            None => write!(f, "{}", self.title),
        }
    }
}

// =============================================================================
// Catalog Models
// =============================================================================

/// Audio track variant of the same title
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioVariant {
    Sub,
    Dub,
}

impl fmt::Display for AudioVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioVariant::Sub => write!(f, "Sub"),
            AudioVariant::Dub => write!(f, "Dub"),
        }
    }
}

/// One title resolved against one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogResult {
    pub title: String,
    pub url: String,
    pub audio: AudioVariant,
}

impl fmt::Display for CatalogResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.title, self.audio)
    }
}

/// A title resolved against one provider, split by audio variant.
/// At least one side is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPair {
    pub sub: Option<CatalogResult>,
    pub dub: Option<CatalogResult>,
}

impl ResultPair {
    /// Sub-only pair
    pub fn sub_only(sub: CatalogResult) -> Self {
        Self {
            sub: Some(sub),
            dub: None,
        }
    }

    /// Both variants present
    pub fn both(sub: CatalogResult, dub: CatalogResult) -> Self {
        Self {
            sub: Some(sub),
            dub: Some(dub),
        }
    }

    pub fn has_both(&self) -> bool {
        self.sub.is_some() && self.dub.is_some()
    }

    /// Audio selection rule: `prefer_dub ? (dub ?? sub) : sub`
    pub fn pick(&self, prefer_dub: bool) -> Option<&CatalogResult> {
        if prefer_dub {
            self.dub.as_ref().or(self.sub.as_ref())
        } else {
            self.sub.as_ref()
        }
    }
}

// =============================================================================
// Stream Models
// =============================================================================

/// A playable stream for one episode. Quality labels are stable across
/// re-resolution of the same (url, episode) pair within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// 1-based episode index
    pub episode: u32,
    /// quality label -> source url
    pub qualities: BTreeMap<String, String>,
}

impl StreamDescriptor {
    pub fn new(episode: u32) -> Self {
        Self {
            episode,
            qualities: BTreeMap::new(),
        }
    }

    pub fn with_quality(mut self, label: impl Into<String>, url: impl Into<String>) -> Self {
        self.qualities.insert(label.into(), url.into());
        self
    }

    pub fn quality_labels(&self) -> impl Iterator<Item = &str> {
        self.qualities.keys().map(|s| s.as_str())
    }
}

// =============================================================================
// Debrid Models
// =============================================================================

/// Direct HTTP link produced by a debrid backend from a magnet reference.
/// `episode` is assigned post-hoc from the filename, best effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectDownloadLink {
    pub path: String,
    #[serde(default)]
    pub size: u64,
    pub link: String,
    #[serde(default)]
    pub stream_link: Option<String>,
    #[serde(skip_deserializing)]
    pub episode: Option<u32>,
}

impl DirectDownloadLink {
    /// Final path component, used by the episode heuristic
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Point-in-time snapshot of a debrid transfer. Polled, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub name: String,
    pub progress: Option<f64>,
    pub status: String,
}

impl Transfer {
    pub fn progress_value(&self) -> f64 {
        self.progress.unwrap_or(0.0)
    }
}

// =============================================================================
// Timestamp Models
// =============================================================================

/// Kind of a skip window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkipKind {
    Intro,
    Outro,
}

/// A time window eligible for a one-tap seek-past action.
/// At most one Intro and one Outro per episode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkipInterval {
    pub kind: SkipKind,
    pub start_seconds: f64,
    pub end_seconds: f64,
}

impl SkipInterval {
    pub fn contains(&self, position: f64) -> bool {
        position >= self.start_seconds && position <= self.end_seconds
    }
}

// =============================================================================
// Playback Models
// =============================================================================

/// Persisted resume position for one episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub anime_id: i64,
    pub episode: u32,
    pub position_seconds: f64,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_pair_pick() {
        let sub = CatalogResult {
            title: "Show".into(),
            url: "https://p/show-sub".into(),
            audio: AudioVariant::Sub,
        };
        let dub = CatalogResult {
            title: "Show (Dub)".into(),
            url: "https://p/show-dub".into(),
            audio: AudioVariant::Dub,
        };

        let pair = ResultPair::both(sub.clone(), dub.clone());
        assert_eq!(pair.pick(false), Some(&sub));
        assert_eq!(pair.pick(true), Some(&dub));

        // Dub preferred but absent falls back to sub
        let sub_only = ResultPair::sub_only(sub.clone());
        assert_eq!(sub_only.pick(true), Some(&sub));
        assert!(!sub_only.has_both());
    }

    #[test]
    fn test_skip_interval_contains() {
        let intro = SkipInterval {
            kind: SkipKind::Intro,
            start_seconds: 90.0,
            end_seconds: 180.0,
        };
        assert!(!intro.contains(89.9));
        assert!(intro.contains(90.0));
        assert!(intro.contains(180.0));
        assert!(!intro.contains(180.1));
    }

    #[test]
    fn test_direct_download_link_file_name() {
        let link = DirectDownloadLink {
            path: "Season 1/[Subs] Show - 05 [1080p].mkv".into(),
            size: 0,
            link: "https://dl/x".into(),
            stream_link: None,
            episode: None,
        };
        assert_eq!(link.file_name(), "[Subs] Show - 05 [1080p].mkv");
    }

    #[test]
    fn test_watched_episodes_untracked() {
        let anime = AnimeReference::new(1, "Show");
        assert_eq!(anime.watched_episodes(), 0);
    }

    #[test]
    fn test_stream_descriptor_quality_order_is_stable() {
        let d = StreamDescriptor::new(1)
            .with_quality("720p", "https://a")
            .with_quality("1080p", "https://b");
        let labels: Vec<&str> = d.quality_labels().collect();
        assert_eq!(labels, vec!["1080p", "720p"]);
    }
}
