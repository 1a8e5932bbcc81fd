//! Intro/outro skip windows
//!
//! Resolves skip intervals for an episode from an external timestamp source
//! and caches them per (anime, episode) for the session. Third-party
//! timestamp data can be imprecise: an interval whose start lies beyond the
//! reported duration is treated as absent, which makes the orchestrator fall
//! back to tail-triggered completion.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::error::CoreResult;
use crate::models::{SkipInterval, SkipKind};

const ANISKIP_API: &str = "https://api.aniskip.com";

/// External timestamp collaborator
#[async_trait]
pub trait SkipTimeSource: Send + Sync {
    async fn skip_times(
        &self,
        anime_id: i64,
        episode: u32,
        duration_seconds: f64,
    ) -> CoreResult<Vec<SkipInterval>>;
}

// =============================================================================
// Timestamps Service (caching)
// =============================================================================

/// Session-scoped caching layer over a [`SkipTimeSource`]
pub struct TimestampsService {
    source: Arc<dyn SkipTimeSource>,
    cache: Mutex<HashMap<(i64, u32), Vec<SkipInterval>>>,
}

impl TimestampsService {
    pub fn new(source: Arc<dyn SkipTimeSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Intervals for an episode: at most one Intro and one Outro, both
    /// starting within the reported duration.
    pub async fn get_timestamps(
        &self,
        anime_id: i64,
        episode: u32,
        duration_seconds: f64,
    ) -> CoreResult<Vec<SkipInterval>> {
        if let Some(hit) = self
            .cache
            .lock()
            .expect("timestamp cache poisoned")
            .get(&(anime_id, episode))
        {
            return Ok(hit.clone());
        }

        let raw = self
            .source
            .skip_times(anime_id, episode, duration_seconds)
            .await?;
        let intervals = normalize(raw, duration_seconds);

        debug!(anime_id, episode, count = intervals.len(), "skip intervals resolved");

        self.cache
            .lock()
            .expect("timestamp cache poisoned")
            .insert((anime_id, episode), intervals.clone());
        Ok(intervals)
    }
}

/// Keep the first interval per kind and drop intervals that start past the
/// player-reported duration.
fn normalize(raw: Vec<SkipInterval>, duration_seconds: f64) -> Vec<SkipInterval> {
    let mut intro = None;
    let mut outro = None;

    for interval in raw {
        if duration_seconds > 0.0 && interval.start_seconds > duration_seconds {
            continue;
        }
        match interval.kind {
            SkipKind::Intro => intro.get_or_insert(interval),
            SkipKind::Outro => outro.get_or_insert(interval),
        };
    }

    intro.into_iter().chain(outro).collect()
}

// =============================================================================
// Aniskip Client
// =============================================================================

/// Aniskip timestamp source
pub struct AniskipClient {
    base_url: String,
    client: reqwest::Client,
}

impl AniskipClient {
    pub fn new() -> Self {
        Self::with_base_url(ANISKIP_API)
    }

    /// Create a client with a custom base URL (for testing)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for AniskipClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SkipTimeSource for AniskipClient {
    async fn skip_times(
        &self,
        anime_id: i64,
        episode: u32,
        duration_seconds: f64,
    ) -> CoreResult<Vec<SkipInterval>> {
        let url = format!(
            "{}/v2/skip-times/{}/{}",
            self.base_url, anime_id, episode
        );

        let response: SkipTimesResponse = self
            .client
            .get(url)
            .query(&[
                ("types[]", "op"),
                ("types[]", "ed"),
                ("episodeLength", &duration_seconds.to_string()),
            ])
            .send()
            .await?
            .json()
            .await?;

        if !response.found {
            return Ok(Vec::new());
        }

        Ok(response
            .results
            .into_iter()
            .filter_map(|r| r.into_interval())
            .collect())
    }
}

// =============================================================================
// Response Structures (internal deserialization)
// =============================================================================

#[derive(Debug, Deserialize)]
struct SkipTimesResponse {
    #[serde(default)]
    found: bool,
    #[serde(default)]
    results: Vec<SkipTimeRaw>,
}

#[derive(Debug, Deserialize)]
struct SkipTimeRaw {
    #[serde(rename = "skipType")]
    skip_type: String,
    interval: IntervalRaw,
}

#[derive(Debug, Deserialize)]
struct IntervalRaw {
    #[serde(rename = "startTime")]
    start_time: f64,
    #[serde(rename = "endTime")]
    end_time: f64,
}

impl SkipTimeRaw {
    fn into_interval(self) -> Option<SkipInterval> {
        let kind = match self.skip_type.as_str() {
            "op" => SkipKind::Intro,
            "ed" => SkipKind::Outro,
            _ => return None,
        };
        Some(SkipInterval {
            kind,
            start_seconds: self.interval.start_time,
            end_seconds: self.interval.end_time,
        })
    }
}
