//! Tracking synchronization
//!
//! Computes the canonical "watched episodes" transition and applies it
//! through the external tracking collaborator at most once per qualifying
//! event. Callers must pass monotonically non-decreasing episode numbers for
//! a given anime; the orchestrator's guards enforce that, this module only
//! documents it.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::error::CoreResult;
use crate::models::{AnimeReference, Tracking, TrackingStatus};
use crate::resume::ResumeStore;

/// External tracking service (MAL/AniList-style). The response is
/// authoritative: the service may reject or clamp the submitted value.
#[async_trait]
pub trait TrackingClient: Send + Sync {
    fn is_authenticated(&self) -> bool;

    async fn update(&self, anime_id: i64, tracking: Tracking) -> CoreResult<Tracking>;
}

/// Applies watch-progress transitions exactly once per completed episode
pub struct TrackingSynchronizer {
    client: Arc<dyn TrackingClient>,
    resume: Arc<dyn ResumeStore>,
}

impl TrackingSynchronizer {
    pub fn new(client: Arc<dyn TrackingClient>, resume: Arc<dyn ResumeStore>) -> Self {
        Self { client, resume }
    }

    /// Mark `episode` watched for `anime`.
    ///
    /// Returns `Ok(None)` without side effects when the episode is already
    /// watched (idempotence) or when the tracking backend has no credentials.
    /// On success the completed episode's resume position is reset, and so is
    /// the next episode's when one is already selected.
    pub async fn sync(
        &self,
        anime: &AnimeReference,
        episode: u32,
        next_selected: Option<u32>,
    ) -> CoreResult<Option<Tracking>> {
        if anime.watched_episodes() >= episode {
            return Ok(None);
        }

        if !self.client.is_authenticated() {
            return Ok(None);
        }

        debug!(
            anime = %anime.title,
            from = anime.watched_episodes(),
            to = episode,
            "updating tracking"
        );

        let mut tracking = Tracking {
            watched_episodes: episode,
            status: anime
                .tracking
                .as_ref()
                .map(|t| t.status)
                .unwrap_or_default(),
            start_date: anime.tracking.as_ref().and_then(|t| t.start_date),
            finish_date: None,
        };

        let today = Utc::now().date_naive();
        if anime.total_episodes == Some(episode) {
            tracking.status = TrackingStatus::Completed;
            tracking.finish_date = Some(today);
        } else if episode == 1 {
            tracking.status = TrackingStatus::Watching;
            tracking.start_date = Some(today);
        }

        let applied = self.client.update(anime.id, tracking).await?;

        self.resume.reset(anime.id, episode);
        if let Some(next) = next_selected {
            if next != episode {
                self.resume.reset(anime.id, next);
            }
        }

        Ok(Some(applied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resume::MemoryResumeStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingClient {
        authenticated: bool,
        calls: AtomicUsize,
    }

    impl RecordingClient {
        fn new(authenticated: bool) -> Self {
            Self {
                authenticated,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TrackingClient for RecordingClient {
        fn is_authenticated(&self) -> bool {
            self.authenticated
        }

        async fn update(&self, _anime_id: i64, tracking: Tracking) -> CoreResult<Tracking> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(tracking)
        }
    }

    fn anime_with(watched: u32, total: Option<u32>) -> AnimeReference {
        let mut anime = AnimeReference::new(7, "Show");
        anime.total_episodes = total;
        if watched > 0 {
            anime.tracking = Some(Tracking {
                watched_episodes: watched,
                status: TrackingStatus::Watching,
                start_date: None,
                finish_date: None,
            });
        }
        anime
    }

    #[tokio::test]
    async fn test_sync_advances_progress() {
        let client = Arc::new(RecordingClient::new(true));
        let resume = Arc::new(MemoryResumeStore::new());
        let sync = TrackingSynchronizer::new(client.clone(), resume.clone());

        resume.update(7, 5, 1300.0);
        resume.update(7, 6, 42.0);

        let anime = anime_with(4, Some(12));
        let applied = sync.sync(&anime, 5, Some(6)).await.unwrap().unwrap();

        assert_eq!(applied.watched_episodes, 5);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        // completed episode and pre-selected next episode start fresh
        assert_eq!(resume.get_time(7, 5), 0.0);
        assert_eq!(resume.get_time(7, 6), 0.0);
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let client = Arc::new(RecordingClient::new(true));
        let resume = Arc::new(MemoryResumeStore::new());
        let sync = TrackingSynchronizer::new(client.clone(), resume.clone());

        let anime = anime_with(5, Some(12));
        resume.update(7, 5, 900.0);

        // episode 5 already watched: no call, no resume reset
        assert!(sync.sync(&anime, 5, None).await.unwrap().is_none());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(resume.get_time(7, 5), 900.0);
    }

    #[tokio::test]
    async fn test_first_episode_starts_watching() {
        let client = Arc::new(RecordingClient::new(true));
        let sync = TrackingSynchronizer::new(client, Arc::new(MemoryResumeStore::new()));

        let anime = anime_with(0, Some(12));
        let applied = sync.sync(&anime, 1, None).await.unwrap().unwrap();
        assert_eq!(applied.status, TrackingStatus::Watching);
        assert!(applied.start_date.is_some());
        assert!(applied.finish_date.is_none());
    }

    #[tokio::test]
    async fn test_final_episode_completes() {
        let client = Arc::new(RecordingClient::new(true));
        let sync = TrackingSynchronizer::new(client, Arc::new(MemoryResumeStore::new()));

        let anime = anime_with(11, Some(12));
        let applied = sync.sync(&anime, 12, None).await.unwrap().unwrap();
        assert_eq!(applied.status, TrackingStatus::Completed);
        assert!(applied.finish_date.is_some());
    }

    #[tokio::test]
    async fn test_unauthenticated_is_silent() {
        let client = Arc::new(RecordingClient::new(false));
        let sync = TrackingSynchronizer::new(client.clone(), Arc::new(MemoryResumeStore::new()));

        let anime = anime_with(4, Some(12));
        assert!(sync.sync(&anime, 5, None).await.unwrap().is_none());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }
}
