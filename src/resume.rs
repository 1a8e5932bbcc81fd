//! Resume-position storage
//!
//! The core reads and writes resume positions only through [`ResumeStore`];
//! durable persistence belongs to the shell. [`MemoryResumeStore`] is the
//! session-scoped default and the test double.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::CoreResult;
use crate::models::PlaybackState;

/// Resume-state collaborator contract
pub trait ResumeStore: Send + Sync {
    /// Record the position for an episode
    fn update(&self, anime_id: i64, episode: u32, position_seconds: f64);

    /// Last recorded position, 0 when none
    fn get_time(&self, anime_id: i64, episode: u32) -> f64;

    /// Forget the position so a replay starts from the beginning
    fn reset(&self, anime_id: i64, episode: u32);

    /// Flush to durable storage (shutdown hook)
    fn store_state(&self) -> CoreResult<()>;
}

/// In-memory resume store, volatile for the session
#[derive(Default)]
pub struct MemoryResumeStore {
    states: Mutex<HashMap<(i64, u32), PlaybackState>>,
}

impl MemoryResumeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResumeStore for MemoryResumeStore {
    fn update(&self, anime_id: i64, episode: u32, position_seconds: f64) {
        let mut states = self.states.lock().expect("resume store poisoned");
        states.insert(
            (anime_id, episode),
            PlaybackState {
                anime_id,
                episode,
                position_seconds,
                last_updated: Utc::now(),
            },
        );
    }

    fn get_time(&self, anime_id: i64, episode: u32) -> f64 {
        self.states
            .lock()
            .expect("resume store poisoned")
            .get(&(anime_id, episode))
            .map(|s| s.position_seconds)
            .unwrap_or(0.0)
    }

    fn reset(&self, anime_id: i64, episode: u32) {
        self.states
            .lock()
            .expect("resume store poisoned")
            .remove(&(anime_id, episode));
    }

    fn store_state(&self) -> CoreResult<()> {
        Ok(())
    }
}
