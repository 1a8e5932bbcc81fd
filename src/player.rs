//! Media-player collaborator contract
//!
//! The core drives playback imperatively and consumes player events after
//! the shell marshals them onto the decision loop (see
//! [`crate::orchestrator::PlaybackOrchestrator::player_event`]). No player
//! implementation lives in the core; [`NullPlayer`] exists for wiring and
//! tests.

use crate::error::CoreResult;

/// Imperative playback surface
pub trait MediaPlayer: Send + Sync {
    fn set_media(&self, url: &str) -> CoreResult<()>;

    /// Start playback from an offset (0 = from the beginning)
    fn play(&self, from_seconds: f64) -> CoreResult<()>;

    fn pause(&self) -> CoreResult<()>;

    fn seek(&self, position_seconds: f64) -> CoreResult<()>;
}

/// Player-originated events, already marshalled onto the decision loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerEvent {
    /// Current position tick, in seconds
    PositionChanged(f64),
    /// Media duration became known or changed, in seconds
    DurationChanged(f64),
    Playing,
    Paused,
    PlaybackEnded,
}

/// Player that accepts every command and does nothing
#[derive(Debug, Default)]
pub struct NullPlayer;

impl MediaPlayer for NullPlayer {
    fn set_media(&self, _url: &str) -> CoreResult<()> {
        Ok(())
    }

    fn play(&self, _from_seconds: f64) -> CoreResult<()> {
        Ok(())
    }

    fn pause(&self) -> CoreResult<()> {
        Ok(())
    }

    fn seek(&self, _position_seconds: f64) -> CoreResult<()> {
        Ok(())
    }
}
