//! Aniflow - Media acquisition and playback orchestration core
//!
//! Headless engine for an anime watch session: resolves provider catalogs,
//! turns magnets into playable links through debrid backends, drives the
//! player, syncs watch progress and knows where the intros are. Shells
//! (desktop, TUI) sit on top of the orchestrator and its event stream.
//!
//! # Modules
//!
//! - `models` - Shared data structures (tracking, catalog, streams, skips)
//! - `error` - Core error taxonomy
//! - `settings` - Settings snapshots and change notifications
//! - `provider` - Pluggable catalog/stream-resolver contracts and registry
//! - `debrid` - Debrid backends and magnet-to-link resolution
//! - `tracking` - Watch-progress synchronization
//! - `timestamps` - Intro/outro skip windows
//! - `player` - Media-player collaborator contract
//! - `resume` - Resume-position storage
//! - `orchestrator` - The reactive watch-session state machine

pub mod debrid;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod player;
pub mod provider;
pub mod resume;
pub mod settings;
pub mod timestamps;
pub mod tracking;

// Re-export commonly used types
pub use models::{
    AnimeReference, AudioVariant, CatalogResult, DirectDownloadLink, PlaybackState, ResultPair,
    SkipInterval, SkipKind, StreamDescriptor, Tracking, TrackingStatus, Transfer,
};

pub use debrid::{DebridContext, DebridKind, DebridService, DebridStreamResolver, PremiumizeClient};
pub use error::{CoreError, CoreResult};
pub use orchestrator::{ChoiceRequester, CoreEvent, LocalMediaSource, PlaybackOrchestrator};
pub use player::{MediaPlayer, NullPlayer, PlayerEvent};
pub use provider::{ProviderCatalog, ProviderHandle, ProviderKind, ProviderRegistry, StreamResolver};
pub use resume::{MemoryResumeStore, ResumeStore};
pub use settings::{Settings, SettingsStore};
pub use timestamps::{AniskipClient, SkipTimeSource, TimestampsService};
pub use tracking::{TrackingClient, TrackingSynchronizer};
