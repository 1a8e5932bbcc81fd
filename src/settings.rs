//! Settings snapshot and change notifications
//!
//! The core never reads mutable settings in place: every consumer takes a
//! copy-on-read snapshot at call time through [`SettingsStore::snapshot`],
//! and long-lived consumers subscribe to changes through a watch channel.
//! Persistence is a best-effort toml file at ~/.config/aniflow/settings.toml

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::watch;

use crate::debrid::DebridKind;
use crate::provider::ProviderKind;

/// Read-only settings snapshot consumed by the core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Pick the Dub variant when a result pair has one
    pub prefer_dub: bool,
    /// Provider bound at session start
    pub default_provider: ProviderKind,
    /// Active debrid backend, read fresh on every debrid call
    pub debrid_service: DebridKind,
    /// Premiumize credential; absent means debrid calls short-circuit
    pub premiumize_api_key: Option<String>,
    /// Offer the manual timestamp-submission flow when intervals are missing
    pub contribute_timestamps: bool,
    /// Fixed-length manual opening skip
    pub opening_skip_seconds: f64,
    /// Tail-triggered completion fires when remaining time drops below this
    pub completion_threshold_seconds: f64,
    /// Queries shorter than this never issue a search request
    pub min_query_length: usize,
    /// Resume positions below this are not worth persisting
    pub resume_min_position_seconds: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            prefer_dub: false,
            default_provider: ProviderKind::default(),
            debrid_service: DebridKind::default(),
            premiumize_api_key: None,
            contribute_timestamps: false,
            opening_skip_seconds: 85.0,
            completion_threshold_seconds: 120.0,
            min_query_length: 4,
            resume_min_position_seconds: 10.0,
        }
    }
}

impl Settings {
    /// Get settings file path (~/.config/aniflow/settings.toml)
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("aniflow").join("settings.toml"))
    }

    /// Load settings from file, or return default if not found
    pub fn load() -> Self {
        Self::path()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save settings to file
    pub fn save(&self) -> Result<()> {
        let path =
            Self::path().ok_or_else(|| anyhow::anyhow!("Could not determine settings path"))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml = toml::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }
}

/// Live settings holder. Mutations go through [`SettingsStore::update`],
/// which notifies all subscribed watchers.
#[derive(Debug)]
pub struct SettingsStore {
    tx: watch::Sender<Settings>,
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        let (tx, _) = watch::channel(settings);
        Self { tx }
    }

    /// Current snapshot, captured at call time
    pub fn snapshot(&self) -> Settings {
        self.tx.borrow().clone()
    }

    /// Apply a mutation and notify watchers
    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        self.tx.send_modify(f);
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
