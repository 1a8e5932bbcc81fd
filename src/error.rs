//! Error taxonomy for the orchestration core
//!
//! Resolution failures are recoverable: they are logged, surfaced for
//! observability and leave the affected derived state unset. Missing
//! credentials are never errors; unauthenticated backends report empty/false
//! results instead. Only persistent-storage write failures are user-visible
//! fatal conditions for the current session segment.

use thiserror::Error;

/// Errors produced by the orchestration core
#[derive(Debug, Error)]
pub enum CoreError {
    /// Network or parse failure from a provider or debrid backend.
    /// Recoverable; never retried by the core.
    #[error("resolution via {source_name} failed: {cause}")]
    ResolutionFailed {
        source_name: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Requested episode exceeds the provider-reported count.
    /// Recoverable; selection reverts to the last valid value.
    #[error("episode {requested} out of range (1..={total})")]
    EpisodeOutOfRange { requested: u32, total: u32 },

    /// Persistent-storage write failure for resume state or tracking
    #[error("storage error: {0}")]
    Storage(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Wrap a transport/parse failure with the name of the source it came from
    pub fn resolution(
        source_name: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        CoreError::ResolutionFailed {
            source_name: source_name.into(),
            cause: Box::new(cause),
        }
    }

    /// True for failures the orchestrator absorbs without tearing down state
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CoreError::Storage(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
