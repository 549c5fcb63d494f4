//! Engine error types

use crate::catalog::CatalogError;
use thiserror::Error;

/// Caller-visible engine failures.
///
/// A cache lookup that fell back to stale data is not an error; see
/// [`crate::enrichment::CacheLookup::served_stale`].
#[derive(Debug, Error)]
pub enum Error {
    /// External catalog or playback API failure
    #[error("Upstream catalog error: {0}")]
    Upstream(#[from] CatalogError),

    /// No cached record (and none could be fetched)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Filtering left nothing to rank
    #[error("No candidate tracks match the shuffle preferences")]
    NoCandidates,

    #[error("No active session for user {0}")]
    NoActiveSession(String),

    /// Malformed shuffle preferences or feedback input
    #[error("Validation error: {0}")]
    Validation(String),

    /// One or more enrichment sub-fetches failed
    #[error("Enrichment incomplete: {0}")]
    Enrichment(String),

    #[error("No credential available for user {0}")]
    Credential(String),

    #[error(transparent)]
    Common(#[from] shufl_common::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for failures caused by the external catalog
    pub fn is_upstream(&self) -> bool {
        matches!(self, Error::Upstream(_) | Error::Enrichment(_))
    }
}
