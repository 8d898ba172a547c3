//! Error taxonomy shared by the catalog, resolver, sync worker and slideshow.
//!
//! An empty catalog is not represented here: `CatalogStore::pick_random`
//! returns `None` and the slideshow backs off.

use thiserror::Error;

/// Primary error type for dashboard operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No valid credential could be obtained for a source.
    #[error("credential unavailable for source {source_id}: {reason}")]
    Credential { source_id: i64, reason: String },

    /// Device discovery exhausted its retries.
    #[error("device not found: {name}")]
    DeviceNotFound { name: String },

    /// A display device rejected or did not acknowledge playback.
    #[error("device playback failed: {0}")]
    Playback(String),

    /// URL or download authorization could not be produced for one item.
    #[error("could not resolve {locator}: {reason}")]
    Resolution { locator: String, reason: String },

    /// A remote listing call failed mid-pagination.
    #[error("remote listing failed for source {source_id}: {reason}")]
    SyncTransport { source_id: i64, reason: String },

    /// The referenced source does not exist.
    #[error("unknown source {0}")]
    UnknownSource(i64),

    #[error("catalog: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(#[from] config::ConfigError),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn resolution(locator: impl Into<String>, reason: impl ToString) -> Self {
        Error::Resolution {
            locator: locator.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn credential(source_id: i64, reason: impl ToString) -> Self {
        Error::Credential {
            source_id,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn transport(source_id: i64, reason: impl ToString) -> Self {
        Error::SyncTransport {
            source_id,
            reason: reason.to_string(),
        }
    }
}

/// Convenience alias for dashboard results.
pub type Result<T> = std::result::Result<T, Error>;
