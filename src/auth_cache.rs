//! Per-bucket cache of time-limited download authorizations.
//!
//! A token is served only while it has at least `refresh_margin` left;
//! otherwise a bucket-wide token is fetched before returning. Failures
//! are never cached.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;

pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(2 * 60 * 60);
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// A download token scoped to a whole bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadAuthorization {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl DownloadAuthorization {
    fn usable_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match chrono::Duration::from_std(margin) {
            Ok(margin) => self.expires_at - now >= margin,
            Err(_) => false,
        }
    }
}

pub struct DownloadAuthCache {
    // Held across the refresh so concurrent callers never double-fetch.
    entries: Mutex<HashMap<String, DownloadAuthorization>>,
    validity: Duration,
    refresh_margin: Duration,
}

impl Default for DownloadAuthCache {
    fn default() -> Self {
        Self::new(DEFAULT_VALIDITY, DEFAULT_REFRESH_MARGIN)
    }
}

impl DownloadAuthCache {
    pub fn new(validity: Duration, refresh_margin: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            validity,
            refresh_margin,
        }
    }

    /// Return a usable token for `bucket`, calling `fetch` with the
    /// validity window when the cached one is missing or close to expiry.
    pub async fn get<F, Fut>(&self, bucket: &str, fetch: F) -> Result<DownloadAuthorization>
    where
        F: FnOnce(Duration) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();

        if let Some(cached) = entries.get(bucket) {
            if cached.usable_at(now, self.refresh_margin) {
                return Ok(cached.clone());
            }
            tracing::debug!("Download authorization for {} near expiry, refreshing", bucket);
        }

        let token = fetch(self.validity).await?;
        let validity = chrono::Duration::from_std(self.validity)
            .map_err(|e| Error::Other(format!("invalid authorization validity: {e}")))?;
        let auth = DownloadAuthorization {
            token,
            expires_at: now + validity,
        };
        entries.insert(bucket.to_string(), auth.clone());
        Ok(auth)
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
