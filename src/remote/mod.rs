//! Clients for the remote sources the catalog indexes.
//!
//! The sync worker and resolver only see the traits here; the bundled
//! implementations talk to Backblaze B2 and the Google Photos Library API.

pub mod b2;
pub mod photos;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

pub use b2::B2Client;
pub use photos::PhotosClient;

/// Authorized session against an object store account.
#[derive(Debug, Clone)]
pub struct BucketSession {
    pub account_id: String,
    pub api_url: String,
    /// Base for building direct download URLs.
    pub download_url: String,
    pub auth_token: String,
}

/// One object from a bucket listing.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFile {
    pub file_id: String,
    pub name: String,
    pub content_type: Option<String>,
    pub size: Option<i64>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct FilePage {
    pub files: Vec<RemoteFile>,
    /// Name to resume the listing from, `None` on the last page.
    pub next: Option<String>,
}

/// One media item from a photo library.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteMedia {
    pub id: String,
    /// Transient URL, expires independently of any local state.
    pub base_url: String,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct MediaPage {
    pub items: Vec<RemoteMedia>,
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn authorize(&self, key_id: &str, application_key: &str) -> Result<BucketSession>;

    async fn list_file_names(
        &self,
        session: &BucketSession,
        bucket: &str,
        start_file_name: Option<&str>,
    ) -> Result<FilePage>;

    /// Token valid for downloads of any object in `bucket`.
    async fn download_authorization(
        &self,
        session: &BucketSession,
        bucket: &str,
        valid_for: Duration,
    ) -> Result<String>;
}

#[async_trait]
pub trait PhotoLibrary: Send + Sync {
    async fn list_media(&self, access_token: &str, page_token: Option<&str>) -> Result<MediaPage>;

    async fn get_media(&self, access_token: &str, media_id: &str) -> Result<RemoteMedia>;
}
