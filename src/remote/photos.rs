//! Google Photos Library API client.

use crate::error::Result;
use super::{MediaPage, PhotoLibrary, RemoteMedia};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

const PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    media_items: Vec<MediaItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaItem {
    id: String,
    base_url: String,
    mime_type: Option<String>,
    filename: Option<String>,
    media_metadata: Option<MediaMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaMetadata {
    creation_time: Option<DateTime<Utc>>,
}

impl From<MediaItem> for RemoteMedia {
    fn from(item: MediaItem) -> Self {
        RemoteMedia {
            id: item.id,
            base_url: item.base_url,
            mime_type: item.mime_type,
            filename: item.filename,
            creation_time: item.media_metadata.and_then(|m| m.creation_time),
        }
    }
}

pub struct PhotosClient {
    client: Client,
    api_url: String,
}

impl PhotosClient {
    pub fn new(client: Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
        }
    }
}

#[async_trait]
impl PhotoLibrary for PhotosClient {
    async fn list_media(&self, access_token: &str, page_token: Option<&str>) -> Result<MediaPage> {
        let mut request = self
            .client
            .get(format!("{}/v1/mediaItems", self.api_url))
            .bearer_auth(access_token)
            .query(&[("pageSize", PAGE_SIZE.to_string())]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let parsed: ListResponse = request.send().await?.error_for_status()?.json().await?;
        Ok(MediaPage {
            items: parsed.media_items.into_iter().map(RemoteMedia::from).collect(),
            next_page_token: parsed.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn get_media(&self, access_token: &str, media_id: &str) -> Result<RemoteMedia> {
        let item: MediaItem = self
            .client
            .get(format!(
                "{}/v1/mediaItems/{}",
                self.api_url,
                urlencoding::encode(media_id)
            ))
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(item.into())
    }
}
