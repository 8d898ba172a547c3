//! Backblaze B2 native API client.

use crate::error::{Error, Result};
use super::{BucketSession, FilePage, ObjectStore, RemoteFile};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

const MAX_FILE_COUNT: u32 = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeResponse {
    account_id: String,
    authorization_token: String,
    api_url: String,
    download_url: String,
}

#[derive(Debug, Deserialize)]
struct ListBucketsResponse {
    buckets: Vec<Bucket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bucket {
    bucket_id: String,
    bucket_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFilesResponse {
    files: Vec<FileEntry>,
    next_file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileEntry {
    file_id: Option<String>,
    file_name: String,
    content_type: Option<String>,
    content_length: Option<i64>,
    upload_timestamp: Option<i64>,
    #[serde(default)]
    action: Option<String>,
}

impl FileEntry {
    fn into_remote(self) -> Option<RemoteFile> {
        // Only uploaded objects; skip folder markers and hide entries.
        if self.action.as_deref().is_some_and(|a| a != "upload") {
            return None;
        }
        Some(RemoteFile {
            file_id: self.file_id.unwrap_or_else(|| self.file_name.clone()),
            name: self.file_name,
            content_type: self.content_type,
            size: self.content_length,
            uploaded_at: self
                .upload_timestamp
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadAuthResponse {
    authorization_token: String,
}

/// Talks to the B2 v2 API. Bucket ids are looked up once per bucket name.
pub struct B2Client {
    client: Client,
    api_url: String,
    bucket_ids: RwLock<HashMap<String, String>>,
}

impl B2Client {
    pub fn new(client: Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            bucket_ids: RwLock::new(HashMap::new()),
        }
    }

    async fn bucket_id(&self, session: &BucketSession, bucket: &str) -> Result<String> {
        if let Some(id) = self.bucket_ids.read().await.get(bucket) {
            return Ok(id.clone());
        }

        let response: ListBucketsResponse = self
            .client
            .post(format!("{}/b2api/v2/b2_list_buckets", session.api_url))
            .header("Authorization", &session.auth_token)
            .json(&json!({ "accountId": session.account_id, "bucketName": bucket }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let id = response
            .buckets
            .into_iter()
            .find(|b| b.bucket_name == bucket)
            .map(|b| b.bucket_id)
            .ok_or_else(|| Error::Other(format!("bucket {bucket} not visible to this key")))?;

        self.bucket_ids
            .write()
            .await
            .insert(bucket.to_string(), id.clone());
        Ok(id)
    }
}

#[async_trait]
impl ObjectStore for B2Client {
    async fn authorize(&self, key_id: &str, application_key: &str) -> Result<BucketSession> {
        tracing::info!("Authorizing B2 account (key id length {})", key_id.len());
        let response: AuthorizeResponse = self
            .client
            .get(format!("{}/b2api/v2/b2_authorize_account", self.api_url))
            .basic_auth(key_id, Some(application_key))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(BucketSession {
            account_id: response.account_id,
            api_url: response.api_url,
            download_url: response.download_url,
            auth_token: response.authorization_token,
        })
    }

    async fn list_file_names(
        &self,
        session: &BucketSession,
        bucket: &str,
        start_file_name: Option<&str>,
    ) -> Result<FilePage> {
        let bucket_id = self.bucket_id(session, bucket).await?;
        let mut body = json!({ "bucketId": bucket_id, "maxFileCount": MAX_FILE_COUNT });
        if let Some(start) = start_file_name {
            body["startFileName"] = json!(start);
        }

        let response: ListFilesResponse = self
            .client
            .post(format!("{}/b2api/v2/b2_list_file_names", session.api_url))
            .header("Authorization", &session.auth_token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(FilePage {
            files: response
                .files
                .into_iter()
                .filter_map(FileEntry::into_remote)
                .collect(),
            next: response.next_file_name,
        })
    }

    async fn download_authorization(
        &self,
        session: &BucketSession,
        bucket: &str,
        valid_for: Duration,
    ) -> Result<String> {
        let bucket_id = self.bucket_id(session, bucket).await?;
        let response: DownloadAuthResponse = self
            .client
            .post(format!(
                "{}/b2api/v2/b2_get_download_authorization",
                session.api_url
            ))
            .header("Authorization", &session.auth_token)
            .json(&json!({
                "bucketId": bucket_id,
                "fileNamePrefix": "",
                "validDurationInSeconds": valid_for.as_secs(),
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.authorization_token)
    }
}

/// Build a direct download URL. Path separators in the object name are kept.
pub fn download_url(base: &str, bucket: &str, object_name: &str, token: &str) -> String {
    let encoded = object_name
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!(
        "{}/file/{}/{}?Authorization={}",
        base.trim_end_matches('/'),
        bucket,
        encoded,
        urlencoding::encode(token)
    )
}
