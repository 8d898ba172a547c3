//! Turns a catalog entry into a URL a display can fetch right now.
//!
//! Bucket items get a deterministic URL signed with a cached bucket-wide
//! download token. Photo-library items are re-fetched, since their base
//! URLs expire on the remote side.

use crate::auth_cache::DownloadAuthCache;
use crate::catalog::{CatalogItem, CatalogStore, SourceAccount, SourceKind, DEFAULT_MIME_TYPE};
use crate::credentials::{Credential, CredentialProvider};
use crate::error::{Error, Result};
use crate::remote::{b2, BucketSession, ObjectStore, PhotoLibrary};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A directly fetchable URL and its content type.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMedia {
    pub url: String,
    pub content_type: String,
}

/// Resolves catalog items to display URLs, caching bucket sessions and
/// download tokens until [`DisplayResolver::clear`].
pub struct DisplayResolver {
    store: Arc<dyn CatalogStore>,
    credentials: Arc<dyn CredentialProvider>,
    object_store: Arc<dyn ObjectStore>,
    photos: Arc<dyn PhotoLibrary>,
    auth_cache: DownloadAuthCache,
    sessions: Mutex<HashMap<i64, BucketSession>>,
    size_suffix: String,
}

impl DisplayResolver {
    /// Create a resolver. `size_suffix` is appended to photo-library base URLs.
    pub fn new(
        store: Arc<dyn CatalogStore>,
        credentials: Arc<dyn CredentialProvider>,
        object_store: Arc<dyn ObjectStore>,
        photos: Arc<dyn PhotoLibrary>,
        auth_cache: DownloadAuthCache,
        size_suffix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            credentials,
            object_store,
            photos,
            auth_cache,
            sessions: Mutex::new(HashMap::new()),
            size_suffix: size_suffix.into(),
        }
    }

    /// Produce a URL a display can fetch now, plus its content type.
    pub async fn resolve(&self, item: &CatalogItem) -> Result<ResolvedMedia> {
        let source = self
            .store
            .get_source(item.source_id)?
            .ok_or(Error::UnknownSource(item.source_id))?;

        match source.kind {
            SourceKind::ObjectStorage => self.resolve_object(&source, item).await,
            SourceKind::PhotoLibrary => self.resolve_photo(&source, item).await,
        }
    }

    /// Drop cached sessions and download tokens.
    pub async fn clear(&self) {
        self.sessions.lock().await.clear();
        self.auth_cache.clear().await;
    }

    async fn session(&self, source: &SourceAccount) -> Result<BucketSession> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&source.id) {
            return Ok(session.clone());
        }

        let (key_id, application_key) = match self.credentials.get_valid_credential(source.id).await? {
            Some(Credential::BucketKey {
                key_id,
                application_key,
            }) => (key_id, application_key),
            Some(_) => return Err(Error::credential(source.id, "expected a bucket key")),
            None => return Err(Error::credential(source.id, "no credential stored")),
        };

        let session = self
            .object_store
            .authorize(&key_id, &application_key)
            .await
            .map_err(|e| Error::credential(source.id, e))?;
        sessions.insert(source.id, session.clone());
        Ok(session)
    }

    async fn resolve_object(&self, source: &SourceAccount, item: &CatalogItem) -> Result<ResolvedMedia> {
        let bucket = source.bucket_name.as_deref().unwrap_or(&source.label);
        let session = self.session(source).await?;

        let auth = self
            .auth_cache
            .get(bucket, |valid_for| {
                self.object_store
                    .download_authorization(&session, bucket, valid_for)
            })
            .await;
        let auth = match auth {
            Ok(auth) => auth,
            Err(e) => {
                // The account token may have lapsed; re-authorize next time.
                self.sessions.lock().await.remove(&source.id);
                return Err(Error::resolution(&item.locator, e));
            }
        };

        Ok(ResolvedMedia {
            url: b2::download_url(&session.download_url, bucket, &item.locator, &auth.token),
            content_type: content_type_or_default(Some(&item.mime_type)),
        })
    }

    async fn resolve_photo(&self, source: &SourceAccount, item: &CatalogItem) -> Result<ResolvedMedia> {
        let access_token = match self.credentials.get_valid_credential(source.id).await? {
            Some(Credential::Bearer { access_token }) => access_token,
            Some(_) => return Err(Error::credential(source.id, "expected an OAuth token")),
            None => return Err(Error::credential(source.id, "no valid token")),
        };

        let media = self
            .photos
            .get_media(&access_token, &item.id)
            .await
            .map_err(|e| Error::resolution(&item.id, e))?;

        if media.base_url != item.locator {
            if let Err(e) = self.store.update_locator(&item.id, &media.base_url) {
                tracing::debug!("Could not refresh locator for {}: {}", item.id, e);
            }
        }

        let content_type = media
            .mime_type
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .or(Some(item.mime_type.as_str()));
        Ok(ResolvedMedia {
            url: format!("{}{}", media.base_url, self.size_suffix),
            content_type: content_type_or_default(content_type),
        })
    }
}

fn content_type_or_default(reported: Option<&str>) -> String {
    match reported {
        Some(ct) if !ct.trim().is_empty() => ct.to_string(),
        _ => DEFAULT_MIME_TYPE.to_string(),
    }
}
