//! Catalog sync worker.
//!
//! Buckets are re-listed in full: the source's items are deleted first and
//! the listing re-inserted. Photo libraries are paged through and merged,
//! nothing is removed. Both commit in fixed-size batches so progress made
//! before a failing page survives, and `last_synced_at` only moves when the
//! whole listing completed.

use crate::catalog::{self, CatalogItem, CatalogStore, SourceAccount, SourceKind, DEFAULT_MIME_TYPE};
use crate::credentials::{Credential, CredentialProvider};
use crate::error::{Error, Result};
use crate::remote::{ObjectStore, PhotoLibrary, RemoteFile, RemoteMedia};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub const DEFAULT_BATCH_SIZE: usize = 100;

const IMAGE_EXTENSIONS: [(&str, &str); 5] = [
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
];

/// MIME type to index `name` under, or `None` if it is not a displayable image.
pub fn displayable_mime(name: &str, declared: Option<&str>) -> Option<String> {
    if let Some(declared) = declared {
        if declared.starts_with("image/") {
            return Some(declared.to_string());
        }
    }
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    IMAGE_EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| mime.to_string())
}

/// Outcome of one completed sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub source_id: i64,
    /// Items written to the catalog.
    pub indexed: usize,
    /// Remote entries skipped as not displayable.
    pub skipped: usize,
    /// Items deleted before a full re-sync.
    pub removed: usize,
    pub pages: usize,
}

/// Indexes remote sources into the catalog.
pub struct SyncWorker {
    store: Arc<dyn CatalogStore>,
    credentials: Arc<dyn CredentialProvider>,
    object_store: Arc<dyn ObjectStore>,
    photos: Arc<dyn PhotoLibrary>,
    batch_size: usize,
}

impl SyncWorker {
    /// Create a worker with the default batch size.
    pub fn new(
        store: Arc<dyn CatalogStore>,
        credentials: Arc<dyn CredentialProvider>,
        object_store: Arc<dyn ObjectStore>,
        photos: Arc<dyn PhotoLibrary>,
    ) -> Self {
        Self {
            store,
            credentials,
            object_store,
            photos,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Commit every `batch_size` items. Values below one are treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run one sync for `source_id` and record completion.
    pub async fn sync_source(&self, source_id: i64) -> Result<SyncReport> {
        let source = self
            .store
            .get_source(source_id)?
            .ok_or(Error::UnknownSource(source_id))?;
        if !source.is_active {
            return Err(Error::Other(format!("source {source_id} is inactive")));
        }

        tracing::info!("Starting sync for {} ({})", source.label, source.kind.as_str());
        let report = match source.kind {
            SourceKind::ObjectStorage => self.sync_bucket(&source).await?,
            SourceKind::PhotoLibrary => self.sync_library(&source).await?,
        };

        self.store.mark_synced(source.id, Utc::now())?;
        tracing::info!(
            "Finished sync for {}. Indexed {}, skipped {}, removed {}",
            source.label,
            report.indexed,
            report.skipped,
            report.removed
        );
        Ok(report)
    }

    /// Sync every active source in turn. Failures are logged and skipped.
    pub async fn sync_all_active(&self) -> Result<Vec<SyncReport>> {
        let mut reports = Vec::new();
        for source in self.store.active_sources()? {
            match self.sync_source(source.id).await {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!("Error syncing source {}: {}", source.id, e),
            }
        }
        Ok(reports)
    }

    /// Run a sync as a detached task. Errors end at the task boundary.
    pub fn spawn(self: &Arc<Self>, source_id: i64) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = worker.sync_source(source_id).await {
                tracing::error!("Error syncing source {}: {}", source_id, e);
            }
        })
    }

    async fn sync_bucket(&self, source: &SourceAccount) -> Result<SyncReport> {
        let bucket = source.bucket_name.as_deref().unwrap_or(&source.label);
        let (key_id, application_key) = match self.credentials.get_valid_credential(source.id).await? {
            Some(Credential::BucketKey {
                key_id,
                application_key,
            }) => (key_id, application_key),
            _ => return Err(Error::credential(source.id, "could not get bucket credentials")),
        };
        let session = self
            .object_store
            .authorize(&key_id, &application_key)
            .await
            .map_err(|e| Error::credential(source.id, e))?;

        let mut report = SyncReport {
            source_id: source.id,
            removed: self.store.delete_all_for_source(source.id)?,
            ..Default::default()
        };

        let mut batch = Vec::with_capacity(self.batch_size);
        let mut start: Option<String> = None;
        loop {
            let page = self
                .object_store
                .list_file_names(&session, bucket, start.as_deref())
                .await
                .map_err(|e| Error::transport(source.id, e))?;
            report.pages += 1;

            for file in page.files {
                match bucket_item(source.id, file) {
                    Some(item) => batch.push(item),
                    None => report.skipped += 1,
                }
                if batch.len() >= self.batch_size {
                    self.flush(source, &mut batch, &mut report).await?;
                }
            }

            match page.next {
                Some(next) => start = Some(next),
                None => break,
            }
        }
        self.flush(source, &mut batch, &mut report).await?;
        Ok(report)
    }

    async fn sync_library(&self, source: &SourceAccount) -> Result<SyncReport> {
        let access_token = match self.credentials.get_valid_credential(source.id).await? {
            Some(Credential::Bearer { access_token }) => access_token,
            _ => return Err(Error::credential(source.id, "could not get credentials")),
        };

        let mut report = SyncReport {
            source_id: source.id,
            ..Default::default()
        };
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .photos
                .list_media(&access_token, page_token.as_deref())
                .await
                .map_err(|e| Error::transport(source.id, e))?;
            report.pages += 1;

            for media in page.items {
                match library_item(source.id, media) {
                    Some(item) => batch.push(item),
                    None => report.skipped += 1,
                }
                if batch.len() >= self.batch_size {
                    self.flush(source, &mut batch, &mut report).await?;
                }
            }

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        self.flush(source, &mut batch, &mut report).await?;
        Ok(report)
    }

    async fn flush(
        &self,
        source: &SourceAccount,
        batch: &mut Vec<CatalogItem>,
        report: &mut SyncReport,
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let items = std::mem::replace(batch, Vec::with_capacity(self.batch_size));
        report.indexed += catalog::blocking(&self.store, move |store| store.upsert_batch(&items)).await?;
        tracing::info!("Synced {} items for {}", report.indexed, source.label);
        Ok(())
    }
}

fn bucket_item(source_id: i64, file: RemoteFile) -> Option<CatalogItem> {
    let mime_type = displayable_mime(&file.name, file.content_type.as_deref())?;
    let filename = Path::new(&file.name)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string);
    let mut item = CatalogItem::new(file.file_id, source_id, file.name);
    item.filename = filename;
    item.mime_type = mime_type;
    item.size_bytes = file.size;
    item.creation_time = file.uploaded_at;
    Some(item)
}

fn library_item(source_id: i64, media: RemoteMedia) -> Option<CatalogItem> {
    let name = media.filename.clone().unwrap_or_default();
    let mime_type = match media.mime_type.as_deref() {
        Some(_) => displayable_mime(&name, media.mime_type.as_deref())?,
        None => displayable_mime(&name, None).unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
    };
    let mut item = CatalogItem::new(media.id, source_id, media.base_url);
    item.filename = media.filename;
    item.mime_type = mime_type;
    item.creation_time = media.creation_time;
    Some(item)
}
