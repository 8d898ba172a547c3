//! Hand-written fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use frame_dashboard::auth_cache::DownloadAuthCache;
use frame_dashboard::credentials::{Credential, CredentialProvider};
use frame_dashboard::device::{DeviceDiscovery, DisplayDevice};
use frame_dashboard::remote::{
    BucketSession, FilePage, MediaPage, ObjectStore, PhotoLibrary, RemoteFile, RemoteMedia,
};
use frame_dashboard::{
    CatalogItem, CatalogStore, DisplayResolver, Error, NewSource, Result, SourceAccount,
    SourceKind, SqliteCatalog, SyncWorker,
};

pub const SIZE_SUFFIX: &str = "=w1920-h1080";

#[derive(Default)]
pub struct FakeCredentials {
    by_source: Mutex<HashMap<i64, Credential>>,
}

impl FakeCredentials {
    pub fn insert(&self, source_id: i64, credential: Credential) {
        self.by_source.lock().unwrap().insert(source_id, credential);
    }
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn get_valid_credential(&self, source_id: i64) -> Result<Option<Credential>> {
        Ok(self.by_source.lock().unwrap().get(&source_id).cloned())
    }
}

/// Bucket listing served page by page; `next` tokens are `p{index}`.
#[derive(Default)]
pub struct FakeObjectStore {
    pub pages: Mutex<Vec<Vec<RemoteFile>>>,
    pub fail_on_page: Mutex<Option<usize>>,
    pub authorize_delay: Mutex<Option<Duration>>,
    pub authorize_calls: AtomicUsize,
    pub download_auth_calls: AtomicUsize,
}

impl FakeObjectStore {
    pub fn set_pages(&self, pages: Vec<Vec<RemoteFile>>) {
        *self.pages.lock().unwrap() = pages;
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn authorize(&self, _key_id: &str, _application_key: &str) -> Result<BucketSession> {
        self.authorize_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.authorize_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(BucketSession {
            account_id: "acct".into(),
            api_url: "https://api.example".into(),
            download_url: "https://f001.example".into(),
            auth_token: "account-token".into(),
        })
    }

    async fn list_file_names(
        &self,
        _session: &BucketSession,
        _bucket: &str,
        start_file_name: Option<&str>,
    ) -> Result<FilePage> {
        let index = page_index(start_file_name, 'p');
        if *self.fail_on_page.lock().unwrap() == Some(index) {
            return Err(Error::Other("listing connection reset".into()));
        }
        let pages = self.pages.lock().unwrap();
        let files = pages.get(index).cloned().unwrap_or_default();
        let next = (index + 1 < pages.len()).then(|| format!("p{}", index + 1));
        Ok(FilePage { files, next })
    }

    async fn download_authorization(
        &self,
        _session: &BucketSession,
        bucket: &str,
        _valid_for: Duration,
    ) -> Result<String> {
        let n = self.download_auth_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{bucket}-dl-{n}"))
    }
}

/// Photo library served page by page; `next_page_token`s are `t{index}`.
/// With `untyped` set, `get_media` reports no MIME type.
#[derive(Default)]
pub struct FakePhotos {
    pub pages: Mutex<Vec<Vec<RemoteMedia>>>,
    pub fail_on_page: Mutex<Option<usize>>,
    pub untyped: AtomicBool,
    pub get_calls: AtomicUsize,
}

impl FakePhotos {
    pub fn set_pages(&self, pages: Vec<Vec<RemoteMedia>>) {
        *self.pages.lock().unwrap() = pages;
    }
}

#[async_trait]
impl PhotoLibrary for FakePhotos {
    async fn list_media(&self, _access_token: &str, page_token: Option<&str>) -> Result<MediaPage> {
        let index = page_index(page_token, 't');
        if *self.fail_on_page.lock().unwrap() == Some(index) {
            return Err(Error::Other("quota exceeded".into()));
        }
        let pages = self.pages.lock().unwrap();
        let items = pages.get(index).cloned().unwrap_or_default();
        let next_page_token = (index + 1 < pages.len()).then(|| format!("t{}", index + 1));
        Ok(MediaPage {
            items,
            next_page_token,
        })
    }

    async fn get_media(&self, _access_token: &str, media_id: &str) -> Result<RemoteMedia> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let mut media = photo(media_id, &format!("https://lh3.example/{media_id}/fresh"));
        if self.untyped.load(Ordering::SeqCst) {
            media.mime_type = None;
        }
        Ok(media)
    }
}

fn page_index(token: Option<&str>, prefix: char) -> usize {
    token
        .and_then(|t| t.strip_prefix(prefix))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

pub fn file(id: &str, name: &str) -> RemoteFile {
    RemoteFile {
        file_id: id.into(),
        name: name.into(),
        content_type: None,
        size: Some(1024),
        uploaded_at: None,
    }
}

pub fn photo(id: &str, base_url: &str) -> RemoteMedia {
    RemoteMedia {
        id: id.into(),
        base_url: base_url.into(),
        mime_type: Some("image/jpeg".into()),
        filename: Some(format!("{id}.jpg")),
        creation_time: None,
    }
}

/// A catalog plus fake remotes, wired the way the binary wires the real ones.
pub struct Harness {
    pub store: Arc<SqliteCatalog>,
    pub credentials: Arc<FakeCredentials>,
    pub objects: Arc<FakeObjectStore>,
    pub photos: Arc<FakePhotos>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(SqliteCatalog::open_in_memory().unwrap()),
            credentials: Arc::new(FakeCredentials::default()),
            objects: Arc::new(FakeObjectStore::default()),
            photos: Arc::new(FakePhotos::default()),
        }
    }

    pub fn bucket_source(&self, bucket: &str) -> SourceAccount {
        let source = self
            .store
            .add_source(&NewSource {
                kind: SourceKind::ObjectStorage,
                label: bucket.into(),
                bucket_name: Some(bucket.into()),
                credentials_json: "{}".into(),
            })
            .unwrap();
        self.credentials.insert(
            source.id,
            Credential::BucketKey {
                key_id: "key".into(),
                application_key: "secret".into(),
            },
        );
        source
    }

    pub fn photo_source(&self, email: &str) -> SourceAccount {
        let source = self
            .store
            .add_source(&NewSource {
                kind: SourceKind::PhotoLibrary,
                label: email.into(),
                bucket_name: None,
                credentials_json: "{}".into(),
            })
            .unwrap();
        self.credentials.insert(
            source.id,
            Credential::Bearer {
                access_token: "bearer".into(),
            },
        );
        source
    }

    pub fn seed(&self, source_id: i64, prefix: &str, count: usize) {
        let items: Vec<CatalogItem> = (0..count)
            .map(|i| CatalogItem::new(format!("{prefix}-{i}"), source_id, format!("{prefix}/{i}.jpg")))
            .collect();
        self.store.upsert_batch(&items).unwrap();
    }

    pub fn worker(&self) -> SyncWorker {
        SyncWorker::new(
            self.store.clone(),
            self.credentials.clone(),
            self.objects.clone(),
            self.photos.clone(),
        )
    }

    pub fn resolver(&self) -> DisplayResolver {
        DisplayResolver::new(
            self.store.clone(),
            self.credentials.clone(),
            self.objects.clone(),
            self.photos.clone(),
            DownloadAuthCache::default(),
            SIZE_SUFFIX,
        )
    }
}

/// Acknowledges every play, except that the calls listed in `stall_on`
/// (1-based) never answer.
#[derive(Default)]
pub struct RecordingDevice {
    pub plays: Mutex<Vec<String>>,
    pub stall_on: Vec<usize>,
}

#[async_trait]
impl DisplayDevice for RecordingDevice {
    fn name(&self) -> &str {
        "test-tv"
    }

    async fn play_media(&self, url: &str, _content_type: &str, _title: Option<&str>) -> Result<()> {
        let call = {
            let mut plays = self.plays.lock().unwrap();
            plays.push(url.to_string());
            plays.len()
        };
        if self.stall_on.contains(&call) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }
}

/// Finds `device` by any name, or nothing when `device` is `None`.
pub struct FixedDiscovery {
    pub device: Option<Arc<RecordingDevice>>,
    pub attempts: AtomicUsize,
}

impl FixedDiscovery {
    pub fn new(device: Option<Arc<RecordingDevice>>) -> Self {
        Self {
            device,
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DeviceDiscovery for FixedDiscovery {
    async fn discover(&self, _name: &str) -> Result<Option<Arc<dyn DisplayDevice>>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .device
            .clone()
            .map(|d| d as Arc<dyn DisplayDevice>))
    }
}
