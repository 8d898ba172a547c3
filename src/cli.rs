//! CLI subcommand implementations.

use anyhow::{Context, Result};
use frame_dashboard::auth_cache::DownloadAuthCache;
use frame_dashboard::config::Settings;
use frame_dashboard::credentials::{BucketKeys, OAuthToken, StoredCredentials};
use frame_dashboard::device::{DeviceDiscovery, HttpReceiverDiscovery};
use frame_dashboard::remote::{B2Client, PhotosClient};
use frame_dashboard::{
    CatalogStore, DisplayResolver, NewSource, Slideshow, SlideshowOptions, SourceKind,
    SqliteCatalog, SyncWorker,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Wired-up core components.
pub struct App {
    pub store: Arc<dyn CatalogStore>,
    pub worker: Arc<SyncWorker>,
    pub slideshow: Slideshow,
}

impl App {
    pub fn build(settings: &Settings) -> Result<Self> {
        let store: Arc<dyn CatalogStore> = Arc::new(
            SqliteCatalog::open(&settings.database_path).with_context(|| {
                format!("Failed to open catalog {}", settings.database_path.display())
            })?,
        );
        let client = reqwest::Client::new();

        let credentials = Arc::new(StoredCredentials::new(
            store.clone(),
            client.clone(),
            settings.oauth.clone(),
        ));
        let object_store = Arc::new(B2Client::new(client.clone(), settings.b2.api_url.clone()));
        let photos = Arc::new(PhotosClient::new(client.clone(), settings.photos.api_url.clone()));

        let worker = Arc::new(
            SyncWorker::new(
                store.clone(),
                credentials.clone(),
                object_store.clone(),
                photos.clone(),
            )
            .with_batch_size(settings.sync.batch_size),
        );

        let auth_cache = DownloadAuthCache::new(
            Duration::from_secs(settings.b2.authorization_valid_seconds),
            Duration::from_secs(settings.b2.refresh_margin_seconds),
        );
        let resolver = Arc::new(DisplayResolver::new(
            store.clone(),
            credentials,
            object_store,
            photos,
            auth_cache,
            settings.photos.size_suffix.clone(),
        ));

        let discovery: Option<Arc<dyn DeviceDiscovery>> = match settings.device.name {
            Some(_) => Some(Arc::new(HttpReceiverDiscovery::new(
                &settings.device.receivers,
                client,
            )?)),
            None => None,
        };
        let options = SlideshowOptions {
            empty_backoff: settings.slideshow.empty_backoff(),
            stop_timeout: settings.slideshow.stop_timeout(),
            ack_timeout: settings.device.ack_timeout(),
            device_name: settings.device.name.clone(),
            discovery_attempts: settings.device.discovery_attempts,
            discovery_backoff: settings.device.discovery_backoff(),
        };
        let slideshow = Slideshow::new(store.clone(), resolver, discovery, options);

        Ok(Self {
            store,
            worker,
            slideshow,
        })
    }
}

pub async fn run(
    app: &App,
    settings: &Settings,
    interval: Option<u64>,
    show_filename: bool,
) -> Result<()> {
    for source in app.store.active_sources()? {
        app.worker.spawn(source.id);
    }

    let interval = interval.unwrap_or(settings.slideshow.interval_seconds);
    app.slideshow
        .start(interval, show_filename || settings.slideshow.show_filename);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut last_url = None;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                let image = app.slideshow.current_image();
                if image.url.is_some() && image.url != last_url {
                    tracing::info!("Now showing {}", image.filename.as_deref().unwrap_or("?"));
                    last_url = image.url;
                }
                let status = app.slideshow.status();
                if !status.running {
                    tracing::error!("Slideshow stopped: {}", status.error.as_deref().unwrap_or("unknown error"));
                    break;
                }
            }
        }
    }

    app.slideshow.stop().await;
    Ok(())
}

pub async fn sync(app: &App, source: Option<i64>) -> Result<()> {
    let reports = match source {
        Some(id) => vec![app.worker.sync_source(id).await?],
        None => app.worker.sync_all_active().await?,
    };
    if reports.is_empty() {
        println!("Nothing synced. Add a source with `frame-dashboard add-bucket` or `add-photos`.");
    }
    for report in reports {
        println!(
            "source {}: {} indexed, {} skipped, {} removed over {} pages",
            report.source_id, report.indexed, report.skipped, report.removed, report.pages
        );
    }
    Ok(())
}

pub fn sources(app: &App) -> Result<()> {
    let sources = app.store.list_sources()?;
    if sources.is_empty() {
        println!("No sources.");
        return Ok(());
    }
    for source in sources {
        let synced = source
            .last_synced_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".into());
        println!(
            "{:>4}  {:<15} {:<30} {:>7} items  {}  last synced {}",
            source.id,
            source.kind.as_str(),
            source.label,
            app.store.count_for_source(source.id)?,
            if source.is_active { "active" } else { "inactive" },
            synced
        );
    }
    Ok(())
}

pub fn add_bucket(app: &App, key_id: &str, application_key: &str, bucket: &str) -> Result<()> {
    let keys = BucketKeys {
        key_id: key_id.trim().to_string(),
        application_key: application_key.trim().to_string(),
    };
    let source = app.store.add_source(&NewSource {
        kind: SourceKind::ObjectStorage,
        label: bucket.to_string(),
        bucket_name: Some(bucket.to_string()),
        credentials_json: serde_json::to_string(&keys)?,
    })?;
    println!("Added bucket {} as source {}", bucket, source.id);
    Ok(())
}

pub async fn add_photos(app: &App, label: &str, token_json: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(token_json)
        .await
        .with_context(|| format!("Failed to read {}", token_json.display()))?;
    let token: OAuthToken = serde_json::from_str(&raw).context("Failed to parse token file")?;
    let source = app.store.add_source(&NewSource {
        kind: SourceKind::PhotoLibrary,
        label: label.to_string(),
        bucket_name: None,
        credentials_json: serde_json::to_string(&token)?,
    })?;
    println!("Added photo library {} as source {}", label, source.id);
    Ok(())
}

pub fn remove_source(app: &App, id: i64) -> Result<()> {
    let removed = app.store.deactivate_source(id)?;
    println!("Removed source {} ({} items deleted)", id, removed);
    Ok(())
}
