//! Layered settings: built-in defaults, an optional TOML file, then
//! `FRAME_`-prefixed environment variables.

use crate::error::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "frame-dashboard.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_path: PathBuf,
    pub log_level: String,
    pub slideshow: SlideshowSettings,
    pub device: DeviceSettings,
    pub b2: B2Settings,
    pub photos: PhotosSettings,
    pub oauth: OAuthSettings,
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlideshowSettings {
    pub interval_seconds: u64,
    pub show_filename: bool,
    pub empty_backoff_seconds: u64,
    pub stop_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSettings {
    /// Name of the device to cast to. Headless when unset.
    pub name: Option<String>,
    #[serde(default)]
    pub receivers: HashMap<String, String>,
    pub discovery_attempts: u32,
    pub discovery_backoff_ms: u64,
    pub ack_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct B2Settings {
    pub api_url: String,
    pub authorization_valid_seconds: u64,
    pub refresh_margin_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotosSettings {
    pub api_url: String,
    /// Appended to a media item's base URL to request a large rendition.
    pub size_suffix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthSettings {
    pub token_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    pub batch_size: usize,
}

impl Settings {
    /// Load settings. An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = Config::builder()
            .set_default("database_path", "frame-dashboard.db")?
            .set_default("log_level", "info")?
            .set_default("slideshow.interval_seconds", 20)?
            .set_default("slideshow.show_filename", false)?
            .set_default("slideshow.empty_backoff_seconds", 5)?
            .set_default("slideshow.stop_timeout_seconds", 5)?
            .set_default("device.discovery_attempts", 3)?
            .set_default("device.discovery_backoff_ms", 1000)?
            .set_default("device.ack_timeout_seconds", 10)?
            .set_default("b2.api_url", "https://api.backblazeb2.com")?
            .set_default("b2.authorization_valid_seconds", 7200)?
            .set_default("b2.refresh_margin_seconds", 300)?
            .set_default("photos.api_url", "https://photoslibrary.googleapis.com")?
            .set_default("photos.size_suffix", "=w1920-h1080")?
            .set_default("oauth.token_url", "https://oauth2.googleapis.com/token")?
            .set_default("sync.batch_size", 100)?
            .add_source(file)
            .add_source(
                Environment::with_prefix("FRAME")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl SlideshowSettings {
    pub fn empty_backoff(&self) -> Duration {
        Duration::from_secs(self.empty_backoff_seconds)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }
}

impl DeviceSettings {
    pub fn discovery_backoff(&self) -> Duration {
        Duration::from_millis(self.discovery_backoff_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_seconds)
    }
}
