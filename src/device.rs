//! Optional display-device capability.
//!
//! A slideshow may run headless; when a device is configured it is located
//! once per run and sent a "play media" command for every published image.

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[async_trait]
pub trait DisplayDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Ask the device to show `url`. Returns once playback is acknowledged.
    async fn play_media(&self, url: &str, content_type: &str, title: Option<&str>) -> Result<()>;
}

#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// `Ok(None)` when no device answers to `name`.
    async fn discover(&self, name: &str) -> Result<Option<Arc<dyn DisplayDevice>>>;
}

/// Discover `name`, retrying a bounded number of times.
pub async fn connect_with_retry(
    discovery: &dyn DeviceDiscovery,
    name: &str,
    attempts: u32,
    backoff: Duration,
) -> Result<Arc<dyn DisplayDevice>> {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match discovery.discover(name).await {
            Ok(Some(device)) => {
                tracing::info!("Connected to display device {}", device.name());
                return Ok(device);
            }
            Ok(None) => tracing::warn!("Device {} not found (attempt {}/{})", name, attempt, attempts),
            Err(e) => tracing::warn!(
                "Device discovery for {} failed (attempt {}/{}): {}",
                name,
                attempt,
                attempts,
                e
            ),
        }
        if attempt < attempts {
            tokio::time::sleep(backoff).await;
        }
    }
    Err(Error::DeviceNotFound {
        name: name.to_string(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayRequest<'a> {
    url: &'a str,
    content_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
}

/// A receiver reachable over HTTP: `GET /status` to probe, `POST /play` to cast.
pub struct HttpReceiver {
    name: String,
    base: Url,
    client: Client,
}

impl HttpReceiver {
    pub fn new(name: impl Into<String>, base: Url, client: Client) -> Self {
        Self {
            name: name.into(),
            base,
            client,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::Other(format!("invalid receiver URL {}: {}", self.base, e)))
    }
}

#[async_trait]
impl DisplayDevice for HttpReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn play_media(&self, url: &str, content_type: &str, title: Option<&str>) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint("play")?)
            .json(&PlayRequest {
                url,
                content_type,
                title,
            })
            .send()
            .await
            .map_err(|e| Error::Playback(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Playback(format!(
                "{} answered {}",
                self.name,
                response.status()
            )));
        }
        Ok(())
    }
}

/// Receivers known by name from configuration. Names match case-insensitively,
/// since the settings loader lowercases map keys.
pub struct HttpReceiverDiscovery {
    receivers: HashMap<String, Url>,
    client: Client,
    probe_timeout: Duration,
}

impl HttpReceiverDiscovery {
    pub fn new(receivers: &HashMap<String, String>, client: Client) -> Result<Self> {
        let receivers = receivers
            .iter()
            .map(|(name, base)| {
                // Trailing slash so `join` appends instead of replacing the last segment.
                let base = if base.ends_with('/') {
                    base.clone()
                } else {
                    format!("{base}/")
                };
                Url::parse(&base)
                    .map(|url| (name.to_lowercase(), url))
                    .map_err(|e| Error::Other(format!("receiver {name}: {e}")))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self {
            receivers,
            client,
            probe_timeout: Duration::from_secs(2),
        })
    }
}

impl HttpReceiverDiscovery {
    /// Base URL configured for `name`.
    pub fn base_url(&self, name: &str) -> Option<&Url> {
        self.receivers.get(&name.to_lowercase())
    }
}

#[async_trait]
impl DeviceDiscovery for HttpReceiverDiscovery {
    async fn discover(&self, name: &str) -> Result<Option<Arc<dyn DisplayDevice>>> {
        let Some(base) = self.base_url(name) else {
            return Ok(None);
        };
        let receiver = HttpReceiver::new(name, base.clone(), self.client.clone());

        let probe = self
            .client
            .get(receiver.endpoint("status")?)
            .timeout(self.probe_timeout)
            .send()
            .await;
        match probe {
            Ok(r) if r.status().is_success() => Ok(Some(Arc::new(receiver))),
            Ok(r) => {
                tracing::debug!("Receiver {} probe answered {}", name, r.status());
                Ok(None)
            }
            Err(e) => {
                tracing::debug!("Receiver {} unreachable: {}", name, e);
                Ok(None)
            }
        }
    }
}
