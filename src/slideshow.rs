//! Slideshow controller.
//!
//! Owns one background loop at a time: pick a random catalog item, resolve
//! a display URL, publish it, optionally cast it, then wait out the
//! interval. The loop watches a stop signal at every suspension point;
//! `status` and `current_image` read a published snapshot and never wait
//! on the loop.

use crate::catalog::{self, CatalogItem, CatalogStore};
use crate::device::{self, DeviceDiscovery, DisplayDevice};
use crate::error::Result;
use crate::resolver::{DisplayResolver, ResolvedMedia};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const DEFAULT_INTERVAL_SECONDS: u64 = 20;

/// Reply shape for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlideshowStatus {
    pub running: bool,
    pub error: Option<String>,
}

/// Last published image.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentImage {
    pub url: Option<String>,
    pub filename: Option<String>,
    pub interval: u64,
    pub show_filename: bool,
}

/// Timing and device knobs for the loop.
#[derive(Debug, Clone)]
pub struct SlideshowOptions {
    /// Wait before re-checking an empty catalog.
    pub empty_backoff: Duration,
    /// How long `stop` waits for the loop to drain.
    pub stop_timeout: Duration,
    /// Bound on waiting for a device to acknowledge playback.
    pub ack_timeout: Duration,
    /// Device to cast to. Headless when `None`.
    pub device_name: Option<String>,
    pub discovery_attempts: u32,
    pub discovery_backoff: Duration,
}

impl Default for SlideshowOptions {
    fn default() -> Self {
        Self {
            empty_backoff: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(10),
            device_name: None,
            discovery_attempts: 3,
            discovery_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
struct SlideshowState {
    interval_seconds: u64,
    show_filename: bool,
    current_locator: Option<String>,
    current_display_url: Option<String>,
    current_filename: Option<String>,
    last_error: Option<String>,
}

struct Shared {
    running: AtomicBool,
    /// Bumped on every start so a stale loop cannot clear a newer run.
    generation: AtomicU64,
    state: RwLock<SlideshowState>,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, SlideshowState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SlideshowState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn set_error(&self, message: String) {
        self.write().last_error = Some(message);
    }

    fn publish(&self, item: &CatalogItem, media: &ResolvedMedia) {
        let mut state = self.write();
        state.current_locator = Some(item.locator.clone());
        state.current_display_url = Some(media.url.clone());
        state.current_filename = Some(item.display_name().to_string());
    }

    /// Record a run-level failure and go idle if this run is still current.
    fn fail_run(&self, generation: u64, message: String) {
        self.set_error(message);
        if self.generation.load(Ordering::Acquire) == generation {
            self.running.store(false, Ordering::Release);
        }
    }
}

struct Run {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Everything the loop task needs, cloned out of the controller.
#[derive(Clone)]
struct LoopContext {
    shared: Arc<Shared>,
    store: Arc<dyn CatalogStore>,
    resolver: Arc<DisplayResolver>,
    discovery: Option<Arc<dyn DeviceDiscovery>>,
    options: SlideshowOptions,
}

/// The process-wide slideshow. Construct once and share by reference.
pub struct Slideshow {
    ctx: LoopContext,
    run: Mutex<Option<Run>>,
}

impl Slideshow {
    /// Create an idle controller. Nothing runs until [`Slideshow::start`].
    pub fn new(
        store: Arc<dyn CatalogStore>,
        resolver: Arc<DisplayResolver>,
        discovery: Option<Arc<dyn DeviceDiscovery>>,
        options: SlideshowOptions,
    ) -> Self {
        let shared = Arc::new(Shared {
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            state: RwLock::new(SlideshowState {
                interval_seconds: DEFAULT_INTERVAL_SECONDS,
                show_filename: false,
                current_locator: None,
                current_display_url: None,
                current_filename: None,
                last_error: None,
            }),
        });
        Self {
            ctx: LoopContext {
                shared,
                store,
                resolver,
                discovery,
                options,
            },
            run: Mutex::new(None),
        }
    }

    /// Start the loop. Returns `false` without side effects if already running.
    pub fn start(&self, interval_seconds: u64, show_filename: bool) -> bool {
        self.start_with_interval(Duration::from_secs(interval_seconds.max(1)), show_filename)
    }

    /// Like [`Slideshow::start`] with a sub-second interval allowed.
    pub fn start_with_interval(&self, interval: Duration, show_filename: bool) -> bool {
        let mut run = self.run.lock().unwrap_or_else(|e| e.into_inner());
        let shared = &self.ctx.shared;
        if shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Slideshow already running");
            return false;
        }

        let generation = shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        {
            let mut state = shared.write();
            state.interval_seconds = interval.as_secs();
            state.show_filename = show_filename;
            state.last_error = None;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(self.ctx.clone(), generation, interval, stop_rx));
        if let Some(previous) = run.replace(Run { stop_tx, handle }) {
            if !previous.handle.is_finished() {
                tracing::warn!("Previous slideshow loop still draining while a new one starts");
            }
        }

        tracing::info!(
            "Slideshow loop started (interval={:?}, show_filename={})",
            interval,
            show_filename
        );
        true
    }

    /// Signal the loop, wait a bounded time for it, and go idle regardless.
    ///
    /// A `start` that lands while this is draining owns the controller
    /// afterwards and is left running.
    pub async fn stop(&self) {
        let (run, generation) = {
            let mut run = self.run.lock().unwrap_or_else(|e| e.into_inner());
            (run.take(), self.ctx.shared.generation.load(Ordering::Acquire))
        };

        if let Some(run) = run {
            let _ = run.stop_tx.send(true);
            match tokio::time::timeout(self.ctx.options.stop_timeout, run.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Slideshow loop ended abnormally: {}", e),
                Err(_) => tracing::warn!(
                    "Slideshow loop did not exit within {:?}, leaving it to finish",
                    self.ctx.options.stop_timeout
                ),
            }
        }

        self.ctx.resolver.clear().await;

        // `start` bumps the generation under this same lock.
        let _run = self.run.lock().unwrap_or_else(|e| e.into_inner());
        if self.ctx.shared.generation.load(Ordering::Acquire) != generation {
            tracing::debug!("Slideshow restarted while stopping, leaving new run alone");
            return;
        }
        self.ctx.shared.running.store(false, Ordering::Release);
        tracing::info!("Slideshow stopped");
    }

    /// Whether a loop currently owns the controller.
    pub fn is_running(&self) -> bool {
        self.ctx.shared.running.load(Ordering::Acquire)
    }

    /// Running flag and the most recent error, read without waiting on the loop.
    pub fn status(&self) -> SlideshowStatus {
        SlideshowStatus {
            running: self.is_running(),
            error: self.ctx.shared.read().last_error.clone(),
        }
    }

    /// Snapshot of the last published image and the active display settings.
    pub fn current_image(&self) -> CurrentImage {
        let state = self.ctx.shared.read();
        CurrentImage {
            url: state.current_display_url.clone(),
            filename: state.current_filename.clone(),
            interval: state.interval_seconds,
            show_filename: state.show_filename,
        }
    }

    /// Locator of the item currently on display.
    pub fn current_locator(&self) -> Option<String> {
        self.ctx.shared.read().current_locator.clone()
    }
}

/// Resolves once the stop flag is set or the controller dropped the sender.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn run_loop(
    ctx: LoopContext,
    generation: u64,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let device = match (&ctx.discovery, &ctx.options.device_name) {
        (Some(discovery), Some(name)) => {
            let connect = device::connect_with_retry(
                discovery.as_ref(),
                name,
                ctx.options.discovery_attempts,
                ctx.options.discovery_backoff,
            );
            tokio::select! {
                result = connect => match result {
                    Ok(device) => Some(device),
                    Err(e) => {
                        tracing::error!("Critical error in slideshow loop: {}", e);
                        ctx.shared.fail_run(generation, e.to_string());
                        return;
                    }
                },
                _ = stopped(&mut stop_rx) => return,
            }
        }
        _ => None,
    };

    loop {
        let next = tokio::select! {
            next = ctx.next_image() => next,
            _ = stopped(&mut stop_rx) => break,
        };

        let wait = match next {
            Ok(Some((item, media))) => {
                ctx.shared.publish(&item, &media);
                tracing::debug!("Showing {}", item.display_name());
                if let Some(device) = &device {
                    ctx.cast(device.as_ref(), &item, &media).await;
                }
                interval
            }
            Ok(None) => {
                tracing::warn!("Catalog is empty, retrying in {:?}", ctx.options.empty_backoff);
                ctx.options.empty_backoff
            }
            Err(e) => {
                tracing::error!("Error in slideshow loop: {}", e);
                ctx.shared.set_error(e.to_string());
                interval
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = stopped(&mut stop_rx) => break,
        }
    }

    tracing::info!("Slideshow loop exited");
}

impl LoopContext {
    async fn next_image(&self) -> Result<Option<(CatalogItem, ResolvedMedia)>> {
        let Some(item) = catalog::blocking(&self.store, |store| store.pick_random()).await? else {
            return Ok(None);
        };
        let media = self.resolver.resolve(&item).await?;
        Ok(Some((item, media)))
    }

    async fn cast(&self, device: &dyn DisplayDevice, item: &CatalogItem, media: &ResolvedMedia) {
        let title = if self.shared.read().show_filename {
            Some(item.display_name())
        } else {
            None
        };
        let play = device.play_media(&media.url, &media.content_type, title);
        match tokio::time::timeout(self.options.ack_timeout, play).await {
            Ok(Ok(())) => tracing::debug!("{} acknowledged playback", device.name()),
            Ok(Err(e)) => {
                tracing::warn!("Device {} failed to play {}: {}", device.name(), item.id, e);
                self.shared.set_error(e.to_string());
            }
            Err(_) => {
                let message = format!(
                    "{} did not acknowledge playback within {:?}",
                    device.name(),
                    self.options.ack_timeout
                );
                tracing::warn!("{}", message);
                self.shared.set_error(message);
            }
        }
    }
}
