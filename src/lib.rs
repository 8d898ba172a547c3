//! Photo slideshow dashboard core.
//!
//! Indexes images from object-storage buckets and photo-library accounts
//! into a local SQLite catalog, then shows a random one at a time,
//! optionally casting it to a display device.

pub mod auth_cache;
pub mod catalog;
pub mod config;
pub mod credentials;
pub mod device;
pub mod error;
pub mod remote;
pub mod resolver;
pub mod slideshow;
pub mod sync;

pub use catalog::{CatalogItem, CatalogStore, NewSource, SourceAccount, SourceKind, SqliteCatalog};
pub use error::{Error, Result};
pub use resolver::{DisplayResolver, ResolvedMedia};
pub use slideshow::{CurrentImage, Slideshow, SlideshowOptions, SlideshowStatus};
pub use sync::{SyncReport, SyncWorker};
