//! Obtaining, caching, and unpacking server archives.
//!
//! # Sub-modules
//!
//! - [`download`]: Download clients (`HttpDownloader`, `MirrorDownloader`).
//! - [`extraction`]: Archive unpacking and entry point discovery.
//! - [`naming`]: Archive file names and cache keys.
//! - [`store`]: The on-disk cache with per-key deduplication.

pub mod download;
pub mod extraction;
pub mod naming;
pub mod store;

pub use download::{ArchiveDownloader, DownloadError, HttpDownloader, MirrorDownloader};
pub use extraction::{ArchiveExtractor, DefaultExtractor, ExtractedFileSet, ExtractionError};
pub use naming::CacheKey;
pub use store::{Artefact, ArtefactStore, StoreError};
