//! The pluggable key-value backend interface, and the metadata blob
//! format shared by every reference backend.

pub mod filesystem;
pub mod s3;

pub use filesystem::FilesystemBackend;
pub use s3::S3Backend;

use std::collections::HashSet;

use async_trait::async_trait;
use regex::Regex;

use crate::error::BackendError;

/// A page identifier: `address / page_size`.
pub type PageId = u64;

/// Persisted side-car metadata for a backend: page geometry and which
/// page ids must read as zero regardless of any residual object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata {
    pub page_size: u64,
    pub allocated_pages: u64,
    pub invalid_pages: HashSet<PageId>,
}

const METADATA_VERSION: u32 = 1;

/// Serialize metadata using this crate's text grammar:
/// `version=1\npage_size=<n>\nallocated_pages=<n>\ninvalid_pages={<id> <id>...}\n`
///
/// This crate deliberately picks the `allocated_pages=` field name (not
/// the `max_page=` spelling found in some historical variants of this
/// format) and adds the leading version line so a future binary layout
/// cannot be silently misparsed as this text form.
pub fn serialize_metadata(meta: &Metadata) -> String {
    let mut ids: Vec<_> = meta.invalid_pages.iter().copied().collect();
    ids.sort_unstable();
    let ids_str = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "version={v}\npage_size={ps}\nallocated_pages={ap}\ninvalid_pages={{{ids}}}\n",
        v = METADATA_VERSION,
        ps = meta.page_size,
        ap = meta.allocated_pages,
        ids = ids_str,
    )
}

/// Parse metadata written by [`serialize_metadata`].
pub fn parse_metadata(text: &str) -> Result<Metadata, BackendError> {
    let re = Regex::new(
        r"(?s)version=(\d+)\npage_size=(\d+)\nallocated_pages=(\d+)\ninvalid_pages=\{([0-9 ]*)\}",
    )
    .expect("static regex is valid");

    let caps = re
        .captures(text)
        .ok_or_else(|| BackendError::Metadata(format!("unrecognized metadata blob: {text:?}")))?;

    let version: u32 = caps[1]
        .parse()
        .map_err(|_| BackendError::Metadata("invalid version field".to_string()))?;
    if version != METADATA_VERSION {
        return Err(BackendError::Metadata(format!(
            "unsupported metadata version {version}"
        )));
    }

    let page_size: u64 = caps[2]
        .parse()
        .map_err(|_| BackendError::Metadata("invalid page_size field".to_string()))?;
    let allocated_pages: u64 = caps[3]
        .parse()
        .map_err(|_| BackendError::Metadata("invalid allocated_pages field".to_string()))?;
    let invalid_pages = caps[4]
        .split_whitespace()
        .map(|s| {
            s.parse::<PageId>()
                .map_err(|_| BackendError::Metadata(format!("invalid page id {s:?}")))
        })
        .collect::<Result<HashSet<_>, _>>()?;

    Ok(Metadata {
        page_size,
        allocated_pages,
        invalid_pages,
    })
}

/// A pluggable key-value store addressed by page id.
///
/// Implementations decide for themselves how pages beyond `max_page()`
/// or inside the invalid set are represented on the wire; callers only
/// ever see the zero-fill contract below.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fixed for the lifetime of this backend instance.
    fn page_size(&self) -> u64;

    /// Highest ever-allocated page id, or `None` if the backend is empty.
    fn max_page(&self) -> Option<PageId>;

    /// Truncate: every page with id greater than `new_max` (or every
    /// page, if `new_max` is `None`) is moved into the invalid set.
    async fn set_max_page(&mut self, new_max: Option<PageId>) -> Result<(), BackendError>;

    /// Fill `out` (always exactly `page_size()` bytes) with the contents
    /// of page `id`. Zero-fills for a page beyond `max_page()`, in the
    /// invalid set, or absent from the underlying store.
    async fn read(&self, id: PageId, out: &mut [u8]) -> Result<(), BackendError>;

    /// Store `data` (always exactly `page_size()` bytes) as page `id`,
    /// bump `max_page` if needed, and clear `id` from the invalid set.
    async fn write(&mut self, id: PageId, data: &[u8]) -> Result<(), BackendError>;

    /// Persist metadata (`page_size`, `max_page`, invalid set).
    async fn flush(&mut self) -> Result<(), BackendError>;
}

#[async_trait]
impl Backend for Box<dyn Backend> {
    fn page_size(&self) -> u64 {
        (**self).page_size()
    }

    fn max_page(&self) -> Option<PageId> {
        (**self).max_page()
    }

    async fn set_max_page(&mut self, new_max: Option<PageId>) -> Result<(), BackendError> {
        (**self).set_max_page(new_max).await
    }

    async fn read(&self, id: PageId, out: &mut [u8]) -> Result<(), BackendError> {
        (**self).read(id, out).await
    }

    async fn write(&mut self, id: PageId, data: &[u8]) -> Result<(), BackendError> {
        (**self).write(id, data).await
    }

    async fn flush(&mut self) -> Result<(), BackendError> {
        (**self).flush().await
    }
}
