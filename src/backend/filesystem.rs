//! Local-directory key-value backend: one file per page, plus a `.meta`
//! side-car. Writes go through a write-to-temp + fsync + rename so a
//! crash mid-write never leaves a torn page file on disk.

use std::collections::HashSet;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::backend::{parse_metadata, serialize_metadata, Backend, Metadata, PageId};
use crate::error::BackendError;

const DEFAULT_PAGE_SIZE: u64 = 2 * 1024 * 1024;
const META_FILE_NAME: &str = ".meta";

pub struct FilesystemBackend {
    root: PathBuf,
    page_size: u64,
    max_page: Option<PageId>,
    invalid_pages: HashSet<PageId>,
}

impl FilesystemBackend {
    /// Open (creating if needed) a directory-backed store at `root`.
    ///
    /// `requested_page_size` of `0` adopts the existing metadata's page
    /// size, or [`DEFAULT_PAGE_SIZE`] for a brand new store. A nonzero
    /// request against an existing store must match exactly.
    #[instrument(skip(root))]
    pub async fn from_params(
        root: impl Into<PathBuf>,
        requested_page_size: u64,
    ) -> Result<Self, BackendError> {
        let root = root.into();
        let root_for_blocking = root.clone();
        tokio::task::spawn_blocking(move || std::fs::create_dir_all(&root_for_blocking))
            .await
            .expect("blocking task panicked")?;

        let meta_path = root.join(META_FILE_NAME);
        let existing = read_if_exists(&meta_path).await?;

        match existing {
            Some(text) => {
                let meta = parse_metadata(&text)?;
                if requested_page_size != 0 && requested_page_size != meta.page_size {
                    return Err(BackendError::PageSizeMismatch {
                        existing: meta.page_size,
                        requested: requested_page_size,
                    });
                }
                debug!(page_size = meta.page_size, "opened existing filesystem backend");
                Ok(FilesystemBackend {
                    root,
                    page_size: meta.page_size,
                    max_page: if meta.allocated_pages == 0 {
                        None
                    } else {
                        Some(meta.allocated_pages - 1)
                    },
                    invalid_pages: meta.invalid_pages,
                })
            }
            None => {
                let page_size = if requested_page_size == 0 {
                    DEFAULT_PAGE_SIZE
                } else {
                    requested_page_size
                };
                debug!(page_size, "initialized new filesystem backend");
                Ok(FilesystemBackend {
                    root,
                    page_size,
                    max_page: None,
                    invalid_pages: HashSet::new(),
                })
            }
        }
    }

    fn page_path(&self, id: PageId) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn metadata(&self) -> Metadata {
        Metadata {
            page_size: self.page_size,
            allocated_pages: self.max_page.map(|m| m + 1).unwrap_or(0),
            invalid_pages: self.invalid_pages.clone(),
        }
    }
}

async fn read_if_exists(path: &Path) -> Result<Option<String>, BackendError> {
    let path = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || match std::fs::read_to_string(&path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    })
    .await
    .expect("blocking task panicked")?;
    Ok(result)
}

async fn read_page_if_exists(path: PathBuf) -> Result<Option<Vec<u8>>, BackendError> {
    tokio::task::spawn_blocking(move || match std::fs::read(&path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    })
    .await
    .expect("blocking task panicked")
    .map_err(to_backend_error)
}

/// Write `data` to `path` atomically: write to a sibling temp file,
/// `fsync`, then rename over the destination.
fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().expect("page/meta paths always have a parent");
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn to_backend_error(e: std::io::Error) -> BackendError {
    if e.raw_os_error() == Some(libc::ENOSPC) {
        BackendError::DiskFull
    } else {
        BackendError::Io(e)
    }
}

#[async_trait]
impl Backend for FilesystemBackend {
    fn page_size(&self) -> u64 {
        self.page_size
    }

    fn max_page(&self) -> Option<PageId> {
        self.max_page
    }

    #[instrument(skip(self))]
    async fn set_max_page(&mut self, new_max: Option<PageId>) -> Result<(), BackendError> {
        if let Some(old_max) = self.max_page {
            let lower_bound = new_max.map(|m| m + 1).unwrap_or(0);
            let paths: Vec<PathBuf> = (lower_bound..=old_max).map(|id| self.page_path(id)).collect();
            tokio::task::spawn_blocking(move || {
                for path in &paths {
                    match std::fs::remove_file(path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(())
            })
            .await
            .expect("blocking task panicked")
            .map_err(to_backend_error)?;

            for id in lower_bound..=old_max {
                self.invalid_pages.insert(id);
            }
        }
        self.max_page = new_max;
        Ok(())
    }

    #[instrument(skip(self, out))]
    async fn read(&self, id: PageId, out: &mut [u8]) -> Result<(), BackendError> {
        debug_assert_eq!(out.len() as u64, self.page_size);

        let beyond_max = self.max_page.map(|m| id > m).unwrap_or(true);
        if beyond_max || self.invalid_pages.contains(&id) {
            out.fill(0);
            return Ok(());
        }

        match read_page_if_exists(self.page_path(id)).await? {
            Some(bytes) => {
                out.fill(0);
                let n = bytes.len().min(out.len());
                out[..n].copy_from_slice(&bytes[..n]);
            }
            None => out.fill(0),
        }
        Ok(())
    }

    #[instrument(skip(self, data))]
    async fn write(&mut self, id: PageId, data: &[u8]) -> Result<(), BackendError> {
        debug_assert_eq!(data.len() as u64, self.page_size);

        let path = self.page_path(id);
        let owned = data.to_vec();
        tokio::task::spawn_blocking(move || atomic_write(&path, &owned))
            .await
            .expect("blocking task panicked")
            .map_err(to_backend_error)?;

        self.max_page = Some(self.max_page.map(|m| m.max(id)).unwrap_or(id));
        self.invalid_pages.remove(&id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn flush(&mut self) -> Result<(), BackendError> {
        let meta_path = self.root.join(META_FILE_NAME);
        let text = serialize_metadata(&self.metadata());
        tokio::task::spawn_blocking(move || atomic_write(&meta_path, text.as_bytes()))
            .await
            .expect("blocking task panicked")
            .map_err(to_backend_error)?;
        debug!(allocated_pages = self.metadata().allocated_pages, "flushed filesystem backend metadata");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn zero_fills_unwritten_page() {
        let dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::from_params(dir.path(), 16).await.unwrap();
        let mut buf = vec![0xFFu8; 16];
        backend.read(0, &mut buf).await.unwrap();
        assert_eq!(buf, vec![0u8; 16]);
    }

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let dir = TempDir::new().unwrap();
        let mut backend = FilesystemBackend::from_params(dir.path(), 16).await.unwrap();
        backend.write(2, &[7u8; 16]).await.unwrap();
        let mut buf = vec![0u8; 16];
        backend.read(2, &mut buf).await.unwrap();
        assert_eq!(buf, vec![7u8; 16]);
        assert_eq!(backend.max_page(), Some(2));
    }

    #[tokio::test]
    async fn flush_then_reopen_preserves_data_and_page_size() {
        let dir = TempDir::new().unwrap();
        {
            let mut backend = FilesystemBackend::from_params(dir.path(), 16).await.unwrap();
            backend.write(0, &[9u8; 16]).await.unwrap();
            backend.flush().await.unwrap();
        }
        let backend = FilesystemBackend::from_params(dir.path(), 16).await.unwrap();
        let mut buf = vec![0u8; 16];
        backend.read(0, &mut buf).await.unwrap();
        assert_eq!(buf, vec![9u8; 16]);
    }

    #[tokio::test]
    async fn reopening_with_different_page_size_is_rejected() {
        let dir = TempDir::new().unwrap();
        {
            let mut backend = FilesystemBackend::from_params(dir.path(), 16).await.unwrap();
            backend.flush().await.unwrap();
        }
        let result = FilesystemBackend::from_params(dir.path(), 32).await;
        assert!(matches!(result, Err(BackendError::PageSizeMismatch { .. })));
    }

    #[tokio::test]
    async fn set_max_page_invalidates_truncated_pages() {
        let dir = TempDir::new().unwrap();
        let mut backend = FilesystemBackend::from_params(dir.path(), 16).await.unwrap();
        backend.write(0, &[1u8; 16]).await.unwrap();
        backend.write(1, &[2u8; 16]).await.unwrap();
        backend.write(2, &[3u8; 16]).await.unwrap();
        backend.set_max_page(Some(0)).await.unwrap();
        let mut buf = vec![0xFFu8; 16];
        backend.read(2, &mut buf).await.unwrap();
        assert_eq!(buf, vec![0u8; 16]);
    }

    #[tokio::test]
    async fn set_max_page_deletes_truncated_page_files() {
        let dir = TempDir::new().unwrap();
        let mut backend = FilesystemBackend::from_params(dir.path(), 16).await.unwrap();
        backend.write(0, &[1u8; 16]).await.unwrap();
        backend.write(1, &[2u8; 16]).await.unwrap();
        backend.write(2, &[3u8; 16]).await.unwrap();

        backend.set_max_page(Some(0)).await.unwrap();

        assert!(dir.path().join("0").exists());
        assert!(!dir.path().join("1").exists());
        assert!(!dir.path().join("2").exists());
    }

    #[tokio::test]
    async fn set_max_page_none_deletes_every_page_file() {
        let dir = TempDir::new().unwrap();
        let mut backend = FilesystemBackend::from_params(dir.path(), 16).await.unwrap();
        backend.write(0, &[1u8; 16]).await.unwrap();
        backend.write(1, &[2u8; 16]).await.unwrap();

        backend.set_max_page(None).await.unwrap();

        assert!(!dir.path().join("0").exists());
        assert!(!dir.path().join("1").exists());
    }
}
