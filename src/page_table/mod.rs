//! The paged address-space translator: turns arbitrary `(address, len)`
//! byte ranges into whole-page backend operations, cached write-back
//! behind an LRU discipline.

pub mod cache;
pub mod page;

use tracing::{debug, instrument};

use crate::backend::{Backend, PageId};
use crate::error::PageTableError;
use crate::metrics::Metrics;
use cache::LruCache;

const DEFAULT_CACHE_BUDGET_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// One page-sized unit of a decomposed `(addr, len)` range.
struct PageRange {
    page_id: PageId,
    /// Offset within the page.
    page_offset: u64,
    len: u64,
    /// Offset within the caller's buffer.
    buf_offset: u64,
}

/// Split a byte range into the sequence of whole/partial page touches
/// needed to cover it, per this crate's fixed page-decomposition rule:
/// a (possibly partial) first page, zero or more full pages, and an
/// optional (possibly zero-length, in which case it's skipped) final
/// partial page.
fn decompose(addr: u64, len: u64, page_size: u64) -> Vec<PageRange> {
    if len == 0 {
        return Vec::new();
    }

    let min_page = addr / page_size;
    let max_page = (addr + len) / page_size;

    let first_offset = addr - min_page * page_size;
    let first_len = (page_size - first_offset).min(len);

    let mut ranges = vec![PageRange {
        page_id: min_page,
        page_offset: first_offset,
        len: first_len,
        buf_offset: 0,
    }];

    if max_page != min_page {
        let mut buf_offset = first_len;
        for page_id in (min_page + 1)..max_page {
            ranges.push(PageRange {
                page_id,
                page_offset: 0,
                len: page_size,
                buf_offset,
            });
            buf_offset += page_size;
        }

        let final_len = addr + len - max_page * page_size;
        if final_len > 0 {
            ranges.push(PageRange {
                page_id: max_page,
                page_offset: 0,
                len: final_len,
                buf_offset,
            });
        }
    }

    ranges
}

/// The cache-and-translation engine sitting between a block-device
/// interface and a [`Backend`].
pub struct PageTable<B: Backend> {
    backend: B,
    cache: LruCache,
    page_size: u64,
    metrics: Metrics,
}

impl<B: Backend> PageTable<B> {
    /// `page_cache_size == 0` is replaced by the largest page count that
    /// fits in 4 GiB of cache budget.
    pub fn new(backend: B, page_cache_size: usize) -> Self {
        let page_size = backend.page_size();
        let effective_cache_size = if page_cache_size == 0 {
            ((DEFAULT_CACHE_BUDGET_BYTES / page_size).max(1)) as usize
        } else {
            page_cache_size
        };
        PageTable {
            backend,
            cache: LruCache::new(effective_cache_size, page_size as usize),
            page_size,
            metrics: Metrics::new(),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// `0` if the backend is empty, else `(backend.max_page() + 1) * page_size`.
    pub fn eof(&self) -> u64 {
        match self.backend.max_page() {
            None => 0,
            Some(max_page) => (max_page + 1) * self.page_size,
        }
    }

    #[instrument(skip(self, out))]
    pub async fn read(&mut self, addr: u64, out: &mut [u8]) -> Result<(), PageTableError> {
        for range in decompose(addr, out.len() as u64, self.page_size) {
            let idx = self.acquire(range.page_id).await?;
            let page = self.cache.page_mut(idx);
            if page.take_zero_on_use() {
                page.zero_fill();
            }
            let start = range.page_offset as usize;
            let end = start + range.len as usize;
            let buf_start = range.buf_offset as usize;
            let buf_end = buf_start + range.len as usize;
            out[buf_start..buf_end].copy_from_slice(&page.bytes()[start..end]);
        }
        Ok(())
    }

    #[instrument(skip(self, data))]
    pub async fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), PageTableError> {
        for range in decompose(addr, data.len() as u64, self.page_size) {
            let idx = self.acquire(range.page_id).await?;
            let page = self.cache.page_mut(idx);
            let start = range.page_offset as usize;
            let plen = range.len as usize;
            if page.take_zero_on_use() {
                page.zero_fill_except(start, plen);
            }
            let buf_start = range.buf_offset as usize;
            page.bytes_mut()[start..start + plen].copy_from_slice(&data[buf_start..buf_start + plen]);
            page.mark_dirty();
        }
        Ok(())
    }

    /// Store every dirty page, then ask the backend to persist its own
    /// metadata. Clean pages are left untouched — an earlier revision of
    /// this logic wrote every cached page back regardless of its dirty
    /// flag, which this crate does not repeat.
    #[instrument(skip(self))]
    pub async fn flush(&mut self) -> Result<(), PageTableError> {
        let dirty: Vec<(PageId, usize)> = self
            .cache
            .iter()
            .filter(|&(_, idx)| self.cache.page(idx).dirty())
            .collect();

        debug!(count = dirty.len(), "flushing dirty pages");
        for (page_id, idx) in dirty {
            let bytes = self.cache.page(idx).bytes().to_vec();
            match self.backend.write(page_id, &bytes).await {
                Ok(()) => {
                    self.metrics
                        .backend_writes_total
                        .with_label_values(&[backend_label::<B>()])
                        .inc();
                }
                Err(e) => {
                    self.metrics
                        .backend_errors_total
                        .with_label_values(&[backend_label::<B>(), "write"])
                        .inc();
                    return Err(PageTableError::from(e));
                }
            }
            self.cache.page_mut(idx).clear_dirty();
        }
        self.backend.flush().await?;
        Ok(())
    }

    /// Invalidate every cached page beyond the new end-of-allocated
    /// address, then tell the backend to do the same.
    ///
    /// The last valid page id is `ceil(eoa / page_size) - 1` (or "none"
    /// when `eoa == 0`), not the plain `eoa / page_size` floor: when
    /// `eoa` falls exactly on a page boundary, that boundary page has no
    /// valid prefix at all and must itself become invalid, so that
    /// `read` at `eoa` reads zero.
    #[instrument(skip(self))]
    pub async fn truncate(&mut self, eoa: u64) -> Result<(), PageTableError> {
        let page_count = if eoa == 0 {
            0
        } else {
            (eoa + self.page_size - 1) / self.page_size
        };
        let max_id = page_count.checked_sub(1);

        let beyond: Vec<usize> = self
            .cache
            .iter()
            .filter(|&(id, _)| max_id.map(|m| id > m).unwrap_or(true))
            .map(|(_, idx)| idx)
            .collect();
        for idx in beyond {
            self.cache.page_mut(idx).mark_zero_on_use();
        }
        self.backend.set_max_page(max_id).await?;
        Ok(())
    }

    async fn acquire(&mut self, page_id: PageId) -> Result<usize, PageTableError> {
        if let Some(idx) = self.cache.lookup(page_id) {
            self.metrics.cache_hits_total.inc();
            return Ok(idx);
        }
        self.metrics.cache_misses_total.inc();

        // Look at what would be evicted, but do not rename/claim the
        // slot yet: if the dirty victim's write-back below fails, the
        // cache must still know its id and dirty flag so nothing is
        // lost. Only `claim_slot`, called after the write-back succeeds,
        // performs the destructive rename.
        if let Some((victim_idx, victim_id, dirty)) = self.cache.peek_eviction() {
            self.metrics.cache_evictions_total.inc();
            if dirty {
                self.metrics.cache_dirty_evictions_total.inc();
                let bytes = self.cache.page(victim_idx).bytes().to_vec();
                match self.backend.write(victim_id, &bytes).await {
                    Ok(()) => {
                        self.metrics
                            .backend_writes_total
                            .with_label_values(&[backend_label::<B>()])
                            .inc();
                    }
                    Err(e) => {
                        self.metrics
                            .backend_errors_total
                            .with_label_values(&[backend_label::<B>(), "write"])
                            .inc();
                        return Err(PageTableError::from(e));
                    }
                }
            }
        }

        let idx = self.cache.claim_slot(page_id);

        match self
            .backend
            .read(page_id, self.cache.page_mut(idx).bytes_mut())
            .await
        {
            Ok(()) => {
                self.metrics
                    .backend_reads_total
                    .with_label_values(&[backend_label::<B>()])
                    .inc();
                self.cache.commit(idx, page_id);
                Ok(idx)
            }
            Err(e) => {
                self.metrics
                    .backend_errors_total
                    .with_label_values(&[backend_label::<B>(), "read"])
                    .inc();
                self.cache.abandon(idx);
                Err(PageTableError::from(e))
            }
        }
    }
}

/// A short, stable label for the `backend` metrics dimension, derived
/// from the backend type's own name rather than tracked separately —
/// a page table only ever has the one backend it was constructed with.
fn backend_label<B>() -> &'static str {
    std::any::type_name::<B>()
        .rsplit("::")
        .next()
        .unwrap_or("backend")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    use crate::error::BackendError;

    /// An in-memory backend for exact byte-level assertions, standing in
    /// for a real key-value store in these unit tests.
    struct MemoryBackend {
        page_size: u64,
        max_page: Option<PageId>,
        invalid_pages: std::collections::HashSet<PageId>,
        pages: HashMap<PageId, Vec<u8>>,
        read_count: std::sync::atomic::AtomicUsize,
    }

    impl MemoryBackend {
        fn new(page_size: u64) -> Self {
            MemoryBackend {
                page_size,
                max_page: None,
                invalid_pages: Default::default(),
                pages: HashMap::new(),
                read_count: std::sync::atomic::AtomicUsize::new(0),
            }
        }

        fn read_count(&self) -> usize {
            self.read_count.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Backend for MemoryBackend {
        fn page_size(&self) -> u64 {
            self.page_size
        }

        fn max_page(&self) -> Option<PageId> {
            self.max_page
        }

        async fn set_max_page(&mut self, new_max: Option<PageId>) -> Result<(), BackendError> {
            if let Some(old_max) = self.max_page {
                let lower = new_max.map(|m| m + 1).unwrap_or(0);
                for id in lower..=old_max {
                    self.invalid_pages.insert(id);
                }
            }
            self.max_page = new_max;
            Ok(())
        }

        async fn read(&self, id: PageId, out: &mut [u8]) -> Result<(), BackendError> {
            self.read_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let beyond = self.max_page.map(|m| id > m).unwrap_or(true);
            if beyond || self.invalid_pages.contains(&id) {
                out.fill(0);
                return Ok(());
            }
            match self.pages.get(&id) {
                Some(bytes) => out.copy_from_slice(bytes),
                None => out.fill(0),
            }
            Ok(())
        }

        async fn write(&mut self, id: PageId, data: &[u8]) -> Result<(), BackendError> {
            self.pages.insert(id, data.to_vec());
            self.max_page = Some(self.max_page.map(|m| m.max(id)).unwrap_or(id));
            self.invalid_pages.remove(&id);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[test]
    fn decompose_single_page_write() {
        let ranges = decompose(10, 3, 64);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].page_id, 0);
        assert_eq!(ranges[0].page_offset, 10);
        assert_eq!(ranges[0].len, 3);
    }

    #[test]
    fn decompose_cross_page_write() {
        // page_size = 64, write spans bytes 60..70: page 0 offset 60 len 4, page 1 offset 0 len 6.
        let ranges = decompose(60, 10, 64);
        assert_eq!(ranges.len(), 2);
        assert_eq!((ranges[0].page_id, ranges[0].page_offset, ranges[0].len), (0, 60, 4));
        assert_eq!((ranges[1].page_id, ranges[1].page_offset, ranges[1].len), (1, 0, 6));
    }

    #[test]
    fn decompose_page_aligned_end_skips_trailing_slice() {
        let ranges = decompose(0, 64, 64);
        assert_eq!(ranges.len(), 1);
        assert_eq!((ranges[0].page_id, ranges[0].len), (0, 64));
    }

    #[tokio::test]
    async fn partial_write_then_cross_page_read_exact_bytes() {
        // page_size = 64, cache size = 4.
        let backend = MemoryBackend::new(64);
        let mut table = PageTable::new(backend, 4);

        table.write(10, b"abc").await.unwrap();
        table.write(70, b"def").await.unwrap();

        let mut out = vec![0xFFu8; 30];
        table.read(2, &mut out).await.unwrap();

        let mut expected = vec![0u8; 30];
        // addr 2..32 covers: zeros 2..10, "abc" at 10..13, zeros up to 31.
        expected[8] = b'a';
        expected[9] = b'b';
        expected[10] = b'c';
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn lru_eviction_flushes_dirty_pages_then_survives_reopen() {
        let backend = MemoryBackend::new(16);
        let mut table = PageTable::new(backend, 2);

        table.write(0, &[1u8; 16]).await.unwrap();
        table.write(16, &[2u8; 16]).await.unwrap();
        table.write(32, &[3u8; 16]).await.unwrap(); // evicts page 0

        table.flush().await.unwrap();

        let mut out = vec![0u8; 16];
        table.read(0, &mut out).await.unwrap();
        assert_eq!(out, vec![1u8; 16]);
        table.read(16, &mut out).await.unwrap();
        assert_eq!(out, vec![2u8; 16]);
        table.read(32, &mut out).await.unwrap();
        assert_eq!(out, vec![3u8; 16]);
    }

    #[tokio::test]
    async fn truncate_zeroes_the_tail() {
        let backend = MemoryBackend::new(64 * 1024);
        let mut table = PageTable::new(backend, 32);

        let one_mb = vec![0xFFu8; 1024 * 1024];
        table.write(0, &one_mb).await.unwrap();
        table.flush().await.unwrap();

        table.truncate(512 * 1024).await.unwrap();
        table.flush().await.unwrap();

        let mut buf = vec![0u8; 4096];
        table.read(0, &mut buf).await.unwrap();
        assert_eq!(buf, vec![0xFFu8; 4096]);

        table.read(512 * 1024, &mut buf).await.unwrap();
        assert_eq!(buf, vec![0u8; 4096]);
    }

    #[tokio::test]
    async fn read_before_any_write_is_all_zero() {
        let backend = MemoryBackend::new(32);
        let mut table = PageTable::new(backend, 4);
        let mut out = vec![0xAAu8; 32];
        table.read(0, &mut out).await.unwrap();
        assert_eq!(out, vec![0u8; 32]);
    }

    #[tokio::test]
    async fn flush_is_idempotent_and_clears_dirty() {
        let backend = MemoryBackend::new(16);
        let mut table = PageTable::new(backend, 4);
        table.write(0, &[1u8; 16]).await.unwrap();
        table.flush().await.unwrap();
        table.flush().await.unwrap();
        let (_, idx) = (0, table.cache.lookup(0).unwrap());
        assert!(!table.cache.page(idx).dirty());
    }

    #[tokio::test]
    async fn distinct_page_accesses_within_capacity_cause_one_backend_read_each() {
        let backend = MemoryBackend::new(16);
        let mut table = PageTable::new(backend, 4);
        let mut buf = vec![0u8; 16];
        for id in 0..4u64 {
            table.read(id * 16, &mut buf).await.unwrap();
            table.read(id * 16, &mut buf).await.unwrap();
        }
        assert_eq!(table.backend.read_count(), 4);
    }
}
