//! A single cached page: its bytes plus the two flags the eviction and
//! truncation logic need.

/// One page's bytes, plus dirty/zero-on-use bookkeeping.
///
/// `zero_on_use` marks a page logically invalidated by truncation
/// without paying for an eager memset: the next `read` zeros the whole
/// buffer, and the next `write` zeros only the bytes outside the write
/// range, before either clears the flag.
pub struct PageBuf {
    bytes: Vec<u8>,
    dirty: bool,
    zero_on_use: bool,
}

impl PageBuf {
    pub fn new_zeroed(page_size: usize) -> Self {
        PageBuf {
            bytes: vec![0u8; page_size],
            dirty: false,
            zero_on_use: false,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn mark_zero_on_use(&mut self) {
        self.zero_on_use = true;
        self.dirty = false;
    }

    /// Reset for reuse by a renamed/freshly-loaded cache node: clears
    /// both flags. Does not touch the bytes — the caller is about to
    /// overwrite them from the backend.
    pub fn reset(&mut self) {
        self.dirty = false;
        self.zero_on_use = false;
    }

    /// Apply lazy-zeroing before a full-page load from the backend
    /// overwrites `self.bytes` anyway; a no-op fast path for the common
    /// case where the flag isn't set.
    pub fn take_zero_on_use(&mut self) -> bool {
        let was_set = self.zero_on_use;
        self.zero_on_use = false;
        was_set
    }

    /// Zero the whole buffer — used when a `read` observes `zero_on_use`.
    pub fn zero_fill(&mut self) {
        self.bytes.fill(0);
    }

    /// Zero every byte outside `[offset, offset+len)` — used when a
    /// `write` observes `zero_on_use`, since the write itself is about
    /// to fill that range.
    pub fn zero_fill_except(&mut self, offset: usize, len: usize) {
        self.bytes[..offset].fill(0);
        self.bytes[offset + len..].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_page_is_all_zero_and_clean() {
        let p = PageBuf::new_zeroed(8);
        assert_eq!(p.bytes(), &[0u8; 8]);
        assert!(!p.dirty());
    }

    #[test]
    fn zero_fill_except_preserves_only_the_given_range() {
        let mut p = PageBuf::new_zeroed(8);
        p.bytes_mut().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        p.zero_fill_except(2, 3);
        assert_eq!(p.bytes(), &[0, 0, 3, 4, 5, 0, 0, 0]);
    }

    #[test]
    fn take_zero_on_use_clears_the_flag() {
        let mut p = PageBuf::new_zeroed(4);
        p.mark_zero_on_use();
        assert!(p.take_zero_on_use());
        assert!(!p.take_zero_on_use());
    }
}
