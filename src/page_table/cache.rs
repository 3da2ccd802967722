//! A fixed-capacity LRU cache of page buffers, implemented as a slab of
//! slots threaded into a doubly linked list rather than on top of the
//! `lru` crate: eviction must rename the LRU tail's buffer in place
//! (reusing its allocation for the incoming page) instead of dropping
//! and reallocating, which the `lru` crate's keyed `put`/`pop_lru` API
//! has no way to express.
//!
//! Eviction is split into [`LruCache::peek_eviction`] (read-only) and
//! [`LruCache::claim_slot`] (destructive rename) on purpose: a caller that
//! must write a dirty victim back to a backend before reusing its buffer
//! needs to know the victim's id and bytes *before* anything is mutated,
//! so a failed write-back never leaves the cache having already forgotten
//! the victim it couldn't persist.

use std::collections::HashMap;

use crate::backend::PageId;
use crate::page_table::page::PageBuf;

struct Slot {
    page: PageBuf,
    /// The page id this slot currently represents. Set as soon as the
    /// slot is claimed (fresh or renamed), even before the backend load
    /// that will populate its bytes has completed.
    page_id: Option<PageId>,
    prev: Option<usize>,
    next: Option<usize>,
}

pub struct LruCache {
    capacity: usize,
    page_size: usize,
    slots: Vec<Slot>,
    index: HashMap<PageId, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl LruCache {
    pub fn new(capacity: usize, page_size: usize) -> Self {
        assert!(capacity > 0, "page cache must hold at least one page");
        LruCache {
            capacity,
            page_size,
            slots: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of physically allocated slots (<= capacity). This only
    /// grows; once it reaches capacity, every further miss reuses a
    /// slot by renaming rather than allocating a new one.
    pub fn allocated(&self) -> usize {
        self.slots.len()
    }

    /// Look up `id`. On a hit, promotes the slot to most-recently-used
    /// and returns its index.
    pub fn lookup(&mut self, id: PageId) -> Option<usize> {
        let idx = *self.index.get(&id)?;
        self.promote_to_front(idx);
        Some(idx)
    }

    /// Look at what claiming a slot for a new page would evict, without
    /// mutating anything: `None` if the cache has not yet reached
    /// capacity (a fresh slot will be used), else the LRU tail slot's
    /// index, id, and dirty flag.
    ///
    /// Callers must write back a dirty victim *before* calling
    /// [`Self::claim_slot`] — once that runs, the victim's identity and
    /// dirty flag are gone for good, renamed in place to the new page.
    pub fn peek_eviction(&self) -> Option<(usize, PageId, bool)> {
        if self.slots.len() < self.capacity {
            return None;
        }
        let idx = self
            .tail
            .expect("a full cache with capacity > 0 always has a tail");
        let victim_id = self.slots[idx]
            .page_id
            .expect("every slot in a full cache has previously held a page");
        Some((idx, victim_id, self.slots[idx].page.dirty()))
    }

    /// Claim a slot to load `id` into: either a fresh slot, or (if the
    /// cache is at capacity) the LRU tail, renamed in place and reset.
    ///
    /// The claimed slot is left at the LRU tail, unindexed, until
    /// [`Self::commit`] confirms the backend load succeeded.
    pub fn claim_slot(&mut self, id: PageId) -> usize {
        if self.slots.len() < self.capacity {
            self.push_back_fresh(id)
        } else {
            let idx = self
                .tail
                .expect("a full cache with capacity > 0 always has a tail");
            let victim_id = self.slots[idx]
                .page_id
                .expect("every slot in a full cache has previously held a page");
            self.index.remove(&victim_id);
            self.slots[idx].page_id = Some(id);
            self.slots[idx].page.reset();
            idx
        }
    }

    /// Confirm that `idx` now holds valid data for `id`: index it and
    /// promote it to most-recently-used.
    pub fn commit(&mut self, idx: usize, id: PageId) {
        self.index.insert(id, idx);
        self.promote_to_front(idx);
    }

    /// Abandon a failed load. The slot is left exactly where
    /// [`Self::acquire_slot`] put it (LRU tail, unindexed), so the next
    /// miss reuses it again rather than growing the cache further.
    pub fn abandon(&mut self, _idx: usize) {}

    pub fn page(&self, idx: usize) -> &PageBuf {
        &self.slots[idx].page
    }

    pub fn page_mut(&mut self, idx: usize) -> &mut PageBuf {
        &mut self.slots[idx].page
    }

    /// Every currently indexed (valid) page, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (PageId, usize)> + '_ {
        self.index.iter().map(|(&id, &idx)| (id, idx))
    }

    fn push_back_fresh(&mut self, id: PageId) -> usize {
        let idx = self.slots.len();
        self.slots.push(Slot {
            page: PageBuf::new_zeroed(self.page_size),
            page_id: Some(id),
            prev: self.tail,
            next: None,
        });
        if let Some(tail) = self.tail {
            self.slots[tail].next = Some(idx);
        } else {
            self.head = Some(idx);
        }
        self.tail = Some(idx);
        idx
    }

    fn unlink(&mut self, idx: usize) {
        let prev = self.slots[idx].prev;
        let next = self.slots[idx].next;
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[idx].prev = None;
        self.slots[idx].next = None;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        self.slots[idx].next = old_head;
        if let Some(head) = old_head {
            self.slots[head].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn promote_to_front(&mut self, idx: usize) {
        self.unlink(idx);
        self.push_front(idx);
    }
}
