use anyhow::Result;

use crate::buffer_pool::guard::{ArcBufferPoolExt, ReadPageGuard};
use crate::buffer_pool::ArcBufferPool;
use crate::pages::b_plus_tree::{Key, LeafPage, Value};
use crate::pages::INVALID_PAGE_ID;

/// Forward range iterator over a tree's leaves (§4.4.5). Holds a read latch
/// on exactly one leaf at a time, advancing across `next_page_id` links —
/// the same single-leaf-at-a-time latching the teacher's own table
/// iterators use (`pages/table_page_iterator.rs` upstream), adapted from
/// tuple slots to `(Key, Value)` pairs.
pub struct TreeIterator {
    bpm: ArcBufferPool,
    guard: Option<ReadPageGuard>,
    offset: usize,
}

impl TreeIterator {
    pub(super) fn new(bpm: ArcBufferPool, guard: ReadPageGuard, offset: usize) -> Self {
        Self {
            bpm,
            guard: Some(guard),
            offset,
        }
    }

    pub(super) fn empty(bpm: ArcBufferPool) -> Self {
        Self {
            bpm,
            guard: None,
            offset: 0,
        }
    }

    pub fn is_end(&self) -> bool {
        self.guard.is_none()
    }

    /// The entry under the cursor, or `None` at end-of-range.
    pub fn current(&self) -> Option<(Key, Value)> {
        let guard = self.guard.as_ref()?;
        let leaf: LeafPage = guard.as_type();
        if self.offset >= leaf.size() {
            return None;
        }
        Some((leaf.key_at(self.offset), leaf.value_at(self.offset)))
    }

    /// Moves the cursor forward by one entry, releasing the current leaf's
    /// read latch and acquiring the next one's when the leaf is exhausted.
    pub fn advance(&mut self) -> Result<()> {
        let Some(guard) = self.guard.as_ref() else {
            return Ok(());
        };

        let (size, next_page_id) = {
            let leaf: LeafPage = guard.as_type();
            (leaf.size(), leaf.next_page_id())
        };

        self.offset += 1;
        if self.offset < size {
            return Ok(());
        }

        if next_page_id == INVALID_PAGE_ID {
            self.guard = None;
        } else {
            self.guard = self.bpm.fetch_page_read(next_page_id)?;
            self.offset = 0;
        }

        Ok(())
    }
}
