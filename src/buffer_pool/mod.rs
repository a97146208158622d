pub mod frame;
pub mod guard;
mod replacer;

use crate::disk_manager::{DiskManager, DISK_STORAGE};
use crate::errors::Error;
#[cfg(debug_assertions)]
use crate::get_caller_name;
use crate::pages::{Page, PageId};
use crate::printdbg;
use anyhow::Result;
use frame::Frame;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use replacer::LruKReplacer;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Default LRU-K window, matching the CMU 15-445 reference implementation's
/// own default.
pub const DEFAULT_LRU_K: usize = 2;
pub const DEFAULT_POOL_SIZE: usize = 10_000;

pub type FrameId = usize;
pub type ArcBufferPool = Arc<Mutex<BufferPoolManager>>;

/// Runtime parameters the pool is constructed with (§4.6, §6): pool size,
/// the LRU-K window, and the page size this build is compiled for.
/// `page_size` isn't actually adjustable — `Page`'s buffer is a
/// compile-time-sized array — so it's validated against `pages::PAGE_SIZE`
/// at construction rather than silently ignored, the way a caller pinned to
/// a specific page size would want to find out immediately.
#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    pub pool_size: usize,
    pub k: usize,
    pub page_size: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            k: DEFAULT_LRU_K,
            page_size: crate::pages::PAGE_SIZE,
        }
    }
}

/// Fixed-size buffer pool over a page-id-keyed disk store. `frames` is
/// allocated once at construction and never resized afterwards — every raw
/// pointer a page guard (`buffer_pool::guard`) holds into a frame's `Page`
/// stays valid for as long as that frame remains pinned, the same invariant
/// the teacher's `IndexPage` raw-pointer reinterpretation relies on (see
/// `pages/b_plus_tree/internal_page.rs`).
///
/// A single coarse mutex (via `ArcBufferPool = Arc<Mutex<..>>`) serializes
/// every operation here; page data latches are a separate, per-page concern
/// (`pages::latch::Latch`), acquired only through guards after this lock is
/// released.
pub struct BufferPoolManager {
    disk_manager: DiskManager,

    free_list: VecDeque<FrameId>,
    page_table: HashMap<PageId, FrameId>,
    frames: Vec<Frame>,

    replacer: LruKReplacer,
}

impl BufferPoolManager {
    pub fn get() -> ArcBufferPool {
        BUFFER_POOL.clone()
    }

    pub fn new(pool_size: usize, path: &str) -> Self {
        Self::with_k(pool_size, DEFAULT_LRU_K, path)
    }

    pub fn with_k(pool_size: usize, k: usize, path: &str) -> Self {
        let frames = (0..pool_size).map(Frame::new).collect::<Vec<_>>();

        Self {
            disk_manager: DiskManager::new(path),
            free_list: VecDeque::from_iter(0..pool_size),
            page_table: HashMap::with_capacity(pool_size),
            frames,
            replacer: LruKReplacer::new(pool_size, k),
        }
    }

    /// Constructs from a [`BufferPoolConfig`]; rejects a `page_size` that
    /// doesn't match this build's fixed `PAGE_SIZE`.
    pub fn with_config(config: BufferPoolConfig, path: &str) -> Result<Self> {
        anyhow::ensure!(
            config.page_size == crate::pages::PAGE_SIZE,
            "configured page_size {} does not match this build's PAGE_SIZE {}",
            config.page_size,
            crate::pages::PAGE_SIZE
        );

        Ok(Self::with_k(config.pool_size, config.k, path))
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Shared subroutine (§4.2): pop from the free list, else ask the
    /// replacer for a victim, writing it back first if dirty.
    fn acquire_frame(&mut self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self
            .replacer
            .evict()
            .ok_or(Error::PoolExhausted)
            .map_err(anyhow::Error::from)?;

        let frame = &mut self.frames[frame_id];
        debug_assert_eq!(frame.pin_count(), 0);

        if frame.page().is_dirty() {
            printdbg!(
                "evicting frame {frame_id} (page {}), writing back dirty page",
                frame.page().page_id()
            );
            self.disk_manager
                .write_page(frame.page().page_id(), &frame.page().bytes())?;
        }

        self.page_table.remove(&frame.page().page_id());
        frame.reset();

        Ok(frame_id)
    }

    /// `NewPage` (§4.2). Returns `None` on pool exhaustion.
    pub fn new_page(&mut self) -> Result<Option<PageId>> {
        Ok(self.new_page_raw()?.map(|(page_id, _)| page_id))
    }

    /// Same as `new_page`, but also hands back the raw pointer into the
    /// frame's `Page` so page guards can be constructed without re-fetching
    /// (and double-pinning) the page that was just created.
    pub(crate) fn new_page_raw(&mut self) -> Result<Option<(PageId, *mut Page)>> {
        let frame_id = match self.acquire_frame() {
            Ok(id) => id,
            Err(_) => return Ok(None),
        };

        let page_id = self.disk_manager.allocate_page();

        let frame = &mut self.frames[frame_id];
        frame.page_mut().set_page_id(page_id);
        frame.pin();

        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
        self.page_table.insert(page_id, frame_id);

        printdbg!(
            "{} created page {page_id} in frame {frame_id}",
            get_caller_name!()
        );

        Ok(Some((page_id, frame.page_mut() as *mut Page)))
    }

    /// `FetchPage` (§4.2). Returns `None` on pool exhaustion for a cold page.
    pub fn fetch_page(&mut self, page_id: PageId) -> Result<Option<*mut Page>> {
        if let Some(&frame_id) = self.page_table.get(&page_id) {
            let frame = &mut self.frames[frame_id];
            frame.pin();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);

            printdbg!(
                "{} fetched resident page {page_id} (frame {frame_id}), pins {}",
                get_caller_name!(),
                frame.pin_count()
            );

            return Ok(Some(frame.page_mut() as *mut Page));
        }

        let frame_id = match self.acquire_frame() {
            Ok(id) => id,
            Err(_) => return Ok(None),
        };

        let bytes = self.disk_manager.read_page(page_id)?;

        let frame = &mut self.frames[frame_id];
        frame.page_mut().set_page_id(page_id);
        frame.page_mut().load_bytes(&bytes);
        frame.page_mut().clear_dirty();
        frame.pin();

        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
        self.page_table.insert(page_id, frame_id);

        Ok(Some(frame.page_mut() as *mut Page))
    }

    /// `UnpinPage` (§4.2). `is_dirty` is OR'ed into the page's dirty bit.
    pub fn unpin_page(&mut self, page_id: PageId, is_dirty: bool) -> bool {
        let Some(&frame_id) = self.page_table.get(&page_id) else {
            return false;
        };

        let frame = &mut self.frames[frame_id];
        if frame.pin_count() == 0 {
            return false;
        }

        if is_dirty {
            frame.page_mut().set_dirty(true);
        }
        frame.unpin();

        printdbg!(
            "{} unpinned page {page_id} (frame {frame_id}), pins {}",
            get_caller_name!(),
            frame.pin_count()
        );

        if frame.pin_count() == 0 {
            self.replacer.set_evictable(frame_id, true);
        }

        true
    }

    /// `FlushPage` (§4.2). Writes regardless of dirty, always clears it.
    pub fn flush_page(&mut self, page_id: PageId) -> Result<bool> {
        let Some(&frame_id) = self.page_table.get(&page_id) else {
            return Ok(false);
        };

        let frame = &mut self.frames[frame_id];
        self.disk_manager.write_page(page_id, &frame.page().bytes())?;
        frame.page_mut().clear_dirty();

        Ok(true)
    }

    pub fn flush_all_pages(&mut self) -> Result<()> {
        let page_ids: Vec<PageId> = self.page_table.keys().copied().collect();
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// `DeletePage` (§4.2). `true` if the page is absent afterwards; `false`
    /// (not an error) if it's still pinned — a pinned page is an expected,
    /// recoverable outcome here, not an exceptional one.
    pub fn delete_page(&mut self, page_id: PageId) -> Result<bool> {
        let Some(&frame_id) = self.page_table.get(&page_id) else {
            return Ok(true);
        };

        if self.frames[frame_id].pin_count() > 0 {
            return Ok(false);
        }

        if self.frames[frame_id].page().is_dirty() {
            let bytes = self.frames[frame_id].page().bytes();
            self.disk_manager.write_page(page_id, &bytes)?;
        }

        self.frames[frame_id].reset();
        self.replacer.remove(frame_id);
        self.page_table.remove(&page_id);
        self.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);

        Ok(true)
    }

    #[cfg(test)]
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let &frame_id = self.page_table.get(&page_id)?;
        Some(self.frames[frame_id].pin_count())
    }
}

lazy_static! {
    static ref BUFFER_POOL: ArcBufferPool = Arc::new(Mutex::new(
        BufferPoolManager::with_config(BufferPoolConfig::default(), DISK_STORAGE)
            .expect("default BufferPoolConfig always matches this build's PAGE_SIZE")
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk_manager::test_path;

    fn test_bpm(size: usize) -> BufferPoolManager {
        BufferPoolManager::new(size, &test_path())
    }

    #[test]
    fn test_dont_evict_pinned() -> Result<()> {
        let mut bpm = test_bpm(2);

        let p1 = bpm.new_page()?.unwrap();
        let p2 = bpm.new_page()?.unwrap();

        assert!(bpm.new_page()?.is_none());

        bpm.unpin_page(p1, false);
        assert!(bpm.new_page()?.is_some());

        bpm.unpin_page(p2, false);
        Ok(())
    }

    #[test]
    fn test_pool_exhaustion_then_recovery() -> Result<()> {
        // Scenario 2 from SPEC_FULL.md §8.
        let mut bpm = test_bpm(3);

        let p0 = bpm.new_page()?.unwrap();
        let p1 = bpm.new_page()?.unwrap();
        let _p2 = bpm.new_page()?.unwrap();

        assert!(bpm.new_page()?.is_none());

        bpm.unpin_page(p1, true);
        let p3 = bpm.new_page()?;
        assert!(p3.is_some());

        // p1's frame was reused, so it's no longer resident.
        assert!(bpm.pin_count(p1).is_none());

        bpm.unpin_page(p0, false);
        Ok(())
    }

    #[test]
    fn test_round_trip_via_disk() -> Result<()> {
        // Scenario 3 from SPEC_FULL.md §8.
        let mut bpm = test_bpm(1);

        let page_id = bpm.new_page()?.unwrap();
        let page = bpm.fetch_page(page_id)?.unwrap();
        unsafe { (*page).write_bytes(0, 4, &[1, 2, 3, 4]) };
        bpm.unpin_page(page_id, true);
        bpm.unpin_page(page_id, true); // from new_page's implicit pin

        // Force the only frame to be evicted and written back.
        let other_id = bpm.new_page()?.unwrap();
        bpm.unpin_page(other_id, false);

        let page = bpm.fetch_page(page_id)?.unwrap();
        assert_eq!(unsafe { (*page).read_bytes(0, 4) }, &[1, 2, 3, 4]);
        bpm.unpin_page(page_id, false);

        Ok(())
    }

    #[test]
    fn test_delete_page_requires_unpinned() -> Result<()> {
        let mut bpm = test_bpm(2);

        let page_id = bpm.new_page()?.unwrap();
        assert!(!bpm.delete_page(page_id)?);

        bpm.unpin_page(page_id, false);
        assert!(bpm.delete_page(page_id)?);
        assert!(bpm.pin_count(page_id).is_none());

        Ok(())
    }

    #[test]
    fn test_unpin_unknown_page_returns_false() {
        let mut bpm = test_bpm(2);
        assert!(!bpm.unpin_page(9999, false));
    }

    #[test]
    fn test_with_config_accepts_default() {
        let config = BufferPoolConfig::default();
        let bpm = BufferPoolManager::with_config(config, &test_path()).unwrap();
        assert_eq!(bpm.pool_size(), DEFAULT_POOL_SIZE);
    }

    #[test]
    fn test_with_config_rejects_mismatched_page_size() {
        let config = BufferPoolConfig {
            page_size: crate::pages::PAGE_SIZE + 1,
            ..BufferPoolConfig::default()
        };
        assert!(BufferPoolManager::with_config(config, &test_path()).is_err());
    }
}
