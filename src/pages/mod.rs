pub mod b_plus_tree;
pub(crate) mod latch;

use latch::Latch;

pub const PAGE_SIZE: usize = 4096; // 4 KBs
pub const INVALID_PAGE_ID: PageId = -1;

pub type PageId = i64;

/// A generic page: a fixed [`PAGE_SIZE`] byte buffer plus the metadata the
/// buffer pool needs to track it. Other page layouts reinterpret `data` in
/// place via `From<&Page>`/`From<&mut Page>` rather than copying out of it.
#[repr(C, align(4))]
#[derive(Debug)]
pub struct Page {
    data: [u8; PAGE_SIZE],
    is_dirty: bool,
    pin_count: u32,
    page_id: PageId,
    latch: Latch,
}

impl Default for Page {
    fn default() -> Self {
        Page::new()
    }
}

impl Page {
    pub fn new() -> Self {
        Page {
            data: [0u8; PAGE_SIZE],
            is_dirty: false,
            pin_count: 0,
            page_id: INVALID_PAGE_ID,
            latch: Latch::new(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        // Never clears a dirty page implicitly; only an explicit flush does that.
        self.is_dirty = self.is_dirty || dirty;
    }

    pub fn clear_dirty(&mut self) {
        self.is_dirty = false;
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub fn pin(&mut self) {
        self.pin_count += 1;
    }

    pub fn unpin(&mut self) {
        debug_assert!(self.pin_count > 0, "unpinning a page with no pins");
        self.pin_count = self.pin_count.saturating_sub(1);
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn set_page_id(&mut self, page_id: PageId) {
        self.page_id = page_id;
    }

    pub(crate) fn latch(&self) -> &Latch {
        &self.latch
    }

    pub fn read_bytes(&self, start: usize, end: usize) -> &[u8] {
        &self.data[start..end]
    }

    pub fn write_bytes(&mut self, start: usize, end: usize, bytes: &[u8]) {
        self.data[start..end].copy_from_slice(bytes);
        self.is_dirty = true;
    }

    pub fn bytes(&self) -> [u8; PAGE_SIZE] {
        self.data
    }

    pub fn load_bytes(&mut self, bytes: &[u8; PAGE_SIZE]) {
        self.data = *bytes;
    }

    /// Resets a frame's page to a blank state, ready for reuse.
    pub fn reset(&mut self) {
        self.data = [0u8; PAGE_SIZE];
        self.is_dirty = false;
        self.pin_count = 0;
        self.page_id = INVALID_PAGE_ID;
    }

    pub(crate) fn data_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    pub(crate) fn data_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }
}
