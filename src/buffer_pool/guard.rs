use crate::pages::{Page, PageId};

use super::ArcBufferPool;

/// Scoped, move-only handle over a pinned page. Unpins on drop; `set_dirty`
/// marks the page dirty, flushed lazily at unpin time (§4.3).
///
/// Rust's ordinary move semantics already give single ownership and make a
/// moved-from value's drop a no-op, so unlike the C++ original
/// (`page_guard.cpp`) no explicit "emptied" sentinel state is needed beyond
/// wrapping the raw pointer in `Option`.
pub struct BasicPageGuard {
    bpm: ArcBufferPool,
    page: *mut Page,
    page_id: PageId,
    is_dirty: bool,
}

// SAFETY: the pointer is only ever dereferenced while the frame backing it
// is pinned, and all mutation goes through the owning guard; the frame
// array itself never moves or reallocates (`BufferPoolManager::frames`).
unsafe impl Send for BasicPageGuard {}

impl BasicPageGuard {
    pub(super) fn new(bpm: ArcBufferPool, page: *mut Page, page_id: PageId) -> Self {
        Self {
            bpm,
            page,
            page_id,
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn set_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn read_bytes(&self, start: usize, end: usize) -> &[u8] {
        unsafe { (*self.page).read_bytes(start, end) }
    }

    pub fn write_bytes(&mut self, start: usize, end: usize, bytes: &[u8]) {
        self.is_dirty = true;
        unsafe { (*self.page).write_bytes(start, end, bytes) };
    }

    /// Zero-copy typed reinterpretation of the underlying page, e.g.
    /// `guard.as_type::<LeafPage>()`.
    pub fn as_type<'a, T: From<&'a Page>>(&'a self) -> T {
        T::from(unsafe { &*self.page })
    }

    /// Mutable reinterpretation; marks the guard dirty, matching the spec's
    /// `AsMut<T>` (§4.3).
    pub fn as_type_mut<'a, T: From<&'a mut Page>>(&'a mut self) -> T {
        self.is_dirty = true;
        T::from(unsafe { &mut *self.page })
    }
}

impl Drop for BasicPageGuard {
    fn drop(&mut self) {
        self.bpm.lock().unpin_page(self.page_id, self.is_dirty);
    }
}

/// `BasicPageGuard` plus a held reader latch, acquired on construction and
/// released before the inner guard drops (`page_guard.cpp`'s `ReadPageGuard`).
pub struct ReadPageGuard {
    inner: BasicPageGuard,
}

impl ReadPageGuard {
    pub(super) fn new(inner: BasicPageGuard) -> Self {
        unsafe { (*inner.page).latch().rlock() };
        Self { inner }
    }

    pub fn page_id(&self) -> PageId {
        self.inner.page_id
    }

    pub fn read_bytes(&self, start: usize, end: usize) -> &[u8] {
        self.inner.read_bytes(start, end)
    }

    pub fn as_type<'a, T: From<&'a Page>>(&'a self) -> T {
        self.inner.as_type()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        unsafe { (*self.inner.page).latch().runlock() };
    }
}

/// `BasicPageGuard` plus a held writer latch (`page_guard.cpp`'s `WritePageGuard`).
pub struct WritePageGuard {
    inner: BasicPageGuard,
}

impl WritePageGuard {
    pub(super) fn new(inner: BasicPageGuard) -> Self {
        unsafe { (*inner.page).latch().wlock() };
        Self { inner }
    }

    pub fn page_id(&self) -> PageId {
        self.inner.page_id
    }

    pub fn read_bytes(&self, start: usize, end: usize) -> &[u8] {
        self.inner.read_bytes(start, end)
    }

    pub fn write_bytes(&mut self, start: usize, end: usize, bytes: &[u8]) {
        self.inner.write_bytes(start, end, bytes)
    }

    pub fn as_type<'a, T: From<&'a Page>>(&'a self) -> T {
        self.inner.as_type()
    }

    pub fn as_type_mut<'a, T: From<&'a mut Page>>(&'a mut self) -> T {
        self.inner.as_type_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        unsafe { (*self.inner.page).latch().wunlock() };
    }
}

/// Adds guard-returning methods to `Arc<Mutex<BufferPoolManager>>`. Rust has
/// no way to write `impl BufferPoolManager { fn x(self: Arc<Mutex<Self>>) }`
/// the way the C++ original hangs these off `BufferPoolManager*` directly, so
/// the extension trait is the idiomatic stand-in.
pub trait ArcBufferPoolExt {
    fn new_page_guarded(&self) -> anyhow::Result<Option<BasicPageGuard>>;
    fn fetch_page_basic(&self, page_id: PageId) -> anyhow::Result<Option<BasicPageGuard>>;
    fn fetch_page_read(&self, page_id: PageId) -> anyhow::Result<Option<ReadPageGuard>>;
    fn fetch_page_write(&self, page_id: PageId) -> anyhow::Result<Option<WritePageGuard>>;
}

impl ArcBufferPoolExt for ArcBufferPool {
    fn new_page_guarded(&self) -> anyhow::Result<Option<BasicPageGuard>> {
        let created = {
            let mut bpm = self.lock();
            bpm.new_page_raw()?
        };
        Ok(created.map(|(page_id, ptr)| BasicPageGuard::new(self.clone(), ptr, page_id)))
    }

    fn fetch_page_basic(&self, page_id: PageId) -> anyhow::Result<Option<BasicPageGuard>> {
        let page = {
            let mut bpm = self.lock();
            bpm.fetch_page(page_id)?
        };
        Ok(page.map(|ptr| BasicPageGuard::new(self.clone(), ptr, page_id)))
    }

    fn fetch_page_read(&self, page_id: PageId) -> anyhow::Result<Option<ReadPageGuard>> {
        Ok(self
            .fetch_page_basic(page_id)?
            .map(ReadPageGuard::new))
    }

    fn fetch_page_write(&self, page_id: PageId) -> anyhow::Result<Option<WritePageGuard>> {
        Ok(self
            .fetch_page_basic(page_id)?
            .map(WritePageGuard::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::BufferPoolManager;
    use crate::disk_manager::test_path;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn test_bpm(size: usize) -> ArcBufferPool {
        Arc::new(Mutex::new(BufferPoolManager::new(size, &test_path())))
    }

    #[test]
    fn test_basic_guard_unpins_on_drop() -> anyhow::Result<()> {
        let bpm = test_bpm(2);

        let page_id = {
            let guard = bpm.new_page_guarded()?.unwrap();
            guard.page_id()
        };

        assert_eq!(bpm.lock().pin_count(page_id), Some(0));
        Ok(())
    }

    #[test]
    fn test_write_guard_round_trip() -> anyhow::Result<()> {
        let bpm = test_bpm(2);

        let page_id = {
            let mut guard = bpm.new_page_guarded()?.unwrap();
            guard.write_bytes(0, 4, &[9, 9, 9, 9]);
            guard.page_id()
        };

        let guard = bpm.fetch_page_read(page_id)?.unwrap();
        assert_eq!(guard.read_bytes(0, 4), &[9, 9, 9, 9]);
        Ok(())
    }
}
