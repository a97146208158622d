use crate::pages::Page;

use super::FrameId;

/// A pool slot. Pin-count and dirty-bit live on the `Page` itself (§3 of the
/// spec places them there, rather than on the frame the way the teacher's
/// `Frame::counter` does — see `DESIGN.md`), so `Frame` is little more than a
/// slot identity plus the page it currently holds.
pub struct Frame {
    id: FrameId,
    page: Page,
}

impl Frame {
    pub fn new(id: FrameId) -> Self {
        Self {
            id,
            page: Page::new(),
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn pin(&mut self) {
        self.page.pin();
    }

    pub fn unpin(&mut self) {
        self.page.unpin();
    }

    pub fn pin_count(&self) -> u32 {
        self.page.pin_count()
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn page_mut(&mut self) -> &mut Page {
        &mut self.page
    }

    pub fn reset(&mut self) {
        self.page.reset();
    }
}
