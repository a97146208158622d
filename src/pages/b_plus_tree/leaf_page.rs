use arrayvec::ArrayVec;

use super::{min_size_for_max, Key, PageType, Value, NODE_CAPACITY};
use crate::errors::Error;
use crate::pages::{Page, PageId, INVALID_PAGE_ID};
use anyhow::{bail, Result};

#[repr(C)]
pub struct LeafPageData {
    page_type: PageType,
    max_size: u32,
    next_page_id: PageId,
    keys: ArrayVec<Key, NODE_CAPACITY>,
    values: ArrayVec<Value, NODE_CAPACITY>,
}

/// Zero-copy view over a leaf B+ tree node, reinterpreted in place the same
/// way `InternalPage` is (see `pages/b_plus_tree/internal_page.rs`).
#[derive(Debug)]
pub struct LeafPage {
    data: *mut LeafPageData,
    page_id: PageId,
}

impl<'a> From<&'a Page> for LeafPage {
    fn from(page: &'a Page) -> Self {
        assert!(std::mem::size_of::<LeafPageData>() <= crate::pages::PAGE_SIZE);
        LeafPage {
            data: page.data_ptr() as *mut LeafPageData,
            page_id: page.page_id(),
        }
    }
}

impl<'a> From<&'a mut Page> for LeafPage {
    fn from(page: &'a mut Page) -> Self {
        assert!(std::mem::size_of::<LeafPageData>() <= crate::pages::PAGE_SIZE);
        LeafPage {
            data: page.data_mut_ptr() as *mut LeafPageData,
            page_id: page.page_id(),
        }
    }
}

impl LeafPage {
    fn data(&self) -> &LeafPageData {
        unsafe { &*self.data }
    }

    fn data_mut(&mut self) -> &mut LeafPageData {
        unsafe { &mut *self.data }
    }

    pub fn init(&mut self, max_size: usize) {
        let data = self.data_mut();
        data.page_type = PageType::Leaf;
        data.max_size = max_size as u32;
        data.next_page_id = INVALID_PAGE_ID;
        data.keys.clear();
        data.values.clear();
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn size(&self) -> usize {
        self.data().keys.len()
    }

    pub fn max_size(&self) -> usize {
        self.data().max_size as usize
    }

    pub fn min_size(&self) -> usize {
        min_size_for_max(self.max_size(), true)
    }

    pub fn is_overflow(&self) -> bool {
        self.size() >= self.max_size()
    }

    pub fn is_underflow(&self) -> bool {
        self.size() < self.min_size()
    }

    pub fn next_page_id(&self) -> PageId {
        self.data().next_page_id
    }

    pub fn set_next_page_id(&mut self, page_id: PageId) {
        self.data_mut().next_page_id = page_id;
    }

    pub fn key_at(&self, idx: usize) -> Key {
        self.data().keys[idx]
    }

    pub fn value_at(&self, idx: usize) -> Value {
        self.data().values[idx]
    }

    pub fn first_key(&self) -> Key {
        self.key_at(0)
    }

    pub fn find(&self, key: Key) -> std::result::Result<usize, usize> {
        self.data().keys.binary_search(&key)
    }

    pub fn get(&self, key: Key) -> Option<Value> {
        self.find(key).ok().map(|pos| self.value_at(pos))
    }

    /// Position at which the iterator should start for a `Begin(key)` scan:
    /// the first slot whose key is `>= key`.
    pub fn lower_bound(&self, key: Key) -> usize {
        match self.find(key) {
            Ok(pos) => pos,
            Err(pos) => pos,
        }
    }

    pub fn insert(&mut self, key: Key, value: Value) -> Result<()> {
        match self.find(key) {
            Ok(_) => bail!(Error::DuplicateKey),
            Err(pos) => {
                let data = self.data_mut();
                data.keys.insert(pos, key);
                data.values.insert(pos, value);
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, key: Key) -> Option<Value> {
        match self.find(key) {
            Ok(pos) => {
                let data = self.data_mut();
                data.keys.remove(pos);
                Some(data.values.remove(pos))
            }
            Err(_) => None,
        }
    }

    /// Splits the upper half (inclusive of the median) into `new_page`
    /// (already initialized to `Leaf`), returning the new page's first key —
    /// the separator promoted to the parent.
    pub fn split(&mut self, new_page: &mut LeafPage) -> Key {
        let mid = self.size() / 2;

        for i in mid..self.size() {
            new_page.data_mut().keys.push(self.key_at(i));
            new_page.data_mut().values.push(self.value_at(i));
        }

        self.data_mut().keys.truncate(mid);
        self.data_mut().values.truncate(mid);

        new_page.set_next_page_id(self.next_page_id());
        self.set_next_page_id(new_page.page_id());

        new_page.first_key()
    }

    /// Merges `other` (the right sibling, next in key order) into `self`.
    pub fn merge_from_right(&mut self, other: &LeafPage) {
        let data = self.data_mut();
        for i in 0..other.size() {
            data.keys.push(other.key_at(i));
            data.values.push(other.value_at(i));
        }
        data.next_page_id = other.next_page_id();
    }

    /// Moves the left sibling's last pair onto the front of `self`. Returns
    /// the new first key of `self`, which becomes the parent separator.
    pub fn borrow_from_left(&mut self, left: &mut LeafPage) -> Key {
        let idx = left.size() - 1;
        let key = left.key_at(idx);
        let value = left.value_at(idx);
        left.data_mut().keys.truncate(idx);
        left.data_mut().values.truncate(idx);

        let data = self.data_mut();
        data.keys.insert(0, key);
        data.values.insert(0, value);
        key
    }

    /// Moves the right sibling's first pair onto the back of `self`. Returns
    /// the right sibling's new first key, which becomes the parent separator.
    pub fn borrow_from_right(&mut self, right: &mut LeafPage) -> Key {
        let key = right.key_at(0);
        let value = right.value_at(0);
        right.data_mut().keys.remove(0);
        right.data_mut().values.remove(0);

        let data = self.data_mut();
        data.keys.push(key);
        data.values.push(value);

        right.first_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_leaf(max_size: usize, page_id: PageId) -> Page {
        let mut page = Page::new();
        page.set_page_id(page_id);
        let mut view = LeafPage::from(&mut page);
        view.init(max_size);
        page
    }

    #[test]
    fn test_insert_get_remove() {
        let mut page = blank_leaf(4, 1);
        let mut view = LeafPage::from(&mut page);

        view.insert(5, 500).unwrap();
        view.insert(3, 300).unwrap();
        view.insert(7, 700).unwrap();

        assert_eq!(view.get(3), Some(300));
        assert_eq!(view.get(5), Some(500));
        assert_eq!(view.get(7), Some(700));
        assert_eq!(view.get(9), None);

        assert!(view.insert(5, 999).is_err());

        assert_eq!(view.remove(5), Some(500));
        assert_eq!(view.get(5), None);
        assert_eq!(view.size(), 2);
    }

    #[test]
    fn test_split_produces_sorted_halves() {
        let mut page = blank_leaf(4, 1);
        let mut sibling_page = blank_leaf(4, 2);

        let mut view = LeafPage::from(&mut page);
        for (k, v) in [(1, 10), (2, 20), (3, 30), (4, 40)] {
            view.insert(k, v).unwrap();
        }

        let mut sibling = LeafPage::from(&mut sibling_page);
        sibling.init(4);
        let separator = view.split(&mut sibling);

        assert_eq!(separator, 3);
        assert_eq!(view.size(), 2);
        assert_eq!(sibling.size(), 2);
        assert_eq!(view.next_page_id(), 2);
    }
}
