use crate::pages::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::Path;

pub const DISK_STORAGE: &str = "data/data/";

#[cfg(test)]
pub fn test_path() -> String {
    use uuid::Uuid;

    let id = Uuid::new_v4();
    format!("data/test/test_{}/", id)
}

/// Backs pages with one regular file per `page_id` under a root directory.
/// Allocation is a simple monotonic counter serialized behind a mutex, mirroring
/// the buffer pool's own coarse-locking style rather than an atomic counter.
#[derive(Debug)]
pub struct DiskManager {
    path: String,
    next_page_id: Mutex<PageId>,
}

// TODO: Find a way to do Direct IO
impl DiskManager {
    pub fn new(path: &str) -> Self {
        let dir = Path::new(path);

        std::fs::create_dir_all(dir).unwrap();

        Self {
            path: dir.to_str().unwrap().to_string(),
            next_page_id: Mutex::new(0),
        }
    }

    fn page_path(&self, page_id: PageId) -> std::path::PathBuf {
        Path::join(Path::new(&self.path), Path::new(&page_id.to_string()))
    }

    pub fn allocate_page(&self) -> PageId {
        let mut next = self.next_page_id.lock();
        let id = *next;
        *next += 1;
        id
    }

    /// Best-effort: removing a file that was never written back is not an error.
    pub fn deallocate_page(&self, page_id: PageId) {
        let _ = std::fs::remove_file(self.page_path(page_id));
    }

    pub fn write_page(&self, page_id: PageId, bytes: &[u8; PAGE_SIZE]) -> Result<()> {
        if page_id == INVALID_PAGE_ID {
            return Err(anyhow!("asked to write a page with invalid id"));
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.page_path(page_id))
            .context("file opened for writing")?;

        file.write_all(bytes).context("page written to disk")?;

        Ok(())
    }

    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        if page_id == INVALID_PAGE_ID {
            return Err(anyhow!("asked to read a page with invalid id"));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .open(self.page_path(page_id))
            .context("file opened for reading")?;

        let mut buffer = [0u8; PAGE_SIZE];
        file.read_exact(&mut buffer).context("page read from disk")?;

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::remove_dir_all;

    #[test]
    fn test_write_then_read() -> Result<()> {
        let path = test_path();
        let disk = DiskManager::new(&path);

        let page_id = disk.allocate_page();
        let mut bytes = [0u8; PAGE_SIZE];
        bytes[0] = 42;

        disk.write_page(page_id, &bytes)?;
        let read_back = disk.read_page(page_id)?;

        assert_eq!(bytes, read_back);

        remove_dir_all(path)?;
        Ok(())
    }

    #[test]
    fn test_read_missing_page_errors() {
        let path = test_path();
        let disk = DiskManager::new(&path);

        assert!(disk.read_page(9999).is_err());

        let _ = remove_dir_all(path);
    }

    #[test]
    fn test_deallocate_is_best_effort() {
        let path = test_path();
        let disk = DiskManager::new(&path);

        disk.deallocate_page(123);

        let _ = remove_dir_all(path);
    }

    #[test]
    fn test_allocate_page_is_monotonic() {
        let path = test_path();
        let disk = DiskManager::new(&path);

        let a = disk.allocate_page();
        let b = disk.allocate_page();
        assert!(b > a);

        let _ = remove_dir_all(path);
    }
}
