//! Disk manager for page-level file I/O.

use kestrel_common::page::{PageId, PAGE_SIZE};
use kestrel_common::{KestrelError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the data file inside the data directory.
const DATA_FILE_NAME: &str = "kestrel.db";

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for the data file.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

/// Manages reading and writing pages of a single data file.
///
/// Pages live at `page_id * PAGE_SIZE`. Reads past the end of the file
/// return zeroed buffers: a freshly allocated page that was never flushed
/// has no on-disk image yet.
pub struct DiskManager {
    config: DiskManagerConfig,
    inner: Mutex<FileInner>,
}

struct FileInner {
    file: File,
    num_pages: u32,
}

impl DiskManager {
    /// Creates a new disk manager, opening or creating the data file.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let path = config.data_dir.join(DATA_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            config,
            inner: Mutex::new(FileInner { file, num_pages }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Returns the number of pages currently materialized in the file.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Reads a page from disk.
    ///
    /// Pages beyond the end of the file come back zero-filled.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        if !page_id.is_valid() {
            return Err(KestrelError::PageNotFound { page_id });
        }

        let mut inner = self.inner.lock();
        let mut buf = [0u8; PAGE_SIZE];

        if page_id.0 as u32 >= inner.num_pages {
            debug!(page_id = %page_id, "disk.read_zero_fill");
            return Ok(buf);
        }

        inner.file.seek(SeekFrom::Start(page_id.offset()))?;
        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = inner.file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(buf)
    }

    /// Writes a page to disk, extending the file if needed.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        if !page_id.is_valid() {
            return Err(KestrelError::PageNotFound { page_id });
        }

        let mut inner = self.inner.lock();
        inner.file.seek(SeekFrom::Start(page_id.offset()))?;
        inner.file.write_all(data)?;
        if self.config.fsync_enabled {
            inner.file.sync_data()?;
        }

        let page_num = page_id.0 as u32;
        if page_num >= inner.num_pages {
            inner.num_pages = page_num + 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk() -> (tempfile::TempDir, DiskManager) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::new(DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        })
        .unwrap();
        (dir, disk)
    }

    #[test]
    fn test_disk_manager_new() {
        let (_dir, disk) = create_test_disk();
        assert_eq!(disk.num_pages(), 0);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (_dir, disk) = create_test_disk();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[PAGE_SIZE - 1] = 0xCD;

        disk.write_page(PageId(0), &data).unwrap();
        let read = disk.read_page(PageId(0)).unwrap();

        assert_eq!(read[0], 0xAB);
        assert_eq!(read[PAGE_SIZE - 1], 0xCD);
        assert_eq!(disk.num_pages(), 1);
    }

    #[test]
    fn test_read_past_eof_zero_fills() {
        let (_dir, disk) = create_test_disk();

        let data = disk.read_page(PageId(99)).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_extends_file() {
        let (_dir, disk) = create_test_disk();

        let data = [0x11u8; PAGE_SIZE];
        disk.write_page(PageId(4), &data).unwrap();

        assert_eq!(disk.num_pages(), 5);
        // The skipped pages read back as zeros.
        let hole = disk.read_page(PageId(2)).unwrap();
        assert!(hole.iter().all(|&b| b == 0));
        assert_eq!(disk.read_page(PageId(4)).unwrap()[0], 0x11);
    }

    #[test]
    fn test_invalid_page_id_rejected() {
        let (_dir, disk) = create_test_disk();

        assert!(matches!(
            disk.read_page(PageId::INVALID),
            Err(KestrelError::PageNotFound { .. })
        ));
        assert!(matches!(
            disk.write_page(PageId::INVALID, &[0u8; PAGE_SIZE]),
            Err(KestrelError::PageNotFound { .. })
        ));
    }

    #[test]
    fn test_reopen_preserves_pages() {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        };

        {
            let disk = DiskManager::new(config.clone()).unwrap();
            let data = [0x7Fu8; PAGE_SIZE];
            disk.write_page(PageId(1), &data).unwrap();
        }

        let disk = DiskManager::new(config).unwrap();
        assert_eq!(disk.num_pages(), 2);
        assert_eq!(disk.read_page(PageId(1)).unwrap()[100], 0x7F);
    }
}
