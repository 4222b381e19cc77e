//! Buffer pool manager.

use crate::disk::DiskManager;
use crate::frame::{BufferFrame, FrameId};
use crate::replacer::{LruKReplacer, Replacer};
use kestrel_common::page::{PageId, PAGE_SIZE};
use kestrel_common::{KestrelError, Result};
use kestrel_hash::ExtendibleHashTable;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use sysinfo::System;
use tracing::debug;

/// Bucket capacity of the page table directory.
const PAGE_TABLE_BUCKET_SIZE: usize = 8;

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
    /// Access-history depth of the LRU-K replacement policy.
    pub lru_k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            num_frames: 1024,
            lru_k: 2,
        }
    }
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping through an extendible hash table
/// - Free frame list for new pages
/// - LRU-K replacement for eviction, with write-back of dirty victims
/// - Pin counting for concurrent access
///
/// Every page returned by `new_page` / `fetch_page` is pinned; callers
/// must pair each acquisition with an `unpin_page`. The pool is
/// internally thread-safe but does not arbitrate page content access:
/// that is what the per-frame latches are for.
pub struct BufferPoolManager {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page ID to frame ID mapping.
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// List of free frame IDs.
    free_list: Mutex<Vec<FrameId>>,
    /// Page replacement policy.
    replacer: LruKReplacer,
    /// Backing storage.
    disk: DiskManager,
    /// Next page id to hand out.
    next_page_id: AtomicI32,
    /// Serializes mapping mutations (allocation, fetch misses, deletion).
    latch: Mutex<()>,
}

impl BufferPoolManager {
    /// Creates a new buffer pool over the given disk manager.
    pub fn new(config: BufferPoolConfig, disk: DiskManager) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();
        let next_page_id = disk.num_pages() as i32;

        Self {
            replacer: LruKReplacer::new(num_frames, config.lru_k),
            config,
            frames,
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            free_list: Mutex::new(free_list),
            disk,
            next_page_id: AtomicI32::new(next_page_id),
            latch: Mutex::new(()),
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames so caching stays useful on small machines.
    pub fn auto_sized(disk: DiskManager) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(
            BufferPoolConfig {
                num_frames,
                ..Default::default()
            },
            disk,
        )
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently resident in the pool.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Returns the number of page ids handed out so far.
    pub fn allocated_page_count(&self) -> i32 {
        self.next_page_id.load(Ordering::Acquire)
    }

    /// Checks if a page is resident in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.find(&page_id).is_some()
    }

    /// Allocates a frame for a new or incoming page.
    ///
    /// Tries the free list first, then evicts. Dirty victims are written
    /// back to disk before the frame is reused. Caller holds the pool latch.
    fn allocate_frame(&self) -> Result<FrameId> {
        {
            let mut free_list = self.free_list.lock();
            if let Some(frame_id) = free_list.pop() {
                return Ok(frame_id);
            }
        }

        let victim_id = self.replacer.evict().ok_or(KestrelError::BufferPoolFull)?;
        let frame = &self.frames[victim_id.0 as usize];

        if let Some(old_page_id) = frame.page_id() {
            if frame.is_dirty() {
                let data = frame.read_data();
                self.disk.write_page(old_page_id, &data)?;
                frame.set_dirty(false);
                debug!(page_id = %old_page_id, frame_id = %victim_id, "pool.evict_dirty");
            }
            self.page_table.remove(&old_page_id);
        }

        Ok(victim_id)
    }

    /// Allocates a fresh page id and pins a zeroed frame for it.
    pub fn new_page(&self) -> Result<(PageId, &BufferFrame)> {
        let _guard = self.latch.lock();

        let frame_id = self.allocate_frame()?;
        let page_id = PageId(self.next_page_id.fetch_add(1, Ordering::AcqRel));

        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();
        self.replacer.access_and_pin(frame_id);
        self.page_table.insert(page_id, frame_id);

        Ok((page_id, frame))
    }

    /// Fetches a page, reading it from disk if not resident.
    ///
    /// The page is pinned before being returned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        if !page_id.is_valid() {
            return Err(KestrelError::PageNotFound { page_id });
        }

        let _guard = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.access_and_pin(frame_id);
            return Ok(frame);
        }

        let data = self.disk.read_page(page_id)?;
        let frame_id = self.allocate_frame()?;

        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.copy_from(&data);
        frame.set_page_id(Some(page_id));
        frame.pin();
        self.replacer.access_and_pin(frame_id);
        self.page_table.insert(page_id, frame_id);

        Ok(frame)
    }

    /// Unpins a page, optionally marking it dirty.
    ///
    /// Once the pin count reaches zero the page becomes evictable.
    /// Returns false if the page is not resident.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _guard = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];

            if is_dirty {
                frame.set_dirty(true);
            }

            if frame.unpin() == 0 {
                self.replacer.set_evictable(frame_id, true);
            }
            return true;
        }
        false
    }

    /// Deletes a page from the buffer pool.
    ///
    /// Returns false if the page is pinned or not resident. Callers must
    /// have released the page latch and dropped their pin first.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let _guard = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];

            if frame.is_pinned() {
                return false;
            }

            self.page_table.remove(&page_id);
            self.replacer.remove(frame_id);
            frame.reset();
            self.free_list.lock().push(frame_id);
            return true;
        }
        false
    }

    /// Flushes a page to disk if dirty.
    ///
    /// Returns true if the page was written.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let _guard = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                self.disk.write_page(page_id, &data)?;
                frame.set_dirty(false);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Flushes all dirty resident pages.
    ///
    /// Returns the number of pages written.
    pub fn flush_all(&self) -> Result<usize> {
        let _guard = self.latch.lock();

        let mut flushed = 0;
        for frame in &self.frames {
            if let Some(page_id) = frame.page_id() {
                if frame.is_dirty() {
                    let data = frame.read_data();
                    self.disk.write_page(page_id, &data)?;
                    frame.set_dirty(false);
                    flushed += 1;
                }
            }
        }
        Ok(flushed)
    }
}
