//! Per-operation latch bookkeeping for writing tree operations.
//!
//! A descent for insert or delete collects write latches top-down: the
//! tree-level root latch first, then one page latch per level until the
//! target leaf. Releasing happens front-to-back (root latch, then
//! ancestors in acquisition order) so the protocol stays deadlock-free.
//! The context also collects page ids whose deletion is deferred until
//! every latch is gone.

use kestrel_buffer::{BufferPoolManager, PageWriteGuard};
use kestrel_common::page::PageId;
use parking_lot::RwLockWriteGuard;

/// Write operations that descend with latch crabbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOp {
    Insert,
    Delete,
}

/// A page held write-latched and pinned for the current operation.
pub(crate) struct HeldPage<'a> {
    pub page_id: PageId,
    pub guard: PageWriteGuard<'a>,
    /// Set when the operation mutated the page; decides the unpin flag.
    pub dirty: bool,
}

/// Held latches of one insert/delete, released on every exit path.
pub(crate) struct LatchContext<'a> {
    pool: &'a BufferPoolManager,
    /// The tree-level root latch, when still held.
    root: Option<RwLockWriteGuard<'a, PageId>>,
    /// Latched pages on the descent path, top-down.
    pub stack: Vec<HeldPage<'a>>,
    /// Pages to free once all latches are released.
    pub deleted: Vec<PageId>,
}

impl<'a> LatchContext<'a> {
    pub fn new(pool: &'a BufferPoolManager) -> Self {
        Self {
            pool,
            root: None,
            stack: Vec::new(),
            deleted: Vec::new(),
        }
    }

    /// Stores the root latch guard; it is released together with the
    /// page latches.
    pub fn hold_root(&mut self, guard: RwLockWriteGuard<'a, PageId>) {
        self.root = Some(guard);
    }

    /// Current root page id, if the root latch is still held.
    pub fn root_id(&self) -> Option<PageId> {
        self.root.as_deref().copied()
    }

    /// Mutable access to the root page id, if the root latch is still held.
    pub fn root_id_mut(&mut self) -> Option<&mut PageId> {
        self.root.as_deref_mut()
    }

    /// Pushes a freshly latched page onto the descent path.
    pub fn push(&mut self, page_id: PageId, guard: PageWriteGuard<'a>) {
        self.stack.push(HeldPage {
            page_id,
            guard,
            dirty: false,
        });
    }

    /// Finds a held page by id.
    pub fn find_held_mut(&mut self, page_id: PageId) -> Option<&mut HeldPage<'a>> {
        self.stack.iter_mut().find(|held| held.page_id == page_id)
    }

    /// Releases the root latch and every held page, front-to-back,
    /// unpinning each page with its dirty flag.
    pub fn release_all(&mut self) {
        self.root = None;
        let pool = self.pool;
        for held in self.stack.drain(..) {
            let HeldPage {
                page_id,
                guard,
                dirty,
            } = held;
            drop(guard);
            pool.unpin_page(page_id, dirty);
        }
    }
}

impl Drop for LatchContext<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}
