//! Concurrent B+Tree over buffer pool pages.
//!
//! The tree keeps its root page id behind a tree-level reader-writer
//! latch and mirrors every root change into the header page. Reads
//! descend with lock coupling (parent released once the child is
//! latched); writes descend with latch crabbing, keeping write latches
//! from the deepest unsafe ancestor down and releasing the whole stack
//! the moment a safe child proves the modification stays local.

use crate::btree::context::{LatchContext, WriteOp};
use crate::btree::header::HeaderPageMut;
use crate::btree::internal::{InternalPage, InternalPageMut};
use crate::btree::iterator::TreeIter;
use crate::btree::leaf::{LeafPage, LeafPageMut};
use crate::btree::page::{self, PageType, LEAF_HEADER_SIZE, NODE_HEADER_SIZE};
use kestrel_buffer::{BufferPoolManager, PageReadGuard, PageWriteGuard};
use kestrel_common::config::IndexConfig;
use kestrel_common::key::{DefaultKeyComparator, IndexKey, KeyComparator};
use kestrel_common::page::{PageId, PAGE_SIZE};
use kestrel_common::rid::Rid;
use kestrel_common::{KestrelError, Result};
use parking_lot::{RwLock, RwLockReadGuard};
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

/// Encoded size of a child pointer in internal nodes.
const CHILD_SIZE: usize = 4;

/// A concurrent B+Tree index storing unique fixed-width keys.
pub struct BPlusTree<K: IndexKey, C: KeyComparator<K> = DefaultKeyComparator> {
    name: String,
    pool: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
    /// Root page id, guarded by the tree-level root latch.
    root: RwLock<PageId>,
    _key: PhantomData<K>,
}

impl<K: IndexKey, C: KeyComparator<K>> BPlusTree<K, C> {
    /// Opens or creates the index named `name`.
    ///
    /// Node capacities default to what a page can hold for this key
    /// width; `config` may override them (tests use tiny fan-outs). The
    /// root id recorded on the header page is picked up when the index
    /// already exists.
    pub fn new(
        name: impl Into<String>,
        pool: Arc<BufferPoolManager>,
        comparator: C,
        config: IndexConfig,
    ) -> Result<Self> {
        let name = name.into();
        let leaf_max_size = config
            .leaf_max_size
            .unwrap_or((PAGE_SIZE - LEAF_HEADER_SIZE) / (K::SIZE + Rid::SIZE));
        let internal_max_size = config
            .internal_max_size
            .unwrap_or((PAGE_SIZE - NODE_HEADER_SIZE) / (K::SIZE + CHILD_SIZE));
        if leaf_max_size < 3 || internal_max_size < 3 {
            return Err(KestrelError::ConfigError(format!(
                "node capacity too small: leaf {leaf_max_size}, internal {internal_max_size}"
            )));
        }

        let root_id = Self::load_root(&pool, &name)?;
        Ok(Self {
            name,
            pool,
            comparator,
            leaf_max_size,
            internal_max_size,
            root: RwLock::new(root_id),
            _key: PhantomData,
        })
    }

    /// Bootstraps the header page on a fresh pool and reads (or creates)
    /// the root record for `name`.
    fn load_root(pool: &BufferPoolManager, name: &str) -> Result<PageId> {
        if pool.allocated_page_count() == 0 {
            let (page_id, frame) = pool.new_page()?;
            if page_id != PageId::HEADER {
                return Err(KestrelError::Internal(format!(
                    "header bootstrap allocated {page_id}"
                )));
            }
            {
                let mut guard = frame.write_data();
                HeaderPageMut::new(&mut guard[..]).init();
            }
            pool.unpin_page(page_id, true);
        }

        let frame = pool.fetch_page(PageId::HEADER)?;
        let root_id = {
            let mut guard = frame.write_data();
            let mut header = HeaderPageMut::new(&mut guard[..]);
            match header.get_root_id(name) {
                Some(root_id) => Some(root_id),
                None => header.insert_record(name, PageId::INVALID).then_some(PageId::INVALID),
            }
        };
        pool.unpin_page(PageId::HEADER, true);
        root_id.ok_or(KestrelError::HeaderPageFull)
    }

    /// Name this index is registered under on the header page.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum entries per leaf page.
    pub fn leaf_max_size(&self) -> usize {
        self.leaf_max_size
    }

    /// Maximum entries per internal page.
    pub fn internal_max_size(&self) -> usize {
        self.internal_max_size
    }

    /// Returns true if the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        !self.root.read().is_valid()
    }

    /// Current root page id (`PageId::INVALID` when empty).
    pub fn root_page_id(&self) -> PageId {
        *self.root.read()
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Point lookup for `key`.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>> {
        let root_guard = self.root.read();
        if !root_guard.is_valid() {
            return Ok(None);
        }
        let (page_id, guard) = self.find_leaf_read(Some(key), false, root_guard)?;
        let result = LeafPage::<K>::new(&guard[..]).lookup(key, &self.comparator);
        drop(guard);
        self.pool.unpin_page(page_id, false);
        Ok(result)
    }

    /// Iterator over the whole tree in ascending key order.
    pub fn iter(&self) -> Result<TreeIter<'_, K>> {
        let root_guard = self.root.read();
        if !root_guard.is_valid() {
            return Ok(TreeIter::empty(&self.pool));
        }
        let (page_id, guard) = self.find_leaf_read(None, true, root_guard)?;
        Ok(TreeIter::new(&self.pool, page_id, guard, 0))
    }

    /// Iterator starting at `key`, or at the next greater key when `key`
    /// is absent.
    pub fn iter_from(&self, key: &K) -> Result<TreeIter<'_, K>> {
        let root_guard = self.root.read();
        if !root_guard.is_valid() {
            return Ok(TreeIter::empty(&self.pool));
        }
        let (page_id, guard) = self.find_leaf_read(Some(key), false, root_guard)?;
        let slot = {
            let leaf = LeafPage::<K>::new(&guard[..]);
            match leaf.key_index(key, &self.comparator) {
                Some(i)
                    if self.comparator.compare(&leaf.key_at(i), key) == Ordering::Equal =>
                {
                    i
                }
                Some(i) => i + 1,
                None => 0,
            }
        };
        Ok(TreeIter::new(&self.pool, page_id, guard, slot))
    }

    /// Lock-coupled read descent to the leaf covering `key` (or the
    /// leftmost leaf). The tree-level latch is dropped once the first
    /// page is latched; each parent is released right after its child is
    /// latched, so at most two page latches are ever held.
    fn find_leaf_read<'t>(
        &'t self,
        key: Option<&K>,
        leftmost: bool,
        root_guard: RwLockReadGuard<'t, PageId>,
    ) -> Result<(PageId, PageReadGuard<'t>)> {
        let mut page_id = *root_guard;
        let frame = self.pool.fetch_page(page_id)?;
        let mut guard = frame.read_data();
        drop(root_guard);

        loop {
            if page::is_leaf(&guard[..]) {
                return Ok((page_id, guard));
            }
            let child_id = {
                let node = InternalPage::<K>::new(&guard[..]);
                match (leftmost, key) {
                    (true, _) | (false, None) => node.value_at(0),
                    (false, Some(key)) => node.lookup(key, &self.comparator),
                }
            };

            let child_frame = match self.pool.fetch_page(child_id) {
                Ok(frame) => frame,
                Err(e) => {
                    drop(guard);
                    self.pool.unpin_page(page_id, false);
                    return Err(e);
                }
            };
            let child_guard = child_frame.read_data();
            drop(guard);
            self.pool.unpin_page(page_id, false);
            page_id = child_id;
            guard = child_guard;
        }
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Inserts a unique key. Returns false when the key already exists.
    pub fn insert(&self, key: &K, rid: Rid) -> Result<bool> {
        let mut ctx = LatchContext::new(&self.pool);
        ctx.hold_root(self.root.write());

        if self.current_root(&ctx)? == PageId::INVALID {
            self.start_new_tree(key, rid, &mut ctx)?;
            ctx.release_all();
            return Ok(true);
        }
        self.insert_into_leaf(key, rid, &mut ctx)
    }

    fn start_new_tree(&self, key: &K, rid: Rid, ctx: &mut LatchContext<'_>) -> Result<()> {
        let (page_id, frame) = self.pool.new_page()?;
        {
            let mut guard = frame.write_data();
            let mut leaf = LeafPageMut::<K>::new(&mut guard[..]);
            leaf.init(page_id, PageId::INVALID, self.leaf_max_size);
            leaf.insert(*key, rid, &self.comparator);
        }
        self.pool.unpin_page(page_id, true);

        *self.root_mut(ctx)? = page_id;
        self.update_root_record(page_id)?;
        debug!(root = %page_id, "btree.start_new_tree");
        Ok(())
    }

    fn insert_into_leaf<'t>(
        &'t self,
        key: &K,
        rid: Rid,
        ctx: &mut LatchContext<'t>,
    ) -> Result<bool> {
        self.find_leaf_write(key, WriteOp::Insert, ctx)?;
        let leaf_idx = ctx.stack.len() - 1;

        {
            let held = &ctx.stack[leaf_idx];
            let leaf = LeafPage::<K>::new(&held.guard[..]);
            if leaf.lookup(key, &self.comparator).is_some() {
                ctx.release_all();
                return Ok(false);
            }
        }

        let new_size = {
            let held = &mut ctx.stack[leaf_idx];
            let mut leaf = LeafPageMut::<K>::new(&mut held.guard[..]);
            let new_size = leaf.insert(*key, rid, &self.comparator);
            held.dirty = true;
            new_size
        };

        if new_size < self.leaf_max_size {
            ctx.release_all();
            return Ok(true);
        }

        // The leaf is full: carve off a sibling and push the separator up.
        let (new_page_id, new_frame) = self.pool.new_page()?;
        let mut new_guard = new_frame.write_data();
        let up_key = {
            let held = &mut ctx.stack[leaf_idx];
            let mut leaf = LeafPageMut::<K>::new(&mut held.guard[..]);
            let mut sibling = LeafPageMut::<K>::new(&mut new_guard[..]);
            sibling.init(new_page_id, leaf.parent_id(), self.leaf_max_size);
            leaf.move_half_to(&mut sibling);
            sibling.key_at(0)
        };
        debug!(left = %ctx.stack[leaf_idx].page_id, right = %new_page_id, "btree.split_leaf");

        let result = self.insert_into_parent(ctx, leaf_idx, up_key, new_page_id, &mut new_guard);
        drop(new_guard);
        self.pool.unpin_page(new_page_id, true);
        result?;
        ctx.release_all();
        Ok(true)
    }

    /// Links a freshly split-off sibling into the tree above `child_idx`.
    ///
    /// Splitting a full parent goes through an oversized scratch image of
    /// `max_size + 1` entries: the insert lands in the scratch, the
    /// scratch splits, and the surviving half is copied back over the
    /// parent page.
    fn insert_into_parent<'t>(
        &'t self,
        ctx: &mut LatchContext<'t>,
        child_idx: usize,
        up_key: K,
        new_page_id: PageId,
        new_guard: &mut PageWriteGuard<'t>,
    ) -> Result<()> {
        let (child_page_id, child_parent) = {
            let held = &ctx.stack[child_idx];
            (held.page_id, page::parent_id(&held.guard[..]))
        };

        if child_parent == PageId::INVALID {
            // The split node was the root: grow the tree by one level.
            let (root_id, root_frame) = self.pool.new_page()?;
            {
                let mut guard = root_frame.write_data();
                let mut root = InternalPageMut::<K>::new(&mut guard[..]);
                root.init(root_id, PageId::INVALID, self.internal_max_size);
                root.populate_new_root(child_page_id, up_key, new_page_id);
            }
            self.pool.unpin_page(root_id, true);

            {
                let held = &mut ctx.stack[child_idx];
                page::set_parent_id(&mut held.guard[..], root_id);
                held.dirty = true;
            }
            page::set_parent_id(&mut new_guard[..], root_id);

            *self.root_mut(ctx)? = root_id;
            self.update_root_record(root_id)?;
            debug!(root = %root_id, "btree.new_root");
            return Ok(());
        }

        if child_idx == 0 {
            return Err(KestrelError::Internal(
                "parent latch missing above unsafe child".to_string(),
            ));
        }
        let parent_idx = child_idx - 1;
        page::set_parent_id(&mut new_guard[..], child_parent);

        let parent_size = page::size(&ctx.stack[parent_idx].guard[..]);
        if parent_size < self.internal_max_size {
            let held = &mut ctx.stack[parent_idx];
            let mut parent = InternalPageMut::<K>::new(&mut held.guard[..]);
            parent.insert_after(child_page_id, up_key, new_page_id);
            held.dirty = true;
            return Ok(());
        }

        // Parent full: insert into the oversized scratch, split it, and
        // write the first half back.
        let entry_size = K::SIZE + CHILD_SIZE;
        let used = NODE_HEADER_SIZE + self.internal_max_size * entry_size;
        let mut scratch = vec![0u8; NODE_HEADER_SIZE + (self.internal_max_size + 1) * entry_size];
        scratch[..used].copy_from_slice(&ctx.stack[parent_idx].guard[..used]);
        {
            let mut image = InternalPageMut::<K>::new(&mut scratch[..]);
            image.insert_after(child_page_id, up_key, new_page_id);
        }

        let parent_parent = page::parent_id(&ctx.stack[parent_idx].guard[..]);
        let (sibling_id, sibling_frame) = self.pool.new_page()?;
        let mut sibling_guard = sibling_frame.write_data();
        {
            let mut image = InternalPageMut::<K>::new(&mut scratch[..]);
            let mut sibling = InternalPageMut::<K>::new(&mut sibling_guard[..]);
            sibling.init(sibling_id, parent_parent, self.internal_max_size);
            image.move_half_to(&mut sibling);
        }

        let keep = NODE_HEADER_SIZE + ((self.internal_max_size + 1) / 2) * entry_size;
        {
            let held = &mut ctx.stack[parent_idx];
            held.guard[..keep].copy_from_slice(&scratch[..keep]);
            held.dirty = true;
        }

        let moved: Vec<PageId> = {
            let sibling = InternalPage::<K>::new(&sibling_guard[..]);
            (0..sibling.size()).map(|i| sibling.value_at(i)).collect()
        };
        for child in moved {
            if child == new_page_id {
                page::set_parent_id(&mut new_guard[..], sibling_id);
            } else {
                self.reparent(ctx, child, sibling_id)?;
            }
        }

        let up_key = InternalPage::<K>::new(&sibling_guard[..]).key_at(0);
        debug!(left = %child_parent, right = %sibling_id, "btree.split_internal");
        let result = self.insert_into_parent(ctx, parent_idx, up_key, sibling_id, &mut sibling_guard);
        drop(sibling_guard);
        self.pool.unpin_page(sibling_id, true);
        result
    }

    // =========================================================================
    // Remove
    // =========================================================================

    /// Removes `key` if present. Absent keys are a no-op.
    pub fn remove(&self, key: &K) -> Result<()> {
        let mut ctx = LatchContext::new(&self.pool);
        ctx.hold_root(self.root.write());

        if self.current_root(&ctx)? == PageId::INVALID {
            ctx.release_all();
            return Ok(());
        }

        self.find_leaf_write(key, WriteOp::Delete, &mut ctx)?;
        let leaf_idx = ctx.stack.len() - 1;

        let (was_first, removed) = {
            let held = &mut ctx.stack[leaf_idx];
            let mut leaf = LeafPageMut::<K>::new(&mut held.guard[..]);
            let was_first = leaf.size() > 0
                && self.comparator.compare(&leaf.key_at(0), key) == Ordering::Equal;
            let old_size = leaf.size();
            let new_size = leaf.remove(*key, &self.comparator);
            if new_size != old_size {
                held.dirty = true;
            }
            (was_first, new_size != old_size)
        };
        if !removed {
            ctx.release_all();
            return Ok(());
        }

        // The removed key led its leaf: refresh the separator above while
        // the parent latch is still held.
        if was_first && leaf_idx > 0 {
            let (ancestors, tail) = ctx.stack.split_at_mut(leaf_idx);
            let parent_held = ancestors.last_mut().unwrap();
            let leaf_held = &tail[0];
            let leaf = LeafPage::<K>::new(&leaf_held.guard[..]);
            if leaf.size() > 0 {
                let mut parent = InternalPageMut::<K>::new(&mut parent_held.guard[..]);
                if let Some(idx) = parent.value_index(leaf_held.page_id) {
                    if idx != 0 {
                        parent.set_key_at(idx, leaf.key_at(0));
                        parent_held.dirty = true;
                    }
                }
            }
        }

        self.coalesce_or_redistribute(&mut ctx)?;
        ctx.release_all();
        let deleted = std::mem::take(&mut ctx.deleted);
        drop(ctx);
        for page_id in deleted {
            if !self.pool.delete_page(page_id) {
                warn!(page_id = %page_id, "btree.deferred_delete_failed");
            }
        }
        Ok(())
    }

    /// Fixes up the underflowing node on top of the latch stack, walking
    /// toward the root as merges cascade. Each round either borrows one
    /// entry from a sibling (done), merges right-into-left and ascends,
    /// or adjusts the root.
    fn coalesce_or_redistribute<'t>(&'t self, ctx: &mut LatchContext<'t>) -> Result<()> {
        let mut i = ctx.stack.len() - 1;
        loop {
            let (node_id, node_parent, node_size, node_min) = {
                let held = &ctx.stack[i];
                let data = &held.guard[..];
                (
                    held.page_id,
                    page::parent_id(data),
                    page::size(data),
                    page::min_size(data),
                )
            };

            if node_parent == PageId::INVALID {
                return self.adjust_root(ctx);
            }
            if node_size >= node_min {
                return Ok(());
            }
            if i == 0 {
                return Err(KestrelError::Internal(
                    "parent latch missing above underflowing node".to_string(),
                ));
            }

            let (node_idx, sibling_id, from_prev) = {
                let parent = InternalPage::<K>::new(&ctx.stack[i - 1].guard[..]);
                let idx = parent.value_index(node_id).ok_or_else(|| {
                    KestrelError::Internal("node missing from its parent".to_string())
                })?;
                if idx > 0 {
                    (idx, parent.value_at(idx - 1), true)
                } else {
                    (idx, parent.value_at(idx + 1), false)
                }
            };

            let sibling_frame = self.pool.fetch_page(sibling_id)?;
            let mut sibling_guard = sibling_frame.write_data();
            let sibling_has_surplus = {
                let data = &sibling_guard[..];
                page::size(data) > page::min_size(data)
            };

            if sibling_has_surplus {
                self.redistribute(ctx, i, &mut sibling_guard, node_idx, from_prev)?;
                drop(sibling_guard);
                self.pool.unpin_page(sibling_id, true);
                return Ok(());
            }

            let moved = self.coalesce(ctx, i, &mut sibling_guard, node_idx, from_prev)?;
            drop(sibling_guard);
            self.pool.unpin_page(sibling_id, true);

            let (survivor, dropped) = if from_prev {
                (sibling_id, node_id)
            } else {
                (node_id, sibling_id)
            };
            for child in moved {
                self.reparent(ctx, child, survivor)?;
            }
            ctx.deleted.push(dropped);
            debug!(survivor = %survivor, dropped = %dropped, "btree.coalesce");

            i -= 1;
        }
    }

    /// Borrows one entry from `sibling` into the underflowing node and
    /// rewrites the separator between them.
    fn redistribute<'t>(
        &'t self,
        ctx: &mut LatchContext<'t>,
        i: usize,
        sibling_guard: &mut PageWriteGuard<'t>,
        node_idx: usize,
        from_prev: bool,
    ) -> Result<()> {
        let node_id = ctx.stack[i].page_id;
        let mut moved_child = None;
        {
            let (ancestors, tail) = ctx.stack.split_at_mut(i);
            let parent_held = ancestors.last_mut().unwrap();
            let node_held = &mut tail[0];

            if page::is_leaf(&node_held.guard[..]) {
                let mut node = LeafPageMut::<K>::new(&mut node_held.guard[..]);
                let mut sibling = LeafPageMut::<K>::new(&mut sibling_guard[..]);
                let mut parent = InternalPageMut::<K>::new(&mut parent_held.guard[..]);
                if from_prev {
                    sibling.move_last_to_front_of(&mut node);
                    parent.set_key_at(node_idx, node.key_at(0));
                } else {
                    sibling.move_first_to_end_of(&mut node);
                    parent.set_key_at(node_idx + 1, sibling.key_at(0));
                }
            } else {
                let mut node = InternalPageMut::<K>::new(&mut node_held.guard[..]);
                let mut sibling = InternalPageMut::<K>::new(&mut sibling_guard[..]);
                let mut parent = InternalPageMut::<K>::new(&mut parent_held.guard[..]);
                if from_prev {
                    let middle_key = parent.key_at(node_idx);
                    moved_child = Some(sibling.move_last_to_front_of(&mut node, middle_key));
                    parent.set_key_at(node_idx, node.key_at(0));
                } else {
                    let middle_key = parent.key_at(node_idx + 1);
                    moved_child = Some(sibling.move_first_to_end_of(&mut node, middle_key));
                    parent.set_key_at(node_idx + 1, sibling.key_at(0));
                }
            }
            parent_held.dirty = true;
            node_held.dirty = true;
        }
        debug!(node = %node_id, from_prev, "btree.redistribute");

        if let Some(child) = moved_child {
            self.reparent(ctx, child, node_id)?;
        }
        Ok(())
    }

    /// Merges the right page of the pair into the left and removes the
    /// separating slot from the parent. Returns the child ids that moved
    /// (internal merges only) for reparenting.
    fn coalesce<'t>(
        &'t self,
        ctx: &mut LatchContext<'t>,
        i: usize,
        sibling_guard: &mut PageWriteGuard<'t>,
        node_idx: usize,
        from_prev: bool,
    ) -> Result<Vec<PageId>> {
        let mut moved_children = Vec::new();
        let (ancestors, tail) = ctx.stack.split_at_mut(i);
        let parent_held = ancestors.last_mut().unwrap();
        let node_held = &mut tail[0];

        let sep_idx = if from_prev { node_idx } else { node_idx + 1 };
        let middle_key = InternalPage::<K>::new(&parent_held.guard[..]).key_at(sep_idx);

        if page::is_leaf(&node_held.guard[..]) {
            let mut node = LeafPageMut::<K>::new(&mut node_held.guard[..]);
            let mut sibling = LeafPageMut::<K>::new(&mut sibling_guard[..]);
            if from_prev {
                node.move_all_to(&mut sibling);
            } else {
                sibling.move_all_to(&mut node);
            }
        } else {
            let mut node = InternalPageMut::<K>::new(&mut node_held.guard[..]);
            let mut sibling = InternalPageMut::<K>::new(&mut sibling_guard[..]);
            moved_children = if from_prev {
                node.move_all_to(&mut sibling, middle_key)
            } else {
                sibling.move_all_to(&mut node, middle_key)
            };
        }

        let mut parent = InternalPageMut::<K>::new(&mut parent_held.guard[..]);
        parent.remove_at(sep_idx);
        parent_held.dirty = true;
        node_held.dirty = true;
        Ok(moved_children)
    }

    /// Handles underflow at the root: an internal root with one child
    /// hands the tree to that child; an emptied leaf root empties the
    /// tree.
    fn adjust_root<'t>(&'t self, ctx: &mut LatchContext<'t>) -> Result<()> {
        let (root_id, is_leaf, size) = {
            let held = &ctx.stack[0];
            let data = &held.guard[..];
            (held.page_id, page::is_leaf(data), page::size(data))
        };

        if !is_leaf && size <= 1 {
            if size == 0 {
                return Err(KestrelError::Internal(
                    "internal root emptied below one child".to_string(),
                ));
            }
            let only_child = InternalPage::<K>::new(&ctx.stack[0].guard[..]).value_at(0);
            self.reparent(ctx, only_child, PageId::INVALID)?;
            *self.root_mut(ctx)? = only_child;
            self.update_root_record(only_child)?;
            ctx.deleted.push(root_id);
            debug!(old = %root_id, new = %only_child, "btree.root_collapsed");
        } else if is_leaf && size == 0 {
            *self.root_mut(ctx)? = PageId::INVALID;
            self.update_root_record(PageId::INVALID)?;
            ctx.deleted.push(root_id);
            debug!(old = %root_id, "btree.root_emptied");
        }
        Ok(())
    }

    // =========================================================================
    // Descent and shared helpers
    // =========================================================================

    /// Crabbing write descent: latches each level top-down and releases
    /// every ancestor (root latch included) as soon as the just-latched
    /// child is safe for `op`. On return the target leaf is on top of the
    /// stack with every still-unsafe ancestor below it.
    fn find_leaf_write<'t>(
        &'t self,
        key: &K,
        op: WriteOp,
        ctx: &mut LatchContext<'t>,
    ) -> Result<()> {
        let mut page_id = self.current_root(ctx)?;
        let frame = self.pool.fetch_page(page_id)?;
        let guard = frame.write_data();
        if Self::is_safe(&guard[..], op, true) {
            ctx.release_all();
        }
        ctx.push(page_id, guard);

        loop {
            let child_id = {
                let held = ctx.stack.last().expect("descent stack never empty");
                let data = &held.guard[..];
                if page::is_leaf(data) {
                    return Ok(());
                }
                InternalPage::<K>::new(data).lookup(key, &self.comparator)
            };

            let child_frame = self.pool.fetch_page(child_id)?;
            let child_guard = child_frame.write_data();
            if Self::is_safe(&child_guard[..], op, false) {
                ctx.release_all();
            }
            page_id = child_id;
            ctx.push(page_id, child_guard);
        }
    }

    /// A node is safe when the pending operation cannot propagate
    /// structural change above it.
    fn is_safe(data: &[u8], op: WriteOp, is_root: bool) -> bool {
        let size = page::size(data);
        match op {
            WriteOp::Insert => {
                if page::is_leaf(data) {
                    size < page::max_size(data) - 1
                } else {
                    size < page::max_size(data)
                }
            }
            WriteOp::Delete => {
                if is_root {
                    size > 2
                } else {
                    size > page::min_size(data)
                }
            }
        }
    }

    /// Rewrites `child`'s parent pointer, through the held latch when the
    /// page is on the descent path, otherwise through a short-lived
    /// latch. Unheld targets are only ever reached while their parent's
    /// latch is held, so the acquisition cannot contend with a descent.
    fn reparent<'t>(
        &'t self,
        ctx: &mut LatchContext<'t>,
        child: PageId,
        new_parent: PageId,
    ) -> Result<()> {
        if let Some(held) = ctx.find_held_mut(child) {
            page::set_parent_id(&mut held.guard[..], new_parent);
            held.dirty = true;
            return Ok(());
        }
        let frame = self.pool.fetch_page(child)?;
        {
            let mut guard = frame.write_data();
            page::set_parent_id(&mut guard[..], new_parent);
        }
        self.pool.unpin_page(child, true);
        Ok(())
    }

    fn current_root(&self, ctx: &LatchContext<'_>) -> Result<PageId> {
        ctx.root_id()
            .ok_or_else(|| KestrelError::Internal("root latch not held".to_string()))
    }

    fn root_mut<'c, 't>(&self, ctx: &'c mut LatchContext<'t>) -> Result<&'c mut PageId> {
        ctx.root_id_mut()
            .ok_or_else(|| KestrelError::Internal("root latch not held".to_string()))
    }

    /// Mirrors a root change into the header page record for this index.
    fn update_root_record(&self, root_id: PageId) -> Result<()> {
        let frame = self.pool.fetch_page(PageId::HEADER)?;
        let updated = {
            let mut guard = frame.write_data();
            let mut header = HeaderPageMut::new(&mut guard[..]);
            header.update_record(&self.name, root_id) || header.insert_record(&self.name, root_id)
        };
        self.pool.unpin_page(PageId::HEADER, true);
        if !updated {
            return Err(KestrelError::HeaderPageFull);
        }
        Ok(())
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Number of levels from root to leaves (0 for an empty tree).
    pub fn height(&self) -> Result<u32> {
        let root_guard = self.root.read();
        if !root_guard.is_valid() {
            return Ok(0);
        }
        let mut height = 1;
        let mut page_id = *root_guard;
        loop {
            let frame = self.pool.fetch_page(page_id)?;
            let next = {
                let guard = frame.read_data();
                if page::is_leaf(&guard[..]) {
                    None
                } else {
                    Some(InternalPage::<K>::new(&guard[..]).value_at(0))
                }
            };
            self.pool.unpin_page(page_id, false);
            match next {
                Some(child) => {
                    height += 1;
                    page_id = child;
                }
                None => return Ok(height),
            }
        }
    }

    /// Walks the whole tree validating structural invariants: header
    /// consistency, occupancy bounds, parent pointers, key ordering, and
    /// separator bounds. Debugging aid for tests and tooling; errors
    /// surface as `PageCorrupted`.
    pub fn check_integrity(&self) -> Result<()> {
        let root_guard = self.root.read();
        if !root_guard.is_valid() {
            return Ok(());
        }
        self.check_node(*root_guard, PageId::INVALID, None, None, true)
    }

    fn check_node(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        lower: Option<K>,
        upper: Option<K>,
        is_root: bool,
    ) -> Result<()> {
        let frame = self.pool.fetch_page(page_id)?;
        let guard = frame.read_data();
        let verdict = self.check_node_locked(
            &guard[..],
            page_id,
            expected_parent,
            lower.as_ref(),
            upper.as_ref(),
            is_root,
        );
        drop(guard);
        self.pool.unpin_page(page_id, false);

        for (child, child_lower, child_upper) in verdict? {
            self.check_node(child, page_id, child_lower, child_upper, false)?;
        }
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn check_node_locked(
        &self,
        data: &[u8],
        page_id: PageId,
        expected_parent: PageId,
        lower: Option<&K>,
        upper: Option<&K>,
        is_root: bool,
    ) -> Result<Vec<(PageId, Option<K>, Option<K>)>> {
        let fail = |reason: String| KestrelError::PageCorrupted { page_id, reason };

        let page_type = page::page_type(data);
        if page_type == PageType::Invalid {
            return Err(fail("invalid page type".to_string()));
        }
        if page::page_id(data) != page_id {
            return Err(fail(format!("header says {}", page::page_id(data))));
        }
        if page::parent_id(data) != expected_parent {
            return Err(fail(format!(
                "parent {} but reached from {expected_parent}",
                page::parent_id(data)
            )));
        }

        let is_leaf = page_type == PageType::Leaf;
        let size = page::size(data);
        let max = page::max_size(data);
        let upper_cap = if is_leaf { max - 1 } else { max };
        if is_root {
            let floor = if is_leaf { 1 } else { 2 };
            if size < floor || size > upper_cap {
                return Err(fail(format!("root size {size} out of bounds")));
            }
        } else {
            let min = page::min_size(data);
            if size < min || size > upper_cap {
                return Err(fail(format!(
                    "size {size} outside [{min}, {upper_cap}]"
                )));
            }
        }

        // Stored keys must ascend strictly and respect the subtree bounds
        // inherited from the ancestors. Internal slot 0 is exempt.
        let first_keyed = if is_leaf { 0 } else { 1 };
        let mut previous: Option<K> = None;
        for slot in first_keyed..size {
            let key = if is_leaf {
                LeafPage::<K>::new(data).key_at(slot)
            } else {
                InternalPage::<K>::new(data).key_at(slot)
            };
            if let Some(prev) = &previous {
                if self.comparator.compare(prev, &key) != Ordering::Less {
                    return Err(fail(format!("keys out of order at slot {slot}")));
                }
            }
            if let Some(lo) = lower {
                if self.comparator.compare(lo, &key) == Ordering::Greater {
                    return Err(fail(format!("key below lower bound at slot {slot}")));
                }
            }
            if let Some(hi) = upper {
                if self.comparator.compare(&key, hi) != Ordering::Less {
                    return Err(fail(format!("key above upper bound at slot {slot}")));
                }
            }
            previous = Some(key);
        }

        if is_leaf {
            return Ok(Vec::new());
        }

        let node = InternalPage::<K>::new(data);
        let mut children = Vec::with_capacity(size);
        for slot in 0..size {
            let child_lower = if slot == 0 {
                lower.copied()
            } else {
                Some(node.key_at(slot))
            };
            let child_upper = if slot + 1 < size {
                Some(node.key_at(slot + 1))
            } else {
                upper.copied()
            };
            children.push((node.value_at(slot), child_lower, child_upper));
        }
        Ok(children)
    }
}
