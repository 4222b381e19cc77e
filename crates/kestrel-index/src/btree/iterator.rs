//! Range iteration over the leaf chain.

use crate::btree::leaf::LeafPage;
use crate::btree::page;
use kestrel_buffer::{BufferPoolManager, PageReadGuard};
use kestrel_common::key::IndexKey;
use kestrel_common::page::PageId;
use kestrel_common::rid::Rid;
use std::marker::PhantomData;

struct IterState<'a> {
    page_id: PageId,
    guard: PageReadGuard<'a>,
    slot: usize,
}

/// Forward iterator over `(key, rid)` pairs in ascending key order.
///
/// The iterator keeps the current leaf pinned and read-latched. Crossing
/// to the next leaf latches the successor before the current page is
/// released, so concurrent readers always observe a consistent chain.
/// Dropping the iterator releases the current page.
pub struct TreeIter<'a, K> {
    pool: &'a BufferPoolManager,
    state: Option<IterState<'a>>,
    _key: PhantomData<K>,
}

impl<'a, K: IndexKey> TreeIter<'a, K> {
    pub(crate) fn new(
        pool: &'a BufferPoolManager,
        page_id: PageId,
        guard: PageReadGuard<'a>,
        slot: usize,
    ) -> Self {
        Self {
            pool,
            state: Some(IterState {
                page_id,
                guard,
                slot,
            }),
            _key: PhantomData,
        }
    }

    pub(crate) fn empty(pool: &'a BufferPoolManager) -> Self {
        Self {
            pool,
            state: None,
            _key: PhantomData,
        }
    }

    fn finish(&mut self) {
        if let Some(state) = self.state.take() {
            let page_id = state.page_id;
            drop(state.guard);
            self.pool.unpin_page(page_id, false);
        }
    }
}

impl<'a, K: IndexKey> Iterator for TreeIter<'a, K> {
    type Item = (K, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let next_page_id = {
                let state = self.state.as_mut()?;
                let leaf = LeafPage::<K>::new(&state.guard[..]);
                if state.slot < leaf.size() {
                    let item = (leaf.key_at(state.slot), leaf.rid_at(state.slot));
                    state.slot += 1;
                    return Some(item);
                }
                leaf.next_page_id()
            };

            if !next_page_id.is_valid() {
                self.finish();
                return None;
            }

            // Latch-couple onto the successor before letting go of the
            // current leaf.
            let next_frame = match self.pool.fetch_page(next_page_id) {
                Ok(frame) => frame,
                Err(_) => {
                    self.finish();
                    return None;
                }
            };
            let next_guard = next_frame.read_data();
            debug_assert!(page::is_leaf(&next_guard[..]));
            self.finish();
            self.state = Some(IterState {
                page_id: next_page_id,
                guard: next_guard,
                slot: 0,
            });
        }
    }
}

impl<K> Drop for TreeIter<'_, K> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            let page_id = state.page_id;
            drop(state.guard);
            self.pool.unpin_page(page_id, false);
        }
    }
}
