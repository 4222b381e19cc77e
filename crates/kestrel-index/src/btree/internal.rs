//! Internal page layout and operations.
//!
//! An internal node stores a sorted array of `(key, child_id)` pairs
//! after the common 24-byte header. The key in slot 0 is never consulted:
//! `child[i]` covers keys in `[key[i], key[i+1])` with `key[0] = -inf`
//! and `key[size] = +inf`.

use crate::btree::page::{self, PageType, NODE_HEADER_SIZE};
use kestrel_common::key::{IndexKey, KeyComparator};
use kestrel_common::page::PageId;
use std::cmp::Ordering;
use std::marker::PhantomData;

/// Encoded size of a child pointer.
const CHILD_SIZE: usize = 4;

#[inline]
fn entry_size<K: IndexKey>() -> usize {
    K::SIZE + CHILD_SIZE
}

#[inline]
fn entry_offset<K: IndexKey>(index: usize) -> usize {
    NODE_HEADER_SIZE + index * entry_size::<K>()
}

fn key_at_raw<K: IndexKey>(data: &[u8], index: usize) -> K {
    K::decode(&data[entry_offset::<K>(index)..])
}

fn value_at_raw<K: IndexKey>(data: &[u8], index: usize) -> PageId {
    PageId(page::read_i32(data, entry_offset::<K>(index) + K::SIZE))
}

/// Read-only view over an internal page.
pub struct InternalPage<'a, K> {
    data: &'a [u8],
    _key: PhantomData<K>,
}

impl<'a, K: IndexKey> InternalPage<'a, K> {
    /// Wraps the raw bytes of a latched page.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            _key: PhantomData,
        }
    }

    /// Number of stored entries (children).
    pub fn size(&self) -> usize {
        page::size(self.data)
    }

    /// Maximum entry capacity.
    pub fn max_size(&self) -> usize {
        page::max_size(self.data)
    }

    /// Minimum occupancy for a non-root internal node.
    pub fn min_size(&self) -> usize {
        page::min_size(self.data)
    }

    /// Id of this page.
    pub fn page_id(&self) -> PageId {
        page::page_id(self.data)
    }

    /// Id of the parent page, or `PageId::INVALID` for the root.
    pub fn parent_id(&self) -> PageId {
        page::parent_id(self.data)
    }

    /// Key stored at `index`. Slot 0 holds an unused sentinel.
    pub fn key_at(&self, index: usize) -> K {
        key_at_raw::<K>(self.data, index)
    }

    /// Child page id stored at `index`.
    pub fn value_at(&self, index: usize) -> PageId {
        value_at_raw::<K>(self.data, index)
    }

    /// Slot holding the given child id, if present.
    pub fn value_index(&self, value: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == value)
    }

    /// Child covering `key`: the slot before the first key greater than
    /// `key`, or the last child when no stored key is greater.
    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> PageId {
        let size = self.size();
        let mut lo = 1;
        let mut hi = size;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if comparator.compare(&self.key_at(mid), key) == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        self.value_at(lo - 1)
    }
}

/// Mutable view over an internal page.
pub struct InternalPageMut<'a, K> {
    data: &'a mut [u8],
    _key: PhantomData<K>,
}

impl<'a, K: IndexKey> InternalPageMut<'a, K> {
    /// Wraps the raw bytes of a write-latched page.
    pub fn new(data: &'a mut [u8]) -> Self {
        Self {
            data,
            _key: PhantomData,
        }
    }

    /// Initializes a fresh internal node.
    pub fn init(&mut self, page_id: PageId, parent_id: PageId, max_size: usize) {
        page::init_header(self.data, PageType::Internal, page_id, parent_id, max_size);
    }

    /// Number of stored entries.
    pub fn size(&self) -> usize {
        page::size(self.data)
    }

    /// Maximum entry capacity.
    pub fn max_size(&self) -> usize {
        page::max_size(self.data)
    }

    /// Id of this page.
    pub fn page_id(&self) -> PageId {
        page::page_id(self.data)
    }

    /// Key stored at `index`.
    pub fn key_at(&self, index: usize) -> K {
        key_at_raw::<K>(self.data, index)
    }

    /// Child page id stored at `index`.
    pub fn value_at(&self, index: usize) -> PageId {
        value_at_raw::<K>(self.data, index)
    }

    /// Slot holding the given child id, if present.
    pub fn value_index(&self, value: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == value)
    }

    /// Overwrites the key at `index`.
    pub fn set_key_at(&mut self, index: usize, key: K) {
        key.encode(&mut self.data[entry_offset::<K>(index)..]);
    }

    fn write_entry(&mut self, index: usize, key: K, child: PageId) {
        let offset = entry_offset::<K>(index);
        key.encode(&mut self.data[offset..]);
        page::write_i32(self.data, offset + K::SIZE, child.0);
    }

    fn shift_right(&mut self, index: usize) {
        let size = self.size();
        if index < size {
            self.data.copy_within(
                entry_offset::<K>(index)..entry_offset::<K>(size),
                entry_offset::<K>(index + 1),
            );
        }
    }

    fn shift_left(&mut self, index: usize) {
        let size = self.size();
        self.data.copy_within(
            entry_offset::<K>(index + 1)..entry_offset::<K>(size),
            entry_offset::<K>(index),
        );
    }

    /// Seeds a fresh root with its first two children.
    pub fn populate_new_root(&mut self, left_child: PageId, key: K, right_child: PageId) {
        self.write_entry(0, K::default(), left_child);
        self.write_entry(1, key, right_child);
        page::set_size(self.data, 2);
    }

    /// Inserts `(new_key, new_child)` immediately after the slot whose
    /// child is `old_child`. Returns the new size.
    pub fn insert_after(&mut self, old_child: PageId, new_key: K, new_child: PageId) -> usize {
        let index = match self.value_index(old_child) {
            Some(i) => i + 1,
            None => self.size(),
        };
        self.shift_right(index);
        self.write_entry(index, new_key, new_child);
        let size = self.size() + 1;
        page::set_size(self.data, size);
        size
    }

    /// Removes the entry at `index`, shifting the tail left.
    pub fn remove_at(&mut self, index: usize) {
        self.shift_left(index);
        let size = self.size();
        page::set_size(self.data, size - 1);
    }

    /// Moves the trailing `size - min_size` entries into the empty
    /// `recipient`. The caller reparents the moved children.
    pub fn move_half_to(&mut self, recipient: &mut InternalPageMut<'_, K>) {
        let size = self.size();
        let split = page::min_size(self.data);
        let moving = size - split;

        recipient.data[entry_offset::<K>(0)..entry_offset::<K>(moving)]
            .copy_from_slice(&self.data[entry_offset::<K>(split)..entry_offset::<K>(size)]);

        page::set_size(self.data, split);
        page::set_size(recipient.data, moving);
    }

    /// Appends every entry to `recipient` (the left sibling), installing
    /// `middle_key` (the parent separator) as the first moved key.
    /// Returns the moved child ids for reparenting; the caller deletes
    /// this page.
    pub fn move_all_to(
        &mut self,
        recipient: &mut InternalPageMut<'_, K>,
        middle_key: K,
    ) -> Vec<PageId> {
        self.set_key_at(0, middle_key);
        let size = self.size();
        let recipient_size = recipient.size();

        recipient.data[entry_offset::<K>(recipient_size)..entry_offset::<K>(recipient_size + size)]
            .copy_from_slice(&self.data[entry_offset::<K>(0)..entry_offset::<K>(size)]);
        page::set_size(recipient.data, recipient_size + size);
        page::set_size(self.data, 0);

        (recipient_size..recipient_size + size)
            .map(|i| recipient.value_at(i))
            .collect()
    }

    /// Moves this page's first entry to the end of `recipient` (the left
    /// sibling), rotating `middle_key` down from the parent. Returns the
    /// moved child id for reparenting.
    pub fn move_first_to_end_of(
        &mut self,
        recipient: &mut InternalPageMut<'_, K>,
        middle_key: K,
    ) -> PageId {
        let moved = self.value_at(0);
        let recipient_size = recipient.size();
        recipient.write_entry(recipient_size, middle_key, moved);
        page::set_size(recipient.data, recipient_size + 1);

        self.shift_left(0);
        let size = self.size();
        page::set_size(self.data, size - 1);
        moved
    }

    /// Moves this page's last entry to the front of `recipient` (the
    /// right sibling), rotating `middle_key` down from the parent.
    /// Returns the moved child id for reparenting.
    pub fn move_last_to_front_of(
        &mut self,
        recipient: &mut InternalPageMut<'_, K>,
        middle_key: K,
    ) -> PageId {
        let size = self.size();
        let last_key = self.key_at(size - 1);
        let moved = self.value_at(size - 1);
        page::set_size(self.data, size - 1);

        let recipient_size = recipient.size();
        recipient.shift_right(0);
        recipient.write_entry(0, last_key, moved);
        page::set_size(recipient.data, recipient_size + 1);
        recipient.set_key_at(1, middle_key);
        moved
    }
}
