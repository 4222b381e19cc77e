//! Header page: the persistent map from index name to root page id.
//!
//! Page 0 of the data file holds a record table. Each record is an index
//! name (up to 32 bytes, zero-padded) followed by its root page id. The
//! tree rewrites its record on every root change so the root survives
//! restarts.

use crate::btree::page::{read_i32, write_i32};
use kestrel_common::page::{PageId, PAGE_SIZE};

/// Maximum length of an index name in bytes.
pub const MAX_NAME_LEN: usize = 32;

/// Encoded size of one record: name + root page id.
const RECORD_SIZE: usize = MAX_NAME_LEN + 4;

/// Offset of the record count.
const COUNT_OFFSET: usize = 0;

/// Offset of the first record.
const RECORDS_OFFSET: usize = 4;

/// Maximum number of records the page can hold.
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

#[inline]
fn record_offset(index: usize) -> usize {
    RECORDS_OFFSET + index * RECORD_SIZE
}

fn name_matches(data: &[u8], index: usize, name: &[u8]) -> bool {
    let offset = record_offset(index);
    let stored = &data[offset..offset + MAX_NAME_LEN];
    stored[..name.len()] == *name && stored[name.len()..].iter().all(|&b| b == 0)
}

fn find_record(data: &[u8], name: &str) -> Option<usize> {
    let name = name.as_bytes();
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return None;
    }
    let count = read_i32(data, COUNT_OFFSET) as usize;
    (0..count).find(|&i| name_matches(data, i, name))
}

/// Read-only view over the header page.
pub struct HeaderPage<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPage<'a> {
    /// Wraps the raw bytes of the latched header page.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Number of stored records.
    pub fn num_records(&self) -> usize {
        read_i32(self.data, COUNT_OFFSET) as usize
    }

    /// Root page id recorded for `name`, if any.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        let index = find_record(self.data, name)?;
        Some(PageId(read_i32(
            self.data,
            record_offset(index) + MAX_NAME_LEN,
        )))
    }
}

/// Mutable view over the header page.
pub struct HeaderPageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPageMut<'a> {
    /// Wraps the raw bytes of the write-latched header page.
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    /// Clears the record table.
    pub fn init(&mut self) {
        write_i32(self.data, COUNT_OFFSET, 0);
    }

    /// Number of stored records.
    pub fn num_records(&self) -> usize {
        read_i32(self.data, COUNT_OFFSET) as usize
    }

    /// Root page id recorded for `name`, if any.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        HeaderPage::new(self.data).get_root_id(name)
    }

    /// Adds a record for `name`. Returns false if the name is invalid,
    /// already present, or the table is full.
    pub fn insert_record(&mut self, name: &str, root_id: PageId) -> bool {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > MAX_NAME_LEN {
            return false;
        }
        if find_record(self.data, name).is_some() {
            return false;
        }
        let count = self.num_records();
        if count >= MAX_RECORDS {
            return false;
        }

        let offset = record_offset(count);
        self.data[offset..offset + MAX_NAME_LEN].fill(0);
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        write_i32(self.data, offset + MAX_NAME_LEN, root_id.0);
        write_i32(self.data, COUNT_OFFSET, (count + 1) as i32);
        true
    }

    /// Rewrites the root id of an existing record. Returns false if the
    /// name is not recorded.
    pub fn update_record(&mut self, name: &str, root_id: PageId) -> bool {
        match find_record(self.data, name) {
            Some(index) => {
                write_i32(self.data, record_offset(index) + MAX_NAME_LEN, root_id.0);
                true
            }
            None => false,
        }
    }

    /// Drops the record for `name`. Returns false if absent.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let index = match find_record(self.data, name) {
            Some(index) => index,
            None => return false,
        };
        let count = self.num_records();
        self.data.copy_within(
            record_offset(index + 1)..record_offset(count),
            record_offset(index),
        );
        write_i32(self.data, COUNT_OFFSET, (count - 1) as i32);
        true
    }
}
