//! Deduplicating per-block tables.

use std::collections::HashMap;

use crate::TableIndex;
use crate::error::{CdnsError, Result};
use crate::hash::TableKey;

/// An append-only, deduplicating table mapping values to dense 0-based
/// indices in insertion order.
///
/// Equal values share an index. Lookup runs over CRC32 hash buckets with
/// separate chaining; equality is structural. Indices are only valid within
/// the block that produced them.
pub struct BlockTable<T> {
    items: Vec<T>,
    buckets: HashMap<u32, Vec<TableIndex>>,
}

impl<T: TableKey + PartialEq> BlockTable<T> {
    pub fn new() -> Self {
        BlockTable {
            items: Vec::new(),
            buckets: HashMap::new(),
        }
    }

    /// Look up the index of a value already in the table.
    pub fn find(&self, key: &T) -> Option<TableIndex> {
        self.buckets
            .get(&key.key_hash())?
            .iter()
            .copied()
            .find(|&index| self.items[index as usize] == *key)
    }

    /// Insert a value unless an equal one is present; either way return the
    /// index both now share.
    pub fn add(&mut self, value: T) -> TableIndex {
        match self.find(&value) {
            Some(index) => index,
            None => self.add_value(value),
        }
    }

    /// Append unconditionally. The caller asserts the value is not already
    /// present (the read path fills tables straight off the wire this way).
    pub fn add_value(&mut self, value: T) -> TableIndex {
        let index = self.items.len() as TableIndex;
        self.buckets
            .entry(value.key_hash())
            .or_default()
            .push(index);
        self.items.push(value);
        index
    }

    pub fn get(&self, index: TableIndex) -> Result<&T> {
        self.items.get(index as usize).ok_or_else(|| {
            CdnsError::IndexRange(format!(
                "block table index {index} out of range ({} items)",
                self.items.len()
            ))
        })
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.buckets.clear();
    }

    /// Iterate values in insertion (index) order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

impl<T: TableKey + PartialEq> Default for BlockTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
