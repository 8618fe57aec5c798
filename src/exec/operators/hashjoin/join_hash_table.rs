// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Build-side hash index.
//!
//! Rows are addressed by a u32 locator into the merged build batch. Rows
//! with equal encoded keys form a group; while building, each group is a
//! singly linked chain through `row_next`, and `finalize_groups` compacts
//! the chains into contiguous `group_rows` slices. The index is read-only
//! after finalization, so probe threads share it without locking.

use hashbrown::HashTable;

use crate::common::error::{JoinError, Result};
use crate::exec::hash_table::key_encoder::EncodedKeys;
use crate::exec::hash_table::key_storage::KeyArena;

const ROW_NONE: u32 = u32::MAX;

#[derive(Clone, Copy, Debug)]
struct KeyEntry {
    group_id: u32,
    hash: u64,
}

pub(crate) struct JoinHashTable {
    table: HashTable<KeyEntry>,
    keys: KeyArena,
    group_head: Vec<u32>,
    row_next: Vec<u32>,
    row_count: usize,
    indexed_rows: usize,
    group_offsets: Vec<u32>,
    group_rows: Vec<u32>,
    finalized: bool,
}

fn alloc_error(what: &str, err: impl std::fmt::Debug) -> JoinError {
    JoinError::resource(format!("failed to grow join hash table {}: {:?}", what, err))
}

impl JoinHashTable {
    pub(crate) fn new() -> Self {
        Self {
            table: HashTable::new(),
            keys: KeyArena::new(),
            group_head: Vec::new(),
            row_next: Vec::new(),
            row_count: 0,
            indexed_rows: 0,
            group_offsets: Vec::new(),
            group_rows: Vec::new(),
            finalized: false,
        }
    }

    /// Reserve room for `rows` more build rows.
    pub(crate) fn reserve(&mut self, rows: usize) -> Result<()> {
        self.row_next
            .try_reserve(rows)
            .map_err(|e| alloc_error("row chain", e))?;
        self.table
            .try_reserve(rows, |entry| entry.hash)
            .map_err(|e| alloc_error("buckets", e))?;
        Ok(())
    }

    /// Index the rows of one encoded batch, whose first row has locator
    /// `base_row`. Unmatchable rows are counted but never indexed.
    pub(crate) fn add_rows(&mut self, keys: &EncodedKeys, base_row: usize) -> Result<()> {
        if self.finalized {
            return Err(JoinError::state("join hash table already finalized"));
        }
        if base_row != self.row_count {
            return Err(JoinError::execution(format!(
                "join build rows out of order: expected base {} got {}",
                self.row_count, base_row
            )));
        }
        let next_row_count = self
            .row_count
            .checked_add(keys.len())
            .filter(|n| *n < ROW_NONE as usize)
            .ok_or_else(|| JoinError::resource("join build row count overflow"))?;
        self.reserve(keys.len())?;
        self.row_next.resize(next_row_count, ROW_NONE);
        for row in 0..keys.len() {
            if !keys.matchable[row] {
                continue;
            }
            self.insert(keys.key(row), keys.hashes[row], (base_row + row) as u32)?;
        }
        self.row_count = next_row_count;
        Ok(())
    }

    fn insert(&mut self, key: &[u8], hash: u64, row: u32) -> Result<()> {
        let arena = &self.keys;
        let group_id = match self.table.find(hash, |entry| {
            entry.hash == hash && arena.get(entry.group_id as usize) == Some(key)
        }) {
            Some(entry) => entry.group_id,
            None => {
                let group_id = u32::try_from(self.group_head.len())
                    .map_err(|_| JoinError::resource("join group count overflow"))?;
                self.group_head
                    .try_reserve(1)
                    .map_err(|e| alloc_error("groups", e))?;
                self.keys.push(key);
                self.group_head.push(ROW_NONE);
                self.table
                    .insert_unique(hash, KeyEntry { group_id, hash }, |entry| entry.hash);
                group_id
            }
        };
        let head = &mut self.group_head[group_id as usize];
        self.row_next[row as usize] = *head;
        *head = row;
        self.indexed_rows += 1;
        Ok(())
    }

    /// Compact every group chain into a contiguous slice of row locators.
    pub(crate) fn finalize_groups(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        let group_count = self.group_head.len();
        let mut offsets = Vec::new();
        offsets
            .try_reserve_exact(group_count + 1)
            .map_err(|e| alloc_error("group offsets", e))?;
        let mut rows = Vec::new();
        rows.try_reserve_exact(self.indexed_rows)
            .map_err(|e| alloc_error("group rows", e))?;
        offsets.push(0u32);
        for head in &self.group_head {
            let start = rows.len();
            let mut row = *head;
            while row != ROW_NONE {
                rows.push(row);
                row = self.row_next[row as usize];
            }
            // Chains are built newest-first.
            rows[start..].reverse();
            offsets.push(rows.len() as u32);
        }
        self.group_offsets = offsets;
        self.group_rows = rows;
        self.row_next = Vec::new();
        self.finalized = true;
        Ok(())
    }

    pub(crate) fn find_group(&self, key: &[u8], hash: u64) -> Option<usize> {
        self.table
            .find(hash, |entry| {
                entry.hash == hash && self.keys.get(entry.group_id as usize) == Some(key)
            })
            .map(|entry| entry.group_id as usize)
    }

    pub(crate) fn group_rows(&self, group_id: usize) -> &[u32] {
        match (self.group_offsets.get(group_id), self.group_offsets.get(group_id + 1)) {
            (Some(start), Some(end)) => &self.group_rows[*start as usize..*end as usize],
            _ => &[],
        }
    }

    pub(crate) fn indexed_rows(&self) -> usize {
        self.indexed_rows
    }

    pub(crate) fn num_groups(&self) -> usize {
        self.group_head.len()
    }

    pub(crate) fn allocated_bytes(&self) -> usize {
        self.table.capacity() * (std::mem::size_of::<KeyEntry>() + 1)
            + self.keys.allocated_bytes()
            + (self.group_head.capacity()
                + self.row_next.capacity()
                + self.group_offsets.capacity()
                + self.group_rows.capacity())
                * std::mem::size_of::<u32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::hash_table::key_encoder::KeyEncoder;
    use crate::exec::node::join::JoinKeyCmp;
    use arrow::array::{ArrayRef, Int32Array};
    use arrow::datatypes::DataType;
    use std::sync::Arc;

    fn encode(values: Vec<Option<i32>>, cmp: JoinKeyCmp) -> EncodedKeys {
        let enc = KeyEncoder::new(vec![DataType::Int32], vec![cmp]).unwrap();
        let array: ArrayRef = Arc::new(Int32Array::from(values));
        enc.encode(&[array]).unwrap()
    }

    #[test]
    fn groups_duplicates_across_batches() {
        let mut table = JoinHashTable::new();
        let a = encode(vec![Some(1), Some(2), Some(1)], JoinKeyCmp::Eq);
        let b = encode(vec![Some(2), None, Some(1)], JoinKeyCmp::Eq);
        table.add_rows(&a, 0).unwrap();
        table.add_rows(&b, 3).unwrap();
        table.finalize_groups().unwrap();

        assert_eq!(table.row_count, 6);
        assert_eq!(table.indexed_rows(), 5);
        assert_eq!(table.num_groups(), 2);
        let g1 = table.find_group(a.key(0), a.hashes[0]).unwrap();
        assert_eq!(table.group_rows(g1), &[0, 2, 5]);
        let g2 = table.find_group(a.key(1), a.hashes[1]).unwrap();
        assert_eq!(table.group_rows(g2), &[1, 3]);
        let probe = encode(vec![Some(9)], JoinKeyCmp::Eq);
        assert!(table.find_group(probe.key(0), probe.hashes[0]).is_none());
    }

    #[test]
    fn null_safe_keys_group_nulls() {
        let mut table = JoinHashTable::new();
        let keys = encode(vec![None, Some(4), None], JoinKeyCmp::Is);
        table.add_rows(&keys, 0).unwrap();
        table.finalize_groups().unwrap();
        let g = table.find_group(keys.key(0), keys.hashes[0]).unwrap();
        assert_eq!(table.group_rows(g), &[0, 2]);
    }

    #[test]
    fn rejects_misuse() {
        let mut table = JoinHashTable::new();
        let keys = encode(vec![Some(1)], JoinKeyCmp::Eq);
        assert!(table.add_rows(&keys, 5).is_err());
        table.finalize_groups().unwrap();
        assert!(matches!(table.add_rows(&keys, 0), Err(JoinError::State(_))));
        assert!(table.group_rows(10).is_empty());
    }
}
