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
use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::error::{JoinError, Result};

/// One flag per build row, set once the row found a probe-side match.
///
/// Bits are set with independent atomic `fetch_or`s, so concurrent probe
/// threads never contend on a lock and setting a bit twice is harmless.
#[derive(Debug, Default)]
pub(crate) struct MatchBitmap {
    words: Vec<AtomicU64>,
    len: usize,
}

impl MatchBitmap {
    pub(crate) fn try_new(len: usize) -> Result<Self> {
        let num_words = len.div_ceil(64);
        let mut words = Vec::new();
        words.try_reserve_exact(num_words).map_err(|e| {
            JoinError::resource(format!("failed to allocate match bitmap: {}", e))
        })?;
        words.resize_with(num_words, || AtomicU64::new(0));
        Ok(Self { words, len })
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn allocated_bytes(&self) -> usize {
        self.words.capacity() * std::mem::size_of::<AtomicU64>()
    }

    pub(crate) fn mark(&self, row: usize) {
        if row >= self.len {
            return;
        }
        let bit = 1u64 << (row % 64);
        let word = &self.words[row / 64];
        if word.load(Ordering::Relaxed) & bit == 0 {
            word.fetch_or(bit, Ordering::Relaxed);
        }
    }

    pub(crate) fn is_marked(&self, row: usize) -> bool {
        if row >= self.len {
            return false;
        }
        self.words[row / 64].load(Ordering::Relaxed) & (1u64 << (row % 64)) != 0
    }

    /// Rows in `[start, end)` whose flag equals `marked`, ascending.
    pub(crate) fn collect(&self, start: usize, end: usize, marked: bool) -> Vec<u32> {
        let end = end.min(self.len);
        (start..end)
            .filter(|row| self.is_marked(*row) == marked)
            .map(|row| row as u32)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn mark_is_idempotent() {
        let bm = MatchBitmap::try_new(130).unwrap();
        bm.mark(3);
        bm.mark(3);
        bm.mark(129);
        bm.mark(500);
        assert!(bm.is_marked(3));
        assert!(!bm.is_marked(4));
        assert_eq!(bm.collect(0, 130, true), vec![3, 129]);
        assert_eq!(bm.collect(0, 10, true), vec![3]);
        assert_eq!(bm.collect(125, 200, false), vec![125, 126, 127, 128]);
    }

    #[test]
    fn concurrent_marks() {
        let bm = Arc::new(MatchBitmap::try_new(10_000).unwrap());
        std::thread::scope(|s| {
            for t in 0..4 {
                let bm = Arc::clone(&bm);
                s.spawn(move || {
                    for row in (t..10_000).step_by(2) {
                        bm.mark(row);
                    }
                });
            }
        });
        assert!(bm.collect(0, 10_000, false).is_empty());
    }
}
