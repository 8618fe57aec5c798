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
//! Probe-ready build side.
//!
//! Published once by the merge task and read concurrently by every probing
//! thread and every scan task. Only `matched` is written after publication,
//! through atomic bit operations.

use arrow::record_batch::RecordBatch;

use super::join_hash_table::JoinHashTable;
use super::unmatched::MatchBitmap;
use crate::exec::runtime_filter::bloom::BlockBloomFilter;
use crate::runtime::mem_tracker::TrackedBytes;

pub(crate) struct BuildArtifact {
    /// Every build row, KEY columns then PAYLOAD columns. Row locators in
    /// `table` index into this batch.
    pub(crate) batch: RecordBatch,
    pub(crate) table: JoinHashTable,
    pub(crate) bloom: Option<BlockBloomFilter>,
    pub(crate) matched: Option<MatchBitmap>,
    tracked: TrackedBytes,
}

impl BuildArtifact {
    pub(crate) fn new(
        batch: RecordBatch,
        table: JoinHashTable,
        bloom: Option<BlockBloomFilter>,
        matched: Option<MatchBitmap>,
        tracked: TrackedBytes,
    ) -> Self {
        Self {
            batch,
            table,
            bloom,
            matched,
            tracked,
        }
    }

    pub(crate) fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub(crate) fn tracked_bytes(&self) -> i64 {
        self.tracked.bytes()
    }
}
