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
//! When to build the join's bloom filter and how the probe side consults it.

use std::sync::atomic::{AtomicU64, Ordering};

use super::bloom::BlockBloomFilter;
use crate::exec::hash_table::key_encoder::EncodedKeys;
use crate::runtime::runtime_state::HashJoinOptions;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BloomFilterPushdown {
    enabled: bool,
    min_build_rows: usize,
}

impl BloomFilterPushdown {
    pub(crate) fn new(enabled: bool, min_build_rows: usize) -> Self {
        Self {
            enabled,
            min_build_rows,
        }
    }

    pub(crate) fn from_options(options: &HashJoinOptions) -> Self {
        Self::new(options.enable_bloom_filter, options.bloom_filter_min_build_rows)
    }

    /// Requires at least `min_build_rows` indexed (matchable) build rows.
    pub(crate) fn should_build(&self, indexed_build_rows: usize) -> bool {
        self.enabled && indexed_build_rows > 0 && indexed_build_rows >= self.min_build_rows
    }

    pub(crate) fn build<'a, I>(&self, expected_items: usize, hashes: I) -> BlockBloomFilter
    where
        I: IntoIterator<Item = &'a u64>,
    {
        let mut filter = BlockBloomFilter::with_expected_items(expected_items as u64);
        for hash in hashes {
            filter.insert_hash(*hash);
        }
        filter
    }
}

/// Probe-side counters, shared by every probing thread.
#[derive(Debug, Default)]
pub(crate) struct BloomProbeStats {
    tested: AtomicU64,
    rejected: AtomicU64,
}

impl BloomProbeStats {
    pub(crate) fn tested(&self) -> u64 {
        self.tested.load(Ordering::Relaxed)
    }

    pub(crate) fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Clear `matchable` for every probe row the filter proves absent from the
/// build side. Rows already unmatchable are not tested.
pub(crate) fn apply_bloom_filter(
    filter: &BlockBloomFilter,
    keys: &mut EncodedKeys,
    stats: &BloomProbeStats,
) {
    if !filter.can_use() {
        return;
    }
    let mut tested = 0u64;
    let mut rejected = 0u64;
    for (flag, hash) in keys.matchable.iter_mut().zip(keys.hashes.iter()) {
        if !*flag {
            continue;
        }
        tested += 1;
        if !filter.test_hash(*hash) {
            *flag = false;
            rejected += 1;
        }
    }
    stats.tested.fetch_add(tested, Ordering::Relaxed);
    stats.rejected.fetch_add(rejected, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::hash_table::key_encoder::KeyEncoder;
    use crate::exec::node::join::JoinKeyCmp;
    use arrow::array::{ArrayRef, Int64Array};
    use arrow::datatypes::DataType;
    use std::sync::Arc;

    fn encode(values: Vec<i64>) -> EncodedKeys {
        let enc = KeyEncoder::new(vec![DataType::Int64], vec![JoinKeyCmp::Eq]).unwrap();
        let array: ArrayRef = Arc::new(Int64Array::from(values));
        enc.encode(&[array]).unwrap()
    }

    #[test]
    fn build_threshold() {
        let policy = BloomFilterPushdown::new(true, 100);
        assert!(!policy.should_build(99));
        assert!(policy.should_build(100));
        assert!(!BloomFilterPushdown::new(false, 0).should_build(1_000_000));
        assert!(!BloomFilterPushdown::new(true, 0).should_build(0));
    }

    #[test]
    fn filter_keeps_members_and_drops_most_others() {
        let build = encode((0..2000).collect());
        let policy = BloomFilterPushdown::new(true, 1);
        let filter = policy.build(build.len(), build.hashes.iter());

        let mut probe = encode((0..4000).collect());
        let stats = BloomProbeStats::default();
        apply_bloom_filter(&filter, &mut probe, &stats);
        assert!(probe.matchable[..2000].iter().all(|m| *m));
        assert_eq!(stats.tested(), 4000);
        assert!(stats.rejected() > 1500);
    }
}
