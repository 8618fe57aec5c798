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
//! Split-block bloom filter over 64-bit key hashes.
//!
//! The directory is an array of 256-bit buckets (8 x u32). A hash selects one
//! bucket with its low bits and sets one bit in each of the bucket's eight
//! words, so a membership test touches a single cache line.

const SALT: [u32; 8] = [
    0x47b6137b, 0x44974d91, 0x8824ad5b, 0xa2b7289d, 0x705495c7, 0x2df1424b, 0x9efc4947, 0x5c6bfb31,
];

const WORDS_PER_BUCKET: usize = 8;

#[derive(Clone, Debug)]
pub(crate) struct BlockBloomFilter {
    log_num_buckets: u32,
    directory_mask: u32,
    directory: Vec<u32>,
}

impl BlockBloomFilter {
    /// Size the directory for roughly eight bits per expected element.
    pub(crate) fn with_expected_items(num_elements: u64) -> Self {
        let nums = num_elements.max(1);
        let log_heap_space = (nums as f64).log2().ceil() as i32;
        let log_num_buckets = std::cmp::max(1, log_heap_space - 5).min(31) as u32;
        let directory_mask = ((1u64 << log_num_buckets) - 1) as u32;
        let bucket_count = 1usize << log_num_buckets;
        Self {
            log_num_buckets,
            directory_mask,
            directory: vec![0u32; bucket_count * WORDS_PER_BUCKET],
        }
    }

    pub(crate) fn can_use(&self) -> bool {
        !self.directory.is_empty()
    }

    pub(crate) fn size_bytes(&self) -> usize {
        self.directory.len() * std::mem::size_of::<u32>()
    }

    pub(crate) fn insert_hash(&mut self, hash: u64) {
        if !self.can_use() {
            return;
        }
        let base = self.bucket_base(hash);
        let masks = make_mask(self.bucket_key(hash));
        for (word, mask) in self.directory[base..base + WORDS_PER_BUCKET]
            .iter_mut()
            .zip(masks)
        {
            *word |= mask;
        }
    }

    /// False means the hash was definitely never inserted.
    pub(crate) fn test_hash(&self, hash: u64) -> bool {
        if !self.can_use() {
            return true;
        }
        let base = self.bucket_base(hash);
        let masks = make_mask(self.bucket_key(hash));
        self.directory[base..base + WORDS_PER_BUCKET]
            .iter()
            .zip(masks)
            .all(|(word, mask)| word & mask != 0)
    }

    fn bucket_base(&self, hash: u64) -> usize {
        ((hash as u32) & self.directory_mask) as usize * WORDS_PER_BUCKET
    }

    fn bucket_key(&self, hash: u64) -> u32 {
        (hash >> self.log_num_buckets) as u32
    }
}

fn make_mask(key: u32) -> [u32; 8] {
    let mut masks = [0u32; 8];
    for i in 0..8 {
        let v = key.wrapping_mul(SALT[i]) >> 27;
        masks[i] = 1u32 << v;
    }
    masks
}
