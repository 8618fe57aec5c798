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
//! Deterministic hashing of encoded join keys.
//!
//! Build and probe threads must agree on every hash without sharing a hasher
//! instance, so hashes here are pure functions of a fixed seed and the key
//! bytes.

pub(crate) const JOIN_KEY_SEED: u64 = 0x2545_f491_4f6c_dd1d;

pub(crate) fn hash_bytes_with_seed(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    let mut chunks = bytes.chunks_exact(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        hash = mix_u64(hash ^ u64::from_le_bytes(word));
    }
    for byte in chunks.remainder() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    mix_u64(hash ^ bytes.len() as u64)
}

pub(crate) fn hash_join_key(bytes: &[u8]) -> u64 {
    hash_bytes_with_seed(JOIN_KEY_SEED, bytes)
}

fn mix_u64(mut value: u64) -> u64 {
    value = value.wrapping_add(0x9e3779b97f4a7c15);
    value = (value ^ (value >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    value = (value ^ (value >> 27)).wrapping_mul(0x94d049bb133111eb);
    value ^ (value >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_length_sensitive() {
        assert_eq!(hash_join_key(b"abcdefghij"), hash_join_key(b"abcdefghij"));
        assert_ne!(hash_join_key(b"a"), hash_join_key(b"a\0"));
        assert_ne!(hash_join_key(b""), hash_join_key(b"\0"));
    }
}
