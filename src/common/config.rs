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
use crate::novajoin_config::config as novajoin_app_config;

pub(crate) fn exec_threads() -> usize {
    novajoin_app_config()
        .ok()
        .map(|c| c.runtime.actual_exec_threads())
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
}

pub(crate) fn output_batch_rows() -> usize {
    novajoin_app_config()
        .ok()
        .map(|c| c.runtime.output_batch_rows)
        .unwrap_or(4096)
}

pub(crate) fn scan_unit_rows() -> usize {
    novajoin_app_config()
        .ok()
        .map(|c| c.runtime.scan_unit_rows)
        .unwrap_or(32 * 1024)
}

pub(crate) fn enable_bloom_filter() -> bool {
    novajoin_app_config()
        .ok()
        .map(|c| c.hash_join.enable_bloom_filter)
        .unwrap_or(true)
}

pub(crate) fn bloom_filter_min_build_rows() -> usize {
    novajoin_app_config()
        .ok()
        .map(|c| c.hash_join.bloom_filter_min_build_rows)
        .unwrap_or(4096)
}

pub(crate) fn hash_join_mem_limit_bytes() -> Option<u64> {
    novajoin_app_config()
        .ok()
        .and_then(|c| c.hash_join.mem_limit_bytes)
}
