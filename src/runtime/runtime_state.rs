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
use std::sync::{Arc, Mutex};

use crate::common::config;
use crate::common::error::JoinError;
use crate::exec::node::join::JoinSide;
use crate::novajoin_logging::warn;
use crate::runtime::mem_tracker::{self, MemTracker};

/// Per-join tunables. Defaults come from the process configuration.
#[derive(Clone, Debug)]
pub struct HashJoinOptions {
    /// Input materialized into the hash index; the other input is streamed.
    pub build_side: JoinSide,
    pub output_batch_rows: usize,
    pub scan_unit_rows: usize,
    pub enable_bloom_filter: bool,
    pub bloom_filter_min_build_rows: usize,
    pub mem_limit_bytes: Option<u64>,
    /// Appended to left output names that collide with a right output name.
    pub output_suffix_for_left: String,
    pub output_suffix_for_right: String,
}

impl Default for HashJoinOptions {
    fn default() -> Self {
        Self {
            build_side: JoinSide::Left,
            output_batch_rows: config::output_batch_rows().max(1),
            scan_unit_rows: config::scan_unit_rows().max(1),
            enable_bloom_filter: config::enable_bloom_filter(),
            bloom_filter_min_build_rows: config::bloom_filter_min_build_rows(),
            mem_limit_bytes: config::hash_join_mem_limit_bytes(),
            output_suffix_for_left: String::new(),
            output_suffix_for_right: String::new(),
        }
    }
}

/// First error wins; later ones are logged and dropped.
#[derive(Debug, Default)]
pub struct RuntimeErrorState {
    error: Mutex<Option<JoinError>>,
}

impl RuntimeErrorState {
    pub fn set_error(&self, err: JoinError) {
        let mut guard = self.error.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(err);
        } else {
            warn!("dropping secondary runtime error: {}", err);
        }
    }

    pub fn error(&self) -> Option<JoinError> {
        self.error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Execution context handed to a join at init time.
#[derive(Clone, Debug)]
pub struct RuntimeState {
    options: HashJoinOptions,
    error_state: Arc<RuntimeErrorState>,
    mem_tracker: Arc<MemTracker>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new(HashJoinOptions::default())
    }
}

impl RuntimeState {
    pub fn new(options: HashJoinOptions) -> Self {
        let process = mem_tracker::process_mem_tracker();
        let mem_tracker = match options.mem_limit_bytes {
            Some(limit) => MemTracker::new_child_with_limit(
                "hash_join",
                i64::try_from(limit).unwrap_or(i64::MAX),
                &process,
            ),
            None => MemTracker::new_child("hash_join", &process),
        };
        Self {
            options,
            error_state: Arc::new(RuntimeErrorState::default()),
            mem_tracker,
        }
    }

    pub fn options(&self) -> &HashJoinOptions {
        &self.options
    }

    pub fn mem_tracker(&self) -> Arc<MemTracker> {
        Arc::clone(&self.mem_tracker)
    }

    pub fn set_error(&self, err: JoinError) {
        self.error_state.set_error(err);
    }

    pub fn error(&self) -> Option<JoinError> {
        self.error_state.error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_is_kept() {
        let state = RuntimeState::default();
        assert!(state.error().is_none());
        state.set_error(JoinError::resource("first"));
        state.set_error(JoinError::execution("second"));
        assert!(matches!(state.error(), Some(JoinError::Resource(msg)) if msg == "first"));
    }

    #[test]
    fn mem_limit_is_applied_to_join_tracker() {
        let state = RuntimeState::new(HashJoinOptions {
            mem_limit_bytes: Some(64),
            ..HashJoinOptions::default()
        });
        let tracker = state.mem_tracker();
        assert_eq!(tracker.limit(), 64);
        assert!(tracker.try_consume(65).is_err());
    }
}
