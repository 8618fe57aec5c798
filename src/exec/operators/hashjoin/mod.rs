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
//! Multi-threaded hash join.
//!
//! [`HashJoinSchema`] resolves keys, outputs and the residual filter into
//! per-side projection maps. [`HashJoinImpl`] is the engine contract;
//! [`make_basic`] returns the default engine.

mod basic_hash_join;
mod build_artifact;
mod build_state;
mod hash_join_impl;
mod hash_join_probe_core;
mod join_hash_table;
mod join_probe_utils;
mod layout;
mod output;
pub mod projection;
pub mod schema;
mod unmatched;

pub use basic_hash_join::BasicHashJoin;
pub use hash_join_impl::{
    BuildFinishedCallback, FinishedCallback, HashJoinImpl, OutputBatchCallback,
    ProbeFinishedCallback, make_basic,
};
pub use projection::{HashJoinProjection, MISSING_FIELD, SchemaProjectionMap, SchemaProjectionMaps};
pub use schema::HashJoinSchema;
