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
//! The hash join engine contract.
//!
//! A driver initializes an engine once, feeds each build thread's input
//! through [`HashJoinImpl::build_hash_table`], then streams probe batches
//! through [`HashJoinImpl::probe_single_batch`] and closes every probing
//! thread with [`HashJoinImpl::probing_finished`]. Output leaves through the
//! output callback; completion is reported once through the finished
//! callback.

use std::sync::Arc;

use super::basic_hash_join::BasicHashJoin;
use super::schema::HashJoinSchema;
use crate::common::error::Result;
use crate::exec::chunk::Chunk;
use crate::exec::expr::Expr;
use crate::exec::node::join::{JoinKeyCmp, JoinType};
use crate::exec::pipeline::accumulation_queue::AccumulationQueue;
use crate::exec::pipeline::task_scheduler::{AbortContinuationImpl, TaskScheduler};
use crate::runtime::runtime_state::RuntimeState;

/// Receives every output batch. May be called from several threads at once.
pub type OutputBatchCallback = Arc<dyn Fn(Chunk) + Send + Sync>;

/// Called once the build side is fully indexed, with the index of the
/// thread whose `build_hash_table` call registered it.
pub type BuildFinishedCallback = Box<dyn FnOnce(usize) -> Result<()> + Send>;

/// Called once a probing thread's buffered output has been flushed.
pub type ProbeFinishedCallback = Box<dyn FnOnce(usize) -> Result<()> + Send>;

/// Called exactly once with the total number of rows output by the join.
pub type FinishedCallback = Box<dyn FnOnce(i64) + Send>;

pub trait HashJoinImpl: Send + Sync {
    /// `filter` must already be expressed over `schema_mgr.filter_schema()`
    /// (as `HashJoinSchema::filter` is), or be literal `true`.
    #[allow(clippy::too_many_arguments)]
    fn init(
        &mut self,
        ctx: Arc<RuntimeState>,
        join_type: JoinType,
        num_threads: usize,
        schema_mgr: &HashJoinSchema,
        key_cmp: Vec<JoinKeyCmp>,
        filter: &Expr,
        output_batch_callback: OutputBatchCallback,
        finished_callback: FinishedCallback,
        scheduler: Arc<dyn TaskScheduler>,
    ) -> Result<()>;

    /// Hand over one thread's complete build input. Every thread index in
    /// `0..num_threads` must call this exactly once.
    fn build_hash_table(
        &self,
        thread_index: usize,
        batches: AccumulationQueue,
        on_finished: BuildFinishedCallback,
    ) -> Result<()>;

    fn probe_single_batch(&self, thread_index: usize, batch: Chunk) -> Result<()>;

    /// The thread has no more probe input. Flushes the thread's buffered
    /// output, then runs `on_finished(thread_index)`.
    fn probing_finished_with(
        &self,
        thread_index: usize,
        on_finished: ProbeFinishedCallback,
    ) -> Result<()>;

    fn probing_finished(&self, thread_index: usize) -> Result<()> {
        self.probing_finished_with(thread_index, Box::new(|_| Ok(())))
    }

    /// Cancel the join. `on_aborted` runs once no engine work is in flight.
    fn abort(&self, on_aborted: AbortContinuationImpl);
}

/// The default engine: a single shared hash index over the whole build side.
pub fn make_basic() -> Result<Box<dyn HashJoinImpl>> {
    Ok(Box::new(BasicHashJoin::new()))
}
