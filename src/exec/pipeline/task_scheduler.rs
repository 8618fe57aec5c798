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
//! Contract between the join engine and a cooperative task scheduler.
//!
//! Work is registered up front as task groups. Starting a group fans out
//! `num_tasks` invocations of its task function; once all of them returned,
//! the group's continuation runs exactly once on whichever thread finished
//! last. Dependencies between groups are expressed by starting the dependent
//! group from a continuation, so no worker ever blocks waiting for another.

use std::sync::Arc;

use crate::common::error::Result;

pub type TaskGroupId = usize;

/// `(thread_index, task_id)`.
pub type TaskImpl = Arc<dyn Fn(usize, usize) -> Result<()> + Send + Sync>;

/// `(thread_index)`.
pub type TaskGroupContinuationImpl = Arc<dyn Fn(usize) -> Result<()> + Send + Sync>;

pub type AbortContinuationImpl = Box<dyn FnOnce() + Send>;

pub trait TaskScheduler: Send + Sync {
    /// Must be called before `register_end`.
    fn register_task_group(
        &self,
        task: TaskImpl,
        continuation: TaskGroupContinuationImpl,
    ) -> TaskGroupId;

    /// Closes registration. Groups may be started afterwards.
    fn register_end(&self);

    /// Dispatch `num_tasks` tasks of `group`. A group starts at most once.
    /// After an abort this is a no-op.
    fn start_task_group(&self, thread_index: usize, group: TaskGroupId, num_tasks: usize)
    -> Result<()>;

    /// Stop dispatching. `continuation` runs once every in-flight task has
    /// returned.
    fn abort(&self, continuation: AbortContinuationImpl);

    fn is_aborted(&self) -> bool;

    /// Upper bound (exclusive) of the thread indices passed to tasks.
    fn num_threads(&self) -> usize;
}
