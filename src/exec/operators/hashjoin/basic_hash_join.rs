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
//! `BasicHashJoin`: one shared hash index over the whole build side.
//!
//! Phases:
//! - Build: every thread stages its partition locally and deposits it. The
//!   last deposit starts the one-task merge group, which indexes all rows,
//!   publishes the build artifact and enters Probing.
//! - Probe: threads probe batches against the immutable artifact; the match
//!   bitmap is the only shared write.
//! - Finalize: the last `probing_finished` starts the build-scan group (for
//!   joins that emit build rows after probing); its continuation reports the
//!   output row total and enters Finished.
//!
//! Abort is cooperative. A cancelled flag turns every later public call into
//! a no-op; abort continuations run once the scheduler has drained and no
//! public call is still inside the engine.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use super::build_artifact::BuildArtifact;
use super::build_state::{BuildState, merge_partitions, stage_partition};
use super::hash_join_impl::{
    BuildFinishedCallback, FinishedCallback, HashJoinImpl, OutputBatchCallback,
    ProbeFinishedCallback,
};
use super::hash_join_probe_core::{ProbeCore, scan_build_rows};
use super::layout::JoinLayout;
use super::output::OutputCoalescer;
use super::schema::HashJoinSchema;
use crate::common::error::{JoinError, Result};
use crate::exec::chunk::Chunk;
use crate::exec::expr::Expr;
use crate::exec::hash_table::key_encoder::KeyEncoder;
use crate::exec::node::join::{JoinKeyCmp, JoinType};
use crate::exec::pipeline::accumulation_queue::AccumulationQueue;
use crate::exec::pipeline::task_scheduler::{AbortContinuationImpl, TaskGroupId, TaskScheduler};
use crate::exec::runtime_filter::pushdown::{BloomFilterPushdown, BloomProbeStats};
use crate::novajoin_logging::{debug, info, warn};
use crate::runtime::runtime_state::RuntimeState;

const STATE_INITIALIZED: u8 = 1;
const STATE_BUILDING: u8 = 2;
const STATE_PROBING: u8 = 3;
const STATE_FINISHED: u8 = 4;
const STATE_ABORTED: u8 = 5;

fn state_name(state: u8) -> &'static str {
    match state {
        STATE_INITIALIZED => "initialized",
        STATE_BUILDING => "building",
        STATE_PROBING => "probing",
        STATE_FINISHED => "finished",
        STATE_ABORTED => "aborted",
        _ => "unknown",
    }
}

fn as_callback_error(err: JoinError) -> JoinError {
    match err {
        JoinError::Callback(_) => err,
        other => JoinError::callback(other.to_string()),
    }
}

#[derive(Default)]
struct AbortState {
    cancelled: AtomicBool,
    scheduler_abort_requested: AtomicBool,
    scheduler_drained: AtomicBool,
    active_calls: AtomicUsize,
    continuations: Mutex<Vec<AbortContinuationImpl>>,
}

/// Marks one public call as in flight until dropped.
struct CallGuard<'a> {
    shared: &'a JoinShared,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        let abort = &self.shared.abort;
        if abort.active_calls.fetch_sub(1, Ordering::SeqCst) == 1
            && abort.cancelled.load(Ordering::SeqCst)
        {
            self.shared.try_finish_abort();
        }
    }
}

struct JoinShared {
    ctx: Arc<RuntimeState>,
    layout: JoinLayout,
    num_threads: usize,
    encoder: KeyEncoder,
    pushdown: BloomFilterPushdown,
    bloom_stats: BloomProbeStats,
    scan_unit_rows: usize,
    scheduler: Arc<dyn TaskScheduler>,
    merge_group: TaskGroupId,
    scan_group: Option<TaskGroupId>,

    state: AtomicU8,
    build: BuildState,
    artifact: OnceLock<BuildArtifact>,
    coalescer: OutputCoalescer,
    probe_done: Vec<AtomicBool>,
    probe_done_count: AtomicUsize,
    output_rows: AtomicI64,
    output_batch_callback: OutputBatchCallback,
    finished_callback: Mutex<Option<FinishedCallback>>,
    abort: AbortState,
}

impl JoinShared {
    fn enter(&self) -> Option<CallGuard<'_>> {
        self.abort.active_calls.fetch_add(1, Ordering::SeqCst);
        let guard = CallGuard { shared: self };
        if self.abort.cancelled.load(Ordering::SeqCst) {
            return None;
        }
        Some(guard)
    }

    fn is_cancelled(&self) -> bool {
        self.abort.cancelled.load(Ordering::SeqCst)
    }

    fn check_thread_index(&self, thread_index: usize) -> Result<()> {
        if thread_index >= self.num_threads {
            return Err(JoinError::state(format!(
                "thread index {} out of range (num_threads={})",
                thread_index, self.num_threads
            )));
        }
        Ok(())
    }

    fn emit(&self, chunk: Chunk) {
        if chunk.is_empty() || self.is_cancelled() {
            return;
        }
        self.output_rows
            .fetch_add(chunk.len() as i64, Ordering::Relaxed);
        (self.output_batch_callback)(chunk);
    }

    fn artifact(&self) -> Result<&BuildArtifact> {
        self.artifact
            .get()
            .ok_or_else(|| JoinError::state("build artifact is not published"))
    }

    /// Record `err`, abort the join and hand the error back.
    fn fail(self: &Arc<Self>, err: JoinError) -> JoinError {
        warn!("hash join failed, aborting: {}", err);
        self.ctx.set_error(err.clone());
        self.begin_abort();
        self.try_finish_abort();
        err
    }

    fn begin_abort(self: &Arc<Self>) {
        self.abort.cancelled.store(true, Ordering::SeqCst);
        let _ = self.state.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
            (s != STATE_FINISHED).then_some(STATE_ABORTED)
        });
        self.coalescer.clear();
        self.build.clear();
        if self.abort.scheduler_abort_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("hash join abort requested");
        let weak: Weak<JoinShared> = Arc::downgrade(self);
        self.scheduler.abort(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.abort.scheduler_drained.store(true, Ordering::SeqCst);
                shared.try_finish_abort();
            }
        }));
    }

    fn try_finish_abort(&self) {
        let abort = &self.abort;
        if !abort.scheduler_drained.load(Ordering::SeqCst)
            || abort.active_calls.load(Ordering::SeqCst) != 0
        {
            return;
        }
        let continuations = {
            let mut guard = abort
                .continuations
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        if continuations.is_empty() {
            return;
        }
        debug!("hash join drained, running {} abort continuations", continuations.len());
        for continuation in continuations {
            continuation();
        }
    }

    fn request_abort(self: &Arc<Self>, on_aborted: AbortContinuationImpl) {
        {
            let mut guard = self
                .abort
                .continuations
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            guard.push(on_aborted);
        }
        self.begin_abort();
        self.try_finish_abort();
    }

    fn build_hash_table(
        self: &Arc<Self>,
        thread_index: usize,
        batches: AccumulationQueue,
        on_finished: BuildFinishedCallback,
    ) -> Result<()> {
        self.check_thread_index(thread_index)?;
        let state = self.state.load(Ordering::SeqCst);
        if state != STATE_INITIALIZED && state != STATE_BUILDING {
            return Err(JoinError::state(format!(
                "build_hash_table called while {}",
                state_name(state)
            )));
        }
        let _ = self.state.compare_exchange(
            STATE_INITIALIZED,
            STATE_BUILDING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.build.check_thread(thread_index)?;

        let rows = batches.row_count();
        let partition =
            stage_partition(&self.layout, &self.encoder, batches, &self.ctx.mem_tracker())?;
        if self.is_cancelled() {
            return Ok(());
        }
        let last = self.build.deposit(thread_index, partition, on_finished)?;
        debug!(
            "hash join build partition staged: thread={} rows={} last={}",
            thread_index, rows, last
        );
        if last {
            self.scheduler
                .start_task_group(thread_index, self.merge_group, 1)?;
        }
        Ok(())
    }

    /// Body of the merge task.
    fn merge(self: &Arc<Self>) -> Result<()> {
        if self.is_cancelled() {
            return Ok(());
        }
        let partitions = self.build.take_partitions();
        let artifact = merge_partitions(
            &self.layout,
            partitions,
            &self.pushdown,
            &self.ctx.mem_tracker(),
        )?;
        let rows = artifact.num_rows();
        if self.artifact.set(artifact).is_err() {
            return Err(JoinError::state("build artifact published twice"));
        }
        if self
            .state
            .compare_exchange(STATE_BUILDING, STATE_PROBING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        info!(
            "hash join build finished: join_type={} build_side={} rows={}",
            self.layout.join_type, self.layout.build_side, rows
        );
        for (thread_index, on_finished) in self.build.take_callbacks() {
            if self.is_cancelled() {
                break;
            }
            on_finished(thread_index).map_err(as_callback_error)?;
        }
        Ok(())
    }

    fn probe_single_batch(self: &Arc<Self>, thread_index: usize, batch: Chunk) -> Result<()> {
        self.check_thread_index(thread_index)?;
        let state = self.state.load(Ordering::SeqCst);
        if state != STATE_PROBING {
            return Err(JoinError::state(format!(
                "probe_single_batch called while {}",
                state_name(state)
            )));
        }
        if self.probe_done[thread_index].load(Ordering::SeqCst) {
            return Err(JoinError::state(format!(
                "probe_single_batch called after probing_finished for thread {}",
                thread_index
            )));
        }
        let core = ProbeCore {
            layout: &self.layout,
            artifact: self.artifact()?,
            encoder: &self.encoder,
            bloom_stats: &self.bloom_stats,
        };
        for piece in core.probe(&batch.batch)? {
            for chunk in self.coalescer.push(thread_index, piece)? {
                self.emit(chunk);
            }
        }
        Ok(())
    }

    fn probing_finished(
        self: &Arc<Self>,
        thread_index: usize,
        on_finished: ProbeFinishedCallback,
    ) -> Result<()> {
        self.check_thread_index(thread_index)?;
        let state = self.state.load(Ordering::SeqCst);
        if state != STATE_PROBING {
            return Err(JoinError::state(format!(
                "probing_finished called while {}",
                state_name(state)
            )));
        }
        if self.probe_done[thread_index].swap(true, Ordering::SeqCst) {
            return Err(JoinError::state(format!(
                "probing_finished called twice for thread {}",
                thread_index
            )));
        }
        if let Some(chunk) = self.coalescer.flush(thread_index)? {
            self.emit(chunk);
        }
        on_finished(thread_index).map_err(as_callback_error)?;

        let done = self.probe_done_count.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            "hash join probing finished: thread={} done={}/{}",
            thread_index, done, self.num_threads
        );
        if done != self.num_threads {
            return Ok(());
        }
        match self.scan_group {
            Some(group) => {
                let rows = self.artifact()?.num_rows();
                let num_tasks = rows.div_ceil(self.scan_unit_rows);
                debug!(
                    "hash join build scan: rows={} tasks={}",
                    rows, num_tasks
                );
                self.scheduler.start_task_group(thread_index, group, num_tasks)
            }
            None => self.finish(),
        }
    }

    /// Body of one build-scan task.
    fn scan(self: &Arc<Self>, task_id: usize) -> Result<()> {
        if self.is_cancelled() {
            return Ok(());
        }
        let artifact = self.artifact()?;
        let start = task_id * self.scan_unit_rows;
        let end = (start + self.scan_unit_rows).min(artifact.num_rows());
        if let Some(batch) = scan_build_rows(&self.layout, artifact, start, end)? {
            self.emit(Chunk::new(batch));
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        if self.is_cancelled() {
            return Ok(());
        }
        if self
            .state
            .compare_exchange(STATE_PROBING, STATE_FINISHED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(JoinError::state("hash join finished twice"));
        }
        let total = self.output_rows.load(Ordering::SeqCst);
        info!(
            "hash join finished: join_type={} output_rows={} bloom_tested={} bloom_rejected={}",
            self.layout.join_type,
            total,
            self.bloom_stats.tested(),
            self.bloom_stats.rejected()
        );
        let callback = self
            .finished_callback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(callback) = callback {
            callback(total);
        }
        Ok(())
    }
}

/// Runs a scheduler-dispatched body, routing its error into the join.
fn run_task<F>(weak: &Weak<JoinShared>, body: F) -> Result<()>
where
    F: FnOnce(&Arc<JoinShared>) -> Result<()>,
{
    let Some(shared) = weak.upgrade() else {
        return Ok(());
    };
    body(&shared).map_err(|err| shared.fail(err))
}

/// Hash join over a single shared index. Build with [`make_basic`] or
/// [`BasicHashJoin::new`], then [`HashJoinImpl::init`].
///
/// [`make_basic`]: super::hash_join_impl::make_basic
#[derive(Default)]
pub struct BasicHashJoin {
    shared: Option<Arc<JoinShared>>,
}

impl BasicHashJoin {
    pub fn new() -> Self {
        Self::default()
    }

    fn shared(&self) -> Result<&Arc<JoinShared>> {
        self.shared
            .as_ref()
            .ok_or_else(|| JoinError::state("hash join used before init"))
    }

    /// Rows emitted so far.
    pub fn output_rows(&self) -> i64 {
        self.shared
            .as_ref()
            .map(|s| s.output_rows.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Memory held by the published build side.
    pub fn build_bytes(&self) -> i64 {
        self.shared
            .as_ref()
            .and_then(|s| s.artifact.get())
            .map(|a| a.tracked_bytes())
            .unwrap_or(0)
    }
}

impl HashJoinImpl for BasicHashJoin {
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
    ) -> Result<()> {
        if self.shared.is_some() {
            return Err(JoinError::state("hash join initialized twice"));
        }
        if num_threads == 0 {
            return Err(JoinError::validation("hash join needs at least one thread"));
        }
        if join_type != schema_mgr.join_type() {
            return Err(JoinError::validation(format!(
                "join type {} does not match schema join type {}",
                join_type,
                schema_mgr.join_type()
            )));
        }
        let options = ctx.options().clone();
        let layout = JoinLayout::new(
            schema_mgr,
            options.build_side,
            key_cmp,
            filter,
            &options.output_suffix_for_left,
            &options.output_suffix_for_right,
        )?;
        let encoder = KeyEncoder::new(layout.key_types.clone(), layout.key_cmp.clone())?;
        let coalescer = OutputCoalescer::new(
            Arc::clone(&layout.output_schema),
            options.output_batch_rows,
            num_threads,
        );
        let needs_scan = layout.needs_match_bitmap();

        let shared = Arc::new_cyclic(|weak: &Weak<JoinShared>| {
            let merge_weak = weak.clone();
            let merge_group = scheduler.register_task_group(
                Arc::new(move |_, _| run_task(&merge_weak, |shared| shared.merge())),
                Arc::new(|_| Ok(())),
            );
            let scan_group = needs_scan.then(|| {
                let scan_weak = weak.clone();
                let finish_weak = weak.clone();
                scheduler.register_task_group(
                    Arc::new(move |_, task_id| run_task(&scan_weak, |shared| shared.scan(task_id))),
                    Arc::new(move |_| run_task(&finish_weak, |shared| shared.finish())),
                )
            });
            JoinShared {
                ctx: Arc::clone(&ctx),
                pushdown: BloomFilterPushdown::from_options(&options),
                bloom_stats: BloomProbeStats::default(),
                scan_unit_rows: options.scan_unit_rows.max(1),
                scheduler: Arc::clone(&scheduler),
                merge_group,
                scan_group,
                state: AtomicU8::new(STATE_INITIALIZED),
                build: BuildState::new(num_threads),
                artifact: OnceLock::new(),
                coalescer,
                probe_done: (0..num_threads).map(|_| AtomicBool::new(false)).collect(),
                probe_done_count: AtomicUsize::new(0),
                output_rows: AtomicI64::new(0),
                output_batch_callback,
                finished_callback: Mutex::new(Some(finished_callback)),
                abort: AbortState::default(),
                layout,
                num_threads,
                encoder,
            }
        });
        debug!(
            "hash join initialized: join_type={} threads={} build_side={} filter={}",
            join_type,
            num_threads,
            shared.layout.build_side,
            shared.layout.filter.is_some()
        );
        self.shared = Some(shared);
        Ok(())
    }

    fn build_hash_table(
        &self,
        thread_index: usize,
        batches: AccumulationQueue,
        on_finished: BuildFinishedCallback,
    ) -> Result<()> {
        let shared = self.shared()?;
        let Some(_guard) = shared.enter() else {
            return Ok(());
        };
        shared
            .build_hash_table(thread_index, batches, on_finished)
            .map_err(|err| shared.fail(err))
    }

    fn probe_single_batch(&self, thread_index: usize, batch: Chunk) -> Result<()> {
        let shared = self.shared()?;
        let Some(_guard) = shared.enter() else {
            return Ok(());
        };
        shared
            .probe_single_batch(thread_index, batch)
            .map_err(|err| shared.fail(err))
    }

    fn probing_finished_with(
        &self,
        thread_index: usize,
        on_finished: ProbeFinishedCallback,
    ) -> Result<()> {
        let shared = self.shared()?;
        let Some(_guard) = shared.enter() else {
            return Ok(());
        };
        shared
            .probing_finished(thread_index, on_finished)
            .map_err(|err| shared.fail(err))
    }

    fn abort(&self, on_aborted: AbortContinuationImpl) {
        match &self.shared {
            Some(shared) => shared.request_abort(on_aborted),
            None => on_aborted(),
        }
    }
}
