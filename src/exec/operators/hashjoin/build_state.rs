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
//! Build-side staging and the merge into a probe-ready artifact.
//!
//! Each build thread projects its queued batches to the stored build layout
//! and encodes their keys without touching shared state, then deposits the
//! result under one short lock. The thread that deposits the last partition
//! is told so and starts the merge.

use std::sync::{Arc, Mutex};

use arrow::array::ArrayRef;
use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;

use super::build_artifact::BuildArtifact;
use super::hash_join_impl::BuildFinishedCallback;
use super::join_hash_table::JoinHashTable;
use super::layout::JoinLayout;
use super::unmatched::MatchBitmap;
use crate::common::error::{JoinError, Result};
use crate::exec::hash_table::key_encoder::{EncodedKeys, KeyEncoder};
use crate::exec::pipeline::accumulation_queue::AccumulationQueue;
use crate::exec::runtime_filter::pushdown::BloomFilterPushdown;
use crate::novajoin_logging::debug;
use crate::runtime::mem_tracker::{MemTracker, TrackedBytes};

pub(crate) struct StagedPartition {
    batch: RecordBatch,
    keys: EncodedKeys,
    _tracked: TrackedBytes,
}

impl StagedPartition {
    pub(crate) fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }
}

/// Project, concatenate and key-encode one thread's build input.
pub(crate) fn stage_partition(
    layout: &JoinLayout,
    encoder: &KeyEncoder,
    queue: AccumulationQueue,
    tracker: &Arc<MemTracker>,
) -> Result<StagedPartition> {
    let mut projected = Vec::with_capacity(queue.len());
    for chunk in queue {
        if chunk.num_columns() != layout.build_input_schema.fields().len() {
            return Err(JoinError::execution(format!(
                "build batch has {} columns, expected {}",
                chunk.num_columns(),
                layout.build_input_schema.fields().len()
            )));
        }
        projected.push(chunk.batch.project(&layout.build_input_cols)?);
    }
    let batch = concat_batches(&layout.build_schema, &projected)?;
    let key_arrays: Vec<ArrayRef> = batch.columns()[..layout.num_keys()].to_vec();
    let keys = encoder.encode(&key_arrays)?;
    let tracked = TrackedBytes::try_new(
        batch.get_array_memory_size() + keys.rows.size() + keys.hashes.len() * 9,
        tracker,
    )?;
    Ok(StagedPartition {
        batch,
        keys,
        _tracked: tracked,
    })
}

struct Collector {
    partitions: Vec<Option<StagedPartition>>,
    deposited: Vec<bool>,
    callbacks: Vec<(usize, BuildFinishedCallback)>,
    arrived: usize,
}

/// Collects one partition per build thread.
pub(crate) struct BuildState {
    num_threads: usize,
    inner: Mutex<Collector>,
}

impl BuildState {
    pub(crate) fn new(num_threads: usize) -> Self {
        Self {
            num_threads,
            inner: Mutex::new(Collector {
                partitions: (0..num_threads).map(|_| None).collect(),
                deposited: vec![false; num_threads],
                callbacks: Vec::with_capacity(num_threads),
                arrived: 0,
            }),
        }
    }

    /// Returns true when this was the last outstanding partition.
    pub(crate) fn deposit(
        &self,
        thread_index: usize,
        partition: StagedPartition,
        on_finished: BuildFinishedCallback,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.check_slot(&inner, thread_index)?;
        inner.deposited[thread_index] = true;
        inner.partitions[thread_index] = Some(partition);
        inner.callbacks.push((thread_index, on_finished));
        inner.arrived += 1;
        Ok(inner.arrived == self.num_threads)
    }

    /// Reject a second build call for `thread_index` before doing any work.
    pub(crate) fn check_thread(&self, thread_index: usize) -> Result<()> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.check_slot(&inner, thread_index)
    }

    fn check_slot(&self, inner: &Collector, thread_index: usize) -> Result<()> {
        if thread_index >= self.num_threads {
            return Err(JoinError::state(format!(
                "build thread index {} out of range (num_threads={})",
                thread_index, self.num_threads
            )));
        }
        if inner.deposited[thread_index] {
            return Err(JoinError::state(format!(
                "build_hash_table called twice for thread {}",
                thread_index
            )));
        }
        Ok(())
    }

    pub(crate) fn take_partitions(&self) -> Vec<StagedPartition> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.partitions.iter_mut().filter_map(Option::take).collect()
    }

    pub(crate) fn take_callbacks(&self) -> Vec<(usize, BuildFinishedCallback)> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut inner.callbacks)
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.partitions.iter_mut().for_each(|p| *p = None);
        inner.callbacks.clear();
    }
}

/// Concatenate every staged partition, index it, and attach the bloom
/// filter and match bitmap the join needs.
pub(crate) fn merge_partitions(
    layout: &JoinLayout,
    partitions: Vec<StagedPartition>,
    pushdown: &BloomFilterPushdown,
    tracker: &Arc<MemTracker>,
) -> Result<BuildArtifact> {
    let batches = partitions.iter().map(|p| p.batch.clone()).collect::<Vec<_>>();
    let batch = concat_batches(&layout.build_schema, &batches)?;
    drop(batches);
    if u32::try_from(batch.num_rows()).is_err() {
        return Err(JoinError::resource(format!(
            "build side has {} rows, more than a row locator can address",
            batch.num_rows()
        )));
    }

    let mut table = JoinHashTable::new();
    table.reserve(batch.num_rows())?;
    let mut base_row = 0usize;
    for partition in &partitions {
        table.add_rows(&partition.keys, base_row)?;
        base_row += partition.num_rows();
    }
    table.finalize_groups()?;

    let bloom = if pushdown.should_build(table.indexed_rows()) {
        let hashes = partitions.iter().flat_map(|p| {
            p.keys
                .hashes
                .iter()
                .zip(p.keys.matchable.iter())
                .filter(|(_, matchable)| **matchable)
                .map(|(hash, _)| hash)
        });
        Some(pushdown.build(table.indexed_rows(), hashes))
    } else {
        None
    };
    let matched = if layout.needs_match_bitmap() {
        Some(MatchBitmap::try_new(batch.num_rows())?)
    } else {
        None
    };

    let bytes = batch.get_array_memory_size()
        + table.allocated_bytes()
        + bloom.as_ref().map(|b| b.size_bytes()).unwrap_or(0)
        + matched.as_ref().map(|m| m.allocated_bytes()).unwrap_or(0);
    drop(partitions);
    let tracked = TrackedBytes::try_new(bytes, tracker)?;

    debug!(
        "hash join build merged: rows={} indexed_rows={} groups={} bloom={} bytes={}",
        batch.num_rows(),
        table.indexed_rows(),
        table.num_groups(),
        bloom.is_some(),
        bytes
    );
    Ok(BuildArtifact::new(batch, table, bloom, matched, tracked))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int32Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};

    use crate::exec::chunk::Chunk;
    use crate::exec::expr::{Expr, FieldRef};
    use crate::exec::node::join::{JoinKeyCmp, JoinSide, JoinType};
    use crate::exec::operators::hashjoin::schema::HashJoinSchema;

    fn layout(join_type: JoinType) -> JoinLayout {
        let left = Arc::new(Schema::new(vec![
            Field::new("name", DataType::Utf8, true),
            Field::new("id", DataType::Int32, true),
        ]));
        let right = Arc::new(Schema::new(vec![Field::new("rid", DataType::Int32, true)]));
        let mgr = HashJoinSchema::init(
            join_type,
            &left,
            &[FieldRef::name("id")],
            &right,
            &[FieldRef::name("rid")],
            &Expr::literal_true(),
            "",
            "",
        )
        .unwrap();
        JoinLayout::new(&mgr, JoinSide::Left, vec![JoinKeyCmp::Eq], &Expr::literal_true(), "", "")
            .unwrap()
    }

    fn queue(layout: &JoinLayout, ids: Vec<Option<i32>>) -> AccumulationQueue {
        let names = ids.iter().map(|id| id.map(|v| format!("n{}", v))).collect::<Vec<_>>();
        let batch = RecordBatch::try_new(
            Arc::clone(&layout.build_input_schema),
            vec![
                Arc::new(StringArray::from(names)),
                Arc::new(Int32Array::from(ids)),
            ],
        )
        .unwrap();
        std::iter::once(Chunk::new(batch)).collect()
    }

    #[test]
    fn stages_keys_first_and_merges_in_thread_order() {
        let layout = layout(JoinType::LeftOuter);
        let encoder = KeyEncoder::new(layout.key_types.clone(), layout.key_cmp.clone()).unwrap();
        let tracker = MemTracker::new_root("test");
        let state = BuildState::new(2);

        let p1 = stage_partition(&layout, &encoder, queue(&layout, vec![Some(3), None]), &tracker)
            .unwrap();
        let p0 = stage_partition(&layout, &encoder, queue(&layout, vec![Some(1), Some(3)]), &tracker)
            .unwrap();
        assert_eq!(p0.batch.schema().field(0).name(), "id");
        assert!(tracker.current() > 0);

        assert!(!state.deposit(1, p1, Box::new(|_| Ok(()))).unwrap());
        assert!(state.deposit(0, p0, Box::new(|_| Ok(()))).unwrap());

        let artifact = merge_partitions(
            &layout,
            state.take_partitions(),
            &BloomFilterPushdown::new(true, 1),
            &tracker,
        )
        .unwrap();
        assert_eq!(artifact.num_rows(), 4);
        assert_eq!(artifact.table.indexed_rows(), 3);
        assert!(artifact.bloom.is_some());
        assert_eq!(artifact.matched.as_ref().map(|m| m.len()), Some(4));
        let ids = artifact.batch.column(0).as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(ids.value(0), 1);
        assert_eq!(ids.value(2), 3);
        assert_eq!(state.take_callbacks().len(), 2);
    }

    #[test]
    fn second_deposit_for_a_thread_is_a_state_error() {
        let layout = layout(JoinType::Inner);
        let encoder = KeyEncoder::new(layout.key_types.clone(), layout.key_cmp.clone()).unwrap();
        let tracker = MemTracker::new_root("test");
        let state = BuildState::new(2);
        let p = stage_partition(&layout, &encoder, AccumulationQueue::new(), &tracker).unwrap();
        assert_eq!(p.num_rows(), 0);
        state.deposit(0, p, Box::new(|_| Ok(()))).unwrap();
        assert!(matches!(state.check_thread(0), Err(JoinError::State(_))));
        assert!(matches!(state.check_thread(5), Err(JoinError::State(_))));
        assert!(state.check_thread(1).is_ok());
    }

    #[test]
    fn staging_honors_memory_limit() {
        let layout = layout(JoinType::Inner);
        let encoder = KeyEncoder::new(layout.key_types.clone(), layout.key_cmp.clone()).unwrap();
        let root = MemTracker::new_root("root");
        let tracker = MemTracker::new_child_with_limit("join", 16, &root);
        let res = stage_partition(&layout, &encoder, queue(&layout, vec![Some(1); 64]), &tracker);
        assert!(matches!(res, Err(JoinError::Resource(_))));
    }
}
