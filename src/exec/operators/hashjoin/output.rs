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
//! Per-thread output coalescing.

use std::sync::Mutex;

use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::common::error::Result;
use crate::exec::chunk::Chunk;

#[derive(Debug, Default)]
struct Pending {
    batches: Vec<RecordBatch>,
    rows: usize,
}

/// Buffers a thread's output until at least `target_rows` rows are pending,
/// then hands back chunks of exactly `target_rows` rows. Row order is the
/// order of `push` calls.
pub(crate) struct OutputCoalescer {
    schema: SchemaRef,
    target_rows: usize,
    slots: Vec<Mutex<Pending>>,
}

impl OutputCoalescer {
    pub(crate) fn new(schema: SchemaRef, target_rows: usize, num_threads: usize) -> Self {
        Self {
            schema,
            target_rows: target_rows.max(1),
            slots: (0..num_threads).map(|_| Mutex::new(Pending::default())).collect(),
        }
    }

    pub(crate) fn push(&self, thread_index: usize, batch: RecordBatch) -> Result<Vec<Chunk>> {
        if batch.num_rows() == 0 {
            return Ok(Vec::new());
        }
        let mut pending = self.slot(thread_index);
        pending.rows += batch.num_rows();
        pending.batches.push(batch);
        if pending.rows < self.target_rows {
            return Ok(Vec::new());
        }
        let merged = concat_batches(&self.schema, &pending.batches)?;
        pending.batches.clear();
        pending.rows = 0;

        let mut out = Vec::with_capacity(merged.num_rows() / self.target_rows);
        let mut offset = 0;
        while merged.num_rows() - offset >= self.target_rows {
            out.push(Chunk::new(merged.slice(offset, self.target_rows)));
            offset += self.target_rows;
        }
        let rest = merged.num_rows() - offset;
        if rest > 0 {
            pending.rows = rest;
            pending.batches.push(merged.slice(offset, rest));
        }
        Ok(out)
    }

    /// Drain whatever the thread still holds, as one chunk.
    pub(crate) fn flush(&self, thread_index: usize) -> Result<Option<Chunk>> {
        let mut pending = self.slot(thread_index);
        if pending.rows == 0 {
            return Ok(None);
        }
        let merged = concat_batches(&self.schema, &pending.batches)?;
        pending.batches.clear();
        pending.rows = 0;
        Ok(Some(Chunk::new(merged)))
    }

    pub(crate) fn clear(&self) {
        for slot in &self.slots {
            let mut pending = slot.lock().unwrap_or_else(|e| e.into_inner());
            pending.batches.clear();
            pending.rows = 0;
        }
    }

    fn slot(&self, thread_index: usize) -> std::sync::MutexGuard<'_, Pending> {
        self.slots[thread_index % self.slots.len()]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};

    fn batch(schema: &SchemaRef, values: Vec<i32>) -> RecordBatch {
        RecordBatch::try_new(Arc::clone(schema), vec![Arc::new(Int32Array::from(values))]).unwrap()
    }

    fn values(chunk: &Chunk) -> Vec<i32> {
        let col = chunk.columns()[0].as_any().downcast_ref::<Int32Array>().unwrap();
        col.values().to_vec()
    }

    #[test]
    fn emits_full_chunks_and_keeps_order() {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
        let coalescer = OutputCoalescer::new(Arc::clone(&schema), 3, 2);

        assert!(coalescer.push(0, batch(&schema, vec![1, 2])).unwrap().is_empty());
        let out = coalescer.push(0, batch(&schema, vec![3, 4, 5, 6, 7])).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(values(&out[0]), vec![1, 2, 3]);
        assert_eq!(values(&out[1]), vec![4, 5, 6]);

        // Other threads keep separate buffers.
        assert!(coalescer.push(1, batch(&schema, vec![100])).unwrap().is_empty());

        let rest = coalescer.flush(0).unwrap().unwrap();
        assert_eq!(values(&rest), vec![7]);
        assert!(coalescer.flush(0).unwrap().is_none());
        assert_eq!(values(&coalescer.flush(1).unwrap().unwrap()), vec![100]);
    }

    #[test]
    fn empty_batches_are_ignored() {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
        let coalescer = OutputCoalescer::new(Arc::clone(&schema), 2, 1);
        assert!(coalescer.push(0, batch(&schema, vec![])).unwrap().is_empty());
        assert!(coalescer.flush(0).unwrap().is_none());
        coalescer.push(0, batch(&schema, vec![1])).unwrap();
        coalescer.clear();
        assert!(coalescer.flush(0).unwrap().is_none());
    }
}
