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
use arrow::datatypes::SchemaRef;

use crate::common::error::Result;
use crate::exec::chunk::Chunk;

/// Ordered buffer of batches handed wholesale to the join build phase.
#[derive(Clone, Debug, Default)]
pub struct AccumulationQueue {
    chunks: Vec<Chunk>,
    row_count: usize,
}

impl AccumulationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: Chunk) {
        self.row_count += chunk.len();
        self.chunks.push(chunk);
    }

    /// Move every batch of `other` to the end of this queue.
    pub fn concat(&mut self, mut other: AccumulationQueue) {
        self.row_count += other.row_count;
        self.chunks.append(&mut other.chunks);
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn get(&self, idx: usize) -> Option<&Chunk> {
        self.chunks.get(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Chunk> {
        self.chunks.iter()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.row_count = 0;
    }

    /// Concatenate every queued batch into one.
    pub fn to_chunk(&self, schema: &SchemaRef) -> Result<Chunk> {
        Chunk::concat(schema, &self.chunks)
    }
}

impl IntoIterator for AccumulationQueue {
    type Item = Chunk;
    type IntoIter = std::vec::IntoIter<Chunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.into_iter()
    }
}

impl<'a> IntoIterator for &'a AccumulationQueue {
    type Item = &'a Chunk;
    type IntoIter = std::slice::Iter<'a, Chunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.iter()
    }
}

impl FromIterator<Chunk> for AccumulationQueue {
    fn from_iter<T: IntoIterator<Item = Chunk>>(iter: T) -> Self {
        let mut queue = AccumulationQueue::new();
        for chunk in iter {
            queue.push(chunk);
        }
        queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use std::sync::Arc;

    fn chunk(values: Vec<i32>) -> Chunk {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, true)]));
        Chunk::new(RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))]).unwrap())
    }

    #[test]
    fn tracks_rows_across_push_and_concat() {
        let mut q = AccumulationQueue::new();
        q.push(chunk(vec![1, 2]));
        let other: AccumulationQueue = vec![chunk(vec![3]), chunk(vec![])].into_iter().collect();
        q.concat(other);
        assert_eq!(q.len(), 3);
        assert_eq!(q.row_count(), 3);
        let schema = q.get(0).unwrap().schema();
        assert_eq!(q.to_chunk(&schema).unwrap().len(), 3);
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.row_count(), 0);
    }
}
