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
use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch};
use arrow::compute::concat_batches;
use arrow::datatypes::{Schema, SchemaRef};

use crate::common::error::{JoinError, Result};

/// An immutable, columnar slice of rows: the unit flowing into and out of the
/// join. Cloning is cheap (columns are reference counted).
#[derive(Debug, Clone)]
pub struct Chunk {
    pub batch: RecordBatch,
}

impl Chunk {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            batch: RecordBatch::new_empty(schema),
        }
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn columns(&self) -> &[ArrayRef] {
        self.batch.columns()
    }

    pub fn column(&self, idx: usize) -> Result<&ArrayRef> {
        self.batch.columns().get(idx).ok_or_else(|| {
            JoinError::execution(format!(
                "chunk column {} out of bounds (num_columns={})",
                idx,
                self.batch.num_columns()
            ))
        })
    }

    pub fn slice(&self, offset: usize, length: usize) -> Self {
        Self {
            batch: self.batch.slice(offset, length),
        }
    }

    /// Concatenate chunks sharing `schema` into one.
    pub fn concat(schema: &SchemaRef, chunks: &[Chunk]) -> Result<Chunk> {
        match chunks {
            [] => Ok(Chunk::empty(Arc::clone(schema))),
            [only] => Ok(only.clone()),
            _ => {
                let batches = chunks.iter().map(|c| &c.batch);
                Ok(Chunk::new(concat_batches(schema, batches)?))
            }
        }
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self::empty(Arc::new(Schema::empty()))
    }
}

impl From<RecordBatch> for Chunk {
    fn from(batch: RecordBatch) -> Self {
        Self::new(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field};

    fn int_chunk(values: &[i32]) -> Chunk {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int32Array::from(values.to_vec())) as ArrayRef],
        )
        .expect("record batch");
        Chunk::new(batch)
    }

    #[test]
    fn default_chunk_is_empty() {
        let chunk = Chunk::default();
        assert_eq!(chunk.len(), 0);
        assert!(chunk.is_empty());
        assert_eq!(chunk.num_columns(), 0);
    }

    #[test]
    fn concat_preserves_order() {
        let a = int_chunk(&[1, 2]);
        let b = int_chunk(&[3]);
        let schema = a.schema();
        let merged = Chunk::concat(&schema, &[a, b]).expect("concat");
        let values = merged
            .column(0)
            .expect("column")
            .as_any()
            .downcast_ref::<Int32Array>()
            .expect("int32")
            .values()
            .to_vec();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn out_of_bounds_column_is_an_error() {
        let chunk = int_chunk(&[1]);
        assert!(chunk.column(1).is_err());
    }
}
