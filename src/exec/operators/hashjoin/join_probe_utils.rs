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
//! Row materialization helpers shared by the probe and the build-side scan.
//!
//! Joined rows are assembled by `take` over each side's batch with a
//! `UInt32Array` of row indices. A side that contributes no row to a result
//! (the padded side of an outer or anti result) is rendered as null columns.

use arrow::array::{
    Array, ArrayRef, RecordBatch, RecordBatchOptions, UInt32Array, new_null_array,
};
use arrow::compute::take;
use arrow::datatypes::{DataType, SchemaRef};

use crate::common::error::{JoinError, Result};
use crate::exec::node::join::JoinSide;

/// One side's contribution to a joined batch.
pub(crate) enum SideRows<'a> {
    Take {
        batch: &'a RecordBatch,
        columns: &'a [usize],
        indices: &'a UInt32Array,
    },
    Null {
        types: &'a [DataType],
    },
}

impl SideRows<'_> {
    fn arrays(&self, num_rows: usize) -> Result<Vec<ArrayRef>> {
        match self {
            SideRows::Take {
                batch,
                columns,
                indices,
            } => {
                if indices.len() != num_rows {
                    return Err(JoinError::execution(format!(
                        "join index length mismatch: expected {} got {}",
                        num_rows,
                        indices.len()
                    )));
                }
                let mut out = Vec::with_capacity(columns.len());
                for idx in columns.iter() {
                    let column = batch.columns().get(*idx).ok_or_else(|| {
                        JoinError::execution(format!(
                            "join column {} out of bounds (num_columns={})",
                            idx,
                            batch.num_columns()
                        ))
                    })?;
                    out.push(take(column.as_ref(), *indices, None)?);
                }
                Ok(out)
            }
            SideRows::Null { types } => Ok(types
                .iter()
                .map(|data_type| new_null_array(data_type, num_rows))
                .collect()),
        }
    }
}

/// Build a batch of `num_rows` rows: left columns first, then right columns.
pub(crate) fn build_join_batch(
    schema: &SchemaRef,
    left: SideRows<'_>,
    right: SideRows<'_>,
    num_rows: usize,
) -> Result<RecordBatch> {
    let mut columns = left.arrays(num_rows)?;
    columns.extend(right.arrays(num_rows)?);
    let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
    Ok(RecordBatch::try_new_with_options(
        SchemaRef::clone(schema),
        columns,
        &options,
    )?)
}

/// Order a build/probe pair as (left, right).
pub(crate) fn arrange<T>(build_side: JoinSide, build: T, probe: T) -> (T, T) {
    match build_side {
        JoinSide::Left => (build, probe),
        JoinSide::Right => (probe, build),
    }
}

pub(crate) fn indices_array(indices: Vec<u32>) -> UInt32Array {
    UInt32Array::from(indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{Int32Array, StringArray};
    use arrow::datatypes::{Field, Schema};

    #[test]
    fn takes_rows_and_pads_nulls() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("a", DataType::Int32, true),
                Field::new("b", DataType::Utf8, true),
            ])),
            vec![
                Arc::new(Int32Array::from(vec![10, 20, 30])),
                Arc::new(StringArray::from(vec!["x", "y", "z"])),
            ],
        )
        .unwrap();
        let out_schema = Arc::new(Schema::new(vec![
            Field::new("b", DataType::Utf8, true),
            Field::new("v", DataType::Int64, true),
        ]));
        let indices = indices_array(vec![2, 0]);
        let types = [DataType::Int64];
        let out = build_join_batch(
            &out_schema,
            SideRows::Take {
                batch: &batch,
                columns: &[1],
                indices: &indices,
            },
            SideRows::Null { types: &types },
            2,
        )
        .unwrap();
        assert_eq!(out.num_rows(), 2);
        let b = out.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(b.value(0), "z");
        assert_eq!(b.value(1), "x");
        assert_eq!(out.column(1).null_count(), 2);
    }

    #[test]
    fn rejects_bad_column_and_length() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)])),
            vec![Arc::new(Int32Array::from(vec![1]))],
        )
        .unwrap();
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
        let indices = indices_array(vec![0]);
        let bad_column = build_join_batch(
            &schema,
            SideRows::Take {
                batch: &batch,
                columns: &[3],
                indices: &indices,
            },
            SideRows::Null { types: &[] },
            1,
        );
        assert!(matches!(bad_column, Err(JoinError::Execution(_))));
        let bad_len = build_join_batch(
            &schema,
            SideRows::Take {
                batch: &batch,
                columns: &[0],
                indices: &indices,
            },
            SideRows::Null { types: &[] },
            2,
        );
        assert!(bad_len.is_err());
    }

    #[test]
    fn arrange_orders_by_build_side() {
        assert_eq!(arrange(JoinSide::Left, "b", "p"), ("b", "p"));
        assert_eq!(arrange(JoinSide::Right, "b", "p"), ("p", "b"));
    }
}
