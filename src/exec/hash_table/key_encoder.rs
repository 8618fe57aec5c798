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
//! Join key encoding.
//!
//! Composite keys are serialized with the arrow row format so that equal key
//! tuples produce byte-identical encodings. The row format encodes null as a
//! distinct value, which gives null-safe (`IS`) equality for free; `EQ`
//! columns are handled by masking out every row with a null in one of them.

use arrow::array::{Array, ArrayRef};
use arrow::datatypes::DataType;
use arrow::row::{RowConverter, Rows, SortField};

use crate::common::error::{JoinError, Result};
use crate::exec::hash_table::hash::hash_join_key;
use crate::exec::node::join::JoinKeyCmp;

pub(crate) struct KeyEncoder {
    key_types: Vec<DataType>,
    key_cmp: Vec<JoinKeyCmp>,
    converter: RowConverter,
}

/// Encoded keys of one batch.
pub(crate) struct EncodedKeys {
    pub(crate) rows: Rows,
    pub(crate) hashes: Vec<u64>,
    /// False where an `EQ` key column is null; such rows never match.
    pub(crate) matchable: Vec<bool>,
}

impl EncodedKeys {
    pub(crate) fn len(&self) -> usize {
        self.hashes.len()
    }

    pub(crate) fn key(&self, row: usize) -> &[u8] {
        self.rows.row(row).data()
    }
}

impl KeyEncoder {
    pub(crate) fn new(key_types: Vec<DataType>, key_cmp: Vec<JoinKeyCmp>) -> Result<Self> {
        if key_types.is_empty() {
            return Err(JoinError::validation("join hash table requires join keys"));
        }
        if key_types.len() != key_cmp.len() {
            return Err(JoinError::validation(format!(
                "join key comparison count mismatch: key_types={} key_cmp={}",
                key_types.len(),
                key_cmp.len()
            )));
        }
        let fields = key_types
            .iter()
            .map(|t| SortField::new(t.clone()))
            .collect::<Vec<_>>();
        let converter = RowConverter::new(fields)?;
        Ok(Self {
            key_types,
            key_cmp,
            converter,
        })
    }

    pub(crate) fn encode(&self, key_arrays: &[ArrayRef]) -> Result<EncodedKeys> {
        if key_arrays.len() != self.key_types.len() {
            return Err(JoinError::execution(format!(
                "join key length mismatch: expected {} got {}",
                self.key_types.len(),
                key_arrays.len()
            )));
        }
        for (array, expected) in key_arrays.iter().zip(&self.key_types) {
            if array.data_type() != expected {
                return Err(JoinError::execution(format!(
                    "join key type mismatch: expected {:?} got {:?}",
                    expected,
                    array.data_type()
                )));
            }
        }
        let num_rows = key_arrays.first().map(|a| a.len()).unwrap_or(0);
        let rows = self.converter.convert_columns(key_arrays)?;
        let mut hashes = Vec::with_capacity(num_rows);
        for row in 0..num_rows {
            hashes.push(hash_join_key(rows.row(row).data()));
        }
        let mut matchable = vec![true; num_rows];
        for (array, cmp) in key_arrays.iter().zip(&self.key_cmp) {
            if cmp.null_safe() || array.logical_null_count() == 0 {
                continue;
            }
            for (row, flag) in matchable.iter_mut().enumerate() {
                if array.is_null(row) {
                    *flag = false;
                }
            }
        }
        Ok(EncodedKeys {
            rows,
            hashes,
            matchable,
        })
    }
}
