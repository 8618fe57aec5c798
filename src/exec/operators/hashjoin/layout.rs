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
//! Physical column layout of one join execution.
//!
//! The build side keeps only its KEY and PAYLOAD columns, stored as one
//! batch in that order. Probe batches are used as they arrive, in the full
//! probe input schema. `JoinLayout` resolves every OUTPUT and FILTER column
//! of each side to a position in the batch that side's rows live in.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use super::projection::{HashJoinProjection, MISSING_FIELD, SchemaProjectionMaps};
use super::schema::HashJoinSchema;
use crate::common::error::{JoinError, Result};
use crate::exec::expr::Expr;
use crate::exec::node::join::{JoinKeyCmp, JoinSide, JoinType};

#[derive(Clone, Debug)]
pub(crate) struct JoinLayout {
    pub(crate) join_type: JoinType,
    pub(crate) build_side: JoinSide,
    pub(crate) output_schema: SchemaRef,
    pub(crate) filter_schema: SchemaRef,
    /// Residual filter over `filter_schema`.
    pub(crate) filter: Option<Expr>,
    pub(crate) key_types: Vec<DataType>,
    pub(crate) key_cmp: Vec<JoinKeyCmp>,

    pub(crate) build_input_schema: SchemaRef,
    /// Build input columns kept in the stored build batch, keys first.
    pub(crate) build_input_cols: Vec<usize>,
    pub(crate) build_schema: SchemaRef,
    pub(crate) probe_input_schema: SchemaRef,
    pub(crate) probe_key_cols: Vec<usize>,

    /// Per side, positions of OUTPUT columns in that side's batch.
    pub(crate) output_cols: [Vec<usize>; 2],
    pub(crate) output_types: [Vec<DataType>; 2],
    /// Per side, positions of FILTER columns in that side's batch.
    pub(crate) filter_cols: [Vec<usize>; 2],

    pub(crate) emit_pairs: bool,
    pub(crate) probe_preserved: bool,
    pub(crate) build_preserved: bool,
    pub(crate) probe_semi: bool,
    pub(crate) probe_anti: bool,
    pub(crate) build_semi: bool,
    pub(crate) build_anti: bool,
}

impl JoinLayout {
    pub(crate) fn new(
        schema_mgr: &HashJoinSchema,
        build_side: JoinSide,
        key_cmp: Vec<JoinKeyCmp>,
        filter: &Expr,
        left_suffix: &str,
        right_suffix: &str,
    ) -> Result<Self> {
        let join_type = schema_mgr.join_type();
        let probe_side = build_side.other();
        let build_maps = schema_mgr.side(build_side);
        let probe_maps = schema_mgr.side(probe_side);

        let key_types = build_maps.data_types(HashJoinProjection::Key);
        if key_cmp.len() != key_types.len() {
            return Err(JoinError::validation(format!(
                "key comparison count {} does not match key count {}",
                key_cmp.len(),
                key_types.len()
            )));
        }
        for data_type in &key_types {
            if !HashJoinSchema::is_type_supported(data_type) {
                return Err(JoinError::validation(format!(
                    "join key type {:?} is not supported",
                    data_type
                )));
            }
        }

        let mut build_input_cols = build_maps.input_indices(HashJoinProjection::Key).to_vec();
        build_input_cols.extend_from_slice(build_maps.input_indices(HashJoinProjection::Payload));
        let build_fields = build_input_cols
            .iter()
            .map(|i| build_maps.input_schema().field(*i).clone())
            .collect::<Vec<Field>>();
        let build_schema = Arc::new(Schema::new(build_fields));

        let mut output_cols: [Vec<usize>; 2] = Default::default();
        let mut output_types: [Vec<DataType>; 2] = Default::default();
        let mut filter_cols: [Vec<usize>; 2] = Default::default();
        for side in [JoinSide::Left, JoinSide::Right] {
            let maps = schema_mgr.side(side);
            let is_build = side == build_side;
            output_cols[side.index()] =
                stored_positions(maps, HashJoinProjection::Output, is_build)?;
            output_types[side.index()] = maps.data_types(HashJoinProjection::Output);
            filter_cols[side.index()] =
                stored_positions(maps, HashJoinProjection::Filter, is_build)?;
        }

        let filter = if filter.is_literal_true() {
            None
        } else {
            let filter_schema = schema_mgr.filter_schema();
            let bound = filter.bind(&filter_schema)?;
            if bound.data_type()? != DataType::Boolean {
                return Err(JoinError::binding("join filter must be boolean"));
            }
            Some(bound)
        };

        Ok(Self {
            join_type,
            build_side,
            output_schema: schema_mgr.make_output_schema(left_suffix, right_suffix),
            filter_schema: schema_mgr.filter_schema(),
            filter,
            key_types,
            key_cmp,
            build_input_schema: Arc::clone(build_maps.input_schema()),
            build_input_cols,
            build_schema,
            probe_input_schema: Arc::clone(probe_maps.input_schema()),
            probe_key_cols: probe_maps.input_indices(HashJoinProjection::Key).to_vec(),
            output_cols,
            output_types,
            filter_cols,
            emit_pairs: !join_type.is_semi_or_anti(),
            probe_preserved: join_type.preserves(probe_side),
            build_preserved: join_type.preserves(build_side),
            probe_semi: join_type.semi_side() == Some(probe_side),
            probe_anti: join_type.anti_side() == Some(probe_side),
            build_semi: join_type.semi_side() == Some(build_side),
            build_anti: join_type.anti_side() == Some(build_side),
        })
    }

    pub(crate) fn probe_side(&self) -> JoinSide {
        self.build_side.other()
    }

    /// Build rows must be tracked for a post-probe scan.
    pub(crate) fn needs_match_bitmap(&self) -> bool {
        self.build_preserved || self.build_semi || self.build_anti
    }

    /// Whether the scan emits build rows that found a match (semi) rather
    /// than those that did not (outer, anti).
    pub(crate) fn scan_emits_matched(&self) -> bool {
        self.build_semi
    }

    pub(crate) fn num_keys(&self) -> usize {
        self.key_types.len()
    }
}

fn stored_positions(
    maps: &SchemaProjectionMaps,
    role: HashJoinProjection,
    is_build: bool,
) -> Result<Vec<usize>> {
    if !is_build {
        return Ok(maps.input_indices(role).to_vec());
    }
    let num_keys = maps.num_cols(HashJoinProjection::Key);
    let to_key = maps.map(role, HashJoinProjection::Key);
    let to_payload = maps.map(role, HashJoinProjection::Payload);
    (0..maps.num_cols(role))
        .map(|i| match (to_key.get(i), to_payload.get(i)) {
            (MISSING_FIELD, MISSING_FIELD) => Err(JoinError::execution(format!(
                "{} column {} is neither a key nor a payload column",
                role, i
            ))),
            (MISSING_FIELD, payload) => Ok(num_keys + payload),
            (key, _) => Ok(key),
        })
        .collect()
}
