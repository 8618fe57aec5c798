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
//! Join schema resolution.
//!
//! `HashJoinSchema` turns user-facing join keys, output selections and the
//! residual filter into per-side projection maps:
//!
//! - KEY: the join key columns, in key order.
//! - PAYLOAD: `(OUTPUT ∪ FILTER) − KEY`, the non-key columns the build side
//!   must retain.
//! - FILTER: the columns the residual filter reads. Filter batches place the
//!   left filter columns first and the right ones after them.
//! - OUTPUT: the columns materialized downstream.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use super::projection::{HashJoinProjection, MISSING_FIELD, SchemaProjectionMap, SchemaProjectionMaps};
use crate::common::error::{JoinError, Result};
use crate::exec::expr::{Expr, FieldRef};
use crate::exec::node::join::{JoinSide, JoinType};

#[derive(Clone, Debug)]
pub struct HashJoinSchema {
    /// Indexed by `JoinSide::index()`.
    pub proj_maps: [SchemaProjectionMaps; 2],
    join_type: JoinType,
    left_field_name_prefix: String,
    right_field_name_prefix: String,
    /// Residual filter over the filter schema, or literal `true`.
    filter: Expr,
}

impl HashJoinSchema {
    /// Resolve with the default output: every column of each side the join
    /// type emits.
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        join_type: JoinType,
        left_schema: &SchemaRef,
        left_keys: &[FieldRef],
        right_schema: &SchemaRef,
        right_keys: &[FieldRef],
        filter: &Expr,
        left_field_name_prefix: &str,
        right_field_name_prefix: &str,
    ) -> Result<Self> {
        let left_output = default_output(join_type, JoinSide::Left, left_schema);
        let right_output = default_output(join_type, JoinSide::Right, right_schema);
        Self::init_with_output(
            join_type,
            left_schema,
            left_keys,
            &left_output,
            right_schema,
            right_keys,
            &right_output,
            filter,
            left_field_name_prefix,
            right_field_name_prefix,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn init_with_output(
        join_type: JoinType,
        left_schema: &SchemaRef,
        left_keys: &[FieldRef],
        left_output: &[FieldRef],
        right_schema: &SchemaRef,
        right_keys: &[FieldRef],
        right_output: &[FieldRef],
        filter: &Expr,
        left_field_name_prefix: &str,
        right_field_name_prefix: &str,
    ) -> Result<Self> {
        Self::validate_schemas(
            join_type,
            left_schema,
            left_keys,
            left_output,
            right_schema,
            right_keys,
            right_output,
            left_field_name_prefix,
            right_field_name_prefix,
        )?;

        let bound_filter = Self::bind_filter(filter, left_schema, right_schema)?;
        let (left_filter, right_filter) =
            Self::collect_filter_columns(&bound_filter, left_schema, right_schema)?;

        let left_payload =
            Self::compute_payload(left_schema, left_output, &left_filter, left_keys)?;
        let right_payload =
            Self::compute_payload(right_schema, right_output, &right_filter, right_keys)?;

        let left_maps = SchemaProjectionMaps::new(
            Arc::clone(left_schema),
            &[
                (HashJoinProjection::Key, resolve_all(left_schema, left_keys)?),
                (HashJoinProjection::Payload, resolve_all(left_schema, &left_payload)?),
                (HashJoinProjection::Filter, resolve_all(left_schema, &left_filter)?),
                (HashJoinProjection::Output, resolve_all(left_schema, left_output)?),
            ],
        )?;
        let right_maps = SchemaProjectionMaps::new(
            Arc::clone(right_schema),
            &[
                (HashJoinProjection::Key, resolve_all(right_schema, right_keys)?),
                (HashJoinProjection::Payload, resolve_all(right_schema, &right_payload)?),
                (HashJoinProjection::Filter, resolve_all(right_schema, &right_filter)?),
                (HashJoinProjection::Output, resolve_all(right_schema, right_output)?),
            ],
        )?;

        let filter = if bound_filter.is_literal_true() {
            bound_filter
        } else {
            let right_filter_offset = left_maps.num_cols(HashJoinProjection::Filter);
            Self::rewrite_filter_to_use_filter_schema(
                right_filter_offset,
                &left_maps.map(HashJoinProjection::Input, HashJoinProjection::Filter),
                &right_maps.map(HashJoinProjection::Input, HashJoinProjection::Filter),
                &bound_filter,
            )?
        };

        Ok(Self {
            proj_maps: [left_maps, right_maps],
            join_type,
            left_field_name_prefix: left_field_name_prefix.to_string(),
            right_field_name_prefix: right_field_name_prefix.to_string(),
            filter,
        })
    }

    /// Check keys and output selections against both schemas. Pure.
    #[allow(clippy::too_many_arguments)]
    pub fn validate_schemas(
        join_type: JoinType,
        left_schema: &Schema,
        left_keys: &[FieldRef],
        left_output: &[FieldRef],
        right_schema: &Schema,
        right_keys: &[FieldRef],
        right_output: &[FieldRef],
        left_field_name_prefix: &str,
        right_field_name_prefix: &str,
    ) -> Result<()> {
        if left_keys.len() != right_keys.len() {
            return Err(JoinError::validation(format!(
                "left and right key counts differ: {} vs {}",
                left_keys.len(),
                right_keys.len()
            )));
        }
        if left_keys.is_empty() {
            return Err(JoinError::validation("hash join requires at least one key"));
        }
        for (left_key, right_key) in left_keys.iter().zip(right_keys) {
            let left_idx = resolve(left_schema, left_key, "left key")?;
            let right_idx = resolve(right_schema, right_key, "right key")?;
            let left_type = left_schema.field(left_idx).data_type();
            let right_type = right_schema.field(right_idx).data_type();
            if !Self::is_type_supported(left_type) {
                return Err(JoinError::validation(format!(
                    "data type {:?} of left key {} is not supported",
                    left_type, left_key
                )));
            }
            if !Self::is_type_supported(right_type) {
                return Err(JoinError::validation(format!(
                    "data type {:?} of right key {} is not supported",
                    right_type, right_key
                )));
            }
            if left_type != right_type {
                return Err(JoinError::validation(format!(
                    "key types differ: left {} is {:?}, right {} is {:?}",
                    left_key, left_type, right_key, right_type
                )));
            }
        }

        let mut left_names = Vec::with_capacity(left_output.len());
        for field in left_output {
            let idx = resolve(left_schema, field, "left output")?;
            left_names.push(format!(
                "{}{}",
                left_field_name_prefix,
                left_schema.field(idx).name()
            ));
        }
        let mut right_names = Vec::with_capacity(right_output.len());
        for field in right_output {
            let idx = resolve(right_schema, field, "right output")?;
            right_names.push(format!(
                "{}{}",
                right_field_name_prefix,
                right_schema.field(idx).name()
            ));
        }
        if left_output.is_empty() && right_output.is_empty() {
            return Err(JoinError::validation("join output has no columns"));
        }
        for side in [JoinSide::Left, JoinSide::Right] {
            let output = match side {
                JoinSide::Left => left_output,
                JoinSide::Right => right_output,
            };
            if !join_type.outputs(side) && !output.is_empty() {
                return Err(JoinError::validation(format!(
                    "{} join cannot output {} columns",
                    join_type, side
                )));
            }
        }
        if !left_field_name_prefix.is_empty() || !right_field_name_prefix.is_empty() {
            let right_set = right_names.iter().collect::<HashSet<_>>();
            if let Some(dup) = left_names.iter().find(|n| right_set.contains(n)) {
                return Err(JoinError::validation(format!(
                    "output field {} is ambiguous under prefixes '{}' and '{}'",
                    dup, left_field_name_prefix, right_field_name_prefix
                )));
            }
        }
        Ok(())
    }

    /// Bind `filter` against the left schema followed by the right schema.
    pub fn bind_filter(filter: &Expr, left_schema: &Schema, right_schema: &Schema) -> Result<Expr> {
        if filter.is_literal_true() {
            return Ok(filter.clone());
        }
        let combined = Schema::new(
            left_schema
                .fields()
                .iter()
                .chain(right_schema.fields().iter())
                .cloned()
                .collect::<Vec<_>>(),
        );
        let bound = filter.bind(&combined)?;
        match bound.data_type()? {
            DataType::Boolean => Ok(bound),
            other => Err(JoinError::binding(format!(
                "join filter must be boolean, got {:?}",
                other
            ))),
        }
    }

    /// Columns the bound `filter` reads, split by side in ascending order.
    pub fn collect_filter_columns(
        filter: &Expr,
        left_schema: &Schema,
        right_schema: &Schema,
    ) -> Result<(Vec<FieldRef>, Vec<FieldRef>)> {
        if !filter.is_bound() {
            return Err(JoinError::binding("join filter must be bound before use"));
        }
        let left_len = left_schema.fields().len();
        let total = left_len + right_schema.fields().len();
        let mut columns = BTreeSet::new();
        filter.bound_columns(&mut columns);
        let mut left = Vec::new();
        let mut right = Vec::new();
        for idx in columns {
            if idx >= total {
                return Err(JoinError::binding(format!(
                    "filter column {} out of range for {} joined columns",
                    idx, total
                )));
            }
            if idx < left_len {
                left.push(FieldRef::Index(idx));
            } else {
                right.push(FieldRef::Index(idx - left_len));
            }
        }
        Ok((left, right))
    }

    /// `(output ∪ filter) − key`, output columns first, without repeats.
    pub fn compute_payload(
        schema: &Schema,
        output: &[FieldRef],
        filter: &[FieldRef],
        key: &[FieldRef],
    ) -> Result<Vec<FieldRef>> {
        let mut excluded = HashSet::new();
        for field in key {
            excluded.insert(resolve(schema, field, "key")?);
        }
        let mut payload = Vec::new();
        for field in output.iter().chain(filter) {
            let idx = resolve(schema, field, "payload")?;
            if excluded.insert(idx) {
                payload.push(FieldRef::Index(idx));
            }
        }
        Ok(payload)
    }

    /// Move filter column references from the combined input layout to the
    /// filter-schema layout.
    pub fn rewrite_filter_to_use_filter_schema(
        right_filter_offset: usize,
        left_to_filter: &SchemaProjectionMap<'_>,
        right_to_filter: &SchemaProjectionMap<'_>,
        filter: &Expr,
    ) -> Result<Expr> {
        let left_len = left_to_filter.num_cols();
        filter.map_bound_columns(&mut |idx| {
            let mapped = if idx < left_len {
                left_to_filter.get(idx)
            } else {
                match right_to_filter.get(idx - left_len) {
                    MISSING_FIELD => MISSING_FIELD,
                    local => right_filter_offset + local,
                }
            };
            if mapped == MISSING_FIELD {
                Err(JoinError::binding(format!(
                    "filter column {} is not part of the filter schema",
                    idx
                )))
            } else {
                Ok(mapped)
            }
        })
    }

    /// Output schema: left output columns then right output columns, all
    /// nullable. A suffix is appended only where the two sides collide.
    pub fn make_output_schema(&self, left_field_name_suffix: &str, right_field_name_suffix: &str) -> SchemaRef {
        let left = self.output_names(JoinSide::Left);
        let right = self.output_names(JoinSide::Right);
        let left_set = left.iter().map(|(n, _)| n.as_str()).collect::<HashSet<_>>();
        let right_set = right.iter().map(|(n, _)| n.as_str()).collect::<HashSet<_>>();
        let mut fields = Vec::with_capacity(left.len() + right.len());
        for (name, data_type) in &left {
            let name = if right_set.contains(name.as_str()) {
                format!("{}{}", name, left_field_name_suffix)
            } else {
                name.clone()
            };
            fields.push(Field::new(name, data_type.clone(), true));
        }
        for (name, data_type) in &right {
            let name = if left_set.contains(name.as_str()) {
                format!("{}{}", name, right_field_name_suffix)
            } else {
                name.clone()
            };
            fields.push(Field::new(name, data_type.clone(), true));
        }
        Arc::new(Schema::new(fields))
    }

    fn output_names(&self, side: JoinSide) -> Vec<(String, DataType)> {
        let prefix = match side {
            JoinSide::Left => &self.left_field_name_prefix,
            JoinSide::Right => &self.right_field_name_prefix,
        };
        let maps = &self.proj_maps[side.index()];
        maps.input_indices(HashJoinProjection::Output)
            .iter()
            .map(|i| {
                let field = maps.input_schema().field(*i);
                (format!("{}{}", prefix, field.name()), field.data_type().clone())
            })
            .collect()
    }

    pub fn left_payload_is_empty(&self) -> bool {
        self.payload_is_empty(JoinSide::Left)
    }

    pub fn right_payload_is_empty(&self) -> bool {
        self.payload_is_empty(JoinSide::Right)
    }

    pub fn payload_is_empty(&self, side: JoinSide) -> bool {
        self.proj_maps[side.index()].num_cols(HashJoinProjection::Payload) == 0
    }

    /// Whether values of `data_type` can be compared as join keys.
    pub fn is_type_supported(data_type: &DataType) -> bool {
        match data_type {
            DataType::Dictionary(_, value) => Self::is_type_supported(value),
            DataType::Null => false,
            dt if dt.is_primitive() => true,
            DataType::Boolean
            | DataType::FixedSizeBinary(_)
            | DataType::Utf8
            | DataType::LargeUtf8
            | DataType::Utf8View
            | DataType::Binary
            | DataType::LargeBinary
            | DataType::BinaryView => true,
            _ => false,
        }
    }

    pub fn missing_field() -> usize {
        MISSING_FIELD
    }

    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    pub fn side(&self, side: JoinSide) -> &SchemaProjectionMaps {
        &self.proj_maps[side.index()]
    }

    pub fn filter(&self) -> &Expr {
        &self.filter
    }

    pub fn has_filter(&self) -> bool {
        !self.filter.is_literal_true()
    }

    /// Left filter columns followed by right filter columns.
    pub fn filter_schema(&self) -> SchemaRef {
        let mut fields = Vec::new();
        for maps in &self.proj_maps {
            for field in maps.schema(HashJoinProjection::Filter).fields() {
                fields.push(field.as_ref().clone().with_nullable(true));
            }
        }
        Arc::new(Schema::new(fields))
    }

    pub fn key_types(&self) -> Vec<DataType> {
        self.proj_maps[0].data_types(HashJoinProjection::Key)
    }
}

fn default_output(join_type: JoinType, side: JoinSide, schema: &Schema) -> Vec<FieldRef> {
    if join_type.outputs(side) {
        (0..schema.fields().len()).map(FieldRef::Index).collect()
    } else {
        Vec::new()
    }
}

fn resolve(schema: &Schema, field: &FieldRef, role: &str) -> Result<usize> {
    field
        .find_one(schema)
        .map_err(|e| JoinError::validation(format!("{}: {}", role, e)))
}

fn resolve_all(schema: &Schema, fields: &[FieldRef]) -> Result<Vec<usize>> {
    fields.iter().map(|f| resolve(schema, f, "projection")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::expr::{col, lit};

    fn left() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("score", DataType::Int64, true),
        ]))
    }

    fn right() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("amount", DataType::Int64, true),
            Field::new("rid", DataType::Int32, true),
        ]))
    }

    fn keys() -> (Vec<FieldRef>, Vec<FieldRef>) {
        (vec![FieldRef::name("id")], vec![FieldRef::name("rid")])
    }

    #[test]
    fn default_output_covers_both_sides() {
        let (lk, rk) = keys();
        let schema = HashJoinSchema::init(
            JoinType::Inner,
            &left(),
            &lk,
            &right(),
            &rk,
            &Expr::literal_true(),
            "",
            "",
        )
        .unwrap();
        let out = schema.make_output_schema("", "");
        let names = out.fields().iter().map(|f| f.name().as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["id", "name", "score", "amount", "rid"]);
        assert!(out.fields().iter().all(|f| f.is_nullable()));
        assert_eq!(schema.side(JoinSide::Left).num_cols(HashJoinProjection::Payload), 2);
        assert!(!schema.has_filter());
    }

    #[test]
    fn semi_join_outputs_one_side() {
        let (lk, rk) = keys();
        let schema = HashJoinSchema::init(
            JoinType::RightSemi,
            &left(),
            &lk,
            &right(),
            &rk,
            &Expr::literal_true(),
            "",
            "",
        )
        .unwrap();
        assert_eq!(schema.make_output_schema("", "").fields().len(), 2);
        assert!(schema.left_payload_is_empty());
        assert!(!schema.right_payload_is_empty());
    }

    #[test]
    fn explicit_output_order_is_kept() {
        let (lk, rk) = keys();
        let schema = HashJoinSchema::init_with_output(
            JoinType::LeftOuter,
            &left(),
            &lk,
            &[FieldRef::name("score"), FieldRef::name("id")],
            &right(),
            &rk,
            &[FieldRef::name("amount")],
            &Expr::literal_true(),
            "",
            "",
        )
        .unwrap();
        let out = schema.make_output_schema("", "");
        let names = out.fields().iter().map(|f| f.name().as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["score", "id", "amount"]);
        let payload = schema.side(JoinSide::Left).input_indices(HashJoinProjection::Payload);
        assert_eq!(payload, &[2]);
    }

    #[test]
    fn suffixes_only_on_collision() {
        let l = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, true),
            Field::new("v", DataType::Int32, true),
        ]));
        let r = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, true),
            Field::new("w", DataType::Int32, true),
        ]));
        let schema = HashJoinSchema::init(
            JoinType::FullOuter,
            &l,
            &[FieldRef::name("id")],
            &r,
            &[FieldRef::name("id")],
            &Expr::literal_true(),
            "",
            "",
        )
        .unwrap();
        let out = schema.make_output_schema("_l", "_r");
        let names = out.fields().iter().map(|f| f.name().as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["id_l", "v", "id_r", "w"]);
    }

    #[test]
    fn validation_failures() {
        let (lk, rk) = keys();
        let l = left();
        let r = right();
        let all_left = vec![FieldRef::index(0)];
        let err = |res: Result<()>| matches!(res, Err(JoinError::Validation(_)));

        assert!(err(HashJoinSchema::validate_schemas(
            JoinType::Inner, &l, &lk, &all_left, &r, &[], &[], "", ""
        )));
        assert!(err(HashJoinSchema::validate_schemas(
            JoinType::Inner, &l, &[FieldRef::name("nope")], &all_left, &r, &rk, &[], "", ""
        )));
        // Int32 key against Int64 key.
        assert!(err(HashJoinSchema::validate_schemas(
            JoinType::Inner, &l, &lk, &all_left, &r, &[FieldRef::name("amount")], &[], "", ""
        )));
        assert!(err(HashJoinSchema::validate_schemas(
            JoinType::LeftSemi, &l, &lk, &all_left, &r, &rk, &[FieldRef::index(0)], "", ""
        )));
        assert!(err(HashJoinSchema::validate_schemas(
            JoinType::Inner, &l, &lk, &[], &r, &rk, &[], "", ""
        )));
        // Same prefixed name on both sides.
        let r2 = Arc::new(Schema::new(vec![Field::new("id", DataType::Int32, true)]));
        assert!(err(HashJoinSchema::validate_schemas(
            JoinType::Inner, &l, &lk, &all_left, &r2, &lk, &[FieldRef::index(0)], "t_", "t_"
        )));
        assert!(HashJoinSchema::validate_schemas(
            JoinType::Inner, &l, &lk, &all_left, &r2, &lk, &[FieldRef::index(0)], "l_", "r_"
        )
        .is_ok());
    }

    #[test]
    fn type_support() {
        assert!(HashJoinSchema::is_type_supported(&DataType::Int32));
        assert!(HashJoinSchema::is_type_supported(&DataType::Utf8));
        assert!(HashJoinSchema::is_type_supported(&DataType::Dictionary(
            Box::new(DataType::Int32),
            Box::new(DataType::Utf8)
        )));
        assert!(!HashJoinSchema::is_type_supported(&DataType::List(Arc::new(Field::new(
            "item",
            DataType::Int32,
            true
        )))));
        assert!(!HashJoinSchema::is_type_supported(&DataType::Null));
    }

    #[test]
    fn filter_is_rewritten_to_filter_schema() {
        let (lk, rk) = keys();
        let filter = col("score").gt(col("amount"));
        let schema = HashJoinSchema::init(
            JoinType::Inner,
            &left(),
            &lk,
            &right(),
            &rk,
            &filter,
            "",
            "",
        )
        .unwrap();
        assert!(schema.has_filter());
        let fs = schema.filter_schema();
        let names = fs.fields().iter().map(|f| f.name().as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["score", "amount"]);
        let mut cols = BTreeSet::new();
        schema.filter().bound_columns(&mut cols);
        assert_eq!(cols.into_iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn filter_binding_errors() {
        let (lk, rk) = keys();
        for filter in [col("missing").eq(lit(1)), col("score").arith_with(crate::exec::expr::ArithOp::Add, lit(1))] {
            let res = HashJoinSchema::init(
                JoinType::Inner,
                &left(),
                &lk,
                &right(),
                &rk,
                &filter,
                "",
                "",
            );
            assert!(matches!(res, Err(JoinError::Binding(_))));
        }
    }

    #[test]
    fn payload_excludes_keys() {
        let l = left();
        let payload = HashJoinSchema::compute_payload(
            &l,
            &[FieldRef::name("id"), FieldRef::name("name")],
            &[FieldRef::index(2), FieldRef::index(1)],
            &[FieldRef::name("id")],
        )
        .unwrap();
        assert_eq!(payload, vec![FieldRef::Index(1), FieldRef::Index(2)]);
    }
}
