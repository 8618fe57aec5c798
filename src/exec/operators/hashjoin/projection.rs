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
//! Per-side projection maps.
//!
//! Each join input is viewed through several projections of its full
//! schema (keys, payload, filter columns, output). A map between two
//! projections of the same side goes through the full input schema.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, FieldRef as ArrowFieldRef, Schema, SchemaRef};

use crate::common::error::{JoinError, Result};

/// Marks a column absent from a projection.
pub const MISSING_FIELD: usize = usize::MAX;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HashJoinProjection {
    Input,
    Key,
    Payload,
    Filter,
    Output,
}

impl HashJoinProjection {
    const ALL: [HashJoinProjection; 5] = [
        HashJoinProjection::Input,
        HashJoinProjection::Key,
        HashJoinProjection::Payload,
        HashJoinProjection::Filter,
        HashJoinProjection::Output,
    ];

    fn slot(self) -> usize {
        match self {
            HashJoinProjection::Input => 0,
            HashJoinProjection::Key => 1,
            HashJoinProjection::Payload => 2,
            HashJoinProjection::Filter => 3,
            HashJoinProjection::Output => 4,
        }
    }
}

impl fmt::Display for HashJoinProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashJoinProjection::Input => "INPUT",
            HashJoinProjection::Key => "KEY",
            HashJoinProjection::Payload => "PAYLOAD",
            HashJoinProjection::Filter => "FILTER",
            HashJoinProjection::Output => "OUTPUT",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Default)]
struct Projection {
    /// Projection-local position -> input position.
    to_input: Vec<usize>,
    /// Input position -> projection-local position or `MISSING_FIELD`.
    from_input: Vec<usize>,
}

/// Mapping from the columns of one projection to another.
#[derive(Clone, Copy, Debug)]
pub struct SchemaProjectionMap<'a> {
    source_to_input: &'a [usize],
    input_to_target: &'a [usize],
}

impl SchemaProjectionMap<'_> {
    pub fn num_cols(&self) -> usize {
        self.source_to_input.len()
    }

    /// Target position of source column `i`, or `MISSING_FIELD`.
    pub fn get(&self, i: usize) -> usize {
        match self.source_to_input.get(i) {
            Some(input) => self
                .input_to_target
                .get(*input)
                .copied()
                .unwrap_or(MISSING_FIELD),
            None => MISSING_FIELD,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SchemaProjectionMaps {
    input_schema: SchemaRef,
    projections: [Projection; 5],
}

impl SchemaProjectionMaps {
    /// `projections` lists, per role, the input positions it selects in
    /// projection order. Roles not listed are empty.
    pub fn new(input_schema: SchemaRef, projections: &[(HashJoinProjection, Vec<usize>)]) -> Result<Self> {
        let num_fields = input_schema.fields().len();
        let mut maps: [Projection; 5] = Default::default();
        maps[HashJoinProjection::Input.slot()] = Projection {
            to_input: (0..num_fields).collect(),
            from_input: (0..num_fields).collect(),
        };
        for role in HashJoinProjection::ALL {
            if role != HashJoinProjection::Input {
                maps[role.slot()].from_input = vec![MISSING_FIELD; num_fields];
            }
        }
        for (role, columns) in projections {
            if *role == HashJoinProjection::Input {
                return Err(JoinError::validation("INPUT projection is implicit"));
            }
            let mut from_input = vec![MISSING_FIELD; num_fields];
            for (local, input) in columns.iter().enumerate() {
                if *input >= num_fields {
                    return Err(JoinError::validation(format!(
                        "{} projection column {} out of range for schema with {} fields",
                        role, input, num_fields
                    )));
                }
                if from_input[*input] == MISSING_FIELD {
                    from_input[*input] = local;
                }
            }
            maps[role.slot()] = Projection {
                to_input: columns.clone(),
                from_input,
            };
        }
        Ok(Self {
            input_schema,
            projections: maps,
        })
    }

    pub fn input_schema(&self) -> &SchemaRef {
        &self.input_schema
    }

    pub fn num_cols(&self, role: HashJoinProjection) -> usize {
        self.projections[role.slot()].to_input.len()
    }

    /// Input position of column `i` of `role`.
    pub fn input_index(&self, role: HashJoinProjection, i: usize) -> usize {
        self.projections[role.slot()]
            .to_input
            .get(i)
            .copied()
            .unwrap_or(MISSING_FIELD)
    }

    pub fn input_indices(&self, role: HashJoinProjection) -> &[usize] {
        &self.projections[role.slot()].to_input
    }

    pub fn field(&self, role: HashJoinProjection, i: usize) -> Option<&ArrowFieldRef> {
        let input = self.input_index(role, i);
        self.input_schema.fields().get(input)
    }

    pub fn field_name(&self, role: HashJoinProjection, i: usize) -> Option<&str> {
        self.field(role, i).map(|f| f.name().as_str())
    }

    pub fn data_type(&self, role: HashJoinProjection, i: usize) -> Option<&DataType> {
        self.field(role, i).map(|f| f.data_type())
    }

    pub fn data_types(&self, role: HashJoinProjection) -> Vec<DataType> {
        self.input_indices(role)
            .iter()
            .map(|i| self.input_schema.field(*i).data_type().clone())
            .collect()
    }

    /// Schema of `role`, fields as declared on the input.
    pub fn schema(&self, role: HashJoinProjection) -> SchemaRef {
        let fields = self
            .input_indices(role)
            .iter()
            .map(|i| self.input_schema.field(*i).clone())
            .collect::<Vec<Field>>();
        Arc::new(Schema::new(fields))
    }

    pub fn map(&self, from: HashJoinProjection, to: HashJoinProjection) -> SchemaProjectionMap<'_> {
        SchemaProjectionMap {
            source_to_input: &self.projections[from.slot()].to_input,
            input_to_target: &self.projections[to.slot()].from_input,
        }
    }
}
