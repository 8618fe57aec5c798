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
use std::fmt;

use arrow::datatypes::Schema;

/// Reference to a field of a schema, by name, by position, or by nested path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldRef {
    Name(String),
    Index(usize),
    /// Nested path of child positions. Only single-element paths resolve
    /// against the flat schemas handled here.
    Path(Vec<usize>),
}

impl FieldRef {
    pub fn name(name: impl Into<String>) -> Self {
        FieldRef::Name(name.into())
    }

    pub fn index(index: usize) -> Self {
        FieldRef::Index(index)
    }

    /// Resolve to exactly one top-level field position.
    pub fn find_one(&self, schema: &Schema) -> Result<usize, String> {
        match self {
            FieldRef::Name(name) => {
                let mut found = None;
                for (idx, field) in schema.fields().iter().enumerate() {
                    if field.name() != name {
                        continue;
                    }
                    if found.is_some() {
                        return Err(format!("field reference {} is ambiguous", self));
                    }
                    found = Some(idx);
                }
                found.ok_or_else(|| format!("no match for field reference {}", self))
            }
            FieldRef::Index(idx) => {
                if *idx < schema.fields().len() {
                    Ok(*idx)
                } else {
                    Err(format!(
                        "field reference {} out of range for schema with {} fields",
                        self,
                        schema.fields().len()
                    ))
                }
            }
            FieldRef::Path(path) => match path.as_slice() {
                [idx] => FieldRef::Index(*idx).find_one(schema),
                [] => Err("empty field path".to_string()),
                _ => Err(format!("nested field reference {} is not supported", self)),
            },
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldRef::Name(name) => write!(f, "Name({})", name),
            FieldRef::Index(idx) => write!(f, "Index({})", idx),
            FieldRef::Path(path) => {
                let parts = path.iter().map(|p| p.to_string()).collect::<Vec<_>>();
                write!(f, "Path({})", parts.join("."))
            }
        }
    }
}

impl From<&str> for FieldRef {
    fn from(value: &str) -> Self {
        FieldRef::Name(value.to_string())
    }
}

impl From<String> for FieldRef {
    fn from(value: String) -> Self {
        FieldRef::Name(value)
    }
}

impl From<usize> for FieldRef {
    fn from(value: usize) -> Self {
        FieldRef::Index(value)
    }
}
