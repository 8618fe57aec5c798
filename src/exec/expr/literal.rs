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
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, NullArray, StringArray};
use arrow::datatypes::DataType;

#[derive(Clone, Debug, PartialEq)]
pub enum LiteralValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl LiteralValue {
    pub fn data_type(&self) -> DataType {
        match self {
            LiteralValue::Null => DataType::Null,
            LiteralValue::Bool(_) => DataType::Boolean,
            LiteralValue::Int64(_) => DataType::Int64,
            LiteralValue::Float64(_) => DataType::Float64,
            LiteralValue::Utf8(_) => DataType::Utf8,
        }
    }
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Null => write!(f, "null"),
            LiteralValue::Bool(v) => write!(f, "{}", v),
            LiteralValue::Int64(v) => write!(f, "{}", v),
            LiteralValue::Float64(v) => write!(f, "{}", v),
            LiteralValue::Utf8(v) => write!(f, "\"{}\"", v),
        }
    }
}

impl From<bool> for LiteralValue {
    fn from(value: bool) -> Self {
        LiteralValue::Bool(value)
    }
}

impl From<i32> for LiteralValue {
    fn from(value: i32) -> Self {
        LiteralValue::Int64(value as i64)
    }
}

impl From<i64> for LiteralValue {
    fn from(value: i64) -> Self {
        LiteralValue::Int64(value)
    }
}

impl From<f64> for LiteralValue {
    fn from(value: f64) -> Self {
        LiteralValue::Float64(value)
    }
}

impl From<&str> for LiteralValue {
    fn from(value: &str) -> Self {
        LiteralValue::Utf8(value.to_string())
    }
}

/// Materialize a literal as an array of `len` identical values.
pub fn eval(value: &LiteralValue, len: usize) -> ArrayRef {
    match value {
        LiteralValue::Null => Arc::new(NullArray::new(len)),
        LiteralValue::Bool(v) => Arc::new(BooleanArray::from(vec![*v; len])),
        LiteralValue::Int64(v) => Arc::new(Int64Array::from(vec![*v; len])),
        LiteralValue::Float64(v) => Arc::new(Float64Array::from(vec![*v; len])),
        LiteralValue::Utf8(v) => Arc::new(StringArray::from(vec![v.as_str(); len])),
    }
}
