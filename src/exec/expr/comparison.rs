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
//! Comparison and boolean kernels with implicit type coercion.

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray};
use arrow::compute::kernels::boolean::{and_kleene, not, or_kleene};
use arrow::compute::kernels::cmp::{eq, gt, gt_eq, lt, lt_eq, neq};
use arrow::compute::cast;
use arrow::datatypes::DataType;

use crate::common::error::{JoinError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

fn is_integer(dt: &DataType) -> bool {
    matches!(
        dt,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

fn is_float(dt: &DataType) -> bool {
    matches!(dt, DataType::Float16 | DataType::Float32 | DataType::Float64)
}

pub(crate) fn is_numeric(dt: &DataType) -> bool {
    is_integer(dt) || is_float(dt)
}

/// Common type both operands of an arithmetic expression are cast to.
pub(crate) fn numeric_coercion(left: &DataType, right: &DataType) -> Option<DataType> {
    match (left, right) {
        (DataType::Null, other) | (other, DataType::Null) if is_numeric(other) => {
            Some(widen_numeric(other))
        }
        (l, r) if is_float(l) || is_float(r) => {
            (is_numeric(l) && is_numeric(r)).then_some(DataType::Float64)
        }
        (l, r) if is_integer(l) && is_integer(r) => Some(DataType::Int64),
        _ => None,
    }
}

fn widen_numeric(dt: &DataType) -> DataType {
    if is_float(dt) {
        DataType::Float64
    } else {
        DataType::Int64
    }
}

/// Common type both operands of a comparison are cast to, if any.
pub(crate) fn comparison_coercion(left: &DataType, right: &DataType) -> Option<DataType> {
    match (left, right) {
        (DataType::Dictionary(_, value), other) | (other, DataType::Dictionary(_, value)) => {
            comparison_coercion(value.as_ref(), other)
        }
        (l, r) if l == r => Some(l.clone()),
        (DataType::Null, other) | (other, DataType::Null) => Some(other.clone()),
        (l, r) if is_numeric(l) && is_numeric(r) => numeric_coercion(l, r),
        (DataType::Utf8 | DataType::LargeUtf8, DataType::Utf8 | DataType::LargeUtf8) => {
            Some(DataType::LargeUtf8)
        }
        (DataType::Binary | DataType::LargeBinary, DataType::Binary | DataType::LargeBinary) => {
            Some(DataType::LargeBinary)
        }
        _ => None,
    }
}

pub(crate) fn cast_to(array: &ArrayRef, target: &DataType) -> Result<ArrayRef> {
    if array.data_type() == target {
        return Ok(array.clone());
    }
    cast(array, target).map_err(|e| {
        JoinError::execution(format!(
            "cast from {:?} to {:?} failed: {}",
            array.data_type(),
            target,
            e
        ))
    })
}

pub fn eval_cmp(op: CmpOp, left: &ArrayRef, right: &ArrayRef) -> Result<BooleanArray> {
    let target = comparison_coercion(left.data_type(), right.data_type()).ok_or_else(|| {
        JoinError::execution(format!(
            "cannot compare {:?} {} {:?}",
            left.data_type(),
            op.symbol(),
            right.data_type()
        ))
    })?;
    if matches!(target, DataType::Null) {
        return Ok(BooleanArray::new_null(left.len()));
    }
    let l = cast_to(left, &target)?;
    let r = cast_to(right, &target)?;
    let out = match op {
        CmpOp::Eq => eq(&l, &r),
        CmpOp::Ne => neq(&l, &r),
        CmpOp::Lt => lt(&l, &r),
        CmpOp::Le => lt_eq(&l, &r),
        CmpOp::Gt => gt(&l, &r),
        CmpOp::Ge => gt_eq(&l, &r),
    }?;
    Ok(out)
}

fn as_boolean(array: &ArrayRef) -> Result<BooleanArray> {
    match array.data_type() {
        DataType::Boolean => Ok(array.as_boolean().clone()),
        DataType::Null => Ok(BooleanArray::new_null(array.len())),
        other => Err(JoinError::execution(format!(
            "expected boolean operand, got {:?}",
            other
        ))),
    }
}

/// Three-valued AND.
pub fn eval_and(left: &ArrayRef, right: &ArrayRef) -> Result<BooleanArray> {
    Ok(and_kleene(&as_boolean(left)?, &as_boolean(right)?)?)
}

/// Three-valued OR.
pub fn eval_or(left: &ArrayRef, right: &ArrayRef) -> Result<BooleanArray> {
    Ok(or_kleene(&as_boolean(left)?, &as_boolean(right)?)?)
}

pub fn eval_not(child: &ArrayRef) -> Result<BooleanArray> {
    Ok(not(&as_boolean(child)?)?)
}
