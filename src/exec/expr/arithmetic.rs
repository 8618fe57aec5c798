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
use arrow::array::{Array, ArrayRef, new_null_array};
use arrow::compute::kernels::numeric::{add, mul, sub};

use super::comparison::{cast_to, numeric_coercion};
use crate::common::error::{JoinError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
}

impl ArithOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
        }
    }
}

pub fn eval_arith(op: ArithOp, left: &ArrayRef, right: &ArrayRef) -> Result<ArrayRef> {
    let target = numeric_coercion(left.data_type(), right.data_type()).ok_or_else(|| {
        JoinError::execution(format!(
            "unsupported operands {:?} {} {:?}",
            left.data_type(),
            op.symbol(),
            right.data_type()
        ))
    })?;
    if left.logical_null_count() == left.len() || right.logical_null_count() == right.len() {
        return Ok(new_null_array(&target, left.len()));
    }
    let l = cast_to(left, &target)?;
    let r = cast_to(right, &target)?;
    let out = match op {
        ArithOp::Add => add(&l, &r),
        ArithOp::Sub => sub(&l, &r),
        ArithOp::Mul => mul(&l, &r),
    }?;
    Ok(out)
}
