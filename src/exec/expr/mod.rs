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
//! Row-level expressions used by join residual filters.
//!
//! An expression starts out referring to fields by [`FieldRef`]. Binding it
//! against a schema resolves every reference to a positional
//! [`Expr::BoundColumn`] and type-checks each node; only bound expressions
//! can be evaluated. Evaluation is vectorized over a whole `RecordBatch`
//! with the arrow compute kernels.

pub mod arithmetic;
pub mod comparison;
pub mod field_ref;
pub mod literal;

use std::collections::BTreeSet;
use std::fmt;

use arrow::array::{Array, ArrayRef, BooleanArray};
use arrow::compute::{is_not_null, is_null, prep_null_mask_filter};
use arrow::datatypes::{DataType, Schema};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

pub use arithmetic::ArithOp;
pub use comparison::CmpOp;
pub use field_ref::FieldRef;
pub use literal::LiteralValue;

use crate::common::error::{JoinError, Result};
use comparison::{comparison_coercion, numeric_coercion};

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(LiteralValue),
    /// Unresolved reference; replaced by `BoundColumn` on bind.
    Column(FieldRef),
    BoundColumn {
        index: usize,
        data_type: DataType,
    },
    Cmp {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Arith {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
}

pub fn col(field: impl Into<FieldRef>) -> Expr {
    Expr::Column(field.into())
}

pub fn lit(value: impl Into<LiteralValue>) -> Expr {
    Expr::Literal(value.into())
}

pub fn not(expr: Expr) -> Expr {
    Expr::Not(Box::new(expr))
}

impl Expr {
    pub fn cmp_with(self, op: CmpOp, other: Expr) -> Expr {
        Expr::Cmp {
            op,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn arith_with(self, op: ArithOp, other: Expr) -> Expr {
        Expr::Arith {
            op,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn eq(self, other: Expr) -> Expr {
        self.cmp_with(CmpOp::Eq, other)
    }

    pub fn not_eq(self, other: Expr) -> Expr {
        self.cmp_with(CmpOp::Ne, other)
    }

    pub fn lt(self, other: Expr) -> Expr {
        self.cmp_with(CmpOp::Lt, other)
    }

    pub fn lt_eq(self, other: Expr) -> Expr {
        self.cmp_with(CmpOp::Le, other)
    }

    pub fn gt(self, other: Expr) -> Expr {
        self.cmp_with(CmpOp::Gt, other)
    }

    pub fn gt_eq(self, other: Expr) -> Expr {
        self.cmp_with(CmpOp::Ge, other)
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull(Box::new(self))
    }

    pub fn is_not_null(self) -> Expr {
        Expr::IsNotNull(Box::new(self))
    }

    pub fn literal_true() -> Expr {
        Expr::Literal(LiteralValue::Bool(true))
    }

    pub fn is_literal_true(&self) -> bool {
        matches!(self, Expr::Literal(LiteralValue::Bool(true)))
    }

    /// True when no unresolved `Column` remains in the tree.
    pub fn is_bound(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::BoundColumn { .. } => true,
            Expr::Column(_) => false,
            Expr::Cmp { left, right, .. }
            | Expr::Arith { left, right, .. }
            | Expr::And(left, right)
            | Expr::Or(left, right) => left.is_bound() && right.is_bound(),
            Expr::Not(child) | Expr::IsNull(child) | Expr::IsNotNull(child) => child.is_bound(),
        }
    }

    /// Resolve field references against `schema` and type-check every node.
    pub fn bind(&self, schema: &Schema) -> Result<Expr> {
        let bound = match self {
            Expr::Literal(v) => Expr::Literal(v.clone()),
            Expr::Column(field) => {
                let index = field.find_one(schema).map_err(JoinError::binding)?;
                Expr::BoundColumn {
                    index,
                    data_type: schema.field(index).data_type().clone(),
                }
            }
            Expr::BoundColumn { index, .. } => {
                if *index >= schema.fields().len() {
                    return Err(JoinError::binding(format!(
                        "bound column {} out of range for schema with {} fields",
                        index,
                        schema.fields().len()
                    )));
                }
                Expr::BoundColumn {
                    index: *index,
                    data_type: schema.field(*index).data_type().clone(),
                }
            }
            Expr::Cmp { op, left, right } => {
                let left = left.bind(schema)?;
                let right = right.bind(schema)?;
                let (lt, rt) = (left.data_type()?, right.data_type()?);
                if comparison_coercion(&lt, &rt).is_none() {
                    return Err(JoinError::binding(format!(
                        "cannot compare {:?} {} {:?}",
                        lt,
                        op.symbol(),
                        rt
                    )));
                }
                left.cmp_with(*op, right)
            }
            Expr::Arith { op, left, right } => {
                let left = left.bind(schema)?;
                let right = right.bind(schema)?;
                let (lt, rt) = (left.data_type()?, right.data_type()?);
                if numeric_coercion(&lt, &rt).is_none() {
                    return Err(JoinError::binding(format!(
                        "unsupported operands {:?} {} {:?}",
                        lt,
                        op.symbol(),
                        rt
                    )));
                }
                left.arith_with(*op, right)
            }
            Expr::And(left, right) => {
                let left = bind_boolean(left, schema)?;
                let right = bind_boolean(right, schema)?;
                left.and(right)
            }
            Expr::Or(left, right) => {
                let left = bind_boolean(left, schema)?;
                let right = bind_boolean(right, schema)?;
                left.or(right)
            }
            Expr::Not(child) => not(bind_boolean(child, schema)?),
            Expr::IsNull(child) => child.bind(schema)?.is_null(),
            Expr::IsNotNull(child) => child.bind(schema)?.is_not_null(),
        };
        Ok(bound)
    }

    /// Result type of a bound expression.
    pub fn data_type(&self) -> Result<DataType> {
        match self {
            Expr::Literal(v) => Ok(v.data_type()),
            Expr::Column(field) => Err(JoinError::binding(format!(
                "expression references unbound field {}",
                field
            ))),
            Expr::BoundColumn { data_type, .. } => Ok(data_type.clone()),
            Expr::Arith { left, right, op } => {
                let (lt, rt) = (left.data_type()?, right.data_type()?);
                numeric_coercion(&lt, &rt).ok_or_else(|| {
                    JoinError::binding(format!(
                        "unsupported operands {:?} {} {:?}",
                        lt,
                        op.symbol(),
                        rt
                    ))
                })
            }
            Expr::Cmp { .. }
            | Expr::And(..)
            | Expr::Or(..)
            | Expr::Not(_)
            | Expr::IsNull(_)
            | Expr::IsNotNull(_) => Ok(DataType::Boolean),
        }
    }

    /// Collect every field reference of an unbound expression.
    pub fn field_refs(&self, out: &mut Vec<FieldRef>) {
        match self {
            Expr::Column(field) => out.push(field.clone()),
            Expr::Literal(_) | Expr::BoundColumn { .. } => {}
            Expr::Cmp { left, right, .. }
            | Expr::Arith { left, right, .. }
            | Expr::And(left, right)
            | Expr::Or(left, right) => {
                left.field_refs(out);
                right.field_refs(out);
            }
            Expr::Not(child) | Expr::IsNull(child) | Expr::IsNotNull(child) => {
                child.field_refs(out)
            }
        }
    }

    /// Collect every column position of a bound expression.
    pub fn bound_columns(&self, out: &mut BTreeSet<usize>) {
        match self {
            Expr::BoundColumn { index, .. } => {
                out.insert(*index);
            }
            Expr::Literal(_) | Expr::Column(_) => {}
            Expr::Cmp { left, right, .. }
            | Expr::Arith { left, right, .. }
            | Expr::And(left, right)
            | Expr::Or(left, right) => {
                left.bound_columns(out);
                right.bound_columns(out);
            }
            Expr::Not(child) | Expr::IsNull(child) | Expr::IsNotNull(child) => {
                child.bound_columns(out)
            }
        }
    }

    /// Rewrite every bound column position through `f`.
    pub fn map_bound_columns<F>(&self, f: &mut F) -> Result<Expr>
    where
        F: FnMut(usize) -> Result<usize>,
    {
        let mapped = match self {
            Expr::BoundColumn { index, data_type } => Expr::BoundColumn {
                index: f(*index)?,
                data_type: data_type.clone(),
            },
            Expr::Literal(_) | Expr::Column(_) => self.clone(),
            Expr::Cmp { op, left, right } => left
                .map_bound_columns(f)?
                .cmp_with(*op, right.map_bound_columns(f)?),
            Expr::Arith { op, left, right } => left
                .map_bound_columns(f)?
                .arith_with(*op, right.map_bound_columns(f)?),
            Expr::And(left, right) => left.map_bound_columns(f)?.and(right.map_bound_columns(f)?),
            Expr::Or(left, right) => left.map_bound_columns(f)?.or(right.map_bound_columns(f)?),
            Expr::Not(child) => not(child.map_bound_columns(f)?),
            Expr::IsNull(child) => child.map_bound_columns(f)?.is_null(),
            Expr::IsNotNull(child) => child.map_bound_columns(f)?.is_not_null(),
        };
        Ok(mapped)
    }

    pub fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let len = batch.num_rows();
        match self {
            Expr::Literal(v) => Ok(literal::eval(v, len)),
            Expr::Column(field) => Err(JoinError::execution(format!(
                "cannot evaluate unbound field {}",
                field
            ))),
            Expr::BoundColumn { index, .. } => {
                if *index >= batch.num_columns() {
                    return Err(JoinError::execution(format!(
                        "bound column {} out of range for batch with {} columns",
                        index,
                        batch.num_columns()
                    )));
                }
                Ok(batch.column(*index).clone())
            }
            Expr::Cmp { op, left, right } => {
                let l = left.evaluate(batch)?;
                let r = right.evaluate(batch)?;
                Ok(Arc::new(comparison::eval_cmp(*op, &l, &r)?))
            }
            Expr::Arith { op, left, right } => {
                let l = left.evaluate(batch)?;
                let r = right.evaluate(batch)?;
                arithmetic::eval_arith(*op, &l, &r)
            }
            Expr::And(left, right) => {
                let l = left.evaluate(batch)?;
                let r = right.evaluate(batch)?;
                Ok(Arc::new(comparison::eval_and(&l, &r)?))
            }
            Expr::Or(left, right) => {
                let l = left.evaluate(batch)?;
                let r = right.evaluate(batch)?;
                Ok(Arc::new(comparison::eval_or(&l, &r)?))
            }
            Expr::Not(child) => {
                let c = child.evaluate(batch)?;
                Ok(Arc::new(comparison::eval_not(&c)?))
            }
            Expr::IsNull(child) => {
                let c = child.evaluate(batch)?;
                Ok(Arc::new(is_null(c.as_ref())?))
            }
            Expr::IsNotNull(child) => {
                let c = child.evaluate(batch)?;
                Ok(Arc::new(is_not_null(c.as_ref())?))
            }
        }
    }

    /// Evaluate as a row selection. Null results select nothing.
    pub fn evaluate_predicate(&self, batch: &RecordBatch) -> Result<BooleanArray> {
        if self.is_literal_true() {
            return Ok(BooleanArray::from(vec![true; batch.num_rows()]));
        }
        let out = self.evaluate(batch)?;
        let mask = match out.data_type() {
            DataType::Boolean => out
                .as_any()
                .downcast_ref::<BooleanArray>()
                .cloned()
                .ok_or_else(|| JoinError::execution("predicate downcast failed"))?,
            DataType::Null => BooleanArray::from(vec![false; out.len()]),
            other => {
                return Err(JoinError::execution(format!(
                    "predicate evaluated to {:?}, expected Boolean",
                    other
                )));
            }
        };
        if mask.null_count() > 0 {
            Ok(prep_null_mask_filter(&mask))
        } else {
            Ok(mask)
        }
    }
}

fn bind_boolean(expr: &Expr, schema: &Schema) -> Result<Expr> {
    let bound = expr.bind(schema)?;
    match bound.data_type()? {
        DataType::Boolean | DataType::Null => Ok(bound),
        other => Err(JoinError::binding(format!(
            "expected boolean operand, got {:?}",
            other
        ))),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Column(field) => write!(f, "{}", field),
            Expr::BoundColumn { index, .. } => write!(f, "#{}", index),
            Expr::Cmp { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Arith { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::And(l, r) => write!(f, "({} and {})", l, r),
            Expr::Or(l, r) => write!(f, "({} or {})", l, r),
            Expr::Not(c) => write!(f, "not {}", c),
            Expr::IsNull(c) => write!(f, "is_null({})", c),
            Expr::IsNotNull(c) => write!(f, "is_not_null({})", c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int32Array, Int64Array, StringArray};
    use arrow::datatypes::Field;

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("x", DataType::Int32, true),
            Field::new("y", DataType::Int64, true),
            Field::new("s", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![Some(1), Some(5), None])),
                Arc::new(Int64Array::from(vec![2, 5, 7])),
                Arc::new(StringArray::from(vec!["a", "b", "c"])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn bind_resolves_columns_and_types() {
        let b = batch();
        let bound = col("x").lt(col("y")).bind(b.schema().as_ref()).unwrap();
        assert!(bound.is_bound());
        assert_eq!(bound.data_type().unwrap(), DataType::Boolean);
        let mut cols = BTreeSet::new();
        bound.bound_columns(&mut cols);
        assert_eq!(cols.into_iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn bind_rejects_type_errors() {
        let b = batch();
        let schema = b.schema();
        assert!(matches!(
            col("x").eq(col("s")).bind(schema.as_ref()),
            Err(JoinError::Binding(_))
        ));
        assert!(matches!(
            col("x").and(lit(true)).bind(schema.as_ref()),
            Err(JoinError::Binding(_))
        ));
        assert!(matches!(
            col("missing").eq(lit(1)).bind(schema.as_ref()),
            Err(JoinError::Binding(_))
        ));
    }

    #[test]
    fn predicate_treats_null_as_false() {
        let b = batch();
        let pred = col("x")
            .arith_with(ArithOp::Add, lit(1))
            .gt_eq(col("y"))
            .bind(b.schema().as_ref())
            .unwrap();
        let mask = pred.evaluate_predicate(&b).unwrap();
        assert_eq!(mask, BooleanArray::from(vec![true, true, false]));
    }

    #[test]
    fn map_bound_columns_rewrites_positions() {
        let b = batch();
        let bound = col("y").gt(lit(3)).bind(b.schema().as_ref()).unwrap();
        let moved = bound.map_bound_columns(&mut |i| Ok(i + 10)).unwrap();
        let mut cols = BTreeSet::new();
        moved.bound_columns(&mut cols);
        assert!(cols.contains(&11));
    }

    #[test]
    fn null_checks_and_display() {
        let b = batch();
        let pred = col("x").is_null().or(col("s").eq(lit("a")));
        assert_eq!(pred.to_string(), "(is_null(Name(x)) or (Name(s) == \"a\"))");
        let bound = pred.bind(b.schema().as_ref()).unwrap();
        let mask = bound.evaluate_predicate(&b).unwrap();
        assert_eq!(mask, BooleanArray::from(vec![true, false, true]));
    }
}
