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
//! sum and product. Integer accumulation wraps on overflow; decimal
//! accumulation is checked and reports overflow instead.

use std::any::Any;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, UInt64Array};
use arrow::datatypes::DataType;

use crate::common::error::{ExecError, Result};
use crate::exec::batch::ExecValue;
use crate::exec::expr::agg::functions::{build_decimal128_array, scalar_options_keep};
use crate::exec::expr::agg::kernel::{
    downcast_merge_state, AggregateFunction, FunctionKind, GroupAggState, HashAggKernel, Kernel,
    ScalarAggKernel, ScalarAggState,
};
use crate::exec::expr::agg::options::{AggOptions, ScalarAggregateOptions};
use crate::exec::expr::agg::views::{Decimal128View, FloatView, IntView, UIntView};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(in crate::exec::expr::agg) enum SumOp {
    Add,
    Mul,
}

pub(in crate::exec::expr::agg) struct SumFunction {
    pub hash: bool,
    pub op: SumOp,
}

#[derive(Clone, Copy)]
enum SumClass {
    Int,
    UInt,
    Float,
    Decimal,
}

impl AggregateFunction for SumFunction {
    fn name(&self) -> &str {
        match (self.op, self.hash) {
            (SumOp::Add, false) => "sum",
            (SumOp::Add, true) => "hash_sum",
            (SumOp::Mul, false) => "product",
            (SumOp::Mul, true) => "hash_product",
        }
    }

    fn kind(&self) -> FunctionKind {
        if self.hash {
            FunctionKind::HashAggregate
        } else {
            FunctionKind::ScalarAggregate
        }
    }

    fn default_options(&self) -> AggOptions {
        AggOptions::Scalar(ScalarAggregateOptions::default())
    }

    fn dispatch_exact(&self, input_type: &DataType, options: &AggOptions) -> Result<Kernel> {
        let opts = options.as_scalar(self.name())?;
        let (class, out_type) = match input_type {
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
                (SumClass::Int, DataType::Int64)
            }
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
                (SumClass::UInt, DataType::UInt64)
            }
            DataType::Float32 | DataType::Float64 => (SumClass::Float, DataType::Float64),
            DataType::Decimal128(precision, scale) if self.op == SumOp::Add => {
                (SumClass::Decimal, DataType::Decimal128(*precision, *scale))
            }
            other => {
                return Err(ExecError::not_implemented(format!(
                    "{} has no kernel for input type {other:?}",
                    self.name()
                )))
            }
        };
        let kernel = Arc::new(SumKernel {
            op: self.op,
            class,
            opts,
            out_type,
        });
        Ok(if self.hash {
            Kernel::Hash(kernel)
        } else {
            Kernel::Scalar(kernel)
        })
    }
}

struct SumKernel {
    op: SumOp,
    class: SumClass,
    opts: ScalarAggregateOptions,
    out_type: DataType,
}

impl SumKernel {
    fn accum(&self) -> SumAccum {
        match self.class {
            SumClass::Int => SumAccum::Int(Vec::new()),
            SumClass::UInt => SumAccum::UInt(Vec::new()),
            SumClass::Float => SumAccum::Float(Vec::new()),
            SumClass::Decimal => SumAccum::Decimal(Vec::new()),
        }
    }
}

impl ScalarAggKernel for SumKernel {
    fn out_type(&self) -> &DataType {
        &self.out_type
    }

    fn init(&self) -> Box<dyn ScalarAggState> {
        let mut state = SumGroupState {
            op: self.op,
            opts: self.opts,
            out_type: self.out_type.clone(),
            accum: self.accum(),
            counts: Vec::new(),
            saw_null: Vec::new(),
        };
        state.resize(1).expect("sum state resize to one slot");
        Box::new(SumScalarState { inner: state })
    }
}

impl HashAggKernel for SumKernel {
    fn out_type(&self) -> &DataType {
        &self.out_type
    }

    fn init(&self) -> Box<dyn GroupAggState> {
        Box::new(SumGroupState {
            op: self.op,
            opts: self.opts,
            out_type: self.out_type.clone(),
            accum: self.accum(),
            counts: Vec::new(),
            saw_null: Vec::new(),
        })
    }
}

enum SumAccum {
    Int(Vec<i64>),
    UInt(Vec<u64>),
    Float(Vec<f64>),
    Decimal(Vec<i128>),
}

struct SumGroupState {
    op: SumOp,
    opts: ScalarAggregateOptions,
    out_type: DataType,
    accum: SumAccum,
    counts: Vec<u64>,
    saw_null: Vec<bool>,
}

impl SumGroupState {
    fn class(&self) -> SumClass {
        match self.accum {
            SumAccum::Int(_) => SumClass::Int,
            SumAccum::UInt(_) => SumClass::UInt,
            SumAccum::Float(_) => SumClass::Float,
            SumAccum::Decimal(_) => SumClass::Decimal,
        }
    }

    fn identity_int(&self) -> i64 {
        match self.op {
            SumOp::Add => 0,
            SumOp::Mul => 1,
        }
    }

    fn consume_rows<F>(&mut self, group_ids: &[u32], mut fold: F) -> Result<()>
    where
        F: FnMut(&mut SumAccum, usize, usize, SumOp) -> Result<bool>,
    {
        for (row, &group_id) in group_ids.iter().enumerate() {
            let group = group_id as usize;
            if group >= self.counts.len() {
                return Err(ExecError::invalid("sum group id out of bounds"));
            }
            if fold(&mut self.accum, row, group, self.op)? {
                self.counts[group] += 1;
            } else {
                self.saw_null[group] = true;
            }
        }
        Ok(())
    }
}

fn fold_int(sums: &mut [i64], group: usize, value: i64, op: SumOp) {
    match op {
        SumOp::Add => sums[group] = sums[group].wrapping_add(value),
        SumOp::Mul => sums[group] = sums[group].wrapping_mul(value),
    }
}

fn fold_uint(sums: &mut [u64], group: usize, value: u64, op: SumOp) {
    match op {
        SumOp::Add => sums[group] = sums[group].wrapping_add(value),
        SumOp::Mul => sums[group] = sums[group].wrapping_mul(value),
    }
}

fn fold_float(sums: &mut [f64], group: usize, value: f64, op: SumOp) {
    match op {
        SumOp::Add => sums[group] += value,
        SumOp::Mul => sums[group] *= value,
    }
}

fn fold_decimal(sums: &mut [i128], group: usize, value: i128) -> Result<()> {
    sums[group] = sums[group]
        .checked_add(value)
        .ok_or_else(|| ExecError::overflow("decimal sum overflow"))?;
    Ok(())
}

impl GroupAggState for SumGroupState {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn resize(&mut self, num_groups: usize) -> Result<()> {
        if num_groups <= self.counts.len() {
            return Ok(());
        }
        let identity_int = self.identity_int();
        match &mut self.accum {
            SumAccum::Int(sums) => sums.resize(num_groups, identity_int),
            SumAccum::UInt(sums) => sums.resize(num_groups, identity_int as u64),
            SumAccum::Float(sums) => sums.resize(num_groups, identity_int as f64),
            SumAccum::Decimal(sums) => sums.resize(num_groups, 0),
        }
        self.counts.resize(num_groups, 0);
        self.saw_null.resize(num_groups, false);
        Ok(())
    }

    fn consume(&mut self, input: &ExecValue, group_ids: &[u32]) -> Result<()> {
        match self.class() {
            SumClass::Int => {
                let view = IntView::new(input)?;
                self.consume_rows(group_ids, |accum, row, group, op| {
                    let SumAccum::Int(sums) = accum else {
                        return Err(ExecError::invalid("sum accumulator class mismatch"));
                    };
                    Ok(match view.value_at(row) {
                        Some(value) => {
                            fold_int(sums, group, value, op);
                            true
                        }
                        None => false,
                    })
                })
            }
            SumClass::UInt => {
                let view = UIntView::new(input)?;
                self.consume_rows(group_ids, |accum, row, group, op| {
                    let SumAccum::UInt(sums) = accum else {
                        return Err(ExecError::invalid("sum accumulator class mismatch"));
                    };
                    Ok(match view.value_at(row) {
                        Some(value) => {
                            fold_uint(sums, group, value, op);
                            true
                        }
                        None => false,
                    })
                })
            }
            SumClass::Float => {
                let view = FloatView::new(input)?;
                self.consume_rows(group_ids, |accum, row, group, op| {
                    let SumAccum::Float(sums) = accum else {
                        return Err(ExecError::invalid("sum accumulator class mismatch"));
                    };
                    Ok(match view.value_at(row) {
                        Some(value) => {
                            fold_float(sums, group, value, op);
                            true
                        }
                        None => false,
                    })
                })
            }
            SumClass::Decimal => {
                let view = Decimal128View::new(input)?;
                self.consume_rows(group_ids, |accum, row, group, _| {
                    let SumAccum::Decimal(sums) = accum else {
                        return Err(ExecError::invalid("sum accumulator class mismatch"));
                    };
                    Ok(match view.value_at(row) {
                        Some(value) => {
                            fold_decimal(sums, group, value)?;
                            true
                        }
                        None => false,
                    })
                })
            }
        }
    }

    fn merge(&mut self, other: Box<dyn GroupAggState>, transposition: &[u32]) -> Result<()> {
        let other = downcast_merge_state::<Self>(other.into_any(), "sum")?;
        for (src, &dst) in transposition.iter().enumerate() {
            let dst = dst as usize;
            if dst >= self.counts.len() {
                return Err(ExecError::invalid("sum transposition out of bounds"));
            }
            match (&mut self.accum, &other.accum) {
                (SumAccum::Int(sums), SumAccum::Int(other_sums)) => {
                    fold_int(sums, dst, other_sums[src], self.op)
                }
                (SumAccum::UInt(sums), SumAccum::UInt(other_sums)) => {
                    fold_uint(sums, dst, other_sums[src], self.op)
                }
                (SumAccum::Float(sums), SumAccum::Float(other_sums)) => {
                    fold_float(sums, dst, other_sums[src], self.op)
                }
                (SumAccum::Decimal(sums), SumAccum::Decimal(other_sums)) => {
                    fold_decimal(sums, dst, other_sums[src])?
                }
                _ => return Err(ExecError::invalid("sum accumulator class mismatch")),
            }
            self.counts[dst] += other.counts[src];
            if other.saw_null[src] {
                self.saw_null[dst] = true;
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        let keep: Vec<bool> = self
            .counts
            .iter()
            .zip(&self.saw_null)
            .map(|(&count, &saw_null)| {
                scalar_options_keep(count, saw_null, self.opts.skip_nulls, self.opts.min_count)
            })
            .collect();
        let array: ArrayRef = match &self.accum {
            SumAccum::Int(sums) => Arc::new(Int64Array::from(
                sums.iter()
                    .zip(&keep)
                    .map(|(&sum, &keep)| keep.then_some(sum))
                    .collect::<Vec<_>>(),
            )),
            SumAccum::UInt(sums) => Arc::new(UInt64Array::from(
                sums.iter()
                    .zip(&keep)
                    .map(|(&sum, &keep)| keep.then_some(sum))
                    .collect::<Vec<_>>(),
            )),
            SumAccum::Float(sums) => Arc::new(Float64Array::from(
                sums.iter()
                    .zip(&keep)
                    .map(|(&sum, &keep)| keep.then_some(sum))
                    .collect::<Vec<_>>(),
            )),
            SumAccum::Decimal(sums) => build_decimal128_array(
                &self.out_type,
                sums.iter()
                    .zip(&keep)
                    .map(|(&sum, &keep)| keep.then_some(sum))
                    .collect(),
            )?,
        };
        Ok(array)
    }
}

struct SumScalarState {
    inner: SumGroupState,
}

impl ScalarAggState for SumScalarState {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn consume(&mut self, input: &ExecValue, num_rows: usize) -> Result<()> {
        let group_ids = vec![0u32; num_rows];
        self.inner.consume(input, &group_ids)
    }

    fn merge(&mut self, other: Box<dyn ScalarAggState>) -> Result<()> {
        let other = downcast_merge_state::<Self>(other.into_any(), "sum")?;
        self.inner.merge(Box::new(other.inner), &[0])
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        self.inner.finalize()
    }
}
