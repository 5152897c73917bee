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
//! any and all with Kleene null semantics when `skip_nulls` is off.

use std::any::Any;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray};
use arrow::datatypes::DataType;

use crate::common::error::{ExecError, Result};
use crate::exec::batch::ExecValue;
use crate::exec::expr::agg::kernel::{
    downcast_merge_state, AggregateFunction, FunctionKind, GroupAggState, HashAggKernel, Kernel,
    ScalarAggKernel, ScalarAggState,
};
use crate::exec::expr::agg::options::{AggOptions, ScalarAggregateOptions};
use crate::exec::expr::agg::views::BooleanView;

pub(in crate::exec::expr::agg) struct BoolAggFunction {
    pub hash: bool,
    pub all: bool,
}

impl AggregateFunction for BoolAggFunction {
    fn name(&self) -> &str {
        match (self.all, self.hash) {
            (false, false) => "any",
            (false, true) => "hash_any",
            (true, false) => "all",
            (true, true) => "hash_all",
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
        if input_type != &DataType::Boolean {
            return Err(ExecError::not_implemented(format!(
                "{} has no kernel for input type {input_type:?}",
                self.name()
            )));
        }
        let kernel = Arc::new(BoolAggKernel {
            all: self.all,
            opts: options.as_scalar(self.name())?,
            out_type: DataType::Boolean,
        });
        Ok(if self.hash {
            Kernel::Hash(kernel)
        } else {
            Kernel::Scalar(kernel)
        })
    }
}

struct BoolAggKernel {
    all: bool,
    opts: ScalarAggregateOptions,
    out_type: DataType,
}

impl ScalarAggKernel for BoolAggKernel {
    fn out_type(&self) -> &DataType {
        &self.out_type
    }

    fn init(&self) -> Box<dyn ScalarAggState> {
        let mut inner = BoolAggGroupState {
            all: self.all,
            opts: self.opts,
            seen_true: Vec::new(),
            seen_false: Vec::new(),
            counts: Vec::new(),
            saw_null: Vec::new(),
        };
        inner.resize(1).expect("bool agg state resize to one slot");
        Box::new(BoolAggScalarState { inner })
    }
}

impl HashAggKernel for BoolAggKernel {
    fn out_type(&self) -> &DataType {
        &self.out_type
    }

    fn init(&self) -> Box<dyn GroupAggState> {
        Box::new(BoolAggGroupState {
            all: self.all,
            opts: self.opts,
            seen_true: Vec::new(),
            seen_false: Vec::new(),
            counts: Vec::new(),
            saw_null: Vec::new(),
        })
    }
}

struct BoolAggGroupState {
    all: bool,
    opts: ScalarAggregateOptions,
    seen_true: Vec<bool>,
    seen_false: Vec<bool>,
    counts: Vec<u64>,
    saw_null: Vec<bool>,
}

impl GroupAggState for BoolAggGroupState {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn resize(&mut self, num_groups: usize) -> Result<()> {
        if num_groups > self.counts.len() {
            self.seen_true.resize(num_groups, false);
            self.seen_false.resize(num_groups, false);
            self.counts.resize(num_groups, 0);
            self.saw_null.resize(num_groups, false);
        }
        Ok(())
    }

    fn consume(&mut self, input: &ExecValue, group_ids: &[u32]) -> Result<()> {
        let view = BooleanView::new(input)?;
        for (row, &group_id) in group_ids.iter().enumerate() {
            let group = group_id as usize;
            if group >= self.counts.len() {
                return Err(ExecError::invalid("bool agg group id out of bounds"));
            }
            match view.value_at(row) {
                Some(true) => {
                    self.seen_true[group] = true;
                    self.counts[group] += 1;
                }
                Some(false) => {
                    self.seen_false[group] = true;
                    self.counts[group] += 1;
                }
                None => self.saw_null[group] = true,
            }
        }
        Ok(())
    }

    fn merge(&mut self, other: Box<dyn GroupAggState>, transposition: &[u32]) -> Result<()> {
        let other = downcast_merge_state::<Self>(other.into_any(), "bool agg")?;
        for (src, &dst) in transposition.iter().enumerate() {
            let dst = dst as usize;
            if dst >= self.counts.len() {
                return Err(ExecError::invalid("bool agg transposition out of bounds"));
            }
            self.seen_true[dst] |= other.seen_true[src];
            self.seen_false[dst] |= other.seen_false[src];
            self.counts[dst] += other.counts[src];
            self.saw_null[dst] |= other.saw_null[src];
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        let values: Vec<Option<bool>> = (0..self.counts.len())
            .map(|group| {
                if self.counts[group] < self.opts.min_count as u64 {
                    return None;
                }
                // Kleene: a decided value wins; an undecided group with nulls
                // is null unless nulls are skipped.
                let decided = if self.all {
                    self.seen_false[group].then_some(false)
                } else {
                    self.seen_true[group].then_some(true)
                };
                if let Some(value) = decided {
                    return Some(value);
                }
                if self.saw_null[group] && !self.opts.skip_nulls {
                    return None;
                }
                Some(self.all)
            })
            .collect();
        Ok(Arc::new(BooleanArray::from(values)))
    }
}

struct BoolAggScalarState {
    inner: BoolAggGroupState,
}

impl ScalarAggState for BoolAggScalarState {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn consume(&mut self, input: &ExecValue, num_rows: usize) -> Result<()> {
        let group_ids = vec![0u32; num_rows];
        self.inner.consume(input, &group_ids)
    }

    fn merge(&mut self, other: Box<dyn ScalarAggState>) -> Result<()> {
        let other = downcast_merge_state::<Self>(other.into_any(), "bool agg")?;
        self.inner.merge(Box::new(other.inner), &[0])
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        self.inner.finalize()
    }
}
