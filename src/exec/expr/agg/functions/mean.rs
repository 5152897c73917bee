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
use std::any::Any;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::DataType;

use crate::common::error::{ExecError, Result};
use crate::exec::batch::ExecValue;
use crate::exec::expr::agg::functions::scalar_options_keep;
use crate::exec::expr::agg::kernel::{
    downcast_merge_state, AggregateFunction, FunctionKind, GroupAggState, HashAggKernel, Kernel,
    ScalarAggKernel, ScalarAggState,
};
use crate::exec::expr::agg::options::{AggOptions, ScalarAggregateOptions};
use crate::exec::expr::agg::views::NumericView;

pub(in crate::exec::expr::agg) struct MeanFunction {
    pub hash: bool,
}

impl AggregateFunction for MeanFunction {
    fn name(&self) -> &str {
        if self.hash {
            "hash_mean"
        } else {
            "mean"
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
        let supported = matches!(
            input_type,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
                | DataType::Float32
                | DataType::Float64
        );
        if !supported {
            return Err(ExecError::not_implemented(format!(
                "{} has no kernel for input type {input_type:?}",
                self.name()
            )));
        }
        let kernel = Arc::new(MeanKernel {
            opts: options.as_scalar(self.name())?,
            out_type: DataType::Float64,
        });
        Ok(if self.hash {
            Kernel::Hash(kernel)
        } else {
            Kernel::Scalar(kernel)
        })
    }
}

struct MeanKernel {
    opts: ScalarAggregateOptions,
    out_type: DataType,
}

impl ScalarAggKernel for MeanKernel {
    fn out_type(&self) -> &DataType {
        &self.out_type
    }

    fn init(&self) -> Box<dyn ScalarAggState> {
        let mut inner = MeanGroupState {
            opts: self.opts,
            sums: Vec::new(),
            counts: Vec::new(),
            saw_null: Vec::new(),
        };
        inner.resize(1).expect("mean state resize to one slot");
        Box::new(MeanScalarState { inner })
    }
}

impl HashAggKernel for MeanKernel {
    fn out_type(&self) -> &DataType {
        &self.out_type
    }

    fn init(&self) -> Box<dyn GroupAggState> {
        Box::new(MeanGroupState {
            opts: self.opts,
            sums: Vec::new(),
            counts: Vec::new(),
            saw_null: Vec::new(),
        })
    }
}

struct MeanGroupState {
    opts: ScalarAggregateOptions,
    sums: Vec<f64>,
    counts: Vec<u64>,
    saw_null: Vec<bool>,
}

impl GroupAggState for MeanGroupState {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn resize(&mut self, num_groups: usize) -> Result<()> {
        if num_groups > self.counts.len() {
            self.sums.resize(num_groups, 0.0);
            self.counts.resize(num_groups, 0);
            self.saw_null.resize(num_groups, false);
        }
        Ok(())
    }

    fn consume(&mut self, input: &ExecValue, group_ids: &[u32]) -> Result<()> {
        let view = NumericView::new(input)?;
        for (row, &group_id) in group_ids.iter().enumerate() {
            let group = group_id as usize;
            if group >= self.counts.len() {
                return Err(ExecError::invalid("mean group id out of bounds"));
            }
            match view.value_at(row) {
                Some(value) => {
                    self.sums[group] += value;
                    self.counts[group] += 1;
                }
                None => self.saw_null[group] = true,
            }
        }
        Ok(())
    }

    fn merge(&mut self, other: Box<dyn GroupAggState>, transposition: &[u32]) -> Result<()> {
        let other = downcast_merge_state::<Self>(other.into_any(), "mean")?;
        for (src, &dst) in transposition.iter().enumerate() {
            let dst = dst as usize;
            if dst >= self.counts.len() {
                return Err(ExecError::invalid("mean transposition out of bounds"));
            }
            self.sums[dst] += other.sums[src];
            self.counts[dst] += other.counts[src];
            if other.saw_null[src] {
                self.saw_null[dst] = true;
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        let values: Vec<Option<f64>> = self
            .sums
            .iter()
            .zip(&self.counts)
            .zip(&self.saw_null)
            .map(|((&sum, &count), &saw_null)| {
                let keep = scalar_options_keep(
                    count,
                    saw_null,
                    self.opts.skip_nulls,
                    self.opts.min_count.max(1),
                );
                keep.then(|| sum / count as f64)
            })
            .collect();
        Ok(Arc::new(Float64Array::from(values)))
    }
}

struct MeanScalarState {
    inner: MeanGroupState,
}

impl ScalarAggState for MeanScalarState {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn consume(&mut self, input: &ExecValue, num_rows: usize) -> Result<()> {
        let group_ids = vec![0u32; num_rows];
        self.inner.consume(input, &group_ids)
    }

    fn merge(&mut self, other: Box<dyn ScalarAggState>) -> Result<()> {
        let other = downcast_merge_state::<Self>(other.into_any(), "mean")?;
        self.inner.merge(Box::new(other.inner), &[0])
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        self.inner.finalize()
    }
}
