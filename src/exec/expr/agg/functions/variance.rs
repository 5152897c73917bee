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
//! variance and stddev over Welford partials combined pairwise, so the
//! result is independent of how the input was partitioned across threads.

use std::any::Any;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::DataType;

use crate::common::error::{ExecError, Result};
use crate::exec::batch::ExecValue;
use crate::exec::expr::agg::kernel::{
    downcast_merge_state, AggregateFunction, FunctionKind, GroupAggState, HashAggKernel, Kernel,
    ScalarAggKernel, ScalarAggState,
};
use crate::exec::expr::agg::options::{AggOptions, VarianceOptions};
use crate::exec::expr::agg::views::NumericView;

pub(in crate::exec::expr::agg) struct VarianceFunction {
    pub hash: bool,
    pub stddev: bool,
}

impl AggregateFunction for VarianceFunction {
    fn name(&self) -> &str {
        match (self.stddev, self.hash) {
            (false, false) => "variance",
            (false, true) => "hash_variance",
            (true, false) => "stddev",
            (true, true) => "hash_stddev",
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
        AggOptions::Variance(VarianceOptions::default())
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
        let kernel = Arc::new(VarianceKernel {
            opts: options.as_variance(self.name())?,
            stddev: self.stddev,
            out_type: DataType::Float64,
        });
        Ok(if self.hash {
            Kernel::Hash(kernel)
        } else {
            Kernel::Scalar(kernel)
        })
    }
}

struct VarianceKernel {
    opts: VarianceOptions,
    stddev: bool,
    out_type: DataType,
}

impl ScalarAggKernel for VarianceKernel {
    fn out_type(&self) -> &DataType {
        &self.out_type
    }

    fn init(&self) -> Box<dyn ScalarAggState> {
        let mut inner = VarianceGroupState {
            opts: self.opts,
            stddev: self.stddev,
            partials: Vec::new(),
            saw_null: Vec::new(),
        };
        inner.resize(1).expect("variance state resize to one slot");
        Box::new(VarianceScalarState { inner })
    }
}

impl HashAggKernel for VarianceKernel {
    fn out_type(&self) -> &DataType {
        &self.out_type
    }

    fn init(&self) -> Box<dyn GroupAggState> {
        Box::new(VarianceGroupState {
            opts: self.opts,
            stddev: self.stddev,
            partials: Vec::new(),
            saw_null: Vec::new(),
        })
    }
}

/// Welford partial: count, running mean, sum of squared deviations.
#[derive(Clone, Copy, Default)]
struct VariancePartial {
    count: u64,
    mean: f64,
    m2: f64,
}

impl VariancePartial {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn combine(&mut self, other: &VariancePartial) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let total = self.count + other.count;
        let delta = other.mean - self.mean;
        self.m2 += other.m2 + delta * delta * (self.count as f64) * (other.count as f64)
            / total as f64;
        self.mean += delta * other.count as f64 / total as f64;
        self.count = total;
    }
}

struct VarianceGroupState {
    opts: VarianceOptions,
    stddev: bool,
    partials: Vec<VariancePartial>,
    saw_null: Vec<bool>,
}

impl GroupAggState for VarianceGroupState {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn resize(&mut self, num_groups: usize) -> Result<()> {
        if num_groups > self.partials.len() {
            self.partials.resize(num_groups, VariancePartial::default());
            self.saw_null.resize(num_groups, false);
        }
        Ok(())
    }

    fn consume(&mut self, input: &ExecValue, group_ids: &[u32]) -> Result<()> {
        let view = NumericView::new(input)?;
        for (row, &group_id) in group_ids.iter().enumerate() {
            let group = group_id as usize;
            if group >= self.partials.len() {
                return Err(ExecError::invalid("variance group id out of bounds"));
            }
            match view.value_at(row) {
                Some(value) => self.partials[group].push(value),
                None => self.saw_null[group] = true,
            }
        }
        Ok(())
    }

    fn merge(&mut self, other: Box<dyn GroupAggState>, transposition: &[u32]) -> Result<()> {
        let other = downcast_merge_state::<Self>(other.into_any(), "variance")?;
        for (src, &dst) in transposition.iter().enumerate() {
            let dst = dst as usize;
            if dst >= self.partials.len() {
                return Err(ExecError::invalid("variance transposition out of bounds"));
            }
            self.partials[dst].combine(&other.partials[src]);
            if other.saw_null[src] {
                self.saw_null[dst] = true;
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        let values: Vec<Option<f64>> = self
            .partials
            .iter()
            .zip(&self.saw_null)
            .map(|(partial, &saw_null)| {
                if !self.opts.skip_nulls && saw_null {
                    return None;
                }
                if partial.count < self.opts.min_count.max(1) as u64 {
                    return None;
                }
                let denominator = partial.count as f64 - self.opts.ddof as f64;
                if denominator <= 0.0 {
                    return None;
                }
                let variance = partial.m2 / denominator;
                Some(if self.stddev {
                    variance.sqrt()
                } else {
                    variance
                })
            })
            .collect();
        Ok(Arc::new(Float64Array::from(values)))
    }
}

struct VarianceScalarState {
    inner: VarianceGroupState,
}

impl ScalarAggState for VarianceScalarState {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn consume(&mut self, input: &ExecValue, num_rows: usize) -> Result<()> {
        let group_ids = vec![0u32; num_rows];
        self.inner.consume(input, &group_ids)
    }

    fn merge(&mut self, other: Box<dyn ScalarAggState>) -> Result<()> {
        let other = downcast_merge_state::<Self>(other.into_any(), "variance")?;
        self.inner.merge(Box::new(other.inner), &[0])
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        self.inner.finalize()
    }
}
