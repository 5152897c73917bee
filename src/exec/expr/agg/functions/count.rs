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

use arrow::array::{ArrayRef, Int64Array};
use arrow::datatypes::DataType;

use crate::common::error::{ExecError, Result};
use crate::exec::batch::ExecValue;
use crate::exec::expr::agg::kernel::{
    downcast_merge_state, AggregateFunction, FunctionKind, GroupAggState, HashAggKernel, Kernel,
    ScalarAggKernel, ScalarAggState,
};
use crate::exec::expr::agg::options::{AggOptions, CountMode, CountOptions};
use crate::exec::expr::agg::views::AnyView;

pub(in crate::exec::expr::agg) struct CountFunction {
    pub hash: bool,
}

impl AggregateFunction for CountFunction {
    fn name(&self) -> &str {
        if self.hash {
            "hash_count"
        } else {
            "count"
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
        AggOptions::Count(CountOptions::default())
    }

    fn dispatch_exact(&self, _input_type: &DataType, options: &AggOptions) -> Result<Kernel> {
        let mode = options.as_count(self.name())?.mode;
        let kernel = Arc::new(CountKernel {
            mode,
            out_type: DataType::Int64,
        });
        Ok(if self.hash {
            Kernel::Hash(kernel)
        } else {
            Kernel::Scalar(kernel)
        })
    }
}

struct CountKernel {
    mode: CountMode,
    out_type: DataType,
}

impl ScalarAggKernel for CountKernel {
    fn out_type(&self) -> &DataType {
        &self.out_type
    }

    fn init(&self) -> Box<dyn ScalarAggState> {
        Box::new(CountScalarState {
            mode: self.mode,
            count: 0,
        })
    }
}

impl HashAggKernel for CountKernel {
    fn out_type(&self) -> &DataType {
        &self.out_type
    }

    fn init(&self) -> Box<dyn GroupAggState> {
        Box::new(CountGroupState {
            mode: self.mode,
            counts: Vec::new(),
        })
    }
}

fn counts_row(mode: CountMode, is_null: bool) -> bool {
    match mode {
        CountMode::OnlyValid => !is_null,
        CountMode::OnlyNull => is_null,
        CountMode::All => true,
    }
}

struct CountScalarState {
    mode: CountMode,
    count: i64,
}

impl ScalarAggState for CountScalarState {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn consume(&mut self, input: &ExecValue, num_rows: usize) -> Result<()> {
        let view = AnyView::new(input);
        for row in 0..num_rows {
            if counts_row(self.mode, view.is_null(row)) {
                self.count += 1;
            }
        }
        Ok(())
    }

    fn merge(&mut self, other: Box<dyn ScalarAggState>) -> Result<()> {
        let other = downcast_merge_state::<Self>(other.into_any(), "count")?;
        self.count += other.count;
        Ok(())
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        Ok(Arc::new(Int64Array::from(vec![self.count])))
    }
}

struct CountGroupState {
    mode: CountMode,
    counts: Vec<i64>,
}

impl GroupAggState for CountGroupState {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn resize(&mut self, num_groups: usize) -> Result<()> {
        if num_groups > self.counts.len() {
            self.counts.resize(num_groups, 0);
        }
        Ok(())
    }

    fn consume(&mut self, input: &ExecValue, group_ids: &[u32]) -> Result<()> {
        let view = AnyView::new(input);
        for (row, &group_id) in group_ids.iter().enumerate() {
            if counts_row(self.mode, view.is_null(row)) {
                let slot = self
                    .counts
                    .get_mut(group_id as usize)
                    .ok_or_else(|| ExecError::invalid("count group id out of bounds"))?;
                *slot += 1;
            }
        }
        Ok(())
    }

    fn merge(&mut self, other: Box<dyn GroupAggState>, transposition: &[u32]) -> Result<()> {
        let other = downcast_merge_state::<Self>(other.into_any(), "count")?;
        for (src, &dst) in transposition.iter().enumerate() {
            let count = other.counts.get(src).copied().unwrap_or(0);
            let slot = self
                .counts
                .get_mut(dst as usize)
                .ok_or_else(|| ExecError::invalid("count transposition out of bounds"))?;
            *slot += count;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        Ok(Arc::new(Int64Array::from(std::mem::take(&mut self.counts))))
    }
}
