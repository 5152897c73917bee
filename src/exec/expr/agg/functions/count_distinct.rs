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
//! Exact distinct count over the same comparable value encoding the grouper
//! uses for keys, so equality rules (NaN collapse, decoded dictionary
//! values) line up between grouping and distinct counting.

use std::any::Any;
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array};
use arrow::datatypes::DataType;
use hashbrown::HashSet;

use crate::common::error::{ExecError, Result};
use crate::exec::batch::ExecValue;
use crate::exec::expr::agg::kernel::{
    downcast_merge_state, AggregateFunction, FunctionKind, GroupAggState, HashAggKernel, Kernel,
    ScalarAggKernel, ScalarAggState,
};
use crate::exec::expr::agg::options::{AggOptions, CountMode, CountOptions};
use crate::exec::expr::agg::views::AnyView;
use crate::exec::grouper::key_column::{build_key_view, encode_value, key_column_from_type};

pub(in crate::exec::expr::agg) struct CountDistinctFunction {
    pub hash: bool,
}

impl AggregateFunction for CountDistinctFunction {
    fn name(&self) -> &str {
        if self.hash {
            "hash_count_distinct"
        } else {
            "count_distinct"
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

    fn dispatch_exact(&self, input_type: &DataType, options: &AggOptions) -> Result<Kernel> {
        // Distinct counting supports exactly the value types the grouper can
        // compare.
        key_column_from_type(input_type)?;
        let kernel = Arc::new(CountDistinctKernel {
            mode: options.as_count(self.name())?.mode,
            out_type: DataType::Int64,
        });
        Ok(if self.hash {
            Kernel::Hash(kernel)
        } else {
            Kernel::Scalar(kernel)
        })
    }
}

struct CountDistinctKernel {
    mode: CountMode,
    out_type: DataType,
}

impl ScalarAggKernel for CountDistinctKernel {
    fn out_type(&self) -> &DataType {
        &self.out_type
    }

    fn init(&self) -> Box<dyn ScalarAggState> {
        Box::new(CountDistinctScalarState {
            mode: self.mode,
            values: HashSet::new(),
            saw_null: false,
        })
    }
}

impl HashAggKernel for CountDistinctKernel {
    fn out_type(&self) -> &DataType {
        &self.out_type
    }

    fn init(&self) -> Box<dyn GroupAggState> {
        Box::new(CountDistinctGroupState {
            mode: self.mode,
            values: Vec::new(),
            saw_null: Vec::new(),
        })
    }
}

fn distinct_result(mode: CountMode, distinct: usize, saw_null: bool) -> i64 {
    let nulls = saw_null as i64;
    match mode {
        CountMode::OnlyValid => distinct as i64,
        CountMode::OnlyNull => nulls,
        CountMode::All => distinct as i64 + nulls,
    }
}

struct CountDistinctScalarState {
    mode: CountMode,
    values: HashSet<Box<[u8]>>,
    saw_null: bool,
}

impl ScalarAggState for CountDistinctScalarState {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn consume(&mut self, input: &ExecValue, num_rows: usize) -> Result<()> {
        let view = build_key_view(input.array())?;
        let nulls = AnyView::new(input);
        let mut scratch = Vec::new();
        for row in 0..num_rows {
            if nulls.is_null(row) {
                self.saw_null = true;
                continue;
            }
            scratch.clear();
            encode_value(&view, input.value_index(row), &mut scratch)?;
            if !self.values.contains(scratch.as_slice()) {
                self.values.insert(scratch.clone().into_boxed_slice());
            }
        }
        Ok(())
    }

    fn merge(&mut self, other: Box<dyn ScalarAggState>) -> Result<()> {
        let other = downcast_merge_state::<Self>(other.into_any(), "count_distinct")?;
        self.values.extend(other.values);
        self.saw_null |= other.saw_null;
        Ok(())
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        let result = distinct_result(self.mode, self.values.len(), self.saw_null);
        Ok(Arc::new(Int64Array::from(vec![result])))
    }
}

struct CountDistinctGroupState {
    mode: CountMode,
    values: Vec<HashSet<Box<[u8]>>>,
    saw_null: Vec<bool>,
}

impl GroupAggState for CountDistinctGroupState {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn resize(&mut self, num_groups: usize) -> Result<()> {
        if num_groups > self.values.len() {
            self.values.resize_with(num_groups, HashSet::new);
            self.saw_null.resize(num_groups, false);
        }
        Ok(())
    }

    fn consume(&mut self, input: &ExecValue, group_ids: &[u32]) -> Result<()> {
        let view = build_key_view(input.array())?;
        let nulls = AnyView::new(input);
        let mut scratch = Vec::new();
        for (row, &group_id) in group_ids.iter().enumerate() {
            let group = group_id as usize;
            if group >= self.values.len() {
                return Err(ExecError::invalid("count_distinct group id out of bounds"));
            }
            if nulls.is_null(row) {
                self.saw_null[group] = true;
                continue;
            }
            scratch.clear();
            encode_value(&view, input.value_index(row), &mut scratch)?;
            if !self.values[group].contains(scratch.as_slice()) {
                self.values[group].insert(scratch.clone().into_boxed_slice());
            }
        }
        Ok(())
    }

    fn merge(&mut self, other: Box<dyn GroupAggState>, transposition: &[u32]) -> Result<()> {
        let other = downcast_merge_state::<Self>(other.into_any(), "count_distinct")?;
        for (src, (set, saw_null)) in other
            .values
            .into_iter()
            .zip(other.saw_null)
            .enumerate()
        {
            let Some(&dst) = transposition.get(src) else {
                return Err(ExecError::invalid("count_distinct transposition too short"));
            };
            let dst = dst as usize;
            if dst >= self.values.len() {
                return Err(ExecError::invalid("count_distinct transposition out of bounds"));
            }
            self.values[dst].extend(set);
            self.saw_null[dst] |= saw_null;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        let results: Vec<i64> = self
            .values
            .iter()
            .zip(&self.saw_null)
            .map(|(set, &saw_null)| distinct_result(self.mode, set.len(), saw_null))
            .collect();
        Ok(Arc::new(Int64Array::from(results)))
    }
}
