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
//! min, max and the combined min_max kernel (struct-of-both output).
//!
//! One state tracks both extremes; the emit mode only affects finalisation.
//! Floats order by `total_cmp`, so runs over differently partitioned input
//! agree on the result.

use std::any::Any;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, StructArray};
use arrow::datatypes::{DataType, Field, Fields};

use crate::common::error::{ExecError, Result};
use crate::exec::batch::ExecValue;
use crate::exec::expr::agg::functions::{
    build_bytes_backed_array, build_decimal128_array, build_float_backed_array,
    build_int_backed_array, build_uint_backed_array, scalar_options_keep,
};
use crate::exec::expr::agg::kernel::{
    downcast_merge_state, AggregateFunction, FunctionKind, GroupAggState, HashAggKernel, Kernel,
    ScalarAggKernel, ScalarAggState,
};
use crate::exec::expr::agg::options::{AggOptions, ScalarAggregateOptions};
use crate::exec::expr::agg::views::{
    BooleanView, BytesView, Decimal128View, FloatView, IntView, UIntView,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(in crate::exec::expr::agg) enum MinMaxEmit {
    Min,
    Max,
    Both,
}

pub(in crate::exec::expr::agg) struct MinMaxFunction {
    pub hash: bool,
    pub emit: MinMaxEmit,
}

#[derive(Clone, Copy)]
enum MinMaxClass {
    Int,
    UInt,
    Float,
    Boolean,
    Bytes,
    Decimal,
}

fn class_for(input_type: &DataType) -> Option<MinMaxClass> {
    match input_type {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::Date32
        | DataType::Date64
        | DataType::Time32(_)
        | DataType::Time64(_)
        | DataType::Timestamp(_, _)
        | DataType::Duration(_) => Some(MinMaxClass::Int),
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
            Some(MinMaxClass::UInt)
        }
        DataType::Float32 | DataType::Float64 => Some(MinMaxClass::Float),
        DataType::Boolean => Some(MinMaxClass::Boolean),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Binary | DataType::LargeBinary => {
            Some(MinMaxClass::Bytes)
        }
        DataType::Decimal128(_, _) => Some(MinMaxClass::Decimal),
        _ => None,
    }
}

fn struct_out_type(input_type: &DataType) -> DataType {
    DataType::Struct(Fields::from(vec![
        Field::new("min", input_type.clone(), true),
        Field::new("max", input_type.clone(), true),
    ]))
}

impl AggregateFunction for MinMaxFunction {
    fn name(&self) -> &str {
        match (self.emit, self.hash) {
            (MinMaxEmit::Min, false) => "min",
            (MinMaxEmit::Min, true) => "hash_min",
            (MinMaxEmit::Max, false) => "max",
            (MinMaxEmit::Max, true) => "hash_max",
            (MinMaxEmit::Both, false) => "min_max",
            (MinMaxEmit::Both, true) => "hash_min_max",
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
        let Some(class) = class_for(input_type) else {
            return Err(ExecError::not_implemented(format!(
                "{} has no kernel for input type {input_type:?}",
                self.name()
            )));
        };
        let out_type = match self.emit {
            MinMaxEmit::Both => struct_out_type(input_type),
            _ => input_type.clone(),
        };
        let kernel = Arc::new(MinMaxKernel {
            emit: self.emit,
            class,
            opts: options.as_scalar(self.name())?,
            input_type: input_type.clone(),
            out_type,
        });
        Ok(if self.hash {
            Kernel::Hash(kernel)
        } else {
            Kernel::Scalar(kernel)
        })
    }
}

struct MinMaxKernel {
    emit: MinMaxEmit,
    class: MinMaxClass,
    opts: ScalarAggregateOptions,
    input_type: DataType,
    out_type: DataType,
}

impl MinMaxKernel {
    fn group_state(&self) -> MinMaxGroupState {
        let values = match self.class {
            MinMaxClass::Int => MinMaxValues::Int {
                mins: Vec::new(),
                maxes: Vec::new(),
            },
            MinMaxClass::UInt => MinMaxValues::UInt {
                mins: Vec::new(),
                maxes: Vec::new(),
            },
            MinMaxClass::Float => MinMaxValues::Float {
                mins: Vec::new(),
                maxes: Vec::new(),
            },
            MinMaxClass::Boolean => MinMaxValues::Boolean {
                mins: Vec::new(),
                maxes: Vec::new(),
            },
            MinMaxClass::Bytes => MinMaxValues::Bytes {
                mins: Vec::new(),
                maxes: Vec::new(),
            },
            MinMaxClass::Decimal => MinMaxValues::Decimal {
                mins: Vec::new(),
                maxes: Vec::new(),
            },
        };
        MinMaxGroupState {
            emit: self.emit,
            opts: self.opts,
            input_type: self.input_type.clone(),
            values,
            counts: Vec::new(),
            saw_null: Vec::new(),
        }
    }
}

impl ScalarAggKernel for MinMaxKernel {
    fn out_type(&self) -> &DataType {
        &self.out_type
    }

    fn init(&self) -> Box<dyn ScalarAggState> {
        let mut inner = self.group_state();
        inner.resize(1).expect("min_max state resize to one slot");
        Box::new(MinMaxScalarState { inner })
    }
}

impl HashAggKernel for MinMaxKernel {
    fn out_type(&self) -> &DataType {
        &self.out_type
    }

    fn init(&self) -> Box<dyn GroupAggState> {
        Box::new(self.group_state())
    }
}

enum MinMaxValues {
    Int {
        mins: Vec<Option<i64>>,
        maxes: Vec<Option<i64>>,
    },
    UInt {
        mins: Vec<Option<u64>>,
        maxes: Vec<Option<u64>>,
    },
    Float {
        mins: Vec<Option<f64>>,
        maxes: Vec<Option<f64>>,
    },
    Boolean {
        mins: Vec<Option<bool>>,
        maxes: Vec<Option<bool>>,
    },
    Bytes {
        mins: Vec<Option<Vec<u8>>>,
        maxes: Vec<Option<Vec<u8>>>,
    },
    Decimal {
        mins: Vec<Option<i128>>,
        maxes: Vec<Option<i128>>,
    },
}

impl MinMaxValues {
    fn resize(&mut self, num_groups: usize) {
        match self {
            MinMaxValues::Int { mins, maxes } => {
                mins.resize(num_groups, None);
                maxes.resize(num_groups, None);
            }
            MinMaxValues::UInt { mins, maxes } => {
                mins.resize(num_groups, None);
                maxes.resize(num_groups, None);
            }
            MinMaxValues::Float { mins, maxes } => {
                mins.resize(num_groups, None);
                maxes.resize(num_groups, None);
            }
            MinMaxValues::Boolean { mins, maxes } => {
                mins.resize(num_groups, None);
                maxes.resize(num_groups, None);
            }
            MinMaxValues::Bytes { mins, maxes } => {
                mins.resize(num_groups, None);
                maxes.resize(num_groups, None);
            }
            MinMaxValues::Decimal { mins, maxes } => {
                mins.resize(num_groups, None);
                maxes.resize(num_groups, None);
            }
        }
    }
}

fn update_extremes<T: Clone>(
    mins: &mut [Option<T>],
    maxes: &mut [Option<T>],
    group: usize,
    value: T,
    less: impl Fn(&T, &T) -> bool,
) {
    match &mut mins[group] {
        Some(current) => {
            if less(&value, current) {
                *current = value.clone();
            }
        }
        slot @ None => *slot = Some(value.clone()),
    }
    match &mut maxes[group] {
        Some(current) => {
            if less(current, &value) {
                *current = value;
            }
        }
        slot @ None => *slot = Some(value),
    }
}

fn float_less(a: &f64, b: &f64) -> bool {
    a.total_cmp(b) == std::cmp::Ordering::Less
}

fn bool_less(a: &bool, b: &bool) -> bool {
    !*a && *b
}

struct MinMaxGroupState {
    emit: MinMaxEmit,
    opts: ScalarAggregateOptions,
    input_type: DataType,
    values: MinMaxValues,
    counts: Vec<u64>,
    saw_null: Vec<bool>,
}

impl MinMaxGroupState {
    fn bounds_check(&self, group: usize) -> Result<()> {
        if group >= self.counts.len() {
            return Err(ExecError::invalid("min_max group id out of bounds"));
        }
        Ok(())
    }

    fn keep(&self, group: usize) -> bool {
        scalar_options_keep(
            self.counts[group],
            self.saw_null[group],
            self.opts.skip_nulls,
            self.opts.min_count,
        )
    }

    fn build_output(&mut self) -> Result<(ArrayRef, ArrayRef)> {
        let keep: Vec<bool> = (0..self.counts.len()).map(|g| self.keep(g)).collect();
        fn masked<T: Clone>(values: &[Option<T>], keep: &[bool]) -> Vec<Option<T>> {
            values
                .iter()
                .zip(keep)
                .map(|(v, &keep)| if keep { v.clone() } else { None })
                .collect()
        }
        let (mins, maxes): (ArrayRef, ArrayRef) = match &self.values {
            MinMaxValues::Int { mins, maxes } => (
                build_int_backed_array(&self.input_type, masked(mins, &keep))?,
                build_int_backed_array(&self.input_type, masked(maxes, &keep))?,
            ),
            MinMaxValues::UInt { mins, maxes } => (
                build_uint_backed_array(&self.input_type, masked(mins, &keep))?,
                build_uint_backed_array(&self.input_type, masked(maxes, &keep))?,
            ),
            MinMaxValues::Float { mins, maxes } => (
                build_float_backed_array(&self.input_type, masked(mins, &keep))?,
                build_float_backed_array(&self.input_type, masked(maxes, &keep))?,
            ),
            MinMaxValues::Boolean { mins, maxes } => (
                Arc::new(BooleanArray::from(masked(mins, &keep))) as ArrayRef,
                Arc::new(BooleanArray::from(masked(maxes, &keep))) as ArrayRef,
            ),
            MinMaxValues::Bytes { mins, maxes } => (
                build_bytes_backed_array(&self.input_type, masked(mins, &keep))?,
                build_bytes_backed_array(&self.input_type, masked(maxes, &keep))?,
            ),
            MinMaxValues::Decimal { mins, maxes } => (
                build_decimal128_array(&self.input_type, masked(mins, &keep))?,
                build_decimal128_array(&self.input_type, masked(maxes, &keep))?,
            ),
        };
        Ok((mins, maxes))
    }
}

impl GroupAggState for MinMaxGroupState {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn resize(&mut self, num_groups: usize) -> Result<()> {
        if num_groups > self.counts.len() {
            self.values.resize(num_groups);
            self.counts.resize(num_groups, 0);
            self.saw_null.resize(num_groups, false);
        }
        Ok(())
    }

    fn consume(&mut self, input: &ExecValue, group_ids: &[u32]) -> Result<()> {
        match &mut self.values {
            MinMaxValues::Int { mins, maxes } => {
                let view = IntView::new(input)?;
                for (row, &group_id) in group_ids.iter().enumerate() {
                    let group = group_id as usize;
                    if group >= self.counts.len() {
                        return Err(ExecError::invalid("min_max group id out of bounds"));
                    }
                    match view.value_at(row) {
                        Some(value) => {
                            update_extremes(mins, maxes, group, value, |a, b| a < b);
                            self.counts[group] += 1;
                        }
                        None => self.saw_null[group] = true,
                    }
                }
            }
            MinMaxValues::UInt { mins, maxes } => {
                let view = UIntView::new(input)?;
                for (row, &group_id) in group_ids.iter().enumerate() {
                    let group = group_id as usize;
                    if group >= self.counts.len() {
                        return Err(ExecError::invalid("min_max group id out of bounds"));
                    }
                    match view.value_at(row) {
                        Some(value) => {
                            update_extremes(mins, maxes, group, value, |a, b| a < b);
                            self.counts[group] += 1;
                        }
                        None => self.saw_null[group] = true,
                    }
                }
            }
            MinMaxValues::Float { mins, maxes } => {
                let view = FloatView::new(input)?;
                for (row, &group_id) in group_ids.iter().enumerate() {
                    let group = group_id as usize;
                    if group >= self.counts.len() {
                        return Err(ExecError::invalid("min_max group id out of bounds"));
                    }
                    match view.value_at(row) {
                        Some(value) => {
                            update_extremes(mins, maxes, group, value, float_less);
                            self.counts[group] += 1;
                        }
                        None => self.saw_null[group] = true,
                    }
                }
            }
            MinMaxValues::Boolean { mins, maxes } => {
                let view = BooleanView::new(input)?;
                for (row, &group_id) in group_ids.iter().enumerate() {
                    let group = group_id as usize;
                    if group >= self.counts.len() {
                        return Err(ExecError::invalid("min_max group id out of bounds"));
                    }
                    match view.value_at(row) {
                        Some(value) => {
                            update_extremes(mins, maxes, group, value, bool_less);
                            self.counts[group] += 1;
                        }
                        None => self.saw_null[group] = true,
                    }
                }
            }
            MinMaxValues::Bytes { mins, maxes } => {
                let view = BytesView::new(input)?;
                for (row, &group_id) in group_ids.iter().enumerate() {
                    let group = group_id as usize;
                    if group >= self.counts.len() {
                        return Err(ExecError::invalid("min_max group id out of bounds"));
                    }
                    match view.value_at(row) {
                        Some(value) => {
                            update_extremes(mins, maxes, group, value.to_vec(), |a, b| a < b);
                            self.counts[group] += 1;
                        }
                        None => self.saw_null[group] = true,
                    }
                }
            }
            MinMaxValues::Decimal { mins, maxes } => {
                let view = Decimal128View::new(input)?;
                for (row, &group_id) in group_ids.iter().enumerate() {
                    let group = group_id as usize;
                    if group >= self.counts.len() {
                        return Err(ExecError::invalid("min_max group id out of bounds"));
                    }
                    match view.value_at(row) {
                        Some(value) => {
                            update_extremes(mins, maxes, group, value, |a, b| a < b);
                            self.counts[group] += 1;
                        }
                        None => self.saw_null[group] = true,
                    }
                }
            }
        }
        Ok(())
    }

    fn merge(&mut self, other: Box<dyn GroupAggState>, transposition: &[u32]) -> Result<()> {
        let other = downcast_merge_state::<Self>(other.into_any(), "min_max")?;
        for (src, &dst) in transposition.iter().enumerate() {
            let dst = dst as usize;
            self.bounds_check(dst)?;
            match (&mut self.values, &other.values) {
                (
                    MinMaxValues::Int { mins, maxes },
                    MinMaxValues::Int {
                        mins: other_mins,
                        maxes: other_maxes,
                    },
                ) => {
                    if let Some(value) = other_mins[src] {
                        update_extremes(mins, maxes, dst, value, |a, b| a < b);
                    }
                    if let Some(value) = other_maxes[src] {
                        update_extremes(mins, maxes, dst, value, |a, b| a < b);
                    }
                }
                (
                    MinMaxValues::UInt { mins, maxes },
                    MinMaxValues::UInt {
                        mins: other_mins,
                        maxes: other_maxes,
                    },
                ) => {
                    if let Some(value) = other_mins[src] {
                        update_extremes(mins, maxes, dst, value, |a, b| a < b);
                    }
                    if let Some(value) = other_maxes[src] {
                        update_extremes(mins, maxes, dst, value, |a, b| a < b);
                    }
                }
                (
                    MinMaxValues::Float { mins, maxes },
                    MinMaxValues::Float {
                        mins: other_mins,
                        maxes: other_maxes,
                    },
                ) => {
                    if let Some(value) = other_mins[src] {
                        update_extremes(mins, maxes, dst, value, float_less);
                    }
                    if let Some(value) = other_maxes[src] {
                        update_extremes(mins, maxes, dst, value, float_less);
                    }
                }
                (
                    MinMaxValues::Boolean { mins, maxes },
                    MinMaxValues::Boolean {
                        mins: other_mins,
                        maxes: other_maxes,
                    },
                ) => {
                    if let Some(value) = other_mins[src] {
                        update_extremes(mins, maxes, dst, value, bool_less);
                    }
                    if let Some(value) = other_maxes[src] {
                        update_extremes(mins, maxes, dst, value, bool_less);
                    }
                }
                (
                    MinMaxValues::Bytes { mins, maxes },
                    MinMaxValues::Bytes {
                        mins: other_mins,
                        maxes: other_maxes,
                    },
                ) => {
                    if let Some(value) = &other_mins[src] {
                        update_extremes(mins, maxes, dst, value.clone(), |a, b| a < b);
                    }
                    if let Some(value) = &other_maxes[src] {
                        update_extremes(mins, maxes, dst, value.clone(), |a, b| a < b);
                    }
                }
                (
                    MinMaxValues::Decimal { mins, maxes },
                    MinMaxValues::Decimal {
                        mins: other_mins,
                        maxes: other_maxes,
                    },
                ) => {
                    if let Some(value) = other_mins[src] {
                        update_extremes(mins, maxes, dst, value, |a, b| a < b);
                    }
                    if let Some(value) = other_maxes[src] {
                        update_extremes(mins, maxes, dst, value, |a, b| a < b);
                    }
                }
                _ => return Err(ExecError::invalid("min_max value class mismatch")),
            }
            self.counts[dst] += other.counts[src];
            if other.saw_null[src] {
                self.saw_null[dst] = true;
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        let (mins, maxes) = self.build_output()?;
        let array: ArrayRef = match self.emit {
            MinMaxEmit::Min => mins,
            MinMaxEmit::Max => maxes,
            MinMaxEmit::Both => {
                let fields = Fields::from(vec![
                    Field::new("min", self.input_type.clone(), true),
                    Field::new("max", self.input_type.clone(), true),
                ]);
                Arc::new(StructArray::try_new(fields, vec![mins, maxes], None)?)
            }
        };
        Ok(array)
    }
}

struct MinMaxScalarState {
    inner: MinMaxGroupState,
}

impl ScalarAggState for MinMaxScalarState {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn consume(&mut self, input: &ExecValue, num_rows: usize) -> Result<()> {
        let group_ids = vec![0u32; num_rows];
        self.inner.consume(input, &group_ids)
    }

    fn merge(&mut self, other: Box<dyn ScalarAggState>) -> Result<()> {
        let other = downcast_merge_state::<Self>(other.into_any(), "min_max")?;
        self.inner.merge(Box::new(other.inner), &[0])
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        self.inner.finalize()
    }
}
