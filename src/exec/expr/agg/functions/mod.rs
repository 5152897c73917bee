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
//! Built-in aggregate function implementations.

mod bool_agg;
mod count;
mod count_distinct;
mod mean;
mod min_max;
mod sum;
mod variance;

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryBuilder, Date32Array, Date64Array, Decimal128Array, DurationMicrosecondArray,
    DurationMillisecondArray, DurationNanosecondArray, DurationSecondArray, Float32Array,
    Float64Array, Int16Array, Int32Array, Int64Array, Int8Array, LargeBinaryBuilder,
    LargeStringBuilder, StringBuilder, Time32MillisecondArray, Time32SecondArray,
    Time64MicrosecondArray, Time64NanosecondArray, TimestampMicrosecondArray,
    TimestampMillisecondArray, TimestampNanosecondArray, TimestampSecondArray, UInt16Array,
    UInt32Array, UInt64Array, UInt8Array,
};
use arrow::datatypes::{DataType, TimeUnit};

use crate::common::error::{ExecError, Result};
use crate::exec::expr::agg::registry::FunctionRegistry;

pub(super) use bool_agg::BoolAggFunction;
pub(super) use count::CountFunction;
pub(super) use count_distinct::CountDistinctFunction;
pub(super) use mean::MeanFunction;
pub(super) use min_max::{MinMaxEmit, MinMaxFunction};
pub(super) use sum::{SumFunction, SumOp};
pub(super) use variance::VarianceFunction;

pub(crate) fn register_builtins(registry: &mut FunctionRegistry) {
    for hash in [false, true] {
        registry.register(Arc::new(CountFunction { hash }));
        registry.register(Arc::new(CountDistinctFunction { hash }));
        registry.register(Arc::new(SumFunction {
            hash,
            op: SumOp::Add,
        }));
        registry.register(Arc::new(SumFunction {
            hash,
            op: SumOp::Mul,
        }));
        registry.register(Arc::new(MeanFunction { hash }));
        registry.register(Arc::new(MinMaxFunction {
            hash,
            emit: MinMaxEmit::Min,
        }));
        registry.register(Arc::new(MinMaxFunction {
            hash,
            emit: MinMaxEmit::Max,
        }));
        registry.register(Arc::new(MinMaxFunction {
            hash,
            emit: MinMaxEmit::Both,
        }));
        registry.register(Arc::new(BoolAggFunction { hash, all: false }));
        registry.register(Arc::new(BoolAggFunction { hash, all: true }));
        registry.register(Arc::new(VarianceFunction {
            hash,
            stddev: false,
        }));
        registry.register(Arc::new(VarianceFunction { hash, stddev: true }));
    }
}

/// Rebuilds a concrete integer/temporal array from widened i64 slots.
pub(super) fn build_int_backed_array(
    data_type: &DataType,
    values: Vec<Option<i64>>,
) -> Result<ArrayRef> {
    let array: ArrayRef = match data_type {
        DataType::Int8 => Arc::new(Int8Array::from(
            values
                .into_iter()
                .map(|v| v.map(|v| v as i8))
                .collect::<Vec<_>>(),
        )),
        DataType::Int16 => Arc::new(Int16Array::from(
            values
                .into_iter()
                .map(|v| v.map(|v| v as i16))
                .collect::<Vec<_>>(),
        )),
        DataType::Int32 => Arc::new(Int32Array::from(
            values
                .into_iter()
                .map(|v| v.map(|v| v as i32))
                .collect::<Vec<_>>(),
        )),
        DataType::Int64 => Arc::new(Int64Array::from(values)),
        DataType::Date32 => Arc::new(Date32Array::from(
            values
                .into_iter()
                .map(|v| v.map(|v| v as i32))
                .collect::<Vec<_>>(),
        )),
        DataType::Date64 => Arc::new(Date64Array::from(values)),
        DataType::Time32(TimeUnit::Second) => Arc::new(Time32SecondArray::from(
            values
                .into_iter()
                .map(|v| v.map(|v| v as i32))
                .collect::<Vec<_>>(),
        )),
        DataType::Time32(TimeUnit::Millisecond) => Arc::new(Time32MillisecondArray::from(
            values
                .into_iter()
                .map(|v| v.map(|v| v as i32))
                .collect::<Vec<_>>(),
        )),
        DataType::Time64(TimeUnit::Microsecond) => {
            Arc::new(Time64MicrosecondArray::from(values))
        }
        DataType::Time64(TimeUnit::Nanosecond) => Arc::new(Time64NanosecondArray::from(values)),
        DataType::Timestamp(TimeUnit::Second, tz) => {
            Arc::new(TimestampSecondArray::from(values).with_timezone_opt(tz.clone()))
        }
        DataType::Timestamp(TimeUnit::Millisecond, tz) => {
            Arc::new(TimestampMillisecondArray::from(values).with_timezone_opt(tz.clone()))
        }
        DataType::Timestamp(TimeUnit::Microsecond, tz) => {
            Arc::new(TimestampMicrosecondArray::from(values).with_timezone_opt(tz.clone()))
        }
        DataType::Timestamp(TimeUnit::Nanosecond, tz) => {
            Arc::new(TimestampNanosecondArray::from(values).with_timezone_opt(tz.clone()))
        }
        DataType::Duration(TimeUnit::Second) => Arc::new(DurationSecondArray::from(values)),
        DataType::Duration(TimeUnit::Millisecond) => {
            Arc::new(DurationMillisecondArray::from(values))
        }
        DataType::Duration(TimeUnit::Microsecond) => {
            Arc::new(DurationMicrosecondArray::from(values))
        }
        DataType::Duration(TimeUnit::Nanosecond) => Arc::new(DurationNanosecondArray::from(values)),
        other => {
            return Err(ExecError::invalid(format!(
                "cannot build int-backed output of type {other:?}"
            )))
        }
    };
    Ok(array)
}

pub(super) fn build_uint_backed_array(
    data_type: &DataType,
    values: Vec<Option<u64>>,
) -> Result<ArrayRef> {
    let array: ArrayRef = match data_type {
        DataType::UInt8 => Arc::new(UInt8Array::from(
            values
                .into_iter()
                .map(|v| v.map(|v| v as u8))
                .collect::<Vec<_>>(),
        )),
        DataType::UInt16 => Arc::new(UInt16Array::from(
            values
                .into_iter()
                .map(|v| v.map(|v| v as u16))
                .collect::<Vec<_>>(),
        )),
        DataType::UInt32 => Arc::new(UInt32Array::from(
            values
                .into_iter()
                .map(|v| v.map(|v| v as u32))
                .collect::<Vec<_>>(),
        )),
        DataType::UInt64 => Arc::new(UInt64Array::from(values)),
        other => {
            return Err(ExecError::invalid(format!(
                "cannot build uint-backed output of type {other:?}"
            )))
        }
    };
    Ok(array)
}

pub(super) fn build_float_backed_array(
    data_type: &DataType,
    values: Vec<Option<f64>>,
) -> Result<ArrayRef> {
    let array: ArrayRef = match data_type {
        DataType::Float32 => Arc::new(Float32Array::from(
            values
                .into_iter()
                .map(|v| v.map(|v| v as f32))
                .collect::<Vec<_>>(),
        )),
        DataType::Float64 => Arc::new(Float64Array::from(values)),
        other => {
            return Err(ExecError::invalid(format!(
                "cannot build float-backed output of type {other:?}"
            )))
        }
    };
    Ok(array)
}

pub(super) fn build_bytes_backed_array(
    data_type: &DataType,
    values: Vec<Option<Vec<u8>>>,
) -> Result<ArrayRef> {
    fn as_str(bytes: &[u8]) -> Result<&str> {
        std::str::from_utf8(bytes)
            .map_err(|_| ExecError::invalid("aggregate output is not valid utf8"))
    }
    let array: ArrayRef = match data_type {
        DataType::Utf8 => {
            let mut builder = StringBuilder::new();
            for value in &values {
                match value {
                    Some(bytes) => builder.append_value(as_str(bytes)?),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::LargeUtf8 => {
            let mut builder = LargeStringBuilder::new();
            for value in &values {
                match value {
                    Some(bytes) => builder.append_value(as_str(bytes)?),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Binary => {
            let mut builder = BinaryBuilder::new();
            for value in &values {
                match value {
                    Some(bytes) => builder.append_value(bytes),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::LargeBinary => {
            let mut builder = LargeBinaryBuilder::new();
            for value in &values {
                match value {
                    Some(bytes) => builder.append_value(bytes),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        other => {
            return Err(ExecError::invalid(format!(
                "cannot build bytes-backed output of type {other:?}"
            )))
        }
    };
    Ok(array)
}

pub(super) fn build_decimal128_array(
    data_type: &DataType,
    values: Vec<Option<i128>>,
) -> Result<ArrayRef> {
    let DataType::Decimal128(precision, scale) = data_type else {
        return Err(ExecError::invalid(format!(
            "cannot build decimal output of type {data_type:?}"
        )));
    };
    let array = Decimal128Array::from(values).with_precision_and_scale(*precision, *scale)?;
    Ok(Arc::new(array))
}

/// Null-result rule shared by the scalar-options family: a slot is null when
/// it saw fewer than `min_count` non-null values, or any null while
/// `skip_nulls` is off.
pub(super) fn scalar_options_keep(
    count: u64,
    saw_null: bool,
    skip_nulls: bool,
    min_count: u32,
) -> bool {
    if !skip_nulls && saw_null {
        return false;
    }
    count >= min_count as u64
}
