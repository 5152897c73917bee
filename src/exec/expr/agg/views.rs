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
//! Typed views over aggregate argument columns.
//!
//! Views widen the concrete arrow array behind an argument column to the
//! accumulator representation the kernels work in (i64 / u64 / f64 / bytes)
//! and hide broadcast-scalar columns: `value_at(row)` reads logical row
//! `row` whether the column is a full array or a length-1 scalar.

use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Date64Array, Decimal128Array,
    DurationMicrosecondArray, DurationMillisecondArray, DurationNanosecondArray,
    DurationSecondArray, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array,
    Int8Array, LargeBinaryArray, LargeStringArray, StringArray, Time32MillisecondArray,
    Time32SecondArray, Time64MicrosecondArray, Time64NanosecondArray, TimestampMicrosecondArray,
    TimestampMillisecondArray, TimestampNanosecondArray, TimestampSecondArray, UInt16Array,
    UInt32Array, UInt64Array, UInt8Array,
};
use arrow::buffer::NullBuffer;
use arrow::datatypes::{DataType, TimeUnit};

use crate::common::error::{ExecError, Result};
use crate::exec::batch::ExecValue;

fn downcast<'a, T: 'static>(array: &'a ArrayRef, what: &str) -> Result<&'a T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| ExecError::invalid(format!("failed to downcast to {what}")))
}

macro_rules! view_struct {
    ($name:ident, $repr:ident) => {
        pub(super) struct $name<'a> {
            repr: $repr<'a>,
            broadcast: bool,
        }

        impl<'a> $name<'a> {
            fn index(&self, row: usize) -> usize {
                if self.broadcast {
                    0
                } else {
                    row
                }
            }
        }
    };
}

/// Signed integers and the i64-representable temporal types.
pub(super) enum IntRepr<'a> {
    Int8(&'a Int8Array),
    Int16(&'a Int16Array),
    Int32(&'a Int32Array),
    Int64(&'a Int64Array),
    Date32(&'a Date32Array),
    Date64(&'a Date64Array),
    Time32Second(&'a Time32SecondArray),
    Time32Millisecond(&'a Time32MillisecondArray),
    Time64Microsecond(&'a Time64MicrosecondArray),
    Time64Nanosecond(&'a Time64NanosecondArray),
    TimestampSecond(&'a TimestampSecondArray),
    TimestampMillisecond(&'a TimestampMillisecondArray),
    TimestampMicrosecond(&'a TimestampMicrosecondArray),
    TimestampNanosecond(&'a TimestampNanosecondArray),
    DurationSecond(&'a DurationSecondArray),
    DurationMillisecond(&'a DurationMillisecondArray),
    DurationMicrosecond(&'a DurationMicrosecondArray),
    DurationNanosecond(&'a DurationNanosecondArray),
}

view_struct!(IntView, IntRepr);

impl<'a> IntView<'a> {
    pub(super) fn new(value: &'a ExecValue) -> Result<Self> {
        let array = value.array();
        let repr = match array.data_type() {
            DataType::Int8 => IntRepr::Int8(downcast(array, "Int8Array")?),
            DataType::Int16 => IntRepr::Int16(downcast(array, "Int16Array")?),
            DataType::Int32 => IntRepr::Int32(downcast(array, "Int32Array")?),
            DataType::Int64 => IntRepr::Int64(downcast(array, "Int64Array")?),
            DataType::Date32 => IntRepr::Date32(downcast(array, "Date32Array")?),
            DataType::Date64 => IntRepr::Date64(downcast(array, "Date64Array")?),
            DataType::Time32(TimeUnit::Second) => {
                IntRepr::Time32Second(downcast(array, "Time32SecondArray")?)
            }
            DataType::Time32(TimeUnit::Millisecond) => {
                IntRepr::Time32Millisecond(downcast(array, "Time32MillisecondArray")?)
            }
            DataType::Time64(TimeUnit::Microsecond) => {
                IntRepr::Time64Microsecond(downcast(array, "Time64MicrosecondArray")?)
            }
            DataType::Time64(TimeUnit::Nanosecond) => {
                IntRepr::Time64Nanosecond(downcast(array, "Time64NanosecondArray")?)
            }
            DataType::Timestamp(TimeUnit::Second, _) => {
                IntRepr::TimestampSecond(downcast(array, "TimestampSecondArray")?)
            }
            DataType::Timestamp(TimeUnit::Millisecond, _) => {
                IntRepr::TimestampMillisecond(downcast(array, "TimestampMillisecondArray")?)
            }
            DataType::Timestamp(TimeUnit::Microsecond, _) => {
                IntRepr::TimestampMicrosecond(downcast(array, "TimestampMicrosecondArray")?)
            }
            DataType::Timestamp(TimeUnit::Nanosecond, _) => {
                IntRepr::TimestampNanosecond(downcast(array, "TimestampNanosecondArray")?)
            }
            DataType::Duration(TimeUnit::Second) => {
                IntRepr::DurationSecond(downcast(array, "DurationSecondArray")?)
            }
            DataType::Duration(TimeUnit::Millisecond) => {
                IntRepr::DurationMillisecond(downcast(array, "DurationMillisecondArray")?)
            }
            DataType::Duration(TimeUnit::Microsecond) => {
                IntRepr::DurationMicrosecond(downcast(array, "DurationMicrosecondArray")?)
            }
            DataType::Duration(TimeUnit::Nanosecond) => {
                IntRepr::DurationNanosecond(downcast(array, "DurationNanosecondArray")?)
            }
            other => {
                return Err(ExecError::invalid(format!(
                    "unsupported int input type: {other:?}"
                )))
            }
        };
        Ok(Self {
            repr,
            broadcast: value.is_scalar(),
        })
    }

    pub(super) fn value_at(&self, row: usize) -> Option<i64> {
        let row = self.index(row);
        match &self.repr {
            IntRepr::Int8(arr) => (!arr.is_null(row)).then(|| arr.value(row) as i64),
            IntRepr::Int16(arr) => (!arr.is_null(row)).then(|| arr.value(row) as i64),
            IntRepr::Int32(arr) => (!arr.is_null(row)).then(|| arr.value(row) as i64),
            IntRepr::Int64(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            IntRepr::Date32(arr) => (!arr.is_null(row)).then(|| arr.value(row) as i64),
            IntRepr::Date64(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            IntRepr::Time32Second(arr) => (!arr.is_null(row)).then(|| arr.value(row) as i64),
            IntRepr::Time32Millisecond(arr) => (!arr.is_null(row)).then(|| arr.value(row) as i64),
            IntRepr::Time64Microsecond(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            IntRepr::Time64Nanosecond(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            IntRepr::TimestampSecond(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            IntRepr::TimestampMillisecond(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            IntRepr::TimestampMicrosecond(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            IntRepr::TimestampNanosecond(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            IntRepr::DurationSecond(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            IntRepr::DurationMillisecond(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            IntRepr::DurationMicrosecond(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            IntRepr::DurationNanosecond(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
        }
    }
}

pub(super) enum UIntRepr<'a> {
    UInt8(&'a UInt8Array),
    UInt16(&'a UInt16Array),
    UInt32(&'a UInt32Array),
    UInt64(&'a UInt64Array),
}

view_struct!(UIntView, UIntRepr);

impl<'a> UIntView<'a> {
    pub(super) fn new(value: &'a ExecValue) -> Result<Self> {
        let array = value.array();
        let repr = match array.data_type() {
            DataType::UInt8 => UIntRepr::UInt8(downcast(array, "UInt8Array")?),
            DataType::UInt16 => UIntRepr::UInt16(downcast(array, "UInt16Array")?),
            DataType::UInt32 => UIntRepr::UInt32(downcast(array, "UInt32Array")?),
            DataType::UInt64 => UIntRepr::UInt64(downcast(array, "UInt64Array")?),
            other => {
                return Err(ExecError::invalid(format!(
                    "unsupported uint input type: {other:?}"
                )))
            }
        };
        Ok(Self {
            repr,
            broadcast: value.is_scalar(),
        })
    }

    pub(super) fn value_at(&self, row: usize) -> Option<u64> {
        let row = self.index(row);
        match &self.repr {
            UIntRepr::UInt8(arr) => (!arr.is_null(row)).then(|| arr.value(row) as u64),
            UIntRepr::UInt16(arr) => (!arr.is_null(row)).then(|| arr.value(row) as u64),
            UIntRepr::UInt32(arr) => (!arr.is_null(row)).then(|| arr.value(row) as u64),
            UIntRepr::UInt64(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
        }
    }
}

pub(super) enum FloatRepr<'a> {
    Float32(&'a Float32Array),
    Float64(&'a Float64Array),
}

view_struct!(FloatView, FloatRepr);

impl<'a> FloatView<'a> {
    pub(super) fn new(value: &'a ExecValue) -> Result<Self> {
        let array = value.array();
        let repr = match array.data_type() {
            DataType::Float32 => FloatRepr::Float32(downcast(array, "Float32Array")?),
            DataType::Float64 => FloatRepr::Float64(downcast(array, "Float64Array")?),
            other => {
                return Err(ExecError::invalid(format!(
                    "unsupported float input type: {other:?}"
                )))
            }
        };
        Ok(Self {
            repr,
            broadcast: value.is_scalar(),
        })
    }

    pub(super) fn value_at(&self, row: usize) -> Option<f64> {
        let row = self.index(row);
        match &self.repr {
            FloatRepr::Float32(arr) => (!arr.is_null(row)).then(|| arr.value(row) as f64),
            FloatRepr::Float64(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
        }
    }
}

/// Any numeric input widened to f64 (mean, variance, stddev).
pub(super) enum NumericView<'a> {
    Int(IntView<'a>),
    UInt(UIntView<'a>),
    Float(FloatView<'a>),
}

impl<'a> NumericView<'a> {
    pub(super) fn new(value: &'a ExecValue) -> Result<Self> {
        match value.data_type() {
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
                Ok(NumericView::Int(IntView::new(value)?))
            }
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
                Ok(NumericView::UInt(UIntView::new(value)?))
            }
            DataType::Float32 | DataType::Float64 => Ok(NumericView::Float(FloatView::new(value)?)),
            other => Err(ExecError::invalid(format!(
                "unsupported numeric input type: {other:?}"
            ))),
        }
    }

    pub(super) fn value_at(&self, row: usize) -> Option<f64> {
        match self {
            NumericView::Int(view) => view.value_at(row).map(|v| v as f64),
            NumericView::UInt(view) => view.value_at(row).map(|v| v as f64),
            NumericView::Float(view) => view.value_at(row),
        }
    }
}

pub(super) struct BooleanView<'a> {
    array: &'a BooleanArray,
    broadcast: bool,
}

impl<'a> BooleanView<'a> {
    pub(super) fn new(value: &'a ExecValue) -> Result<Self> {
        Ok(Self {
            array: downcast(value.array(), "BooleanArray")?,
            broadcast: value.is_scalar(),
        })
    }

    pub(super) fn value_at(&self, row: usize) -> Option<bool> {
        let row = if self.broadcast { 0 } else { row };
        (!self.array.is_null(row)).then(|| self.array.value(row))
    }
}

pub(super) enum BytesRepr<'a> {
    Utf8(&'a StringArray),
    LargeUtf8(&'a LargeStringArray),
    Binary(&'a BinaryArray),
    LargeBinary(&'a LargeBinaryArray),
}

view_struct!(BytesView, BytesRepr);

impl<'a> BytesView<'a> {
    pub(super) fn new(value: &'a ExecValue) -> Result<Self> {
        let array = value.array();
        let repr = match array.data_type() {
            DataType::Utf8 => BytesRepr::Utf8(downcast(array, "StringArray")?),
            DataType::LargeUtf8 => BytesRepr::LargeUtf8(downcast(array, "LargeStringArray")?),
            DataType::Binary => BytesRepr::Binary(downcast(array, "BinaryArray")?),
            DataType::LargeBinary => BytesRepr::LargeBinary(downcast(array, "LargeBinaryArray")?),
            other => {
                return Err(ExecError::invalid(format!(
                    "unsupported bytes input type: {other:?}"
                )))
            }
        };
        Ok(Self {
            repr,
            broadcast: value.is_scalar(),
        })
    }

    pub(super) fn value_at(&self, row: usize) -> Option<&[u8]> {
        let row = self.index(row);
        match &self.repr {
            BytesRepr::Utf8(arr) => (!arr.is_null(row)).then(|| arr.value(row).as_bytes()),
            BytesRepr::LargeUtf8(arr) => (!arr.is_null(row)).then(|| arr.value(row).as_bytes()),
            BytesRepr::Binary(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            BytesRepr::LargeBinary(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
        }
    }
}

pub(super) struct Decimal128View<'a> {
    array: &'a Decimal128Array,
    broadcast: bool,
}

impl<'a> Decimal128View<'a> {
    pub(super) fn new(value: &'a ExecValue) -> Result<Self> {
        Ok(Self {
            array: downcast(value.array(), "Decimal128Array")?,
            broadcast: value.is_scalar(),
        })
    }

    pub(super) fn value_at(&self, row: usize) -> Option<i128> {
        let row = if self.broadcast { 0 } else { row };
        (!self.array.is_null(row)).then(|| self.array.value(row))
    }
}

/// Type-agnostic view used by the count family: only logical nullness.
pub(super) struct AnyView {
    nulls: Option<NullBuffer>,
    broadcast: bool,
}

impl AnyView {
    pub(super) fn new(value: &ExecValue) -> Self {
        Self {
            nulls: value.array().logical_nulls(),
            broadcast: value.is_scalar(),
        }
    }

    pub(super) fn is_null(&self, row: usize) -> bool {
        let row = if self.broadcast { 0 } else { row };
        self.nulls.as_ref().map(|n| n.is_null(row)).unwrap_or(false)
    }
}
