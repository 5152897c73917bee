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
//! Per-key-column value views, row encoding and per-group storage.
//!
//! Responsibilities:
//! - Classifies key column types into the encodings the grouper supports and
//!   rejects nested types.
//! - Encodes one row of one key column into comparable bytes (tag byte plus
//!   canonicalised value bytes).
//! - Stores the first-seen key value of every group and rebuilds the unique
//!   key arrays from that storage.

use std::sync::Arc;

use arrow::array::cast::AsArray;
use arrow::array::{
    make_array, new_empty_array, new_null_array, AnyDictionaryArray, Array, ArrayData, ArrayRef,
    BinaryArray, BinaryBuilder, BooleanArray, LargeBinaryArray, LargeBinaryBuilder,
    LargeStringArray, LargeStringBuilder, PrimitiveArray, StringArray, StringBuilder,
};
use arrow::datatypes::{
    ArrowDictionaryKeyType, ArrowNativeType, DataType, Int16Type, Int32Type, Int64Type, Int8Type,
    IntervalUnit, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow_buffer::{Buffer, NullBuffer};

use crate::common::error::{ExecError, Result};
use crate::exec::grouper::hash::{canonical_f16_bits, canonical_f32_bits, canonical_f64_bits};

/// Byte width of the single values buffer backing a fixed-width key type.
pub(crate) fn fixed_byte_width(data_type: &DataType) -> Option<usize> {
    match data_type {
        DataType::Int8 | DataType::UInt8 => Some(1),
        DataType::Int16 | DataType::UInt16 | DataType::Float16 => Some(2),
        DataType::Int32
        | DataType::UInt32
        | DataType::Float32
        | DataType::Date32
        | DataType::Time32(_)
        | DataType::Interval(IntervalUnit::YearMonth) => Some(4),
        DataType::Int64
        | DataType::UInt64
        | DataType::Float64
        | DataType::Date64
        | DataType::Time64(_)
        | DataType::Timestamp(_, _)
        | DataType::Duration(_)
        | DataType::Interval(IntervalUnit::DayTime) => Some(8),
        DataType::Interval(IntervalUnit::MonthDayNano) | DataType::Decimal128(_, _) => Some(16),
        DataType::Decimal256(_, _) => Some(32),
        DataType::FixedSizeBinary(width) => Some(*width as usize),
        _ => None,
    }
}

fn dict_key(dict: &dyn AnyDictionaryArray, row: usize) -> Option<usize> {
    if dict.keys().is_null(row) {
        None
    } else {
        Some(dict.normalized_keys()[row])
    }
}

fn unsupported_key_error(data_type: &DataType) -> ExecError {
    ExecError::not_implemented(format!("grouping by key type {data_type:?} is not implemented"))
}

/// Batch-scoped view over one key column, used for row encoding.
pub(crate) enum KeyArrayView<'a> {
    Null,
    Boolean(&'a BooleanArray),
    Fixed(FixedKeyView),
    Varlen(VarlenKeyView<'a>),
    Dictionary {
        dict: &'a dyn AnyDictionaryArray,
        values: Box<KeyArrayView<'a>>,
    },
}

pub(crate) struct FixedKeyView {
    data: ArrayData,
    data_type: DataType,
    width: usize,
}

impl FixedKeyView {
    fn is_null(&self, row: usize) -> bool {
        self.data.is_null(row)
    }

    fn value_bytes(&self, row: usize) -> &[u8] {
        let start = (self.data.offset() + row) * self.width;
        &self.data.buffers()[0].as_slice()[start..start + self.width]
    }
}

pub(crate) enum VarlenKeyView<'a> {
    Utf8(&'a StringArray),
    LargeUtf8(&'a LargeStringArray),
    Binary(&'a BinaryArray),
    LargeBinary(&'a LargeBinaryArray),
}

impl<'a> VarlenKeyView<'a> {
    fn is_null(&self, row: usize) -> bool {
        match self {
            VarlenKeyView::Utf8(arr) => arr.is_null(row),
            VarlenKeyView::LargeUtf8(arr) => arr.is_null(row),
            VarlenKeyView::Binary(arr) => arr.is_null(row),
            VarlenKeyView::LargeBinary(arr) => arr.is_null(row),
        }
    }

    fn value_bytes(&self, row: usize) -> &[u8] {
        match self {
            VarlenKeyView::Utf8(arr) => arr.value(row).as_bytes(),
            VarlenKeyView::LargeUtf8(arr) => arr.value(row).as_bytes(),
            VarlenKeyView::Binary(arr) => arr.value(row),
            VarlenKeyView::LargeBinary(arr) => arr.value(row),
        }
    }
}

pub(crate) fn build_key_view(array: &ArrayRef) -> Result<KeyArrayView<'_>> {
    let data_type = array.data_type();
    let view = match data_type {
        DataType::Null => KeyArrayView::Null,
        DataType::Boolean => {
            let arr = array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(|| ExecError::invalid("failed to downcast to BooleanArray"))?;
            KeyArrayView::Boolean(arr)
        }
        DataType::Utf8 => {
            let arr = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| ExecError::invalid("failed to downcast to StringArray"))?;
            KeyArrayView::Varlen(VarlenKeyView::Utf8(arr))
        }
        DataType::LargeUtf8 => {
            let arr = array
                .as_any()
                .downcast_ref::<LargeStringArray>()
                .ok_or_else(|| ExecError::invalid("failed to downcast to LargeStringArray"))?;
            KeyArrayView::Varlen(VarlenKeyView::LargeUtf8(arr))
        }
        DataType::Binary => {
            let arr = array
                .as_any()
                .downcast_ref::<BinaryArray>()
                .ok_or_else(|| ExecError::invalid("failed to downcast to BinaryArray"))?;
            KeyArrayView::Varlen(VarlenKeyView::Binary(arr))
        }
        DataType::LargeBinary => {
            let arr = array
                .as_any()
                .downcast_ref::<LargeBinaryArray>()
                .ok_or_else(|| ExecError::invalid("failed to downcast to LargeBinaryArray"))?;
            KeyArrayView::Varlen(VarlenKeyView::LargeBinary(arr))
        }
        DataType::Dictionary(_, _) => {
            let dict = array
                .as_any_dictionary_opt()
                .ok_or_else(|| ExecError::invalid("failed to downcast to DictionaryArray"))?;
            let values = build_key_view(dict.values())?;
            if matches!(values, KeyArrayView::Dictionary { .. }) {
                return Err(unsupported_key_error(data_type));
            }
            KeyArrayView::Dictionary {
                dict,
                values: Box::new(values),
            }
        }
        other => match fixed_byte_width(other) {
            Some(width) => KeyArrayView::Fixed(FixedKeyView {
                data: array.to_data(),
                data_type: other.clone(),
                width,
            }),
            None => return Err(unsupported_key_error(other)),
        },
    };
    Ok(view)
}

fn push_canonical_fixed_bytes(data_type: &DataType, raw: &[u8], out: &mut Vec<u8>) {
    match data_type {
        DataType::Float16 => {
            let bits = u16::from_le_bytes([raw[0], raw[1]]);
            out.extend_from_slice(&canonical_f16_bits(bits).to_le_bytes());
        }
        DataType::Float32 => {
            let bits = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            out.extend_from_slice(&canonical_f32_bits(f32::from_bits(bits)).to_le_bytes());
        }
        DataType::Float64 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(raw);
            let bits = u64::from_le_bytes(bytes);
            out.extend_from_slice(&canonical_f64_bits(f64::from_bits(bits)).to_le_bytes());
        }
        _ => out.extend_from_slice(raw),
    }
}

/// Appends the comparable encoding of one row: a tag byte, then value bytes.
///
/// Dictionary rows encode as the decoded value, with the index-null and
/// value-null cases kept distinct.
pub(crate) fn encode_value(view: &KeyArrayView<'_>, row: usize, out: &mut Vec<u8>) -> Result<()> {
    match view {
        KeyArrayView::Null => out.push(0),
        KeyArrayView::Boolean(arr) => {
            if arr.is_null(row) {
                out.push(0);
            } else {
                out.push(1);
                out.push(arr.value(row) as u8);
            }
        }
        KeyArrayView::Fixed(fixed) => {
            if fixed.is_null(row) {
                out.push(0);
            } else {
                out.push(1);
                push_canonical_fixed_bytes(&fixed.data_type, fixed.value_bytes(row), out);
            }
        }
        KeyArrayView::Varlen(varlen) => {
            if varlen.is_null(row) {
                out.push(0);
            } else {
                out.push(1);
                let bytes = varlen.value_bytes(row);
                let len = u32::try_from(bytes.len())
                    .map_err(|_| ExecError::invalid("group key value length overflow"))?;
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(bytes);
            }
        }
        KeyArrayView::Dictionary { dict, values } => match dict_key(*dict, row) {
            None => out.push(0),
            Some(index) => {
                out.push(1);
                encode_value(values, index, out)?;
            }
        },
    }
    Ok(())
}

/// Per-group storage of one key column's values, in group-id order.
pub(crate) enum KeyColumn {
    Null {
        len: usize,
    },
    Boolean {
        values: Vec<Option<bool>>,
    },
    Fixed {
        data_type: DataType,
        width: usize,
        values: Vec<u8>,
        validity: Vec<bool>,
    },
    Varlen {
        data_type: DataType,
        values: Vec<Option<Vec<u8>>>,
    },
    Dictionary {
        data_type: DataType,
        dictionary: Option<ArrayRef>,
        keys: Vec<Option<usize>>,
    },
}

pub(crate) fn key_column_from_type(data_type: &DataType) -> Result<KeyColumn> {
    let column = match data_type {
        DataType::Null => KeyColumn::Null { len: 0 },
        DataType::Boolean => KeyColumn::Boolean { values: Vec::new() },
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Binary | DataType::LargeBinary => {
            KeyColumn::Varlen {
                data_type: data_type.clone(),
                values: Vec::new(),
            }
        }
        DataType::Dictionary(key_type, value_type) => {
            if !matches!(
                key_type.as_ref(),
                DataType::Int8
                    | DataType::Int16
                    | DataType::Int32
                    | DataType::Int64
                    | DataType::UInt8
                    | DataType::UInt16
                    | DataType::UInt32
                    | DataType::UInt64
            ) {
                return Err(unsupported_key_error(data_type));
            }
            // The decoded value must itself be groupable, and not nested in
            // another dictionary.
            match value_type.as_ref() {
                DataType::Dictionary(_, _) => return Err(unsupported_key_error(data_type)),
                other => {
                    key_column_from_type(other)?;
                }
            }
            KeyColumn::Dictionary {
                data_type: data_type.clone(),
                dictionary: None,
                keys: Vec::new(),
            }
        }
        other => match fixed_byte_width(other) {
            Some(width) => KeyColumn::Fixed {
                data_type: other.clone(),
                width,
                values: Vec::new(),
                validity: Vec::new(),
            },
            None => return Err(unsupported_key_error(other)),
        },
    };
    Ok(column)
}

impl KeyColumn {
    /// Captures (or checks) batch-level state before rows are encoded.
    ///
    /// Dictionary keys must share one dictionary across every consumed batch;
    /// unifying differing dictionaries is not supported.
    pub(crate) fn prepare_batch(&mut self, view: &KeyArrayView<'_>) -> Result<()> {
        if let KeyColumn::Dictionary { dictionary, .. } = self {
            let KeyArrayView::Dictionary { dict, .. } = view else {
                return Err(ExecError::invalid("dictionary key column view mismatch"));
            };
            match dictionary {
                None => *dictionary = Some(dict.values().clone()),
                Some(stored) => {
                    let same_buffers = Arc::ptr_eq(stored, dict.values());
                    if !same_buffers && stored.to_data() != dict.values().to_data() {
                        return Err(ExecError::not_implemented(
                            "unifying differing dictionaries between key batches",
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Stores the key value of a freshly inserted group.
    pub(crate) fn push_group(&mut self, view: &KeyArrayView<'_>, row: usize) -> Result<()> {
        match (self, view) {
            (KeyColumn::Null { len }, KeyArrayView::Null) => *len += 1,
            (KeyColumn::Boolean { values }, KeyArrayView::Boolean(arr)) => {
                values.push((!arr.is_null(row)).then(|| arr.value(row)));
            }
            (
                KeyColumn::Fixed {
                    width,
                    values,
                    validity,
                    ..
                },
                KeyArrayView::Fixed(fixed),
            ) => {
                if fixed.is_null(row) {
                    values.extend(std::iter::repeat(0u8).take(*width));
                    validity.push(false);
                } else {
                    values.extend_from_slice(fixed.value_bytes(row));
                    validity.push(true);
                }
            }
            (KeyColumn::Varlen { values, .. }, KeyArrayView::Varlen(varlen)) => {
                values.push((!varlen.is_null(row)).then(|| varlen.value_bytes(row).to_vec()));
            }
            (KeyColumn::Dictionary { keys, .. }, KeyArrayView::Dictionary { dict, .. }) => {
                keys.push(dict_key(*dict, row));
            }
            _ => return Err(ExecError::invalid("group key column and view mismatch")),
        }
        Ok(())
    }

    /// Rebuilds the unique-key array, one slot per group, in group-id order.
    pub(crate) fn to_array(&self) -> Result<ArrayRef> {
        match self {
            KeyColumn::Null { len } => Ok(new_null_array(&DataType::Null, *len)),
            KeyColumn::Boolean { values } => Ok(Arc::new(BooleanArray::from(values.clone()))),
            KeyColumn::Fixed {
                data_type,
                width: _,
                values,
                validity,
            } => {
                let nulls = if validity.iter().all(|valid| *valid) {
                    None
                } else {
                    Some(NullBuffer::from(validity.clone()).buffer().clone())
                };
                let data = ArrayData::try_new(
                    data_type.clone(),
                    validity.len(),
                    nulls,
                    0,
                    vec![Buffer::from(values.clone())],
                    vec![],
                )?;
                Ok(make_array(data))
            }
            KeyColumn::Varlen { data_type, values } => build_varlen_array(data_type, values),
            KeyColumn::Dictionary {
                data_type,
                dictionary,
                keys,
            } => {
                let Some(dictionary) = dictionary else {
                    return Ok(new_empty_array(data_type));
                };
                let DataType::Dictionary(key_type, _) = data_type else {
                    return Err(ExecError::invalid("dictionary key column type mismatch"));
                };
                build_dictionary_array(key_type, keys, dictionary.clone())
            }
        }
    }
}

fn build_varlen_array(data_type: &DataType, values: &[Option<Vec<u8>>]) -> Result<ArrayRef> {
    fn as_str(bytes: &[u8]) -> Result<&str> {
        std::str::from_utf8(bytes).map_err(|_| ExecError::invalid("group key is not valid utf8"))
    }
    match data_type {
        DataType::Utf8 => {
            let mut builder = StringBuilder::new();
            for value in values {
                match value {
                    Some(bytes) => builder.append_value(as_str(bytes)?),
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::LargeUtf8 => {
            let mut builder = LargeStringBuilder::new();
            for value in values {
                match value {
                    Some(bytes) => builder.append_value(as_str(bytes)?),
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Binary => {
            let mut builder = BinaryBuilder::new();
            for value in values {
                match value {
                    Some(bytes) => builder.append_value(bytes),
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::LargeBinary => {
            let mut builder = LargeBinaryBuilder::new();
            for value in values {
                match value {
                    Some(bytes) => builder.append_value(bytes),
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        other => Err(ExecError::invalid(format!(
            "varlen group key type mismatch: {other:?}"
        ))),
    }
}

fn build_typed_dictionary<K: ArrowDictionaryKeyType>(
    keys: &[Option<usize>],
    values: ArrayRef,
) -> Result<ArrayRef> {
    let mut builder = Vec::with_capacity(keys.len());
    for key in keys {
        match key {
            None => builder.push(None),
            Some(index) => {
                let native = K::Native::from_usize(*index)
                    .ok_or_else(|| ExecError::invalid("dictionary key index overflow"))?;
                builder.push(Some(native));
            }
        }
    }
    let keys: PrimitiveArray<K> = builder.into_iter().collect();
    let array = arrow::array::DictionaryArray::<K>::try_new(keys, values)?;
    Ok(Arc::new(array))
}

fn build_dictionary_array(
    key_type: &DataType,
    keys: &[Option<usize>],
    values: ArrayRef,
) -> Result<ArrayRef> {
    match key_type {
        DataType::Int8 => build_typed_dictionary::<Int8Type>(keys, values),
        DataType::Int16 => build_typed_dictionary::<Int16Type>(keys, values),
        DataType::Int32 => build_typed_dictionary::<Int32Type>(keys, values),
        DataType::Int64 => build_typed_dictionary::<Int64Type>(keys, values),
        DataType::UInt8 => build_typed_dictionary::<UInt8Type>(keys, values),
        DataType::UInt16 => build_typed_dictionary::<UInt16Type>(keys, values),
        DataType::UInt32 => build_typed_dictionary::<UInt32Type>(keys, values),
        DataType::UInt64 => build_typed_dictionary::<UInt64Type>(keys, values),
        other => Err(ExecError::invalid(format!(
            "dictionary index type mismatch: {other:?}"
        ))),
    }
}
