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
//! Columnar batch model flowing between exec nodes.
//!
//! A batch is an ordered tuple of equal-length columns. Each column is either
//! a full array or a broadcast scalar (a length-1 array logically repeated
//! over every row, null scalars included).

use arrow::array::ArrayRef;
use arrow::datatypes::{DataType, Schema};

use crate::common::error::{ExecError, Result};

/// One column of an [`ExecBatch`].
#[derive(Clone, Debug)]
pub enum ExecValue {
    Array(ArrayRef),
    /// Length-1 array broadcast over the batch's row count.
    Scalar(ArrayRef),
}

impl ExecValue {
    pub fn data_type(&self) -> &DataType {
        self.array().data_type()
    }

    pub fn array(&self) -> &ArrayRef {
        match self {
            ExecValue::Array(array) | ExecValue::Scalar(array) => array,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, ExecValue::Scalar(_))
    }

    /// Physical row backing logical row `row`.
    pub fn value_index(&self, row: usize) -> usize {
        match self {
            ExecValue::Array(_) => row,
            ExecValue::Scalar(_) => 0,
        }
    }

    pub fn slice(&self, offset: usize, length: usize) -> ExecValue {
        match self {
            ExecValue::Array(array) => ExecValue::Array(array.slice(offset, length)),
            ExecValue::Scalar(array) => ExecValue::Scalar(array.clone()),
        }
    }
}

impl From<ArrayRef> for ExecValue {
    fn from(array: ArrayRef) -> Self {
        ExecValue::Array(array)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ExecBatch {
    values: Vec<ExecValue>,
    num_rows: usize,
}

impl ExecBatch {
    pub fn try_new(values: Vec<ExecValue>, num_rows: usize) -> Result<Self> {
        for (idx, value) in values.iter().enumerate() {
            match value {
                ExecValue::Array(array) => {
                    if array.len() != num_rows {
                        return Err(ExecError::invalid(format!(
                            "batch column {} has {} rows, expected {}",
                            idx,
                            array.len(),
                            num_rows
                        )));
                    }
                }
                ExecValue::Scalar(array) => {
                    if array.len() != 1 {
                        return Err(ExecError::invalid(format!(
                            "batch scalar column {} must have length 1, got {}",
                            idx,
                            array.len()
                        )));
                    }
                }
            }
        }
        Ok(Self { values, num_rows })
    }

    pub fn from_arrays(arrays: Vec<ArrayRef>) -> Result<Self> {
        let num_rows = arrays.first().map(|a| a.len()).unwrap_or(0);
        Self::try_new(arrays.into_iter().map(ExecValue::Array).collect(), num_rows)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn num_columns(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[ExecValue] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Result<&ExecValue> {
        self.values.get(index).ok_or_else(|| {
            ExecError::invalid(format!(
                "batch column {} not found (num_columns={})",
                index,
                self.values.len()
            ))
        })
    }

    /// New batch holding the referenced columns, in order.
    pub fn project(&self, indices: &[usize]) -> Result<ExecBatch> {
        let mut values = Vec::with_capacity(indices.len());
        for &index in indices {
            values.push(self.value(index)?.clone());
        }
        Ok(Self {
            values,
            num_rows: self.num_rows,
        })
    }

    pub fn slice(&self, offset: usize, length: usize) -> ExecBatch {
        let length = length.min(self.num_rows.saturating_sub(offset));
        Self {
            values: self
                .values
                .iter()
                .map(|value| value.slice(offset, length))
                .collect(),
            num_rows: length,
        }
    }
}

/// Reference to a single field of a schema, by position or by name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldRef {
    Index(usize),
    Name(String),
}

impl FieldRef {
    pub fn find_one(&self, schema: &Schema) -> Result<usize> {
        match self {
            FieldRef::Index(index) => {
                if *index >= schema.fields().len() {
                    return Err(ExecError::invalid(format!(
                        "field not found: index {} (schema has {} fields)",
                        index,
                        schema.fields().len()
                    )));
                }
                Ok(*index)
            }
            FieldRef::Name(name) => {
                let matches: Vec<usize> = schema
                    .fields()
                    .iter()
                    .enumerate()
                    .filter(|(_, field)| field.name() == name)
                    .map(|(idx, _)| idx)
                    .collect();
                match matches.as_slice() {
                    [] => Err(ExecError::invalid(format!("field not found: {name}"))),
                    [index] => Ok(*index),
                    _ => Err(ExecError::invalid(format!(
                        "ambiguous field reference: {name} matches {} fields",
                        matches.len()
                    ))),
                }
            }
        }
    }
}

impl From<usize> for FieldRef {
    fn from(index: usize) -> Self {
        FieldRef::Index(index)
    }
}

impl From<&str> for FieldRef {
    fn from(name: &str) -> Self {
        FieldRef::Name(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::Int64Array;
    use arrow::datatypes::Field;

    use super::*;

    #[test]
    fn test_row_count_mismatch_rejected() {
        let array: ArrayRef = Arc::new(Int64Array::from(vec![1, 2, 3]));
        let result = ExecBatch::try_new(vec![ExecValue::Array(array)], 2);
        assert!(matches!(result, Err(ExecError::Invalid(_))));
    }

    #[test]
    fn test_scalar_column_broadcasts() {
        let scalar: ArrayRef = Arc::new(Int64Array::from(vec![7]));
        let batch = ExecBatch::try_new(vec![ExecValue::Scalar(scalar)], 5).expect("batch");
        assert_eq!(batch.num_rows(), 5);
        assert_eq!(batch.values()[0].value_index(4), 0);
    }

    #[test]
    fn test_slice_keeps_scalars() {
        let array: ArrayRef = Arc::new(Int64Array::from(vec![1, 2, 3, 4]));
        let scalar: ArrayRef = Arc::new(Int64Array::from(vec![9]));
        let batch =
            ExecBatch::try_new(vec![ExecValue::Array(array), ExecValue::Scalar(scalar)], 4)
                .expect("batch");
        let sliced = batch.slice(1, 2);
        assert_eq!(sliced.num_rows(), 2);
        assert_eq!(sliced.values()[0].array().len(), 2);
        assert_eq!(sliced.values()[1].array().len(), 1);
    }

    #[test]
    fn test_field_ref_resolution() {
        let schema = Schema::new(vec![
            Field::new("a", DataType::Int64, true),
            Field::new("b", DataType::Int64, true),
            Field::new("a", DataType::Int64, true),
        ]);
        assert_eq!(FieldRef::from("b").find_one(&schema).expect("found"), 1);
        assert!(FieldRef::from("missing").find_one(&schema).is_err());
        assert!(FieldRef::from("a").find_one(&schema).is_err());
        assert_eq!(FieldRef::from(2usize).find_one(&schema).expect("found"), 2);
        assert!(FieldRef::from(3usize).find_one(&schema).is_err());
    }
}
