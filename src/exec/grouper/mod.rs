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
//! Grouper: maps tuples of key column values to dense u32 group ids.
//!
//! The map is monotone: ids are assigned in insertion order and never
//! renumbered. Key equality follows value semantics, with two float-specific
//! rules: every NaN payload lands in one group, and `-0.0` / `+0.0` stay
//! distinct.

mod hash;
pub(crate) mod key_column;

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Int32Array, ListArray, UInt32Array};
use arrow::buffer::{OffsetBuffer, ScalarBuffer};
use arrow::compute::take;
use arrow::datatypes::{DataType, Field};
use hashbrown::hash_map::DefaultHashBuilder;
use hashbrown::raw::RawTable;

use crate::common::error::{ExecError, Result};
use crate::exec::batch::{ExecBatch, ExecValue};
use crate::exec::grouper::hash::{hash_bytes_with_seed, seed_from_hasher};
use crate::exec::grouper::key_column::{
    build_key_view, encode_value, key_column_from_type, KeyColumn,
};

#[derive(Clone, Copy, Debug)]
struct KeyEntry {
    group_id: u32,
    hash: u64,
}

pub struct Grouper {
    key_types: Vec<DataType>,
    key_columns: Vec<KeyColumn>,
    map: RawTable<KeyEntry>,
    group_rows: Vec<Box<[u8]>>,
    hash_seed: u64,
}

impl std::fmt::Debug for Grouper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grouper")
            .field("key_types", &self.key_types)
            .field("num_groups", &self.group_rows.len())
            .field("hash_seed", &self.hash_seed)
            .finish()
    }
}

impl Grouper {
    /// Builds a grouper for a fixed sequence of key column types.
    ///
    /// Nested key types (lists, structs, maps, unions) are rejected with a
    /// not-implemented error.
    pub fn try_new(key_types: &[DataType]) -> Result<Self> {
        let mut key_columns = Vec::with_capacity(key_types.len());
        for data_type in key_types {
            key_columns.push(key_column_from_type(data_type)?);
        }
        Ok(Self {
            key_types: key_types.to_vec(),
            key_columns,
            map: RawTable::new(),
            group_rows: Vec::new(),
            hash_seed: seed_from_hasher(&DefaultHashBuilder::default()),
        })
    }

    pub fn key_types(&self) -> &[DataType] {
        &self.key_types
    }

    pub fn num_groups(&self) -> usize {
        self.group_rows.len()
    }

    /// Assigns a group id to every row of `keys`, inserting ids for key
    /// tuples seen for the first time. Ids already assigned are stable across
    /// consume calls.
    pub fn consume(&mut self, keys: &ExecBatch) -> Result<UInt32Array> {
        if keys.num_columns() != self.key_types.len() {
            return Err(ExecError::invalid(format!(
                "key batch has {} columns, grouper expects {}",
                keys.num_columns(),
                self.key_types.len()
            )));
        }
        for (idx, (value, expected)) in keys.values().iter().zip(&self.key_types).enumerate() {
            if value.data_type() != expected {
                return Err(ExecError::invalid(format!(
                    "key column {} type mismatch: expected {:?}, got {:?}",
                    idx,
                    expected,
                    value.data_type()
                )));
            }
        }

        let mut views = Vec::with_capacity(keys.num_columns());
        for (value, column) in keys.values().iter().zip(self.key_columns.iter_mut()) {
            let view = build_key_view(value.array())?;
            column.prepare_batch(&view)?;
            views.push(view);
        }

        let num_rows = keys.num_rows();
        let mut ids = Vec::with_capacity(num_rows);
        let mut row_bytes = Vec::new();
        for row in 0..num_rows {
            row_bytes.clear();
            for (view, value) in views.iter().zip(keys.values()) {
                encode_value(view, value.value_index(row), &mut row_bytes)?;
            }
            let hash = hash_bytes_with_seed(self.hash_seed, &row_bytes);

            let result = {
                let group_rows = &self.group_rows;
                self.map.find_or_find_insert_slot(
                    hash,
                    |entry| {
                        group_rows
                            .get(entry.group_id as usize)
                            .map(|stored| stored.as_ref() == row_bytes.as_slice())
                            .unwrap_or(false)
                    },
                    |entry| entry.hash,
                )
            };

            match result {
                Ok(bucket) => ids.push(unsafe { bucket.as_ref().group_id }),
                Err(slot) => {
                    let group_id = u32::try_from(self.group_rows.len())
                        .map_err(|_| ExecError::invalid("group id overflow"))?;
                    for (column, (view, value)) in
                        self.key_columns.iter_mut().zip(views.iter().zip(keys.values()))
                    {
                        column.push_group(view, value.value_index(row))?;
                    }
                    self.group_rows.push(row_bytes.clone().into_boxed_slice());
                    let entry = KeyEntry { group_id, hash };
                    unsafe {
                        self.map.insert_in_slot(hash, slot, entry);
                    }
                    ids.push(group_id);
                }
            }
        }
        Ok(UInt32Array::from(ids))
    }

    /// Key batch with one row per existing group, in ascending group-id order.
    pub fn get_uniques(&self) -> Result<ExecBatch> {
        let mut values = Vec::with_capacity(self.key_columns.len());
        for column in &self.key_columns {
            values.push(ExecValue::Array(column.to_array()?));
        }
        ExecBatch::try_new(values, self.num_groups())
    }

    /// List of length `num_groups` whose `g`-th element holds the row indices
    /// assigned to group `g`, in input order. Null ids are invalid.
    pub fn make_groupings(ids: &UInt32Array, num_groups: u32) -> Result<ListArray> {
        if ids.null_count() != 0 {
            return Err(ExecError::invalid("group ids may not be null"));
        }
        let num_groups = num_groups as usize;
        let mut counts = vec![0i32; num_groups];
        for row in 0..ids.len() {
            let id = ids.value(row) as usize;
            if id >= num_groups {
                return Err(ExecError::invalid(format!(
                    "group id {} out of range [0, {})",
                    id, num_groups
                )));
            }
            counts[id] += 1;
        }

        let mut offsets = Vec::with_capacity(num_groups + 1);
        offsets.push(0i32);
        let mut running = 0i32;
        for count in &counts {
            running += count;
            offsets.push(running);
        }

        let mut cursors: Vec<i32> = offsets[..num_groups].to_vec();
        let mut indices = vec![0i32; ids.len()];
        for row in 0..ids.len() {
            let id = ids.value(row) as usize;
            indices[cursors[id] as usize] = row as i32;
            cursors[id] += 1;
        }

        let values = Arc::new(Int32Array::from(indices)) as ArrayRef;
        let field = Arc::new(Field::new("item", DataType::Int32, true));
        let offsets = OffsetBuffer::new(ScalarBuffer::from(offsets));
        Ok(ListArray::try_new(field, offsets, values, None)?)
    }

    /// Permutes `values` into a list with the same outer layout as
    /// `groupings`.
    pub fn apply_groupings(groupings: &ListArray, values: &ArrayRef) -> Result<ListArray> {
        let taken = take(values.as_ref(), groupings.values().as_ref(), None)?;
        let field = Arc::new(Field::new("item", taken.data_type().clone(), true));
        Ok(ListArray::try_new(
            field,
            groupings.offsets().clone(),
            taken,
            None,
        )?)
    }
}
