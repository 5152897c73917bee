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
//! Grouper key-equality, stability and groupings tests.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, DictionaryArray, Float32Array, Int32Array, Int64Array, NullArray,
    StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Int32Type};

use acerite::exec::grouper::Grouper;
use acerite::{ExecBatch, ExecError, ExecValue};

fn key_batch(arrays: Vec<ArrayRef>) -> ExecBatch {
    ExecBatch::from_arrays(arrays).expect("key batch")
}

fn ids_vec(ids: &UInt32Array) -> Vec<u32> {
    ids.values().to_vec()
}

#[test]
fn test_float_keys_zeros_infinities_nans() {
    let mut grouper = Grouper::try_new(&[DataType::Float32]).expect("grouper");
    let keys = key_batch(vec![Arc::new(Float32Array::from(vec![
        0.0f32,
        -0.0,
        f32::INFINITY,
        f32::NEG_INFINITY,
        f32::NAN,
        f32::from_bits(0x7fc0_0001), // NaN with a different payload
    ]))]);
    let ids = grouper.consume(&keys).expect("consume");
    let ids = ids_vec(&ids);

    // 0.0 and -0.0 are distinct; the infinities are distinct from the zeros
    // and each other; both NaNs collapse into one group.
    assert_eq!(ids, vec![0, 1, 2, 3, 4, 4]);
    assert_eq!(grouper.num_groups(), 5);
}

#[test]
fn test_group_id_stability_across_batches() {
    let batch_a = key_batch(vec![Arc::new(Int64Array::from(vec![
        Some(1),
        None,
        Some(2),
    ]))]);
    let batch_b = key_batch(vec![Arc::new(Int64Array::from(vec![
        Some(3),
        Some(1),
        None,
    ]))]);

    let mut grouper = Grouper::try_new(&[DataType::Int64]).expect("grouper");
    let first = ids_vec(&grouper.consume(&batch_a).expect("consume"));
    grouper.consume(&batch_b).expect("consume");
    let again = ids_vec(&grouper.consume(&batch_a).expect("consume"));

    // Ids already assigned are never renumbered.
    assert_eq!(first, again);

    let mut fresh = Grouper::try_new(&[DataType::Int64]).expect("grouper");
    let fresh_first = ids_vec(&fresh.consume(&batch_a).expect("consume"));
    assert_eq!(first, fresh_first);
}

#[test]
fn test_null_type_key_collapses_to_one_group() {
    let mut grouper = Grouper::try_new(&[DataType::Null]).expect("grouper");
    let keys = key_batch(vec![Arc::new(NullArray::new(4))]);
    let ids = ids_vec(&grouper.consume(&keys).expect("consume"));
    assert_eq!(ids, vec![0, 0, 0, 0]);

    let uniques = grouper.get_uniques().expect("uniques");
    assert_eq!(uniques.num_rows(), 1);
    assert_eq!(uniques.values()[0].data_type(), &DataType::Null);
}

#[test]
fn test_null_combinations_are_distinct_groups() {
    let mut grouper = Grouper::try_new(&[DataType::Int64, DataType::Utf8]).expect("grouper");
    let keys = key_batch(vec![
        Arc::new(Int64Array::from(vec![None, Some(1), None, None])),
        Arc::new(StringArray::from(vec![Some("a"), None, None, Some("a")])),
    ]);
    let ids = ids_vec(&grouper.consume(&keys).expect("consume"));
    assert_eq!(ids, vec![0, 1, 2, 0]);
    assert_eq!(grouper.num_groups(), 3);
}

#[test]
fn test_dictionary_groups_by_decoded_value() {
    // values[0] and values[2] decode to the same string: one group.
    let values = StringArray::from(vec![Some("a"), Some("b"), Some("a"), None]);
    let keys = Int32Array::from(vec![Some(0), Some(2), Some(1), None, Some(3)]);
    let dict = DictionaryArray::<Int32Type>::try_new(keys, Arc::new(values)).expect("dict");
    let dict_type = dict.data_type().clone();

    let mut grouper = Grouper::try_new(&[dict_type]).expect("grouper");
    let ids = ids_vec(
        &grouper
            .consume(&key_batch(vec![Arc::new(dict)]))
            .expect("consume"),
    );

    // "a", "a" collapse; "b" is new; index-null and value-null stay distinct.
    assert_eq!(ids, vec![0, 0, 1, 2, 3]);
    assert_eq!(grouper.num_groups(), 4);

    let uniques = grouper.get_uniques().expect("uniques");
    assert_eq!(uniques.num_rows(), 4);
}

#[test]
fn test_differing_dictionaries_are_rejected() {
    let dict_a = DictionaryArray::<Int32Type>::try_new(
        Int32Array::from(vec![0]),
        Arc::new(StringArray::from(vec!["a", "b"])) as ArrayRef,
    )
    .expect("dict");
    let dict_b = DictionaryArray::<Int32Type>::try_new(
        Int32Array::from(vec![0]),
        Arc::new(StringArray::from(vec!["a", "c"])) as ArrayRef,
    )
    .expect("dict");
    let dict_type = dict_a.data_type().clone();

    let mut grouper = Grouper::try_new(&[dict_type]).expect("grouper");
    grouper
        .consume(&key_batch(vec![Arc::new(dict_a)]))
        .expect("first dictionary accepted");
    let err = grouper
        .consume(&key_batch(vec![Arc::new(dict_b)]))
        .expect_err("differing dictionary rejected");
    assert!(matches!(err, ExecError::NotImplemented(_)));
}

#[test]
fn test_nested_key_types_not_implemented() {
    let list_type = DataType::List(Arc::new(Field::new("item", DataType::Int32, true)));
    let err = Grouper::try_new(&[list_type]).expect_err("nested keys rejected");
    assert!(matches!(err, ExecError::NotImplemented(_)));

    let struct_type = DataType::Struct(vec![Field::new("a", DataType::Int32, true)].into());
    let err = Grouper::try_new(&[struct_type]).expect_err("nested keys rejected");
    assert!(matches!(err, ExecError::NotImplemented(_)));
}

#[test]
fn test_scalar_key_broadcasts_over_rows() {
    let mut grouper = Grouper::try_new(&[DataType::Int64]).expect("grouper");
    let scalar: ArrayRef = Arc::new(Int64Array::from(vec![7]));
    let keys = ExecBatch::try_new(vec![ExecValue::Scalar(scalar)], 3).expect("batch");
    let ids = ids_vec(&grouper.consume(&keys).expect("consume"));
    assert_eq!(ids, vec![0, 0, 0]);
    assert_eq!(grouper.num_groups(), 1);
}

#[test]
fn test_uniques_match_distinct_input() {
    let mut grouper = Grouper::try_new(&[DataType::Utf8]).expect("grouper");
    let keys = key_batch(vec![Arc::new(StringArray::from(vec![
        "foo", "bar", "ham", "eggs",
    ]))]);
    grouper.consume(&keys).expect("consume");

    let uniques = grouper.get_uniques().expect("uniques");
    let uniques = uniques.values()[0]
        .array()
        .as_any()
        .downcast_ref::<StringArray>()
        .expect("utf8 uniques");
    let mut seen: Vec<&str> = (0..uniques.len()).map(|i| uniques.value(i)).collect();
    seen.sort_unstable();
    assert_eq!(seen, vec!["bar", "eggs", "foo", "ham"]);
}

#[test]
fn test_make_groupings_partitions_row_indices() {
    let ids = UInt32Array::from(vec![0u32, 1, 0, 2, 1, 0]);
    let groupings = Grouper::make_groupings(&ids, 3).expect("groupings");

    let lists: Vec<Vec<i32>> = (0..groupings.len())
        .map(|g| {
            let values = groupings.value(g);
            let values = values.as_any().downcast_ref::<Int32Array>().expect("int32");
            (0..values.len()).map(|i| values.value(i)).collect()
        })
        .collect();
    assert_eq!(lists, vec![vec![0, 2, 5], vec![1, 4], vec![3]]);
}

#[test]
fn test_apply_groupings_round_trip() {
    let ids = UInt32Array::from(vec![2u32, 0, 1, 0, 2]);
    let groupings = Grouper::make_groupings(&ids, 3).expect("groupings");

    let values: ArrayRef = Arc::new(Int32Array::from(vec![0, 1, 2, 3, 4]));
    let grouped = Grouper::apply_groupings(&groupings, &values).expect("apply");

    // Every row index appears exactly once, partitioned by its group id.
    let mut all: Vec<i32> = Vec::new();
    for g in 0..grouped.len() {
        let list = grouped.value(g);
        let list = list.as_any().downcast_ref::<Int32Array>().expect("int32");
        for i in 0..list.len() {
            let row = list.value(i);
            assert_eq!(ids.value(row as usize), g as u32);
            all.push(row);
        }
    }
    all.sort_unstable();
    assert_eq!(all, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_make_groupings_rejects_null_ids() {
    let ids = UInt32Array::from(vec![Some(0u32), None]);
    let err = Grouper::make_groupings(&ids, 1).expect_err("null ids rejected");
    assert!(matches!(err, ExecError::Invalid(_)));
}

#[test]
fn test_empty_groupings_layout() {
    let ids = UInt32Array::from(Vec::<u32>::new());
    let groupings = Grouper::make_groupings(&ids, 2).expect("groupings");
    assert_eq!(groupings.len(), 2);
    assert!(groupings.value(0).is_empty());
    assert!(groupings.value(1).is_empty());
}
