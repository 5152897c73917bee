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
//! End-to-end tests for the aggregation exec nodes.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray, StructArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use acerite::exec::expr::agg::{
    AggOptions, CountMode, CountOptions, ScalarAggregateOptions,
};
use acerite::exec::grouper::Grouper;
use acerite::runtime::counter::FinishedSignal;
use acerite::{
    make_aggregate_node, Aggregate, AggregateNodeOptions, ExecBatch, ExecContext, ExecError,
    ExecNode, ExecValue, FieldRef,
};

#[derive(Default)]
struct RecordingSink {
    batches: Mutex<Vec<ExecBatch>>,
    finished_calls: Mutex<Vec<usize>>,
    errors: Mutex<Vec<ExecError>>,
    signal: FinishedSignal,
}

impl RecordingSink {
    fn batches(&self) -> Vec<ExecBatch> {
        self.batches.lock().expect("sink lock").clone()
    }

    fn finished_calls(&self) -> Vec<usize> {
        self.finished_calls.lock().expect("sink lock").clone()
    }

    fn errors(&self) -> Vec<ExecError> {
        self.errors.lock().expect("sink lock").clone()
    }
}

impl ExecNode for RecordingSink {
    fn kind_name(&self) -> &str {
        "RecordingSink"
    }

    fn output_schema(&self) -> SchemaRef {
        Arc::new(Schema::empty())
    }

    fn start_producing(&self) -> acerite::Result<()> {
        Ok(())
    }

    fn input_received(&self, batch: ExecBatch) {
        self.batches.lock().expect("sink lock").push(batch);
    }

    fn input_finished(&self, total_batches: usize) {
        self.finished_calls
            .lock()
            .expect("sink lock")
            .push(total_batches);
    }

    fn error_received(&self, error: ExecError) {
        self.errors.lock().expect("sink lock").push(error);
    }

    fn pause_producing(&self, _counter: i32) {}

    fn resume_producing(&self, _counter: i32) {}

    fn stop_producing(&self) {}

    fn finished(&self) -> FinishedSignal {
        self.signal.clone()
    }

    fn set_upstream(&self, _upstream: Weak<dyn ExecNode>) {}
}

fn test_ctx() -> Arc<ExecContext> {
    Arc::new(ExecContext::new().with_thread_capacity(16))
}

fn agg(function: &str, target: usize, name: &str) -> Aggregate {
    Aggregate {
        function: function.to_string(),
        options: None,
        target: FieldRef::Index(target),
        name: name.to_string(),
    }
}

fn agg_with(function: &str, options: AggOptions, target: usize, name: &str) -> Aggregate {
    Aggregate {
        options: Some(options),
        ..agg(function, target, name)
    }
}

fn float_key_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("argument", DataType::Float64, true),
        Field::new("key", DataType::Int64, true),
    ]))
}

/// The ten rows shared by the S2/S3 scenarios, as three batches.
fn float_key_batches() -> Vec<ExecBatch> {
    let rows: Vec<(Option<f64>, Option<i64>)> = vec![
        (Some(1.0), Some(1)),
        (None, Some(1)),
        (Some(0.0), Some(2)),
        (None, Some(3)),
        (Some(4.0), None),
        (Some(3.25), Some(1)),
        (Some(0.125), Some(2)),
        (Some(-0.25), Some(2)),
        (Some(0.75), None),
        (None, Some(3)),
    ];
    rows.chunks(4).map(float_key_batch).collect()
}

fn float_key_batch(rows: &[(Option<f64>, Option<i64>)]) -> ExecBatch {
    let arguments: Float64Array = rows.iter().map(|(argument, _)| *argument).collect();
    let keys: Int64Array = rows.iter().map(|(_, key)| *key).collect();
    ExecBatch::from_arrays(vec![Arc::new(arguments), Arc::new(keys)]).expect("batch")
}

fn drive(node: &Arc<dyn ExecNode>, batches: Vec<ExecBatch>, threads: usize) {
    node.start_producing().expect("start_producing");
    let total = batches.len();
    if threads <= 1 {
        for batch in batches {
            node.input_received(batch);
        }
    } else {
        let mut shards: Vec<Vec<ExecBatch>> = (0..threads).map(|_| Vec::new()).collect();
        for (idx, batch) in batches.into_iter().enumerate() {
            shards[idx % threads].push(batch);
        }
        std::thread::scope(|scope| {
            for shard in shards {
                let node = Arc::clone(node);
                scope.spawn(move || {
                    for batch in shard {
                        node.input_received(batch);
                    }
                });
            }
        });
    }
    node.input_finished(total);
}

fn concat_rows<T>(
    sink: &RecordingSink,
    extract: impl Fn(&ExecBatch, usize) -> T,
) -> Vec<T> {
    let mut rows = Vec::new();
    for batch in sink.batches() {
        for row in 0..batch.num_rows() {
            rows.push(extract(&batch, row));
        }
    }
    rows
}

fn opt_i64(batch: &ExecBatch, column: usize, row: usize) -> Option<i64> {
    let array = batch.values()[column]
        .array()
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("int64 column");
    (!array.is_null(row)).then(|| array.value(row))
}

fn opt_f64(batch: &ExecBatch, column: usize, row: usize) -> Option<f64> {
    let array = batch.values()[column]
        .array()
        .as_any()
        .downcast_ref::<Float64Array>()
        .expect("float64 column");
    (!array.is_null(row)).then(|| array.value(row))
}

// S1: scalar sum + the three count modes on a mixed-null column.
#[test]
fn test_scalar_sum_and_count_modes() {
    let schema = Arc::new(Schema::new(vec![Field::new(
        "argument",
        DataType::Float64,
        true,
    )]));
    let batches = vec![
        ExecBatch::from_arrays(vec![Arc::new(Float64Array::from(vec![
            Some(1.0),
            None,
            Some(3.25),
            Some(0.125),
        ]))])
        .expect("batch"),
        ExecBatch::from_arrays(vec![Arc::new(Float64Array::from(vec![
            Some(-0.25),
            Some(0.75),
            None,
        ]))])
        .expect("batch"),
    ];

    let sink = Arc::new(RecordingSink::default());
    let node = make_aggregate_node(
        test_ctx(),
        schema,
        AggregateNodeOptions {
            aggregates: vec![
                agg("sum", 0, "sum"),
                agg_with(
                    "count",
                    AggOptions::Count(CountOptions {
                        mode: CountMode::OnlyValid,
                    }),
                    0,
                    "count_valid",
                ),
                agg_with(
                    "count",
                    AggOptions::Count(CountOptions {
                        mode: CountMode::OnlyNull,
                    }),
                    0,
                    "count_null",
                ),
                agg_with(
                    "count",
                    AggOptions::Count(CountOptions {
                        mode: CountMode::All,
                    }),
                    0,
                    "count_all",
                ),
            ],
            keys: vec![],
        },
        sink.clone(),
    )
    .expect("node");
    assert_eq!(node.kind_name(), "ScalarAggregateNode");

    drive(&node, batches, 1);

    assert!(node.finished().wait_timeout(Duration::from_secs(5)));
    assert_eq!(sink.finished_calls(), vec![1]);
    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    let out = &batches[0];
    assert_eq!(out.num_rows(), 1);
    assert_eq!(opt_f64(out, 0, 0), Some(4.875));
    assert_eq!(opt_i64(out, 1, 0), Some(5));
    assert_eq!(opt_i64(out, 2, 0), Some(2));
    assert_eq!(opt_i64(out, 3, 0), Some(7));
}

#[test]
fn test_scalar_empty_input() {
    let schema = Arc::new(Schema::new(vec![Field::new(
        "argument",
        DataType::Float64,
        true,
    )]));
    let sink = Arc::new(RecordingSink::default());
    let node = make_aggregate_node(
        test_ctx(),
        schema,
        AggregateNodeOptions {
            aggregates: vec![agg("sum", 0, "sum"), agg("count", 0, "count")],
            keys: vec![],
        },
        sink.clone(),
    )
    .expect("node");

    drive(&node, vec![], 1);

    assert!(node.finished().wait_timeout(Duration::from_secs(5)));
    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].num_rows(), 1);
    // Empty input: sum is null, count is zero.
    assert_eq!(opt_f64(&batches[0], 0, 0), None);
    assert_eq!(opt_i64(&batches[0], 1, 0), Some(0));
}

#[test]
fn test_scalar_broadcast_scalar_argument() {
    let schema = Arc::new(Schema::new(vec![Field::new(
        "argument",
        DataType::Float64,
        true,
    )]));
    let scalar: ArrayRef = Arc::new(Float64Array::from(vec![2.0]));
    let batch = ExecBatch::try_new(vec![ExecValue::Scalar(scalar)], 3).expect("batch");

    let sink = Arc::new(RecordingSink::default());
    let node = make_aggregate_node(
        test_ctx(),
        schema,
        AggregateNodeOptions {
            aggregates: vec![agg("sum", 0, "sum"), agg("count", 0, "count")],
            keys: vec![],
        },
        sink.clone(),
    )
    .expect("node");

    drive(&node, vec![batch], 1);

    let batches = sink.batches();
    // A broadcast scalar contributes once per logical row.
    assert_eq!(opt_f64(&batches[0], 0, 0), Some(6.0));
    assert_eq!(opt_i64(&batches[0], 1, 0), Some(3));
}

#[test]
fn test_scalar_options_skip_nulls_and_min_count() {
    let schema = Arc::new(Schema::new(vec![Field::new(
        "argument",
        DataType::Float64,
        true,
    )]));
    let batch = ExecBatch::from_arrays(vec![Arc::new(Float64Array::from(vec![
        Some(1.0),
        Some(2.0),
        None,
    ]))])
    .expect("batch");

    let sink = Arc::new(RecordingSink::default());
    let node = make_aggregate_node(
        test_ctx(),
        schema,
        AggregateNodeOptions {
            aggregates: vec![
                agg_with(
                    "sum",
                    AggOptions::Scalar(ScalarAggregateOptions {
                        skip_nulls: false,
                        min_count: 1,
                    }),
                    0,
                    "tainted",
                ),
                agg_with(
                    "sum",
                    AggOptions::Scalar(ScalarAggregateOptions {
                        skip_nulls: true,
                        min_count: 3,
                    }),
                    0,
                    "too_few",
                ),
                agg("sum", 0, "plain"),
            ],
            keys: vec![],
        },
        sink.clone(),
    )
    .expect("node");

    drive(&node, vec![batch], 1);

    let batches = sink.batches();
    assert_eq!(opt_f64(&batches[0], 0, 0), None);
    assert_eq!(opt_f64(&batches[0], 1, 0), None);
    assert_eq!(opt_f64(&batches[0], 2, 0), Some(3.0));
}

// S2: group-by count on an integer key.
#[test]
fn test_group_by_count() {
    let sink = Arc::new(RecordingSink::default());
    let node = make_aggregate_node(
        test_ctx(),
        float_key_schema(),
        AggregateNodeOptions {
            aggregates: vec![agg("hash_count", 0, "count")],
            keys: vec![FieldRef::Index(1)],
        },
        sink.clone(),
    )
    .expect("node");
    assert_eq!(node.kind_name(), "GroupByNode");

    drive(&node, float_key_batches(), 1);
    assert!(node.finished().wait_timeout(Duration::from_secs(5)));

    let mut rows = concat_rows(&sink, |batch, row| {
        (opt_i64(batch, 1, row), opt_i64(batch, 0, row))
    });
    rows.sort();
    assert_eq!(
        rows,
        vec![
            (None, Some(2)),
            (Some(1), Some(2)),
            (Some(2), Some(3)),
            (Some(3), Some(0)),
        ]
    );
}

// S3: group-by sum, serial and parallel runs must agree.
#[test]
fn test_group_by_sum_serial_and_parallel() {
    let expected = vec![
        (None, Some(4.75)),
        (Some(1), Some(4.25)),
        (Some(2), Some(-0.125)),
        (Some(3), None),
    ];

    for threads in [1, 3] {
        let sink = Arc::new(RecordingSink::default());
        let node = make_aggregate_node(
            test_ctx(),
            float_key_schema(),
            AggregateNodeOptions {
                aggregates: vec![agg("hash_sum", 0, "sum")],
                keys: vec![FieldRef::Index(1)],
            },
            sink.clone(),
        )
        .expect("node");

        drive(&node, float_key_batches(), threads);
        assert!(node.finished().wait_timeout(Duration::from_secs(5)));
        assert!(sink.errors().is_empty());

        let mut rows = concat_rows(&sink, |batch, row| {
            (opt_i64(batch, 1, row), opt_f64(batch, 0, row))
        });
        rows.sort_by_key(|(key, _)| *key);
        assert_eq!(rows, expected, "threads={threads}");
    }
}

// S4: combined min_max kernel, including an all-null group.
#[test]
fn test_group_by_min_max() {
    let rows: Vec<(Option<i64>, Option<i64>)> = vec![
        (Some(1), Some(1)),
        (None, Some(1)),
        (Some(0), Some(2)),
        (None, Some(3)),
        (Some(3), Some(4)),
        (Some(5), Some(4)),
        (Some(4), None),
        (Some(3), Some(1)),
        (Some(0), Some(2)),
        (Some(0), Some(2)),
        (Some(1), None),
        (None, Some(3)),
    ];
    let schema = Arc::new(Schema::new(vec![
        Field::new("argument", DataType::Int64, true),
        Field::new("key", DataType::Int64, true),
    ]));
    let batches: Vec<ExecBatch> = rows
        .chunks(5)
        .map(|chunk| {
            let arguments: Int64Array = chunk.iter().map(|(argument, _)| *argument).collect();
            let keys: Int64Array = chunk.iter().map(|(_, key)| *key).collect();
            ExecBatch::from_arrays(vec![Arc::new(arguments), Arc::new(keys)]).expect("batch")
        })
        .collect();

    let sink = Arc::new(RecordingSink::default());
    let node = make_aggregate_node(
        test_ctx(),
        schema,
        AggregateNodeOptions {
            aggregates: vec![agg("hash_min_max", 0, "min_max")],
            keys: vec![FieldRef::Index(1)],
        },
        sink.clone(),
    )
    .expect("node");

    drive(&node, batches, 1);
    assert!(node.finished().wait_timeout(Duration::from_secs(5)));

    let mut rows = concat_rows(&sink, |batch, row| {
        let minmax = batch.values()[0]
            .array()
            .as_any()
            .downcast_ref::<StructArray>()
            .expect("struct column");
        let mins = minmax
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("min field");
        let maxes = minmax
            .column(1)
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("max field");
        (
            opt_i64(batch, 1, row),
            (!mins.is_null(row)).then(|| mins.value(row)),
            (!maxes.is_null(row)).then(|| maxes.value(row)),
        )
    });
    rows.sort();
    assert_eq!(
        rows,
        vec![
            (None, Some(1), Some(4)),
            (Some(1), Some(1), Some(3)),
            (Some(2), Some(0), Some(0)),
            (Some(3), None, None),
            (Some(4), Some(3), Some(5)),
        ]
    );
}

// S6: distinct count on a string column with nulls.
#[test]
fn test_group_by_count_distinct_strings() {
    let rows: Vec<(Option<&str>, Option<i64>)> = vec![
        (Some("foo"), Some(1)),
        (Some("foo"), Some(1)),
        (Some("bar"), Some(2)),
        (None, Some(3)),
        (None, Some(3)),
        (Some("foo"), Some(3)),
        (Some("ham"), Some(3)),
        (None, Some(4)),
        (None, Some(4)),
    ];
    let schema = Arc::new(Schema::new(vec![
        Field::new("argument", DataType::Utf8, true),
        Field::new("key", DataType::Int64, true),
    ]));
    let batches: Vec<ExecBatch> = rows
        .chunks(4)
        .map(|chunk| {
            let arguments: StringArray = chunk.iter().map(|(argument, _)| *argument).collect();
            let keys: Int64Array = chunk.iter().map(|(_, key)| *key).collect();
            ExecBatch::from_arrays(vec![Arc::new(arguments), Arc::new(keys)]).expect("batch")
        })
        .collect();

    let sink = Arc::new(RecordingSink::default());
    let node = make_aggregate_node(
        test_ctx(),
        schema,
        AggregateNodeOptions {
            aggregates: vec![agg("hash_count_distinct", 0, "distinct")],
            keys: vec![FieldRef::Index(1)],
        },
        sink.clone(),
    )
    .expect("node");

    drive(&node, batches, 1);
    assert!(node.finished().wait_timeout(Duration::from_secs(5)));

    let mut rows = concat_rows(&sink, |batch, row| {
        (opt_i64(batch, 1, row), opt_i64(batch, 0, row))
    });
    rows.sort();
    assert_eq!(
        rows,
        vec![
            (Some(1), Some(1)),
            (Some(2), Some(1)),
            (Some(3), Some(2)),
            (Some(4), Some(0)),
        ]
    );
}

#[test]
fn test_group_by_empty_input() {
    let sink = Arc::new(RecordingSink::default());
    let node = make_aggregate_node(
        test_ctx(),
        float_key_schema(),
        AggregateNodeOptions {
            aggregates: vec![agg("hash_sum", 0, "sum")],
            keys: vec![FieldRef::Index(1)],
        },
        sink.clone(),
    )
    .expect("node");

    drive(&node, vec![], 1);

    assert!(node.finished().wait_timeout(Duration::from_secs(5)));
    // Zero groups: zero batches are declared and none are emitted.
    assert_eq!(sink.finished_calls(), vec![0]);
    assert!(sink.batches().is_empty());
    assert!(sink.errors().is_empty());
}

#[test]
fn test_group_by_output_chunking_inline() {
    let keys: Int64Array = (0..10).map(Some).collect();
    let arguments: Float64Array = (0..10).map(|v| Some(v as f64)).collect();
    let batch =
        ExecBatch::from_arrays(vec![Arc::new(arguments), Arc::new(keys)]).expect("batch");

    let ctx = Arc::new(
        ExecContext::new()
            .with_thread_capacity(16)
            .with_output_chunk_size(3),
    );
    let sink = Arc::new(RecordingSink::default());
    let node = make_aggregate_node(
        ctx,
        float_key_schema(),
        AggregateNodeOptions {
            aggregates: vec![agg("hash_sum", 0, "sum")],
            keys: vec![FieldRef::Index(1)],
        },
        sink.clone(),
    )
    .expect("node");

    drive(&node, vec![batch], 1);
    assert!(node.finished().wait_timeout(Duration::from_secs(5)));

    // ceil(10 / 3) chunks, declared once before any chunk is emitted.
    assert_eq!(sink.finished_calls(), vec![4]);
    let batches = sink.batches();
    assert_eq!(batches.len(), 4);
    assert!(batches.iter().all(|batch| batch.num_rows() <= 3));
    assert_eq!(batches.iter().map(ExecBatch::num_rows).sum::<usize>(), 10);
}

#[test]
fn test_group_by_output_chunking_on_executor() {
    let keys: Int64Array = (0..9).map(Some).collect();
    let arguments: Float64Array = (0..9).map(|v| Some(v as f64)).collect();
    let batch =
        ExecBatch::from_arrays(vec![Arc::new(arguments), Arc::new(keys)]).expect("batch");

    let ctx = Arc::new(
        ExecContext::new()
            .with_thread_capacity(16)
            .with_output_chunk_size(2)
            .with_executor(2),
    );
    let sink = Arc::new(RecordingSink::default());
    let node = make_aggregate_node(
        ctx,
        float_key_schema(),
        AggregateNodeOptions {
            aggregates: vec![agg("hash_sum", 0, "sum")],
            keys: vec![FieldRef::Index(1)],
        },
        sink.clone(),
    )
    .expect("node");

    drive(&node, vec![batch], 1);
    // Chunks are emitted as independent executor tasks; wait for the node.
    assert!(node.finished().wait_timeout(Duration::from_secs(5)));

    assert_eq!(sink.finished_calls(), vec![5]);
    let mut rows = concat_rows(&sink, |batch, row| {
        (opt_i64(batch, 1, row), opt_f64(batch, 0, row))
    });
    rows.sort_by_key(|(key, _)| *key);
    let expected: Vec<(Option<i64>, Option<f64>)> =
        (0..9).map(|v| (Some(v), Some(v as f64))).collect();
    assert_eq!(rows, expected);
}

#[test]
fn test_group_by_cancellation() {
    let sink = Arc::new(RecordingSink::default());
    let node = make_aggregate_node(
        test_ctx(),
        float_key_schema(),
        AggregateNodeOptions {
            aggregates: vec![agg("hash_sum", 0, "sum")],
            keys: vec![FieldRef::Index(1)],
        },
        sink.clone(),
    )
    .expect("node");

    node.start_producing().expect("start_producing");
    node.input_received(float_key_batches().remove(0));
    node.stop_producing();

    assert!(node.finished().wait_timeout(Duration::from_secs(5)));
    assert!(sink.batches().is_empty());
    assert!(sink.finished_calls().is_empty());
    assert!(sink.errors().is_empty());

    // Cancellation is idempotent and late input is ignored.
    node.stop_producing();
    node.input_received(float_key_batches().remove(1));
    node.input_finished(2);
    assert!(sink.batches().is_empty());
}

#[test]
fn test_group_by_error_is_reported_once() {
    let sink = Arc::new(RecordingSink::default());
    let node = make_aggregate_node(
        test_ctx(),
        float_key_schema(),
        AggregateNodeOptions {
            aggregates: vec![agg("hash_sum", 0, "sum")],
            keys: vec![FieldRef::Index(1)],
        },
        sink.clone(),
    )
    .expect("node");

    node.start_producing().expect("start_producing");
    // Key column type does not match the schema the node was built against.
    let bad = ExecBatch::from_arrays(vec![
        Arc::new(Float64Array::from(vec![Some(1.0)])) as ArrayRef,
        Arc::new(StringArray::from(vec![Some("oops")])) as ArrayRef,
    ])
    .expect("batch");
    node.input_received(bad.clone());
    node.input_received(bad);

    assert!(node.finished().wait_timeout(Duration::from_secs(5)));
    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], ExecError::Invalid(_)));
    assert!(sink.batches().is_empty());
}

#[test]
fn test_unknown_function_is_not_implemented() {
    let sink = Arc::new(RecordingSink::default());
    let err = make_aggregate_node(
        test_ctx(),
        float_key_schema(),
        AggregateNodeOptions {
            aggregates: vec![agg("t_digest", 0, "q")],
            keys: vec![],
        },
        sink,
    )
    .expect_err("unknown function");
    assert!(matches!(err, ExecError::NotImplemented(_)));
}

#[test]
fn test_kernel_kind_must_match_mode() {
    let sink = Arc::new(RecordingSink::default());
    let err = make_aggregate_node(
        test_ctx(),
        float_key_schema(),
        AggregateNodeOptions {
            aggregates: vec![agg("sum", 0, "sum")],
            keys: vec![FieldRef::Index(1)],
        },
        sink.clone(),
    )
    .expect_err("scalar kernel in group-by mode");
    assert!(matches!(err, ExecError::Invalid(_)));

    let err = make_aggregate_node(
        test_ctx(),
        float_key_schema(),
        AggregateNodeOptions {
            aggregates: vec![agg("hash_sum", 0, "sum")],
            keys: vec![],
        },
        sink,
    )
    .expect_err("hash kernel in scalar mode");
    assert!(matches!(err, ExecError::Invalid(_)));
}

#[test]
fn test_unresolvable_field_refs() {
    let sink = Arc::new(RecordingSink::default());
    let err = make_aggregate_node(
        test_ctx(),
        float_key_schema(),
        AggregateNodeOptions {
            aggregates: vec![agg("hash_sum", 7, "sum")],
            keys: vec![FieldRef::Index(1)],
        },
        sink.clone(),
    )
    .expect_err("missing aggregate target");
    assert!(matches!(err, ExecError::Invalid(_)));

    let err = make_aggregate_node(
        test_ctx(),
        float_key_schema(),
        AggregateNodeOptions {
            aggregates: vec![agg("hash_sum", 0, "sum")],
            keys: vec![FieldRef::Name("missing".to_string())],
        },
        sink,
    )
    .expect_err("missing key");
    assert!(matches!(err, ExecError::Invalid(_)));
}

fn run_group_by_sum(
    rows: &[(Option<f64>, Option<i64>)],
    threads: usize,
) -> Vec<(Option<i64>, Option<f64>)> {
    let batches: Vec<ExecBatch> = rows.chunks(16).map(float_key_batch).collect();
    let sink = Arc::new(RecordingSink::default());
    let node = make_aggregate_node(
        test_ctx(),
        float_key_schema(),
        AggregateNodeOptions {
            aggregates: vec![agg("hash_sum", 0, "sum")],
            keys: vec![FieldRef::Index(1)],
        },
        sink.clone(),
    )
    .expect("node");
    drive(&node, batches, threads);
    assert!(node.finished().wait_timeout(Duration::from_secs(5)));
    assert!(sink.errors().is_empty());
    let mut result = concat_rows(&sink, |batch, row| {
        (opt_i64(batch, 1, row), opt_f64(batch, 0, row))
    });
    result.sort_by_key(|(key, _)| *key);
    result
}

// The result set is invariant under permutation of the input and under the
// number of worker threads.
#[test]
fn test_sum_determinism_under_permutation_and_threads() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let mut rows: Vec<(Option<f64>, Option<i64>)> = (0..200)
        .map(|_| {
            let argument = if rng.gen_bool(0.2) {
                None
            } else {
                Some(rng.gen_range(-8i64..8) as f64 * 0.25)
            };
            let key = if rng.gen_bool(0.15) {
                None
            } else {
                Some(rng.gen_range(0i64..10))
            };
            (argument, key)
        })
        .collect();

    let baseline = run_group_by_sum(&rows, 1);
    rows.shuffle(&mut rng);
    assert_eq!(run_group_by_sum(&rows, 1), baseline);
    assert_eq!(run_group_by_sum(&rows, 4), baseline);
}

// Cross-check the operator against a naive reference built from the
// grouper's groupings helpers.
#[test]
fn test_group_by_sum_matches_naive_reference() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let rows: Vec<(Option<f64>, Option<i64>)> = (0..150)
        .map(|_| {
            let argument = if rng.gen_bool(0.25) {
                None
            } else {
                Some(rng.gen_range(-100i64..100) as f64)
            };
            let key = if rng.gen_bool(0.1) {
                None
            } else {
                Some(rng.gen_range(0i64..7))
            };
            (argument, key)
        })
        .collect();

    // Naive path: group ids for all rows at once, partition the argument
    // column by group, reduce each partition by hand.
    let mut grouper = Grouper::try_new(&[DataType::Int64]).expect("grouper");
    let keys: Int64Array = rows.iter().map(|(_, key)| *key).collect();
    let ids = grouper
        .consume(&ExecBatch::from_arrays(vec![Arc::new(keys)]).expect("keys"))
        .expect("consume");
    let num_groups = grouper.num_groups();
    let groupings = Grouper::make_groupings(&ids, num_groups as u32).expect("groupings");
    let arguments: ArrayRef = Arc::new(
        rows.iter()
            .map(|(argument, _)| *argument)
            .collect::<Float64Array>(),
    );
    let grouped = Grouper::apply_groupings(&groupings, &arguments).expect("apply");

    let uniques = grouper.get_uniques().expect("uniques");
    let unique_keys = uniques.values()[0]
        .array()
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("int64 keys");

    let mut expected: Vec<(Option<i64>, Option<f64>)> = (0..num_groups)
        .map(|group| {
            let list = grouped.value(group);
            let list = list
                .as_any()
                .downcast_ref::<Float64Array>()
                .expect("float64 list");
            let mut sum = None;
            for i in 0..list.len() {
                if !list.is_null(i) {
                    *sum.get_or_insert(0.0) += list.value(i);
                }
            }
            let key = (!unique_keys.is_null(group)).then(|| unique_keys.value(group));
            (key, sum)
        })
        .collect();
    expected.sort_by_key(|(key, _)| *key);

    assert_eq!(run_group_by_sum(&rows, 2), expected);
}

#[test]
fn test_group_by_mean_variance_stddev() {
    let rows: Vec<(Option<f64>, Option<i64>)> = vec![
        (Some(1.0), Some(1)),
        (Some(3.0), Some(1)),
        (Some(5.0), Some(1)),
        (Some(2.0), Some(2)),
        (None, Some(2)),
    ];
    let sink = Arc::new(RecordingSink::default());
    let node = make_aggregate_node(
        test_ctx(),
        float_key_schema(),
        AggregateNodeOptions {
            aggregates: vec![
                agg("hash_mean", 0, "mean"),
                agg("hash_variance", 0, "variance"),
                agg("hash_stddev", 0, "stddev"),
            ],
            keys: vec![FieldRef::Index(1)],
        },
        sink.clone(),
    )
    .expect("node");

    drive(&node, vec![float_key_batch(&rows)], 1);
    assert!(node.finished().wait_timeout(Duration::from_secs(5)));

    let mut out = concat_rows(&sink, |batch, row| {
        (
            opt_i64(batch, 3, row),
            opt_f64(batch, 0, row),
            opt_f64(batch, 1, row),
            opt_f64(batch, 2, row),
        )
    });
    out.sort_by_key(|(key, ..)| *key);
    assert_eq!(out.len(), 2);

    let (key, mean, variance, stddev) = out[0];
    assert_eq!(key, Some(1));
    assert_eq!(mean, Some(3.0));
    // Population variance of {1, 3, 5}.
    assert!((variance.expect("variance") - 8.0 / 3.0).abs() < 1e-12);
    assert!((stddev.expect("stddev") - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);

    let (key, mean, variance, _) = out[1];
    assert_eq!(key, Some(2));
    assert_eq!(mean, Some(2.0));
    assert_eq!(variance, Some(0.0));
}
