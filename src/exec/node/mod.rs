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
//! Exec node protocol.
//!
//! Responsibilities:
//! - Defines the push-based protocol nodes speak to each other: batches flow
//!   downstream via `input_received`, completion is declared ahead of time
//!   via `input_finished(total_batches)`, errors and backpressure travel the
//!   same surface.
//! - Provides the factory that picks the aggregation node implementation for
//!   a set of node options.
//!
//! Key exported interfaces:
//! - Types: `ExecNode`, `Aggregate`, `AggregateNodeOptions`.
//! - Functions: `make_aggregate_node`.

pub mod aggregate;

use std::sync::{Arc, Weak};

use arrow::datatypes::SchemaRef;

use crate::common::error::{ExecError, Result};
use crate::exec::batch::{ExecBatch, FieldRef};
use crate::exec::expr::agg::AggOptions;
use crate::runtime::context::ExecContext;
use crate::runtime::counter::FinishedSignal;

pub use aggregate::{GroupByNode, ScalarAggregateNode};

/// One aggregate computed by an aggregation node.
#[derive(Clone, Debug)]
pub struct Aggregate {
    /// Registered function name, e.g. `"sum"` or `"hash_sum"`.
    pub function: String,
    /// Function options; the function's defaults apply when absent.
    pub options: Option<AggOptions>,
    /// Argument column in the input schema.
    pub target: FieldRef,
    /// Name of the output column.
    pub name: String,
}

#[derive(Clone, Debug, Default)]
pub struct AggregateNodeOptions {
    pub aggregates: Vec<Aggregate>,
    /// Key columns; empty selects scalar-aggregate mode.
    pub keys: Vec<FieldRef>,
}

/// A node in a dataflow plan.
///
/// The upstream peer calls the inbound half (`input_received`,
/// `input_finished`, `error_received`); the node calls the same methods on
/// its downstream peer. All methods may be called from any worker thread.
pub trait ExecNode: Send + Sync {
    fn kind_name(&self) -> &str;

    fn output_schema(&self) -> SchemaRef;

    /// Transitions the node to running. Must be called before any input.
    fn start_producing(&self) -> Result<()>;

    fn input_received(&self, batch: ExecBatch);

    /// Declares how many `input_received` calls this node will see in total.
    fn input_finished(&self, total_batches: usize);

    fn error_received(&self, error: ExecError);

    fn pause_producing(&self, counter: i32);

    fn resume_producing(&self, counter: i32);

    fn stop_producing(&self);

    /// Resolves exactly once: after the final output was emitted, after the
    /// first error was reported, or after cancellation.
    fn finished(&self) -> FinishedSignal;

    /// Wires the upstream peer for backpressure and cancellation forwarding.
    /// The handle is weak; the plan owns its nodes.
    fn set_upstream(&self, upstream: Weak<dyn ExecNode>) {
        let _ = upstream;
    }
}

impl std::fmt::Debug for dyn ExecNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.kind_name()).finish()
    }
}

/// Picks the aggregation node implementation: no keys selects the scalar
/// aggregate, any keys select the group-by.
pub fn make_aggregate_node(
    ctx: Arc<ExecContext>,
    input_schema: SchemaRef,
    options: AggregateNodeOptions,
    downstream: Arc<dyn ExecNode>,
) -> Result<Arc<dyn ExecNode>> {
    if options.aggregates.is_empty() && options.keys.is_empty() {
        return Err(ExecError::invalid(
            "aggregation node needs at least one aggregate or key",
        ));
    }
    if options.keys.is_empty() {
        Ok(ScalarAggregateNode::try_new(
            ctx,
            input_schema,
            options.aggregates,
            downstream,
        )?)
    } else {
        Ok(GroupByNode::try_new(
            ctx,
            input_schema,
            options.aggregates,
            options.keys,
            downstream,
        )?)
    }
}
