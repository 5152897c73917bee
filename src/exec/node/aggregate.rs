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
//! Aggregation exec nodes.
//!
//! Responsibilities:
//! - `ScalarAggregateNode` reduces the whole input to one row: per-thread
//!   partial states, merged list-wise when the input counter completes.
//! - `GroupByNode` reduces per key tuple: a per-thread grouper assigns dense
//!   group ids, per-thread kernel states accumulate by id, and the finish
//!   path transposes every thread's keys into thread 0 before finalising and
//!   emitting the result in chunks.
//!
//! Neither node queues input. `input_received` runs on the calling worker
//! and writes only that worker's state slot, so the hot path takes no
//! contended lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use crate::common::error::{ExecError, Result};
use crate::common::logging::debug;
use crate::exec::batch::{ExecBatch, ExecValue, FieldRef};
use crate::exec::expr::agg::{
    AggregateFunction, FunctionKind, GroupAggState, HashAggKernel, ScalarAggKernel,
    ScalarAggState,
};
use crate::exec::grouper::Grouper;
use crate::exec::node::{Aggregate, ExecNode};
use crate::runtime::context::ExecContext;
use crate::runtime::counter::{AtomicCounter, FinishedSignal};

const DEFAULT_OUTPUT_CHUNK_SIZE: usize = 32 * 1024;

fn aggregates_to_string(input_schema: &Schema, aggs: &[Aggregate], target_ids: &[usize]) -> String {
    let rendered: Vec<String> = aggs
        .iter()
        .zip(target_ids)
        .map(|(agg, &id)| format!("{}({})", agg.function, input_schema.field(id).name()))
        .collect();
    format!("aggregates=[{}]", rendered.join(", "))
}

fn resolve_function<'a>(
    ctx: &'a ExecContext,
    agg: &Aggregate,
    expected_kind: FunctionKind,
) -> Result<&'a Arc<dyn AggregateFunction>> {
    let function = ctx.registry().get(&agg.function)?;
    if function.kind() != expected_kind {
        let wanted = match expected_kind {
            FunctionKind::ScalarAggregate => "scalar-aggregate",
            FunctionKind::HashAggregate => "hash-aggregate",
        };
        return Err(ExecError::invalid(format!(
            "invalid kernel kind: {} is not a {wanted} function",
            agg.function
        )));
    }
    Ok(function)
}

fn forward_upstream(
    upstream: &Mutex<Option<Weak<dyn ExecNode>>>,
    action: impl FnOnce(&Arc<dyn ExecNode>),
) {
    let upstream = upstream
        .lock()
        .expect("upstream lock")
        .as_ref()
        .and_then(|weak| weak.upgrade());
    if let Some(upstream) = upstream {
        action(&upstream);
    }
}

/// Reduces every input batch into one output row; `kind_name` is
/// `"ScalarAggregateNode"`.
pub struct ScalarAggregateNode {
    ctx: Arc<ExecContext>,
    input_schema: SchemaRef,
    output_schema: SchemaRef,
    target_field_ids: Vec<usize>,
    aggs: Vec<Aggregate>,
    kernels: Vec<Arc<dyn ScalarAggKernel>>,
    /// One pre-created partial state per kernel per thread slot.
    states: Vec<Vec<Mutex<Option<Box<dyn ScalarAggState>>>>>,
    input_counter: AtomicCounter,
    finished: FinishedSignal,
    error_reported: AtomicBool,
    downstream: Arc<dyn ExecNode>,
    upstream: Mutex<Option<Weak<dyn ExecNode>>>,
}

impl ScalarAggregateNode {
    pub fn try_new(
        ctx: Arc<ExecContext>,
        input_schema: SchemaRef,
        aggs: Vec<Aggregate>,
        downstream: Arc<dyn ExecNode>,
    ) -> Result<Arc<Self>> {
        let capacity = ctx.thread_indexer().capacity();
        let mut target_field_ids = Vec::with_capacity(aggs.len());
        let mut kernels = Vec::with_capacity(aggs.len());
        let mut states: Vec<Vec<Mutex<Option<Box<dyn ScalarAggState>>>>> =
            Vec::with_capacity(aggs.len());
        let mut fields = Vec::with_capacity(aggs.len());

        for agg in &aggs {
            let target_id = agg.target.find_one(&input_schema)?;
            let function = resolve_function(&ctx, agg, FunctionKind::ScalarAggregate)?;
            let options = agg
                .options
                .clone()
                .unwrap_or_else(|| function.default_options());
            let input_type = input_schema.field(target_id).data_type();
            let kernel = function
                .dispatch_exact(input_type, &options)?
                .into_scalar(&agg.function)?;

            fields.push(Field::new(&agg.name, kernel.out_type().clone(), true));
            states.push((0..capacity).map(|_| Mutex::new(Some(kernel.init()))).collect());
            kernels.push(kernel);
            target_field_ids.push(target_id);
        }

        Ok(Arc::new(Self {
            ctx,
            input_schema,
            output_schema: Arc::new(Schema::new(fields)),
            target_field_ids,
            aggs,
            kernels,
            states,
            input_counter: AtomicCounter::new(),
            finished: FinishedSignal::new(),
            error_reported: AtomicBool::new(false),
            downstream,
            upstream: Mutex::new(None),
        }))
    }

    fn do_consume(&self, batch: &ExecBatch) -> Result<()> {
        let thread_index = self.ctx.thread_indexer().acquire()?;
        for (idx, kernel_states) in self.states.iter().enumerate() {
            let value = batch.value(self.target_field_ids[idx])?;
            let mut slot = kernel_states[thread_index]
                .lock()
                .expect("scalar aggregate state lock");
            let state = slot
                .as_mut()
                .ok_or_else(|| ExecError::invalid("scalar aggregate state already merged"))?;
            state.consume(value, batch.num_rows())?;
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        debug!(
            "ScalarAggregateNode finish: {}",
            aggregates_to_string(&self.input_schema, &self.aggs, &self.target_field_ids)
        );
        let mut columns = Vec::with_capacity(self.kernels.len());
        for kernel_states in &self.states {
            let mut merged: Option<Box<dyn ScalarAggState>> = None;
            for slot in kernel_states {
                let state = slot.lock().expect("scalar aggregate state lock").take();
                match (&mut merged, state) {
                    (Some(merged), Some(state)) => merged.merge(state)?,
                    (merged @ None, Some(state)) => *merged = Some(state),
                    (_, None) => {}
                }
            }
            let mut merged = merged
                .ok_or_else(|| ExecError::invalid("scalar aggregate states already finalised"))?;
            columns.push(ExecValue::Array(merged.finalize()?));
        }
        let batch = ExecBatch::try_new(columns, 1)?;
        self.downstream.input_received(batch);
        self.finished.complete();
        Ok(())
    }

    fn handle_error(&self, error: ExecError) {
        if self.error_reported.swap(true, Ordering::AcqRel) {
            return;
        }
        self.input_counter.cancel();
        self.downstream.error_received(error);
        self.finished.complete();
    }
}

impl ExecNode for ScalarAggregateNode {
    fn kind_name(&self) -> &str {
        "ScalarAggregateNode"
    }

    fn output_schema(&self) -> SchemaRef {
        self.output_schema.clone()
    }

    fn start_producing(&self) -> Result<()> {
        // Scalar aggregation always emits a single output batch.
        self.downstream.input_finished(1);
        Ok(())
    }

    fn input_received(&self, batch: ExecBatch) {
        if let Err(error) = self.do_consume(&batch) {
            self.handle_error(error);
            return;
        }
        if self.input_counter.increment() {
            if let Err(error) = self.finish() {
                self.handle_error(error);
            }
        }
    }

    fn input_finished(&self, total_batches: usize) {
        if self.input_counter.set_total(total_batches as i64) {
            if let Err(error) = self.finish() {
                self.handle_error(error);
            }
        }
    }

    fn error_received(&self, error: ExecError) {
        self.downstream.error_received(error);
    }

    fn pause_producing(&self, counter: i32) {
        forward_upstream(&self.upstream, |upstream| upstream.pause_producing(counter));
    }

    fn resume_producing(&self, counter: i32) {
        forward_upstream(&self.upstream, |upstream| {
            upstream.resume_producing(counter)
        });
    }

    fn stop_producing(&self) {
        debug!("ScalarAggregateNode stop_producing");
        if self.input_counter.cancel() {
            self.finished.complete();
        }
        forward_upstream(&self.upstream, |upstream| upstream.stop_producing());
    }

    fn finished(&self) -> FinishedSignal {
        self.finished.clone()
    }

    fn set_upstream(&self, upstream: Weak<dyn ExecNode>) {
        *self.upstream.lock().expect("upstream lock") = Some(upstream);
    }
}

#[derive(Default)]
struct GroupByLocalState {
    grouper: Option<Grouper>,
    states: Vec<Box<dyn GroupAggState>>,
}

/// Groups rows by key tuple and reduces per group; `kind_name` is
/// `"GroupByNode"`.
pub struct GroupByNode {
    ctx: Arc<ExecContext>,
    input_schema: SchemaRef,
    output_schema: SchemaRef,
    key_field_ids: Vec<usize>,
    key_types: Vec<DataType>,
    agg_src_field_ids: Vec<usize>,
    aggs: Vec<Aggregate>,
    kernels: Vec<Arc<dyn HashAggKernel>>,
    local_states: OnceLock<Vec<Mutex<GroupByLocalState>>>,
    input_counter: AtomicCounter,
    output_counter: AtomicCounter,
    finished: FinishedSignal,
    error_reported: AtomicBool,
    out_data: Mutex<Option<ExecBatch>>,
    downstream: Arc<dyn ExecNode>,
    upstream: Mutex<Option<Weak<dyn ExecNode>>>,
    self_weak: Weak<GroupByNode>,
}

impl GroupByNode {
    pub fn try_new(
        ctx: Arc<ExecContext>,
        input_schema: SchemaRef,
        aggs: Vec<Aggregate>,
        keys: Vec<FieldRef>,
        downstream: Arc<dyn ExecNode>,
    ) -> Result<Arc<Self>> {
        let mut key_field_ids = Vec::with_capacity(keys.len());
        let mut key_types = Vec::with_capacity(keys.len());
        for key in &keys {
            let key_id = key.find_one(&input_schema)?;
            key_field_ids.push(key_id);
            key_types.push(input_schema.field(key_id).data_type().clone());
        }
        // Fail at build time on ungroupable key types.
        Grouper::try_new(&key_types)?;

        let mut agg_src_field_ids = Vec::with_capacity(aggs.len());
        let mut kernels = Vec::with_capacity(aggs.len());
        let mut fields = Vec::with_capacity(aggs.len() + keys.len());

        for agg in &aggs {
            let target_id = agg.target.find_one(&input_schema)?;
            let function = resolve_function(&ctx, agg, FunctionKind::HashAggregate)?;
            let options = agg
                .options
                .clone()
                .unwrap_or_else(|| function.default_options());
            let input_type = input_schema.field(target_id).data_type();
            let kernel = function
                .dispatch_exact(input_type, &options)?
                .into_hash(&agg.function)?;

            fields.push(Field::new(&agg.name, kernel.out_type().clone(), true));
            kernels.push(kernel);
            agg_src_field_ids.push(target_id);
        }

        // Aggregate columns come before key columns in the output schema.
        for &key_id in &key_field_ids {
            fields.push(input_schema.field(key_id).clone());
        }

        Ok(Arc::new_cyclic(|self_weak| Self {
            ctx,
            input_schema,
            output_schema: Arc::new(Schema::new(fields)),
            key_field_ids,
            key_types,
            agg_src_field_ids,
            aggs,
            kernels,
            local_states: OnceLock::new(),
            input_counter: AtomicCounter::new(),
            output_counter: AtomicCounter::new(),
            finished: FinishedSignal::new(),
            error_reported: AtomicBool::new(false),
            out_data: Mutex::new(None),
            downstream,
            upstream: Mutex::new(None),
            self_weak: self_weak.clone(),
        }))
    }

    fn local_states(&self) -> Result<&Vec<Mutex<GroupByLocalState>>> {
        self.local_states
            .get()
            .ok_or_else(|| ExecError::invalid("group by node was not started"))
    }

    fn init_local_state(&self, state: &mut GroupByLocalState) -> Result<()> {
        if state.grouper.is_some() {
            return Ok(());
        }
        state.grouper = Some(Grouper::try_new(&self.key_types)?);
        state.states = self.kernels.iter().map(|kernel| kernel.init()).collect();
        Ok(())
    }

    fn consume(&self, batch: &ExecBatch) -> Result<()> {
        let local_states = self.local_states()?;
        let thread_index = self.ctx.thread_indexer().acquire()?;
        let mut state = local_states
            .get(thread_index)
            .ok_or_else(|| {
                ExecError::index(format!(
                    "thread index {} is out of range [0, {})",
                    thread_index,
                    local_states.len()
                ))
            })?
            .lock()
            .expect("group by local state lock");
        self.init_local_state(&mut state)?;

        let key_batch = batch.project(&self.key_field_ids)?;
        let grouper = state
            .grouper
            .as_mut()
            .ok_or_else(|| ExecError::invalid("group by grouper missing"))?;
        let group_ids = grouper.consume(&key_batch)?;
        let num_groups = grouper.num_groups();

        for (idx, kernel_state) in state.states.iter_mut().enumerate() {
            let value = batch.value(self.agg_src_field_ids[idx])?;
            kernel_state.resize(num_groups)?;
            kernel_state.consume(value, group_ids.values())?;
        }
        Ok(())
    }

    /// Folds every non-empty thread-local state into thread 0. The primary
    /// grouper consumes each thread's unique keys; the returned ids are the
    /// transposition the kernel merges apply.
    fn merge_local_states(&self) -> Result<()> {
        let local_states = self.local_states()?;
        let (primary_slot, others) = local_states
            .split_first()
            .ok_or_else(|| ExecError::invalid("group by local state vector is empty"))?;
        let mut primary = primary_slot.lock().expect("group by local state lock");
        self.init_local_state(&mut primary)?;

        for slot in others {
            let mut other = slot.lock().expect("group by local state lock");
            let Some(other_grouper) = other.grouper.take() else {
                continue;
            };
            let uniques = other_grouper.get_uniques()?;
            drop(other_grouper);

            let primary_grouper = primary
                .grouper
                .as_mut()
                .ok_or_else(|| ExecError::invalid("group by grouper missing"))?;
            let transposition = primary_grouper.consume(&uniques)?;
            let num_groups = primary_grouper.num_groups();

            let other_states = std::mem::take(&mut other.states);
            for (idx, other_state) in other_states.into_iter().enumerate() {
                let primary_state = primary
                    .states
                    .get_mut(idx)
                    .ok_or_else(|| ExecError::invalid("group by kernel state missing"))?;
                primary_state.resize(num_groups)?;
                primary_state.merge(other_state, transposition.values())?;
            }
        }
        Ok(())
    }

    fn finalize_output(&self) -> Result<ExecBatch> {
        let local_states = self.local_states()?;
        let mut primary = local_states[0].lock().expect("group by local state lock");
        // The primary state may never have seen a batch.
        self.init_local_state(&mut primary)?;

        let mut columns = Vec::with_capacity(self.kernels.len() + self.key_field_ids.len());
        for state in &mut primary.states {
            columns.push(ExecValue::Array(state.finalize()?));
        }
        let grouper = primary
            .grouper
            .as_ref()
            .ok_or_else(|| ExecError::invalid("group by grouper missing"))?;
        let num_groups = grouper.num_groups();
        let uniques = grouper.get_uniques()?;
        columns.extend(uniques.values().iter().cloned());
        primary.grouper = None;
        primary.states.clear();

        let out = ExecBatch::try_new(columns, num_groups)?;
        let num_chunks = out.num_rows().div_ceil(self.output_chunk_size());
        if self.output_counter.set_total(num_chunks as i64) {
            // Zero output chunks: nothing will increment the counter.
            self.finished.complete();
        }
        Ok(out)
    }

    fn output_nth_chunk(&self, n: usize) {
        // Bail if stop_producing was called.
        if self.finished.is_finished() {
            return;
        }
        let chunk_size = self.output_chunk_size();
        let chunk = {
            let out_data = self.out_data.lock().expect("group by output lock");
            match out_data.as_ref() {
                Some(out) => out.slice(n * chunk_size, chunk_size),
                None => return,
            }
        };
        self.downstream.input_received(chunk);
        if self.output_counter.increment() {
            self.finished.complete();
        }
    }

    fn output_result(&self) -> Result<()> {
        debug!(
            "GroupByNode finish: keys={:?}, {}",
            self.key_field_ids,
            aggregates_to_string(&self.input_schema, &self.aggs, &self.agg_src_field_ids)
        );
        self.merge_local_states()?;
        let out = self.finalize_output()?;
        let num_chunks = self.output_counter.total().unwrap_or(0).max(0) as usize;
        *self.out_data.lock().expect("group by output lock") = Some(out);

        self.downstream.input_finished(num_chunks);

        if let Some(executor) = self.ctx.executor() {
            for n in 0..num_chunks {
                // Bail if stop_producing was called.
                if self.finished.is_finished() {
                    break;
                }
                let node = self
                    .self_weak
                    .upgrade()
                    .ok_or_else(|| ExecError::invalid("group by node dropped before emission"))?;
                executor.execute(move || node.output_nth_chunk(n));
            }
        } else {
            for n in 0..num_chunks {
                self.output_nth_chunk(n);
            }
        }
        Ok(())
    }

    fn output_chunk_size(&self) -> usize {
        let configured = self.ctx.output_chunk_size();
        if configured > 0 {
            configured as usize
        } else {
            DEFAULT_OUTPUT_CHUNK_SIZE
        }
    }

    fn handle_error(&self, error: ExecError) {
        if self.error_reported.swap(true, Ordering::AcqRel) {
            return;
        }
        self.input_counter.cancel();
        self.output_counter.cancel();
        self.downstream.error_received(error);
        self.finished.complete();
    }
}

impl ExecNode for GroupByNode {
    fn kind_name(&self) -> &str {
        "GroupByNode"
    }

    fn output_schema(&self) -> SchemaRef {
        self.output_schema.clone()
    }

    fn start_producing(&self) -> Result<()> {
        let capacity = self.ctx.thread_indexer().capacity();
        let local_states: Vec<Mutex<GroupByLocalState>> = (0..capacity)
            .map(|_| Mutex::new(GroupByLocalState::default()))
            .collect();
        self.local_states
            .set(local_states)
            .map_err(|_| ExecError::invalid("group by node started twice"))?;
        Ok(())
    }

    fn input_received(&self, batch: ExecBatch) {
        // Bail if stop_producing was called.
        if self.finished.is_finished() {
            return;
        }
        if let Err(error) = self.consume(&batch) {
            self.handle_error(error);
            return;
        }
        if self.input_counter.increment() {
            if let Err(error) = self.output_result() {
                self.handle_error(error);
            }
        }
    }

    fn input_finished(&self, total_batches: usize) {
        if self.finished.is_finished() {
            return;
        }
        if self.input_counter.set_total(total_batches as i64) {
            if let Err(error) = self.output_result() {
                self.handle_error(error);
            }
        }
    }

    fn error_received(&self, error: ExecError) {
        self.downstream.error_received(error);
    }

    fn pause_producing(&self, _counter: i32) {
        // Aggregation cannot produce output until the input is exhausted, so
        // there is nothing to slow down without spilling partial state.
    }

    fn resume_producing(&self, _counter: i32) {}

    fn stop_producing(&self) {
        debug!("GroupByNode stop_producing");
        self.input_counter.cancel();
        if self.output_counter.cancel() {
            self.finished.complete();
        }
        forward_upstream(&self.upstream, |upstream| upstream.stop_producing());
    }

    fn finished(&self) -> FinishedSignal {
        self.finished.clone()
    }

    fn set_upstream(&self, upstream: Weak<dyn ExecNode>) {
        *self.upstream.lock().expect("upstream lock") = Some(upstream);
    }
}
