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
//! Aggregation kernel protocol.
//!
//! Responsibilities:
//! - Defines the function/kernel/state contract both aggregation modes share:
//!   dispatch resolves a kernel for an input type, kernels create states,
//!   states accept batches and are merged and finalised by the nodes.
//!
//! Key exported interfaces:
//! - Types: `AggregateFunction`, `Kernel`, `ScalarAggState`, `GroupAggState`.
//!
//! Kernel states are single-owner values: each belongs to one thread while
//! input streams, moves into the primary thread's state at merge, and is
//! dropped after finalisation.

use std::any::Any;
use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::datatypes::DataType;

use crate::common::error::{ExecError, Result};
use crate::exec::batch::ExecValue;
use crate::exec::expr::agg::options::AggOptions;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionKind {
    ScalarAggregate,
    HashAggregate,
}

/// A named aggregate function in the registry.
pub trait AggregateFunction: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> FunctionKind;

    fn default_options(&self) -> AggOptions;

    /// Resolves a kernel for the exact input element type. Input types the
    /// function cannot aggregate are not-implemented errors.
    fn dispatch_exact(&self, input_type: &DataType, options: &AggOptions) -> Result<Kernel>;
}

/// A resolved kernel, matching the kind of the function that produced it.
pub enum Kernel {
    Scalar(Arc<dyn ScalarAggKernel>),
    Hash(Arc<dyn HashAggKernel>),
}

impl Kernel {
    pub fn out_type(&self) -> &DataType {
        match self {
            Kernel::Scalar(kernel) => kernel.out_type(),
            Kernel::Hash(kernel) => kernel.out_type(),
        }
    }

    pub fn into_scalar(self, function: &str) -> Result<Arc<dyn ScalarAggKernel>> {
        match self {
            Kernel::Scalar(kernel) => Ok(kernel),
            Kernel::Hash(_) => Err(ExecError::invalid(format!(
                "function {function} resolved a non scalar-aggregate kernel"
            ))),
        }
    }

    pub fn into_hash(self, function: &str) -> Result<Arc<dyn HashAggKernel>> {
        match self {
            Kernel::Hash(kernel) => Ok(kernel),
            Kernel::Scalar(_) => Err(ExecError::invalid(format!(
                "function {function} resolved a non hash-aggregate kernel"
            ))),
        }
    }
}

/// Kernel of a scalar-aggregate function: reduces a column to one value.
pub trait ScalarAggKernel: Send + Sync {
    fn out_type(&self) -> &DataType;

    fn init(&self) -> Box<dyn ScalarAggState>;
}

/// Kernel of a hash-aggregate function: reduces (column, group id) pairs to
/// one value per group.
pub trait HashAggKernel: Send + Sync {
    fn out_type(&self) -> &DataType;

    fn init(&self) -> Box<dyn GroupAggState>;
}

/// Partial state of a scalar aggregate, owned by one thread slot.
pub trait ScalarAggState: Send {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;

    /// Folds `num_rows` logical rows of `input` into the state. Broadcast
    /// scalars count once per row, null scalars included.
    fn consume(&mut self, input: &ExecValue, num_rows: usize) -> Result<()>;

    fn merge(&mut self, other: Box<dyn ScalarAggState>) -> Result<()>;

    /// Length-1 array holding the reduced value.
    fn finalize(&mut self) -> Result<ArrayRef>;
}

/// Partial per-group state of a hash aggregate, owned by one thread slot.
pub trait GroupAggState: Send {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;

    /// Grows the state to `num_groups` slots, initialising new slots to the
    /// kernel's identity. Never shrinks.
    fn resize(&mut self, num_groups: usize) -> Result<()>;

    /// Folds `input[row]` into group `group_ids[row]` for every row.
    fn consume(&mut self, input: &ExecValue, group_ids: &[u32]) -> Result<()>;

    /// Folds `other` into this state; source group `i` lands in group
    /// `transposition[i]`.
    fn merge(&mut self, other: Box<dyn GroupAggState>, transposition: &[u32]) -> Result<()>;

    /// Array with one slot per group, in group-id order.
    fn finalize(&mut self) -> Result<ArrayRef>;
}

pub(super) fn downcast_merge_state<T: 'static>(
    state: Box<dyn Any + Send>,
    function: &str,
) -> Result<Box<T>> {
    state
        .downcast::<T>()
        .map_err(|_| ExecError::invalid(format!("{function} merge received a foreign state")))
}
