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
//! Streaming aggregation operators for a columnar dataflow engine.
//!
//! The crate provides the two aggregation exec nodes (scalar aggregate and
//! group-by), the grouper that maps key tuples to dense group ids, and the
//! aggregate kernel implementations they drive.

pub mod common;
pub mod exec;
pub mod runtime;

pub use common::error::{ExecError, Result};
pub use common::logging as acerite_logging;
pub use exec::batch::{ExecBatch, ExecValue, FieldRef};
pub use exec::node::{make_aggregate_node, Aggregate, AggregateNodeOptions, ExecNode};
pub use runtime::context::ExecContext;
