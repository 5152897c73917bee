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
//! Per-plan execution context shared by every node in a dataflow plan.

use std::sync::Arc;

use threadpool::ThreadPool;

use crate::common::config::EngineConfig;
use crate::exec::expr::agg::registry::FunctionRegistry;
use crate::runtime::thread_indexer::ThreadIndexer;

pub struct ExecContext {
    registry: Arc<FunctionRegistry>,
    thread_indexer: Arc<ThreadIndexer>,
    executor: Option<ThreadPool>,
    output_chunk_size: i64,
}

impl ExecContext {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(FunctionRegistry::default()),
            thread_indexer: Arc::new(ThreadIndexer::default()),
            executor: None,
            output_chunk_size: -1,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let mut ctx = Self::new().with_output_chunk_size(config.output_chunk_size);
        if config.worker_threads > 0 {
            ctx = ctx.with_executor(config.worker_threads);
        }
        ctx
    }

    pub fn with_executor(mut self, worker_threads: usize) -> Self {
        self.executor = Some(ThreadPool::new(worker_threads.max(1)));
        self
    }

    /// Non-positive values fall back to the node's built-in default.
    pub fn with_output_chunk_size(mut self, output_chunk_size: i64) -> Self {
        self.output_chunk_size = output_chunk_size;
        self
    }

    pub fn with_thread_capacity(mut self, capacity: usize) -> Self {
        self.thread_indexer = Arc::new(ThreadIndexer::with_capacity(capacity));
        self
    }

    pub fn with_registry(mut self, registry: Arc<FunctionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn thread_indexer(&self) -> &ThreadIndexer {
        &self.thread_indexer
    }

    pub fn executor(&self) -> Option<&ThreadPool> {
        self.executor.as_ref()
    }

    pub fn output_chunk_size(&self) -> i64 {
        self.output_chunk_size
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new()
    }
}
