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
//! Name-to-function registry, read-only after construction.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::common::error::{ExecError, Result};
use crate::exec::expr::agg::functions::register_builtins;
use crate::exec::expr::agg::kernel::AggregateFunction;

pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn AggregateFunction>>,
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Later registrations replace earlier ones with the same name.
    pub fn register(&mut self, function: Arc<dyn AggregateFunction>) {
        self.functions
            .insert(function.name().to_string(), function);
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn AggregateFunction>> {
        self.functions.get(name).ok_or_else(|| {
            ExecError::not_implemented(format!("aggregate function {name} is not registered"))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(|name| name.as_str())
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        register_builtins(&mut registry);
        registry
    }
}
