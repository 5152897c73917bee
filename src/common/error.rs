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
//! Execution error taxonomy shared by the grouper, kernels and exec nodes.

use arrow::error::ArrowError;

/// The result type of execution.
pub type Result<T> = std::result::Result<T, ExecError>;

/// The error type of execution.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ExecError {
    /// Functionality the engine knows about but does not provide yet
    /// (unknown function names, unsupported key types, dictionary
    /// unification across batches).
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// A caller violated the operator contract: wrong kernel kind for the
    /// mode, schema mismatch, unresolvable field references, null group ids.
    #[error("invalid: {0}")]
    Invalid(String),

    /// A thread index fell outside the indexer capacity. This indicates a
    /// scheduler contract violation, not bad user input.
    #[error("index error: {0}")]
    Index(String),

    /// Arithmetic overflow inside a kernel that checks for it.
    #[error("overflow: {0}")]
    Overflow(String),

    /// The operator was stopped before finishing.
    #[error("cancelled")]
    Cancelled,

    #[error("arrow error: {0}")]
    Arrow(String),
}

impl ExecError {
    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::NotImplemented(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn index(msg: impl Into<String>) -> Self {
        Self::Index(msg.into())
    }

    pub fn overflow(msg: impl Into<String>) -> Self {
        Self::Overflow(msg.into())
    }
}

impl From<ArrowError> for ExecError {
    fn from(err: ArrowError) -> Self {
        Self::Arrow(err.to_string())
    }
}
