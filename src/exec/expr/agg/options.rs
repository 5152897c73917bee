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
//! Options recognised by the built-in aggregate functions.

use crate::common::error::{ExecError, Result};

/// Options of the common scalar-family aggregates (sum, product, mean,
/// min/max, any/all).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScalarAggregateOptions {
    /// When false, any null input taints the result of its group to null.
    pub skip_nulls: bool,
    /// Results with fewer non-null contributions than this are null.
    pub min_count: u32,
}

impl Default for ScalarAggregateOptions {
    fn default() -> Self {
        Self {
            skip_nulls: true,
            min_count: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountMode {
    OnlyValid,
    OnlyNull,
    All,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CountOptions {
    pub mode: CountMode,
}

impl Default for CountOptions {
    fn default() -> Self {
        Self {
            mode: CountMode::OnlyValid,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VarianceOptions {
    /// Delta degrees of freedom: the divisor is `count - ddof`.
    pub ddof: i32,
    pub skip_nulls: bool,
    pub min_count: u32,
}

impl Default for VarianceOptions {
    fn default() -> Self {
        Self {
            ddof: 0,
            skip_nulls: true,
            min_count: 0,
        }
    }
}

/// Function-specific configuration attached to an aggregate.
#[derive(Clone, Debug, PartialEq)]
pub enum AggOptions {
    Scalar(ScalarAggregateOptions),
    Count(CountOptions),
    Variance(VarianceOptions),
}

impl AggOptions {
    pub fn as_scalar(&self, function: &str) -> Result<ScalarAggregateOptions> {
        match self {
            AggOptions::Scalar(options) => Ok(*options),
            other => Err(options_mismatch(function, other)),
        }
    }

    pub fn as_count(&self, function: &str) -> Result<CountOptions> {
        match self {
            AggOptions::Count(options) => Ok(*options),
            other => Err(options_mismatch(function, other)),
        }
    }

    pub fn as_variance(&self, function: &str) -> Result<VarianceOptions> {
        match self {
            AggOptions::Variance(options) => Ok(*options),
            other => Err(options_mismatch(function, other)),
        }
    }
}

fn options_mismatch(function: &str, options: &AggOptions) -> ExecError {
    ExecError::invalid(format!(
        "function {function} does not accept options {options:?}"
    ))
}
