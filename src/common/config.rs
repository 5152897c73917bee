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
//! Engine configuration loaded from a toml file or environment overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_output_chunk_size() -> i64 {
    32 * 1024
}

#[derive(Clone, Debug, Deserialize)]
pub struct EngineConfig {
    /// tracing EnvFilter expression, e.g. "acerite=debug".
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Maximum rows per emitted output chunk. Non-positive means the
    /// built-in default.
    #[serde(default = "default_output_chunk_size")]
    pub output_chunk_size: i64,

    /// Worker pool size for chunked output emission. Zero disables the
    /// executor and chunks are emitted inline.
    #[serde(default)]
    pub worker_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            output_chunk_size: default_output_chunk_size(),
            worker_threads: 0,
        }
    }
}

impl EngineConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let cfg: EngineConfig = toml::from_str(&text)
            .with_context(|| format!("parse config file {}", path.display()))?;
        Ok(cfg)
    }

    /// Environment variables win over file values: `ACERITE_LOG_FILTER`,
    /// `ACERITE_OUTPUT_CHUNK_SIZE`, `ACERITE_WORKER_THREADS`.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("ACERITE_LOG_FILTER") {
            if !v.trim().is_empty() {
                self.log_filter = v;
            }
        }
        if let Ok(v) = std::env::var("ACERITE_OUTPUT_CHUNK_SIZE") {
            if let Ok(parsed) = v.trim().parse() {
                self.output_chunk_size = parsed;
            }
        }
        if let Ok(v) = std::env::var("ACERITE_WORKER_THREADS") {
            if let Ok(parsed) = v.trim().parse() {
                self.worker_threads = parsed;
            }
        }
        self
    }
}
