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
use std::sync::Mutex;
use std::thread::ThreadId;

use hashbrown::HashMap;

use crate::common::error::{ExecError, Result};

/// Assigns a stable dense index in `[0, capacity)` to each calling thread.
///
/// Exec nodes size their per-thread state vectors to `capacity()` once at
/// start and index them without locking on the hot path; the indexer itself
/// is only consulted to translate a `ThreadId` into that slot.
#[derive(Debug)]
pub struct ThreadIndexer {
    capacity: usize,
    slots: Mutex<HashMap<ThreadId, usize>>,
}

impl ThreadIndexer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// One slot per hardware thread plus one for the thread driving the plan.
    pub fn default_capacity() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(8)
            + 1
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Index of the calling thread, assigning the next free slot on first use.
    pub fn acquire(&self) -> Result<usize> {
        let id = std::thread::current().id();
        let mut slots = self.slots.lock().expect("thread indexer lock");
        let next = slots.len();
        let index = *slots.entry(id).or_insert(next);
        if index >= self.capacity {
            return Err(ExecError::index(format!(
                "thread index {} is out of range [0, {})",
                index, self.capacity
            )));
        }
        Ok(index)
    }
}

impl Default for ThreadIndexer {
    fn default() -> Self {
        Self::with_capacity(Self::default_capacity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_thread_same_index() {
        let indexer = ThreadIndexer::with_capacity(4);
        let a = indexer.acquire().expect("acquire");
        let b = indexer.acquire().expect("acquire");
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_threads_distinct_indices() {
        let indexer = std::sync::Arc::new(ThreadIndexer::with_capacity(4));
        let main_index = indexer.acquire().expect("acquire");
        let other = std::sync::Arc::clone(&indexer);
        let other_index = std::thread::spawn(move || other.acquire().expect("acquire"))
            .join()
            .expect("join");
        assert_ne!(main_index, other_index);
    }

    #[test]
    fn test_capacity_exhaustion_is_index_error() {
        let indexer = std::sync::Arc::new(ThreadIndexer::with_capacity(1));
        indexer.acquire().expect("first thread fits");
        let other = std::sync::Arc::clone(&indexer);
        let result = std::thread::spawn(move || other.acquire()).join().expect("join");
        assert!(matches!(result, Err(ExecError::Index(_))));
    }
}
