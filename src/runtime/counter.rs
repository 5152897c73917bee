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
//! Completion bookkeeping for exec nodes.
//!
//! Responsibilities:
//! - Counts processed batches against a total that may arrive before, after
//!   or interleaved with the increments, and hands the completion edge to
//!   exactly one caller.
//! - Provides the one-shot finished signal each node resolves exactly once.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Counter tracking progress toward a total that is set exactly once.
///
/// `increment`, `set_total` and `cancel` each return `true` for at most one
/// caller across the counter's lifetime; that caller owns the completion
/// transition (running finish, or acknowledging cancellation).
#[derive(Debug)]
pub struct AtomicCounter {
    count: AtomicI64,
    total: AtomicI64,
    complete: AtomicBool,
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self {
            count: AtomicI64::new(0),
            total: AtomicI64::new(-1),
            complete: AtomicBool::new(false),
        }
    }
}

impl AtomicCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }

    /// The declared total, if `set_total` has been called.
    pub fn total(&self) -> Option<i64> {
        let total = self.total.load(Ordering::Acquire);
        (total >= 0).then_some(total)
    }

    /// Returns true iff this increment reached the declared total.
    pub fn increment(&self) -> bool {
        if self.complete.load(Ordering::Acquire) {
            return false;
        }
        let count = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        if count != self.total.load(Ordering::Acquire) {
            return false;
        }
        self.done_once()
    }

    /// Returns true iff the running count has already reached `total`.
    pub fn set_total(&self, total: i64) -> bool {
        self.total.store(total, Ordering::Release);
        if self.count.load(Ordering::Acquire) != total {
            return false;
        }
        self.done_once()
    }

    /// Returns true iff this call is the one that completed the counter.
    pub fn cancel(&self) -> bool {
        self.done_once()
    }

    pub fn completed(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    fn done_once(&self) -> bool {
        self.complete
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[derive(Debug, Default)]
struct SignalInner {
    finished: Mutex<bool>,
    cond: Condvar,
    flag: AtomicBool,
}

/// One-shot completion event. Cloned handles observe the same signal.
#[derive(Clone, Debug, Default)]
pub struct FinishedSignal {
    inner: Arc<SignalInner>,
}

impl FinishedSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the signal finished. Returns true iff this call did the marking.
    pub fn complete(&self) -> bool {
        let first = self
            .inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            let mut finished = self.inner.finished.lock().expect("finished signal lock");
            *finished = true;
            self.inner.cond.notify_all();
        }
        first
    }

    pub fn is_finished(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    pub fn wait(&self) {
        let mut finished = self.inner.finished.lock().expect("finished signal lock");
        while !*finished {
            finished = self
                .inner
                .cond
                .wait(finished)
                .expect("finished signal wait");
        }
    }

    /// Returns true if the signal resolved within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut finished = self.inner.finished.lock().expect("finished signal lock");
        let deadline = std::time::Instant::now() + timeout;
        while !*finished {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .cond
                .wait_timeout(finished, deadline - now)
                .expect("finished signal wait");
            finished = guard;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_then_total() {
        let counter = AtomicCounter::new();
        assert!(!counter.increment());
        assert!(!counter.increment());
        assert!(counter.set_total(2));
        assert!(counter.completed());
        assert!(!counter.increment());
    }

    #[test]
    fn test_total_then_increment() {
        let counter = AtomicCounter::new();
        assert!(!counter.set_total(2));
        assert!(!counter.increment());
        assert!(counter.increment());
        assert!(counter.completed());
    }

    #[test]
    fn test_zero_total_completes_immediately() {
        let counter = AtomicCounter::new();
        assert!(counter.set_total(0));
    }

    #[test]
    fn test_cancel_claims_completion_once() {
        let counter = AtomicCounter::new();
        assert!(counter.cancel());
        assert!(!counter.cancel());
        assert!(!counter.set_total(0));
    }

    #[test]
    fn test_signal_resolves_once() {
        let signal = FinishedSignal::new();
        assert!(!signal.is_finished());
        assert!(signal.complete());
        assert!(!signal.complete());
        assert!(signal.is_finished());
        signal.wait();
    }

    #[test]
    fn test_signal_wakes_waiter() {
        let signal = FinishedSignal::new();
        let waiter = signal.clone();
        let handle = std::thread::spawn(move || waiter.wait());
        std::thread::sleep(Duration::from_millis(10));
        signal.complete();
        handle.join().expect("waiter join");
    }
}
