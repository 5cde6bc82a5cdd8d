use std::sync::{Condvar, Mutex};

use log::debug;

/// Counting gate bounding the number of simultaneous isolated executions
#[derive(Debug)]
pub(crate) struct ExecutionGate {
  max: usize,
  active: Mutex<usize>,
  released: Condvar,
}

pub(crate) struct GatePermit<'a> {
  gate: &'a ExecutionGate,
}

impl ExecutionGate {
  pub(crate) fn new(max: usize) -> Self {
    ExecutionGate {
      max: max.max(1),
      active: Mutex::new(0),
      released: Condvar::new(),
    }
  }

  /// Block until a slot is free
  pub(crate) fn acquire(&self) -> GatePermit<'_> {
    let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
    while *active >= self.max {
      debug!("All {} execution slots are busy, waiting", self.max);
      active = self
        .released
        .wait(active)
        .unwrap_or_else(|e| e.into_inner());
    }
    *active += 1;
    GatePermit { gate: self }
  }
}

impl Drop for GatePermit<'_> {
  fn drop(&mut self) {
    let mut active = self.gate.active.lock().unwrap_or_else(|e| e.into_inner());
    *active -= 1;
    self.gate.released.notify_one();
  }
}
