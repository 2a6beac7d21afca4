//! Procedures for dispatch tests
//!
//! A procedure receives a single `usize`; the fixtures here take their own address as
//! the argument, see [`ExecutionLog::argument`] and [`Gate::argument`].

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Condvar, Mutex,
    },
    time::{Duration, Instant},
};

use crossbeam_queue::SegQueue;
use crossbeam_utils::Backoff;
use psci_mp_services::topology::CoreCoordinate;

use crate::cpu::current_coordinate;

/// Records which simulated processor ran the procedure, in execution order.
#[derive(Default)]
pub struct ExecutionLog {
    entries: SegQueue<CoreCoordinate>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn argument(&self) -> usize {
        self as *const Self as usize
    }

    pub extern "C" fn record(argument: usize) {
        // SAFETY: `argument` comes from `ExecutionLog::argument` and the log outlives the
        // dispatch
        let log = unsafe { &*(argument as *const Self) };
        if let Some(coordinate) = current_coordinate() {
            log.entries.push(coordinate);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn drain(&self) -> Vec<CoreCoordinate> {
        std::iter::from_fn(|| self.entries.pop()).collect()
    }
}

/// Holds the procedure on its processor until the gate opens.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
    entered: AtomicUsize,
}

impl Gate {
    /// Gates are leaked so a processor still leaving [`hold`](Gate::hold) never sees a
    /// dangling gate.
    pub fn leaked() -> &'static Self {
        Box::leak(Box::default())
    }

    pub fn argument(&'static self) -> usize {
        self as *const Self as usize
    }

    pub extern "C" fn hold(argument: usize) {
        // SAFETY: `argument` comes from `Gate::argument` on a leaked gate
        let gate = unsafe { &*(argument as *const Self) };
        gate.entered.fetch_add(1, Ordering::AcqRel);

        let mut open = gate.open.lock().unwrap();
        while !*open {
            open = gate.cond.wait(open).unwrap();
        }
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_all();
    }

    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::Acquire)
    }

    /// Waits for `count` processors to be held, at most `timeout`.
    pub fn wait_entered(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.entered() >= count)
    }
}

/// Spins on `condition` with backoff until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    let backoff = Backoff::new();
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        if backoff.is_completed() {
            std::thread::sleep(Duration::from_micros(100));
        } else {
            backoff.snooze();
        }
    }
}
