// src/core/supervisor/process_table.rs

//! `ProcessSlot` and the supervisor's in-memory process table (spec §3.1
//! "ProcessSlot", §4.E).

use std::time::Instant;

use tokio::process::Child;

/// One configured remote's pair of worker processes and restart bookkeeping
/// (spec §3.1).
pub struct ProcessSlot {
    pub alias: String,
    pub mon_child: Option<Child>,
    pub log_child: Option<Child>,
    pub start_time: Instant,
    pub next_retry_time_log: Option<Instant>,
    pub number_of_restarts: u32,
    pub disabled: bool,
}

impl ProcessSlot {
    pub fn new(alias: String, disabled: bool) -> Self {
        Self {
            alias,
            mon_child: None,
            log_child: None,
            start_time: Instant::now(),
            next_retry_time_log: None,
            number_of_restarts: 0,
            disabled,
        }
    }

    pub fn mon_pid(&self) -> Option<i32> {
        self.mon_child.as_ref().and_then(|c| c.id()).map(|p| p as i32)
    }

    pub fn log_pid(&self) -> Option<i32> {
        self.log_child.as_ref().and_then(|c| c.id()).map(|p| p as i32)
    }

    /// Whether `next_retry_time_log` has passed, i.e. a crashed log worker
    /// is due for a restart attempt (spec §4.E "Scheduling").
    pub fn log_retry_due(&self) -> bool {
        match self.next_retry_time_log {
            Some(t) => Instant::now() >= t,
            None => true,
        }
    }
}
