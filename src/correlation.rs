//! Correlation of submitted tasks with their results.
//!
//! Submissions and result deliveries arrive in no particular order: a client
//! may await a task before its result is published, and a result may land
//! before anyone asked for it. Both sides converge on the same cell through
//! an atomic fetch-or-create on the table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Notify;
use tracing::error;

use crate::error::{CourierError, CourierResult};

/// Terminal outcome of a task, as decoded from the result message.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The task completed and returned this value
    Success(Value),
    /// The task (or its dispatch) failed worker-side
    Failure {
        /// Short error kind
        exc_type: String,
        /// Worker-side error message
        exc_message: String,
    },
}

impl TaskOutcome {
    /// Convert into the client-facing result.
    pub fn into_result(self) -> CourierResult<Value> {
        match self {
            TaskOutcome::Success(value) => Ok(value),
            TaskOutcome::Failure {
                exc_type,
                exc_message,
            } => Err(CourierError::Worker {
                exc_type,
                exc_message,
            }),
        }
    }
}

/// A single-assignment slot for one task's outcome.
#[derive(Debug, Default)]
pub struct ResultCell {
    state: Mutex<Option<TaskOutcome>>,
    notify: Notify,
}

impl ResultCell {
    /// Create an unresolved cell
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the cell with an outcome.
    ///
    /// Returns `false` if the cell was already resolved, in which case the
    /// new outcome is discarded. A duplicate resolution is an internal
    /// invariant violation on the caller's side.
    pub fn resolve(&self, outcome: TaskOutcome) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.is_some() {
            return false;
        }
        *state = Some(outcome);
        drop(state);
        self.notify.notify_waiters();
        true
    }

    /// The outcome, if the cell has been resolved.
    pub fn peek(&self) -> Option<TaskOutcome> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Wait until the cell is resolved.
    pub async fn wait(&self) -> TaskOutcome {
        loop {
            // Register before peeking so a resolve between the two cannot
            // be missed.
            let notified = self.notify.notified();
            if let Some(outcome) = self.peek() {
                return outcome;
            }
            notified.await;
        }
    }
}

struct Entry {
    cell: Arc<ResultCell>,
    created_at: Instant,
}

/// Fetch-or-create table of correlation cells keyed by task id.
///
/// Entries older than the retention window are swept opportunistically on
/// access so results that are never collected do not accumulate forever.
pub struct ResultTable {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl ResultTable {
    /// Create a table with the given retention window
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// The cell for `task_id`, creating it if absent.
    ///
    /// Waiter and deliverer both call this and receive the same cell
    /// regardless of which arrives first.
    pub fn cell(&self, task_id: &str) -> Arc<ResultCell> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        Arc::clone(
            &entries
                .entry(task_id.to_string())
                .or_insert_with(|| Entry {
                    cell: Arc::new(ResultCell::new()),
                    created_at: Instant::now(),
                })
                .cell,
        )
    }

    /// Resolve the cell for `task_id`, logging a duplicate resolution.
    pub fn deliver(&self, task_id: &str, outcome: TaskOutcome) {
        let cell = self.cell(task_id);
        let accepted = cell.resolve(outcome);
        debug_assert!(accepted, "result for {task_id} delivered twice");
        if !accepted {
            error!(task_id, "discarding duplicate result delivery");
        }
    }

    /// Number of live entries, for diagnostics.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Whether the table holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
