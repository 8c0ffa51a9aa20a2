//! Messages exchanged between the supervisor and its workers

use crate::crawler::SessionOutcome;
use crate::rate::RateState;
use crate::state::{CounterSnapshot, WorkerState};

/// Severity of a forwarded worker log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Worker → supervisor
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    /// A log line to re-emit under the worker's category
    Log { level: LogLevel, message: String },

    /// Lifecycle update
    Status {
        state: WorkerState,
        outcome: Option<SessionOutcome>,
        counters: CounterSnapshot,
    },

    /// Reply to a health probe
    Health { healthy: bool, rate: RateState },

    /// A failure; fatal ones end the worker and trigger a restart
    Error { message: String, fatal: bool },

    /// The worker saw the stop command and finished its session
    ShutdownAck,

    /// The worker thread is gone; sent on drop, so panics are covered
    Exited { panicked: bool },
}

/// Supervisor → worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
    /// Begin the crawl session
    Start,
    /// Finish at the next page or batch boundary
    Stop,
    /// Report a `Status` message
    Status,
    /// Report a `Health` message
    HealthCheck,
}

/// A worker message tagged with its sender
///
/// The generation distinguishes a restarted worker from its predecessor, whose
/// late messages are ignored.
#[derive(Debug, Clone)]
pub struct WorkerEvent {
    pub category: String,
    pub generation: u64,
    pub message: WorkerMessage,
}
