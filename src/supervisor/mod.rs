//! Supervision of per-category crawl workers
//!
//! # Components
//!
//! - `WorkerSupervisor`: Launches, monitors and restarts one worker per category
//! - `Crawler`: Cloneable handle for status queries and operator commands
//! - `PipelineLauncher`: Runs each pipeline on its own thread and runtime
//! - `RestartBackoff`: Exponential delay between restarts

mod backoff;
mod handle;
mod messages;
#[allow(clippy::module_inception)]
mod supervisor;
mod worker;

pub use backoff::RestartBackoff;
pub use handle::{Crawler, SupervisorRequest, WorkerStatus};
pub use messages::{LogLevel, WorkerCommand, WorkerEvent, WorkerMessage};
pub use supervisor::WorkerSupervisor;
pub use worker::{
    abort_requested, ExitGuard, PipelineLauncher, Reporter, WorkerHandle, WorkerLauncher,
    WorkerSpec,
};
