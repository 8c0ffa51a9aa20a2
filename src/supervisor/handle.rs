//! Operational handle for a running supervisor
//!
//! The [`Crawler`] is the only way to reach the supervisor task. Every call
//! is a request message with a oneshot reply, so the handle is cheap to clone
//! and safe to use from any task.

use crate::crawler::SessionOutcome;
use crate::progress::{CrawlProgress, FailedPages};
use crate::rate::RateState;
use crate::state::{CounterSnapshot, WorkerState};
use crate::HarvestError;
use tokio::sync::{mpsc, oneshot};

/// Coarse status of one category worker
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub category: String,
    pub state: WorkerState,
    pub restart_count: u32,
    pub last_outcome: Option<SessionOutcome>,
    pub last_error: Option<String>,
    pub counters: CounterSnapshot,
    /// Result of the most recent health probe
    pub healthy: Option<bool>,
    pub rate: Option<RateState>,
    pub progress: Option<CrawlProgress>,
}

/// Requests accepted by the supervisor task
#[derive(Debug)]
pub enum SupervisorRequest {
    StartCategory {
        category: String,
        reply: oneshot::Sender<Result<(), HarvestError>>,
    },
    PauseCategory {
        category: String,
        reply: oneshot::Sender<Result<(), HarvestError>>,
    },
    Status {
        reply: oneshot::Sender<Vec<WorkerStatus>>,
    },
    ErrorLog {
        category: String,
        reply: oneshot::Sender<Result<FailedPages, HarvestError>>,
    },
    ResetCategory {
        category: String,
        reply: oneshot::Sender<Result<(), HarvestError>>,
    },
    Shutdown {
        reply: oneshot::Sender<Vec<WorkerStatus>>,
    },
}

/// Handle to the supervisor task
#[derive(Debug, Clone)]
pub struct Crawler {
    requests: mpsc::Sender<SupervisorRequest>,
}

fn gone() -> HarvestError {
    HarvestError::Supervisor("supervisor is not running".to_string())
}

impl Crawler {
    pub(crate) fn new(requests: mpsc::Sender<SupervisorRequest>) -> Self {
        Self { requests }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SupervisorRequest,
    ) -> Result<T, HarvestError> {
        let (reply, response) = oneshot::channel();
        self.requests.send(build(reply)).await.map_err(|_| gone())?;
        response.await.map_err(|_| gone())
    }

    /// Launches the worker of a category unless it is already running
    pub async fn start_category(&self, category: &str) -> Result<(), HarvestError> {
        let category = category.to_string();
        self.request(|reply| SupervisorRequest::StartCategory { category, reply })
            .await?
    }

    /// Stops a category's worker at its next boundary without restarting it
    pub async fn pause_category(&self, category: &str) -> Result<(), HarvestError> {
        let category = category.to_string();
        self.request(|reply| SupervisorRequest::PauseCategory { category, reply })
            .await?
    }

    /// Status of every supervised category
    pub async fn status(&self) -> Result<Vec<WorkerStatus>, HarvestError> {
        self.request(|reply| SupervisorRequest::Status { reply }).await
    }

    /// Logged failures of a category
    pub async fn error_log(&self, category: &str) -> Result<FailedPages, HarvestError> {
        let category = category.to_string();
        self.request(|reply| SupervisorRequest::ErrorLog { category, reply })
            .await?
    }

    /// Forgets a category's cursor, error log and counters
    pub async fn reset_category(&self, category: &str) -> Result<(), HarvestError> {
        let category = category.to_string();
        self.request(|reply| SupervisorRequest::ResetCategory { category, reply })
            .await?
    }

    /// Stops every worker and ends the supervisor task
    ///
    /// Returns the final status of each category.
    pub async fn shutdown(&self) -> Result<Vec<WorkerStatus>, HarvestError> {
        self.request(|reply| SupervisorRequest::Shutdown { reply }).await
    }
}
