//! Worker supervisor
//!
//! The supervisor owns one entry per category and drives it through
//! `idle → starting → running → completed | error | terminated`. Workers that
//! fail are relaunched after an exponential backoff; the restart count only
//! goes back to zero when a session completes or the category is reset.
//! Everything happens on one task in a `select!` loop over worker events,
//! operator requests, the health interval and the next scheduled launch.

use crate::config::SupervisorConfig;
use crate::crawler::SessionOutcome;
use crate::progress::ProgressStore;
use crate::rate::RateState;
use crate::state::{CrawlCounters, WorkerState};
use crate::supervisor::backoff::RestartBackoff;
use crate::supervisor::handle::{Crawler, SupervisorRequest, WorkerStatus};
use crate::supervisor::messages::{LogLevel, WorkerCommand, WorkerEvent, WorkerMessage};
use crate::supervisor::worker::{WorkerHandle, WorkerLauncher, WorkerSpec};
use crate::HarvestError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

const REQUEST_BUFFER: usize = 32;

/// Supervisor-side bookkeeping for one category
struct WorkerEntry {
    state: WorkerState,
    generation: u64,
    handle: Option<WorkerHandle>,
    counters: Arc<CrawlCounters>,
    restart_count: u32,
    /// When a relaunch is due, after a failure or for a rerun
    launch_at: Option<Instant>,
    last_seen: Instant,
    probe_sent_at: Option<Instant>,
    last_outcome: Option<SessionOutcome>,
    last_error: Option<String>,
    healthy: Option<bool>,
    rate: Option<RateState>,
    /// Paused by the operator; no restarts or reruns until started again
    held: bool,
    stopping: bool,
}

impl WorkerEntry {
    fn new() -> Self {
        Self {
            state: WorkerState::Idle,
            generation: 0,
            handle: None,
            counters: Arc::new(CrawlCounters::new()),
            restart_count: 0,
            launch_at: None,
            last_seen: Instant::now(),
            probe_sent_at: None,
            last_outcome: None,
            last_error: None,
            healthy: None,
            rate: None,
            held: false,
            stopping: false,
        }
    }

    fn set_state(&mut self, category: &str, next: WorkerState) {
        if self.state == next {
            return;
        }
        match self.state.transition(next) {
            Ok(state) => self.state = state,
            Err(e) => {
                // Late or out-of-order messages; keep the supervisor's view
                tracing::debug!("[{}] ignoring state change: {}", category, e);
            }
        }
    }
}

/// Runs and restarts one worker per category
pub struct WorkerSupervisor {
    config: SupervisorConfig,
    backoff: RestartBackoff,
    launcher: Arc<dyn WorkerLauncher>,
    workers: BTreeMap<String, WorkerEntry>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    requests: mpsc::Receiver<SupervisorRequest>,
    progress: Option<ProgressStore>,
}

impl WorkerSupervisor {
    /// Creates a supervisor and the handle used to control it
    ///
    /// # Arguments
    ///
    /// * `config` - Restart, health and shutdown settings
    /// * `categories` - Categories to supervise; all are launched by `run`
    /// * `launcher` - Starts the actual workers
    /// * `progress` - Progress store used for error logs, resets and status
    pub fn new(
        config: SupervisorConfig,
        categories: Vec<String>,
        launcher: Arc<dyn WorkerLauncher>,
        progress: Option<ProgressStore>,
    ) -> (Self, Crawler) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (requests_tx, requests) = mpsc::channel(REQUEST_BUFFER);

        let workers = categories
            .into_iter()
            .map(|category| (category, WorkerEntry::new()))
            .collect();

        let supervisor = Self {
            backoff: RestartBackoff::from_config(&config),
            config,
            launcher,
            workers,
            events_tx,
            events_rx,
            requests,
            progress,
        };
        (supervisor, Crawler::new(requests_tx))
    }

    /// Runs the supervision loop until shutdown is requested
    ///
    /// Shutdown is requested through [`Crawler::shutdown`], or implicitly when
    /// every handle has been dropped.
    pub async fn run(mut self) {
        let categories: Vec<String> = self.workers.keys().cloned().collect();
        tracing::info!("Supervising {} categories", categories.len());
        for category in &categories {
            self.launch(category);
        }

        let mut health = tokio::time::interval(self.config.health_interval());
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately
        health.tick().await;

        loop {
            let next_launch = self.next_launch();

            tokio::select! {
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                request = self.requests.recv() => match request {
                    Some(SupervisorRequest::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(self.statuses());
                        return;
                    }
                    Some(request) => self.handle_request(request),
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },
                _ = health.tick() => self.check_health(),
                _ = tokio::time::sleep_until(next_launch.unwrap_or_else(Instant::now)), if next_launch.is_some() => {
                    self.launch_due();
                }
            }
        }
    }

    fn next_launch(&self) -> Option<Instant> {
        self.workers.values().filter_map(|w| w.launch_at).min()
    }

    fn launch_due(&mut self) {
        let now = Instant::now();
        let due: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, w)| w.launch_at.is_some_and(|at| at <= now))
            .map(|(category, _)| category.clone())
            .collect();

        for category in due {
            self.launch(&category);
        }
    }

    /// Launches a fresh generation of a category's worker
    fn launch(&mut self, category: &str) {
        let Some(entry) = self.workers.get_mut(category) else {
            return;
        };
        entry.launch_at = None;
        if entry.state.is_active() {
            return;
        }

        entry.set_state(category, WorkerState::Starting);
        entry.generation += 1;
        entry.stopping = false;
        entry.probe_sent_at = None;
        entry.last_seen = Instant::now();

        let spec = WorkerSpec {
            category: category.to_string(),
            generation: entry.generation,
            events: self.events_tx.clone(),
            counters: Arc::clone(&entry.counters),
        };

        match self.launcher.launch(spec) {
            Ok(handle) => {
                handle.send(WorkerCommand::Start);
                entry.handle = Some(handle);
                tracing::info!(
                    "[{}] worker launched (generation {})",
                    category,
                    entry.generation
                );
            }
            Err(e) => {
                tracing::error!("[{}] failed to launch worker: {}", category, e);
                entry.last_error = Some(e.to_string());
                entry.set_state(category, WorkerState::Error);
                self.schedule_restart(category);
            }
        }
    }

    fn schedule_restart(&mut self, category: &str) {
        let Some(entry) = self.workers.get_mut(category) else {
            return;
        };
        if entry.held {
            return;
        }

        let delay = self.backoff.delay(entry.restart_count);
        entry.restart_count += 1;
        entry.launch_at = Some(Instant::now() + delay);
        tracing::warn!(
            "[{}] restart #{} scheduled in {:?}",
            category,
            entry.restart_count,
            delay
        );
    }

    /// Schedules the session after a finished one
    ///
    /// A paused session always resumes after `resume-delay`; a completed one
    /// only runs again when a rerun interval is configured.
    fn schedule_next_session(&mut self, category: &str) {
        let Some(entry) = self.workers.get_mut(category) else {
            return;
        };
        if entry.held {
            return;
        }

        let delay = if entry.last_outcome == Some(SessionOutcome::Paused) {
            self.config.resume_delay()
        } else {
            match self.config.rerun_interval() {
                Some(interval) => interval,
                None => return,
            }
        };
        entry.launch_at = Some(Instant::now() + delay);
        tracing::info!("[{}] next session in {:?}", category, delay);
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        let category = event.category;
        let Some(entry) = self.workers.get_mut(&category) else {
            return;
        };
        if event.generation != entry.generation {
            tracing::debug!(
                "[{}] dropping message from generation {}",
                category,
                event.generation
            );
            return;
        }

        entry.last_seen = Instant::now();
        entry.probe_sent_at = None;

        match event.message {
            WorkerMessage::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!(category = %category, "{}", message),
                LogLevel::Info => tracing::info!(category = %category, "{}", message),
                LogLevel::Warn => tracing::warn!(category = %category, "{}", message),
                LogLevel::Error => tracing::error!(category = %category, "{}", message),
            },
            WorkerMessage::Status {
                state,
                outcome,
                counters: _,
            } => {
                // A session that ended on the stop flag was terminated, not completed
                let state = match outcome {
                    Some(SessionOutcome::Stopped) => WorkerState::Terminated,
                    _ => state,
                };
                entry.set_state(&category, state);
                if let Some(outcome) = outcome {
                    entry.last_outcome = Some(outcome);
                    tracing::info!("[{}] session {}", category, outcome.as_str());
                    if state == WorkerState::Completed {
                        entry.restart_count = 0;
                        entry.last_error = None;
                    }
                }
            }
            WorkerMessage::Health { healthy, rate } => {
                if !healthy {
                    tracing::warn!(
                        category = %category,
                        consecutive_errors = rate.consecutive_errors,
                        rate_limited = rate.is_rate_limited,
                        "Worker reports an unhealthy upstream"
                    );
                }
                entry.healthy = Some(healthy);
                entry.rate = Some(rate);
            }
            WorkerMessage::Error { message, fatal } => {
                entry.last_error = Some(message.clone());
                if fatal {
                    tracing::error!("[{}] worker failed: {}", category, message);
                    entry.set_state(&category, WorkerState::Error);
                    if !entry.stopping {
                        self.schedule_restart(&category);
                    }
                } else {
                    tracing::warn!("[{}] {}", category, message);
                }
            }
            WorkerMessage::ShutdownAck => {
                tracing::debug!("[{}] acknowledged stop", category);
            }
            WorkerMessage::Exited { panicked } => {
                entry.handle = None;

                if entry.stopping || entry.held {
                    entry.set_state(&category, WorkerState::Terminated);
                    return;
                }

                let state = entry.state;
                match state {
                    WorkerState::Completed => self.schedule_next_session(&category),
                    // Restart already scheduled by the fatal error
                    WorkerState::Error => {}
                    WorkerState::Terminated => {}
                    _ => {
                        let reason = if panicked {
                            "worker panicked"
                        } else {
                            "worker exited unexpectedly"
                        };
                        tracing::error!("[{}] {}", category, reason);
                        entry.last_error = Some(reason.to_string());
                        entry.set_state(&category, WorkerState::Error);
                        self.schedule_restart(&category);
                    }
                }
            }
        }
    }

    /// Probes quiet workers and restarts unreachable or hung ones
    fn check_health(&mut self) {
        let threshold = self.config.inactivity_threshold();
        let now = Instant::now();
        let mut failed = Vec::new();

        for (category, entry) in self.workers.iter_mut() {
            if !entry.state.is_active() || entry.stopping {
                continue;
            }
            let Some(handle) = entry.handle.as_ref() else {
                continue;
            };

            if let Some(sent) = entry.probe_sent_at {
                if now.duration_since(sent) > threshold {
                    tracing::error!("[{}] no reply to health probe", category);
                    failed.push(category.clone());
                }
                continue;
            }

            if now.duration_since(entry.last_seen) > threshold {
                if handle.send(WorkerCommand::HealthCheck) {
                    entry.probe_sent_at = Some(now);
                } else {
                    tracing::error!("[{}] health probe undeliverable", category);
                    failed.push(category.clone());
                }
            }
        }

        for category in failed {
            if let Some(entry) = self.workers.get_mut(&category) {
                if let Some(mut handle) = entry.handle.take() {
                    handle.force_terminate();
                }
                entry.last_error = Some("health check failed".to_string());
                entry.set_state(&category, WorkerState::Error);
                // Messages from the abandoned generation are ignored from now on
                entry.generation += 1;
            }
            self.schedule_restart(&category);
        }
    }

    fn handle_request(&mut self, request: SupervisorRequest) {
        match request {
            SupervisorRequest::StartCategory { category, reply } => {
                let result = match self.workers.get_mut(&category) {
                    Some(entry) => {
                        entry.held = false;
                        entry.restart_count = 0;
                        self.launch(&category);
                        Ok(())
                    }
                    None => Err(HarvestError::UnknownCategory(category)),
                };
                let _ = reply.send(result);
            }
            SupervisorRequest::PauseCategory { category, reply } => {
                let result = match self.workers.get_mut(&category) {
                    Some(entry) => {
                        entry.held = true;
                        entry.launch_at = None;
                        if let Some(handle) = entry.handle.as_ref() {
                            entry.stopping = true;
                            handle.send(WorkerCommand::Stop);
                        }
                        tracing::info!("[{}] paused", category);
                        Ok(())
                    }
                    None => Err(HarvestError::UnknownCategory(category)),
                };
                let _ = reply.send(result);
            }
            SupervisorRequest::Status { reply } => {
                for entry in self.workers.values() {
                    if let Some(handle) = entry.handle.as_ref() {
                        handle.send(WorkerCommand::Status);
                    }
                }
                let _ = reply.send(self.statuses());
            }
            SupervisorRequest::ErrorLog { category, reply } => {
                let result = if !self.workers.contains_key(&category) {
                    Err(HarvestError::UnknownCategory(category))
                } else {
                    match self.progress.as_ref() {
                        Some(progress) => progress.get_failed_pages(&category).map_err(Into::into),
                        None => Err(HarvestError::Supervisor(
                            "no progress store configured".to_string(),
                        )),
                    }
                };
                let _ = reply.send(result);
            }
            SupervisorRequest::ResetCategory { category, reply } => {
                let result = match self.workers.get_mut(&category) {
                    Some(entry) => {
                        entry.counters.reset();
                        entry.restart_count = 0;
                        entry.last_error = None;
                        match self.progress.as_ref() {
                            Some(progress) => progress.reset_progress(&category).map_err(Into::into),
                            None => Ok(()),
                        }
                    }
                    None => Err(HarvestError::UnknownCategory(category)),
                };
                let _ = reply.send(result);
            }
            SupervisorRequest::Shutdown { .. } => {
                unreachable!("shutdown is handled by the run loop")
            }
        }
    }

    fn statuses(&self) -> Vec<WorkerStatus> {
        self.workers
            .iter()
            .map(|(category, entry)| WorkerStatus {
                category: category.clone(),
                state: entry.state,
                restart_count: entry.restart_count,
                last_outcome: entry.last_outcome,
                last_error: entry.last_error.clone(),
                counters: entry.counters.snapshot(),
                healthy: entry.healthy,
                rate: entry.rate.clone(),
                progress: self
                    .progress
                    .as_ref()
                    .map(|progress| progress.get_progress(category)),
            })
            .collect()
    }

    /// Stops every worker, forcing the ones that miss the timeout
    async fn shutdown(&mut self) {
        tracing::info!("Shutting down workers");

        for (category, entry) in self.workers.iter_mut() {
            entry.launch_at = None;
            if let Some(handle) = entry.handle.as_ref() {
                entry.stopping = true;
                if !handle.send(WorkerCommand::Stop) {
                    tracing::debug!("[{}] worker already gone", category);
                }
            }
        }

        let deadline = Instant::now() + self.config.shutdown_timeout();
        while self.workers.values().any(|w| w.handle.is_some()) {
            match tokio::time::timeout_at(deadline, self.events_rx.recv()).await {
                Ok(Some(event)) => self.handle_event(event),
                Ok(None) | Err(_) => break,
            }
        }

        for (category, entry) in self.workers.iter_mut() {
            if let Some(mut handle) = entry.handle.take() {
                tracing::warn!("[{}] did not stop in time, terminating", category);
                handle.force_terminate();
                entry.set_state(category, WorkerState::Terminated);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::worker::{abort_requested, ExitGuard, Reporter};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Script {
        Complete,
        FailFatal,
        Panic,
        /// Reports running and acknowledges a stop
        Run,
        /// Ignores stop requests; only an abort ends it
        Hang,
        /// Ends its session early with a paused outcome
        Pause,
        /// Runs but never answers a health check
        Deaf,
        /// Runs with its command channel closed
        Detached,
    }

    /// Launcher that runs scripted workers as tasks on the test runtime
    struct ScriptedLauncher {
        scripts: Mutex<Vec<Script>>,
        launches: AtomicUsize,
        generations: Mutex<Vec<u64>>,
    }

    impl ScriptedLauncher {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts),
                launches: AtomicUsize::new(0),
                generations: Mutex::new(Vec::new()),
            })
        }

        fn launches(&self) -> usize {
            self.launches.load(Ordering::SeqCst)
        }

        fn generations(&self) -> Vec<u64> {
            self.generations.lock().unwrap().clone()
        }

        async fn wait_for_launches(&self, count: usize) {
            for _ in 0..100 {
                if self.launches() >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            panic!("only {} of {} launches happened", self.launches(), count);
        }
    }

    impl WorkerLauncher for ScriptedLauncher {
        fn launch(&self, spec: WorkerSpec) -> Result<WorkerHandle, HarvestError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            self.generations.lock().unwrap().push(spec.generation);
            let script = {
                let mut scripts = self.scripts.lock().unwrap();
                if scripts.len() > 1 {
                    scripts.remove(0)
                } else {
                    scripts[0]
                }
            };

            let (command_tx, mut command_rx) = mpsc::unbounded_channel();
            let (abort_tx, abort_rx) = oneshot::channel();

            tokio::spawn(async move {
                let reporter = Reporter::new(&spec.category, spec.generation, spec.events.clone());
                let _guard = ExitGuard::new(reporter.clone());
                let abort = abort_requested(abort_rx);
                tokio::pin!(abort);

                let work = async move {
                    while let Some(command) = command_rx.recv().await {
                        match (command, script) {
                            (WorkerCommand::Start, Script::Complete) => {
                                CrawlCounters::add(&spec.counters.pages, 1);
                                reporter.send(WorkerMessage::Status {
                                    state: WorkerState::Running,
                                    outcome: None,
                                    counters: spec.counters.snapshot(),
                                });
                                reporter.send(WorkerMessage::Status {
                                    state: WorkerState::Completed,
                                    outcome: Some(SessionOutcome::Completed),
                                    counters: spec.counters.snapshot(),
                                });
                                return;
                            }
                            (WorkerCommand::Start, Script::FailFatal) => {
                                reporter.send(WorkerMessage::Status {
                                    state: WorkerState::Running,
                                    outcome: None,
                                    counters: spec.counters.snapshot(),
                                });
                                reporter.send(WorkerMessage::Error {
                                    message: "escalated".to_string(),
                                    fatal: true,
                                });
                                return;
                            }
                            (WorkerCommand::Start, Script::Panic) => {
                                reporter.send(WorkerMessage::Status {
                                    state: WorkerState::Running,
                                    outcome: None,
                                    counters: spec.counters.snapshot(),
                                });
                                // Exit without a terminal status, like an unwinding thread
                                return;
                            }
                            (WorkerCommand::Start, Script::Pause) => {
                                reporter.send(WorkerMessage::Status {
                                    state: WorkerState::Running,
                                    outcome: None,
                                    counters: spec.counters.snapshot(),
                                });
                                reporter.send(WorkerMessage::Status {
                                    state: WorkerState::Completed,
                                    outcome: Some(SessionOutcome::Paused),
                                    counters: spec.counters.snapshot(),
                                });
                                return;
                            }
                            (WorkerCommand::Start, Script::Run | Script::Hang | Script::Deaf) => {
                                reporter.send(WorkerMessage::Status {
                                    state: WorkerState::Running,
                                    outcome: None,
                                    counters: spec.counters.snapshot(),
                                });
                            }
                            (WorkerCommand::Start, Script::Detached) => {
                                reporter.send(WorkerMessage::Status {
                                    state: WorkerState::Running,
                                    outcome: None,
                                    counters: spec.counters.snapshot(),
                                });
                                break;
                            }
                            (WorkerCommand::Stop, Script::Hang) => {}
                            (WorkerCommand::Stop, _) => {
                                reporter.send(WorkerMessage::ShutdownAck);
                                return;
                            }
                            (WorkerCommand::HealthCheck, Script::Deaf) => {}
                            (WorkerCommand::HealthCheck, _) => {
                                reporter.send(WorkerMessage::Health {
                                    healthy: true,
                                    rate: RateState::default(),
                                });
                            }
                            (WorkerCommand::Status, _) => {}
                        }
                    }
                    // Keep running once the supervisor is gone or the channel is closed
                    drop(command_rx);
                    std::future::pending::<()>().await;
                };

                tokio::select! {
                    _ = work => {}
                    _ = &mut abort => {}
                }
            });

            Ok(WorkerHandle::new(command_tx, abort_tx))
        }
    }

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            restart_base_delay: 0,
            restart_multiplier: 2.0,
            max_restart_delay: 0,
            health_interval: 3600,
            inactivity_threshold: 3600,
            shutdown_timeout: 1,
            rerun_interval: None,
            resume_delay: 0,
            worker_stack_size: 1,
        }
    }

    async fn wait_for_state(crawler: &Crawler, category: &str, state: WorkerState) -> WorkerStatus {
        for _ in 0..200 {
            let statuses = crawler.status().await.unwrap();
            if let Some(status) = statuses.into_iter().find(|s| s.category == category) {
                if status.state == state {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} never reached {:?}", category, state);
    }

    #[tokio::test]
    async fn test_completed_worker_is_not_restarted() {
        let launcher = ScriptedLauncher::new(vec![Script::Complete]);
        let (supervisor, crawler) =
            WorkerSupervisor::new(config(), vec!["ongoing".to_string()], launcher.clone(), None);
        let task = tokio::spawn(supervisor.run());

        let status = wait_for_state(&crawler, "ongoing", WorkerState::Completed).await;
        assert_eq!(status.last_outcome, Some(SessionOutcome::Completed));
        assert_eq!(status.counters.pages, 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(launcher.launches(), 1);

        crawler.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_fatal_error_restarts_worker() {
        let launcher = ScriptedLauncher::new(vec![Script::FailFatal, Script::FailFatal, Script::Complete]);
        let (supervisor, crawler) =
            WorkerSupervisor::new(config(), vec!["ongoing".to_string()], launcher.clone(), None);
        let task = tokio::spawn(supervisor.run());

        let status = wait_for_state(&crawler, "ongoing", WorkerState::Completed).await;
        assert_eq!(launcher.launches(), 3);
        // Completion resets the restart counter
        assert_eq!(status.restart_count, 0);
        assert!(status.last_error.is_none());

        crawler.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_abnormal_exit_restarts_worker() {
        let launcher = ScriptedLauncher::new(vec![Script::Panic, Script::Complete]);
        let (supervisor, crawler) =
            WorkerSupervisor::new(config(), vec!["ongoing".to_string()], launcher.clone(), None);
        let task = tokio::spawn(supervisor.run());

        wait_for_state(&crawler, "ongoing", WorkerState::Completed).await;
        assert_eq!(launcher.launches(), 2);

        crawler.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_terminates_stuck_worker() {
        let launcher = ScriptedLauncher::new(vec![Script::Hang]);
        let (supervisor, crawler) =
            WorkerSupervisor::new(config(), vec!["ongoing".to_string()], launcher.clone(), None);
        let task = tokio::spawn(supervisor.run());

        wait_for_state(&crawler, "ongoing", WorkerState::Running).await;
        let statuses = crawler.shutdown().await.unwrap();
        task.await.unwrap();

        assert_eq!(statuses[0].state, WorkerState::Terminated);
        assert_eq!(launcher.launches(), 1);
    }

    #[tokio::test]
    async fn test_pause_and_start_category() {
        let launcher = ScriptedLauncher::new(vec![Script::Run]);
        let (supervisor, crawler) =
            WorkerSupervisor::new(config(), vec!["ongoing".to_string()], launcher.clone(), None);
        let task = tokio::spawn(supervisor.run());

        wait_for_state(&crawler, "ongoing", WorkerState::Running).await;
        crawler.pause_category("ongoing").await.unwrap();
        wait_for_state(&crawler, "ongoing", WorkerState::Terminated).await;

        // A paused category is not restarted
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(launcher.launches(), 1);

        crawler.start_category("ongoing").await.unwrap();
        wait_for_state(&crawler, "ongoing", WorkerState::Running).await;
        assert_eq!(launcher.launches(), 2);

        crawler.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_category() {
        let launcher = ScriptedLauncher::new(vec![Script::Complete]);
        let (supervisor, crawler) =
            WorkerSupervisor::new(config(), vec!["ongoing".to_string()], launcher, None);
        let task = tokio::spawn(supervisor.run());

        assert!(matches!(
            crawler.start_category("missing").await,
            Err(HarvestError::UnknownCategory(_))
        ));
        assert!(matches!(
            crawler.error_log("ongoing").await,
            Err(HarvestError::Supervisor(_))
        ));

        crawler.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rerun_after_completion() {
        let launcher = ScriptedLauncher::new(vec![Script::Complete]);
        let mut config = config();
        config.rerun_interval = Some(0);
        let (supervisor, crawler) =
            WorkerSupervisor::new(config, vec!["ongoing".to_string()], launcher.clone(), None);
        let task = tokio::spawn(supervisor.run());

        for _ in 0..200 {
            if launcher.launches() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(launcher.launches() >= 3);

        crawler.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_paused_session_resumes_without_rerun_interval() {
        let launcher = ScriptedLauncher::new(vec![Script::Pause, Script::Complete]);
        let (supervisor, crawler) =
            WorkerSupervisor::new(config(), vec!["ongoing".to_string()], launcher.clone(), None);
        let task = tokio::spawn(supervisor.run());

        launcher.wait_for_launches(2).await;
        let status = wait_for_state(&crawler, "ongoing", WorkerState::Completed).await;
        assert_eq!(status.last_outcome, Some(SessionOutcome::Completed));

        // A completed session is not rerun without an interval
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(launcher.launches(), 2);

        crawler.shutdown().await.unwrap();
        task.await.unwrap();
    }

    fn health_config() -> SupervisorConfig {
        SupervisorConfig {
            health_interval: 1,
            inactivity_threshold: 1,
            ..config()
        }
    }

    #[tokio::test]
    async fn test_unanswered_health_check_restarts_worker() {
        let launcher = ScriptedLauncher::new(vec![Script::Deaf, Script::Run]);
        let (supervisor, crawler) = WorkerSupervisor::new(
            health_config(),
            vec!["ongoing".to_string()],
            launcher.clone(),
            None,
        );
        let task = tokio::spawn(supervisor.run());

        launcher.wait_for_launches(2).await;
        let status = wait_for_state(&crawler, "ongoing", WorkerState::Running).await;
        assert_eq!(status.restart_count, 1);
        assert_eq!(status.last_error.as_deref(), Some("health check failed"));
        // The abandoned generation is skipped
        assert_eq!(launcher.generations(), vec![1, 3]);

        crawler.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_undeliverable_health_check_restarts_worker() {
        let launcher = ScriptedLauncher::new(vec![Script::Detached, Script::Run]);
        let (supervisor, crawler) = WorkerSupervisor::new(
            health_config(),
            vec!["ongoing".to_string()],
            launcher.clone(),
            None,
        );
        let task = tokio::spawn(supervisor.run());

        launcher.wait_for_launches(2).await;
        let status = wait_for_state(&crawler, "ongoing", WorkerState::Running).await;
        assert_eq!(status.restart_count, 1);
        assert_eq!(status.last_error.as_deref(), Some("health check failed"));
        assert_eq!(launcher.generations(), vec![1, 3]);

        crawler.shutdown().await.unwrap();
        task.await.unwrap();
    }
}
