//! Category workers
//!
//! A worker is one crawl pipeline running in isolation: its own OS thread,
//! its own single-threaded tokio runtime, its own HTTP client, database
//! connections and rate controller. It talks to the supervisor only through
//! channels.

use crate::config::Config;
use crate::crawler::{CrawlPipeline, PipelineContext, SessionOutcome, SourceClient};
use crate::progress::open_progress_store;
use crate::rate::RateAdaptiveController;
use crate::state::{CrawlCounters, WorkerState};
use crate::storage::open_catalog_store;
use crate::supervisor::messages::{LogLevel, WorkerCommand, WorkerEvent, WorkerMessage};
use crate::HarvestError;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot, Notify};

/// What the supervisor hands a launcher
pub struct WorkerSpec {
    pub category: String,
    pub generation: u64,
    pub events: mpsc::UnboundedSender<WorkerEvent>,
    /// Cumulative counters, kept by the supervisor across restarts
    pub counters: Arc<CrawlCounters>,
}

/// Supervisor-side end of a running worker
#[derive(Debug)]
pub struct WorkerHandle {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    abort: Option<oneshot::Sender<()>>,
}

impl WorkerHandle {
    pub fn new(
        commands: mpsc::UnboundedSender<WorkerCommand>,
        abort: oneshot::Sender<()>,
    ) -> Self {
        Self {
            commands,
            abort: Some(abort),
        }
    }

    /// Sends a command, returning false if the worker is gone
    pub fn send(&self, command: WorkerCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Drops the worker's session future without waiting for a boundary
    pub fn force_terminate(&mut self) {
        if let Some(abort) = self.abort.take() {
            let _ = abort.send(());
        }
    }
}

/// Starts workers; the seam that lets the supervisor be tested without threads
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, spec: WorkerSpec) -> Result<WorkerHandle, HarvestError>;
}

/// Sends worker messages tagged with category and generation
#[derive(Debug, Clone)]
pub struct Reporter {
    category: String,
    generation: u64,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Reporter {
    pub fn new(category: &str, generation: u64, events: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self {
            category: category.to_string(),
            generation,
            events,
        }
    }

    pub fn send(&self, message: WorkerMessage) {
        // A closed channel means the supervisor is gone; nobody is left to tell
        let _ = self.events.send(WorkerEvent {
            category: self.category.clone(),
            generation: self.generation,
            message,
        });
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.send(WorkerMessage::Log {
            level,
            message: message.into(),
        });
    }
}

/// Reports `Exited` when dropped, including during a panic unwind
pub struct ExitGuard {
    reporter: Reporter,
}

impl ExitGuard {
    pub fn new(reporter: Reporter) -> Self {
        Self { reporter }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.reporter.send(WorkerMessage::Exited {
            panicked: std::thread::panicking(),
        });
    }
}

/// Resolves when the supervisor asks for a forced stop
///
/// A dropped handle is not an abort request.
pub async fn abort_requested(abort: oneshot::Receiver<()>) {
    if abort.await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Production launcher: one OS thread and runtime per crawl pipeline
pub struct PipelineLauncher {
    config: Arc<Config>,
    config_hash: Option<String>,
}

impl PipelineLauncher {
    pub fn new(config: Arc<Config>, config_hash: Option<String>) -> Self {
        Self {
            config,
            config_hash,
        }
    }
}

impl WorkerLauncher for PipelineLauncher {
    fn launch(&self, spec: WorkerSpec) -> Result<WorkerHandle, HarvestError> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (abort_tx, abort_rx) = oneshot::channel();

        let config = Arc::clone(&self.config);
        let config_hash = self.config_hash.clone();
        let name = format!("worker-{}", spec.category);

        std::thread::Builder::new()
            .name(name)
            .stack_size(config.supervisor.worker_stack_size * 1024 * 1024)
            .spawn(move || run_worker_thread(config, config_hash, spec, command_rx, abort_rx))?;

        Ok(WorkerHandle::new(command_tx, abort_tx))
    }
}

fn run_worker_thread(
    config: Arc<Config>,
    config_hash: Option<String>,
    spec: WorkerSpec,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    abort: oneshot::Receiver<()>,
) {
    let reporter = Reporter::new(&spec.category, spec.generation, spec.events.clone());
    let _guard = ExitGuard::new(reporter.clone());

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            reporter.send(WorkerMessage::Error {
                message: format!("failed to build runtime: {}", e),
                fatal: true,
            });
            return;
        }
    };

    runtime.block_on(run_worker(
        config,
        config_hash,
        spec,
        reporter.clone(),
        commands,
        abort,
    ));
}

fn build_pipeline(
    config: &Config,
    config_hash: Option<String>,
    category: &str,
    running: Arc<AtomicBool>,
    rate: Arc<Mutex<RateAdaptiveController>>,
    counters: Arc<CrawlCounters>,
) -> Result<CrawlPipeline, HarvestError> {
    let client = SourceClient::new(config.api.clone(), &config.user_agent)?;
    let store = open_catalog_store(Path::new(&config.storage.database_path))?;
    let progress = open_progress_store(&config.storage)?;

    let pipeline = CrawlPipeline::new(
        category,
        config.crawler.clone(),
        PipelineContext {
            client,
            store: Box::new(store),
            progress,
            rate,
            running,
            counters,
        },
    );

    Ok(match config_hash {
        Some(hash) => pipeline.with_config_hash(hash),
        None => pipeline,
    })
}

/// Body of a worker, running on its own runtime
async fn run_worker(
    config: Arc<Config>,
    config_hash: Option<String>,
    spec: WorkerSpec,
    reporter: Reporter,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    abort: oneshot::Receiver<()>,
) {
    let running = Arc::new(AtomicBool::new(true));
    let rate = Arc::new(Mutex::new(RateAdaptiveController::new(config.rate.clone())));
    let start = Arc::new(Notify::new());

    let mut pipeline = match build_pipeline(
        &config,
        config_hash,
        &spec.category,
        Arc::clone(&running),
        Arc::clone(&rate),
        Arc::clone(&spec.counters),
    ) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            reporter.send(WorkerMessage::Error {
                message: format!("failed to set up pipeline: {}", e),
                fatal: true,
            });
            return;
        }
    };

    // The listener answers probes while the session awaits
    let listener = tokio::spawn(listen(
        commands,
        reporter.clone(),
        Arc::clone(&running),
        Arc::clone(&rate),
        Arc::clone(&spec.counters),
        Arc::clone(&start),
    ));

    let abort = abort_requested(abort);
    tokio::pin!(abort);

    tokio::select! {
        _ = start.notified() => {}
        _ = &mut abort => {
            listener.abort();
            return;
        }
    }

    reporter.send(WorkerMessage::Status {
        state: WorkerState::Running,
        outcome: None,
        counters: spec.counters.snapshot(),
    });

    let result = tokio::select! {
        result = pipeline.run_session() => result,
        _ = &mut abort => {
            reporter.log(LogLevel::Warn, "session aborted by supervisor");
            listener.abort();
            return;
        }
    };

    match result {
        Ok(outcome) => {
            reporter.send(WorkerMessage::Status {
                state: WorkerState::Completed,
                outcome: Some(outcome),
                counters: spec.counters.snapshot(),
            });
            if outcome == SessionOutcome::Stopped || !running.load(Ordering::Relaxed) {
                reporter.send(WorkerMessage::ShutdownAck);
            }
        }
        Err(e) => {
            reporter.send(WorkerMessage::Error {
                message: e.to_string(),
                fatal: true,
            });
        }
    }

    listener.abort();
}

/// Handles supervisor commands for the lifetime of the worker
async fn listen(
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    reporter: Reporter,
    running: Arc<AtomicBool>,
    rate: Arc<Mutex<RateAdaptiveController>>,
    counters: Arc<CrawlCounters>,
    start: Arc<Notify>,
) {
    let mut started = false;

    while let Some(command) = commands.recv().await {
        match command {
            WorkerCommand::Start => {
                if !started {
                    started = true;
                    start.notify_one();
                }
            }
            WorkerCommand::Stop => {
                running.store(false, Ordering::Relaxed);
                reporter.log(LogLevel::Info, "stop requested");
                if !started {
                    started = true;
                    start.notify_one();
                }
            }
            WorkerCommand::Status => {
                let state = if started {
                    WorkerState::Running
                } else {
                    WorkerState::Starting
                };
                reporter.send(WorkerMessage::Status {
                    state,
                    outcome: None,
                    counters: counters.snapshot(),
                });
            }
            WorkerCommand::HealthCheck => {
                let rate = rate.lock().unwrap_or_else(PoisonError::into_inner);
                reporter.send(WorkerMessage::Health {
                    healthy: rate.is_healthy(),
                    rate: rate.state().clone(),
                });
            }
        }
    }
}
