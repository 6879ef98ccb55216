//! Per-run log tail monitor.
//!
//! Each active run gets one [`LogMonitor`]. Its background task sleeps for
//! the poll interval, then:
//!
//! 1. probes session liveness; a vanished session emits
//!    [`EventKind::SessionDied`], marks the run `failed`, and ends the task,
//! 2. reads whatever the agent appended to its log since the last tick,
//! 3. decodes `[FACTORY:...]` markers and hands each event to the observer
//!    in log order,
//! 4. records the consumed offset, phase, and cost in one store update; a
//!    stop that cuts a batch short records only the delivered prefix,
//! 5. ends the task after a `COMPLETE` marker, marking the run `completed`.
//!
//! Environment hiccups (missing log, read errors, multiplexer timeouts) are
//! retried on the next tick.

use std::io::SeekFrom;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::models::event::{EventKind, FactoryEvent, PhaseAction};
use crate::models::run::{RunStatus, RunUpdate};
use crate::observer::EventObserver;
use crate::persistence::project_repo::ProjectRepo;
use crate::protocol::MarkerStream;
use crate::session::SessionHandle;

/// Largest slice of the log read in one tick.
pub const MAX_CHUNK_BYTES: u64 = 1024 * 1024;

/// Timing knobs for a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Sleep between ticks.
    pub poll_interval: Duration,
    /// Bound on each log read.
    pub io_timeout: Duration,
    /// Bound on each observer call.
    pub observer_timeout: Duration,
    /// Largest slice of the log read in one tick.
    pub max_chunk: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            io_timeout: Duration::from_secs(10),
            observer_timeout: Duration::from_secs(30),
            max_chunk: MAX_CHUNK_BYTES,
        }
    }
}

/// Collaborators shared by every monitor.
#[derive(Clone)]
pub struct MonitorDeps {
    /// Liveness probe.
    pub sessions: SessionHandle,
    /// Run state store.
    pub repo: ProjectRepo,
    /// Event sink.
    pub observer: Arc<dyn EventObserver>,
    /// Timing.
    pub settings: MonitorSettings,
}

/// Lifecycle of a monitor.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    /// Constructed, not started.
    Idle,
    /// Background task polling.
    Running,
    /// Finished, cancelled, or never started before a stop.
    Stopped,
}

enum Tick {
    Continue,
    Finished,
}

/// Tails one run's log and turns markers into events and state transitions.
pub struct LogMonitor {
    project: String,
    engine: String,
    log_path: PathBuf,
    deps: MonitorDeps,
    state: Arc<Mutex<MonitorState>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LogMonitor {
    /// Construct an idle monitor for `(project, engine)` reading `log_path`.
    #[must_use]
    pub fn new(
        project: impl Into<String>,
        engine: impl Into<String>,
        log_path: impl Into<PathBuf>,
        deps: MonitorDeps,
    ) -> Self {
        Self {
            project: project.into(),
            engine: engine.into(),
            log_path: log_path.into(),
            deps,
            state: Arc::new(Mutex::new(MonitorState::Idle)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Project this monitor belongs to.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Engine this monitor belongs to.
    #[must_use]
    pub fn engine(&self) -> &str {
        &self.engine
    }

    /// Log file being tailed.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tailing from the beginning of the log.
    ///
    /// Returns `false` (and does nothing) unless the monitor is idle.
    pub fn start(&self) -> bool {
        self.start_at(0)
    }

    /// Start tailing from byte `offset`, e.g. a persisted position.
    ///
    /// Returns `false` (and does nothing) unless the monitor is idle.
    pub fn start_at(&self, offset: u64) -> bool {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != MonitorState::Idle {
                debug!(project = %self.project, engine = %self.engine, state = ?*state, "monitor not idle; start ignored");
                return false;
            }
            *state = MonitorState::Running;
        }

        let worker = Worker {
            project: self.project.clone(),
            engine: self.engine.clone(),
            log_path: self.log_path.clone(),
            deps: self.deps.clone(),
            cancel: self.cancel.clone(),
            offset,
            stream: MarkerStream::new(),
        };
        let state = Arc::clone(&self.state);
        let span = info_span!("log_monitor", project = %self.project, engine = %self.engine);

        let handle = tokio::spawn(
            async move {
                info!(offset, "monitor started");
                worker.run().await;
                *state.lock().unwrap_or_else(PoisonError::into_inner) = MonitorState::Stopped;
                info!("monitor stopped");
            }
            .instrument(span),
        );
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        true
    }

    /// Request cooperative cancellation. Safe to call in any state.
    pub fn stop(&self) {
        self.cancel.cancel();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == MonitorState::Idle {
            *state = MonitorState::Stopped;
        }
    }

    /// Wait for the background task to exit, if it was started.
    pub async fn join(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(%err, project = %self.project, engine = %self.engine, "monitor task failed");
            }
        }
    }

    /// [`stop`](Self::stop) then [`join`](Self::join).
    pub async fn stop_and_wait(&self) {
        self.stop();
        self.join().await;
    }
}

impl Drop for LogMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// State owned by the background task.
struct Worker {
    project: String,
    engine: String,
    log_path: PathBuf,
    deps: MonitorDeps,
    cancel: CancellationToken,
    offset: u64,
    stream: MarkerStream,
}

impl Worker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!("monitor cancelled");
                    return;
                }
                () = tokio::time::sleep(self.deps.settings.poll_interval) => {}
            }

            if let Tick::Finished = self.tick().await {
                return;
            }
        }
    }

    async fn tick(&mut self) -> Tick {
        match self
            .deps
            .sessions
            .liveness(&self.project, &self.engine)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!("session gone while run active");
                self.emit(EventKind::SessionDied).await;
                self.record(RunUpdate::finish(RunStatus::Failed)).await;
                return Tick::Finished;
            }
            Err(_) => return Tick::Continue,
        }

        let Some(bytes) = self.read_new_bytes().await else {
            return Tick::Continue;
        };
        let read_from = self.offset;
        let mut consumed = read_from.saturating_sub(self.stream.pending_len() as u64);
        self.offset += bytes.len() as u64;

        let mut update = RunUpdate::default();
        let mut cost: Option<f64> = None;
        let mut finished = false;
        let mut interrupted = false;

        for located in self.stream.feed_located(&bytes) {
            if self.cancel.is_cancelled() {
                interrupted = true;
                break;
            }
            let kind = EventKind::from(located.marker);
            match &kind {
                EventKind::Phase {
                    number,
                    action: PhaseAction::End,
                    ..
                } => update.phase = Some(update.phase.map_or(*number, |p| p.max(*number))),
                EventKind::Cost { amount, .. } => cost = Some(cost.unwrap_or(0.0) + amount),
                _ => {}
            }
            let complete = matches!(kind, EventKind::Complete { .. });
            self.emit(kind).await;
            consumed = read_from + located.end as u64;
            if complete {
                finished = true;
                break;
            }
        }

        // A stop mid-batch leaves undelivered markers for the next monitor.
        update.log_offset = Some(if interrupted {
            consumed
        } else {
            self.offset.saturating_sub(self.stream.pending_len() as u64)
        });
        update.add_cost = cost;
        if finished {
            info!("run complete");
            update.status = Some(RunStatus::Completed);
            update.finished_at = Some(chrono::Utc::now());
        }
        self.record(update).await;

        if finished {
            Tick::Finished
        } else {
            Tick::Continue
        }
    }

    /// Read bytes appended since `offset`, bounded by size and time.
    ///
    /// Returns `None` when there is nothing to read or the read failed.
    async fn read_new_bytes(&mut self) -> Option<Vec<u8>> {
        let timeout = self.deps.settings.io_timeout;
        let len = match tokio::time::timeout(timeout, tokio::fs::metadata(&self.log_path)).await {
            Ok(Ok(meta)) => meta.len(),
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Ok(Err(err)) => {
                debug!(%err, "log stat failed");
                return None;
            }
            Err(_) => {
                debug!("log stat timed out");
                return None;
            }
        };

        if len < self.offset {
            warn!(len, offset = self.offset, "log shrank; restarting from the beginning");
            self.offset = 0;
            self.stream.reset();
        }
        if len == self.offset {
            return None;
        }

        let want = (len - self.offset).min(self.deps.settings.max_chunk);
        let read = read_range(&self.log_path, self.offset, want);
        match tokio::time::timeout(timeout, read).await {
            Ok(Ok(bytes)) if bytes.is_empty() => None,
            Ok(Ok(bytes)) => Some(bytes),
            Ok(Err(err)) => {
                debug!(%err, "log read failed");
                None
            }
            Err(_) => {
                debug!("log read timed out");
                None
            }
        }
    }

    async fn emit(&self, kind: EventKind) {
        let event = FactoryEvent::new(&self.project, &self.engine, kind);
        deliver(
            self.deps.observer.as_ref(),
            &event,
            self.deps.settings.observer_timeout,
        )
        .await;
    }

    async fn record(&self, update: RunUpdate) {
        if let Err(err) = self
            .deps
            .repo
            .update_run(&self.project, &self.engine, &update)
            .await
        {
            error!(%err, "failed to record run update");
        }
    }
}

/// Deliver one event, containing observer errors, panics, and hangs.
pub(crate) async fn deliver(observer: &dyn EventObserver, event: &FactoryEvent, timeout: Duration) {
    let call = AssertUnwindSafe(async { observer.on_event(event).await }).catch_unwind();
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => warn!(%err, "observer failed"),
        Ok(Err(_)) => error!("observer panicked"),
        Err(_) => warn!("observer timed out"),
    }
}

async fn read_range(path: &Path, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = Vec::new();
    file.take(len).read_to_end(&mut buf).await?;
    Ok(buf)
}
