use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use crate::calendar;
use crate::loading::dataset::ResidentDataset;
use crate::loading::handle::LoaderHandle;
use crate::loading::phase::{LoadingPhase, PhaseEvent};
use crate::loading::planner::{self, FetchPlan};
use crate::patient_interface::RawRecord;
use crate::prelude::{
    DataSource, DisplayWindow, Interval, LoaderConfig, LoaderError, LoaderResult, Reshaper,
    TimedEvent,
};
use crate::telemetry::{LogManager, MetricsRecorder};
use crate::tracking::RangeTracker;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

pub type ReadyCallback<E> = Box<dyn Fn(&LoaderSnapshot<E>) + Send + 'static>;
pub type ErrorCallback = Box<dyn Fn(&LoaderError) + Send + 'static>;

/// Frozen view of the loader handed to the rendering layer.
#[derive(Debug, Clone)]
pub struct LoaderSnapshot<E> {
    pub phase: LoadingPhase,
    pub patient: Option<String>,
    pub dataset: Arc<ResidentDataset<E>>,
    pub outer: Option<Interval>,
    pub coverage: Vec<Interval>,
    /// Window queued behind the running fetch cycle.
    pub pending: Option<Interval>,
    pub last_error: Option<LoaderError>,
}

impl<E: TimedEvent> LoaderSnapshot<E> {
    fn idle() -> Self {
        Self {
            phase: LoadingPhase::Idle,
            patient: None,
            dataset: Arc::new(ResidentDataset::new()),
            outer: None,
            coverage: Vec::new(),
            pending: None,
            last_error: None,
        }
    }
}

pub(crate) enum Command<E> {
    Initialize {
        patient: String,
        reply: oneshot::Sender<LoaderResult<()>>,
    },
    Refresh {
        reply: oneshot::Sender<LoaderResult<()>>,
    },
    RequestWindow {
        window: DisplayWindow,
        reply: oneshot::Sender<LoaderResult<bool>>,
    },
    Retry {
        reply: oneshot::Sender<LoaderResult<bool>>,
    },
    OnReady(ReadyCallback<E>),
    OnError(ErrorCallback),
    Shutdown,
}

/// Caller waiting on the outcome of a fetch cycle.
enum Waiter {
    Session(oneshot::Sender<LoaderResult<()>>),
    Window(oneshot::Sender<LoaderResult<bool>>),
}

impl Waiter {
    fn succeed(self) {
        // receivers may have given up; nothing to do then
        match self {
            Waiter::Session(reply) => {
                let _ = reply.send(Ok(()));
            }
            Waiter::Window(reply) => {
                let _ = reply.send(Ok(true));
            }
        }
    }

    fn fail(self, error: LoaderError) {
        match self {
            Waiter::Session(reply) => {
                let _ = reply.send(Err(error));
            }
            Waiter::Window(reply) => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    Initial,
    Incremental,
}

struct Fetched {
    outer: Interval,
    range: Interval,
    raw: Vec<RawRecord>,
}

enum Step<E> {
    Fetching(BoxFuture<LoaderResult<Fetched>>),
    Processing(BoxFuture<LoaderResult<Vec<E>>>),
}

enum StepOutcome<E> {
    Fetched(LoaderResult<Fetched>),
    Processed(LoaderResult<Vec<E>>),
}

/// The single outstanding fetch cycle.
struct Job<E> {
    kind: JobKind,
    requested: Option<Interval>,
    target: Option<Interval>,
    outer: Option<Interval>,
    waiters: Vec<Waiter>,
    step: Step<E>,
}

/// What is needed to re-issue a failed cycle.
struct FailedJob {
    kind: JobKind,
    requested: Option<Interval>,
    target: Option<Interval>,
}

/// Most recent window that arrived while a cycle was running.
struct PendingWindow {
    window: DisplayWindow,
    requested: Interval,
    reply: oneshot::Sender<LoaderResult<bool>>,
}

enum Wake<E> {
    Command(Command<E>),
    Step(StepOutcome<E>),
}

/// Owns the loading state machine, the range tracker and the resident
/// dataset for one patient session at a time.
///
/// All state is mutated by [`TimeWindowLoader::run`] only; callers talk to
/// it through a [`LoaderHandle`]. At most one fetch cycle is in flight, and
/// at most one window waits behind it.
pub struct TimeWindowLoader<S, R: Reshaper> {
    source: Arc<S>,
    reshaper: Arc<R>,
    config: LoaderConfig,
    commands: mpsc::UnboundedReceiver<Command<R::Event>>,
    publisher: watch::Sender<LoaderSnapshot<R::Event>>,
    phase: LoadingPhase,
    patient: Option<String>,
    tracker: Option<RangeTracker>,
    dataset: Arc<ResidentDataset<R::Event>>,
    job: Option<Job<R::Event>>,
    pending: Option<PendingWindow>,
    failed: Option<FailedJob>,
    last_error: Option<LoaderError>,
    ready_callbacks: Vec<ReadyCallback<R::Event>>,
    error_callbacks: Vec<ErrorCallback>,
    logger: LogManager,
    metrics: Arc<MetricsRecorder>,
}

impl<S, R> TimeWindowLoader<S, R>
where
    S: DataSource + 'static,
    R: Reshaper + 'static,
{
    pub fn new(source: S, reshaper: R, config: LoaderConfig) -> (Self, LoaderHandle<R::Event>) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (publisher, snapshots) = watch::channel(LoaderSnapshot::idle());
        let metrics = Arc::new(MetricsRecorder::new());
        let handle = LoaderHandle::new(command_tx, snapshots, Arc::clone(&metrics));
        let loader = Self {
            source: Arc::new(source),
            reshaper: Arc::new(reshaper),
            config,
            commands,
            publisher,
            phase: LoadingPhase::Idle,
            patient: None,
            tracker: None,
            dataset: Arc::new(ResidentDataset::new()),
            job: None,
            pending: None,
            failed: None,
            last_error: None,
            ready_callbacks: Vec::new(),
            error_callbacks: Vec::new(),
            logger: LogManager::new(),
            metrics,
        };
        (loader, handle)
    }

    /// Builds the loader and drives it on the current tokio runtime.
    pub fn spawn(source: S, reshaper: R, config: LoaderConfig) -> LoaderHandle<R::Event> {
        let (loader, handle) = Self::new(source, reshaper, config);
        tokio::spawn(loader.run());
        handle
    }

    /// Processes commands and step completions until shut down or every
    /// handle is dropped.
    pub async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => Wake::Command(command),
                },
                outcome = drive(&mut self.job), if self.job.is_some() => Wake::Step(outcome),
            };
            match wake {
                Wake::Command(command) => self.handle_command(command),
                Wake::Step(outcome) => self.handle_step(outcome),
            }
        }
        self.abandon(LoaderError::Shutdown);
        self.logger.record("loader stopped");
    }

    fn handle_command(&mut self, command: Command<R::Event>) {
        match command {
            Command::Initialize { patient, reply } => {
                self.start_session(patient, Waiter::Session(reply));
            }
            Command::Refresh { reply } => match self.patient.clone() {
                Some(patient) => self.start_session(patient, Waiter::Session(reply)),
                None => {
                    let _ = reply.send(Err(LoaderError::NotInitialized));
                }
            },
            Command::RequestWindow { window, reply } => self.request_window(window, reply),
            Command::Retry { reply } => self.retry(reply),
            Command::OnReady(callback) => self.ready_callbacks.push(callback),
            Command::OnError(callback) => self.error_callbacks.push(callback),
            Command::Shutdown => {}
        }
    }

    fn handle_step(&mut self, outcome: StepOutcome<R::Event>) {
        match outcome {
            StepOutcome::Fetched(Ok(fetched)) => self.begin_processing(fetched),
            StepOutcome::Fetched(Err(error)) => self.fail_job(PhaseEvent::FetchRejected, error),
            StepOutcome::Processed(Ok(events)) => self.complete_job(events),
            StepOutcome::Processed(Err(error)) => {
                self.fail_job(PhaseEvent::ProcessRejected, error)
            }
        }
    }

    fn transition(&mut self, event: PhaseEvent) {
        if let Some(next) = self.phase.on(event) {
            self.logger.phase_change(self.phase, next);
            self.phase = next;
        }
    }

    fn snapshot(&self) -> LoaderSnapshot<R::Event> {
        LoaderSnapshot {
            phase: self.phase,
            patient: self.patient.clone(),
            dataset: Arc::clone(&self.dataset),
            outer: self.tracker.as_ref().map(RangeTracker::outer),
            coverage: self
                .tracker
                .as_ref()
                .map(|tracker| tracker.coverage().to_vec())
                .unwrap_or_default(),
            pending: self.pending.as_ref().map(|pending| pending.requested),
            last_error: self.last_error.clone(),
        }
    }

    fn publish(&self) {
        self.publisher.send_replace(self.snapshot());
    }

    fn announce_ready(&self) {
        let snapshot = self.snapshot();
        self.publisher.send_replace(snapshot.clone());
        for callback in &self.ready_callbacks {
            callback(&snapshot);
        }
    }

    /// Resolves every caller still waiting on this session with `error`.
    fn abandon(&mut self, error: LoaderError) {
        if let Some(job) = self.job.take() {
            for waiter in job.waiters {
                waiter.fail(error.clone());
            }
        }
        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(error));
        }
    }

    fn start_session(&mut self, patient: String, waiter: Waiter) {
        self.abandon(LoaderError::SessionReset);
        self.logger
            .record(&format!("starting session for patient {}", patient));
        self.tracker = None;
        self.dataset = Arc::new(ResidentDataset::new());
        self.failed = None;
        self.last_error = None;
        self.patient = Some(patient);
        self.transition(PhaseEvent::Initialize);
        self.start_initial_fetch(vec![waiter]);
        self.publish();
    }

    fn start_initial_fetch(&mut self, waiters: Vec<Waiter>) {
        let Some(patient) = self.patient.clone() else {
            for waiter in waiters {
                waiter.fail(LoaderError::NotInitialized);
            }
            return;
        };
        let source = Arc::clone(&self.source);
        let lookback = self.config.initial_lookback_weeks;
        let timeout = self.config.fetch_timeout();
        self.metrics.record_fetch();
        let fetch = Box::pin(async move {
            let outer = source.outer_range(&patient).await?.ok_or_else(|| {
                LoaderError::NoData(format!("no data available for patient {}", patient))
            })?;
            let range = calendar::initial_window(outer, lookback)?;
            let raw = fetch_batch(source.as_ref(), &patient, range, timeout).await?;
            Ok::<_, LoaderError>(Fetched { outer, range, raw })
        });
        self.job = Some(Job {
            kind: JobKind::Initial,
            requested: None,
            target: None,
            outer: None,
            waiters,
            step: Step::Fetching(fetch),
        });
    }

    fn start_incremental_fetch(
        &mut self,
        requested: Option<Interval>,
        target: Interval,
        waiters: Vec<Waiter>,
    ) {
        let (Some(patient), Some(outer)) = (
            self.patient.clone(),
            self.tracker.as_ref().map(RangeTracker::outer),
        ) else {
            for waiter in waiters {
                waiter.fail(LoaderError::NotInitialized);
            }
            return;
        };
        self.logger.fetch_issued(&patient, requested, target);
        self.metrics.record_fetch();
        let source = Arc::clone(&self.source);
        let timeout = self.config.fetch_timeout();
        let fetch = Box::pin(async move {
            let raw = fetch_batch(source.as_ref(), &patient, target, timeout).await?;
            Ok::<_, LoaderError>(Fetched {
                outer,
                range: target,
                raw,
            })
        });
        self.job = Some(Job {
            kind: JobKind::Incremental,
            requested,
            target: Some(target),
            outer: Some(outer),
            waiters,
            step: Step::Fetching(fetch),
        });
    }

    fn request_window(&mut self, window: DisplayWindow, reply: oneshot::Sender<LoaderResult<bool>>) {
        match self.phase {
            LoadingPhase::Ready => {
                self.serve_window(window, reply);
            }
            LoadingPhase::Idle => {
                let _ = reply.send(Err(LoaderError::NotInitialized));
            }
            LoadingPhase::Error => {
                let _ = reply.send(self.answer_while_failed(window));
            }
            LoadingPhase::InitialFetch
            | LoadingPhase::InitialProcess
            | LoadingPhase::IncrementalFetch
            | LoadingPhase::IncrementalProcess => {
                let requested = match planner::requested_interval(window, &self.config) {
                    Ok(requested) => requested,
                    Err(error) => {
                        let _ = reply.send(Err(error));
                        return;
                    }
                };
                let queued = PendingWindow {
                    window,
                    requested,
                    reply,
                };
                if let Some(stale) = self.pending.replace(queued) {
                    self.logger.superseded(stale.requested);
                    let _ = stale.reply.send(Ok(false));
                }
                self.publish();
            }
        }
    }

    /// Resident windows are still served after a failure; anything needing
    /// I/O reports the failure until `retry` succeeds.
    fn answer_while_failed(&self, window: DisplayWindow) -> LoaderResult<bool> {
        let requested = planner::requested_interval(window, &self.config)?;
        let covered = self
            .tracker
            .as_ref()
            .is_some_and(|tracker| tracker.is_covered(requested));
        if covered {
            self.logger.served_from_memory(requested);
            self.metrics.record_memory_hit();
            return Ok(false);
        }
        Err(self
            .last_error
            .clone()
            .unwrap_or(LoaderError::NotInitialized))
    }

    /// Answers `window` from resident data or starts the fetch it needs.
    /// Returns true when a fetch was started.
    fn serve_window(
        &mut self,
        window: DisplayWindow,
        reply: oneshot::Sender<LoaderResult<bool>>,
    ) -> bool {
        let plan = match self.tracker.as_ref() {
            Some(tracker) => planner::plan_fetch(tracker, window, &self.config),
            None => Err(LoaderError::NotInitialized),
        };
        match plan {
            Err(error) => {
                let _ = reply.send(Err(error));
                false
            }
            Ok(None) => {
                if let Ok(requested) = planner::requested_interval(window, &self.config) {
                    self.logger.served_from_memory(requested);
                }
                self.metrics.record_memory_hit();
                self.transition(PhaseEvent::WindowCovered);
                let _ = reply.send(Ok(false));
                false
            }
            Ok(Some(FetchPlan { requested, target })) => {
                self.transition(PhaseEvent::GapFound);
                self.start_incremental_fetch(Some(requested), target, vec![Waiter::Window(reply)]);
                self.publish();
                true
            }
        }
    }

    fn retry(&mut self, reply: oneshot::Sender<LoaderResult<bool>>) {
        if self.phase != LoadingPhase::Error {
            let _ = reply.send(Ok(false));
            return;
        }
        let Some(failed) = self.failed.take() else {
            let _ = reply.send(Ok(false));
            return;
        };
        self.last_error = None;
        match (failed.kind, failed.target) {
            (JobKind::Incremental, Some(target)) => {
                self.transition(PhaseEvent::Retry { initial: false });
                self.start_incremental_fetch(failed.requested, target, vec![Waiter::Window(reply)]);
            }
            _ => {
                self.transition(PhaseEvent::Retry { initial: true });
                self.start_initial_fetch(vec![Waiter::Window(reply)]);
            }
        }
        self.publish();
    }

    fn begin_processing(&mut self, fetched: Fetched) {
        let Some(job) = self.job.as_mut() else {
            return;
        };
        if job.kind == JobKind::Initial {
            self.logger
                .record(&format!("initial window {} fetched", fetched.range));
        }
        job.target = Some(fetched.range);
        job.outer = Some(fetched.outer);
        let reshaper = Arc::clone(&self.reshaper);
        let raw = fetched.raw;
        job.step = Step::Processing(Box::pin(async move { reshaper.reshape(raw).await }));
        self.transition(PhaseEvent::FetchResolved);
        self.publish();
    }

    fn fail_job(&mut self, event: PhaseEvent, error: LoaderError) {
        let Some(job) = self.job.take() else {
            return;
        };
        self.logger.failure(&error);
        self.metrics.record_error();
        self.transition(event);
        self.failed = Some(FailedJob {
            kind: job.kind,
            requested: job.requested,
            target: match job.kind {
                JobKind::Incremental => job.target,
                JobKind::Initial => None,
            },
        });
        self.last_error = Some(error.clone());
        for waiter in job.waiters {
            waiter.fail(error.clone());
        }
        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(error.clone()));
        }
        self.publish();
        for callback in &self.error_callbacks {
            callback(&error);
        }
    }

    fn complete_job(&mut self, events: Vec<R::Event>) {
        let Some(job) = self.job.as_ref() else {
            return;
        };
        let kind = job.kind;
        let (Some(target), Some(outer)) = (job.target, job.outer) else {
            return;
        };
        match kind {
            JobKind::Initial => {
                if events.is_empty() {
                    let patient = self.patient.clone().unwrap_or_default();
                    self.fail_job(
                        PhaseEvent::ProcessRejected,
                        LoaderError::NoData(format!(
                            "no events for patient {} in {}",
                            patient, target
                        )),
                    );
                    return;
                }
                match RangeTracker::new(outer, Some(target)) {
                    Ok(tracker) => self.tracker = Some(tracker),
                    Err(error) => {
                        self.fail_job(PhaseEvent::ProcessRejected, error);
                        return;
                    }
                }
            }
            JobKind::Incremental => {
                if let Some(tracker) = self.tracker.as_mut() {
                    tracker.mark_loaded(target);
                }
            }
        }

        // readers holding an older snapshot keep their copy
        let stats = Arc::make_mut(&mut self.dataset).merge(events);
        self.metrics.record_merge(stats);
        self.logger.record(&format!(
            "merged {} events ({} duplicates) from {}",
            stats.added, stats.duplicates, target
        ));

        self.transition(PhaseEvent::ProcessResolved);
        if let Some(job) = self.job.take() {
            for waiter in job.waiters {
                waiter.succeed();
            }
        }

        if let Some(pending) = self.pending.take() {
            // the viewport moved on while this cycle ran; only announce
            // readiness once the window the user is looking at is resident
            if self.serve_window(pending.window, pending.reply) {
                return;
            }
        }
        self.announce_ready();
    }
}

async fn drive<E>(job: &mut Option<Job<E>>) -> StepOutcome<E> {
    match job {
        Some(job) => match &mut job.step {
            Step::Fetching(fetch) => StepOutcome::Fetched(fetch.await),
            Step::Processing(process) => StepOutcome::Processed(process.await),
        },
        None => std::future::pending().await,
    }
}

/// Fetches device records and notes for `range` concurrently.
async fn fetch_batch<S: DataSource + ?Sized>(
    source: &S,
    patient: &str,
    range: Interval,
    timeout: Option<Duration>,
) -> LoaderResult<Vec<RawRecord>> {
    let both = async {
        let (mut records, messages) = tokio::try_join!(
            source.fetch_records(patient, range),
            source.fetch_messages(patient, range)
        )?;
        records.extend(messages);
        Ok::<_, LoaderError>(records)
    };
    match timeout {
        Some(limit) => tokio::time::timeout(limit, both).await.map_err(|_| {
            LoaderError::Fetch(format!(
                "fetch of {} timed out after {}ms",
                range,
                limit.as_millis()
            ))
        })?,
        None => both.await,
    }
}
