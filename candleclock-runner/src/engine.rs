//! Engine — the single task that owns a [`TradingSession`].
//!
//! Everything that mutates the session runs inside this task: clock ticks,
//! operator commands, analysis completion and resolution timers all arrive
//! as messages and are handled one at a time. The outside world talks to it
//! through an [`EngineHandle`], reads display state from a `watch` channel
//! and receives notifications from a `broadcast` channel.

use crate::clock::{ClockTimer, WallClock};
use crate::sources::{CaptureSource, OutcomeOracle, SignalSource};
use crate::timer::{ResolutionTimers, TimerGuard};
use candleclock_core::signal::ANALYSIS_INSTRUCTIONS;
use candleclock_core::{
    AnalysisStart, ConfigError, EngineConfig, Published, RiskVerdict, SchedulerError, Settlement,
    Signal, SignalError, Snapshot, Timeframe, TradeId, TradeRecord, TradingSession, Trigger,
};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};

const COMMAND_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 256;

type AnalysisResult = Result<Signal, SignalError>;
type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("capture attach cancelled by a detach")]
    AttachCancelled,

    #[error("engine task has stopped")]
    Stopped,
}

/// Notifications for the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    CaptureAttached,
    CaptureDetached,
    Triggered(Trigger),
    SignalPublished(Signal),
    TradeOpened(TradeRecord),
    TradeResolved(Settlement),
    BreakerTripped { streak: u32 },
    AnalysisFailed(SignalError),
}

enum Command {
    Activate(Reply<()>),
    Deactivate(Reply<()>),
    SetTimeframe(Timeframe, Reply<bool>),
    Analyze(Reply<AnalysisStart>),
    ResetRisk(Reply<()>),
    AttachCapture(Reply<()>),
    DetachCapture(Reply<()>),
    Shutdown,
}

enum Internal {
    ResolutionDue(TradeId),
    CaptureAttached {
        attempt: u64,
        result: Result<(), SignalError>,
    },
}

/// An attach waiting on the capture source (e.g. a permission prompt).
struct PendingAttach {
    attempt: u64,
    task: TimerGuard,
    waiters: Vec<Reply<()>>,
}

/// The injected collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub capture: Arc<dyn CaptureSource>,
    pub signals: Arc<dyn SignalSource>,
    pub oracle: Arc<dyn OutcomeOracle>,
}

pub struct Engine {
    session: TradingSession,
    sources: Collaborators,
    clock: Arc<dyn WallClock>,
    events: broadcast::Sender<EngineEvent>,
    snapshots: watch::Sender<Snapshot>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    timers: ResolutionTimers,
    analysis: Option<JoinHandle<AnalysisResult>>,
    attaching: Option<PendingAttach>,
    attach_attempts: u64,
}

impl Engine {
    /// Validate `config` and start the engine task on the current runtime.
    pub fn spawn(
        config: EngineConfig,
        sources: Collaborators,
        clock: Arc<dyn WallClock>,
    ) -> Result<(EngineHandle, JoinHandle<()>), EngineError> {
        config.validate()?;
        let session = TradingSession::new(config);

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (snapshots, snapshot_rx) = watch::channel(session.snapshot());

        let handle = EngineHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            events: events.clone(),
        };
        let engine = Engine {
            session,
            sources,
            clock,
            events,
            snapshots,
            internal_tx,
            timers: ResolutionTimers::default(),
            analysis: None,
            attaching: None,
            attach_attempts: 0,
        };
        let task = tokio::spawn(engine.run(command_rx, internal_rx));
        Ok((handle, task))
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        let period = self.session.config().tick_interval();
        let mut timer = ClockTimer::new(period, Arc::clone(&self.clock));
        log::info!(
            "engine started: capture={}, signals={}, tick={}ms",
            self.sources.capture.name(),
            self.sources.signals.name(),
            period.as_millis()
        );

        loop {
            tokio::select! {
                tick = timer.tick() => self.on_tick(tick.now),
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if self.on_command(command).is_break() {
                        break;
                    }
                }
                Some(message) = internal.recv() => self.on_internal(message),
                joined = join_analysis(&mut self.analysis) => {
                    self.analysis = None;
                    self.on_analysis_finished(joined);
                }
            }
            self.publish_snapshot();
        }

        self.stop();
    }

    // ── Clock ──

    fn on_tick(&mut self, now: chrono::DateTime<chrono::Utc>) {
        let outcome = self.session.tick(now);
        let Some(trigger) = outcome.trigger else {
            return;
        };
        self.emit(EngineEvent::Triggered(trigger));
        if let Err(e) = self.start_analysis() {
            log::warn!("scheduled analysis skipped: {e}");
            self.emit(EngineEvent::AnalysisFailed(e));
        }
    }

    // ── Commands ──

    fn on_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Activate(reply) => {
                let result = self.session.activate().map_err(EngineError::from);
                if let Err(e) = &result {
                    log::warn!("activation refused: {e}");
                }
                self.reply(reply, result);
            }
            Command::Deactivate(reply) => {
                self.session.deactivate();
                self.reply(reply, Ok(()));
            }
            Command::SetTimeframe(timeframe, reply) => {
                let changed = self.session.set_timeframe(timeframe);
                self.reply(reply, Ok(changed));
            }
            Command::Analyze(reply) => {
                let result = self.start_analysis().map_err(EngineError::from);
                self.reply(reply, result);
            }
            Command::ResetRisk(reply) => {
                self.session.reset_risk();
                self.reply(reply, Ok(()));
            }
            Command::AttachCapture(reply) => {
                if self.session.capture_attached() {
                    self.reply(reply, Ok(()));
                } else if let Some(pending) = self.attaching.as_mut() {
                    pending.waiters.push(reply);
                } else {
                    self.begin_attach(reply);
                }
            }
            Command::DetachCapture(reply) => {
                self.cancel_attach(|| EngineError::AttachCancelled);
                if self.session.capture_attached() {
                    self.sources.capture.detach();
                    self.session.capture_did_detach();
                    log::info!("capture {} detached", self.sources.capture.name());
                    self.emit(EngineEvent::CaptureDetached);
                }
                self.reply(reply, Ok(()));
            }
            Command::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn on_internal(&mut self, message: Internal) {
        match message {
            Internal::ResolutionDue(id) => self.resolve(id),
            Internal::CaptureAttached { attempt, result } => {
                if self.attaching.as_ref().map(|p| p.attempt) != Some(attempt) {
                    // Cancelled attempt. It may have finished on another worker
                    // after the cancel detached, so release it again unless a
                    // newer attempt owns the source.
                    log::debug!("stale capture attach {attempt} ignored");
                    let owned = self.attaching.is_some() || self.session.capture_attached();
                    if result.is_ok() && !owned {
                        self.sources.capture.detach();
                    }
                    return;
                }
                let Some(pending) = self.attaching.take() else {
                    return;
                };
                match &result {
                    Ok(()) => {
                        self.session.capture_did_attach();
                        log::info!("capture {} attached", self.sources.capture.name());
                        self.emit(EngineEvent::CaptureAttached);
                    }
                    Err(e) => log::warn!("capture attach failed: {e}"),
                }
                self.publish_snapshot();
                for reply in pending.waiters {
                    let _ = reply.send(result.clone().map_err(EngineError::from));
                }
            }
        }
    }

    // ── Capture ──

    /// Attaching may wait on a permission prompt; it runs off the engine task
    /// so the clock keeps ticking.
    fn begin_attach(&mut self, reply: Reply<()>) {
        self.attach_attempts += 1;
        let attempt = self.attach_attempts;
        let capture = Arc::clone(&self.sources.capture);
        let internal = self.internal_tx.clone();
        let task = TimerGuard::spawn(async move {
            let result = capture.attach().await;
            let _ = internal.send(Internal::CaptureAttached { attempt, result });
        });
        self.attaching = Some(PendingAttach {
            attempt,
            task,
            waiters: vec![reply],
        });
    }

    /// Abort an in-flight attach, release whatever it may have acquired and
    /// fail everyone waiting on it.
    fn cancel_attach(&mut self, error: impl Fn() -> EngineError) {
        let Some(pending) = self.attaching.take() else {
            return;
        };
        drop(pending.task);
        self.sources.capture.detach();
        log::info!("capture attach {} cancelled", pending.attempt);
        for reply in pending.waiters {
            let _ = reply.send(Err(error()));
        }
    }

    // ── Analysis ──

    fn start_analysis(&mut self) -> Result<AnalysisStart, SignalError> {
        let start = self.session.begin_analysis()?;
        if start == AnalysisStart::Started {
            let capture = Arc::clone(&self.sources.capture);
            let signals = Arc::clone(&self.sources.signals);
            let timeout = self.session.config().decision_timeout();
            log::info!("analysis started via {}", signals.name());
            self.analysis = Some(tokio::spawn(analyze(capture, signals, timeout)));
        }
        Ok(start)
    }

    fn on_analysis_finished(&mut self, joined: Result<AnalysisResult, JoinError>) {
        let result = joined.unwrap_or_else(|e| {
            Err(SignalError::DecisionFailure(format!(
                "analysis task ended abnormally: {e}"
            )))
        });
        match self.session.finish_analysis(result, self.clock.now()) {
            Ok(Published { signal, trade }) => {
                self.emit(EngineEvent::SignalPublished(signal));
                if let Some(record) = trade {
                    self.arm_resolution(&record);
                    self.emit(EngineEvent::TradeOpened(record));
                }
            }
            Err(e) => {
                log::warn!("analysis failed: {e}");
                self.emit(EngineEvent::AnalysisFailed(e));
            }
        }
    }

    // ── Resolution ──

    fn arm_resolution(&mut self, record: &TradeRecord) {
        let id = record.id;
        let delay = self.session.resolution_delay(record);
        let internal = self.internal_tx.clone();
        log::debug!("trade {id} resolves in {}ms", delay.as_millis());
        let guard = TimerGuard::arm(delay, async move {
            let _ = internal.send(Internal::ResolutionDue(id));
        });
        self.timers.insert(id, guard);
    }

    fn resolve(&mut self, id: TradeId) {
        self.timers.complete(id);
        let Some(record) = self.session.ledger().get(id).cloned() else {
            log::warn!("resolution due for unknown trade {id}");
            return;
        };
        let outcome = self.sources.oracle.sample(&record);
        match self.session.resolve_trade(id, outcome, self.clock.now()) {
            Ok(settlement) => {
                let tripped = match settlement.verdict {
                    RiskVerdict::Tripped { streak } => Some(streak),
                    _ => None,
                };
                self.emit(EngineEvent::TradeResolved(settlement));
                if let Some(streak) = tripped {
                    self.emit(EngineEvent::BreakerTripped { streak });
                }
            }
            Err(e) => log::warn!("could not resolve trade {id}: {e}"),
        }
    }

    // ── Outputs ──

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_snapshot(&self) {
        self.snapshots.send_replace(self.session.snapshot());
    }

    /// Publish state before acknowledging, so a caller that awaited the
    /// command observes its effect in the next snapshot read.
    fn reply<T>(&self, reply: Reply<T>, result: Result<T, EngineError>) {
        self.publish_snapshot();
        let _ = reply.send(result);
    }

    fn stop(&mut self) {
        self.cancel_attach(|| EngineError::Stopped);
        let cancelled = self.timers.cancel_all();
        if let Some(analysis) = self.analysis.take() {
            analysis.abort();
        }
        if self.session.capture_attached() {
            self.sources.capture.detach();
            self.session.capture_did_detach();
        }
        self.publish_snapshot();
        log::info!("engine stopped; {cancelled} resolution timer(s) cancelled");
    }
}

/// Capture one frame and ask the decision source about it, bounded by `timeout`.
async fn analyze(
    capture: Arc<dyn CaptureSource>,
    signals: Arc<dyn SignalSource>,
    timeout: Duration,
) -> AnalysisResult {
    let frame = capture
        .grab_frame()
        .await
        .ok_or(SignalError::FrameUnavailable)?;
    log::debug!(
        "frame {}x{} ({} bytes) sent to {}",
        frame.width,
        frame.height,
        frame.len(),
        signals.name()
    );
    match tokio::time::timeout(timeout, signals.evaluate(&frame, ANALYSIS_INSTRUCTIONS)).await {
        Ok(result) => result,
        Err(_) => Err(SignalError::DecisionFailure(format!(
            "no decision within {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Resolves when the in-flight analysis finishes; pending forever when idle.
async fn join_analysis(
    slot: &mut Option<JoinHandle<AnalysisResult>>,
) -> Result<AnalysisResult, JoinError> {
    match slot {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Cloneable front door to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Snapshot>,
    events: broadcast::Sender<EngineEvent>,
}

impl EngineHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)?
    }

    /// Arm the scheduler. Refused without capture or while the breaker is tripped.
    pub async fn activate(&self) -> Result<(), EngineError> {
        self.request(Command::Activate).await
    }

    pub async fn deactivate(&self) -> Result<(), EngineError> {
        self.request(Command::Deactivate).await
    }

    /// Returns whether the timeframe actually changed.
    pub async fn set_timeframe(&self, timeframe: Timeframe) -> Result<bool, EngineError> {
        self.request(|reply| Command::SetTimeframe(timeframe, reply)).await
    }

    /// Manual trigger. Dropped (`AlreadyRunning`) while a run is in flight.
    pub async fn analyze(&self) -> Result<AnalysisStart, EngineError> {
        self.request(Command::Analyze).await
    }

    pub async fn reset_risk(&self) -> Result<(), EngineError> {
        self.request(Command::ResetRisk).await
    }

    pub async fn attach_capture(&self) -> Result<(), EngineError> {
        self.request(Command::AttachCapture).await
    }

    pub async fn detach_capture(&self) -> Result<(), EngineError> {
        self.request(Command::DetachCapture).await
    }

    /// Ask the engine to stop. Await the task's `JoinHandle` to wait for it.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
