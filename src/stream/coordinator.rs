//! StreamCoordinator - single owner actor for the streaming session.
//!
//! The coordinator owns every session resource (encoder handle, producer and
//! pump threads, remote broadcast id) and drives them through the state
//! machine in `state.rs`. Nothing else holds a "current stream" reference.
//!
//! Architecture:
//! - The control surface sends `Command`s through a `CoordinatorHandle`
//! - The pump thread reports failures as `WorkerEvent`s, tagged with its session id
//! - The coordinator turns both into `SessionEvent`s and executes the `SideEffect`s
//! - Status is published on a watch channel, so reading it never waits on the actor

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use super::encoder::{Encoder, EncoderLauncher};
use super::errors::{ConfigError, StreamError};
use super::frame::FrameBuffer;
use super::lifecycle::BroadcastLifecycle;
use super::producer::{spawn_frame_producer, ProducerReport, Renderer};
use super::pump::{spawn_stream_pump, PumpExit, PumpStats};
use super::signal::StopSignal;
use super::state::{transition, SessionEvent, SessionPhase, SessionState, SideEffect};
use super::types::{IngestTarget, StreamConfig};
use crate::core::settings::load_settings;

const JOIN_POLL: Duration = Duration::from_millis(20);

/// Commands sent from the control surface to the coordinator.
#[derive(Debug)]
pub enum Command {
    Start {
        response_tx: oneshot::Sender<Result<(), StreamError>>,
    },
    Stop {
        response_tx: oneshot::Sender<Result<(), StreamError>>,
    },
}

/// Events sent from worker threads to the coordinator.
#[derive(Debug)]
pub enum WorkerEvent {
    PumpStopped { session_id: Uuid, exit: PumpExit },
}

/// Where a session reads its configuration when it starts.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    File(PathBuf),
    Fixed(StreamConfig),
}

impl ConfigSource {
    fn load(&self) -> Result<StreamConfig, ConfigError> {
        match self {
            ConfigSource::File(path) => StreamConfig::from_settings(&load_settings(path)),
            ConfigSource::Fixed(config) => Ok(config.clone()),
        }
    }
}

/// External collaborators of a session.
pub struct SessionDeps {
    pub renderer: Arc<dyn Renderer>,
    pub lifecycle: BroadcastLifecycle,
    pub launcher: Arc<dyn EncoderLauncher>,
}

/// Bounds on how long shutdown may take.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownTimeouts {
    /// Shared deadline for joining the producer and pump threads.
    pub join: Duration,
    /// Graceful window for the encoder before it is killed.
    pub terminate: Duration,
}

impl Default for ShutdownTimeouts {
    fn default() -> Self {
        Self {
            join: Duration::from_secs(5),
            terminate: Duration::from_secs(5),
        }
    }
}

/// Status for the control surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    pub phase: SessionPhase,
    pub session_id: Option<String>,
    pub watch_url: Option<String>,
    pub elapsed_seconds: f64,
    pub frames_written: u64,
}

#[derive(Debug, Clone)]
struct StatusSnapshot {
    state: SessionState,
    session_id: Option<Uuid>,
    stats: Option<Arc<PumpStats>>,
}

impl StatusSnapshot {
    fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            session_id: None,
            stats: None,
        }
    }

    fn to_status(&self) -> StreamStatus {
        StreamStatus {
            phase: self.state.phase(),
            session_id: self.session_id.map(|id| id.to_string()),
            watch_url: self.state.watch_url().map(str::to_string),
            elapsed_seconds: self.state.elapsed().map_or(0.0, |d| d.as_secs_f64()),
            frames_written: self.stats.as_ref().map_or(0, |s| s.frames_written()),
        }
    }
}

/// Resources of the running session.
struct ActiveSession {
    id: Uuid,
    target: IngestTarget,
    encoder: Arc<dyn Encoder>,
    stop: StopSignal,
    producer: Option<JoinHandle<ProducerReport>>,
    pump: Option<JoinHandle<PumpExit>>,
    stats: Arc<PumpStats>,
}

pub struct StreamCoordinator {
    deps: SessionDeps,
    config_source: ConfigSource,
    timeouts: ShutdownTimeouts,
    state: SessionState,
    active: Option<ActiveSession>,
    pending_start_response: Option<oneshot::Sender<Result<(), StreamError>>>,
    pending_stop_response: Option<oneshot::Sender<Result<(), StreamError>>>,
    command_rx: mpsc::Receiver<Command>,
    event_rx: mpsc::Receiver<WorkerEvent>,
    event_tx: mpsc::Sender<WorkerEvent>,
    status_tx: watch::Sender<StatusSnapshot>,
}

impl StreamCoordinator {
    pub fn new(deps: SessionDeps, config_source: ConfigSource) -> (Self, CoordinatorHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::idle());

        let coordinator = Self {
            deps,
            config_source,
            timeouts: ShutdownTimeouts::default(),
            state: SessionState::Idle,
            active: None,
            pending_start_response: None,
            pending_stop_response: None,
            command_rx,
            event_rx,
            event_tx,
            status_tx,
        };

        (coordinator, CoordinatorHandle { command_tx, status_rx })
    }

    pub fn with_timeouts(mut self, timeouts: ShutdownTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Main event loop. Run this as a tokio task. Returns once every handle is
    /// dropped, stopping a live session first.
    pub async fn run(mut self) {
        tracing::info!(target: "stream", "[COORDINATOR] Starting event loop");

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        tracing::info!(target: "stream", "[COORDINATOR] All handles dropped, shutting down");
                        break;
                    }
                },
                Some(event) = self.event_rx.recv() => {
                    self.handle_worker_event(event).await;
                }
            }
        }

        if self.state.phase() == SessionPhase::Live {
            self.dispatch(SessionEvent::StopRequested).await;
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { response_tx } => self.handle_start(response_tx).await,
            Command::Stop { response_tx } => self.handle_stop(response_tx).await,
        }
    }

    async fn handle_start(&mut self, response_tx: oneshot::Sender<Result<(), StreamError>>) {
        if !self.state.is_idle() {
            tracing::info!(target: "stream",
                "[COORDINATOR] Start rejected, session is {:?}", self.state.phase());
            let _ = response_tx.send(Err(StreamError::AlreadyRunning));
            return;
        }

        let config = match self.config_source.load() {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(target: "stream", "[COORDINATOR] Invalid configuration: {}", e);
                let _ = response_tx.send(Err(e.into()));
                return;
            }
        };

        self.pending_start_response = Some(response_tx);
        self.dispatch(SessionEvent::StartRequested { config }).await;
    }

    async fn handle_stop(&mut self, response_tx: oneshot::Sender<Result<(), StreamError>>) {
        if self.state.is_idle() {
            tracing::info!(target: "stream", "[COORDINATOR] Stop rejected, nothing is running");
            let _ = response_tx.send(Err(StreamError::NotRunning));
            return;
        }

        self.pending_stop_response = Some(response_tx);
        self.dispatch(SessionEvent::StopRequested).await;

        // Commands are handled one at a time, so only Live can get here.
        if let Some(response_tx) = self.pending_stop_response.take() {
            let _ = response_tx.send(Err(StreamError::NotRunning));
        }
    }

    async fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::PumpStopped { session_id, exit } => {
                let current = self.active.as_ref().map(|s| s.id);
                if current != Some(session_id) {
                    tracing::debug!(target: "stream",
                        "[COORDINATOR] Ignoring pump report from stale session {}", session_id);
                    return;
                }

                tracing::warn!(target: "stream",
                    "[COORDINATOR] Pump stopped on its own ({:?}), shutting down", exit);
                self.dispatch(SessionEvent::PumpStopped { exit }).await;
            }
        }
    }

    /// Feeds an event through the state machine, then any follow-up events the
    /// effects produce, until the machine settles.
    async fn dispatch(&mut self, event: SessionEvent) {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let (new_state, effects) = transition(self.state.clone(), event);
            self.state = new_state;

            for effect in effects {
                if let Some(next) = self.execute_effect(effect).await {
                    queue.push_back(next);
                }
            }
        }
    }

    async fn execute_effect(&mut self, effect: SideEffect) -> Option<SessionEvent> {
        match effect {
            SideEffect::PublishState => {
                self.publish_state();
                None
            }
            SideEffect::AcquireBroadcast { config } => Some(self.acquire_broadcast(config).await),
            SideEffect::StartWorkers { target, config } => Some(self.start_workers(target, config)),
            SideEffect::ReplyStart { result } => {
                if let Some(response_tx) = self.pending_start_response.take() {
                    let _ = response_tx.send(result);
                }
                None
            }
            SideEffect::ReleaseBroadcast { broadcast_id } => {
                self.deps.lifecycle.release(&broadcast_id).await;
                None
            }
            SideEffect::SignalStop => {
                if let Some(session) = &self.active {
                    tracing::info!(target: "stream", "[COORDINATOR] Signaling stop to session {}", session.id);
                    session.stop.cancel();
                }
                None
            }
            SideEffect::Teardown => {
                self.teardown().await;
                Some(SessionEvent::ShutdownCompleted)
            }
            SideEffect::ReplyStop => {
                if let Some(response_tx) = self.pending_stop_response.take() {
                    let _ = response_tx.send(Ok(()));
                }
                None
            }
        }
    }

    async fn acquire_broadcast(&self, config: StreamConfig) -> SessionEvent {
        match self.deps.lifecycle.acquire(&config).await {
            Ok(target) => SessionEvent::BroadcastAcquired { target, config },
            Err(e) => {
                tracing::error!(target: "stream", "[COORDINATOR] Broadcast acquire failed: {}", e);
                SessionEvent::AcquireFailed { error: e.into() }
            }
        }
    }

    fn start_workers(&mut self, target: IngestTarget, config: StreamConfig) -> SessionEvent {
        assert!(
            self.active.is_none(),
            "encoder launched while another session is still attached"
        );

        let encoder = match self.deps.launcher.launch(&config, &target) {
            Ok(encoder) => encoder,
            Err(e) => {
                tracing::error!(target: "stream", "[COORDINATOR] Encoder launch failed: {}", e);
                return SessionEvent::LaunchFailed {
                    broadcast_id: target.broadcast_id,
                    error: e.into(),
                };
            }
        };

        let session_id = Uuid::new_v4();
        let buffer = Arc::new(FrameBuffer::new(config.resolution));
        let stop = StopSignal::new();
        let stats = Arc::new(PumpStats::default());

        let producer = spawn_frame_producer(
            self.deps.renderer.clone(),
            buffer.clone(),
            config.clone(),
            Instant::now(),
            stop.clone(),
        );

        let event_tx = self.event_tx.clone();
        let pump = spawn_stream_pump(
            encoder.clone(),
            buffer,
            &config,
            stats.clone(),
            stop.clone(),
            move |exit| {
                if !exit.is_failure() {
                    return;
                }
                let event = WorkerEvent::PumpStopped {
                    session_id,
                    exit: exit.clone(),
                };
                if let Err(e) = event_tx.try_send(event) {
                    tracing::error!(target: "stream", "[PUMP] Failed to report exit: {}", e);
                }
            },
        );

        tracing::info!(target: "stream",
            "[COORDINATOR] Session {} live: {} @ {}fps -> {}",
            session_id, config.resolution, config.fps, target.watch_url);

        let watch_url = target.watch_url.clone();
        self.active = Some(ActiveSession {
            id: session_id,
            target,
            encoder,
            stop,
            producer: Some(producer),
            pump: Some(pump),
            stats,
        });

        SessionEvent::StreamLaunched { watch_url }
    }

    /// Joins the workers against one deadline, terminates the encoder, then
    /// releases the broadcast. Bounded even if a worker hangs.
    async fn teardown(&mut self) {
        let Some(mut session) = self.active.take() else {
            tracing::warn!(target: "stream", "[COORDINATOR] Teardown with no active session");
            return;
        };

        tracing::info!(target: "stream", "[COORDINATOR] Tearing down session {}", session.id);
        session.stop.cancel();

        let deadline = Instant::now() + self.timeouts.join;
        if let Some(report) = join_until("producer", session.producer.take(), deadline).await {
            tracing::debug!(target: "stream", "[COORDINATOR] Producer finished: {:?}", report);
        }
        if let Some(exit) = join_until("pump", session.pump.take(), deadline).await {
            tracing::debug!(target: "stream", "[COORDINATOR] Pump finished: {:?}", exit);
        }

        let encoder = session.encoder.clone();
        let grace = self.timeouts.terminate;
        match tokio::task::spawn_blocking(move || encoder.terminate(grace)).await {
            Ok(termination) => {
                tracing::info!(target: "stream", "[COORDINATOR] Encoder terminated: {:?}", termination);
            }
            Err(e) => {
                tracing::error!(target: "stream", "[COORDINATOR] Encoder terminate task failed: {}", e);
            }
        }

        self.deps.lifecycle.release(&session.target.broadcast_id).await;

        tracing::info!(target: "stream",
            "[COORDINATOR] Session {} stopped after {} frames", session.id, session.stats.frames_written());
    }

    fn publish_state(&self) {
        let snapshot = StatusSnapshot {
            state: self.state.clone(),
            session_id: self.active.as_ref().map(|s| s.id),
            stats: self.active.as_ref().map(|s| s.stats.clone()),
        };
        tracing::info!(target: "stream", "[COORDINATOR] State -> {:?}", snapshot.state.phase());
        self.status_tx.send_replace(snapshot);
    }
}

/// Waits for a worker thread until `deadline`. A thread that misses it is
/// detached and logged; shutdown carries on regardless.
async fn join_until<T>(name: &str, handle: Option<JoinHandle<T>>, deadline: Instant) -> Option<T> {
    let handle = handle?;

    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!(target: "stream", "[COORDINATOR] {} thread missed the join deadline, detaching", name);
            return None;
        }
        tokio::time::sleep(JOIN_POLL).await;
    }

    match handle.join() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::error!(target: "stream", "[COORDINATOR] {} thread panicked", name);
            None
        }
    }
}

/// Handle to send commands to the coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    command_tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<StatusSnapshot>,
}

impl CoordinatorHandle {
    /// Starts a session. `AlreadyRunning` unless idle.
    pub async fn start(&self) -> Result<(), StreamError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(Command::Start { response_tx })
            .await
            .map_err(|_| StreamError::CoordinatorGone)?;

        response_rx
            .await
            .map_err(|_| StreamError::CoordinatorGone)?
    }

    /// Stops the session and waits for shutdown. `NotRunning` when idle.
    pub async fn stop(&self) -> Result<(), StreamError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(Command::Stop { response_tx })
            .await
            .map_err(|_| StreamError::CoordinatorGone)?;

        response_rx
            .await
            .map_err(|_| StreamError::CoordinatorGone)?
    }

    /// Current status. Never waits on the coordinator.
    pub fn status(&self) -> StreamStatus {
        self.status_rx.borrow().to_status()
    }

    /// Resolves once the session reaches `phase`.
    pub async fn wait_for_phase(&self, phase: SessionPhase) -> Result<(), StreamError> {
        let mut status_rx = self.status_rx.clone();
        status_rx
            .wait_for(|snapshot| snapshot.state.phase() == phase)
            .await
            .map(|_| ())
            .map_err(|_| StreamError::CoordinatorGone)
    }
}
