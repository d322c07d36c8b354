//! Pure state machine for the streaming session lifecycle.
//!
//! `(State, Event) -> (NewState, Vec<SideEffect>)`. The coordinator executes the
//! effects; this module never performs I/O. Invalid transitions return the
//! current state with no effects.

use std::time::Instant;

use serde::Serialize;

use super::errors::StreamError;
use super::pump::PumpExit;
use super::types::{IngestTarget, StreamConfig};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Nothing running, ready to start.
    Idle,

    /// Acquiring the broadcast and launching the encoder.
    Starting { requested_at: Instant },

    /// Frames are flowing into the encoder.
    Live {
        started_at: Instant,
        watch_url: String,
    },

    /// Workers are being joined and the encoder terminated.
    Stopping {
        started_at: Instant,
        stop_requested_at: Instant,
        reason: StopReason,
    },
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Flat view of [`SessionState`] for the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Starting,
    Live,
    Stopping,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    Requested,
    Pump(PumpExit),
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Starting { .. } => SessionPhase::Starting,
            SessionState::Live { .. } => SessionPhase::Live,
            SessionState::Stopping { .. } => SessionPhase::Stopping,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }

    /// Time since the stream went live, if it did.
    pub fn elapsed(&self) -> Option<std::time::Duration> {
        match self {
            SessionState::Live { started_at, .. } | SessionState::Stopping { started_at, .. } => {
                Some(started_at.elapsed())
            }
            _ => None,
        }
    }

    pub fn watch_url(&self) -> Option<&str> {
        match self {
            SessionState::Live { watch_url, .. } => Some(watch_url),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Carries the configuration snapshot the session will run with.
    StartRequested { config: StreamConfig },

    /// Remote broadcast exists, encoder not launched yet.
    BroadcastAcquired {
        target: IngestTarget,
        config: StreamConfig,
    },

    /// Creating the remote broadcast failed. Nothing was launched.
    AcquireFailed { error: StreamError },

    /// The encoder could not be launched; the acquired broadcast must go.
    LaunchFailed {
        broadcast_id: String,
        error: StreamError,
    },

    /// Encoder, producer and pump are running.
    StreamLaunched { watch_url: String },

    StopRequested,

    /// The pump loop ended.
    PumpStopped { exit: PumpExit },

    /// Workers joined, encoder gone, broadcast released.
    ShutdownCompleted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Publish the new state to status readers.
    PublishState,

    AcquireBroadcast { config: StreamConfig },

    /// Launch the encoder and spawn the producer and pump.
    StartWorkers {
        target: IngestTarget,
        config: StreamConfig,
    },

    /// Answer the pending start request.
    ReplyStart { result: Result<(), StreamError> },

    ReleaseBroadcast { broadcast_id: String },

    /// Cancel the producer and pump.
    SignalStop,

    /// Join workers, terminate the encoder, release the broadcast.
    Teardown,

    /// Answer the pending stop request, if any.
    ReplyStop,
}

pub fn transition(state: SessionState, event: SessionEvent) -> (SessionState, Vec<SideEffect>) {
    match (&state, event) {
        // Idle + StartRequested -> Starting
        (SessionState::Idle, SessionEvent::StartRequested { config }) => (
            SessionState::Starting {
                requested_at: Instant::now(),
            },
            vec![
                SideEffect::PublishState,
                SideEffect::AcquireBroadcast { config },
            ],
        ),

        // Starting + BroadcastAcquired -> Starting (launching)
        (SessionState::Starting { .. }, SessionEvent::BroadcastAcquired { target, config }) => {
            (state, vec![SideEffect::StartWorkers { target, config }])
        }

        // Starting + AcquireFailed -> Idle, nothing to clean up
        (SessionState::Starting { .. }, SessionEvent::AcquireFailed { error }) => (
            SessionState::Idle,
            vec![
                SideEffect::PublishState,
                SideEffect::ReplyStart { result: Err(error) },
            ],
        ),

        // Starting + LaunchFailed -> Idle, give the broadcast back
        (
            SessionState::Starting { .. },
            SessionEvent::LaunchFailed {
                broadcast_id,
                error,
            },
        ) => (
            SessionState::Idle,
            vec![
                SideEffect::ReleaseBroadcast { broadcast_id },
                SideEffect::PublishState,
                SideEffect::ReplyStart { result: Err(error) },
            ],
        ),

        // Starting + StreamLaunched -> Live
        (SessionState::Starting { .. }, SessionEvent::StreamLaunched { watch_url }) => (
            SessionState::Live {
                started_at: Instant::now(),
                watch_url,
            },
            vec![
                SideEffect::PublishState,
                SideEffect::ReplyStart { result: Ok(()) },
            ],
        ),

        // Live + StopRequested -> Stopping
        (SessionState::Live { started_at, .. }, SessionEvent::StopRequested) => (
            SessionState::Stopping {
                started_at: *started_at,
                stop_requested_at: Instant::now(),
                reason: StopReason::Requested,
            },
            vec![
                SideEffect::PublishState,
                SideEffect::SignalStop,
                SideEffect::Teardown,
            ],
        ),

        // Live + pump failure -> Stopping without anyone asking
        (SessionState::Live { started_at, .. }, SessionEvent::PumpStopped { exit })
            if exit.is_failure() =>
        {
            (
                SessionState::Stopping {
                    started_at: *started_at,
                    stop_requested_at: Instant::now(),
                    reason: StopReason::Pump(exit),
                },
                vec![
                    SideEffect::PublishState,
                    SideEffect::SignalStop,
                    SideEffect::Teardown,
                ],
            )
        }

        // Stopping + ShutdownCompleted -> Idle
        (SessionState::Stopping { .. }, SessionEvent::ShutdownCompleted) => (
            SessionState::Idle,
            vec![SideEffect::PublishState, SideEffect::ReplyStop],
        ),

        // Invalid transition: return current state with no effects
        _ => (state, vec![]),
    }
}
