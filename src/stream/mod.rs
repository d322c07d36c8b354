//! Live stream session: frame production, encoder feeding, and the
//! coordinator that owns both.

pub mod coordinator;
pub mod encoder;
pub mod errors;
pub mod frame;
pub mod lifecycle;
pub mod producer;
pub mod pump;
pub mod signal;
pub mod state;
pub mod types;

pub use coordinator::{
    ConfigSource, CoordinatorHandle, SessionDeps, ShutdownTimeouts, StreamCoordinator, StreamStatus,
};
pub use errors::StreamError;
pub use state::SessionPhase;
