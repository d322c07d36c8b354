use thiserror::Error;

/// Errors from a single render tick. Always transient: the tick is skipped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("Camera source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("Frame composition failed: {0}")]
    Composition(String),
    #[error(transparent)]
    Size(#[from] FrameSizeError),
}

/// A frame whose byte length does not match the session resolution.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Frame size mismatch: expected {expected} bytes, got {actual}")]
pub struct FrameSizeError {
    pub expected: usize,
    pub actual: usize,
}

/// Errors from writing into the encoder's input pipe.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipeError {
    #[error("Encoder input pipe is closed")]
    Closed,
    #[error("Failed to write to encoder: {0}")]
    Write(String),
}

impl PipeError {
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::BrokenPipe => PipeError::Closed,
            _ => PipeError::Write(err.to_string()),
        }
    }
}

/// Errors from launching the external encoder.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncoderError {
    #[error("Encoder program not found: {0}. Please install ffmpeg.")]
    NotFound(String),
    #[error("Failed to launch encoder: {0}")]
    Launch(String),
    #[error("Failed to capture encoder stdin")]
    NoInput,
}

/// Errors from the remote broadcast platform.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteApiError {
    #[error("Authorization failed: {0}")]
    Auth(String),
    #[error("Request failed: {0}")]
    Http(String),
    #[error("Remote API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Failed to decode response: {0}")]
    Decode(String),
    #[error("Response is missing field `{0}`")]
    MissingField(&'static str),
}

impl From<reqwest::Error> for RemoteApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RemoteApiError::Decode(err.to_string())
        } else {
            RemoteApiError::Http(err.to_string())
        }
    }
}

/// Errors from the social announcement. Never fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    #[error("Announcement request failed: {0}")]
    Request(String),
    #[error("Announcement rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Errors from reading or validating settings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Failed to read settings file: {0}")]
    Read(String),
    #[error("Failed to parse settings: {0}")]
    Parse(String),
    #[error("Invalid resolution `{0}`, expected WIDTHxHEIGHT with even positive values")]
    Resolution(String),
    #[error("Invalid frame rate {0}, expected 1..=120")]
    FrameRate(u32),
    #[error("Invalid frame interval {0}s, expected at least 1")]
    Interval(u64),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Read(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Top-level error type returned to the control surface.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    #[error("already running")]
    AlreadyRunning,
    #[error("not running")]
    NotRunning,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Remote(#[from] RemoteApiError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error("Coordinator is not running")]
    CoordinatorGone,
}

impl StreamError {
    /// Returns true for rejected state transitions, which are benign.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StreamError::AlreadyRunning | StreamError::NotRunning)
    }
}
