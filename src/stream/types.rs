use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::ConfigError;
use crate::core::settings::{EncoderSettings, Settings};

/// Raw frames are always 8-bit, three channels.
pub const BYTES_PER_PIXEL: usize = 3;

pub const MAX_FPS: u32 = 120;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parses `WIDTHxHEIGHT`. Both sides must be positive and even (yuv420p).
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::Resolution(value.to_string());

        let (width, height) = value.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = width.trim().parse().map_err(|_| invalid())?;
        let height: u32 = height.trim().parse().map_err(|_| invalid())?;

        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(invalid());
        }

        Ok(Self { width, height })
    }

    /// Byte length of one raw frame at this resolution.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Unlisted,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Unlisted => "unlisted",
            Visibility::Private => "private",
        }
    }
}

/// Byte order the encoder expects on stdin.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    Rgb24,
    #[default]
    Bgr24,
}

impl PixelLayout {
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelLayout::Rgb24 => "rgb24",
            PixelLayout::Bgr24 => "bgr24",
        }
    }
}

/// Immutable per-session snapshot of the settings that drive streaming.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamConfig {
    pub resolution: Resolution,
    pub fps: u32,
    pub frame_interval: Duration,
    pub title: String,
    pub description: String,
    pub visibility: Visibility,
    pub announcement: String,
    pub encoder: EncoderSettings,
}

impl StreamConfig {
    pub fn new(resolution: Resolution, fps: u32, frame_interval: Duration) -> Self {
        let defaults = Settings::default();
        Self {
            resolution,
            fps,
            frame_interval,
            title: defaults.youtube.title.clone(),
            description: defaults.youtube.description,
            visibility: defaults.youtube.privacy,
            announcement: defaults.youtube.title,
            encoder: defaults.encoder,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let resolution = Resolution::parse(&settings.resolution)?;

        if settings.fps == 0 || settings.fps > MAX_FPS {
            return Err(ConfigError::FrameRate(settings.fps));
        }
        if settings.interval == 0 {
            return Err(ConfigError::Interval(settings.interval));
        }

        let announcement = settings
            .announce
            .message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| settings.youtube.title.clone());

        Ok(Self {
            resolution,
            fps: settings.fps,
            frame_interval: Duration::from_secs(settings.interval),
            title: settings.youtube.title.clone(),
            description: settings.youtube.description.clone(),
            visibility: settings.youtube.privacy,
            announcement,
            encoder: settings.encoder.clone(),
        })
    }

    /// Period between two writes into the encoder.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }

    pub fn frame_len(&self) -> usize {
        self.resolution.frame_len()
    }

    pub fn broadcast_request(&self) -> BroadcastRequest {
        BroadcastRequest {
            title: self.title.clone(),
            description: self.description.clone(),
            visibility: self.visibility,
        }
    }
}

/// What the remote platform needs to create a broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BroadcastRequest {
    pub title: String,
    pub description: String,
    pub visibility: Visibility,
}

/// Where to push the stream and where viewers watch it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestTarget {
    pub push_url: String,
    pub watch_url: String,
    pub broadcast_id: String,
}
