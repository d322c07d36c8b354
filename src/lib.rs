//! Unattended live broadcast driver.
//!
//! Renders an overlay image every few seconds, pumps the latest one into an
//! ffmpeg RTMP encoder at the output frame rate, and manages the YouTube
//! broadcast around the stream.

pub mod core;
pub mod overlay;
pub mod remote;
pub mod shared;
pub mod stream;
