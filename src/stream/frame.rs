//! The single shared slot between the frame producer and the stream pump.

use std::sync::{Arc, Mutex};

use super::errors::FrameSizeError;
use super::types::{PixelLayout, Resolution};

/// One complete RGB24 image. Cloning shares the pixel buffer.
#[derive(Clone, Debug)]
pub struct Frame {
    resolution: Resolution,
    pixels: Arc<[u8]>,
}

impl Frame {
    /// Wraps RGB24 pixels, rejecting buffers that are not exactly one frame.
    pub fn from_rgb(resolution: Resolution, pixels: Vec<u8>) -> Result<Self, FrameSizeError> {
        let expected = resolution.frame_len();
        if pixels.len() != expected {
            return Err(FrameSizeError {
                expected,
                actual: pixels.len(),
            });
        }

        Ok(Self {
            resolution,
            pixels: pixels.into(),
        })
    }

    /// A frame filled with one colour.
    pub fn solid(resolution: Resolution, rgb: [u8; 3]) -> Self {
        let pixels: Vec<u8> = rgb
            .iter()
            .copied()
            .cycle()
            .take(resolution.frame_len())
            .collect();

        Self {
            resolution,
            pixels: pixels.into(),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn as_rgb(&self) -> &[u8] {
        &self.pixels
    }

    /// True when both frames share the same pixel buffer.
    pub fn same_buffer(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }

    /// Converts to the byte order the encoder reads.
    pub fn to_layout(&self, layout: PixelLayout) -> Vec<u8> {
        match layout {
            PixelLayout::Rgb24 => self.pixels.to_vec(),
            PixelLayout::Bgr24 => {
                let mut out = Vec::with_capacity(self.pixels.len());
                for px in self.pixels.chunks_exact(3) {
                    out.extend_from_slice(&[px[2], px[1], px[0]]);
                }
                out
            }
        }
    }
}

/// Holds the most recently published frame.
///
/// The lock is only held to clone or replace an `Arc`, never across I/O, so
/// the producer and the pump cannot stall each other. Frames that are replaced
/// before anyone reads them are dropped.
pub struct FrameBuffer {
    resolution: Resolution,
    latest: Mutex<Option<Frame>>,
}

impl FrameBuffer {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            latest: Mutex::new(None),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Replaces the current frame. Frames of the wrong size are rejected and
    /// the previous frame stays in place.
    pub fn publish(&self, frame: Frame) -> Result<(), FrameSizeError> {
        let expected = self.resolution.frame_len();
        if frame.len() != expected || frame.resolution() != self.resolution {
            return Err(FrameSizeError {
                expected,
                actual: frame.len(),
            });
        }

        let previous = {
            let mut slot = self.latest.lock().unwrap_or_else(|e| e.into_inner());
            slot.replace(frame)
        };
        // Old buffer is released outside the lock.
        drop(previous);
        Ok(())
    }

    /// Returns the current frame, or `None` before the first publish.
    pub fn snapshot(&self) -> Option<Frame> {
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
