use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use super::encoder::Encoder;
use super::errors::PipeError;
use super::frame::{Frame, FrameBuffer};
use super::signal::StopSignal;
use super::types::StreamConfig;

/// Why the pump loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    Cancelled,
    EncoderExited,
    PipeClosed,
    WriteFailed(String),
}

impl PumpExit {
    /// Anything but an explicit cancel means the session has to shut down.
    pub fn is_failure(&self) -> bool {
        !matches!(self, PumpExit::Cancelled)
    }
}

/// Live counters, readable while the pump runs.
#[derive(Debug, Default)]
pub struct PumpStats {
    frames_written: AtomicU64,
    empty_ticks: AtomicU64,
}

impl PumpStats {
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    pub fn empty_ticks(&self) -> u64 {
        self.empty_ticks.load(Ordering::Relaxed)
    }
}

/// Spawns the thread that writes the latest frame into the encoder once per
/// `1 / fps`. Missed ticks are not caught up.
///
/// The pump never tears the encoder down; it reports its exit through
/// `on_exit` and leaves shutdown to the session.
pub fn spawn_stream_pump<F>(
    encoder: Arc<dyn Encoder>,
    buffer: Arc<FrameBuffer>,
    config: &StreamConfig,
    stats: Arc<PumpStats>,
    stop: StopSignal,
    on_exit: F,
) -> JoinHandle<PumpExit>
where
    F: FnOnce(&PumpExit) + Send + 'static,
{
    let period = config.tick_period();
    let layout = config.encoder.pixel_layout;
    let frame_len = config.frame_len();

    std::thread::spawn(move || {
        tracing::info!(target: "stream", "[PUMP] Started: tick {:?}, {} bytes/frame", period, frame_len);

        // Last frame and its converted bytes, reused while the producer is idle.
        let mut cached: Option<(Frame, Vec<u8>)> = None;

        let exit = loop {
            let tick_start = Instant::now();

            if stop.is_cancelled() {
                break PumpExit::Cancelled;
            }
            if encoder.has_exited() {
                tracing::warn!(target: "stream", "[PUMP] Encoder exited unexpectedly");
                break PumpExit::EncoderExited;
            }

            match buffer.snapshot() {
                None => {
                    stats.empty_ticks.fetch_add(1, Ordering::Relaxed);
                }
                Some(frame) => {
                    let reuse = matches!(&cached, Some((last, _)) if last.same_buffer(&frame));
                    if !reuse {
                        let converted = frame.to_layout(layout);
                        cached = Some((frame, converted));
                    }

                    if let Some((_, bytes)) = &cached {
                        debug_assert_eq!(bytes.len(), frame_len);
                        match encoder.write(bytes) {
                            Ok(()) => {
                                let written = stats.frames_written.fetch_add(1, Ordering::Relaxed) + 1;
                                if written % 300 == 0 {
                                    tracing::debug!(target: "stream", "[PUMP] Written {} frames", written);
                                }
                            }
                            Err(PipeError::Closed) => {
                                tracing::warn!(target: "stream", "[PUMP] Encoder pipe closed");
                                break PumpExit::PipeClosed;
                            }
                            Err(PipeError::Write(e)) => {
                                tracing::error!(target: "stream", "[PUMP] Write failed: {}", e);
                                break PumpExit::WriteFailed(e);
                            }
                        }
                    }
                }
            }

            let wait = period.saturating_sub(tick_start.elapsed());
            if stop.sleep(wait) {
                break PumpExit::Cancelled;
            }
        };

        tracing::info!(target: "stream",
            "[PUMP] Stopped ({:?}) after {} frames", exit, stats.frames_written());
        on_exit(&exit);
        exit
    })
}
