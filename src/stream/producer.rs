use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::errors::RenderError;
use super::frame::{Frame, FrameBuffer};
use super::signal::StopSignal;
use super::types::StreamConfig;

/// Composes one overlay frame. Called from the producer thread, may block.
pub trait Renderer: Send + Sync {
    fn render(&self, elapsed: Duration, config: &StreamConfig) -> Result<Frame, RenderError>;
}

/// Counters returned when the producer thread exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub rendered: u64,
    pub failed: u64,
}

/// Spawns the thread that renders a frame every `config.frame_interval` and
/// publishes it. A failed render is logged and skipped; the previous frame
/// keeps serving.
pub fn spawn_frame_producer(
    renderer: Arc<dyn Renderer>,
    buffer: Arc<FrameBuffer>,
    config: StreamConfig,
    session_start: Instant,
    stop: StopSignal,
) -> JoinHandle<ProducerReport> {
    std::thread::spawn(move || {
        tracing::info!(target: "stream",
            "[PRODUCER] Started: {} every {:?}", config.resolution, config.frame_interval);

        let mut report = ProducerReport::default();

        while !stop.is_cancelled() {
            let tick_start = Instant::now();

            let result = renderer
                .render(session_start.elapsed(), &config)
                .and_then(|frame| buffer.publish(frame).map_err(RenderError::from));

            match result {
                Ok(()) => {
                    report.rendered += 1;
                    tracing::trace!(target: "stream", "[PRODUCER] Published frame {}", report.rendered);
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(target: "stream", "[PRODUCER] Render failed, skipping tick: {}", e);
                }
            }

            let wait = config.frame_interval.saturating_sub(tick_start.elapsed());
            if stop.sleep(wait) {
                break;
            }
        }

        tracing::info!(target: "stream",
            "[PRODUCER] Stopped: {} rendered, {} failed", report.rendered, report.failed);
        report
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::types::Resolution;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: AtomicU32,
    }

    impl Renderer for Flaky {
        fn render(&self, _elapsed: Duration, config: &StreamConfig) -> Result<Frame, RenderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match n {
                0 => Ok(Frame::solid(config.resolution, [7, 7, 7])),
                1 => Err(RenderError::SourceUnavailable("camera unplugged".to_string())),
                // Wrong size must never reach the buffer.
                _ => Ok(Frame::solid(Resolution::new(2, 2), [0, 0, 0])),
            }
        }
    }

    #[test]
    fn test_failed_ticks_keep_previous_frame() {
        let resolution = Resolution::new(8, 6);
        let config = StreamConfig::new(resolution, 10, Duration::from_millis(20));
        let buffer = Arc::new(FrameBuffer::new(resolution));
        let stop = StopSignal::new();

        let handle = spawn_frame_producer(
            Arc::new(Flaky { calls: AtomicU32::new(0) }),
            buffer.clone(),
            config,
            Instant::now(),
            stop.clone(),
        );

        std::thread::sleep(Duration::from_millis(150));
        stop.cancel();
        let report = handle.join().unwrap();

        assert_eq!(report.rendered, 1);
        assert!(report.failed >= 2);
        let frame = buffer.snapshot().unwrap();
        assert_eq!(frame.len(), resolution.frame_len());
        assert_eq!(frame.as_rgb()[0], 7);
    }

    #[test]
    fn test_cancel_interrupts_long_interval() {
        let resolution = Resolution::new(2, 2);
        let config = StreamConfig::new(resolution, 1, Duration::from_secs(60));
        let stop = StopSignal::new();

        let handle = spawn_frame_producer(
            Arc::new(Flaky { calls: AtomicU32::new(0) }),
            Arc::new(FrameBuffer::new(resolution)),
            config,
            Instant::now(),
            stop.clone(),
        );

        std::thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        stop.cancel();
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
