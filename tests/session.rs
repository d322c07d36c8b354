//! End-to-end tests for the stream session.
//!
//! The coordinator runs with in-process fakes for the broadcast API, the
//! encoder and the renderer, so every test exercises the real producer and
//! pump threads plus the real state machine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use livecast_lib::stream::encoder::{Encoder, EncoderLauncher, Termination};
use livecast_lib::stream::errors::{
    ConfigError, EncoderError, PipeError, RemoteApiError, RenderError,
};
use livecast_lib::stream::frame::Frame;
use livecast_lib::stream::lifecycle::{BroadcastApi, BroadcastLifecycle, SilentNotifier};
use livecast_lib::stream::producer::Renderer;
use livecast_lib::stream::types::{BroadcastRequest, IngestTarget, Resolution, StreamConfig};
use livecast_lib::stream::{
    ConfigSource, CoordinatorHandle, SessionDeps, SessionPhase, ShutdownTimeouts,
    StreamCoordinator, StreamError,
};

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct FakeApi {
    fail_create: bool,
    creates: AtomicUsize,
    stops: Mutex<Vec<String>>,
}

#[async_trait]
impl BroadcastApi for FakeApi {
    async fn create_broadcast(&self, _request: &BroadcastRequest) -> Result<IngestTarget, RemoteApiError> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_create {
            return Err(RemoteApiError::Status {
                status: 403,
                body: "liveStreamingNotEnabled".to_string(),
            });
        }
        Ok(IngestTarget {
            push_url: format!("rtmp://ingest.test/live/key{}", n),
            watch_url: format!("https://watch.test/b{}", n),
            broadcast_id: format!("b{}", n),
        })
    }

    async fn stop_broadcast(&self, broadcast_id: &str) -> Result<(), RemoteApiError> {
        self.stops.lock().unwrap().push(broadcast_id.to_string());
        Ok(())
    }
}

impl FakeApi {
    fn stops(&self) -> Vec<String> {
        self.stops.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct FakeEncoder {
    exit_after: Option<usize>,
    writes: Mutex<Vec<usize>>,
    exited_at: Mutex<Option<Instant>>,
    terminated_at: Mutex<Option<Instant>>,
    terminate_calls: AtomicUsize,
}

impl FakeEncoder {
    fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }
}

impl Encoder for FakeEncoder {
    fn write(&self, frame: &[u8]) -> Result<(), PipeError> {
        if self.exited_at.lock().unwrap().is_some() {
            return Err(PipeError::Closed);
        }
        let mut writes = self.writes.lock().unwrap();
        writes.push(frame.len());
        if Some(writes.len()) == self.exit_after {
            *self.exited_at.lock().unwrap() = Some(Instant::now());
        }
        Ok(())
    }

    fn has_exited(&self) -> bool {
        self.exited_at.lock().unwrap().is_some()
    }

    fn terminate(&self, _deadline: Duration) -> Termination {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        *self.terminated_at.lock().unwrap() = Some(Instant::now());
        if self.has_exited() {
            Termination::AlreadyExited
        } else {
            Termination::Graceful
        }
    }
}

#[derive(Default)]
struct FakeLauncher {
    fail: bool,
    exit_after: Option<usize>,
    launched: Mutex<Vec<Arc<FakeEncoder>>>,
}

impl FakeLauncher {
    fn launched(&self) -> Vec<Arc<FakeEncoder>> {
        self.launched.lock().unwrap().clone()
    }
}

impl EncoderLauncher for FakeLauncher {
    fn launch(&self, _config: &StreamConfig, _ingest: &IngestTarget) -> Result<Arc<dyn Encoder>, EncoderError> {
        if self.fail {
            return Err(EncoderError::NotFound("ffmpeg".to_string()));
        }
        let encoder = Arc::new(FakeEncoder {
            exit_after: self.exit_after,
            ..Default::default()
        });
        self.launched.lock().unwrap().push(encoder.clone());
        Ok(encoder)
    }
}

struct SolidRenderer;

impl Renderer for SolidRenderer {
    fn render(&self, _elapsed: Duration, config: &StreamConfig) -> Result<Frame, RenderError> {
        Ok(Frame::solid(config.resolution, [0, 128, 255]))
    }
}

/// Succeeds `ok_renders` times, then fails forever.
struct FlakyRenderer {
    ok_renders: usize,
    calls: AtomicUsize,
}

impl Renderer for FlakyRenderer {
    fn render(&self, _elapsed: Duration, config: &StreamConfig) -> Result<Frame, RenderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.ok_renders {
            Ok(Frame::solid(config.resolution, [10, 20, 30]))
        } else {
            Err(RenderError::SourceUnavailable("camera unplugged".to_string()))
        }
    }
}

/// Ignores cancellation for a long time.
struct StuckRenderer;

impl Renderer for StuckRenderer {
    fn render(&self, _elapsed: Duration, config: &StreamConfig) -> Result<Frame, RenderError> {
        std::thread::sleep(Duration::from_secs(3));
        Ok(Frame::solid(config.resolution, [0, 0, 0]))
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    handle: CoordinatorHandle,
    api: Arc<FakeApi>,
    launcher: Arc<FakeLauncher>,
}

fn small_config() -> StreamConfig {
    StreamConfig::new(Resolution::new(32, 18), 20, Duration::from_millis(50))
}

fn harness_with(
    renderer: Arc<dyn Renderer>,
    api: FakeApi,
    launcher: FakeLauncher,
    source: ConfigSource,
    timeouts: ShutdownTimeouts,
) -> Harness {
    let api = Arc::new(api);
    let launcher = Arc::new(launcher);

    let deps = SessionDeps {
        renderer,
        lifecycle: BroadcastLifecycle::new(api.clone(), Arc::new(SilentNotifier)),
        launcher: launcher.clone(),
    };

    let (coordinator, handle) = StreamCoordinator::new(deps, source);
    tokio::spawn(coordinator.with_timeouts(timeouts).run());

    Harness {
        handle,
        api,
        launcher,
    }
}

fn harness(renderer: Arc<dyn Renderer>, api: FakeApi, launcher: FakeLauncher) -> Harness {
    harness_with(
        renderer,
        api,
        launcher,
        ConfigSource::Fixed(small_config()),
        ShutdownTimeouts {
            join: Duration::from_secs(2),
            terminate: Duration::from_secs(1),
        },
    )
}

async fn wait_idle(handle: &CoordinatorHandle, limit: Duration) {
    tokio::time::timeout(limit, handle.wait_for_phase(SessionPhase::Idle))
        .await
        .expect("session did not return to idle in time")
        .unwrap();
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scenario_fixed_frame_streams_at_output_rate() {
    let config = StreamConfig::new(Resolution::new(640, 360), 10, Duration::from_secs(1));
    let h = harness_with(
        Arc::new(SolidRenderer),
        FakeApi::default(),
        FakeLauncher::default(),
        ConfigSource::Fixed(config.clone()),
        ShutdownTimeouts::default(),
    );

    h.handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let encoder = h.launcher.launched()[0].clone();
    let writes = encoder.writes.lock().unwrap().clone();
    assert!(
        (12..=25).contains(&writes.len()),
        "expected roughly 20 writes at 10 Hz, got {}",
        writes.len()
    );
    assert!(writes.iter().all(|len| *len == 640 * 360 * 3));

    h.handle.stop().await.unwrap();
    assert_eq!(h.handle.status().phase, SessionPhase::Idle);
    assert_eq!(h.api.stops(), vec!["b1".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scenario_render_failures_never_end_session() {
    let h = harness(
        Arc::new(FlakyRenderer {
            ok_renders: 0,
            calls: AtomicUsize::new(0),
        }),
        FakeApi::default(),
        FakeLauncher::default(),
    );

    h.handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(h.handle.status().phase, SessionPhase::Live);
    assert_eq!(h.launcher.launched()[0].write_count(), 0);

    h.handle.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scenario_last_good_frame_keeps_serving() {
    let h = harness(
        Arc::new(FlakyRenderer {
            ok_renders: 1,
            calls: AtomicUsize::new(0),
        }),
        FakeApi::default(),
        FakeLauncher::default(),
    );

    h.handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    let status = h.handle.status();
    assert_eq!(status.phase, SessionPhase::Live);

    let encoder = h.launcher.launched()[0].clone();
    let writes = encoder.writes.lock().unwrap().clone();
    assert!(writes.len() >= 3, "only {} writes", writes.len());
    assert!(writes.iter().all(|len| *len == 32 * 18 * 3));
    assert!(status.frames_written >= 3);

    h.handle.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scenario_encoder_exit_stops_session() {
    let h = harness(
        Arc::new(SolidRenderer),
        FakeApi::default(),
        FakeLauncher {
            exit_after: Some(3),
            ..Default::default()
        },
    );

    h.handle.start().await.unwrap();
    wait_idle(&h.handle, Duration::from_secs(3)).await;

    let encoder = h.launcher.launched()[0].clone();
    assert_eq!(encoder.write_count(), 3);
    assert_eq!(encoder.terminate_calls.load(Ordering::SeqCst), 1);

    let exited_at = encoder.exited_at.lock().unwrap().unwrap();
    let terminated_at = encoder.terminated_at.lock().unwrap().unwrap();
    assert!(
        terminated_at.duration_since(exited_at) < Duration::from_millis(500),
        "shutdown took {:?}",
        terminated_at.duration_since(exited_at)
    );

    assert_eq!(h.api.stops(), vec!["b1".to_string()]);

    // Nothing left to stop.
    assert_eq!(h.handle.stop().await, Err(StreamError::NotRunning));
    assert_eq!(h.api.stops().len(), 1);
}

// =============================================================================
// Conflicts and failures
// =============================================================================

#[tokio::test]
async fn test_stop_while_idle_is_conflict() {
    let h = harness(Arc::new(SolidRenderer), FakeApi::default(), FakeLauncher::default());

    let err = h.handle.stop().await.unwrap_err();
    assert_eq!(err, StreamError::NotRunning);
    assert!(err.is_conflict());
    assert_eq!(h.handle.status().phase, SessionPhase::Idle);
    assert_eq!(h.api.creates.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_while_live_is_conflict() {
    let h = harness(Arc::new(SolidRenderer), FakeApi::default(), FakeLauncher::default());

    h.handle.start().await.unwrap();
    let err = h.handle.start().await.unwrap_err();

    assert_eq!(err, StreamError::AlreadyRunning);
    assert!(err.is_conflict());
    assert_eq!(h.launcher.launched().len(), 1);
    assert_eq!(h.api.creates.load(Ordering::SeqCst), 1);
    assert_eq!(h.handle.status().phase, SessionPhase::Live);

    h.handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_acquire_failure_launches_nothing() {
    let h = harness(
        Arc::new(SolidRenderer),
        FakeApi {
            fail_create: true,
            ..Default::default()
        },
        FakeLauncher::default(),
    );

    let err = h.handle.start().await.unwrap_err();
    assert!(matches!(err, StreamError::Remote(RemoteApiError::Status { status: 403, .. })));
    assert!(h.launcher.launched().is_empty());
    assert!(h.api.stops().is_empty());
    assert_eq!(h.handle.status().phase, SessionPhase::Idle);
}

#[tokio::test]
async fn test_launch_failure_releases_broadcast() {
    let h = harness(
        Arc::new(SolidRenderer),
        FakeApi::default(),
        FakeLauncher {
            fail: true,
            ..Default::default()
        },
    );

    let err = h.handle.start().await.unwrap_err();
    assert_eq!(err, StreamError::Encoder(EncoderError::NotFound("ffmpeg".to_string())));
    assert_eq!(h.api.stops(), vec!["b1".to_string()]);
    assert_eq!(h.handle.status().phase, SessionPhase::Idle);
}

#[tokio::test]
async fn test_invalid_settings_file_rejects_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{"resolution": "641x360"}"#).unwrap();

    let h = harness_with(
        Arc::new(SolidRenderer),
        FakeApi::default(),
        FakeLauncher::default(),
        ConfigSource::File(path),
        ShutdownTimeouts::default(),
    );

    let err = h.handle.start().await.unwrap_err();
    assert!(matches!(err, StreamError::Config(ConfigError::Resolution(_))));
    assert_eq!(h.api.creates.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_reports_live_session() {
    let h = harness(Arc::new(SolidRenderer), FakeApi::default(), FakeLauncher::default());

    let idle = h.handle.status();
    assert_eq!(idle.phase, SessionPhase::Idle);
    assert!(idle.watch_url.is_none());

    h.handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let live = h.handle.status();
    assert_eq!(live.phase, SessionPhase::Live);
    assert_eq!(live.watch_url.as_deref(), Some("https://watch.test/b1"));
    assert!(live.session_id.is_some());
    assert!(live.frames_written > 0);
    assert!(live.elapsed_seconds > 0.0);

    let json = serde_json::to_value(&live).unwrap();
    assert_eq!(json["phase"], "live");
    assert!(json.get("watchUrl").is_some());

    h.handle.stop().await.unwrap();

    let stopped = h.handle.status();
    assert_eq!(stopped.phase, SessionPhase::Idle);
    assert!(stopped.watch_url.is_none());
    assert!(stopped.session_id.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_status_is_current_when_replies_arrive() {
    let h = harness(Arc::new(SolidRenderer), FakeApi::default(), FakeLauncher::default());

    for round in 1..=20 {
        h.handle.start().await.unwrap();
        let live = h.handle.status();
        assert_eq!(live.phase, SessionPhase::Live, "round {}", round);
        assert_eq!(
            live.watch_url,
            Some(format!("https://watch.test/b{}", round)),
            "round {}",
            round
        );
        assert!(live.session_id.is_some(), "round {}", round);

        h.handle.stop().await.unwrap();
        let idle = h.handle.status();
        assert_eq!(idle.phase, SessionPhase::Idle, "round {}", round);
        assert!(idle.watch_url.is_none(), "round {}", round);
    }

    assert_eq!(h.launcher.launched().len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_runs_fresh_session() {
    let h = harness(Arc::new(SolidRenderer), FakeApi::default(), FakeLauncher::default());

    h.handle.start().await.unwrap();
    h.handle.stop().await.unwrap();
    h.handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    h.handle.stop().await.unwrap();

    let launched = h.launcher.launched();
    assert_eq!(launched.len(), 2);
    assert!(launched.iter().all(|e| e.terminate_calls.load(Ordering::SeqCst) == 1));
    assert!(launched[1].write_count() > 0);
    assert_eq!(h.api.stops(), vec!["b1".to_string(), "b2".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stuck_worker_does_not_hang_stop() {
    let h = harness_with(
        Arc::new(StuckRenderer),
        FakeApi::default(),
        FakeLauncher::default(),
        ConfigSource::Fixed(small_config()),
        ShutdownTimeouts {
            join: Duration::from_millis(200),
            terminate: Duration::from_millis(200),
        },
    );

    h.handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    h.handle.stop().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2), "stop took {:?}", started.elapsed());
    assert_eq!(h.launcher.launched()[0].terminate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.api.stops().len(), 1);
}

#[tokio::test]
async fn test_dropping_handles_ends_coordinator() {
    let api = Arc::new(FakeApi::default());
    let deps = SessionDeps {
        renderer: Arc::new(SolidRenderer),
        lifecycle: BroadcastLifecycle::new(api, Arc::new(SilentNotifier)),
        launcher: Arc::new(FakeLauncher::default()),
    };
    let (coordinator, handle) = StreamCoordinator::new(deps, ConfigSource::Fixed(small_config()));
    let task = tokio::spawn(coordinator.run());

    drop(handle);
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("coordinator kept running")
        .unwrap();
}
