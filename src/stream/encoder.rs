//! External encoder process fed raw frames over stdin.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStderr, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::errors::{EncoderError, PipeError};
use super::types::{IngestTarget, StreamConfig};

const TERMINATE_POLL: Duration = Duration::from_millis(50);

/// How [`Encoder::terminate`] ended the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    AlreadyExited,
    Graceful,
    Forced,
}

/// A running encoder. The session keeps one handle, the pump is the only writer.
pub trait Encoder: Send + Sync {
    /// Writes exactly one raw frame.
    fn write(&self, frame: &[u8]) -> Result<(), PipeError>;

    /// Non-blocking exit check.
    fn has_exited(&self) -> bool;

    /// Asks the process to stop, waits up to `deadline`, then kills it.
    fn terminate(&self, deadline: Duration) -> Termination;
}

/// Starts an encoder that pushes to the given ingest target.
pub trait EncoderLauncher: Send + Sync {
    fn launch(
        &self,
        config: &StreamConfig,
        ingest: &IngestTarget,
    ) -> Result<Arc<dyn Encoder>, EncoderError>;
}

/// Program plus arguments for the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl EncoderCommand {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Raw frames on stdin plus a silent stereo track, muxed to FLV at `ingest_url`.
    pub fn ffmpeg(config: &StreamConfig, ingest_url: &str) -> Self {
        let enc = &config.encoder;
        let fps = config.fps.to_string();
        let gop = (config.fps * 2).to_string();

        let mut args: Vec<String> = Vec::new();
        args.extend(["-hide_banner", "-nostats", "-loglevel", "warning", "-y"].map(String::from));

        // Video input: fixed-size raw frames, delimited only by byte count.
        args.extend([
            "-f".to_string(), "rawvideo".to_string(),
            "-pix_fmt".to_string(), enc.pixel_layout.ffmpeg_name().to_string(),
            "-s".to_string(), config.resolution.to_string(),
            "-r".to_string(), fps,
            "-i".to_string(), "-".to_string(),
        ]);

        // Audio input: silent stereo track.
        args.extend([
            "-f".to_string(), "lavfi".to_string(),
            "-i".to_string(), "anullsrc=channel_layout=stereo:sample_rate=44100".to_string(),
        ]);

        args.extend([
            "-c:v".to_string(), "libx264".to_string(),
            "-preset".to_string(), enc.preset.clone(),
            "-pix_fmt".to_string(), "yuv420p".to_string(),
            "-g".to_string(), gop,
            "-b:v".to_string(), enc.video_bitrate.clone(),
            "-maxrate".to_string(), enc.max_bitrate.clone(),
            "-bufsize".to_string(), enc.buffer_size.clone(),
            "-c:a".to_string(), "aac".to_string(),
            "-b:a".to_string(), enc.audio_bitrate.clone(),
            "-ac".to_string(), "2".to_string(),
            "-ar".to_string(), "44100".to_string(),
            "-map".to_string(), "0:v".to_string(),
            "-map".to_string(), "1:a".to_string(),
            "-f".to_string(), "flv".to_string(),
            ingest_url.to_string(),
        ]);

        Self {
            program: enc.program.clone(),
            args,
        }
    }
}

/// Probes `<program> -version`.
pub fn check_ffmpeg(program: &str) -> Result<(), EncoderError> {
    let status = Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|_| EncoderError::NotFound(program.to_string()))?;

    if !status.success() {
        return Err(EncoderError::Launch(format!(
            "{} -version exited with {}",
            program, status
        )));
    }
    Ok(())
}

/// An encoder subprocess with its stdin pipe.
///
/// Dropping the handle kills the process if it is still running.
pub struct EncoderProcess {
    pid: u32,
    child: Mutex<Child>,
    input: Mutex<Option<ChildStdin>>,
}

impl EncoderProcess {
    pub fn spawn(command: &EncoderCommand) -> Result<Self, EncoderError> {
        tracing::info!(target: "encoder", "[ENCODER] Launching {}", command.program);
        tracing::debug!(target: "encoder", "[ENCODER] Args: {:?}", command.args);

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => EncoderError::NotFound(command.program.clone()),
                _ => EncoderError::Launch(e.to_string()),
            })?;

        let pid = child.id();

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EncoderError::NoInput);
        };

        if let Some(stderr) = child.stderr.take() {
            forward_stderr(stderr, pid);
        }

        tracing::info!(target: "encoder", "[ENCODER] Running with pid {}", pid);

        Ok(Self {
            pid,
            child: Mutex::new(child),
            input: Mutex::new(Some(stdin)),
        })
    }

    fn child(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Closes stdin unless a write currently holds it. Returns true if closed.
    fn close_input(&self) -> bool {
        match self.input.try_lock() {
            Ok(mut input) => {
                input.take();
                true
            }
            Err(std::sync::TryLockError::Poisoned(e)) => {
                e.into_inner().take();
                true
            }
            Err(std::sync::TryLockError::WouldBlock) => false,
        }
    }
}

impl Encoder for EncoderProcess {
    fn write(&self, frame: &[u8]) -> Result<(), PipeError> {
        let mut input = self.input.lock().unwrap_or_else(|e| e.into_inner());
        let result = match input.as_mut() {
            Some(stdin) => stdin.write_all(frame),
            None => return Err(PipeError::Closed),
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = PipeError::from_io(&e);
                if err == PipeError::Closed {
                    // Never write into a pipe the encoder has closed.
                    input.take();
                }
                Err(err)
            }
        }
    }

    fn has_exited(&self) -> bool {
        match self.child().try_wait() {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(target: "encoder", "[ENCODER] Failed to poll pid {}: {}", self.pid, e);
                true
            }
        }
    }

    fn terminate(&self, deadline: Duration) -> Termination {
        let started = Instant::now();
        let input_closed = self.close_input();
        let mut child = self.child();

        if let Ok(Some(status)) = child.try_wait() {
            tracing::info!(target: "encoder", "[ENCODER] pid {} already exited: {}", self.pid, status);
            return Termination::AlreadyExited;
        }

        tracing::info!(target: "encoder",
            "[ENCODER] Terminating pid {} (stdin closed: {}, deadline {:?})", self.pid, input_closed, deadline);
        request_stop(self.pid);

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::info!(target: "encoder",
                        "[ENCODER] pid {} exited after {:?}: {}", self.pid, started.elapsed(), status);
                    return Termination::Graceful;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(target: "encoder", "[ENCODER] Failed to poll pid {}: {}", self.pid, e);
                    break;
                }
            }

            let remaining = deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            std::thread::sleep(TERMINATE_POLL.min(remaining));
        }

        tracing::warn!(target: "encoder",
            "[ENCODER] pid {} did not exit within {:?}, killing", self.pid, deadline);
        if let Err(e) = child.kill() {
            tracing::warn!(target: "encoder", "[ENCODER] Failed to kill pid {}: {}", self.pid, e);
        }
        let _ = child.wait();
        Termination::Forced
    }
}

impl Drop for EncoderProcess {
    fn drop(&mut self) {
        let child = self.child.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Ok(None) = child.try_wait() {
            tracing::warn!(target: "encoder", "[ENCODER] Handle dropped while pid {} runs, killing", self.pid);
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(unix)]
fn request_stop(pid: u32) {
    if let Err(e) = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        tracing::warn!(target: "encoder", "[ENCODER] Failed to send SIGTERM to {}: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn request_stop(_pid: u32) {}

fn forward_stderr(stderr: ChildStderr, pid: u32) {
    std::thread::spawn(move || {
        for line in BufReader::new(stderr).lines() {
            match line {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => tracing::debug!(target: "encoder", "[ENCODER {}] {}", pid, line),
                Err(_) => break,
            }
        }
    });
}

/// Launches ffmpeg built from [`EncoderCommand::ffmpeg`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegLauncher;

impl EncoderLauncher for FfmpegLauncher {
    fn launch(
        &self,
        config: &StreamConfig,
        ingest: &IngestTarget,
    ) -> Result<Arc<dyn Encoder>, EncoderError> {
        let command = EncoderCommand::ffmpeg(config, &ingest.push_url);
        let process = EncoderProcess::spawn(&command)?;
        Ok(Arc::new(process))
    }
}
