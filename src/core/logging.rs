use std::collections::HashMap;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Targets that get their own daily log file. Everything else lands in `system.log`.
pub const LOG_TARGETS: [&str; 4] = ["stream", "encoder", "broadcast", "overlay"];

/// Keeps the background log writers alive. Dropping it flushes them.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

struct TargetWriter {
    writers: HashMap<String, NonBlocking>,
    system_writer: NonBlocking,
}

impl TargetWriter {
    fn new(writers: HashMap<String, NonBlocking>, system_writer: NonBlocking) -> Self {
        Self {
            writers,
            system_writer,
        }
    }

    fn writer_for(&self, target: &str) -> &NonBlocking {
        for (name, writer) in &self.writers {
            if target == name || target.starts_with(&format!("{}::", name)) {
                return writer;
            }
        }
        &self.system_writer
    }
}

impl<'a> MakeWriter<'a> for TargetWriter {
    type Writer = NonBlocking;

    fn make_writer(&'a self) -> Self::Writer {
        self.system_writer.clone()
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        self.writer_for(meta.target()).clone()
    }
}

/// Routes each target to its own rolling file under `log_dir` and mirrors
/// everything to stderr. `RUST_LOG` overrides the default `info` filter.
pub fn init_logging(log_dir: &Path) -> std::io::Result<LoggingGuards> {
    std::fs::create_dir_all(log_dir)?;

    let mut guards = Vec::new();
    let mut target_writers = HashMap::new();

    for target in LOG_TARGETS {
        let file_appender =
            RollingFileAppender::new(Rotation::DAILY, log_dir, format!("{}.log", target));
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        target_writers.insert(target.to_string(), non_blocking);
        guards.push(guard);
    }

    let system_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "system.log");
    let (system_writer, system_guard) = tracing_appender::non_blocking(system_appender);
    guards.push(system_guard);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(TargetWriter::new(target_writers, system_writer))
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        );

    tracing::subscriber::set_global_default(subscriber).map_err(std::io::Error::other)?;

    tracing::info!(target: "system", "Logging initialized at {:?}", log_dir);

    Ok(LoggingGuards { _guards: guards })
}
