//! Dev-mode logging: JSONL file output plus optional stderr.

use crate::json_layer::JsonLayer;
use crate::{env_filter, LogConfig};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// `~/.outbox-relay/logs/outbox.jsonl`, or the same under the temp dir when
/// there is no home directory.
fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".outbox-relay")
        .join("logs")
        .join("outbox.jsonl")
}

/// Append-only file writer, flushed after every line.
#[derive(Clone)]
pub struct LogFileWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl LogFileWriter {
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl io::Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let result = guard.write(buf);
        // Lines from concurrent processes must not interleave mid-line.
        guard.flush()?;
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

/// MakeWriter handing out clones of one `LogFileWriter`.
#[derive(Clone)]
pub struct WriterFactory {
    writer: LogFileWriter,
}

impl<'a> MakeWriter<'a> for WriterFactory {
    type Writer = LogFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer.clone()
    }
}

/// Install the JSONL subscriber as the global default.
pub fn init_dev_subscriber(config: &LogConfig) -> io::Result<()> {
    let log_path = config.log_path.clone().unwrap_or_else(default_log_path);

    let writer = LogFileWriter::new(&log_path).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("failed to open log file {}: {e}", log_path.display()),
        )
    })?;

    let json_layer = JsonLayer::new(config.service_name.clone(), WriterFactory { writer });

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(io::stderr)
            .with_ansi(true)
            .with_filter(env_filter(&config.default_level))
    });

    tracing_subscriber::registry()
        .with(json_layer.with_filter(env_filter(&config.default_level)))
        .with(stderr_layer)
        .try_init()
        .map_err(io::Error::other)?;

    tracing::info!(
        log_path = %log_path.display(),
        service = %config.service_name,
        "observability initialized"
    );
    Ok(())
}
