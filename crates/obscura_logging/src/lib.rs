//! Shared logging utilities for Obscura binaries.
//!
//! Both binaries log to stderr and to a size-capped file under the
//! Obscura home directory. `RUST_LOG` overrides the default filter.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str =
    "obscura_server=info,obscura_agent=info,obscura_db=info,obscura_security=info";
const KEPT_ROTATIONS: usize = 4;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration shared by Obscura binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize tracing with a size-capped file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let writer = LogFileWriter::open(log_dir, config.app_name)
        .context("Failed to open log file")?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// Get the Obscura home directory: ~/.obscura
pub fn obscura_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("OBSCURA_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".obscura")
}

/// Get the logs directory: ~/.obscura/logs
pub fn logs_dir() -> PathBuf {
    obscura_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

struct LogFile {
    dir: PathBuf,
    base: String,
    file: File,
    written: u64,
}

impl LogFile {
    fn open(dir: PathBuf, base: String) -> io::Result<Self> {
        let path = dir.join(format!("{base}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            dir,
            base,
            file,
            written,
        })
    }

    /// Shift `app.log` -> `app.log.1` -> ... and reopen a fresh file.
    /// The oldest rotation falls off the end.
    fn rotate(&mut self) -> io::Result<()> {
        let _ = self.file.flush();

        let slot = |index: usize| {
            if index == 0 {
                self.dir.join(format!("{}.log", self.base))
            } else {
                self.dir.join(format!("{}.log.{index}", self.base))
            }
        };

        let _ = fs::remove_file(slot(KEPT_ROTATIONS));
        for index in (0..KEPT_ROTATIONS).rev() {
            let from = slot(index);
            if from.exists() {
                let _ = fs::rename(&from, slot(index + 1));
            }
        }

        let fresh = Self::open(self.dir.clone(), self.base.clone())?;
        self.file = fresh.file;
        self.written = fresh.written;
        Ok(())
    }
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > MAX_LOG_FILE_SIZE {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Clonable `MakeWriter` over the shared log file.
#[derive(Clone)]
struct LogFileWriter {
    inner: Arc<Mutex<LogFile>>,
}

impl LogFileWriter {
    fn open(dir: PathBuf, app_name: &str) -> io::Result<Self> {
        let mut log_file = LogFile::open(dir, sanitize_name(app_name))?;
        if log_file.written > MAX_LOG_FILE_SIZE {
            log_file.rotate()?;
        }
        Ok(Self {
            inner: Arc::new(Mutex::new(log_file)),
        })
    }
}

struct LogFileGuard {
    inner: Arc<Mutex<LogFile>>,
}

impl Write for LogFileGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.lock() {
            Ok(mut file) => file.write(buf),
            // A poisoned lock drops the line rather than killing the app.
            Err(_) => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.lock() {
            Ok(mut file) => file.flush(),
            Err(_) => Ok(()),
        }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogFileWriter {
    type Writer = LogFileGuard;

    fn make_writer(&'a self) -> Self::Writer {
        LogFileGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}
