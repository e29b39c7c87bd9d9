//! Logging setup and the rotatable log sink.
//!
//! All output goes through `tracing`. The binary installs a `tracing-subscriber`
//! fmt layer whose writer is a [`LogSink`]: either stderr or an append-mode
//! file. On `Reload` (SIGHUP) the run loop calls [`LogSink::rotate`], which
//! reopens the file at its configured path so external tools like logrotate
//! can move the old file away.
//!
//! Level selection: `--verbose` forces `debug`, `--quiet` forces `error`,
//! otherwise `RUST_LOG` is honoured with `info` as the fallback.

use anyhow::{Context, Result, anyhow};
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

enum Target {
    Stderr,
    File { path: PathBuf, file: File },
}

/// Destination for formatted log lines.
///
/// Clones share the same underlying handle, so a rotation through any clone
/// affects every writer.
#[derive(Clone)]
pub struct LogSink {
    target: Arc<Mutex<Target>>,
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink").field("path", &self.path()).finish()
    }
}

impl LogSink {
    /// A sink writing to stderr. Rotation is a no-op.
    pub fn stderr() -> Self {
        Self {
            target: Arc::new(Mutex::new(Target::Stderr)),
        }
    }

    /// A sink appending to `path`, creating parent directories as needed.
    pub fn file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(Self {
            target: Arc::new(Mutex::new(Target::File {
                path,
                file,
            })),
        })
    }

    /// Stderr when `path` is `None`, otherwise a file sink.
    pub fn from_path(path: Option<PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::file(path),
            None => Ok(Self::stderr()),
        }
    }

    /// The log file path, `None` for stderr.
    pub fn path(&self) -> Option<PathBuf> {
        match &*self.lock() {
            Target::Stderr => None,
            Target::File { path, .. } => Some(path.clone()),
        }
    }

    /// Reopen the log file at its configured path.
    ///
    /// If the reopen fails the previous handle stays in use and the error is
    /// returned.
    pub fn rotate(&self) -> Result<()> {
        let mut target = self.lock();
        if let Target::File { path, file } = &mut *target {
            let _ = file.flush();
            let reopened = open_append(path)?;
            *file = reopened;
        }
        Ok(())
    }

    /// Whether coloured output makes sense for this sink.
    pub fn is_terminal(&self) -> bool {
        match &*self.lock() {
            Target::Stderr => io::stderr().is_terminal(),
            Target::File { .. } => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Target> {
        // A panic while holding the lock leaves a usable handle behind.
        self.target.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Writer handed out by [`LogSink`] for each event.
pub struct LogWriter {
    sink: LogSink,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut *self.sink.lock() {
            Target::Stderr => io::stderr().write(buf),
            Target::File { file, .. } => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut *self.sink.lock() {
            Target::Stderr => io::stderr().flush(),
            Target::File { file, .. } => file.flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            sink: self.clone(),
        }
    }
}

/// Build the level filter from the CLI flags and `RUST_LOG`.
pub fn build_filter(verbose: bool, quiet: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else if quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber writing to `sink`.
pub fn init(sink: &LogSink, verbose: bool, quiet: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(verbose, quiet))
        .with_writer(sink.clone())
        .with_ansi(sink.is_terminal())
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {e}"))
}

/// Text shown by the `log` command.
///
/// Device paths (`/dev/...`) and stderr are reported rather than read.
pub async fn describe(sink: &LogSink) -> Result<String> {
    let Some(path) = sink.path() else {
        return Ok("Logging to stderr, no log file configured.".to_string());
    };

    if path.starts_with("/dev") {
        return Ok(format!("Logging to device {}", path.display()));
    }

    let contents = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read log file {}", path.display()))?;
    Ok(format!("Log file: {}\n\n{}", path.display(), contents))
}
