//! Tracing setup: stderr or a rotated, line-flushed log file in the data dir.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriter};
use tracing_subscriber::EnvFilter;

/// Filter used when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_FILTER: &str = "mcp_conductor=info,warn";

const LOG_FILE_NAME: &str = "mcp-conductor.log";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `"mcp_conductor=debug"`. `RUST_LOG` wins.
    pub level: Option<String>,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
    /// Write to `<log_dir>/mcp-conductor.log` instead of stderr.
    pub file: bool,
    /// Defaults to [`data_dir`].
    pub log_dir: Option<PathBuf>,
    /// Rotated files kept besides the current one.
    pub keep_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            json: false,
            file: false,
            log_dir: None,
            keep_files: 3,
        }
    }
}

/// Platform data directory for mcp-conductor.
///
/// - macOS: `~/Library/Application Support/mcp-conductor/`
/// - Linux: `$XDG_DATA_HOME/mcp-conductor/` (fallback `~/.local/share/...`)
/// - Windows: `{FOLDERID_RoamingAppData}\mcp-conductor\`
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("mcp-conductor");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-conductor")
}

fn filter_directive(config: &LoggingConfig) -> String {
    std::env::var("RUST_LOG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| config.level.clone())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Install the global tracing subscriber. Returns the log file path when
/// logging to a file.
pub fn init_tracing(config: &LoggingConfig) -> std::io::Result<Option<PathBuf>> {
    let directive = filter_directive(config);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (writer, log_path, ansi) = if config.file {
        let log_dir = config.log_dir.clone().unwrap_or_else(data_dir);
        std::fs::create_dir_all(&log_dir)?;
        let log_path = log_dir.join(LOG_FILE_NAME);
        rotate_log_file(&log_path, config.keep_files);

        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        (BoxMakeWriter::new(LogFile::new(log_file)), Some(log_path), false)
    } else {
        (BoxMakeWriter::new(std::io::stderr), None, true)
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(false);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.with_ansi(ansi).try_init()
    };
    installed.map_err(|e| std::io::Error::other(format!("failed to install subscriber: {e}")))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        filter = %directive,
        log_file = ?log_path.as_ref().map(|p| p.display().to_string()),
        pid = std::process::id(),
        "=== mcp-conductor starting ==="
    );
    Ok(log_path)
}

/// `mcp-conductor.log.{n}`; generation 0 is the live file.
fn rotated_path(base: &Path, generation: u32) -> PathBuf {
    if generation == 0 {
        return base.to_path_buf();
    }
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}

/// Shift every log generation up by one, keeping at most `keep` old files
/// next to the fresh live file. Gaps in the chain are fine.
fn rotate_log_file(base: &Path, keep: u32) {
    let _ = std::fs::remove_file(rotated_path(base, keep));
    for generation in (0..keep).rev() {
        let from = rotated_path(base, generation);
        if from.exists() {
            let _ = std::fs::rename(&from, rotated_path(base, generation + 1));
        }
    }
}

/// Shared log file handed to tracing. Each event is written under the lock
/// and flushed before the guard is released.
#[derive(Clone)]
struct LogFile(Arc<Mutex<std::fs::File>>);

impl LogFile {
    fn new(file: std::fs::File) -> Self {
        Self(Arc::new(Mutex::new(file)))
    }
}

struct LogFileGuard<'a>(MutexGuard<'a, std::fs::File>);

impl Write for LogFileGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.0.write(buf)?;
        self.0.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogFileGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LogFileGuard(self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
