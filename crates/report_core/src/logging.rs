//! Report engine logging bootstrap.
//!
//! # Responsibility
//! - Route `log` records of the engine to size-rotated files, once per
//!   process.
//! - Keep records single-line `event=... module=... status=...` with section
//!   ids and field names only. Field values and image payloads stay out of
//!   the logs, panic payloads included.
//!
//! # Invariants
//! - Initialization never panics and is idempotent for equal settings.
//! - Once active, a request for another level or directory is an error and
//!   leaves the active logger in place.

use flexi_logger::{
    Cleanup, Criterion, FileSpec, FlexiLoggerError, LogSpecification, Logger, LoggerHandle,
    Naming, WriteMode,
};
use log::{error, info, LevelFilter};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const FILE_BASENAME: &str = "report_core";
const ROTATE_AT_BYTES: u64 = 8 * 1024 * 1024;
const KEPT_FILES: usize = 4;
const PANIC_SUMMARY_CHARS: usize = 120;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

/// Errors from logging initialization.
#[derive(Debug)]
pub enum LoggingError {
    /// Level text is not one of `off|error|warn|info|debug|trace`.
    UnsupportedLevel(String),
    /// Directory is blank or relative.
    InvalidDirectory(String),
    /// Directory could not be created.
    CreateDirectory {
        dir: PathBuf,
        source: std::io::Error,
    },
    /// `flexi_logger` refused to start.
    Backend(FlexiLoggerError),
    /// Logging is already active with other settings.
    Conflict {
        active: LogSettings,
        requested: LogSettings,
    },
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLevel(level) => write!(
                f,
                "unsupported log level `{level}`; expected off|error|warn|info|debug|trace"
            ),
            Self::InvalidDirectory(message) => write!(f, "invalid log directory: {message}"),
            Self::CreateDirectory { dir, source } => {
                write!(f, "cannot create log directory `{}`: {source}", dir.display())
            }
            Self::Backend(err) => write!(f, "logger backend failed to start: {err}"),
            Self::Conflict { active, requested } => write!(
                f,
                "logging already active as {active}; refusing to switch to {requested}"
            ),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateDirectory { source, .. } => Some(source),
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FlexiLoggerError> for LoggingError {
    fn from(value: FlexiLoggerError) -> Self {
        Self::Backend(value)
    }
}

/// Validated logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LevelFilter,
    pub dir: PathBuf,
}

impl LogSettings {
    /// Parses a level name (case-insensitive, `warning` accepted) and an
    /// absolute directory.
    pub fn parse(level: &str, dir: impl AsRef<Path>) -> Result<Self, LoggingError> {
        let trimmed = level.trim();
        let level = if trimmed.eq_ignore_ascii_case("warning") {
            LevelFilter::Warn
        } else {
            trimmed
                .parse::<LevelFilter>()
                .map_err(|_| LoggingError::UnsupportedLevel(trimmed.to_string()))?
        };

        let dir = dir.as_ref();
        if dir.as_os_str().is_empty() {
            return Err(LoggingError::InvalidDirectory("path is empty".to_string()));
        }
        if !dir.is_absolute() {
            return Err(LoggingError::InvalidDirectory(format!(
                "`{}` is not absolute",
                dir.display()
            )));
        }
        Ok(Self {
            level,
            dir: dir.to_path_buf(),
        })
    }
}

impl Display for LogSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "level={} dir={}", self.level, self.dir.display())
    }
}

struct ActiveLogger {
    settings: LogSettings,
    _handle: LoggerHandle,
}

impl ActiveLogger {
    fn start(settings: LogSettings) -> Result<Self, LoggingError> {
        std::fs::create_dir_all(&settings.dir).map_err(|source| LoggingError::CreateDirectory {
            dir: settings.dir.clone(),
            source,
        })?;

        let spec = LogSpecification::builder().default(settings.level).build();
        let handle = Logger::with(spec)
            .log_to_file(
                FileSpec::default()
                    .directory(settings.dir.as_path())
                    .basename(FILE_BASENAME),
            )
            .rotate(
                Criterion::Size(ROTATE_AT_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(KEPT_FILES),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(flexi_logger::detailed_format)
            .start()?;

        Ok(Self {
            settings,
            _handle: handle,
        })
    }

    fn ensure_same(&self, requested: &LogSettings) -> Result<(), LoggingError> {
        if &self.settings == requested {
            Ok(())
        } else {
            Err(LoggingError::Conflict {
                active: self.settings.clone(),
                requested: requested.clone(),
            })
        }
    }
}

/// Starts file logging for the engine.
///
/// Repeated calls with the same settings return `Ok(())` without touching
/// the active logger.
///
/// # Errors
/// - `UnsupportedLevel` / `InvalidDirectory` for bad arguments.
/// - `CreateDirectory` / `Backend` when the logger cannot start.
/// - `Conflict` when logging is already active with other settings.
pub fn init_logging(level: &str, log_dir: impl AsRef<Path>) -> Result<(), LoggingError> {
    let requested = LogSettings::parse(level, log_dir)?;
    if let Some(active) = ACTIVE.get() {
        return active.ensure_same(&requested);
    }

    let active = ACTIVE.get_or_try_init(|| {
        let active = ActiveLogger::start(requested.clone())?;
        install_panic_hook();
        info!(
            "event=logging_init module=logging status=ok level={} log_dir={} os={} version={}",
            active.settings.level,
            active.settings.dir.display(),
            std::env::consts::OS,
            env!("CARGO_PKG_VERSION")
        );
        Ok::<_, LoggingError>(active)
    })?;
    // A concurrent caller may have started the logger first.
    active.ensure_same(&requested)
}

/// Settings of the active logger, `None` before `init_logging` succeeded.
pub fn logging_status() -> Option<LogSettings> {
    ACTIVE.get().map(|active| active.settings.clone())
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn install_panic_hook() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let location = panic
            .location()
            .map_or_else(|| "unknown".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));
        let payload = panic
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic.payload().downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string payload");
        error!(
            "event=panic module=logging status=error location={} payload={}",
            location,
            one_line(payload, PANIC_SUMMARY_CHARS)
        );
        previous(panic);
    }));
}

/// Flattens `text` to one line of at most `limit` chars plus an ellipsis.
fn one_line(text: &str, limit: usize) -> String {
    let mut chars = text.chars().map(|c| if c == '\n' || c == '\r' { ' ' } else { c });
    let mut line: String = chars.by_ref().take(limit).collect();
    if chars.next().is_some() {
        line.push_str("...");
    }
    line
}
