//! Logging with indicatif integration and an optional per-run log file

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use indicatif::MultiProgress;
use log::Log;

/// Log file attached by [`attach_log_file`]; shared by every logger instance.
static LOG_FILE: OnceLock<Mutex<File>> = OnceLock::new();

/// ANSI color code and padded label for a log level.
fn level_style(level: log::Level, color: bool) -> (&'static str, &'static str, &'static str) {
    let label = match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    };
    if !color {
        return ("", label, "");
    }
    let ansi = match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[35m",
    };
    (ansi, label, "\x1b[0m")
}

/// Logger that prints to stderr (through indicatif MultiProgress on a TTY so
/// lines do not tear progress bars) and mirrors every record to the run log.
pub struct RunLogger {
    inner: env_logger::Logger,
    multi: Option<MultiProgress>,
}

impl RunLogger {
    pub fn new(inner: env_logger::Logger, multi: Option<MultiProgress>) -> Self {
        Self { inner, multi }
    }
}

impl Log for RunLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.inner.enabled(record.metadata()) {
            return;
        }

        // Color only with a TTY, which is exactly when `multi` is set
        let (pre, label, post) = level_style(record.level(), self.multi.is_some());
        let line = format!("[{pre}{label}{post}] {}", record.args());
        match &self.multi {
            Some(multi) => multi.suspend(|| eprintln!("{line}")),
            None => eprintln!("{line}"),
        }

        if let Some(file) = LOG_FILE.get() {
            let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            if let Ok(mut f) = file.lock() {
                let _ = writeln!(f, "{stamp} [{}] {}", label.trim_end(), record.args());
            }
        }
    }

    fn flush(&self) {
        if let Some(file) = LOG_FILE.get() {
            if let Ok(mut f) = file.lock() {
                let _ = f.flush();
            }
        }
    }
}

/// Initialize logging.
///
/// `RUST_LOG` overrides the default level; `multi` enables TTY mode.
pub fn init_logging(quiet: bool, debug: bool, multi: Option<&MultiProgress>) {
    let default_level = if debug {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };

    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .build();
    let max_level = logger.filter();

    if log::set_boxed_logger(Box::new(RunLogger::new(logger, multi.cloned()))).is_ok() {
        log::set_max_level(max_level);
    }
}

/// Mirror all further log records into `path` (appending).
///
/// Only the first call takes effect; later calls are ignored.
pub fn attach_log_file(path: &Path) -> io::Result<()> {
    if LOG_FILE.get().is_some() {
        return Ok(());
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let _ = LOG_FILE.set(Mutex::new(file));
    Ok(())
}
