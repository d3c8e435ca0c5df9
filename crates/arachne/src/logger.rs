use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};

use crate::config::AppConfig;
use crate::logfile::LogFile;

const LOG_FILE_FORMAT: &str = "%Y-%m-%d.scrapy.log";

static GENERATION: AtomicUsize = AtomicUsize::new(0);

/// Where and how crawl logs are written.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log to stdout instead of the log files
    pub debug: bool,
    pub dir: PathBuf,
    pub level: LevelFilter,
    pub max_rotated_files: usize,
    /// Size in bytes after which the log file is rotated
    pub rotate_length: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            dir: PathBuf::from("logs"),
            level: LevelFilter::Info,
            max_rotated_files: 100,
            rotate_length: 1_000_000,
        }
    }
}

impl From<&AppConfig> for LogConfig {
    fn from(app: &AppConfig) -> Self {
        Self {
            debug: app.debug,
            dir: app.log_dir.clone(),
            ..Default::default()
        }
    }
}

impl LogConfig {
    /// Today's log file.
    pub fn log_file_path(&self) -> PathBuf {
        self.dir.join(Local::now().format(LOG_FILE_FORMAT).to_string())
    }
}

/// Keeps the logger installed by [`start_logger`] until dropped.
#[derive(Debug)]
pub struct LoggerGuard {
    generation: usize,
    log_file: Option<PathBuf>,
}

impl LoggerGuard {
    /// The file logs are written to, `None` when logging to the console.
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

impl Drop for LoggerGuard {
    fn drop(&mut self) {
        log::logger().flush();
        // A more recent guard owns the logger now
        if GENERATION.load(Ordering::SeqCst) == self.generation {
            log_reroute::reroute(Silent);
            log::set_max_level(LevelFilter::Off);
        }
    }
}

struct Silent;

impl Log for Silent {
    fn enabled(&self, _: &Metadata) -> bool {
        false
    }

    fn log(&self, _: &Record) {}

    fn flush(&self) {}
}

/// Installs the crawl logger: stdout when `debug` is set, today's rotating
/// log file otherwise. Replaces any logger installed by a previous call.
pub fn start_logger(config: &LogConfig) -> anyhow::Result<LoggerGuard> {
    let (max_level, logger, log_file) = if config.debug {
        let (max_level, logger) = console_logger(config);
        (max_level, logger, None)
    } else {
        let path = config.log_file_path();
        let (max_level, logger) = file_logger(config, &path)?;
        (max_level, logger, Some(path))
    };

    // Only the first call can register the rerouting logger
    let _ = log_reroute::init();
    log_reroute::reroute_boxed(logger);
    log::set_max_level(max_level);

    let generation = GENERATION.fetch_add(1, Ordering::SeqCst) + 1;
    match &log_file {
        Some(path) => log::debug!("Logging to {}", path.display()),
        None => log::debug!("Logging to stdout"),
    }

    Ok(LoggerGuard {
        generation,
        log_file,
    })
}

fn console_logger(config: &LogConfig) -> (LevelFilter, Box<dyn Log>) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(config.level)
        .target(env_logger::Target::Stdout);
    if let Ok(filters) = env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    let logger = builder.build();
    (logger.filter(), Box::new(logger))
}

fn file_logger(config: &LogConfig, path: &Path) -> anyhow::Result<(LevelFilter, Box<dyn Log>)> {
    let log_file = LogFile::open(path, config.rotate_length, config.max_rotated_files)
        .with_context(|| format!("Couldn't open log file {}", path.display()))?;

    let dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%z"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(config.level)
        .chain(Box::new(log_file) as Box<dyn Write + Send>);

    Ok(dispatch.into_log())
}
