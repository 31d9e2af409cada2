//! Decoupled logging pipeline for deployment runs.
//!
//! Every `log::info!()`/`log::warn!()`/... call is rendered twice: a colored,
//! severity-prefixed line on the console (synchronously, so interleaving with
//! child process output stays readable) and a plain timestamped line sent to a
//! background writer thread that appends to `logs/terrarium-<date>.log`.
//!
//! # Architecture
//!
//! ```text
//! log::info!() / log_success!()
//!     |
//! [LogCollector] (log::Log impl)
//!     |                    \
//!     | console (colored)   \ crossbeam unbounded channel
//!     v                      v
//!  stderr/stdout        [DiskPersister thread]
//!                            |
//!                     logs/terrarium-YYYYMMDD.log
//! ```
//!
//! Records with target `"success"` are shown as `[SUCCESS]` in green.

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Log target used by `log_success!` for positive outcomes.
pub const SUCCESS_TARGET: &str = "success";

const RESET: &str = "\x1b[0m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const BLUE: &str = "\x1b[34m";
const GREY: &str = "\x1b[90m";

/// Internal log line or special marker
enum LogMessage {
    Line(String),
    /// Flush marker with channel sender to signal completion
    Flush(std::sync::mpsc::Sender<()>),
}

/// Severity label shown in brackets, with its console color.
pub fn severity_label(level: Level, target: &str) -> (&'static str, &'static str) {
    if target == SUCCESS_TARGET && level == Level::Info {
        return ("SUCCESS", GREEN);
    }
    match level {
        Level::Error => ("ERROR", RED),
        Level::Warn => ("WARN", YELLOW),
        Level::Info => ("INFO", BLUE),
        Level::Debug | Level::Trace => ("DEBUG", GREY),
    }
}

/// Console + file logger
pub struct LogCollector {
    tx: Sender<LogMessage>,
    level: LevelFilter,
    log_file: PathBuf,
    color: bool,
}

impl LogCollector {
    /// Create the collector and spawn its disk writer thread.
    pub fn new(log_dir: &Path, level: LevelFilter) -> Result<Self, String> {
        std::fs::create_dir_all(log_dir)
            .map_err(|e| format!("Failed to create logs directory: {}", e))?;

        let log_file = log_dir.join(format!("terrarium-{}.log", Local::now().format("%Y%m%d")));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .map_err(|e| format!("Failed to open log file {}: {}", log_file.display(), e))?;

        // Plain thread: must outlive the tokio runtime.
        let (tx, rx) = unbounded::<LogMessage>();
        std::thread::spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        let _ = file.write_all(line.as_bytes());
                    }
                    LogMessage::Flush(done) => {
                        let _ = file.flush();
                        let _ = done.send(());
                    }
                }
            }
        });

        Ok(LogCollector {
            tx,
            level,
            log_file,
            color: std::env::var_os("NO_COLOR").is_none(),
        })
    }

    /// Install as the global `log` backend.
    pub fn install(self) -> Result<LogHandle, String> {
        let handle = LogHandle {
            tx: self.tx.clone(),
            log_file: self.log_file.clone(),
        };
        let level = self.level;
        log::set_boxed_logger(Box::new(self))
            .map_err(|e| format!("Failed to install logger: {}", e))?;
        log::set_max_level(level);
        Ok(handle)
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    fn format_console(&self, record: &Record) -> String {
        let (label, color) = severity_label(record.level(), record.target());
        if self.color {
            format!("{}[{}]{} {}", color, label, RESET, record.args())
        } else {
            format!("[{}] {}", label, record.args())
        }
    }
}

/// Cloneable handle kept by `main` after the collector is installed.
#[derive(Clone)]
pub struct LogHandle {
    tx: Sender<LogMessage>,
    log_file: PathBuf,
}

impl LogHandle {
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Wait until every line sent so far has been written to disk.
    pub fn wait_for_empty(&self) -> Result<(), String> {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        rx.recv()
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }
}

impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let console = self.format_console(record);
        if record.level() <= Level::Warn {
            eprintln!("{}", console);
        } else {
            println!("{}", console);
        }

        let (label, _) = severity_label(record.level(), record.target());
        let line = format!(
            "[{}] [{}] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            label,
            record.args()
        );
        let _ = self.tx.send(LogMessage::Line(line));
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
    }
}
