//! Rotating service log.
//!
//! One primary file is active at a time. Older generations are kept next to
//! it as `<path>.0` (the file replaced most recently) up to `<path>.9`
//! (the oldest). All access goes through [`LogGuard`], which holds the log
//! lock for as long as it lives.

use crate::thread::current_thread_id;
use crate::{PROGRAM_NAME, PROGRAM_VERSION};
use chrono::{Local, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use svcbatch_common::{Error, Result, ResultExt};
use tracing::{debug, warn};

/// Highest numbered generation kept on disk.
pub const MAX_LOGS: u32 = 9;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Log file placement and retention.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Primary log file.
    pub path: PathBuf,
    /// Number of numbered generations to keep, at most [`MAX_LOGS`].
    pub max_logs: u32,
    /// Stamp open/close lines with local time instead of UTC.
    pub local_time: bool,
}

impl LogConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_logs: MAX_LOGS,
            local_time: false,
        }
    }

    /// `<work_dir>/Logs/<service_name>.log`
    pub fn default_path(work_dir: &Path, service_name: &str) -> PathBuf {
        work_dir.join("Logs").join(format!("{}.log", service_name))
    }
}

struct LogFile {
    file: File,
    opened_at: Instant,
    written: u64,
    /// Child output appended to this generation.
    output: u64,
}

impl LogFile {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.file
            .write_all(bytes)
            .op(|| "write log file".to_string())?;
        self.written += bytes.len() as u64;
        Ok(())
    }
}

#[derive(Default)]
struct LogState {
    file: Option<LogFile>,
    generation: u32,
    banner: Vec<(String, String)>,
}

/// Owner of the active log file.
pub struct LogManager {
    config: LogConfig,
    state: Mutex<LogState>,
}

impl LogManager {
    pub fn new(config: LogConfig) -> Self {
        let config = LogConfig {
            max_logs: config.max_logs.min(MAX_LOGS),
            ..config
        };
        Self {
            config,
            state: Mutex::new(LogState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Acquire the log lock.
    pub fn lock(&self) -> LogGuard<'_> {
        LogGuard {
            config: &self.config,
            state: self.state.lock(),
        }
    }

    /// Configuration block repeated at the top of every generation.
    pub fn set_banner(&self, entries: Vec<(String, String)>) {
        self.state.lock().banner = entries;
    }

    /// Open the primary file at service startup.
    ///
    /// An existing primary from a previous run becomes `<path>.0`, shifting
    /// older generations up by one.
    pub fn open(&self) -> Result<()> {
        self.lock().open(true)
    }

    /// Close the primary file and start a new generation.
    pub fn rotate(&self) -> Result<()> {
        self.lock().rotate()
    }

    /// Rotate only if the log is open and the child wrote something since the
    /// last rotation.
    ///
    /// Returns whether a new generation was started.
    pub fn rotate_if_written(&self) -> Result<bool> {
        let mut guard = self.lock();
        if matches!(guard.output_size(), None | Some(0)) {
            return Ok(false);
        }
        guard.rotate()?;
        Ok(true)
    }

    /// Flush, write the closing line and release the file.
    pub fn close(&self) -> Result<()> {
        self.lock().close()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().file.is_some()
    }

    /// Number of rotations since startup.
    pub fn generation(&self) -> u32 {
        self.state.lock().generation
    }

    /// Best-effort status line.
    pub fn write_line(&self, text: &str) {
        report(self.lock().write_line(text));
    }

    /// Best-effort flush followed by a status line.
    pub fn flush_and_write(&self, text: &str) {
        let mut guard = self.lock();
        report(guard.flush().and_then(|_| guard.write_line(text)));
    }
}

fn report(result: Result<()>) {
    match result {
        Ok(()) => {}
        Err(Error::LogClosed) => debug!("Dropped log line: log is closed"),
        Err(e) => warn!("Failed to write log: {}", e),
    }
}

/// Exclusive access to the log for the lifetime of the guard.
pub struct LogGuard<'a> {
    config: &'a LogConfig,
    state: MutexGuard<'a, LogState>,
}

impl LogGuard<'_> {
    pub fn is_open(&self) -> bool {
        self.state.file.is_some()
    }

    /// Bytes written to the current generation.
    pub fn size(&self) -> Option<u64> {
        self.state.file.as_ref().map(|f| f.written)
    }

    /// Child output bytes in the current generation.
    pub fn output_size(&self) -> Option<u64> {
        self.state.file.as_ref().map(|f| f.output)
    }

    pub fn generation(&self) -> u32 {
        self.state.generation
    }

    /// Append raw child output at the end of the file.
    pub fn append_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let log = self.file()?;
        log.write(bytes)?;
        log.output += bytes.len() as u64;
        Ok(())
    }

    /// Write a `[DD:HH:MM:SS.mmm] [pid:tid] text` status line.
    pub fn write_line(&mut self, text: &str) -> Result<()> {
        let log = self.file()?;
        let line = format_line(
            log.opened_at.elapsed(),
            std::process::id(),
            current_thread_id(),
            text,
        );
        log.write(line.as_bytes())?;
        debug!("{}", text);
        Ok(())
    }

    /// Push buffered data to disk and separate what follows with a blank line.
    pub fn flush(&mut self) -> Result<()> {
        let log = self.file()?;
        log.write(b"\r\n")?;
        log.file.sync_data().op(|| "flush log file".to_string())
    }

    /// Write the configuration block.
    pub fn write_banner(&mut self) -> Result<()> {
        let banner = self.state.banner.clone();
        for (name, value) in banner {
            self.write_line(&format!("{:<16} : {}", name, value))?;
        }
        Ok(())
    }

    fn file(&mut self) -> Result<&mut LogFile> {
        self.state.file.as_mut().ok_or(Error::LogClosed)
    }

    fn open(&mut self, startup: bool) -> Result<()> {
        let config = self.config;
        let path = config.path.as_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .op(|| format!("create log directory {}", parent.display()))?;
        }

        if path.exists() {
            if startup {
                shift_generations(path, config.max_logs)?;
            }
            let previous = generation_path(path, 0);
            fs::rename(path, &previous)
                .op(|| format!("rename {} to {}", path.display(), previous.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .op(|| format!("open log file {}", path.display()))?;

        self.state.file = Some(LogFile {
            file,
            opened_at: Instant::now(),
            written: 0,
            output: 0,
        });

        self.write_line(&format!(
            "{} {} ({}-{}, {})",
            PROGRAM_NAME,
            PROGRAM_VERSION,
            std::env::consts::ARCH,
            std::env::consts::OS,
            if cfg!(debug_assertions) { "debug" } else { "release" }
        ))?;
        let opened = format!("Log opened {}", self.timestamp());
        self.write_line(&opened)
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(log) = self.state.file.take() {
            let _ = log.file.sync_data();
        }

        shift_generations(&self.config.path, self.config.max_logs)?;
        self.open(false)?;

        self.state.generation += 1;
        let generation = format!("Log generation {}", self.state.generation);
        self.write_line(&generation)?;
        self.write_banner()
    }

    fn close(&mut self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        let result = self.flush().and_then(|_| {
            let closed = format!("Log closed {}", self.timestamp());
            self.write_line(&closed)
        });
        if let Some(log) = self.state.file.take() {
            let _ = log.file.sync_all();
        }
        result
    }

    fn timestamp(&self) -> String {
        if self.config.local_time {
            Local::now().format(TIMESTAMP_FORMAT).to_string()
        } else {
            Utc::now().format(TIMESTAMP_FORMAT).to_string()
        }
    }
}

/// `<path>.<generation>`
pub fn generation_path(path: &Path, generation: u32) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{}", generation));
    PathBuf::from(name)
}

/// Move every `<path>.<k-1>` to `<path>.<k>`, oldest first, for k = max..1.
fn shift_generations(path: &Path, max_logs: u32) -> Result<()> {
    for k in (1..=max_logs).rev() {
        let from = generation_path(path, k - 1);
        if from.exists() {
            let to = generation_path(path, k);
            fs::rename(&from, &to)
                .op(|| format!("rename {} to {}", from.display(), to.display()))?;
        }
    }
    Ok(())
}

fn format_line(elapsed: Duration, pid: u32, tid: u32, text: &str) -> String {
    let millis = elapsed.as_millis();
    let secs = millis / 1000;
    format!(
        "[{:02}:{:02}:{:02}:{:02}.{:03}] [{:04}:{:04}] {}\r\n",
        secs / 86_400,
        (secs / 3_600) % 24,
        (secs / 60) % 60,
        secs % 60,
        millis % 1000,
        pid,
        tid,
        text
    )
}
