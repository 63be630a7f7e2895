//! Service configuration.
//!
//! [`ServiceOptions`] holds the tunables and can be loaded from YAML;
//! [`ServiceConfig`] is the fully resolved set of paths and names a service
//! run works with.

mod validation;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use svcbatch_common::codes::ERROR_BAD_ENVIRONMENT;
use svcbatch_common::{Error, ResultExt};
use svcbatch_log::{LogConfig, RotateTime, MAX_LOGS};

/// How a child that ends without a stop request is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Report a clean stop whatever the exit code.
    None,
    /// Report the child's exit code as the service error.
    #[default]
    Error,
    /// Exit the wrapper process with the error so recovery actions run.
    Exit,
}

impl std::str::FromStr for FailMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(FailMode::None),
            "error" => Ok(FailMode::Error),
            "exit" => Ok(FailMode::Exit),
            _ => Err(format!("Invalid fail mode: {}, must be one of: none, error, exit", s)),
        }
    }
}

/// Waits and hints used while starting and stopping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    /// Wait after the interrupt before answering the batch prompt.
    #[serde(default = "default_pending_interval", with = "duration_serde")]
    pub pending_interval: Duration,

    #[serde(default = "default_start_hint", with = "duration_serde")]
    pub start_hint: Duration,

    /// Wait after the prompt answer before terminating the process tree.
    #[serde(default = "default_stop_hint", with = "duration_serde")]
    pub stop_hint: Duration,

    /// Upper bound for a stop sequence still running at teardown.
    #[serde(default = "default_stop_timeout", with = "duration_serde")]
    pub stop_timeout: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            pending_interval: default_pending_interval(),
            start_hint: default_start_hint(),
            stop_hint: default_stop_hint(),
            stop_timeout: default_stop_timeout(),
        }
    }
}

/// Tunables of a service run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOptions {
    /// Accept the custom break control and forward it to the child.
    #[serde(default)]
    pub enable_break: bool,

    /// Build `PATH` from scratch instead of inheriting it.
    #[serde(default)]
    pub clean_path: bool,

    /// Only pass a fixed set of system variables to the child.
    #[serde(default)]
    pub allow_list: bool,

    /// Run the script from its own directory.
    #[serde(default)]
    pub batch_dir_as_work: bool,

    #[serde(default)]
    pub fail_mode: FailMode,

    #[serde(default)]
    pub accept_preshutdown: bool,

    #[serde(default)]
    pub local_time: bool,

    /// Log file; relative paths are taken from the working directory.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    #[serde(default = "default_max_logs")]
    pub max_logs: u32,

    /// Rotate once the primary log grows past this many bytes.
    #[serde(default)]
    pub rotate_size: Option<u64>,

    /// Rotate at `0` (midnight), `hh:mm:ss` or every `<N>m` minutes.
    #[serde(default, with = "rotate_time_serde")]
    pub rotate_time: Option<RotateTime>,

    /// Deepest level of descendants visited when killing the child's tree.
    #[serde(default)]
    pub kill_depth: Option<usize>,

    /// Written to the child's stdin when it ignores the interrupt.
    #[serde(default = "default_stdin_ack")]
    pub stdin_ack: String,

    /// Interpreter override; defaults to `%COMSPEC%` or `/bin/sh`.
    #[serde(default)]
    pub shell: Option<PathBuf>,

    /// Script run by the same interpreter before the child is interrupted.
    #[serde(default)]
    pub stop_script: Option<PathBuf>,

    #[serde(default)]
    pub timeouts: Timeouts,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            enable_break: false,
            clean_path: false,
            allow_list: false,
            batch_dir_as_work: false,
            fail_mode: FailMode::default(),
            accept_preshutdown: false,
            local_time: false,
            log_path: None,
            max_logs: default_max_logs(),
            rotate_size: None,
            rotate_time: None,
            kill_depth: None,
            stdin_ack: default_stdin_ack(),
            shell: None,
            stop_script: None,
            timeouts: Timeouts::default(),
        }
    }
}

impl ServiceOptions {
    /// Load options from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::load_from_string(&content)
    }

    /// Load options from a YAML string
    pub fn load_from_string(content: &str) -> Result<Self> {
        let options: ServiceOptions =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;

        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        validation::validate_options(self)
    }
}

/// Resolved identity and paths of one service run.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service_name: String,
    /// This executable.
    pub exe_path: PathBuf,
    /// Directory holding this executable.
    pub base_dir: PathBuf,
    pub work_dir: PathBuf,
    pub batch_file: PathBuf,
    pub stop_script: Option<PathBuf>,
    pub interpreter: PathBuf,
    pub log_path: PathBuf,
    pub options: ServiceOptions,
}

impl ServiceConfig {
    /// Resolve absolute paths for the executable, the script and the working
    /// directory.
    ///
    /// Relative paths are taken from the executable's directory; services
    /// start with an arbitrary current directory.
    pub fn resolve(
        service_name: &str,
        batch_file: &Path,
        work_dir: Option<&Path>,
        options: ServiceOptions,
    ) -> svcbatch_common::Result<Self> {
        if service_name.is_empty() {
            return Err(Error::validation("Service name cannot be empty"));
        }

        let exe_path = std::env::current_exe()
            .and_then(|p| p.canonicalize())
            .op(|| "resolve executable path".to_string())?;
        let exe_path = simplify(exe_path);
        let base_dir = exe_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::validation("Executable has no parent directory"))?;

        let batch_file = canonical(&base_dir, batch_file, "batch file")?;
        let stop_script = options
            .stop_script
            .as_deref()
            .map(|script| canonical(&base_dir, script, "stop script"))
            .transpose()?;

        let work_dir = match work_dir {
            Some(dir) => canonical(&base_dir, dir, "working directory")?,
            None if options.batch_dir_as_work => batch_file
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| Error::validation("Batch file has no parent directory"))?,
            None => base_dir.clone(),
        };
        if !work_dir.is_dir() {
            return Err(Error::validation(format!(
                "Working directory is not a directory: {}",
                work_dir.display()
            )));
        }

        let interpreter = match &options.shell {
            Some(shell) => shell.clone(),
            None => default_interpreter()?,
        };

        let log_path = match &options.log_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => work_dir.join(path),
            None => LogConfig::default_path(&work_dir, service_name),
        };

        Ok(Self {
            service_name: service_name.to_string(),
            exe_path,
            base_dir,
            work_dir,
            batch_file,
            stop_script,
            interpreter,
            log_path,
            options,
        })
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            path: self.log_path.clone(),
            max_logs: self.options.max_logs.min(MAX_LOGS),
            local_time: self.options.local_time,
        }
    }
}

#[cfg(windows)]
fn default_interpreter() -> svcbatch_common::Result<PathBuf> {
    std::env::var_os("COMSPEC")
        .map(PathBuf::from)
        .ok_or_else(|| Error::service_manager(ERROR_BAD_ENVIRONMENT, "COMSPEC is not set"))
}

#[cfg(not(windows))]
fn default_interpreter() -> svcbatch_common::Result<PathBuf> {
    let shell = PathBuf::from("/bin/sh");
    if shell.exists() {
        Ok(shell)
    } else {
        Err(Error::service_manager(ERROR_BAD_ENVIRONMENT, "/bin/sh is missing"))
    }
}

fn canonical(base: &Path, path: &Path, what: &str) -> svcbatch_common::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    joined
        .canonicalize()
        .map(simplify)
        .op(|| format!("resolve {} {}", what, joined.display()))
}

/// Drop the `\\?\` prefix `canonicalize` adds on Windows; `cmd.exe` cannot
/// run scripts from verbatim paths.
fn simplify(path: PathBuf) -> PathBuf {
    #[cfg(windows)]
    {
        let text = path.to_string_lossy();
        if let Some(rest) = text.strip_prefix(r"\\?\") {
            if !rest.starts_with("UNC\\") {
                return PathBuf::from(rest.to_string());
            }
        }
    }
    path
}

// Default value functions
fn default_pending_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_start_hint() -> Duration {
    Duration::from_secs(5)
}

fn default_stop_hint() -> Duration {
    Duration::from_secs(20)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_logs() -> u32 {
    MAX_LOGS
}

fn default_stdin_ack() -> String {
    if cfg!(windows) {
        "Y\r\n".to_string()
    } else {
        "Y\n".to_string()
    }
}

// Durations are written as "500ms", "5s" or "1m"
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        // "ms" before "s", since "ms" ends with 's'
        let (number, scale) = if let Some(n) = s.strip_suffix("ms") {
            (n, 1)
        } else if let Some(n) = s.strip_suffix('s') {
            (n, 1000)
        } else if let Some(n) = s.strip_suffix('m') {
            (n, 60_000)
        } else {
            return Err(format!("Duration must end with 's', 'ms', or 'm': {}", s));
        };
        let value: u64 = number
            .trim()
            .parse()
            .map_err(|_| format!("Invalid duration: {}", s))?;
        Ok(Duration::from_millis(value * scale))
    }
}

mod rotate_time_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use svcbatch_log::RotateTime;

    pub fn serialize<S>(value: &Option<RotateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(time) => serializer.serialize_some(&time.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<RotateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        // YAML reads a bare `0` as a number
        let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
        let text = match value {
            None | Some(serde_yaml::Value::Null) => return Ok(None),
            Some(serde_yaml::Value::String(s)) => s,
            Some(serde_yaml::Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(serde::de::Error::custom(format!(
                    "Invalid rotate time: {:?}",
                    other
                )))
            }
        };
        text.parse().map(Some).map_err(serde::de::Error::custom)
    }
}
