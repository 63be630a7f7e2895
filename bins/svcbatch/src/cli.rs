use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use svcbatch_service::{FailMode, RotateTime, ServiceConfig, ServiceOptions};

/// Run a batch script as a background service
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable the custom break control
    #[arg(short = 'b')]
    pub enable_break: bool,

    /// Build a clean PATH for the script
    #[arg(short = 'c')]
    pub clean_path: bool,

    /// Only pass system variables to the script
    #[arg(short = 's')]
    pub allow_list: bool,

    /// Use the batch file's directory as the working directory
    #[arg(short = 'w')]
    pub batch_dir_as_work: bool,

    /// Options file (YAML)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Service name when running in the foreground
    #[arg(long)]
    pub name: Option<String>,

    /// Log file path
    #[arg(long, value_name = "PATH")]
    pub log: Option<PathBuf>,

    /// Number of previous log generations to keep (0-9)
    #[arg(long, value_name = "N")]
    pub max_logs: Option<u32>,

    /// How a child failing on its own is reported: none, error or exit
    #[arg(long, value_name = "MODE")]
    pub fail_mode: Option<FailMode>,

    /// Timestamp the log in local time
    #[arg(long)]
    pub local_time: bool,

    /// Rotate the log at 0 (midnight), hh:mm:ss or every <N>m minutes
    #[arg(long, value_name = "TIME")]
    pub rotate_time: Option<RotateTime>,

    /// Script run before the child is interrupted on stop
    #[arg(long, value_name = "FILE")]
    pub stop_script: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// [workingDirOverride] <batchFile>
    #[arg(required = true, value_name = "PATH")]
    pub paths: Vec<PathBuf>,
}

impl Args {
    pub fn batch_file(&self) -> Result<&PathBuf> {
        if self.paths.len() > 2 {
            bail!("Expected [workingDirOverride] <batchFile>, got {} paths", self.paths.len());
        }
        self.paths
            .last()
            .ok_or_else(|| anyhow!("Missing batch file argument"))
    }

    pub fn work_dir(&self) -> Option<&PathBuf> {
        if self.paths.len() == 2 {
            self.paths.first()
        } else {
            None
        }
    }

    /// Service name used when no service manager supplies one.
    pub fn default_name(&self) -> Result<String> {
        if let Some(name) = &self.name {
            return Ok(name.clone());
        }
        let batch = self.batch_file()?;
        batch
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("Cannot derive a service name from {}", batch.display()))
    }

    /// Options file merged with the command line; flags win.
    pub fn options(&self) -> Result<ServiceOptions> {
        let mut options = match &self.config {
            Some(path) => ServiceOptions::load_from_file(path)?,
            None => ServiceOptions::default(),
        };

        options.enable_break |= self.enable_break;
        options.clean_path |= self.clean_path;
        options.allow_list |= self.allow_list;
        options.batch_dir_as_work |= self.batch_dir_as_work;
        options.local_time |= self.local_time;
        if let Some(log) = &self.log {
            options.log_path = Some(log.clone());
        }
        if let Some(max_logs) = self.max_logs {
            options.max_logs = max_logs;
        }
        if let Some(fail_mode) = self.fail_mode {
            options.fail_mode = fail_mode;
        }
        if let Some(rotate_time) = self.rotate_time {
            options.rotate_time = Some(rotate_time);
        }
        if let Some(script) = &self.stop_script {
            options.stop_script = Some(script.clone());
        }

        options.validate()?;
        Ok(options)
    }

    pub fn service_config(&self, service_name: &str) -> Result<ServiceConfig> {
        if self.batch_dir_as_work && self.work_dir().is_some() {
            bail!("-w cannot be combined with a working directory argument");
        }
        let options = self.options()?;
        let config = ServiceConfig::resolve(
            service_name,
            self.batch_file()?,
            self.work_dir().map(PathBuf::as_path),
            options,
        )
        .with_context(|| format!("Failed to configure service {}", service_name))?;
        Ok(config)
    }
}

/// Exit code for an error that ends the process before the service starts.
pub fn error_code(error: &anyhow::Error) -> u32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<svcbatch_common::Error>())
        .map(svcbatch_common::Error::os_code)
        .unwrap_or(svcbatch_common::codes::ERROR_INVALID_PARAMETER)
}
