//! Child interpreter command construction and spawning.

use std::borrow::Cow;
use std::ffi::OsString;
use std::io::PipeReader;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use svcbatch_common::{Error, Result, ResultExt};
use tracing::debug;

/// Flags telling `cmd.exe` to run one script and exit: no AutoRun,
/// command extensions on, delayed expansion off.
pub const BATCH_FLAGS: &str = "/D /E:ON /V:OFF /C";

/// Quote `arg` when it contains whitespace and is not quoted already.
pub fn quote_if_needed(arg: &str) -> Cow<'_, str> {
    let quoted = arg.len() >= 2 && arg.starts_with('"') && arg.ends_with('"');
    if !quoted && arg.chars().any(char::is_whitespace) {
        Cow::Owned(format!("\"{}\"", arg))
    } else {
        Cow::Borrowed(arg)
    }
}

/// Arguments passed to `cmd.exe` after the program name.
///
/// The whole script invocation becomes one quoted argument to `/C`.
pub fn batch_arguments(script: &str) -> String {
    format!("{} \"{}\"", BATCH_FLAGS, quote_if_needed(script))
}

/// Full Windows command line for running `script` under `interpreter`.
pub fn command_line(interpreter: &str, script: &str) -> String {
    format!("{} {}", quote_if_needed(interpreter), batch_arguments(script))
}

/// Everything needed to start the supervised child.
#[derive(Debug, Clone)]
pub struct ChildSpec {
    pub interpreter: PathBuf,
    pub script: PathBuf,
    pub work_dir: PathBuf,
    /// Complete environment; nothing is inherited beyond it.
    pub env: Vec<(OsString, OsString)>,
    /// Start the child as the leader of a new process group (Windows).
    pub new_group: bool,
}

/// A freshly spawned child with its redirected streams.
#[derive(Debug)]
pub struct SpawnedChild {
    pub child: Child,
    /// Read end of the combined stdout/stderr pipe.
    pub output: PipeReader,
    /// Write end of the child's stdin.
    pub stdin: ChildStdin,
}

impl ChildSpec {
    /// Command line as the platform will see it, for the log banner.
    pub fn command_line(&self) -> String {
        let interpreter = self.interpreter.to_string_lossy();
        let script = self.script.to_string_lossy();
        if cfg!(windows) {
            command_line(&interpreter, &script)
        } else {
            format!("{} {}", quote_if_needed(&interpreter), quote_if_needed(&script))
        }
    }

    /// Spawn the child with stdout and stderr sharing one pipe.
    ///
    /// The write end of the output pipe and the read end of stdin only live
    /// in the child once this returns.
    pub fn spawn(&self) -> Result<SpawnedChild> {
        let (output, writer) = std::io::pipe().op(|| "create output pipe".to_string())?;
        let stderr = writer
            .try_clone()
            .op(|| "duplicate output pipe".to_string())?;

        let mut command = self.command();
        command
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .current_dir(&self.work_dir)
            .stdin(Stdio::piped())
            .stdout(writer)
            .stderr(stderr);

        let mut child = command
            .spawn()
            .map_err(|e| Error::spawn(self.interpreter.display().to_string(), e))?;
        // Release our copies of the child's pipe ends
        drop(command);

        let stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::internal("child stdin was not captured"));
            }
        };

        debug!(pid = child.id(), "Spawned {}", self.command_line());
        Ok(SpawnedChild { child, output, stdin })
    }

    #[cfg(unix)]
    fn command(&self) -> Command {
        use std::os::unix::process::CommandExt;

        let mut command = Command::new(&self.interpreter);
        command.arg(&self.script).process_group(0);
        restore_default_signals(&mut command);
        command
    }

    #[cfg(windows)]
    fn command(&self) -> Command {
        use std::os::windows::process::CommandExt;

        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

        let mut command = Command::new(&self.interpreter);
        command.raw_arg(batch_arguments(&self.script.to_string_lossy()));
        if self.new_group {
            command.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }
        command
    }
}

/// Undo inherited ignore dispositions for the signals used to stop the child.
#[cfg(unix)]
pub(crate) fn restore_default_signals(command: &mut Command) {
    use nix::sys::signal::{signal, SigHandler, Signal};
    use std::os::unix::process::CommandExt;

    unsafe {
        command.pre_exec(|| {
            for sig in [Signal::SIGINT, Signal::SIGQUIT] {
                signal(sig, SigHandler::SigDfl).map_err(std::io::Error::from)?;
            }
            Ok(())
        });
    }
}
