//! Process management - spawning the tool and running package manager commands

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::OutputMode;
use crate::error::{E2eError, E2eResult};

/// A command line plus the directory it runs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Handle to a running child process
///
/// The child leads its own process group, so the pid doubles as the id of
/// the whole tree. Dropping a handle that was never terminated SIGKILLs the
/// group.
pub struct SpawnedProcess {
    child: Child,
    pid: u32,
    command: ExternalCommand,
    forwarder: Option<JoinHandle<()>>,
    released: bool,
}

impl SpawnedProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command(&self) -> &ExternalCommand {
        &self.command
    }

    /// Wait for the process to exit on its own
    pub async fn wait(&mut self) -> E2eResult<ExitStatus> {
        let status = self.child.wait().await?;
        self.finish_forwarding().await;
        self.released = true;
        Ok(status)
    }

    /// Reap the process if it has exited, without blocking
    pub fn try_wait(&mut self) -> E2eResult<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Mark the tree as gone so drop does not signal a recycled group id
    pub(crate) fn mark_released(&mut self) {
        self.released = true;
    }

    async fn finish_forwarding(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            let _ = forwarder.await;
        }
    }
}

impl Drop for SpawnedProcess {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(pid = self.pid, command = %self.command, "Killing abandoned process tree");

        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let _ = killpg(Pid::from_raw(self.pid as i32), Signal::SIGKILL);
        }

        let _ = self.child.start_kill();
    }
}

/// Spawns external commands
pub struct ProcessRunner;

impl ProcessRunner {
    /// Start a command and return its handle without waiting for it
    pub fn spawn(command: &ExternalCommand, output: OutputMode) -> E2eResult<SpawnedProcess> {
        info!("Spawning `{}` in {}", command, command.cwd.display());

        let mut std_cmd = std::process::Command::new(&command.program);
        std_cmd
            .args(&command.args)
            .current_dir(&command.cwd)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit());

        // New process group so the whole tree can be signalled at once
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }

        let mut cmd = Command::from(std_cmd);

        match output {
            OutputMode::Inherit => cmd.stdout(Stdio::inherit()),
            OutputMode::Log => cmd.stdout(Stdio::piped()),
            OutputMode::Null => cmd.stdout(Stdio::null()),
        };

        let mut child = cmd.spawn().map_err(|e| E2eError::Launch {
            command: command.to_string(),
            source: e,
        })?;

        let pid = child.id().ok_or_else(|| E2eError::Launch {
            command: command.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::Other,
                "process exited before its pid could be read",
            ),
        })?;

        let forwarder = child.stdout.take().map(|stdout| {
            let program = command.program.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "uwf_e2e::child", pid, "[{}] {}", program, line);
                }
            })
        });

        debug!(pid, "Spawned `{}`", command);

        Ok(SpawnedProcess {
            child,
            pid,
            command: command.clone(),
            forwarder,
            released: false,
        })
    }
}

/// Capability to run external commands, injected into the scenario runner
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion; a non-zero exit is an error
    async fn run(&self, command: &ExternalCommand) -> E2eResult<()>;

    /// Start a long-running command and hand back its handle
    fn spawn(&self, command: &ExternalCommand) -> E2eResult<SpawnedProcess>;
}

/// Runs commands as real child processes
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner {
    output: OutputMode,
}

impl SystemCommandRunner {
    pub fn new(output: OutputMode) -> Self {
        Self { output }
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, command: &ExternalCommand) -> E2eResult<()> {
        let mut process = ProcessRunner::spawn(command, self.output)?;
        let status = process.wait().await?;

        if !status.success() {
            return Err(E2eError::CommandFailed {
                command: command.to_string(),
                status,
            });
        }

        debug!("`{}` finished with {}", command, status);
        Ok(())
    }

    fn spawn(&self, command: &ExternalCommand) -> E2eResult<SpawnedProcess> {
        ProcessRunner::spawn(command, self.output)
    }
}
