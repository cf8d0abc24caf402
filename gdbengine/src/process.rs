/// Process management for GDB
///
/// This module starts the GDB process with its terminal and pipes,
/// and handles interrupting, killing and reaping it.

use std::os::fd::OwnedFd;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use crate::communication::TerminalWriter;
use crate::config::LaunchConfig;

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Invalid launch configuration: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("Failed to start GDB process {path}: {source}")]
    Spawn {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to set up GDB terminal: {0}")]
    Terminal(#[from] nix::Error),
    #[error("Failed to duplicate GDB terminal: {0}")]
    Io(#[from] std::io::Error),
    #[error("GDB process has no {0} pipe")]
    MissingPipe(&'static str),
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Process terminated unexpectedly")]
    Terminated,
    #[error("Signal error: {0}")]
    SignalError(#[from] nix::Error),
    #[error("Failed to stop GDB process: {0}")]
    KillError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProcessError>;

/// The engine's ends of GDB's standard streams
pub struct ProcessChannels {
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
    /// Read side of GDB's terminal, when it runs on a pseudo-terminal
    pub terminal: Option<tokio::fs::File>,
    pub writer: TerminalWriter,
}

/// Open GDB's input. With a pseudo-terminal, echo is disabled so command
/// text does not come back on the terminal channel.
fn open_input(use_pty: bool) -> std::result::Result<(OwnedFd, std::fs::File, Option<std::fs::File>), LaunchError> {
    if use_pty {
        use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg};

        let pty = nix::pty::openpty(None, None)?;
        let mut termios = tcgetattr(&pty.slave)?;
        termios.local_flags.remove(LocalFlags::ECHO);
        tcsetattr(&pty.slave, SetArg::TCSANOW, &termios)?;

        let master = std::fs::File::from(pty.master);
        let reader = master.try_clone()?;
        Ok((pty.slave, master, Some(reader)))
    } else {
        let (read_end, write_end) = nix::unistd::pipe()?;
        Ok((read_end, std::fs::File::from(write_end), None))
    }
}

pub struct GdbProcess {
    child: Child,
}

impl GdbProcess {
    /// Start GDB as described by `config`
    pub fn launch(config: &LaunchConfig) -> std::result::Result<(Self, ProcessChannels), LaunchError> {
        config.validate()?;
        let args = config.command_line();
        log::debug!("Starting GDB process: {} {}", config.gdb_path, args.join(" "));

        let (child_input, writer, terminal) = open_input(config.use_pty)?;

        let mut child = Command::new(&config.gdb_path)
            .args(&args)
            .stdin(Stdio::from(child_input))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                path: config.gdb_path.clone(),
                source,
            })?;

        log::debug!("GDB process started with PID: {:?}", child.id());

        let stdout = child.stdout.take().ok_or(LaunchError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(LaunchError::MissingPipe("stderr"))?;

        let channels = ProcessChannels {
            stdout,
            stderr,
            terminal: terminal.map(tokio::fs::File::from_std),
            writer: TerminalWriter::new(writer),
        };
        Ok((GdbProcess { child }, channels))
    }

    /// Get the process ID
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Send SIGINT to GDB, which interrupts the running inferior
    pub fn interrupt(&self) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = self.id().ok_or(ProcessError::Terminated)?;
        let pid = i32::try_from(pid).map_err(|_| ProcessError::Terminated)?;
        log::debug!("Sending interrupt to GDB PID: {}", pid);
        kill(Pid::from_raw(pid), Signal::SIGINT).map_err(|e| {
            log::error!("Failed to send SIGINT to PID {}: {}", pid, e);
            ProcessError::SignalError(e)
        })
    }

    /// Ask the OS to kill GDB without waiting for it
    pub fn start_kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            log::debug!("GDB kill: {}", e);
        }
    }

    /// Kill GDB and wait for it to exit
    pub async fn kill(&mut self) -> Result<()> {
        match self.child.kill().await {
            Ok(()) => Ok(()),
            // already reaped
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(ProcessError::KillError(e)),
        }
    }

    /// Reap GDB if it has exited, returning its exit code
    pub fn try_reap(&mut self) -> Result<Option<i32>> {
        let status = self.child.try_wait()?;
        Ok(status.and_then(|s| s.code()))
    }
}
