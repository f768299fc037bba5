//! Spawning and killing the guarded command.
//!
//! The command runs in its own process group so that termination reaches
//! everything it forked, not just the immediate child. Its stdio is
//! inherited untouched.

use crate::util::{exit_code, signal_group};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Interpreter used in shell mode
pub const SHELL: &str = "/bin/sh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// `/bin/sh -c <command>`
    Shell,
    /// exec the argv directly
    Direct,
}

/// What to run, and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    Shell(String),
    Direct(Vec<String>),
}

impl CommandSpec {
    pub fn shell(command: impl Into<String>) -> Self {
        CommandSpec::Shell(command.into())
    }

    /// Direct-mode command from an argv. The argv must not be empty.
    pub fn direct(argv: Vec<String>) -> Result<Self> {
        if argv.is_empty() || argv[0].is_empty() {
            return Err(Error::Configuration("command is empty".to_string()));
        }
        Ok(CommandSpec::Direct(argv))
    }

    /// Direct-mode command from a line, split with shell quoting rules
    pub fn parse_direct(line: &str) -> Result<Self> {
        let argv = shlex::split(line)
            .ok_or_else(|| Error::Configuration(format!("cannot split command {:?}", line)))?;
        Self::direct(argv)
    }

    pub fn mode(&self) -> ExecMode {
        match self {
            CommandSpec::Shell(_) => ExecMode::Shell,
            CommandSpec::Direct(_) => ExecMode::Direct,
        }
    }

    /// Byte form that identifies the command independent of how it was spelled
    pub fn canonical(&self) -> Vec<u8> {
        match self {
            CommandSpec::Shell(line) => {
                let mut out = b"sh\0".to_vec();
                out.extend_from_slice(line.as_bytes());
                out
            }
            CommandSpec::Direct(argv) => argv.join("\0").into_bytes(),
        }
    }

    fn to_command(&self) -> Command {
        match self {
            CommandSpec::Shell(line) => {
                let mut cmd = Command::new(SHELL);
                cmd.arg("-c").arg(line);
                cmd
            }
            CommandSpec::Direct(argv) => {
                let mut cmd = Command::new(&argv[0]);
                cmd.args(&argv[1..]);
                cmd
            }
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSpec::Shell(line) => f.write_str(line),
            CommandSpec::Direct(argv) => {
                match shlex::try_join(argv.iter().map(String::as_str)) {
                    Ok(joined) => f.write_str(&joined),
                    Err(_) => f.write_str(&argv.join(" ")),
                }
            }
        }
    }
}

/// Why the guarded process is no longer running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    NormalExit,
    KilledLeaseLost,
    KilledShutdown,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TerminationReason::NormalExit => "normal-exit",
            TerminationReason::KilledLeaseLost => "killed-lease-lost",
            TerminationReason::KilledShutdown => "killed-shutdown",
        })
    }
}

/// A running instance of the guarded command
#[derive(Debug)]
pub struct GuardedProcess {
    child: Child,
    pid: u32,
    command: String,
    mode: ExecMode,
    started_at: DateTime<Utc>,
}

impl GuardedProcess {
    /// Launch `spec` in a new process group
    pub fn start(spec: &CommandSpec) -> Result<Self> {
        let command = spec.to_string();
        let mut cmd = spec.to_command();
        cmd.process_group(0).kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| Error::Spawn {
            command: command.clone(),
            source,
        })?;
        let pid = child.id().ok_or_else(|| Error::Spawn {
            command: command.clone(),
            source: std::io::Error::other("child exited before its pid was read"),
        })?;

        info!("Spawned PID {} ({:?} mode): {}", pid, spec.mode(), command);
        Ok(Self {
            child,
            pid,
            command,
            mode: spec.mode(),
            started_at: Utc::now(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    /// Wait for the process to exit on its own. Cancel safe.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Stop the whole process group: SIGTERM, then SIGKILL once `grace` runs out.
    pub async fn terminate(&mut self, grace: Duration) -> Result<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            self.sweep();
            return Ok(status);
        }

        info!("Sending TERM to process group {}", self.pid);
        signal_group(self.pid, libc::SIGTERM)?;

        let status = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                info!("Sending KILL to process group {}", self.pid);
                signal_group(self.pid, libc::SIGKILL)?;
                self.child.wait().await?
            }
        };

        // The leader may have exited on TERM while children ignored it
        self.sweep();
        Ok(status)
    }

    /// SIGKILL whatever is left in the group after the leader exited
    pub fn sweep(&self) {
        match signal_group(self.pid, libc::SIGKILL) {
            Ok(true) => debug!("Killed leftover processes in group {}", self.pid),
            Ok(false) => {}
            Err(e) => warn!("Could not sweep process group {}: {}", self.pid, e),
        }
    }

    pub fn runtime(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }

    /// Exit code the tool reports for `status`
    pub fn exit_code(status: ExitStatus) -> i32 {
        exit_code(status)
    }
}
