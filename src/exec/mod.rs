/*
 * pacweave - Layered AUR build and install orchestrator.
 * Copyright (C) 2025  pacweave contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! External command construction and execution.
//!
//! The pipeline never spawns processes directly. It asks a [`CmdBuilder`]
//! for a [`Cmd`] and hands it to a [`CommandRunner`], so every stage can be
//! exercised against a recording runner in tests.

mod args;
mod builder;
#[cfg(test)]
pub mod mock;

pub use args::PacmanArgs;
pub use builder::CmdBuilder;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::error::{PacweaveError, PacweaveResult};

/// An argument vector with its working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
        }
    }

    #[cfg(test)]
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Check whether `arg` is one of the arguments
    #[cfg(test)]
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Buffered output of a captured command
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
}

/// Capability to execute commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command with its output streamed to the terminal
    async fn run(&self, cmd: &Cmd, cancel: &CancellationToken) -> PacweaveResult<()>;

    /// Run a command and buffer its output
    async fn capture(&self, cmd: &Cmd, cancel: &CancellationToken) -> PacweaveResult<Captured>;
}

/// Runs commands as child processes.
///
/// When the cancellation token fires the child gets SIGTERM and is waited
/// for, so pacman can finish or roll back its transaction and release the
/// database lock before the run reports cancellation.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(cmd: &Cmd) -> Command {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        if let Some(dir) = &cmd.dir {
            command.current_dir(dir);
        }
        command
    }

    /// Wait for `child`, terminating it when `cancel` fires
    async fn wait(
        cmd: &Cmd,
        child: &mut Child,
        cancel: &CancellationToken,
    ) -> PacweaveResult<ExitStatus> {
        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        match status {
            Some(status) => status.map_err(|e| Self::spawn_error(cmd, e)),
            None => {
                if let Some(pid) = child.id() {
                    tracing::debug!("sending SIGTERM to {} ({})", cmd.program, pid);
                    unsafe {
                        libc::kill(pid as libc::pid_t, libc::SIGTERM);
                    }
                }
                if let Err(e) = child.wait().await {
                    tracing::warn!("failed to wait for {}: {}", cmd.program, e);
                }
                Err(PacweaveError::Cancelled)
            }
        }
    }

    fn spawn_error(cmd: &Cmd, source: std::io::Error) -> PacweaveError {
        PacweaveError::Spawn {
            program: cmd.program.clone(),
            source,
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, cmd: &Cmd, cancel: &CancellationToken) -> PacweaveResult<()> {
        if cancel.is_cancelled() {
            return Err(PacweaveError::Cancelled);
        }
        tracing::debug!("running {}", cmd);

        let mut child = Self::command(cmd)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Self::spawn_error(cmd, e))?;

        let status = Self::wait(cmd, &mut child, cancel).await?;

        if !status.success() {
            return Err(PacweaveError::CommandFailed {
                command: cmd.to_string(),
                code: status.code(),
                stderr: String::new(),
            });
        }
        Ok(())
    }

    async fn capture(&self, cmd: &Cmd, cancel: &CancellationToken) -> PacweaveResult<Captured> {
        if cancel.is_cancelled() {
            return Err(PacweaveError::Cancelled);
        }
        tracing::debug!("capturing {}", cmd);

        let mut child = Self::command(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Self::spawn_error(cmd, e))?;

        // Drain both pipes while waiting so a chatty child cannot block
        let stdout = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr = tokio::spawn(read_pipe(child.stderr.take()));

        let status = Self::wait(cmd, &mut child, cancel).await?;

        let captured = Captured {
            stdout: stdout.await.unwrap_or_default().trim().to_string(),
            stderr: stderr.await.unwrap_or_default().trim().to_string(),
        };

        if !status.success() {
            return Err(PacweaveError::CommandFailed {
                command: cmd.to_string(),
                code: status.code(),
                stderr: captured.stderr,
            });
        }
        Ok(captured)
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            tracing::debug!("failed to read child output: {}", e);
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
