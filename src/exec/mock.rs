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

//! Recording command runner for tests.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{Captured, Cmd, CommandRunner};
use crate::error::{PacweaveError, PacweaveResult};

type RunFn = Box<dyn Fn(&Cmd) -> PacweaveResult<()> + Send + Sync>;
type CaptureFn = Box<dyn Fn(&Cmd) -> PacweaveResult<Captured> + Send + Sync>;

/// Records every command and answers with the configured closures
#[derive(Default)]
pub struct MockRunner {
    run_calls: Mutex<Vec<Cmd>>,
    capture_calls: Mutex<Vec<Cmd>>,
    run_fn: Option<RunFn>,
    capture_fn: Option<CaptureFn>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_run(mut self, f: impl Fn(&Cmd) -> PacweaveResult<()> + Send + Sync + 'static) -> Self {
        self.run_fn = Some(Box::new(f));
        self
    }

    pub fn on_capture(
        mut self,
        f: impl Fn(&Cmd) -> PacweaveResult<Captured> + Send + Sync + 'static,
    ) -> Self {
        self.capture_fn = Some(Box::new(f));
        self
    }

    /// Commands passed to `run`, in call order
    pub fn runs(&self) -> Vec<Cmd> {
        self.run_calls.lock().unwrap().clone()
    }

    /// Commands passed to `capture`, in call order
    pub fn captures(&self) -> Vec<Cmd> {
        self.capture_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, cmd: &Cmd, cancel: &CancellationToken) -> PacweaveResult<()> {
        if cancel.is_cancelled() {
            return Err(PacweaveError::Cancelled);
        }
        self.run_calls.lock().unwrap().push(cmd.clone());
        match &self.run_fn {
            Some(f) => f(cmd),
            None => Ok(()),
        }
    }

    async fn capture(&self, cmd: &Cmd, cancel: &CancellationToken) -> PacweaveResult<Captured> {
        if cancel.is_cancelled() {
            return Err(PacweaveError::Cancelled);
        }
        self.capture_calls.lock().unwrap().push(cmd.clone());
        match &self.capture_fn {
            Some(f) => f(cmd),
            None => Ok(Captured::default()),
        }
    }
}

/// Stdout-only capture result
pub fn stdout(text: impl Into<String>) -> PacweaveResult<Captured> {
    Ok(Captured {
        stdout: text.into(),
        stderr: String::new(),
    })
}

/// A failed command, as a runner would report it
pub fn failure(cmd: &Cmd) -> PacweaveError {
    PacweaveError::CommandFailed {
        command: cmd.to_string(),
        code: Some(1),
        stderr: String::new(),
    }
}

/// Assert that every token of `want` appears in the command line of `got`
pub fn assert_cmd_subset(got: &Cmd, want: &str) {
    let line = got.to_string();
    let tokens: Vec<&str> = line.split(' ').collect();
    for token in want.split(' ') {
        assert!(
            tokens.contains(&token),
            "'{}' is missing from '{}' (want '{}')",
            token,
            line,
            want
        );
    }
}

/// Assert a whole call sequence with [`assert_cmd_subset`]
pub fn assert_calls(got: &[Cmd], want: &[&str]) {
    let lines: Vec<String> = got.iter().map(|c| c.to_string()).collect();
    assert_eq!(got.len(), want.len(), "calls: {:#?}", lines);
    for (cmd, want) in got.iter().zip(want) {
        assert_cmd_subset(cmd, want);
    }
}
