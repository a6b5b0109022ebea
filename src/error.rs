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

//! Error types for the build and install pipeline.
//!
//! Every error carries the context needed to read it without a backtrace:
//! the package base, the layer index or the command line that failed.
//! Independent failures are collected into a [`MultiError`] instead of
//! keeping only the first one.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for pacweave operations
#[derive(Debug, Error)]
pub enum PacweaveError {
    /// An external tool could not be started
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// An external tool exited unsuccessfully
    #[error("'{command}' exited with {}", exit_label(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Building a package base failed at any of its stages
    #[error("error making {base}: {cause}")]
    BuildFailed {
        base: String,
        cause: Box<PacweaveError>,
    },

    /// The build tool listed no archives for a base
    #[error("no archives found for {base} in {}", .dir.display())]
    NoArchives { base: String, dir: PathBuf },

    /// The build tool listed an archive that does not exist on disk
    #[error("the archive {} for {base} does not exist (listed: {})", .path.display(), join_paths(.listed))]
    MissingArchive {
        base: String,
        path: PathBuf,
        listed: Vec<PathBuf>,
    },

    /// A package of the layer is not among the archives of its base
    #[error("{name} is not among the archives listed for {base}")]
    ArchiveNotListed { name: String, base: String },

    /// A source-build base has no build directory
    #[error("no build directory known for {base}")]
    MissingBuildDir { base: String },

    /// A source-build package carries no base name
    #[error("source-build package {name} has no base")]
    MissingBase { name: String },

    /// The binary-repo transaction of a layer failed
    #[error("error installing repo packages in layer {layer}: {cause}")]
    InstallRepoPackages {
        layer: usize,
        cause: Box<PacweaveError>,
    },

    /// The archive transaction of a layer failed
    #[error("error installing {} in layer {layer}: {cause}", join_paths(.archives))]
    InstallArchives {
        layer: usize,
        archives: Vec<PathBuf>,
        cause: Box<PacweaveError>,
    },

    /// Updating the install reason of packages failed
    #[error("error updating install reason to {reason} for {}: {cause}", .packages.join(" "))]
    SetReason {
        reason: &'static str,
        packages: Vec<String>,
        cause: Box<PacweaveError>,
    },

    /// Fetching the sources of a base failed
    #[error("error downloading sources for {base}: {cause}")]
    SourceDownload {
        base: String,
        cause: Box<PacweaveError>,
    },

    /// A spawned task panicked or was aborted
    #[error("task for {base} did not complete: {message}")]
    Task { base: String, message: String },

    /// Bases whose build failed during the run
    #[error("failed to install the following packages: {}", .bases.join(", "))]
    FailedAndIgnored { bases: Vec<String> },

    /// A post-install hook returned an error
    #[error("post-install hook {index} failed: {message}")]
    Hook { index: usize, message: String },

    /// The install plan is inconsistent
    #[error("invalid install plan: {reason}")]
    InvalidPlan { reason: String },

    /// libalpm could not open the local database
    #[error("failed to initialize libalpm: {message}")]
    LocalDatabase { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// File system errors
    #[error("File system error for '{path}': {source}")]
    FileSystem {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Several independent failures
    #[error("{0}")]
    Multi(MultiError),
}

impl PacweaveError {
    /// Wrap an error as the build failure of `base`
    pub fn build_failed(base: impl Into<String>, cause: PacweaveError) -> Self {
        PacweaveError::BuildFailed {
            base: base.into(),
            cause: Box::new(cause),
        }
    }

    /// Create a filesystem error
    pub fn filesystem(path: &Path, source: std::io::Error) -> Self {
        PacweaveError::FileSystem {
            path: path.display().to_string(),
            source,
        }
    }

    /// Base name this error is attributed to, if any
    pub fn base(&self) -> Option<&str> {
        match self {
            PacweaveError::BuildFailed { base, .. }
            | PacweaveError::NoArchives { base, .. }
            | PacweaveError::MissingArchive { base, .. }
            | PacweaveError::ArchiveNotListed { base, .. }
            | PacweaveError::MissingBuildDir { base }
            | PacweaveError::Task { base, .. }
            | PacweaveError::SourceDownload { base, .. } => Some(base),
            _ => None,
        }
    }

    /// Check whether the error stems from cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            PacweaveError::Cancelled => true,
            PacweaveError::BuildFailed { cause, .. }
            | PacweaveError::InstallRepoPackages { cause, .. }
            | PacweaveError::InstallArchives { cause, .. }
            | PacweaveError::SourceDownload { cause, .. } => cause.is_cancelled(),
            _ => false,
        }
    }
}

/// Result type alias for pacweave operations
pub type PacweaveResult<T> = std::result::Result<T, PacweaveError>;

/// Ordered collection of independent errors.
///
/// Errors keep their insertion order and are rendered one per line.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<PacweaveError>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: PacweaveError) {
        // Flatten nested aggregates so the join format stays one error per line
        match err {
            PacweaveError::Multi(inner) => self.errors.extend(inner.errors),
            other => self.errors.push(other),
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Check whether an error attributed to `base` is present
    #[cfg(test)]
    pub fn contains_base(&self, base: &str) -> bool {
        self.errors.iter().any(|e| e.base() == Some(base))
    }

    /// `Ok(())` when empty, the aggregate otherwise
    pub fn into_result(self) -> PacweaveResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(PacweaveError::Multi(self))
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl Extend<PacweaveError> for MultiError {
    fn extend<I: IntoIterator<Item = PacweaveError>>(&mut self, iter: I) {
        for err in iter {
            self.push(err);
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
