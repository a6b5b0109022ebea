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

//! Installed package metadata.
//!
//! [`LocalDb`] opens the pacman local database through libalpm and keeps a
//! snapshot of every installed package. The snapshot reflects the state
//! before the run and is not refreshed by later transactions.

use std::collections::HashMap;
use std::path::Path;

use alpm::{Alpm, PackageReason};

use crate::error::{PacweaveError, PacweaveResult};
use crate::install::Reason;

/// Capability to query installed package state
pub trait PackageMetadata: Send + Sync {
    /// Check whether `name` is installed at exactly `version`
    fn is_correct_version_installed(&self, name: &str, version: &str) -> bool;

    /// Install reason of `name`, `None` when it is not installed
    fn install_reason(&self, name: &str) -> Option<Reason>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LocalPackage {
    version: String,
    reason: Reason,
}

/// Snapshot of the pacman local database
#[derive(Debug, Clone, Default)]
pub struct LocalDb {
    packages: HashMap<String, LocalPackage>,
}

impl LocalDb {
    /// Open the database below `db_path` with libalpm and record every
    /// installed package
    pub fn load(db_path: &Path) -> PacweaveResult<Self> {
        let dbpath = db_path.to_str().ok_or_else(|| PacweaveError::ConfigError {
            message: format!("database path {} is not valid UTF-8", db_path.display()),
        })?;

        let handle = Alpm::new("/", dbpath).map_err(|e| PacweaveError::LocalDatabase {
            message: e.to_string(),
        })?;

        let mut installed = Vec::new();
        for pkg in handle.localdb().pkgs() {
            installed.push((
                pkg.name().to_string(),
                pkg.version().as_str().to_string(),
                reason_from_alpm(pkg.reason()),
            ));
        }
        let db = Self::from_packages(installed);

        tracing::debug!("loaded {} installed packages from {}", db.len(), dbpath);
        Ok(db)
    }

    fn from_packages<I>(packages: I) -> Self
    where
        I: IntoIterator<Item = (String, String, Reason)>,
    {
        let packages = packages
            .into_iter()
            .map(|(name, version, reason)| (name, LocalPackage { version, reason }))
            .collect();
        Self { packages }
    }

    /// Number of installed packages
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    #[cfg(test)]
    pub fn insert(&mut self, name: &str, version: &str, reason: Reason) {
        self.packages.insert(
            name.to_string(),
            LocalPackage {
                version: version.to_string(),
                reason,
            },
        );
    }
}

impl PackageMetadata for LocalDb {
    fn is_correct_version_installed(&self, name: &str, version: &str) -> bool {
        self.packages
            .get(name)
            .map(|p| p.version == version)
            .unwrap_or(false)
    }

    fn install_reason(&self, name: &str) -> Option<Reason> {
        self.packages.get(name).map(|p| p.reason)
    }
}

fn reason_from_alpm(reason: PackageReason) -> Reason {
    if reason == PackageReason::Depend {
        Reason::Dependency
    } else {
        Reason::Explicit
    }
}
