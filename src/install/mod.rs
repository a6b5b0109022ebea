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

//! Layered installation of repository and AUR packages.
//!
//! This module provides:
//! - The per-package install descriptor and layer types
//! - The layered installer driving builds and pacman transactions
//! - Post-install hooks

pub mod hooks;
pub mod installer;

pub use installer::{Installer, InstallerOptions};

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::PacweaveError;

/// Where a package comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Pre-built package from a sync database
    BinaryRepo,
    /// Package built locally from an AUR recipe
    SourceBuild,
}

/// Why a package is being installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Explicit,
    Dependency,
    /// Only needed to build another package
    #[serde(rename = "make_dependency")]
    BuildOnlyDependency,
}

impl Reason {
    /// Whether pacman records the package as a dependency
    pub fn is_dependency(self) -> bool {
        !matches!(self, Reason::Explicit)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Explicit => write!(f, "explicit"),
            Reason::Dependency => write!(f, "dependency"),
            Reason::BuildOnlyDependency => write!(f, "make dependency"),
        }
    }
}

/// Install descriptor of one package within one layer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstallInfo {
    pub source: Source,
    pub reason: Reason,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub srcinfo_path: Option<PathBuf>,
    #[serde(default)]
    pub aur_base: Option<String>,
    #[serde(default)]
    pub sync_db_name: Option<String>,
    /// Picked up by the sysupgrade flag instead of being named as a target
    #[serde(default)]
    pub upgrade: bool,
}

impl InstallInfo {
    /// Descriptor of a sync-database package
    #[cfg(test)]
    pub fn repo(db: &str, version: &str, reason: Reason) -> Self {
        Self {
            source: Source::BinaryRepo,
            reason,
            version: version.to_string(),
            is_group: false,
            srcinfo_path: None,
            aur_base: None,
            sync_db_name: Some(db.to_string()),
            upgrade: false,
        }
    }

    /// Descriptor of an AUR package built from `dir`
    #[cfg(test)]
    pub fn aur(base: &str, dir: &std::path::Path, version: &str, reason: Reason) -> Self {
        Self {
            source: Source::SourceBuild,
            reason,
            version: version.to_string(),
            is_group: false,
            srcinfo_path: Some(dir.join(".SRCINFO")),
            aur_base: Some(base.to_string()),
            sync_db_name: None,
            upgrade: false,
        }
    }

    /// `db/name` when the sync database is known
    pub fn qualified_name(&self, name: &str) -> String {
        match &self.sync_db_name {
            Some(db) => format!("{}/{}", db, name),
            None => name.to_string(),
        }
    }
}

/// Packages that can be installed together
pub type Layer = BTreeMap<String, InstallInfo>;

/// Build directory per package base
pub type BuildDirs = HashMap<String, PathBuf>;

/// Which package sources the invocation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetMode {
    #[default]
    Any,
    Repo,
    Aur,
}

/// When existing archives are rebuilt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildMode {
    /// Reuse archives matching the target version
    #[default]
    No,
    /// Rebuild the explicitly requested targets
    Yes,
    /// Rebuild every source-build package
    All,
}

impl FromStr for TargetMode {
    type Err = PacweaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "any" | "all" => Ok(TargetMode::Any),
            "repo" => Ok(TargetMode::Repo),
            "aur" => Ok(TargetMode::Aur),
            other => Err(PacweaveError::ConfigError {
                message: format!("unknown target mode '{}' (expected any, repo or aur)", other),
            }),
        }
    }
}

impl FromStr for RebuildMode {
    type Err = PacweaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "no" => Ok(RebuildMode::No),
            "yes" => Ok(RebuildMode::Yes),
            "all" => Ok(RebuildMode::All),
            other => Err(PacweaveError::ConfigError {
                message: format!("unknown rebuild mode '{}' (expected no, yes or all)", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_install_info() {
        let info: InstallInfo = serde_json::from_str(
            r#"{
                "source": "source_build",
                "reason": "make_dependency",
                "version": "91.0.0-1",
                "srcinfo_path": "/tmp/yippee/.SRCINFO",
                "aur_base": "yippee"
            }"#,
        )
        .unwrap();

        assert_eq!(info.source, Source::SourceBuild);
        assert_eq!(info.reason, Reason::BuildOnlyDependency);
        assert_eq!(info.aur_base.as_deref(), Some("yippee"));
        assert!(!info.is_group);
        assert!(!info.upgrade);
    }

    #[test]
    fn test_qualified_name() {
        let info = InstallInfo::repo("core", "6.1-1", Reason::Dependency);
        assert_eq!(info.qualified_name("linux"), "core/linux");
    }

    #[test]
    fn test_reason_is_dependency() {
        assert!(!Reason::Explicit.is_dependency());
        assert!(Reason::Dependency.is_dependency());
        assert!(Reason::BuildOnlyDependency.is_dependency());
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("AUR".parse::<TargetMode>().unwrap(), TargetMode::Aur);
        assert_eq!("repo".parse::<TargetMode>().unwrap(), TargetMode::Repo);
        assert_eq!("all".parse::<RebuildMode>().unwrap(), RebuildMode::All);
        assert!("sometimes".parse::<RebuildMode>().is_err());
    }
}
