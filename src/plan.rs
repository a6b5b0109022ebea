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

//! Install plans produced by the dependency resolver.
//!
//! A plan is a JSON document:
//!
//! ```json
//! {
//!   "targets": ["yippee"],
//!   "layers": [
//!     { "linux": { "source": "binary_repo", "reason": "dependency", "sync_db_name": "core" } },
//!     { "yippee": { "source": "source_build", "reason": "explicit", "version": "91.0.0-1",
//!                   "srcinfo_path": "/tmp/yippee/.SRCINFO", "aur_base": "yippee" } }
//!   ],
//!   "build_dirs": { "yippee": "/tmp/yippee" },
//!   "excluded": []
//! }
//! ```

use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::error::{PacweaveError, PacweaveResult};
use crate::install::{BuildDirs, Layer, Reason, Source};

/// Ordered layers plus the build directories they need
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Plan {
    /// Packages named on the command line
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub build_dirs: BuildDirs,
    /// Packages pacman must ignore
    #[serde(default)]
    pub excluded: Vec<String>,
}

impl Plan {
    /// Read and validate a plan file
    pub fn load(path: &Path) -> PacweaveResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| PacweaveError::filesystem(path, e))?;
        Self::parse(&content)
    }

    /// Parse and validate a plan document
    pub fn parse(content: &str) -> PacweaveResult<Self> {
        let plan: Plan = serde_json::from_str(content).map_err(|e| PacweaveError::InvalidPlan {
            reason: e.to_string(),
        })?;
        plan.validate()?;
        Ok(plan)
    }

    fn validate(&self) -> PacweaveResult<()> {
        for (index, layer) in self.layers.iter().enumerate() {
            for (name, info) in layer {
                if info.source != Source::SourceBuild {
                    continue;
                }
                let base = info.aur_base.as_deref().ok_or_else(|| invalid(format!(
                    "{} in layer {} is built from source but has no base",
                    name, index
                )))?;
                if info.srcinfo_path.is_none() {
                    return Err(invalid(format!("{} in layer {} has no .SRCINFO path", name, index)));
                }
                match self.build_dirs.get(base) {
                    Some(dir) if dir.is_absolute() => {}
                    Some(dir) => {
                        return Err(invalid(format!(
                            "build directory {} of {} is not absolute",
                            dir.display(),
                            base
                        )))
                    }
                    None => return Err(invalid(format!("no build directory for {}", base))),
                }
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(|l| l.is_empty())
    }

    /// Number of entries over all layers
    pub fn package_count(&self) -> usize {
        self.layers.iter().map(|l| l.len()).sum()
    }

    /// Names of every source-built package
    pub fn source_build_names(&self) -> Vec<String> {
        self.entries()
            .filter(|(_, info)| info.source == Source::SourceBuild)
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Names of packages only needed to build others, without duplicates
    pub fn build_only_dependencies(&self) -> Vec<String> {
        self.entries()
            .filter(|(_, info)| info.reason == Reason::BuildOnlyDependency)
            .map(|(name, _)| name.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn entries(&self) -> impl Iterator<Item = (&str, &crate::install::InstallInfo)> {
        self.layers
            .iter()
            .flat_map(|l| l.iter().map(|(n, i)| (n.as_str(), i)))
    }
}

fn invalid(reason: String) -> PacweaveError {
    PacweaveError::InvalidPlan { reason }
}
