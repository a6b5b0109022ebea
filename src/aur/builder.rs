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

//! AUR package building through makepkg.
//!
//! A build runs in up to three makepkg invocations inside the build
//! directory of a package base:
//! 1. `--nobuild -f -C` refreshes the recipe metadata
//! 2. `--packagelist` asks makepkg for the archive paths it would produce
//! 3. either the real build or a cleanup-only pass when the archives can be
//!    reused
//!
//! The archive list is authoritative: filenames are never guessed.

use console::style;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{PacweaveError, PacweaveResult};
use crate::exec::{CmdBuilder, CommandRunner};
use crate::localdb::PackageMetadata;

/// Suffix makepkg gives to split debug packages
pub const DEBUG_SUFFIX: &str = "-debug";

/// Build driver options
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    /// Pass --ignorearch to makepkg
    pub ignore_arch: bool,
    /// Remove the work directory after a build (-c)
    pub clean_after: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            ignore_arch: true,
            clean_after: true,
        }
    }
}

/// Archives makepkg reports for one package base
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageList {
    version: Option<String>,
    archives: BTreeMap<String, PathBuf>,
    listed: Vec<PathBuf>,
}

impl PackageList {
    /// Parse `makepkg --packagelist` output, one archive path per line
    pub fn parse(output: &str) -> Self {
        let mut list = PackageList::default();

        for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let path = PathBuf::from(line);
            let parsed = path
                .file_name()
                .and_then(|f| f.to_str())
                .and_then(parse_archive_name);

            match parsed {
                Some((name, version)) => {
                    if list.version.is_none() && !name.ends_with(DEBUG_SUFFIX) {
                        list.version = Some(version);
                    }
                    list.archives.insert(name, path.clone());
                }
                None => tracing::warn!("unrecognised archive name in package list: {}", line),
            }
            list.listed.push(path);
        }

        list
    }

    /// `pkgver-pkgrel` shared by the listed archives
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Archive path of package `name`
    pub fn archive(&self, name: &str) -> Option<&Path> {
        self.archives.get(name).map(PathBuf::as_path)
    }

    /// Every listed path, in makepkg's order
    pub fn listed(&self) -> &[PathBuf] {
        &self.listed
    }

    pub fn is_empty(&self) -> bool {
        self.listed.is_empty()
    }

    /// Whether every listed archive is on disk
    pub fn all_exist(&self) -> bool {
        self.listed.iter().all(|p| p.exists())
    }
}

/// Split an archive filename `name-pkgver-pkgrel-arch.pkg.tar[.ext]`
/// into the package name and `pkgver-pkgrel`
fn parse_archive_name(file_name: &str) -> Option<(String, String)> {
    let stem = &file_name[..file_name.find(".pkg.tar")?];
    let mut parts = stem.rsplitn(4, '-');
    let _arch = parts.next()?;
    let pkgrel = parts.next()?;
    let pkgver = parts.next()?;
    let name = parts.next()?;

    if name.is_empty() || pkgver.is_empty() || pkgrel.is_empty() {
        return None;
    }
    Some((name.to_string(), format!("{}-{}", pkgver, pkgrel)))
}

/// What the driver did with a base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildDecision {
    /// makepkg produced fresh archives
    Build,
    /// Archives for the target version were already present
    ReuseArchives,
    /// Every package is installed at the listed version
    UpToDate,
}

impl fmt::Display for BuildDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildDecision::Build => write!(f, "built"),
            BuildDecision::ReuseArchives => write!(f, "reusing archives"),
            BuildDecision::UpToDate => write!(f, "up to date"),
        }
    }
}

/// Result of driving one base
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub base: String,
    pub decision: BuildDecision,
    pub packages: PackageList,
}

/// One base to build
pub struct BuildTarget<'a> {
    pub base: &'a str,
    pub dir: &'a Path,
    /// Expected `pkgver-pkgrel`; empty accepts any listed version
    pub version: &'a str,
    /// Packages of the base the run wants
    pub names: &'a [String],
    /// Build even when matching archives exist
    pub force_rebuild: bool,
    /// Installed state, given when already installed packages may be skipped
    pub installed: Option<&'a dyn PackageMetadata>,
}

/// Drives makepkg for single package bases
pub struct BuildDriver {
    builder: CmdBuilder,
    runner: Arc<dyn CommandRunner>,
    options: BuildOptions,
}

impl BuildDriver {
    pub fn new(builder: CmdBuilder, runner: Arc<dyn CommandRunner>, options: BuildOptions) -> Self {
        Self {
            builder,
            runner,
            options,
        }
    }

    /// Build `target`, reusing existing archives when allowed.
    ///
    /// Every failure except cancellation is reported as
    /// [`PacweaveError::BuildFailed`] naming the base.
    pub async fn build(
        &self,
        cancel: &CancellationToken,
        target: &BuildTarget<'_>,
    ) -> PacweaveResult<BuildOutcome> {
        if cancel.is_cancelled() {
            return Err(PacweaveError::Cancelled);
        }

        match self.drive(cancel, target).await {
            Ok(outcome) => Ok(outcome),
            Err(PacweaveError::Cancelled) => Err(PacweaveError::Cancelled),
            Err(e) => Err(PacweaveError::build_failed(target.base, e)),
        }
    }

    async fn drive(
        &self,
        cancel: &CancellationToken,
        target: &BuildTarget<'_>,
    ) -> PacweaveResult<BuildOutcome> {
        self.refresh(cancel, target.dir).await?;

        let packages = self.package_list(cancel, target.dir).await?;
        if packages.is_empty() {
            return Err(PacweaveError::NoArchives {
                base: target.base.to_string(),
                dir: target.dir.to_path_buf(),
            });
        }

        let decision = self.decide(target, &packages);
        tracing::debug!("{}: {}", target.base, decision);

        match decision {
            BuildDecision::Build => {
                println!(
                    "{} {} {}",
                    style("::").cyan().bold(),
                    style("Building").white(),
                    style(target.base).yellow().bold()
                );
                self.run_build(cancel, target.dir).await?;
            }
            BuildDecision::ReuseArchives | BuildDecision::UpToDate => {
                println!(
                    "   {} {}: {}",
                    style("->").dim(),
                    style(target.base).cyan(),
                    decision
                );
                self.run_cleanup(cancel, target.dir).await?;
            }
        }

        if decision != BuildDecision::UpToDate {
            verify_archives(target.base, &packages)?;
        }

        Ok(BuildOutcome {
            base: target.base.to_string(),
            decision,
            packages,
        })
    }

    fn decide(&self, target: &BuildTarget<'_>, packages: &PackageList) -> BuildDecision {
        if let Some(installed) = target.installed {
            let up_to_date = !target.names.is_empty()
                && target.names.iter().all(|name| {
                    packages
                        .version()
                        .map(|v| installed.is_correct_version_installed(name, v))
                        .unwrap_or(false)
                });
            if up_to_date && !target.force_rebuild {
                return BuildDecision::UpToDate;
            }
        }

        let version_matches = target.version.is_empty() || packages.version() == Some(target.version);
        if !target.force_rebuild && version_matches && packages.all_exist() {
            return BuildDecision::ReuseArchives;
        }

        BuildDecision::Build
    }

    async fn refresh(&self, cancel: &CancellationToken, dir: &Path) -> PacweaveResult<()> {
        let mut args = vec!["--nobuild", "-f", "-C"];
        if self.options.ignore_arch {
            args.push("--ignorearch");
        }
        self.runner
            .run(&self.builder.makepkg_cmd(dir, &args), cancel)
            .await
    }

    async fn package_list(&self, cancel: &CancellationToken, dir: &Path) -> PacweaveResult<PackageList> {
        let cmd = self.builder.makepkg_cmd(dir, &["--packagelist"]);
        let captured = self.runner.capture(&cmd, cancel).await?;
        Ok(PackageList::parse(&captured.stdout))
    }

    async fn run_build(&self, cancel: &CancellationToken, dir: &Path) -> PacweaveResult<()> {
        let mut args = vec!["-f"];
        if self.options.clean_after {
            args.push("-c");
        }
        args.extend(["--noconfirm", "--noextract", "--noprepare", "--holdver"]);
        if self.options.ignore_arch {
            args.push("--ignorearch");
        }
        self.runner
            .run(&self.builder.makepkg_cmd(dir, &args), cancel)
            .await
    }

    async fn run_cleanup(&self, cancel: &CancellationToken, dir: &Path) -> PacweaveResult<()> {
        let mut args = Vec::new();
        if self.options.clean_after {
            args.push("-c");
        }
        args.extend(["--nobuild", "--noextract"]);
        if self.options.ignore_arch {
            args.push("--ignorearch");
        }
        self.runner
            .run(&self.builder.makepkg_cmd(dir, &args), cancel)
            .await
    }
}

fn verify_archives(base: &str, packages: &PackageList) -> PacweaveResult<()> {
    match packages.listed().iter().find(|p| !p.exists()) {
        Some(missing) => Err(PacweaveError::MissingArchive {
            base: base.to_string(),
            path: missing.clone(),
            listed: packages.listed().to_vec(),
        }),
        None => Ok(()),
    }
}
