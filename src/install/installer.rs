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

//! Layer-by-layer build and installation.
//!
//! Layers are processed strictly in order. For each layer the installer
//! 1. installs the sync-database packages with `pacman -S`
//! 2. builds every AUR base not built earlier in the run
//! 3. installs the resulting archives with `pacman -U`
//! 4. corrects install reasons with `pacman -D`
//!
//! A failed build only drops the packages of its base; the run goes on
//! and the base is reported by [`Installer::compile_failed_and_ignored`].
//! A failed pacman transaction ends the run, later layers may depend on it.

use console::style;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::hooks::PostInstallHook;
use super::{BuildDirs, InstallInfo, Layer, RebuildMode, Reason, Source, TargetMode};
use crate::aur::builder::DEBUG_SUFFIX;
use crate::aur::{BuildDecision, BuildDriver, BuildOptions, BuildOutcome, BuildTarget};
use crate::error::{MultiError, PacweaveError, PacweaveResult};
use crate::exec::{CmdBuilder, CommandRunner, PacmanArgs};
use crate::localdb::PackageMetadata;
use crate::vcs::VcsStore;

/// Options stripped from the invocation before `pacman -U`
const ARCHIVE_INSTALL_STRIP: &[&str] = &[
    "confirm",
    "noconfirm",
    "c",
    "clean",
    "i",
    "install",
    "q",
    "quiet",
    "y",
    "refresh",
    "u",
    "sysupgrade",
    "w",
    "downloadonly",
    "asdeps",
    "asexplicit",
];

/// Installer behaviour switches
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallerOptions {
    pub target_mode: TargetMode,
    pub rebuild: RebuildMode,
    /// Build and download, but never install
    pub download_only: bool,
    pub build: BuildOptions,
}

/// Entries of one layer, grouped by install path
#[derive(Default)]
struct LayerPlan<'a> {
    /// `db/name` targets for `pacman -S`
    repo_targets: Vec<String>,
    /// Sync packages whose reason is corrected after `-S`
    repo_entries: Vec<(String, Reason)>,
    /// Some sync packages come in through the sysupgrade flag
    upgrade: bool,
    bases: BTreeMap<String, Vec<(&'a str, &'a InstallInfo)>>,
    missing_base: Vec<String>,
}

impl<'a> LayerPlan<'a> {
    fn partition(layer: &'a Layer) -> Self {
        let mut plan = LayerPlan::default();

        for (name, info) in layer {
            match info.source {
                Source::BinaryRepo => {
                    if info.upgrade {
                        plan.upgrade = true;
                        continue;
                    }
                    plan.repo_targets.push(info.qualified_name(name));
                    if !info.is_group {
                        plan.repo_entries.push((name.clone(), info.reason));
                    }
                }
                Source::SourceBuild => match &info.aur_base {
                    Some(base) => plan
                        .bases
                        .entry(base.clone())
                        .or_default()
                        .push((name.as_str(), info)),
                    None => plan.missing_base.push(name.clone()),
                },
            }
        }

        plan
    }
}

/// Drives builds and pacman transactions across layers
pub struct Installer {
    builder: CmdBuilder,
    runner: Arc<dyn CommandRunner>,
    metadata: Arc<dyn PackageMetadata>,
    vcs: Arc<dyn VcsStore>,
    driver: BuildDriver,
    options: InstallerOptions,
    /// Outcome per base, reused by split packages in later layers
    built: HashMap<String, BuildOutcome>,
    failed_and_ignored: BTreeMap<String, PacweaveError>,
    hooks: Vec<PostInstallHook>,
    confirm_pending: bool,
}

impl Installer {
    pub fn new(
        builder: CmdBuilder,
        runner: Arc<dyn CommandRunner>,
        metadata: Arc<dyn PackageMetadata>,
        vcs: Arc<dyn VcsStore>,
        options: InstallerOptions,
    ) -> Self {
        let driver = BuildDriver::new(builder.clone(), runner.clone(), options.build);
        Self {
            builder,
            runner,
            metadata,
            vcs,
            driver,
            options,
            built: HashMap::new(),
            failed_and_ignored: BTreeMap::new(),
            hooks: Vec::new(),
            confirm_pending: false,
        }
    }

    /// Build and install `layers` in order.
    ///
    /// Returns early only for a failed pacman transaction or cancellation.
    /// Build failures are collected, see [`Installer::compile_failed_and_ignored`].
    pub async fn install(
        &mut self,
        cancel: &CancellationToken,
        args: &PacmanArgs,
        layers: &[Layer],
        build_dirs: &BuildDirs,
        excluded: &[String],
        require_manual_confirm: bool,
    ) -> PacweaveResult<()> {
        self.confirm_pending = require_manual_confirm && !args.exists(&["noconfirm"]);
        let base_names = names_by_base(layers);

        for (index, layer) in layers.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PacweaveError::Cancelled);
            }
            if layer.is_empty() {
                continue;
            }

            println!(
                "{} {}",
                style("::").cyan().bold(),
                style(format!("Processing layer {}/{}", index + 1, layers.len())).white().bold()
            );
            self.install_layer(cancel, args, index, layer, build_dirs, excluded, &base_names)
                .await?;
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn install_layer(
        &mut self,
        cancel: &CancellationToken,
        args: &PacmanArgs,
        index: usize,
        layer: &Layer,
        build_dirs: &BuildDirs,
        excluded: &[String],
        base_names: &HashMap<String, Vec<String>>,
    ) -> PacweaveResult<()> {
        let plan = LayerPlan::partition(layer);

        for name in &plan.missing_base {
            self.record_failure(name, PacweaveError::MissingBase { name: name.clone() });
        }

        self.install_repo_packages(cancel, args, index, &plan, excluded)
            .await?;
        if !self.options.download_only {
            self.set_install_reasons(cancel, args, &plan.repo_entries)
                .await;
        }

        let mut archives: Vec<PathBuf> = Vec::new();
        let mut aur_entries: Vec<(String, Reason)> = Vec::new();

        for (base, entries) in &plan.bases {
            if cancel.is_cancelled() {
                return Err(PacweaveError::Cancelled);
            }
            if self.failed_and_ignored.contains_key(base) {
                tracing::debug!("skipping {} in layer {}, its build failed", base, index);
                continue;
            }

            let names = base_names.get(base).map(Vec::as_slice).unwrap_or_default();
            let outcome = match self
                .build_base(cancel, args, base, entries, build_dirs, names)
                .await
            {
                Ok(outcome) => {
                    self.built
                        .entry(base.clone())
                        .or_insert_with(|| outcome.clone());
                    outcome
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    self.record_failure(base, e);
                    continue;
                }
            };

            if outcome.decision == BuildDecision::UpToDate {
                continue;
            }

            match resolve_archives(&outcome, entries) {
                Ok(resolved) => {
                    for (name, path, reason) in resolved {
                        archives.push(path);
                        aur_entries.push((name, reason));
                    }
                }
                Err(e) => self.record_failure(base, e),
            }
        }

        if archives.is_empty() || self.options.download_only {
            return Ok(());
        }

        self.install_archives(cancel, args, index, archives).await?;
        self.set_install_reasons(cancel, args, &aur_entries).await;

        Ok(())
    }

    async fn install_repo_packages(
        &mut self,
        cancel: &CancellationToken,
        args: &PacmanArgs,
        index: usize,
        plan: &LayerPlan<'_>,
        excluded: &[String],
    ) -> PacweaveResult<()> {
        let aur_only = self.options.target_mode == TargetMode::Aur;
        let sysupgrade = args.exists(&["u", "sysupgrade"]) && !aur_only;
        if plan.repo_targets.is_empty() && !(plan.upgrade && sysupgrade) {
            return Ok(());
        }

        let mut sync = args.with_op("S");
        sync.remove(&["asdeps", "asexplicit"]);
        if aur_only {
            sync.remove(&["u", "sysupgrade"]);
        }
        if !excluded.is_empty() {
            sync.append_option("ignore", excluded);
        }
        sync.add_targets(plan.repo_targets.iter().cloned());

        let no_confirm = self.take_no_confirm();
        let cmd = self.builder.pacman_cmd(&sync, no_confirm);
        self.runner
            .run(&cmd, cancel)
            .await
            .map_err(|e| match e {
                PacweaveError::Cancelled => e,
                cause => PacweaveError::InstallRepoPackages {
                    layer: index,
                    cause: Box::new(cause),
                },
            })
    }

    async fn build_base(
        &self,
        cancel: &CancellationToken,
        args: &PacmanArgs,
        base: &str,
        entries: &[(&str, &InstallInfo)],
        build_dirs: &BuildDirs,
        names: &[String],
    ) -> PacweaveResult<BuildOutcome> {
        if let Some(outcome) = self.built.get(base) {
            return Ok(outcome.clone());
        }

        let dir = build_dirs
            .get(base)
            .ok_or_else(|| PacweaveError::MissingBuildDir {
                base: base.to_string(),
            })?;

        let version = entries
            .first()
            .map(|(_, info)| info.version.as_str())
            .unwrap_or_default();

        let installed = if args.exists(&["needed"]) {
            Some(self.metadata.as_ref())
        } else {
            None
        };

        let target = BuildTarget {
            base,
            dir,
            version,
            names,
            force_rebuild: self.force_rebuild(args, names),
            installed,
        };
        self.driver.build(cancel, &target).await
    }

    fn force_rebuild(&self, args: &PacmanArgs, names: &[String]) -> bool {
        match self.options.rebuild {
            RebuildMode::All => true,
            RebuildMode::Yes => names.iter().any(|n| args.targets().contains(n)),
            RebuildMode::No => false,
        }
    }

    async fn install_archives(
        &mut self,
        cancel: &CancellationToken,
        args: &PacmanArgs,
        index: usize,
        archives: Vec<PathBuf>,
    ) -> PacweaveResult<()> {
        let mut upgrade = args.with_op("U");
        upgrade.remove(ARCHIVE_INSTALL_STRIP);
        upgrade.add_targets(archives.iter().map(|p| p.display().to_string()));

        let no_confirm = self.take_no_confirm();
        let cmd = self.builder.pacman_cmd(&upgrade, no_confirm);
        if let Err(e) = self.runner.run(&cmd, cancel).await {
            return Err(match e {
                PacweaveError::Cancelled => e,
                cause => PacweaveError::InstallArchives {
                    layer: index,
                    archives,
                    cause: Box::new(cause),
                },
            });
        }

        if let Err(e) = self.vcs.save() {
            tracing::warn!("failed to save vcs state: {:#}", e);
        }
        Ok(())
    }

    /// Set install reasons, leaving packages whose reason already matches
    async fn set_install_reasons(
        &self,
        cancel: &CancellationToken,
        args: &PacmanArgs,
        entries: &[(String, Reason)],
    ) {
        let mut deps = Vec::new();
        let mut explicit = Vec::new();
        for (name, reason) in entries {
            if effective_reason(args, *reason).is_dependency() {
                deps.push(name.clone());
            } else {
                explicit.push(name.clone());
            }
        }

        self.set_reason(cancel, deps, Reason::Dependency).await;
        self.set_reason(cancel, explicit, Reason::Explicit).await;
    }

    async fn set_reason(&self, cancel: &CancellationToken, names: Vec<String>, reason: Reason) {
        let names: Vec<String> = names
            .into_iter()
            .filter(|n| self.metadata.install_reason(n) != Some(reason))
            .collect();
        if names.is_empty() {
            return;
        }

        let (flag, label) = match reason {
            Reason::Explicit => ("asexplicit", "explicit"),
            _ => ("asdeps", "dependency"),
        };
        let mut database = PacmanArgs::new("D");
        database.add_flag("q").add_flag(flag);
        database.add_targets(names.iter().cloned());

        let cmd = self.builder.pacman_cmd(&database, false);
        if let Err(cause) = self.runner.run(&cmd, cancel).await {
            let err = PacweaveError::SetReason {
                reason: label,
                packages: names,
                cause: Box::new(cause),
            };
            tracing::warn!("{}", err);
        }
    }

    /// Whether the next transaction may skip pacman's confirmation
    fn take_no_confirm(&mut self) -> bool {
        !std::mem::replace(&mut self.confirm_pending, false)
    }

    fn record_failure(&mut self, base: &str, err: PacweaveError) {
        eprintln!("{} {}", style("error:").red().bold(), err);
        tracing::debug!("recorded failure of {}", base);
        self.failed_and_ignored
            .entry(base.to_string())
            .or_insert(err);
    }

    /// Bases that failed during the run, with an error naming them all
    pub fn compile_failed_and_ignored(&self) -> (Vec<String>, PacweaveResult<()>) {
        let bases: Vec<String> = self.failed_and_ignored.keys().cloned().collect();
        if bases.is_empty() {
            return (bases, Ok(()));
        }
        let err = PacweaveError::FailedAndIgnored {
            bases: bases.clone(),
        };
        (bases, Err(err))
    }

    /// The recorded failure of `base`
    #[cfg(test)]
    pub fn failure(&self, base: &str) -> Option<&PacweaveError> {
        self.failed_and_ignored.get(base)
    }

    pub fn add_post_install_hook(&mut self, hook: PostInstallHook) {
        self.hooks.push(hook);
    }

    /// Run every registered hook once, in registration order
    pub async fn run_post_install_hooks(&mut self, cancel: &CancellationToken) -> PacweaveResult<()> {
        let mut errs = MultiError::new();

        for (index, hook) in self.hooks.drain(..).enumerate() {
            if let Err(e) = hook(cancel.clone()).await {
                errs.push(PacweaveError::Hook {
                    index,
                    message: format!("{:#}", e),
                });
            }
        }

        errs.into_result()
    }
}

/// Reason recorded for a package, honouring `--asdeps` and `--asexplicit`
fn effective_reason(args: &PacmanArgs, reason: Reason) -> Reason {
    if args.exists(&["asdeps"]) {
        Reason::Dependency
    } else if args.exists(&["asexplicit"]) || reason == Reason::Explicit {
        Reason::Explicit
    } else {
        Reason::Dependency
    }
}

/// Every package name wanted from each base, across all layers
fn names_by_base(layers: &[Layer]) -> HashMap<String, Vec<String>> {
    let mut names: HashMap<String, Vec<String>> = HashMap::new();
    for layer in layers {
        for (name, info) in layer {
            if let (Source::SourceBuild, Some(base)) = (info.source, &info.aur_base) {
                names.entry(base.clone()).or_default().push(name.clone());
            }
        }
    }
    names
}

/// Archive path and reason for every entry of a base.
///
/// Debug archives makepkg produced alongside are installed as dependencies.
fn resolve_archives(
    outcome: &BuildOutcome,
    entries: &[(&str, &InstallInfo)],
) -> PacweaveResult<Vec<(String, PathBuf, Reason)>> {
    let mut resolved = Vec::new();

    for (name, info) in entries {
        let path = outcome
            .packages
            .archive(name)
            .ok_or_else(|| PacweaveError::ArchiveNotListed {
                name: name.to_string(),
                base: outcome.base.clone(),
            })?;
        resolved.push((name.to_string(), path.to_path_buf(), info.reason));

        let debug = format!("{}{}", name, DEBUG_SUFFIX);
        if let Some(path) = outcome.packages.archive(&debug) {
            if path.exists() {
                resolved.push((debug, path.to_path_buf(), Reason::Dependency));
            }
        }
    }

    Ok(resolved)
}
