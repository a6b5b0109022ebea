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

//! One complete install run: sources, layers, bookkeeping and hooks.

use console::style;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::aur::{download_sources, BuildOptions, Concurrency};
use crate::config::Config;
use crate::error::{MultiError, PacweaveResult};
use crate::exec::{CmdBuilder, CommandRunner, PacmanArgs};
use crate::install::{hooks, Installer, InstallerOptions};
use crate::localdb::PackageMetadata;
use crate::plan::Plan;
use crate::vcs::VcsStore;

/// Runs install plans against the system
pub struct OperationService {
    config: Config,
    builder: CmdBuilder,
    runner: Arc<dyn CommandRunner>,
    metadata: Arc<dyn PackageMetadata>,
    vcs: Arc<dyn VcsStore>,
}

impl OperationService {
    pub fn new(
        config: Config,
        builder: CmdBuilder,
        runner: Arc<dyn CommandRunner>,
        metadata: Arc<dyn PackageMetadata>,
        vcs: Arc<dyn VcsStore>,
    ) -> Self {
        Self {
            config,
            builder,
            runner,
            metadata,
            vcs,
        }
    }

    /// Execute `plan` for the invocation `args`.
    ///
    /// Source retrieval and pacman failures end the run immediately. Build
    /// failures, hook failures and the vcs update are collected and the
    /// run goes on.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        args: &PacmanArgs,
        plan: &Plan,
    ) -> PacweaveResult<()> {
        if plan.is_empty() {
            println!(" there is nothing to do");
            return Ok(());
        }

        let download_only = args.exists(&["w", "downloadonly"]);
        let mut installer = Installer::new(
            self.builder.clone(),
            self.runner.clone(),
            self.metadata.clone(),
            self.vcs.clone(),
            self.installer_options(download_only),
        );

        if !plan.build_dirs.is_empty() {
            println!(
                "{} Retrieving sources for {} package base(s)...",
                style("::").cyan().bold(),
                plan.build_dirs.len()
            );
        }
        download_sources(
            cancel,
            &self.builder,
            self.runner.clone(),
            &plan.build_dirs,
            self.config.build.keep_src,
            Concurrency::from_limit(self.config.build.max_concurrent_downloads),
        )
        .await?;

        if self.config.build.remove_make_deps && !download_only {
            let make_deps: Vec<String> = plan
                .build_only_dependencies()
                .into_iter()
                .filter(|name| self.metadata.install_reason(name).is_none())
                .collect();
            if !make_deps.is_empty() {
                installer.add_post_install_hook(hooks::remove_make_deps(
                    self.builder.clone(),
                    self.runner.clone(),
                    make_deps,
                ));
            }
        }

        let manual_confirm = !args.exists(&["u", "sysupgrade"]) || self.config.double_confirm;
        installer
            .install(
                cancel,
                args,
                &plan.layers,
                &plan.build_dirs,
                &plan.excluded,
                manual_confirm,
            )
            .await?;

        let mut errs = MultiError::new();
        let (failed, compiled) = installer.compile_failed_and_ignored();
        if let Err(e) = compiled {
            errs.push(e);
        }

        if self.config.build.clean_build_dirs && !download_only {
            let mut dirs: Vec<_> = plan
                .build_dirs
                .iter()
                .filter(|(base, _)| !failed.contains(base))
                .map(|(_, dir)| dir.clone())
                .collect();
            dirs.sort();
            installer.add_post_install_hook(hooks::clean_build_dirs(dirs));
        }

        if !download_only {
            if let Err(e) = self.vcs.update(&plan.source_build_names(), &failed) {
                eprintln!(
                    "{} failed to update vcs state: {:#}",
                    style("warning:").yellow().bold(),
                    e
                );
                tracing::warn!("vcs update failed: {:#}", e);
            }
        }

        if let Err(e) = installer.run_post_install_hooks(cancel).await {
            errs.push(e);
        }

        errs.into_result()
    }

    fn installer_options(&self, download_only: bool) -> InstallerOptions {
        InstallerOptions {
            target_mode: self.config.mode,
            rebuild: self.config.rebuild,
            download_only,
            build: BuildOptions {
                ignore_arch: self.config.build.ignore_arch,
                clean_after: self.config.build.clean_after,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PacweaveError;
    use crate::exec::mock::{assert_calls, failure, stdout, MockRunner};
    use crate::exec::Cmd;
    use crate::install::{BuildDirs, InstallInfo, Layer, Reason};
    use crate::localdb::LocalDb;
    use crate::vcs::mock::RecordingVcsStore;
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    const VERSION: &str = "91.0.0-1";

    /// Temporary build directories with one package per base
    struct World {
        root: TempDir,
        dirs: BuildDirs,
        fail_build: Vec<PathBuf>,
        fail_download: bool,
    }

    impl World {
        fn new(bases: &[&str]) -> Self {
            let root = tempdir().unwrap();
            let dirs = bases
                .iter()
                .map(|b| {
                    let dir = root.path().join(b);
                    fs::create_dir_all(&dir).unwrap();
                    (b.to_string(), dir)
                })
                .collect();
            Self {
                root,
                dirs,
                fail_build: Vec::new(),
                fail_download: false,
            }
        }

        fn archive(&self, base: &str) -> PathBuf {
            self.dirs[base].join(format!("{}-{}-x86_64.pkg.tar.zst", base, VERSION))
        }

        fn runner(&self) -> Arc<MockRunner> {
            let archives: HashMap<PathBuf, PathBuf> = self
                .dirs
                .keys()
                .map(|b| (self.dirs[b].clone(), self.archive(b)))
                .collect();
            let listed = archives.clone();
            let fail_build = self.fail_build.clone();
            let fail_download = self.fail_download;

            Arc::new(
                MockRunner::new()
                    .on_capture(move |cmd: &Cmd| {
                        let dir = cmd.dir.clone().unwrap_or_default();
                        stdout(
                            listed
                                .get(&dir)
                                .map(|p| p.display().to_string())
                                .unwrap_or_default(),
                        )
                    })
                    .on_run(move |cmd: &Cmd| {
                        let dir = cmd.dir.clone().unwrap_or_default();
                        if fail_download && cmd.has_arg("--verifysource") {
                            return Err(failure(cmd));
                        }
                        if cmd.has_arg("--holdver") {
                            if fail_build.contains(&dir) {
                                return Err(failure(cmd));
                            }
                            if let Some(path) = archives.get(&dir) {
                                fs::write(path, b"").unwrap();
                            }
                        }
                        Ok(())
                    }),
            )
        }

        fn plan(&self, layers: Vec<Layer>) -> Plan {
            Plan {
                targets: vec!["yippee".to_string()],
                layers,
                build_dirs: self.dirs.clone(),
                excluded: Vec::new(),
            }
        }

        fn aur(&self, base: &str, reason: Reason) -> InstallInfo {
            InstallInfo::aur(base, &self.dirs[base], VERSION, reason)
        }
    }

    fn layer(entries: Vec<(&str, InstallInfo)>) -> Layer {
        entries
            .into_iter()
            .map(|(n, i)| (n.to_string(), i))
            .collect()
    }

    fn args(flags: &[&str]) -> PacmanArgs {
        let mut args = PacmanArgs::new("S");
        for flag in flags {
            args.add_flag(flag);
        }
        args.add_targets(["yippee"]);
        args
    }

    fn service(
        config: Config,
        runner: Arc<MockRunner>,
        db: LocalDb,
        vcs: Arc<RecordingVcsStore>,
    ) -> OperationService {
        OperationService::new(config, CmdBuilder::default(), runner, Arc::new(db), vcs)
    }

    #[tokio::test]
    async fn test_nothing_to_do() {
        let world = World::new(&[]);
        let runner = world.runner();
        let vcs = Arc::new(RecordingVcsStore::default());
        let op = service(Config::default(), runner.clone(), LocalDb::default(), vcs.clone());

        op.run(&CancellationToken::new(), &args(&[]), &world.plan(vec![layer(vec![])]))
            .await
            .unwrap();

        assert!(runner.runs().is_empty());
        assert!(vcs.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_run() {
        let world = World::new(&["yippee"]);
        let runner = world.runner();
        let vcs = Arc::new(RecordingVcsStore::default());
        let plan = world.plan(vec![
            layer(vec![(
                "dotnet-sdk-6.0",
                InstallInfo::repo("community", "6.0.12-1", Reason::BuildOnlyDependency),
            )]),
            layer(vec![("yippee", world.aur("yippee", Reason::Explicit))]),
        ]);

        let op = service(Config::default(), runner.clone(), LocalDb::default(), vcs.clone());
        op.run(&CancellationToken::new(), &args(&[]), &plan)
            .await
            .unwrap();

        let upgrade = format!("pacman -U -- {}", world.archive("yippee").display());
        let expected = vec![
            "makepkg --nocheck --verifysource --skippgpcheck -f -Cc",
            "pacman -S -- community/dotnet-sdk-6.0",
            "pacman -D -q --asdeps -- dotnet-sdk-6.0",
            "makepkg --nobuild -f -C --ignorearch",
            "makepkg -f -c --noconfirm --noextract --noprepare --holdver --ignorearch",
            upgrade.as_str(),
            "pacman -D -q --asexplicit -- yippee",
            "pacman -R -s -u --noconfirm -- dotnet-sdk-6.0",
        ];
        let runs = runner.runs();
        assert_calls(&runs, &expected);
        assert!(!runs[1].has_arg("--noconfirm"));

        let updates = vcs.updates.lock().unwrap();
        assert_eq!(*updates, vec![(vec!["yippee".to_string()], Vec::new())]);
    }

    #[tokio::test]
    async fn test_sysupgrade_skips_manual_confirm() {
        let world = World::new(&[]);
        let runner = world.runner();
        let plan = world.plan(vec![layer(vec![(
            "linux",
            InstallInfo::repo("core", "6.1-1", Reason::Explicit),
        )])]);

        let op = service(
            Config::default(),
            runner.clone(),
            LocalDb::default(),
            Arc::new(RecordingVcsStore::default()),
        );
        op.run(&CancellationToken::new(), &args(&["u"]), &plan)
            .await
            .unwrap();

        assert!(runner.runs()[0].has_arg("--noconfirm"));
    }

    #[tokio::test]
    async fn test_double_confirm_forces_manual_confirm() {
        let world = World::new(&[]);
        let runner = world.runner();
        let plan = world.plan(vec![layer(vec![(
            "linux",
            InstallInfo::repo("core", "6.1-1", Reason::Explicit),
        )])]);

        let mut config = Config::default();
        config.double_confirm = true;
        let op = service(
            config,
            runner.clone(),
            LocalDb::default(),
            Arc::new(RecordingVcsStore::default()),
        );
        op.run(&CancellationToken::new(), &args(&["u"]), &plan)
            .await
            .unwrap();

        assert!(!runner.runs()[0].has_arg("--noconfirm"));
    }

    #[tokio::test]
    async fn test_build_failure_reported_after_run() {
        let mut world = World::new(&["yippee", "jellyfin"]);
        world.fail_build.push(world.dirs["yippee"].clone());
        let runner = world.runner();
        let vcs = Arc::new(RecordingVcsStore::default());
        let plan = world.plan(vec![layer(vec![
            ("yippee", world.aur("yippee", Reason::Explicit)),
            ("jellyfin", world.aur("jellyfin", Reason::Explicit)),
        ])]);

        let mut config = Config::default();
        config.build.clean_build_dirs = true;
        let op = service(config, runner.clone(), LocalDb::default(), vcs.clone());
        let err = op
            .run(&CancellationToken::new(), &args(&[]), &plan)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "failed to install the following packages: yippee"
        );
        assert!(runner.runs().iter().any(|c| c.has_arg("-U")));

        let updates = vcs.updates.lock().unwrap();
        assert_eq!(updates[0].1, vec!["yippee".to_string()]);

        // only the installed base is cleaned up
        assert!(world.dirs["yippee"].exists());
        assert!(!world.dirs["jellyfin"].exists());
        assert!(world.root.path().exists());
    }

    #[tokio::test]
    async fn test_download_failure_aborts_before_install() {
        let mut world = World::new(&["yippee"]);
        world.fail_download = true;
        let runner = world.runner();
        let vcs = Arc::new(RecordingVcsStore::default());
        let plan = world.plan(vec![layer(vec![("yippee", world.aur("yippee", Reason::Explicit))])]);

        let op = service(Config::default(), runner.clone(), LocalDb::default(), vcs.clone());
        let err = op
            .run(&CancellationToken::new(), &args(&[]), &plan)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("error downloading sources for yippee"));
        assert_eq!(runner.runs().len(), 1);
        assert!(vcs.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_only_keeps_system_untouched() {
        let world = World::new(&["yippee"]);
        let runner = world.runner();
        let vcs = Arc::new(RecordingVcsStore::default());
        let plan = world.plan(vec![
            layer(vec![(
                "go",
                InstallInfo::repo("extra", "1.21-1", Reason::BuildOnlyDependency),
            )]),
            layer(vec![("yippee", world.aur("yippee", Reason::Explicit))]),
        ]);

        let op = service(Config::default(), runner.clone(), LocalDb::default(), vcs.clone());
        op.run(&CancellationToken::new(), &args(&["w"]), &plan)
            .await
            .unwrap();

        let runs = runner.runs();
        assert!(!runs.iter().any(|c| c.has_arg("-U") || c.has_arg("-D") || c.has_arg("-R")));
        assert!(world.archive("yippee").exists());
        assert!(vcs.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_preinstalled_make_deps_are_kept() {
        let world = World::new(&[]);
        let runner = world.runner();
        let mut db = LocalDb::default();
        db.insert("go", "1.21-1", Reason::Explicit);
        let plan = world.plan(vec![layer(vec![
            ("go", InstallInfo::repo("extra", "1.21-1", Reason::BuildOnlyDependency)),
            ("rust", InstallInfo::repo("extra", "1.73-1", Reason::BuildOnlyDependency)),
        ])]);

        let op = service(
            Config::default(),
            runner.clone(),
            db,
            Arc::new(RecordingVcsStore::default()),
        );
        op.run(&CancellationToken::new(), &args(&[]), &plan)
            .await
            .unwrap();

        let removal = runner.runs().into_iter().find(|c| c.has_arg("-R")).unwrap();
        assert!(removal.has_arg("rust"));
        assert!(!removal.has_arg("go"));
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let world = World::new(&["yippee"]);
        let runner = world.runner();
        let plan = world.plan(vec![layer(vec![("yippee", world.aur("yippee", Reason::Explicit))])]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let op = service(
            Config::default(),
            runner.clone(),
            LocalDb::default(),
            Arc::new(RecordingVcsStore::default()),
        );
        let err = op.run(&cancel, &args(&[]), &plan).await.unwrap_err();

        assert!(matches!(err, PacweaveError::Cancelled));
        assert!(runner.runs().is_empty());
    }
}
