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

use anyhow::{anyhow, Result};
use clap::Parser;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod aur;
mod config;
mod error;
mod exec;
mod install;
mod localdb;
mod logging;
mod operation;
mod plan;
mod vcs;

use config::Config;
use exec::{CmdBuilder, PacmanArgs, ProcessRunner};
use install::{RebuildMode, Source, TargetMode};
use localdb::LocalDb;
use operation::OperationService;
use plan::Plan;
use vcs::NoopVcsStore;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\n",
    "Copyright (C) 2025  pacweave contributors\n",
    "License GPLv3+: GNU GPL version 3 or later <https://gnu.org/licenses/gpl.html>\n\n",
    "This is free software; you are free to change and redistribute it.\n",
    "There is NO WARRANTY, to the extent permitted by law."
);

#[derive(Parser)]
#[command(name = "pacweave")]
#[command(version = VERSION)]
#[command(long_version = LONG_VERSION)]
#[command(about = "Build and install a layered AUR install plan.")]
struct Cli {
    /// Install plan produced by the dependency resolver
    #[arg(value_name = "PLAN")]
    plan: PathBuf,
    /// Do not reinstall up to date packages
    #[arg(long)]
    needed: bool,
    /// Download and build, but do not install
    #[arg(short = 'w', long = "downloadonly")]
    download_only: bool,
    /// The plan includes a system upgrade
    #[arg(short = 'u', long = "sysupgrade")]
    sys_upgrade: bool,
    /// Install every package as a dependency
    #[arg(long, conflicts_with = "asexplicit")]
    asdeps: bool,
    /// Install every package as explicitly installed
    #[arg(long)]
    asexplicit: bool,
    #[arg(long, help = "Bypass any confirmation prompts")]
    noconfirm: bool,
    /// Packages pacman must not upgrade
    #[arg(long, value_delimiter = ',')]
    ignore: Vec<String>,
    /// Which package sources are targeted: any, repo or aur
    #[arg(long)]
    mode: Option<TargetMode>,
    /// When to rebuild existing archives: no, yes or all
    #[arg(long)]
    rebuild: Option<RebuildMode>,
    /// Concurrent source downloads, 0 for no limit
    #[arg(short = 'j', long)]
    jobs: Option<i64>,
    /// Keep source and build directories
    #[arg(long)]
    keep_src: bool,
    /// Configuration file instead of the system and user ones
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Show the plan and exit
    #[arg(long)]
    dry_run: bool,
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Cli {
    /// The pacman invocation this run stands for
    fn pacman_args(&self, plan: &Plan) -> PacmanArgs {
        let mut args = PacmanArgs::new("S");
        let flags = [
            ("needed", self.needed),
            ("w", self.download_only),
            ("u", self.sys_upgrade),
            ("asdeps", self.asdeps),
            ("asexplicit", self.asexplicit),
            ("noconfirm", self.noconfirm),
        ];
        for (flag, set) in flags {
            if set {
                args.add_flag(flag);
            }
        }
        args.add_targets(plan.targets.iter().cloned());
        args
    }

    fn apply(&self, config: &mut Config) {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(rebuild) = self.rebuild {
            config.rebuild = rebuild;
        }
        if let Some(jobs) = self.jobs {
            config.build.max_concurrent_downloads = jobs;
        }
        if self.keep_src {
            config.build.keep_src = true;
        }
    }
}

/// Refuse to start while a live process holds the pacman database lock
fn check_lock_file(db_path: &Path) -> Result<()> {
    let lock_path = db_path.join("db.lck");
    if !lock_path.exists() {
        return Ok(());
    }
    let content = fs::read_to_string(&lock_path).unwrap_or_default();
    match content.trim().parse::<i32>() {
        Ok(pid) if Path::new(&format!("/proc/{}", pid)).exists() => {
            Err(anyhow!("database locked by running process {}", pid))
        }
        _ => {
            println!(
                "{}",
                style(format!(":: stale lock file {}, pacman may refuse to run", lock_path.display()))
                    .yellow()
            );
            Ok(())
        }
    }
}

fn print_plan(plan: &Plan) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["layer", "package", "version", "source", "reason"]);

    for (index, layer) in plan.layers.iter().enumerate() {
        for (name, info) in layer {
            let source = match info.source {
                Source::BinaryRepo => info.sync_db_name.clone().unwrap_or_else(|| "repo".to_string()),
                Source::SourceBuild => format!("aur ({})", info.aur_base.as_deref().unwrap_or("?")),
            };
            let version = if info.upgrade {
                format!("{} (upgrade)", info.version)
            } else {
                info.version.clone()
            };
            table.add_row(vec![
                (index + 1).to_string(),
                name.clone(),
                version,
                source,
                info.reason.to_string(),
            ]);
        }
    }

    println!("{}", table);
    println!(
        "\nTotal: {} package(s) in {} layer(s), {} to build",
        plan.package_count(),
        plan.layers.len(),
        plan.build_dirs.len()
    );
}

fn load_local_db(db_path: &Path) -> Result<LocalDb> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg}")?,
    );
    pb.set_message("reading local database...");
    pb.enable_steady_tick(Duration::from_millis(80));
    let db = LocalDb::load(db_path);
    pb.finish_and_clear();

    let db = db?;
    if db.is_empty() {
        tracing::warn!("no installed packages found below {}", db_path.display());
    }
    tracing::debug!("{} packages installed", db.len());
    Ok(db)
}

async fn run(cli: Cli, mut config: Config) -> Result<()> {
    let mut plan = Plan::load(&cli.plan)?;
    plan.excluded.extend(cli.ignore.iter().cloned());

    if cli.dry_run {
        print_plan(&plan);
        return Ok(());
    }

    config.resolve_tools()?;
    check_lock_file(&config.build.db_path)?;

    if unsafe { libc::geteuid() } == 0 && !plan.build_dirs.is_empty() {
        eprintln!(
            "{} makepkg refuses to build as root, run pacweave as a regular user",
            style("warning:").yellow().bold()
        );
    }

    let metadata = Arc::new(load_local_db(&config.build.db_path)?);
    let args = cli.pacman_args(&plan);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", style(":: interrupted, stopping...").yellow());
            interrupt.cancel();
        }
    });

    let service = OperationService::new(
        config.clone(),
        CmdBuilder::from_config(&config),
        Arc::new(ProcessRunner::new()),
        metadata,
        Arc::new(NoopVcsStore),
    );
    service.run(&cancel, &args, &plan).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    cli.apply(&mut config);
    logging::init(&config.logging, cli.verbose);
    config.validate()?;

    if let Err(e) = run(cli, config).await {
        for line in format!("{:#}", e).lines() {
            eprintln!("{} {}", style("error:").red().bold(), line);
        }
        std::process::exit(1);
    }
    Ok(())
}
