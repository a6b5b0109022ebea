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

//! Parallel source retrieval for package bases.
//!
//! Runs `makepkg --verifysource` in every build directory, one task per
//! base. A failing base never stops its siblings; every failure is reported
//! in the returned [`MultiError`].

use console::style;
use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{MultiError, PacweaveError, PacweaveResult};
use crate::exec::{CmdBuilder, CommandRunner};
use crate::install::BuildDirs;

/// Limit on simultaneous makepkg invocations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// One task per base, no throttling
    Unbounded,
    Bounded(usize),
}

impl Concurrency {
    /// Zero or a negative limit means [`Concurrency::Unbounded`]
    pub fn from_limit(limit: i64) -> Self {
        if limit <= 0 {
            Concurrency::Unbounded
        } else {
            Concurrency::Bounded(limit as usize)
        }
    }

    fn semaphore(self) -> Option<Arc<Semaphore>> {
        match self {
            Concurrency::Unbounded => None,
            Concurrency::Bounded(n) => Some(Arc::new(Semaphore::new(n))),
        }
    }
}

/// Fetch and verify the sources of every base in `build_dirs`
pub async fn download_sources(
    cancel: &CancellationToken,
    builder: &CmdBuilder,
    runner: Arc<dyn CommandRunner>,
    build_dirs: &BuildDirs,
    keep_sources: bool,
    concurrency: Concurrency,
) -> PacweaveResult<()> {
    if build_dirs.is_empty() {
        return Ok(());
    }

    let mut args = vec!["--nocheck", "--verifysource", "--skippgpcheck", "-f"];
    if !keep_sources {
        args.push("-Cc");
    }

    let semaphore = concurrency.semaphore();
    let start_time = Instant::now();

    let pb = ProgressBar::new(build_dirs.len() as u64);
    if let Ok(progress_style) =
        ProgressStyle::default_bar().template("{spinner:.cyan} {msg} [{bar:40.cyan/blue}] {pos}/{len}")
    {
        pb.set_style(progress_style.progress_chars("=>-"));
    }
    pb.set_message("downloading sources");

    let mut join_set: JoinSet<(String, PacweaveResult<()>)> = JoinSet::new();

    for (base, dir) in build_dirs {
        let cmd = builder.makepkg_cmd(dir, &args);
        let runner = runner.clone();
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        let base = base.clone();
        let pb = pb.clone();

        join_set.spawn(async move {
            let _permit = match semaphore {
                Some(semaphore) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return (base, Err(PacweaveError::Cancelled)),
                    permit = semaphore.acquire_owned() => permit.ok(),
                },
                None => None,
            };

            tracing::debug!("downloading sources for {}", base);
            let result = AssertUnwindSafe(runner.run(&cmd, &cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(PacweaveError::Task {
                        base: base.clone(),
                        message: "makepkg task panicked".to_string(),
                    })
                });
            pb.inc(1);
            (base, result)
        });
    }

    let mut failures = Vec::new();
    let mut cancelled = false;

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((_, Err(PacweaveError::Cancelled))) => cancelled = true,
            Ok((base, Err(e))) => failures.push(PacweaveError::SourceDownload {
                base,
                cause: Box::new(e),
            }),
            // Tasks catch their own panics and are never aborted
            Err(e) => tracing::error!("source download task lost: {}", e),
        }
    }

    pb.finish_and_clear();

    if cancelled {
        return Err(PacweaveError::Cancelled);
    }

    if failures.is_empty() {
        println!(
            "{} sources for {} package base(s) ready in {:.1}s",
            style("::").cyan().bold(),
            build_dirs.len(),
            start_time.elapsed().as_secs_f64()
        );
    }

    // Stable report order regardless of completion order
    failures.sort_by(|a, b| a.base().cmp(&b.base()));
    let mut errs = MultiError::new();
    errs.extend(failures);
    errs.into_result()
}
