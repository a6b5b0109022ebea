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

//! Post-install hooks.
//!
//! Hooks run once, after every layer has been processed, in registration
//! order. A failing hook does not stop the ones after it.

use anyhow::Context;
use console::style;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::exec::{CmdBuilder, CommandRunner, PacmanArgs};

/// A side effect to run after installation
pub type PostInstallHook = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Remove build-only dependencies installed during this run
pub fn remove_make_deps(
    builder: CmdBuilder,
    runner: Arc<dyn CommandRunner>,
    names: Vec<String>,
) -> PostInstallHook {
    Box::new(move |cancel: CancellationToken| {
        async move {
            if names.is_empty() {
                return Ok(());
            }

            println!(
                "{} removing {} make dependencies...",
                style("::").cyan().bold(),
                style(names.len()).white().bold()
            );

            let mut args = PacmanArgs::new("R");
            args.add_flag("s").add_flag("u").add_targets(names.iter().cloned());
            runner
                .run(&builder.pacman_cmd(&args, true), &cancel)
                .await
                .with_context(|| format!("failed to remove make dependencies: {}", names.join(" ")))
        }
        .boxed()
    })
}

/// Delete the build directories of installed bases
pub fn clean_build_dirs(dirs: Vec<PathBuf>) -> PostInstallHook {
    Box::new(move |_cancel: CancellationToken| {
        async move {
            let mut failed = Vec::new();
            for dir in &dirs {
                tracing::debug!("removing build directory {}", dir.display());
                match tokio::fs::remove_dir_all(dir).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!("could not remove {}: {}", dir.display(), e);
                        failed.push(dir.display().to_string());
                    }
                }
            }

            if failed.is_empty() {
                Ok(())
            } else {
                Err(anyhow::anyhow!("failed to remove build directories: {}", failed.join(" ")))
            }
        }
        .boxed()
    })
}
