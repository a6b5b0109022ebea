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

//! Development package version store.

/// Records upstream revisions of installed development packages
pub trait VcsStore: Send + Sync {
    /// Persist pending state
    fn save(&self) -> anyhow::Result<()>;

    /// Record the outcome of a run: `installed` targets minus the `failed` bases
    fn update(&self, installed: &[String], failed: &[String]) -> anyhow::Result<()>;
}

/// Store that keeps nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopVcsStore;

impl VcsStore for NoopVcsStore {
    fn save(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn update(&self, installed: &[String], failed: &[String]) -> anyhow::Result<()> {
        tracing::debug!(
            "vcs store: {} installed, {} failed",
            installed.len(),
            failed.len()
        );
        Ok(())
    }
}
