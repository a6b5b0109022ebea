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

//! makepkg and pacman command construction with privilege handling.

use std::path::{Path, PathBuf};

use super::{Cmd, PacmanArgs};
use crate::config::Config;

/// makepkg flags that remove source or build directories
const CLEAN_FLAGS: &[&str] = &["-c", "-C", "-Cc", "--clean", "--cleanbuild"];

/// pacman -S options that only query and never touch the system
const SYNC_QUERY_OPTIONS: &[&str] = &["s", "search", "i", "info", "l", "list", "p", "print", "g", "groups"];

/// Builds makepkg and pacman command lines
#[derive(Debug, Clone)]
pub struct CmdBuilder {
    /// makepkg binary
    pub makepkg_bin: String,
    /// pacman binary
    pub pacman_bin: String,
    /// Privilege elevation wrapper for pacman
    pub sudo_bin: String,
    /// Extra flags for the wrapper
    pub sudo_flags: Vec<String>,
    /// Passed to pacman as --config
    pub pacman_conf: Option<PathBuf>,
    /// Passed to makepkg as --config
    pub makepkg_conf: Option<PathBuf>,
    /// Flags prepended to every makepkg invocation
    pub makepkg_flags: Vec<String>,
    /// Strip every clean flag from makepkg invocations
    pub keep_src: bool,
    /// Wrap mutating pacman operations with the elevation wrapper
    pub elevate: bool,
}

impl CmdBuilder {
    /// Create a builder from configuration
    pub fn from_config(config: &Config) -> Self {
        let uid = unsafe { libc::geteuid() };
        Self {
            makepkg_bin: config.tools.makepkg_bin.clone(),
            pacman_bin: config.tools.pacman_bin.clone(),
            sudo_bin: config.tools.sudo_bin.clone(),
            sudo_flags: config.tools.sudo_flags.clone(),
            pacman_conf: Some(config.tools.pacman_conf.clone()),
            makepkg_conf: config.tools.makepkg_conf.clone(),
            makepkg_flags: config.tools.makepkg_flags.clone(),
            keep_src: config.build.keep_src,
            elevate: uid != 0,
        }
    }

    /// makepkg invocation running inside `dir`
    pub fn makepkg_cmd(&self, dir: &Path, extra: &[&str]) -> Cmd {
        let mut args: Vec<String> = self.makepkg_flags.clone();

        if let Some(conf) = &self.makepkg_conf {
            args.push("--config".to_string());
            args.push(conf.display().to_string());
        }

        args.extend(
            extra
                .iter()
                .filter(|a| !(self.keep_src && CLEAN_FLAGS.contains(*a)))
                .map(|a| a.to_string()),
        );

        Cmd::new(self.makepkg_bin.clone()).args(args).current_dir(dir)
    }

    /// pacman invocation; targets follow a `--` separator
    pub fn pacman_cmd(&self, args: &PacmanArgs, no_confirm: bool) -> Cmd {
        let mut argv = Vec::new();

        let program = if self.elevate && needs_root(args) {
            argv.extend(self.sudo_flags.iter().cloned());
            argv.push(self.pacman_bin.clone());
            self.sudo_bin.clone()
        } else {
            self.pacman_bin.clone()
        };

        argv.extend(args.format_options());

        if let Some(conf) = &self.pacman_conf {
            argv.push("--config".to_string());
            argv.push(conf.display().to_string());
        }

        if no_confirm && !args.exists(&["noconfirm"]) {
            argv.push("--noconfirm".to_string());
        }

        argv.push("--".to_string());
        argv.extend(args.targets().iter().cloned());

        Cmd::new(program).args(argv)
    }
}

impl Default for CmdBuilder {
    fn default() -> Self {
        Self {
            makepkg_bin: "makepkg".to_string(),
            pacman_bin: "pacman".to_string(),
            sudo_bin: "sudo".to_string(),
            sudo_flags: Vec::new(),
            pacman_conf: None,
            makepkg_conf: None,
            makepkg_flags: Vec::new(),
            keep_src: false,
            elevate: false,
        }
    }
}

fn needs_root(args: &PacmanArgs) -> bool {
    match args.op.as_str() {
        "S" => !args.exists(SYNC_QUERY_OPTIONS),
        "U" | "R" | "D" => true,
        _ => false,
    }
}
