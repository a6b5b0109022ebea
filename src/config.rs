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

//! Configuration management with validation and defaults.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PacweaveError, PacweaveResult};
use crate::install::{RebuildMode, TargetMode};

/// Main configuration structure for pacweave
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which package sources the invocation targets
    pub mode: TargetMode,

    /// When to rebuild packages whose archives already exist
    pub rebuild: RebuildMode,

    /// Always ask before the first transaction, even on sysupgrade
    pub double_confirm: bool,

    /// External tool configuration
    pub tools: ToolsConfig,

    /// Build configuration
    pub build: BuildConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: TargetMode::Any,
            rebuild: RebuildMode::No,
            double_confirm: false,
            tools: ToolsConfig::default(),
            build: BuildConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Paths and flags of the external tools
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// makepkg binary
    pub makepkg_bin: String,

    /// pacman binary
    pub pacman_bin: String,

    /// Privilege elevation wrapper
    pub sudo_bin: String,

    /// Extra flags for the elevation wrapper
    pub sudo_flags: Vec<String>,

    /// pacman configuration file
    pub pacman_conf: PathBuf,

    /// makepkg configuration file (empty = makepkg default)
    pub makepkg_conf: Option<PathBuf>,

    /// Flags passed to every makepkg invocation
    pub makepkg_flags: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            makepkg_bin: "makepkg".to_string(),
            pacman_bin: "pacman".to_string(),
            sudo_bin: "sudo".to_string(),
            sudo_flags: Vec::new(),
            pacman_conf: PathBuf::from("/etc/pacman.conf"),
            makepkg_conf: None,
            makepkg_flags: Vec::new(),
        }
    }
}

/// Build configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Never pass clean flags to makepkg
    pub keep_src: bool,

    /// Remove $srcdir after a successful build
    pub clean_after: bool,

    /// Build packages for foreign architectures too
    pub ignore_arch: bool,

    /// Concurrent source downloads (0 or less = unbounded)
    pub max_concurrent_downloads: i64,

    /// Remove build-only dependencies after installing
    pub remove_make_deps: bool,

    /// Delete build directories of installed bases
    pub clean_build_dirs: bool,

    /// Local package database path
    pub db_path: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            keep_src: false,
            clean_after: true,
            ignore_arch: true,
            max_concurrent_downloads: 4,
            remove_make_deps: true,
            clean_build_dirs: false,
            db_path: PathBuf::from("/var/lib/pacman"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (empty = no file logging)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with precedence:
    /// 1. /etc/pacweave/pacweave.toml (system-wide)
    /// 2. ~/.config/pacweave/config.toml (user)
    /// 3. Environment variables (PACWEAVE_*)
    pub fn load() -> Self {
        let mut config = Config::default();

        let system_config = Path::new("/etc/pacweave/pacweave.toml");
        if let Some(parsed) = read_file(system_config) {
            config = config.merge(parsed);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("pacweave").join("config.toml");
            if let Some(parsed) = read_file(&user_config) {
                config = config.merge(parsed);
            }
        }

        config.apply_env_overrides()
    }

    /// Load a single explicit configuration file on top of the defaults
    pub fn load_from(path: &Path) -> PacweaveResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| PacweaveError::filesystem(path, e))?;
        let parsed = Self::parse(&content)?;
        Ok(Config::default().merge(parsed).apply_env_overrides())
    }

    /// Parse a TOML document
    pub fn parse(content: &str) -> PacweaveResult<Self> {
        toml::from_str(content).map_err(|e| PacweaveError::ConfigError {
            message: e.to_string(),
        })
    }

    /// Merge another config into this one (other takes precedence for non-default values)
    fn merge(mut self, other: Config) -> Self {
        let default = Config::default();

        if other.mode != default.mode {
            self.mode = other.mode;
        }
        if other.rebuild != default.rebuild {
            self.rebuild = other.rebuild;
        }
        if other.double_confirm != default.double_confirm {
            self.double_confirm = other.double_confirm;
        }
        if other.logging.level != default.logging.level {
            self.logging.level = other.logging.level;
        }
        if other.logging.file.is_some() {
            self.logging.file = other.logging.file;
        }

        self.tools = self.tools.merge(other.tools);
        self.build = self.build.merge(other.build);

        self
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("PACWEAVE_MAX_DOWNLOADS") {
            if let Ok(n) = val.parse() {
                self.build.max_concurrent_downloads = n;
            }
        }

        if let Ok(val) = std::env::var("PACWEAVE_KEEP_SRC") {
            self.build.keep_src = val == "1" || val.to_lowercase() == "true";
        }

        if let Ok(val) = std::env::var("PACWEAVE_PACMAN_CONF") {
            self.tools.pacman_conf = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("PACWEAVE_LOG_LEVEL") {
            self.logging.level = val;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> PacweaveResult<()> {
        let tools = [
            ("makepkg_bin", &self.tools.makepkg_bin),
            ("pacman_bin", &self.tools.pacman_bin),
            ("sudo_bin", &self.tools.sudo_bin),
        ];
        for (key, value) in tools {
            if value.trim().is_empty() {
                return Err(PacweaveError::ConfigError {
                    message: format!("{} must not be empty", key),
                });
            }
        }

        if self.build.keep_src && self.build.clean_after {
            tracing::debug!("keep_src overrides clean_after");
        }

        Ok(())
    }

    /// Resolve tool names to absolute paths through $PATH
    pub fn resolve_tools(&mut self) -> PacweaveResult<()> {
        self.tools.makepkg_bin = resolve_bin(&self.tools.makepkg_bin)?;
        self.tools.pacman_bin = resolve_bin(&self.tools.pacman_bin)?;
        // A missing sudo is only fatal once elevation is needed
        if let Ok(sudo) = resolve_bin(&self.tools.sudo_bin) {
            self.tools.sudo_bin = sudo;
        }
        Ok(())
    }
}

impl ToolsConfig {
    fn merge(mut self, other: ToolsConfig) -> Self {
        let default = ToolsConfig::default();

        if other.makepkg_bin != default.makepkg_bin {
            self.makepkg_bin = other.makepkg_bin;
        }
        if other.pacman_bin != default.pacman_bin {
            self.pacman_bin = other.pacman_bin;
        }
        if other.sudo_bin != default.sudo_bin {
            self.sudo_bin = other.sudo_bin;
        }
        if !other.sudo_flags.is_empty() {
            self.sudo_flags = other.sudo_flags;
        }
        if other.pacman_conf != default.pacman_conf {
            self.pacman_conf = other.pacman_conf;
        }
        if other.makepkg_conf.is_some() {
            self.makepkg_conf = other.makepkg_conf;
        }
        if !other.makepkg_flags.is_empty() {
            self.makepkg_flags = other.makepkg_flags;
        }

        self
    }
}

impl BuildConfig {
    fn merge(mut self, other: BuildConfig) -> Self {
        let default = BuildConfig::default();

        if other.keep_src != default.keep_src {
            self.keep_src = other.keep_src;
        }
        if other.clean_after != default.clean_after {
            self.clean_after = other.clean_after;
        }
        if other.ignore_arch != default.ignore_arch {
            self.ignore_arch = other.ignore_arch;
        }
        if other.max_concurrent_downloads != default.max_concurrent_downloads {
            self.max_concurrent_downloads = other.max_concurrent_downloads;
        }
        if other.remove_make_deps != default.remove_make_deps {
            self.remove_make_deps = other.remove_make_deps;
        }
        if other.clean_build_dirs != default.clean_build_dirs {
            self.clean_build_dirs = other.clean_build_dirs;
        }
        if other.db_path != default.db_path {
            self.db_path = other.db_path;
        }

        self
    }
}

fn read_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        return None;
    }
    let content = fs::read_to_string(path).ok()?;
    match Config::parse(&content) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!("ignoring {}: {}", path.display(), e);
            None
        }
    }
}

fn resolve_bin(name: &str) -> PacweaveResult<String> {
    which::which(name)
        .map(|p| p.display().to_string())
        .map_err(|e| PacweaveError::ConfigError {
            message: format!("cannot find {}: {}", name, e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mode, TargetMode::Any);
        assert_eq!(config.rebuild, RebuildMode::No);
        assert!(config.build.clean_after);
        assert!(!config.build.keep_src);
        assert_eq!(config.tools.pacman_conf, PathBuf::from("/etc/pacman.conf"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_document() {
        let config = Config::parse(
            r#"
            mode = "aur"
            rebuild = "yes"

            [build]
            keep_src = true
            max_concurrent_downloads = 0

            [tools]
            makepkg_flags = ["--nocheck"]
            "#,
        )
        .unwrap();

        assert_eq!(config.mode, TargetMode::Aur);
        assert_eq!(config.rebuild, RebuildMode::Yes);
        assert!(config.build.keep_src);
        assert_eq!(config.build.max_concurrent_downloads, 0);
        assert_eq!(config.tools.makepkg_flags, vec!["--nocheck".to_string()]);
        // untouched sections keep their defaults
        assert_eq!(config.tools.pacman_bin, "pacman");
    }

    #[test]
    fn test_merge_prefers_non_default_values() {
        let user = Config::parse("[build]\nclean_build_dirs = true\n").unwrap();
        let merged = Config::default().merge(user);
        assert!(merged.build.clean_build_dirs);
        assert!(merged.build.remove_make_deps);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.tools.pacman_bin = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_document_is_config_error() {
        let err = Config::parse("mode = 3").unwrap_err();
        assert!(matches!(err, PacweaveError::ConfigError { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "double_confirm = true\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert!(config.double_confirm);
    }
}
