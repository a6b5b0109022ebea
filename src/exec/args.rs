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

//! pacman invocation arguments.

/// Operation, options and targets of a pacman-style invocation.
///
/// Options keep their insertion order. Single-character names render as
/// short flags (`-u`), longer ones as long flags (`--needed`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacmanArgs {
    pub op: String,
    options: Vec<(String, Option<String>)>,
    targets: Vec<String>,
}

impl PacmanArgs {
    pub fn new(op: &str) -> Self {
        Self {
            op: op.to_string(),
            options: Vec::new(),
            targets: Vec::new(),
        }
    }

    /// Copy of the options under a different operation, without targets
    pub fn with_op(&self, op: &str) -> Self {
        Self {
            op: op.to_string(),
            options: self.options.clone(),
            targets: Vec::new(),
        }
    }

    pub fn add_flag(&mut self, name: &str) -> &mut Self {
        if !self.exists(&[name]) {
            self.options.push((name.to_string(), None));
        }
        self
    }

    /// Set an option value, replacing a previous one
    #[cfg(test)]
    pub fn add_option(&mut self, name: &str, value: &str) -> &mut Self {
        self.remove(&[name]);
        self.options.push((name.to_string(), Some(value.to_string())));
        self
    }

    /// Append comma-separated values to an option, creating it if needed
    pub fn append_option(&mut self, name: &str, values: &[String]) -> &mut Self {
        if values.is_empty() {
            return self;
        }
        let joined = values.join(",");
        match self.options.iter_mut().find(|(n, _)| n == name) {
            Some((_, Some(existing))) => {
                existing.push(',');
                existing.push_str(&joined);
            }
            Some((_, value)) => *value = Some(joined),
            None => self.options.push((name.to_string(), Some(joined))),
        }
        self
    }

    /// Check whether any of the given names is set
    pub fn exists(&self, names: &[&str]) -> bool {
        self.options.iter().any(|(n, _)| names.contains(&n.as_str()))
    }

    #[cfg(test)]
    pub fn option_value(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Remove every option matching one of the given names
    pub fn remove(&mut self, names: &[&str]) -> &mut Self {
        self.options.retain(|(n, _)| !names.contains(&n.as_str()));
        self
    }

    pub fn add_targets<I, S>(&mut self, targets: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets.extend(targets.into_iter().map(Into::into));
        self
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Operation and options as command-line arguments
    pub fn format_options(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.options.len() + 1);
        if !self.op.is_empty() {
            out.push(format!("-{}", self.op));
        }
        for (name, value) in &self.options {
            if name.chars().count() == 1 {
                out.push(format!("-{}", name));
            } else {
                out.push(format!("--{}", name));
            }
            if let Some(value) = value {
                out.push(value.clone());
            }
        }
        out
    }
}
