// Copyright 2025 The Drasi Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Loader configuration.
//!
//! The plugin list itself is a plain whitespace-separated string — the same
//! surface the rest of the stack has always used — with a trailing `!`
//! marking a plugin as critical. [`LoaderSettings`] wraps that list together
//! with the path configuration into a file-loadable structure (YAML, with
//! JSON accepted as a fallback).

use crate::loader::PluginLoader;
use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// One parsed token of the plugin list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSpec {
    pub name: String,
    /// Set by a trailing `!` on the token.
    pub critical: bool,
}

/// Parse a whitespace-separated plugin list.
///
/// `"aes sha2 sqlite!"` yields `aes` and `sha2` as regular plugins and
/// `sqlite` as critical.
pub fn parse_plugin_list(list: &str) -> Vec<PluginSpec> {
    list.split_whitespace()
        .map(|token| match token.strip_suffix('!') {
            Some(name) => PluginSpec {
                name: name.to_string(),
                critical: true,
            },
            None => PluginSpec {
                name: token.to_string(),
                critical: false,
            },
        })
        .collect()
}

/// Unified error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config file '{path}': YAML error: {yaml_err}, JSON error: {json_err}")]
    ParseError {
        path: String,
        yaml_err: String,
        json_err: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(#[from] anyhow::Error),
}

/// File-loadable loader settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoaderSettings {
    /// Whitespace-separated plugin list; trailing `!` marks critical plugins.
    #[serde(default)]
    pub plugins: String,

    /// Directories searched for `libstrongswan-<name>.so`, in order, before
    /// the default directory.
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    /// Fallback plugin directory.
    #[serde(default)]
    pub plugin_dir: Option<PathBuf>,

    /// Keep shared-object handles mapped at unload, for leak diagnostics.
    #[serde(default)]
    pub retain_handles: bool,
}

impl LoaderSettings {
    /// Check the settings for values the loader cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        for spec in parse_plugin_list(&self.plugins) {
            if spec.name.is_empty() {
                bail!("plugin list contains an empty name");
            }
            if spec.name.contains(['/', '\\']) {
                bail!(
                    "plugin name '{}' must not contain path separators",
                    spec.name
                );
            }
        }
        Ok(())
    }

    /// Apply paths and flags to a loader. The plugin list itself is passed to
    /// [`PluginLoader::load`] by the caller.
    pub fn apply_to(&self, loader: &mut PluginLoader) {
        for path in &self.paths {
            loader.add_path(path.clone());
        }
        if let Some(dir) = &self.plugin_dir {
            loader.set_default_path(dir.clone());
        }
        loader.set_retain_handles(self.retain_handles);
    }
}

/// Load [`LoaderSettings`] from a file, trying YAML first and JSON second.
pub fn load_settings_file<P: AsRef<Path>>(path: P) -> Result<LoaderSettings, ConfigError> {
    let path_ref = path.as_ref();
    let content = fs::read_to_string(path_ref)?;

    let settings = match serde_yaml::from_str::<LoaderSettings>(&content) {
        Ok(settings) => settings,
        Err(yaml_err) => match serde_json::from_str::<LoaderSettings>(&content) {
            Ok(settings) => settings,
            Err(json_err) => {
                return Err(ConfigError::ParseError {
                    path: path_ref.display().to_string(),
                    yaml_err: yaml_err.to_string(),
                    json_err: json_err.to_string(),
                });
            }
        },
    };

    settings.validate()?;
    Ok(settings)
}
