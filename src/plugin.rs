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

//! The plugin contract.
//!
//! A plugin is a named module contributing features. Plugins either live in
//! the host image (built-in, or wrapped static feature tables) or in a shared
//! object loaded at runtime.
//!
//! # Plugin Entry Point Convention
//!
//! Each plugin shared object must export a constructor named
//! `<name>_plugin_create` (with hyphens replaced by underscores) returning a
//! raw [`PluginInstance`]. For example, the `aes-gcm` plugin exports:
//!
//! ```rust,ignore
//! #[no_mangle]
//! pub extern "C" fn aes_gcm_plugin_create() -> *mut PluginInstance {
//!     PluginInstance::new(Box::new(AesGcmPlugin::default())).into_raw()
//! }
//! ```
//!
//! Returning a null pointer signals that construction failed.

use crate::feature::PluginFeature;
use std::sync::Arc;

/// A loadable plugin module.
///
/// Teardown happens through `Drop`; a plugin backed by a shared object is
/// always dropped before its library handle is released.
pub trait Plugin: Send {
    /// The unique plugin name.
    fn name(&self) -> &str;

    /// The feature table, in declaration order.
    ///
    /// Returns `None` for plugins predating the feature interface; such
    /// plugins are accepted but contribute nothing to dependency resolution.
    fn features(&self) -> Option<Arc<[PluginFeature]>> {
        None
    }

    /// Re-read configuration. Returns true if the reload was acknowledged.
    fn reload(&mut self) -> bool {
        false
    }
}

/// Wrapper presenting an in-image feature array as a plugin.
///
/// Owns its name and a copy of the feature table, so callers are free to
/// pass transient slices.
pub struct StaticPlugin {
    name: String,
    features: Arc<[PluginFeature]>,
}

impl StaticPlugin {
    pub fn new(name: impl Into<String>, features: &[PluginFeature]) -> Self {
        Self {
            name: name.into(),
            features: features.to_vec().into(),
        }
    }
}

impl Plugin for StaticPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn features(&self) -> Option<Arc<[PluginFeature]>> {
        Some(self.features.clone())
    }
}

/// Transport cell for handing a plugin across the shared-object boundary.
///
/// The constructor symbol allocates one with [`PluginInstance::into_raw`];
/// the loader takes ownership back via `Box::from_raw`. Both sides must be
/// built with the same toolchain and crate version, since a `Box<dyn Plugin>`
/// crosses the boundary inside.
pub struct PluginInstance {
    plugin: Box<dyn Plugin>,
}

impl PluginInstance {
    pub fn new(plugin: Box<dyn Plugin>) -> Self {
        Self { plugin }
    }

    /// Leak the instance for return from a plugin constructor symbol.
    pub fn into_raw(self) -> *mut PluginInstance {
        Box::into_raw(Box::new(self))
    }

    pub fn into_plugin(self) -> Box<dyn Plugin> {
        self.plugin
    }
}

/// Type of the `<name>_plugin_create` constructor symbol.
///
/// Returns null if the plugin could not be constructed.
pub type PluginConstructor = unsafe extern "C" fn() -> *mut PluginInstance;
