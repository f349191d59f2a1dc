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

//! Dynamic plugin loading from shared objects.
//!
//! This module resolves a plugin's constructor symbol and produces the plugin
//! instance. Resolution prefers the host image: plugins linked into the
//! running binary need no shared object at all.
//!
//! # Loading Sequence
//!
//! 1. **Derive the symbol name**: `<name>_plugin_create`, with hyphens in the
//!    plugin name replaced by underscores.
//!
//! 2. **Host image lookup**: If the symbol resolves in the host image, the
//!    constructor is invoked directly and no file is opened. Integrity
//!    checking does not apply to the host image.
//!
//! 3. **Shared object fallback**: Otherwise, if a candidate file was located
//!    on the search paths, it is verified against the configured
//!    [`IntegrityChecker`] (if any), opened with lazy symbol binding, and the
//!    symbol is resolved from the new handle. The resolved constructor's
//!    segment is then verified as well.
//!
//! 4. **Construction**: The constructor returns a raw [`PluginInstance`]
//!    (null meaning failure), which the loader takes ownership of.
//!
//! # Safety
//!
//! Invoking a constructor from a shared object relies on the plugin being
//! compiled with the same Rust toolchain and crate version as the host, since
//! a `Box<dyn Plugin>` crosses the boundary. The integrity checker hook
//! exists to let deployments enforce that contract cryptographically.

use crate::integrity::IntegrityChecker;
use crate::plugin::{Plugin, PluginConstructor};
use libloading::Library;
use log::debug;
use std::path::Path;
use thiserror::Error;

/// Suffix appended to the translated plugin name to form the constructor
/// symbol.
const PLUGIN_CREATE_SUFFIX: &str = "_plugin_create";

/// Why a plugin module could not be produced.
#[derive(Debug, Error)]
pub enum PluginLoadError {
    /// No constructor symbol in the host image and no file to fall back to,
    /// or the opened shared object does not export the symbol.
    #[error("plugin '{name}': no constructor '{symbol}' found")]
    ConstructorNotFound { name: String, symbol: String },

    /// The constructor ran but returned null.
    #[error("plugin '{name}': failed to load - {symbol} returned null")]
    ConstructorFailed { name: String, symbol: String },

    /// The shared object failed the file integrity test.
    #[error("plugin '{name}': failed file integrity test of '{path}'")]
    FileIntegrity { name: String, path: String },

    /// The resolved constructor failed the segment integrity test.
    #[error("plugin '{name}': failed segment integrity test")]
    SegmentIntegrity { name: String },

    /// The shared object could not be opened.
    #[error("plugin '{name}' failed to load: {source}")]
    OpenFailed {
        name: String,
        #[source]
        source: libloading::Error,
    },
}

/// Derive the constructor symbol name from a plugin name.
///
/// Convention: `aes-gcm` → `aes_gcm_plugin_create`.
pub fn constructor_symbol(name: &str) -> String {
    format!("{}{}", name.replace('-', "_"), PLUGIN_CREATE_SUFFIX)
}

/// Resolve and invoke a plugin constructor, preferring the host image.
///
/// Returns the plugin together with the shared-object handle that must stay
/// open for the plugin's lifetime (`None` for in-image plugins). This is the
/// low-level entry point used by [`crate::PluginLoader`]; hosts with their
/// own entry bookkeeping can call it directly.
pub fn load_plugin_module(
    name: &str,
    file: Option<&Path>,
    integrity: Option<&dyn IntegrityChecker>,
) -> Result<(Box<dyn Plugin>, Option<Library>), PluginLoadError> {
    let symbol = constructor_symbol(name);

    if let Some(constructor) = host_constructor(&symbol) {
        let plugin = construct(name, &symbol, constructor)?;
        debug!("plugin '{name}': loaded from host image");
        return Ok((plugin, None));
    }

    let Some(path) = file else {
        return Err(PluginLoadError::ConstructorNotFound {
            name: name.to_string(),
            symbol,
        });
    };

    if let Some(checker) = integrity {
        if !checker.check_file(name, path) {
            return Err(PluginLoadError::FileIntegrity {
                name: name.to_string(),
                path: path.display().to_string(),
            });
        }
    }

    let library = open_lazy(path).map_err(|source| PluginLoadError::OpenFailed {
        name: name.to_string(),
        source,
    })?;

    let Some(constructor) = library_constructor(&library, &symbol) else {
        return Err(PluginLoadError::ConstructorNotFound {
            name: name.to_string(),
            symbol,
        });
    };

    if let Some(checker) = integrity {
        if !checker.check_segment(name, constructor as *const ()) {
            return Err(PluginLoadError::SegmentIntegrity {
                name: name.to_string(),
            });
        }
        debug!("plugin '{name}': passed file and segment integrity tests");
    }

    let plugin = construct(name, &symbol, constructor)?;
    debug!("plugin '{name}': loaded from '{}'", path.display());
    Ok((plugin, Some(library)))
}

/// Invoke a resolved constructor and take ownership of the plugin.
fn construct(
    name: &str,
    symbol: &str,
    constructor: PluginConstructor,
) -> Result<Box<dyn Plugin>, PluginLoadError> {
    // SAFETY: The symbol was resolved under the plugin entry point
    // convention; same-toolchain compilation is a documented requirement for
    // shared-object plugins.
    let raw = unsafe { constructor() };
    if raw.is_null() {
        return Err(PluginLoadError::ConstructorFailed {
            name: name.to_string(),
            symbol: symbol.to_string(),
        });
    }
    // SAFETY: A non-null return was produced by `PluginInstance::into_raw`.
    let instance = unsafe { Box::from_raw(raw) };
    Ok(instance.into_plugin())
}

/// Look up a constructor symbol in the host image.
fn host_constructor(symbol: &str) -> Option<PluginConstructor> {
    #[cfg(unix)]
    {
        let this = libloading::os::unix::Library::this();
        // SAFETY: The symbol type is fixed by the entry point convention.
        let constructor = unsafe { this.get::<PluginConstructor>(symbol.as_bytes()) }
            .map(|sym| *sym)
            .ok();
        // The process handle stays open; the host image never unloads, so the
        // resolved pointer remains valid.
        std::mem::forget(this);
        constructor
    }

    #[cfg(windows)]
    {
        let this = libloading::os::windows::Library::this().ok()?;
        // SAFETY: The symbol type is fixed by the entry point convention.
        let constructor = unsafe { this.get::<PluginConstructor>(symbol.as_bytes()) }
            .map(|sym| *sym)
            .ok();
        std::mem::forget(this);
        constructor
    }
}

/// Open a shared object with lazy symbol binding.
fn open_lazy(path: &Path) -> Result<Library, libloading::Error> {
    #[cfg(unix)]
    {
        // SAFETY: Loading a shared library runs its initializers; the caller
        // gates this behind the integrity checker when one is configured.
        let library = unsafe {
            libloading::os::unix::Library::open(Some(path), libloading::os::unix::RTLD_LAZY)?
        };
        Ok(Library::from(library))
    }

    #[cfg(windows)]
    {
        // SAFETY: See above; Windows has no lazy-binding flag to request.
        unsafe { Library::new(path) }
    }
}

/// Look up a constructor symbol in an opened shared object.
fn library_constructor(library: &Library, symbol: &str) -> Option<PluginConstructor> {
    // SAFETY: The symbol type is fixed by the entry point convention.
    unsafe { library.get::<PluginConstructor>(symbol.as_bytes()) }
        .map(|sym| *sym)
        .ok()
}
