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

//! Plugin loader for the strongSwan IKE library stack.
//!
//! Plugins advertise capabilities through feature tables; the loader
//! registers every advertised capability, resolves inter-feature
//! dependencies (including wildcard dependencies and dependency cycles) and
//! activates features in a valid topological order. Teardown runs in exact
//! reverse order. Failures stay local to the affected feature unless the
//! owning plugin was marked critical.

pub mod config;
pub mod dynamic_loading;
pub mod feature;
pub mod global;
pub mod integrity;
pub mod loader;
pub mod plugin;
mod registry;

// Main exports for library users
pub use config::{load_settings_file, parse_plugin_list, ConfigError, LoaderSettings, PluginSpec};
pub use feature::{
    feature_load, feature_unload, Capability, FeatureAction, FeatureKind, PluginFeature,
};
pub use global::global_loader;
pub use integrity::{IntegrityChecker, NullIntegrityChecker};
pub use loader::{LoadStats, PluginLoader};
pub use plugin::{Plugin, PluginConstructor, PluginInstance, StaticPlugin};
