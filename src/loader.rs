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

//! The plugin loader.
//!
//! [`PluginLoader`] owns the plugin entry table, the feature registry and the
//! loaded-order list, and drives the whole lifecycle: parse the configured
//! plugin list, instantiate each plugin (host image first, shared object as
//! fallback), register the advertised features, resolve dependencies in a
//! cycle-safe recursive pass, and tear everything down again in exact reverse
//! order.
//!
//! Failures are local: a feature that cannot be loaded is marked failed and
//! counted, and only failures in *critical* plugins make [`PluginLoader::load`]
//! return false. Plugins that end up with no loaded feature are purged at the
//! end of every load pass.

use crate::config::parse_plugin_list;
use crate::dynamic_loading;
use crate::feature::{feature_load, feature_unload, Capability, FeatureAction, PluginFeature};
use crate::integrity::IntegrityChecker;
use crate::plugin::{Plugin, StaticPlugin};
use crate::registry::{FeatureRegistry, ProviderId};
use indexmap::IndexMap;
use libloading::Library;
use log::{debug, error, trace, warn, Level};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Filename prefix of shared-object plugins: `libstrongswan-<name>.so`.
const PLUGIN_FILE_PREFIX: &str = "libstrongswan-";

/// Statistics collected while loading features.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    /// Number of features that failed to load.
    pub failed: usize,
    /// Number of features that failed because of unmet dependencies.
    pub depends: usize,
    /// Number of features in critical plugins that failed to load.
    pub critical: usize,
}

/// One capability offered by one plugin.
struct ProvidedFeature {
    /// Name of the owning plugin entry.
    entry: String,

    /// The provided capability.
    cap: Arc<dyn Capability>,

    /// The owning plugin's feature table; the entries after `index` up to the
    /// first non-dependency form this feature's dependency window.
    features: Arc<[PluginFeature]>,

    /// Position of the provide entry in `features`.
    index: usize,

    /// Registration procedure in effect for this provide, if any.
    reg: Option<Arc<dyn FeatureAction>>,

    /// Set along the active resolution chain only; the cycle guard.
    loading: bool,

    loaded: bool,

    failed: bool,
}

impl ProvidedFeature {
    fn provide(&self) -> &PluginFeature {
        &self.features[self.index]
    }

    fn loadable(&self) -> bool {
        !self.loading && !self.loaded && !self.failed
    }
}

/// Entry for one plugin.
///
/// Field order matters: the plugin instance must drop before the library
/// handle that its code lives in.
struct PluginEntry {
    plugin: Box<dyn Plugin>,

    /// Shared-object handle, if the plugin was loaded from a file.
    handle: Option<Library>,

    critical: bool,

    /// Providers of this entry, in feature-table order.
    features: Vec<ProviderId>,
}

/// Discovers, registers and loads plugins and their features.
pub struct PluginLoader {
    /// Plugin entries, in load-list order.
    plugins: IndexMap<String, PluginEntry>,

    /// Provider arena. Slots are vacated at unregistration so no descriptor
    /// of an unloaded shared object outlives its handle.
    providers: Vec<Option<ProvidedFeature>>,

    registry: FeatureRegistry,

    /// Successfully loaded providers in load order; drained from the back at
    /// unload so teardown runs in exact reverse order.
    loaded: Vec<ProviderId>,

    /// User-configured search paths, tried in order before the default path.
    paths: Vec<PathBuf>,

    /// Fallback plugin directory, typically the installation's plugin dir.
    default_path: Option<PathBuf>,

    integrity: Option<Arc<dyn IntegrityChecker>>,

    /// Keep shared-object handles mapped at unload so leak diagnostics can
    /// still resolve symbols.
    retain_handles: bool,

    /// Names of loaded plugins, rebuilt after every successful load.
    loaded_plugins: Option<String>,

    stats: LoadStats,
}

impl PluginLoader {
    pub fn new() -> Self {
        Self {
            plugins: IndexMap::new(),
            providers: Vec::new(),
            registry: FeatureRegistry::new(),
            loaded: Vec::new(),
            paths: Vec::new(),
            default_path: None,
            integrity: None,
            retain_handles: false,
            loaded_plugins: None,
            stats: LoadStats::default(),
        }
    }

    /// Append a directory to the plugin search path list.
    pub fn add_path(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    /// Set the fallback directory searched after the user-configured paths.
    pub fn set_default_path(&mut self, path: impl Into<PathBuf>) {
        self.default_path = Some(path.into());
    }

    /// Configure integrity verification for shared-object plugins.
    pub fn set_integrity_checker(&mut self, checker: Arc<dyn IntegrityChecker>) {
        self.integrity = Some(checker);
    }

    /// Keep shared-object handles mapped at unload, for leak diagnostics.
    pub fn set_retain_handles(&mut self, retain: bool) {
        self.retain_handles = retain;
    }

    /// For each name in the whitespace-separated `plugins` list, append
    /// `<base>/<name>/.libs` (hyphens translated to underscores) to the
    /// search paths. Convenience for running against a build tree.
    pub fn add_plugin_dirs(&mut self, base: &Path, plugins: &str) {
        for name in plugins.split_whitespace() {
            let dir = name.replace('-', "_");
            self.paths.push(base.join(dir).join(".libs"));
        }
    }

    /// Register a programmatically constructed plugin.
    ///
    /// Its features are not loaded until the next [`PluginLoader::load`] runs
    /// the resolution pass.
    pub fn add_plugin(&mut self, name: &str, plugin: Box<dyn Plugin>, critical: bool) {
        if self.plugins.contains_key(name) {
            warn!("plugin '{name}' already registered, ignoring");
            return;
        }
        self.plugins.insert(
            name.to_string(),
            PluginEntry {
                plugin,
                handle: None,
                critical,
                features: Vec::new(),
            },
        );
        self.register_features(name);
    }

    /// Wrap an in-image feature array as a plugin entry and register it.
    pub fn add_static_features(&mut self, name: &str, features: &[PluginFeature], critical: bool) {
        self.add_plugin(name, Box::new(StaticPlugin::new(name, features)), critical);
    }

    /// Load the plugins named in the whitespace-separated `list` and run the
    /// feature resolution pass over everything registered so far.
    ///
    /// A trailing `!` marks a plugin as critical. Names already present are
    /// skipped. Returns false iff a critical plugin failed to instantiate or
    /// a feature of a critical plugin failed to load.
    pub fn load(&mut self, list: &str) -> bool {
        let mut critical_failed = false;
        for spec in parse_plugin_list(list) {
            if self.plugins.contains_key(&spec.name) {
                continue;
            }
            let file = self.find_plugin_file(&spec.name);
            match dynamic_loading::load_plugin_module(
                &spec.name,
                file.as_deref(),
                self.integrity.as_deref(),
            ) {
                Ok((plugin, handle)) => {
                    self.plugins.insert(
                        spec.name.clone(),
                        PluginEntry {
                            plugin,
                            handle,
                            critical: spec.critical,
                            features: Vec::new(),
                        },
                    );
                    self.register_features(&spec.name);
                }
                Err(err) => {
                    if spec.critical {
                        error!("loading critical plugin '{}' failed: {err}", spec.name);
                        critical_failed = true;
                        break;
                    }
                    warn!("{err}");
                }
            }
        }
        if !critical_failed {
            self.load_features();
            if self.stats.critical > 0 {
                critical_failed = true;
                error!(
                    "failed to load {} critical plugin feature{}",
                    self.stats.critical,
                    if self.stats.critical == 1 { "" } else { "s" }
                );
            }
            // unload plugins that we were not able to load any features for
            self.purge_plugins();
        }
        if !critical_failed {
            self.loaded_plugins = Some(self.loaded_plugins_list());
        }
        !critical_failed
    }

    /// Unload all features and plugins, in exact reverse order of loading.
    pub fn unload(&mut self) {
        self.unload_features();
        while let Some((_, entry)) = self.plugins.pop() {
            for id in entry.features.clone() {
                self.unregister_feature(id);
            }
            Self::destroy_entry(entry, self.retain_handles);
        }
        debug_assert!(self.registry.is_empty());
        self.providers.clear();
        self.loaded.clear();
        self.loaded_plugins = None;
        self.stats = LoadStats::default();
    }

    /// Ask plugins to re-read their configuration.
    ///
    /// With a whitespace-separated `list`, only the named plugins are asked;
    /// without, all of them. Returns the number of plugins that acknowledged
    /// the reload. Reloading never re-orders or loads features.
    pub fn reload(&mut self, list: Option<&str>) -> usize {
        match list {
            None => self.reload_by_name(None),
            Some(list) => list
                .split_whitespace()
                .map(|name| self.reload_by_name(Some(name)))
                .sum(),
        }
    }

    /// Enumerate plugins together with their loaded features.
    pub fn plugins<'a>(
        &'a self,
    ) -> impl Iterator<Item = (&'a dyn Plugin, Vec<&'a PluginFeature>)> + 'a {
        self.plugins.values().map(move |entry| {
            let features = entry
                .features
                .iter()
                .filter_map(|&id| self.provider(id))
                .filter(|provided| provided.loaded)
                .map(|provided| provided.provide())
                .collect();
            (entry.plugin.as_ref(), features)
        })
    }

    /// True iff a loaded feature of any plugin matches `feature`.
    pub fn has_feature(&self, feature: &dyn Capability) -> bool {
        self.plugins.values().any(|entry| {
            entry.features.iter().any(|&id| {
                self.provider(id)
                    .is_some_and(|p| p.loaded && feature.matches(p.cap.as_ref()))
            })
        })
    }

    /// Space-separated names of the loaded plugins.
    pub fn loaded_plugins(&self) -> &str {
        self.loaded_plugins.as_deref().unwrap_or("")
    }

    /// Statistics of the most recent load passes since the last unload.
    pub fn stats(&self) -> LoadStats {
        self.stats
    }

    /// Log the loaded plugin list and failure counts at `level`.
    pub fn status(&self, level: Level) {
        if let Some(list) = &self.loaded_plugins {
            log::log!(level, "loaded plugins: {list}");
            if self.stats.failed > 0 {
                log::log!(
                    level,
                    "unable to load {} plugin feature{} ({} due to unmet dependencies)",
                    self.stats.failed,
                    if self.stats.failed == 1 { "" } else { "s" },
                    self.stats.depends
                );
            }
        }
    }

    fn provider(&self, id: ProviderId) -> Option<&ProvidedFeature> {
        self.providers.get(id).and_then(|slot| slot.as_ref())
    }

    fn provider_mut(&mut self, id: ProviderId) -> Option<&mut ProvidedFeature> {
        self.providers.get_mut(id).and_then(|slot| slot.as_mut())
    }

    /// Description, owning plugin name and criticality of a provider.
    fn provider_context(&self, id: ProviderId) -> Option<(String, String, bool)> {
        let provided = self.provider(id)?;
        let entry = self.plugins.get(&provided.entry)?;
        Some((
            provided.cap.describe(),
            entry.plugin.name().to_string(),
            entry.critical,
        ))
    }

    /// Locate the shared object for `name`: user paths first, then the
    /// default path.
    fn find_plugin_file(&self, name: &str) -> Option<PathBuf> {
        self.paths
            .iter()
            .chain(self.default_path.iter())
            .map(|dir| dir.join(format!("{PLUGIN_FILE_PREFIX}{name}.so")))
            .find(|candidate| candidate.is_file())
    }

    /// Walk the feature table of `entry_name` and register its provides.
    ///
    /// Register/callback entries set the registration context for all
    /// following provides until overwritten.
    fn register_features(&mut self, entry_name: &str) {
        let features = match self.plugins.get(entry_name) {
            Some(entry) => match entry.plugin.features() {
                Some(features) => features,
                None => {
                    warn!(
                        "plugin '{}' does not provide features, deprecated",
                        entry.plugin.name()
                    );
                    return;
                }
            },
            None => return,
        };

        let mut reg: Option<Arc<dyn FeatureAction>> = None;
        let mut new_ids = Vec::new();
        for (index, feature) in features.iter().enumerate() {
            match feature {
                PluginFeature::Provide(cap) => {
                    let id = self.providers.len();
                    self.providers.push(Some(ProvidedFeature {
                        entry: entry_name.to_string(),
                        cap: cap.clone(),
                        features: features.clone(),
                        index,
                        reg: reg.clone(),
                        loading: false,
                        loaded: false,
                        failed: false,
                    }));
                    self.registry.add_provider(cap, id);
                    new_ids.push(id);
                }
                PluginFeature::Register(action) | PluginFeature::Callback(action) => {
                    reg = Some(action.clone());
                }
                _ => {}
            }
        }
        if let Some(entry) = self.plugins.get_mut(entry_name) {
            entry.features.extend(new_ids);
        }
    }

    /// Remove a provider from its registry record and vacate its arena slot.
    ///
    /// An emptied record is removed; a record whose canonical descriptor
    /// belonged to the removed provider is rebound to the first remaining
    /// provider so lookups keep succeeding.
    fn unregister_feature(&mut self, id: ProviderId) {
        let Some(provided) = self.providers.get_mut(id).and_then(|slot| slot.take()) else {
            return;
        };
        let cap = provided.cap;

        enum Outcome {
            Remove,
            Rebind(ProviderId),
            Keep,
        }

        let outcome = match self.registry.get_mut(&cap) {
            None => return,
            Some(record) => {
                record.providers.retain(|&pid| pid != id);
                if record.providers.is_empty() {
                    Outcome::Remove
                } else if Arc::ptr_eq(&record.feature, &cap) {
                    Outcome::Rebind(record.providers[0])
                } else {
                    Outcome::Keep
                }
            }
        };

        match outcome {
            Outcome::Remove => {
                self.registry.remove(&cap);
            }
            Outcome::Rebind(survivor) => {
                if let Some(replacement) = self.provider(survivor).map(|p| p.cap.clone()) {
                    self.registry.rebind(&cap, replacement);
                }
            }
            Outcome::Keep => {}
        }
    }

    /// Run the resolution pass over every registered feature.
    ///
    /// Plugin order first, feature-table order second, so implicit
    /// dependencies can be influenced by reordering the plugin list.
    fn load_features(&mut self) {
        let all: Vec<ProviderId> = self
            .plugins
            .values()
            .flat_map(|entry| entry.features.iter().copied())
            .collect();
        for id in all {
            self.load_provided(id, 0);
        }
    }

    fn load_provided(&mut self, id: ProviderId, level: usize) {
        let Some((loading, done)) = self
            .provider(id)
            .map(|p| (p.loading, p.loaded || p.failed))
        else {
            return;
        };
        if done {
            return;
        }
        if loading {
            if let Some((desc, name, _)) = self.provider_context(id) {
                let pad = " ".repeat(level * 2);
                trace!("{pad}loop detected while loading {desc} in plugin '{name}'");
            }
            return;
        }
        if let Some((desc, name, _)) = self.provider_context(id) {
            let pad = " ".repeat(level * 2);
            trace!("{pad}loading feature {desc} in plugin '{name}'");
        }

        if let Some(p) = self.provider_mut(id) {
            p.loading = true;
        }
        self.load_feature(id, level + 1);
        if let Some(p) = self.provider_mut(id) {
            p.loading = false;
        }
    }

    fn load_feature(&mut self, id: ProviderId, level: usize) {
        if self.load_dependencies(id, level) {
            let ok = {
                let Some(provided) = self.provider(id) else { return };
                let Some(entry) = self.plugins.get(&provided.entry) else {
                    return;
                };
                feature_load(
                    entry.plugin.as_ref(),
                    provided.provide(),
                    provided.reg.as_ref(),
                )
            };
            if ok {
                if let Some(p) = self.provider_mut(id) {
                    p.loaded = true;
                }
                // kept in load order; teardown walks it from the back
                self.loaded.push(id);
                return;
            }
            if let Some((provide, name, critical)) = self.provider_context(id) {
                if critical {
                    warn!("feature {provide} in critical plugin '{name}' failed to load");
                } else {
                    debug!("feature {provide} in plugin '{name}' failed to load");
                }
            }
        } else {
            self.stats.depends += 1;
        }
        let critical = self
            .provider(id)
            .and_then(|p| self.plugins.get(&p.entry))
            .is_some_and(|entry| entry.critical);
        if let Some(p) = self.provider_mut(id) {
            p.failed = true;
        }
        if critical {
            self.stats.critical += 1;
        }
        self.stats.failed += 1;
    }

    /// Try to satisfy every dependency in the provider's window.
    fn load_dependencies(&mut self, id: ProviderId, level: usize) -> bool {
        let Some((features, index)) = self.provider(id).map(|p| (p.features.clone(), p.index))
        else {
            return false;
        };
        for slot in features.iter().skip(index + 1) {
            let (dependency, soft) = match slot {
                PluginFeature::Depends(cap) => (cap, false),
                PluginFeature::SoftDepend(cap) => (cap, true),
                _ => break,
            };

            // Load every loadable provider that can satisfy the dependency,
            // even if a compatible one is already loaded; a feature loaded
            // in between could otherwise bind the wrong implementation.
            // Exact equality wins over fuzzy matches, and a wildcard
            // dependency may need all matching records loaded.
            loop {
                let record = self
                    .find_loadable_record(dependency, true)
                    .or_else(|| self.find_loadable_record(dependency, false));
                let Some(provider_ids) = record else { break };
                for pid in provider_ids {
                    self.load_provided(pid, level);
                }
            }

            if !self.has_loaded_match(dependency) {
                let Some((provide, name, critical)) = self.provider_context(id) else {
                    return false;
                };
                let depend = dependency.describe();
                if soft {
                    let pad = " ".repeat(level * 2);
                    trace!(
                        "{pad}feature {provide} in plugin '{name}' has unmet soft dependency: {depend}"
                    );
                    continue;
                }
                if critical {
                    warn!(
                        "feature {provide} in critical plugin '{name}' has unmet dependency: {depend}"
                    );
                } else {
                    debug!("feature {provide} in plugin '{name}' has unmet dependency: {depend}");
                }
                return false;
            }
        }
        true
    }

    /// First record compatible with `dependency` that still has a loadable
    /// provider. `exact` selects the equality relation, otherwise fuzzy
    /// matching is used.
    fn find_loadable_record(
        &self,
        dependency: &Arc<dyn Capability>,
        exact: bool,
    ) -> Option<Vec<ProviderId>> {
        let providers = &self.providers;
        self.registry
            .find(|record| {
                let compatible = if exact {
                    dependency.equals(record.feature.as_ref())
                } else {
                    dependency.matches(record.feature.as_ref())
                };
                compatible
                    && record.providers.iter().any(|&pid| {
                        providers
                            .get(pid)
                            .and_then(|slot| slot.as_ref())
                            .is_some_and(|p| p.loadable())
                    })
            })
            .map(|record| record.providers.clone())
    }

    /// True iff a loaded provider satisfies `dependency`.
    fn has_loaded_match(&self, dependency: &Arc<dyn Capability>) -> bool {
        let providers = &self.providers;
        self.registry
            .find(|record| {
                dependency.matches(record.feature.as_ref())
                    && record.providers.iter().any(|&pid| {
                        providers
                            .get(pid)
                            .and_then(|slot| slot.as_ref())
                            .is_some_and(|p| p.loaded)
                    })
            })
            .is_some()
    }

    /// Unload features from the back of the loaded list, i.e. in exact
    /// reverse load order, unregistering each as it goes.
    fn unload_features(&mut self) {
        while let Some(id) = self.loaded.pop() {
            {
                let Some(provided) = self.provider(id) else { continue };
                if let Some(entry) = self.plugins.get(&provided.entry) {
                    let _ = feature_unload(
                        entry.plugin.as_ref(),
                        provided.provide(),
                        provided.reg.as_ref(),
                    );
                }
            }
            let entry_name = self.provider(id).map(|p| p.entry.clone());
            if let Some(name) = entry_name {
                if let Some(entry) = self.plugins.get_mut(&name) {
                    entry.features.retain(|&pid| pid != id);
                }
            }
            self.unregister_feature(id);
        }
    }

    /// Remove entries that contributed no loaded feature.
    ///
    /// Plugins without the feature interface are kept.
    fn purge_plugins(&mut self) {
        let names: Vec<String> = self
            .plugins
            .iter()
            .filter(|(_, entry)| entry.plugin.features().is_some())
            .filter(|(_, entry)| {
                !entry
                    .features
                    .iter()
                    .any(|&id| self.provider(id).is_some_and(|p| p.loaded))
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in names {
            if let Some(entry) = self.plugins.shift_remove(&name) {
                debug!(
                    "unloading plugin '{}' without loaded features",
                    entry.plugin.name()
                );
                for id in entry.features.clone() {
                    self.unregister_feature(id);
                }
                Self::destroy_entry(entry, false);
            }
        }
    }

    fn destroy_entry(mut entry: PluginEntry, retain_handle: bool) {
        if retain_handle {
            if let Some(handle) = entry.handle.take() {
                // keep the mapping alive so leak reports can resolve symbols
                std::mem::forget(handle);
            }
        }
        // entry drops here: plugin instance first, then the handle
    }

    fn reload_by_name(&mut self, name: Option<&str>) -> usize {
        let mut reloaded = 0;
        for entry in self.plugins.values_mut() {
            if name.is_none() || name == Some(entry.plugin.name()) {
                if entry.plugin.reload() {
                    debug!(
                        "reloaded configuration of '{}' plugin",
                        entry.plugin.name()
                    );
                    reloaded += 1;
                }
            }
        }
        reloaded
    }

    fn loaded_plugins_list(&self) -> String {
        self.plugins
            .values()
            .map(|entry| entry.plugin.name())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PluginLoader {
    fn drop(&mut self) {
        // reverse-order teardown; also guarantees no descriptor outlives the
        // shared object it came from
        self.unload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_loader_is_empty() {
        let loader = PluginLoader::new();
        assert_eq!(loader.loaded_plugins(), "");
        assert_eq!(loader.stats(), LoadStats::default());
        assert_eq!(loader.plugins().count(), 0);
    }

    #[test]
    fn test_empty_list_loads_successfully() {
        let mut loader = PluginLoader::new();
        assert!(loader.load(""));
        assert_eq!(loader.loaded_plugins(), "");
    }

    #[test]
    fn test_add_plugin_dirs_translates_hyphens() {
        let mut loader = PluginLoader::new();
        loader.add_plugin_dirs(Path::new("/build"), "aes-gcm sqlite");
        assert_eq!(
            loader.paths,
            vec![
                PathBuf::from("/build/aes_gcm/.libs"),
                PathBuf::from("/build/sqlite/.libs"),
            ]
        );
    }

    #[test]
    fn test_duplicate_static_name_is_ignored() {
        let mut loader = PluginLoader::new();
        loader.add_static_features("dup", &[], false);
        loader.add_static_features("dup", &[], true);
        assert_eq!(loader.plugins.len(), 1);
        assert!(!loader.plugins["dup"].critical);
    }

    #[test]
    fn test_status_without_load_logs_nothing() {
        // status is a no-op until a successful load built the display string
        let loader = PluginLoader::new();
        loader.status(Level::Info);
    }
}
