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

//! Dependency resolution across plugins: ordering, wildcard matching, soft
//! dependencies and cycles.

mod test_support;

use strongswan_plugins::{LoadStats, PluginFeature, PluginLoader};
use test_support::{cap, ActionLog, TestAction};

#[test]
fn test_linear_chain_loads_dependency_first() {
    let log = ActionLog::new();
    let mut loader = PluginLoader::new();
    loader.add_static_features(
        "a",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("crypter", "aes")),
            PluginFeature::depends(cap("hasher", "sha1")),
        ],
        false,
    );
    loader.add_static_features(
        "b",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("hasher", "sha1")),
        ],
        false,
    );

    assert!(loader.load(""));
    assert_eq!(log.events(), vec!["load hasher sha1", "load crypter aes"]);
    assert!(loader.has_feature(&cap("crypter", "aes")));
    assert!(loader.has_feature(&cap("hasher", "sha1")));
    assert_eq!(loader.loaded_plugins(), "a b");
    assert_eq!(loader.stats(), LoadStats::default());

    loader.unload();
    assert_eq!(
        log.events(),
        vec![
            "load hasher sha1",
            "load crypter aes",
            "unload crypter aes",
            "unload hasher sha1",
        ]
    );
}

#[test]
fn test_reverse_plugin_order_resolves_identically() {
    let log = ActionLog::new();
    let mut loader = PluginLoader::new();
    loader.add_static_features(
        "b",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("hasher", "sha1")),
        ],
        false,
    );
    loader.add_static_features(
        "a",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("crypter", "aes")),
            PluginFeature::depends(cap("hasher", "sha1")),
        ],
        false,
    );

    assert!(loader.load(""));
    assert_eq!(log.events(), vec!["load hasher sha1", "load crypter aes"]);
    assert!(loader.has_feature(&cap("crypter", "aes")));
}

#[test]
fn test_wildcard_dependency_matches_any_variant() {
    let log = ActionLog::new();
    let mut loader = PluginLoader::new();
    loader.add_static_features(
        "app",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("app", "charon")),
            PluginFeature::depends(cap("db", "*")),
        ],
        false,
    );
    loader.add_static_features(
        "sqlite",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("db", "sqlite")),
        ],
        false,
    );

    assert!(loader.load(""));
    assert!(loader.has_feature(&cap("app", "charon")));
    assert!(loader.has_feature(&cap("db", "sqlite")));
    assert!(!loader.has_feature(&cap("db", "postgres")));
    assert_eq!(loader.stats(), LoadStats::default());
}

#[test]
fn test_wildcard_dependency_loads_all_matching_providers() {
    let log = ActionLog::new();
    let mut loader = PluginLoader::new();
    loader.add_static_features(
        "app",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("app", "charon")),
            PluginFeature::depends(cap("db", "*")),
        ],
        false,
    );
    loader.add_static_features(
        "sqlite",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("db", "sqlite")),
        ],
        false,
    );
    loader.add_static_features(
        "mysql",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("db", "mysql")),
        ],
        false,
    );

    assert!(loader.load(""));
    // both database backends are loaded, not just the first match
    assert!(loader.has_feature(&cap("db", "sqlite")));
    assert!(loader.has_feature(&cap("db", "mysql")));
    assert_eq!(
        log.events(),
        vec!["load db sqlite", "load db mysql", "load app charon"]
    );
}

#[test]
fn test_exact_match_preferred_over_wildcard_provider() {
    let log = ActionLog::new();
    let mut loader = PluginLoader::new();
    loader.add_static_features(
        "app",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("app", "charon")),
            PluginFeature::depends(cap("db", "sqlite")),
        ],
        false,
    );
    loader.add_static_features(
        "any-db",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("db", "*")),
        ],
        false,
    );
    loader.add_static_features(
        "sqlite",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("db", "sqlite")),
        ],
        false,
    );

    assert!(loader.load(""));
    // the exactly matching provider is resolved before the wildcard one
    let events = log.events();
    let exact = events.iter().position(|e| e == "load db sqlite").unwrap();
    let fuzzy = events.iter().position(|e| e == "load db *").unwrap();
    assert!(exact < fuzzy);
}

#[test]
fn test_soft_dependency_absence_is_tolerated() {
    let log = ActionLog::new();
    let mut loader = PluginLoader::new();
    loader.add_static_features(
        "a",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("crypter", "aes")),
            PluginFeature::soft_depend(cap("rng", "strong")),
        ],
        false,
    );

    assert!(loader.load(""));
    assert!(loader.has_feature(&cap("crypter", "aes")));
    assert_eq!(loader.stats().failed, 0);
}

#[test]
fn test_dependency_cycle_fails_both_features() {
    let log = ActionLog::new();
    let mut loader = PluginLoader::new();
    loader.add_static_features(
        "a",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("svc", "x")),
            PluginFeature::depends(cap("svc", "y")),
        ],
        false,
    );
    loader.add_static_features(
        "b",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("svc", "y")),
            PluginFeature::depends(cap("svc", "x")),
        ],
        false,
    );

    // resolution terminates and neither feature loads
    assert!(loader.load(""));
    let stats = loader.stats();
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.depends, 2);
    assert_eq!(stats.critical, 0);
    assert!(!loader.has_feature(&cap("svc", "x")));
    assert!(!loader.has_feature(&cap("svc", "y")));
    assert!(log.events().is_empty());
    // both plugins were purged for having no loaded features
    assert_eq!(loader.plugins().count(), 0);
    assert_eq!(loader.loaded_plugins(), "");
}

#[test]
fn test_dependency_cycle_in_critical_plugin_fails_load() {
    let log = ActionLog::new();
    let mut loader = PluginLoader::new();
    loader.add_static_features(
        "a",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("svc", "x")),
            PluginFeature::depends(cap("svc", "y")),
        ],
        true,
    );
    loader.add_static_features(
        "b",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("svc", "y")),
            PluginFeature::depends(cap("svc", "x")),
        ],
        false,
    );

    assert!(!loader.load(""));
    assert_eq!(loader.stats().critical, 1);
}

#[test]
fn test_unmet_hard_dependency_counts_once_per_feature() {
    let log = ActionLog::new();
    let mut loader = PluginLoader::new();
    loader.add_static_features(
        "a",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("crypter", "aes")),
            PluginFeature::depends(cap("hasher", "sha1")),
        ],
        false,
    );

    assert!(loader.load(""));
    let stats = loader.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.depends, 1);
    assert!(!loader.has_feature(&cap("crypter", "aes")));
}

#[test]
fn test_features_load_at_most_once_between_unloads() {
    let log = ActionLog::new();
    let mut loader = PluginLoader::new();
    loader.add_static_features(
        "a",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("crypter", "aes")),
        ],
        false,
    );

    assert!(loader.load(""));
    assert!(loader.load(""));
    assert_eq!(log.events(), vec!["load crypter aes"]);
}

#[test]
fn test_dependency_window_stops_at_next_provide() {
    let log = ActionLog::new();
    let mut loader = PluginLoader::new();
    // the hasher provide ends the aes dependency window; "rng strong" is a
    // dependency of the hasher, not of aes
    loader.add_static_features(
        "multi",
        &[
            PluginFeature::callback(TestAction::new(&log)),
            PluginFeature::provide(cap("crypter", "aes")),
            PluginFeature::provide(cap("hasher", "sha1")),
            PluginFeature::depends(cap("rng", "strong")),
        ],
        false,
    );

    assert!(loader.load(""));
    // aes has no dependencies and loads; the hasher's dependency is unmet
    assert!(loader.has_feature(&cap("crypter", "aes")));
    assert!(!loader.has_feature(&cap("hasher", "sha1")));
    assert_eq!(loader.stats().failed, 1);
}
