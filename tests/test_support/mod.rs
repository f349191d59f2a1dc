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

//! Mock capabilities, actions and plugins for loader tests.

#![allow(dead_code)]

use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use strongswan_plugins::{Capability, FeatureAction, Plugin, PluginFeature};

/// Test capability: a kind plus a variant, where the `*` variant matches any
/// variant of the same kind (like `DB_ANY` matching any database).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestCapability {
    pub kind: &'static str,
    pub variant: &'static str,
}

pub fn cap(kind: &'static str, variant: &'static str) -> TestCapability {
    TestCapability { kind, variant }
}

impl Capability for TestCapability {
    fn hash_value(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    fn equals(&self, other: &dyn Capability) -> bool {
        other.as_any().downcast_ref::<TestCapability>() == Some(self)
    }

    fn matches(&self, other: &dyn Capability) -> bool {
        other
            .as_any()
            .downcast_ref::<TestCapability>()
            .is_some_and(|other| {
                self.kind == other.kind
                    && (self.variant == "*" || other.variant == "*" || self.variant == other.variant)
            })
    }

    fn describe(&self) -> String {
        format!("{} {}", self.kind, self.variant)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Shared record of load/unload invocations, in call order.
#[derive(Default)]
pub struct ActionLog {
    events: Mutex<Vec<String>>,
}

impl ActionLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

/// Action that records every call and optionally fails to load.
pub struct TestAction {
    log: Arc<ActionLog>,
    fail_load: bool,
}

impl TestAction {
    pub fn new(log: &Arc<ActionLog>) -> Self {
        Self {
            log: log.clone(),
            fail_load: false,
        }
    }

    pub fn failing(log: &Arc<ActionLog>) -> Self {
        Self {
            log: log.clone(),
            fail_load: true,
        }
    }
}

impl FeatureAction for TestAction {
    fn load(&self, _plugin: &dyn Plugin, feature: &PluginFeature) -> bool {
        self.log.record(format!("load {}", feature.describe()));
        !self.fail_load
    }

    fn unload(&self, _plugin: &dyn Plugin, feature: &PluginFeature) -> bool {
        self.log.record(format!("unload {}", feature.describe()));
        true
    }
}

/// Plugin with a fixed feature table and a configurable reload answer.
pub struct TestPlugin {
    name: String,
    features: Arc<[PluginFeature]>,
    reload_ack: bool,
}

impl TestPlugin {
    pub fn new(name: &str, features: Vec<PluginFeature>, reload_ack: bool) -> Self {
        Self {
            name: name.to_string(),
            features: features.into(),
            reload_ack,
        }
    }
}

impl Plugin for TestPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn features(&self) -> Option<Arc<[PluginFeature]>> {
        Some(self.features.clone())
    }

    fn reload(&mut self) -> bool {
        self.reload_ack
    }
}

/// Plugin predating the feature interface.
pub struct LegacyPlugin {
    name: String,
}

impl LegacyPlugin {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Plugin for LegacyPlugin {
    fn name(&self) -> &str {
        &self.name
    }
}
