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

//! The feature registry.
//!
//! Maps capability descriptors to the providers offering them. Keys use the
//! externally injected `hash_value`/`equals`, so lookups are by capability
//! value, never by descriptor identity. Records keep registration order and
//! the registry itself iterates in insertion order, which keeps dependency
//! resolution reproducible.

use crate::feature::Capability;
use indexmap::IndexMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Index of a provided feature in the loader's provider arena.
pub(crate) type ProviderId = usize;

/// Hash/equality adapter keying records by capability value.
struct FeatureKey(Arc<dyn Capability>);

impl PartialEq for FeatureKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.equals(other.0.as_ref())
    }
}

impl Eq for FeatureKey {}

impl Hash for FeatureKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash_value());
    }
}

/// A registered capability and every provider offering it.
pub(crate) struct RegisteredFeature {
    /// Canonical descriptor used for matching. Rebound to a surviving
    /// provider's descriptor when the current one is unregistered.
    pub feature: Arc<dyn Capability>,

    /// Providers of this capability, in registration order.
    pub providers: Vec<ProviderId>,
}

/// Registry of all provided capabilities, keyed by value.
#[derive(Default)]
pub(crate) struct FeatureRegistry {
    records: IndexMap<FeatureKey, RegisteredFeature>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Add a provider under the record for `capability`, creating the record
    /// if this is the first provider.
    pub fn add_provider(&mut self, capability: &Arc<dyn Capability>, id: ProviderId) {
        let record = self
            .records
            .entry(FeatureKey(capability.clone()))
            .or_insert_with(|| RegisteredFeature {
                feature: capability.clone(),
                providers: Vec::new(),
            });
        record.providers.push(id);
    }

    /// Exact lookup by capability value.
    pub fn get_mut(&mut self, capability: &Arc<dyn Capability>) -> Option<&mut RegisteredFeature> {
        self.records.get_mut(&FeatureKey(capability.clone()))
    }

    /// Remove the record for `capability`, keeping registration order of the
    /// remaining records.
    pub fn remove(&mut self, capability: &Arc<dyn Capability>) -> Option<RegisteredFeature> {
        self.records.shift_remove(&FeatureKey(capability.clone()))
    }

    /// Re-key the record for `capability` under `replacement`.
    ///
    /// Used when the provider owning the canonical descriptor is
    /// unregistered: both the record and its key move to the surviving
    /// descriptor, so by-value lookups keep succeeding after the original
    /// plugin is gone.
    pub fn rebind(&mut self, capability: &Arc<dyn Capability>, replacement: Arc<dyn Capability>) {
        if let Some(mut record) = self.records.shift_remove(&FeatureKey(capability.clone())) {
            record.feature = replacement.clone();
            self.records.insert(FeatureKey(replacement), record);
        }
    }

    /// First record satisfying `predicate`, in registration order.
    pub fn find(
        &self,
        predicate: impl Fn(&RegisteredFeature) -> bool,
    ) -> Option<&RegisteredFeature> {
        self.records.values().find(|record| predicate(record))
    }
}
