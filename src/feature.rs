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

//! Plugin feature descriptors.
//!
//! A plugin describes what it offers through an ordered table of
//! [`PluginFeature`] entries. The table is interpreted positionally:
//!
//! - `Provide` announces one capability. The `Depends`/`SoftDepend` entries
//!   immediately following it (up to the next entry of any other kind) form
//!   the dependency window of that capability.
//! - `Register`/`Callback` set the registration procedure for all `Provide`
//!   entries that follow, until overwritten by another `Register`/`Callback`.
//!
//! The loader never interprets capability payloads itself. Equality, fuzzy
//! matching and hashing are injected through the [`Capability`] trait, and
//! the actual register/unregister work is injected through [`FeatureAction`],
//! so the loader stays oblivious to what a capability means.

use crate::plugin::Plugin;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Kind of a feature table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    /// Announces a capability offered by the plugin.
    Provide,
    /// Sets the registration procedure for subsequent provides.
    Register,
    /// Sets a plain callback procedure for subsequent provides.
    Callback,
    /// Hard dependency of the preceding provide.
    Depends,
    /// Soft dependency of the preceding provide; absence is tolerated.
    SoftDepend,
}

/// An opaque capability signature, e.g. "symmetric cipher AES-128-CBC".
///
/// Implementations define both the exact equality used to group providers in
/// the registry and the wildcard-aware `matches` relation used during
/// dependency resolution. `equals` must imply `matches`, and `hash_value`
/// must agree with `equals`.
pub trait Capability: fmt::Debug + Send + Sync {
    /// Hash consistent with [`Capability::equals`].
    fn hash_value(&self) -> u64;

    /// Exact, bit-for-bit capability equality.
    fn equals(&self, other: &dyn Capability) -> bool;

    /// Wildcard-aware compatibility, e.g. `db *` matches any database.
    fn matches(&self, other: &dyn Capability) -> bool {
        self.equals(other)
    }

    /// Human-readable rendering for diagnostics.
    fn describe(&self) -> String;

    /// Downcast support for implementors of `equals`/`matches`.
    fn as_any(&self) -> &dyn Any;
}

/// The external register/unregister procedure carried by a
/// [`PluginFeature::Register`] or [`PluginFeature::Callback`] entry.
pub trait FeatureAction: Send + Sync {
    /// Activate `feature` of `plugin`. Returns false if activation failed.
    fn load(&self, plugin: &dyn Plugin, feature: &PluginFeature) -> bool;

    /// Deactivate `feature` of `plugin`.
    fn unload(&self, plugin: &dyn Plugin, feature: &PluginFeature) -> bool;
}

/// One slot in a plugin's feature table.
#[derive(Clone)]
pub enum PluginFeature {
    Provide(Arc<dyn Capability>),
    Register(Arc<dyn FeatureAction>),
    Callback(Arc<dyn FeatureAction>),
    Depends(Arc<dyn Capability>),
    SoftDepend(Arc<dyn Capability>),
}

impl PluginFeature {
    /// Announce a capability.
    pub fn provide<C: Capability + 'static>(capability: C) -> Self {
        Self::Provide(Arc::new(capability))
    }

    /// Set the registration procedure for subsequent provides.
    pub fn register<A: FeatureAction + 'static>(action: A) -> Self {
        Self::Register(Arc::new(action))
    }

    /// Set a callback procedure for subsequent provides.
    pub fn callback<A: FeatureAction + 'static>(action: A) -> Self {
        Self::Callback(Arc::new(action))
    }

    /// Declare a hard dependency of the preceding provide.
    pub fn depends<C: Capability + 'static>(capability: C) -> Self {
        Self::Depends(Arc::new(capability))
    }

    /// Declare a soft dependency of the preceding provide.
    pub fn soft_depend<C: Capability + 'static>(capability: C) -> Self {
        Self::SoftDepend(Arc::new(capability))
    }

    pub fn kind(&self) -> FeatureKind {
        match self {
            Self::Provide(_) => FeatureKind::Provide,
            Self::Register(_) => FeatureKind::Register,
            Self::Callback(_) => FeatureKind::Callback,
            Self::Depends(_) => FeatureKind::Depends,
            Self::SoftDepend(_) => FeatureKind::SoftDepend,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Provide(cap) | Self::Depends(cap) | Self::SoftDepend(cap) => cap.describe(),
            Self::Register(_) => "register".to_string(),
            Self::Callback(_) => "callback".to_string(),
        }
    }
}

impl fmt::Debug for PluginFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind(), self.describe())
    }
}

/// Run the registration procedure of a provided feature.
///
/// A provide without a preceding register/callback entry has nothing to do
/// and loads trivially.
pub fn feature_load(
    plugin: &dyn Plugin,
    feature: &PluginFeature,
    reg: Option<&Arc<dyn FeatureAction>>,
) -> bool {
    match reg {
        Some(action) => action.load(plugin, feature),
        None => true,
    }
}

/// Run the unregistration procedure of a provided feature.
pub fn feature_unload(
    plugin: &dyn Plugin,
    feature: &PluginFeature,
    reg: Option<&Arc<dyn FeatureAction>>,
) -> bool {
    match reg {
        Some(action) => action.unload(plugin, feature),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    #[derive(Debug, PartialEq, Eq, Hash)]
    struct NamedCap(&'static str);

    impl Capability for NamedCap {
        fn hash_value(&self) -> u64 {
            let mut hasher = DefaultHasher::new();
            self.0.hash(&mut hasher);
            hasher.finish()
        }
        fn equals(&self, other: &dyn Capability) -> bool {
            other.as_any().downcast_ref::<NamedCap>() == Some(self)
        }
        fn describe(&self) -> String {
            self.0.to_string()
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(PluginFeature::provide(NamedCap("x")).kind(), FeatureKind::Provide);
        assert_eq!(PluginFeature::depends(NamedCap("x")).kind(), FeatureKind::Depends);
        assert_eq!(
            PluginFeature::soft_depend(NamedCap("x")).kind(),
            FeatureKind::SoftDepend
        );
    }

    #[test]
    fn test_matches_defaults_to_equals() {
        let a = NamedCap("x");
        let b = NamedCap("x");
        let c = NamedCap("y");
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }

    #[test]
    fn test_describe_and_debug() {
        let feature = PluginFeature::provide(NamedCap("cipher aes"));
        assert_eq!(feature.describe(), "cipher aes");
        assert_eq!(format!("{feature:?}"), "Provide(cipher aes)");
    }
}
