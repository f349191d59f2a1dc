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

//! Process-wide loader instance.
//!
//! A convenience layer for hosts that want a single shared loader; the core
//! [`PluginLoader`] is instance-owned and fully usable without it.

use crate::loader::PluginLoader;
use std::sync::{Mutex, OnceLock};

static GLOBAL_LOADER: OnceLock<Mutex<PluginLoader>> = OnceLock::new();

/// Get or lazily initialize the process-wide plugin loader.
pub fn global_loader() -> &'static Mutex<PluginLoader> {
    GLOBAL_LOADER.get_or_init(|| Mutex::new(PluginLoader::new()))
}
