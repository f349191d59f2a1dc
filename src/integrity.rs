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

//! Optional integrity verification for shared-object plugins.
//!
//! When a checker is configured, the loader consults [`check_file`] before
//! opening a shared object and [`check_segment`] after resolving its
//! constructor symbol. Builds without integrity support simply configure no
//! checker, or use [`NullIntegrityChecker`] where an instance is required.
//!
//! [`check_file`]: IntegrityChecker::check_file
//! [`check_segment`]: IntegrityChecker::check_segment

use std::path::Path;

/// Verifies plugin files and code segments before they are trusted.
pub trait IntegrityChecker: Send + Sync {
    /// Verify the on-disk file of plugin `name` before it is opened.
    fn check_file(&self, name: &str, path: &Path) -> bool;

    /// Verify the code segment containing the resolved constructor symbol.
    fn check_segment(&self, name: &str, symbol: *const ()) -> bool;
}

/// Checker that accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIntegrityChecker;

impl IntegrityChecker for NullIntegrityChecker {
    fn check_file(&self, _name: &str, _path: &Path) -> bool {
        true
    }

    fn check_segment(&self, _name: &str, _symbol: *const ()) -> bool {
        true
    }
}
