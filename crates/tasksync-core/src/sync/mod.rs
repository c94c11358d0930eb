/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Orchestration layer: resolves conflicts, drives push/pull/bidirectional
//! sync, and tracks running jobs.

pub mod engine;
pub mod registry;
pub mod resolver;

pub use engine::SyncEngine;
pub use registry::SyncRegistry;
pub use resolver::ConflictResolver;
