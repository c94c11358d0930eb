/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

#![warn(rust_2018_idioms)]

//! Synchronization core for a multi-account task manager: content-based
//! deduplication, conflict resolution, and push/pull/bidirectional sync
//! across a local embedded store, zero or more replicated remotes, and an
//! upstream Google Tasks account.

pub mod account;
pub mod config;
pub mod deletion_log;
pub mod error;
pub mod fingerprint;
pub mod google;
pub mod model;
pub mod store;
pub mod sync;

pub use account::AccountManager;
pub use config::{Config, ConfigStore};
pub use error::{Error, Result};
pub use fingerprint::{fingerprint, Fingerprint};
pub use google::GoogleClient;
pub use model::*;
pub use store::{LocalStore, RemoteStore, TaskFilter, TaskStore};
pub use sync::{ConflictResolver, SyncEngine, SyncRegistry};
