/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The account-scoped storage contract shared by [`LocalStore`] and
//! [`RemoteStore`].

pub mod local;
pub mod remote;
pub mod schema;

pub use local::LocalStore;
pub use remote::RemoteStore;

use crate::error::Result;
use crate::model::{DeletionLogEntry, RemoteDbConfig, Task, TaskStatus};
use std::collections::HashMap;
use tasksync_guid::Guid;

/// Optional filter for [`TaskStore::load_tasks`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub tasklist_id: Option<Guid>,
    pub modified_since: Option<chrono::DateTime<chrono::Utc>>,
}

/// The contract both `LocalStore` and `RemoteStore` satisfy:
/// account-scoped, transactional single-row operations plus a bulk snapshot.
pub trait TaskStore {
    fn load_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>>;
    fn get_task(&self, id: &Guid) -> Result<Option<Task>>;

    /// Upsert by id. Sets `modified_at = now()` if the caller left it
    /// default, and fails `Error::Conflict` if a concurrent writer advanced
    /// `modified_at` past what this caller last read (optimistic
    /// concurrency).
    fn save_task(&self, task: &Task) -> Result<Task>;

    /// Atomic bulk upsert: either all rows apply or none.
    fn save_tasks(&self, tasks: &[Task]) -> Result<Vec<Task>>;

    /// Soft delete: sets `status = deleted`, stamps `modified_at`, and
    /// appends a `DeletionLogEntry` in the same transaction.
    fn delete_task(&self, id: &Guid, reason: &str) -> Result<()>;

    /// Physically remove a row after upstream confirms the deletion. A task
    /// is destroyed only by passing through status `deleted` for at least
    /// one sync cycle before physical removal.
    fn purge_task(&self, id: &Guid) -> Result<()>;

    fn load_list_mapping(&self) -> Result<HashMap<String, Guid>>;
    fn save_list_mapping(&self, mapping: &HashMap<String, Guid>) -> Result<()>;

    fn load_remote_dbs(&self) -> Result<Vec<RemoteDbConfig>>;
    fn save_remote_dbs(&self, dbs: &[RemoteDbConfig]) -> Result<()>;

    fn deletion_log(&self) -> Result<Vec<DeletionLogEntry>>;

    fn task_count(&self) -> Result<i64>;
}
