/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Restore support for [`DeletionLogEntry`] rows: the log itself is the
//! `deletion_log` table written transactionally by `store::local`/
//! `store::remote`; this module only rebuilds a [`Task`] from a logged entry
//! and hands it back to a store.

use crate::error::Result;
use crate::model::{DeletionLogEntry, Task, TaskStatus};
use crate::store::TaskStore;
use chrono::Utc;

/// Rebuilds a task from its deletion-log entry and re-saves it with status
/// `pending`. The caller decides whether to then push the restored task
/// upstream; a restored task has no known Google mapping until it does.
pub fn restore(store: &dyn TaskStore, entry: &DeletionLogEntry) -> Result<Task> {
    let now = Utc::now();
    let task = Task {
        id: entry.task_id.clone(),
        google_task_id: None,
        title: entry.title.clone(),
        description: entry.description.clone(),
        notes: None,
        due: entry.due,
        status: TaskStatus::Pending,
        priority: crate::model::Priority::Medium,
        project: None,
        tags: Vec::new(),
        dependencies: Vec::new(),
        tasklist_id: entry.tasklist_id.clone(),
        list_title: String::new(),
        position: 0,
        created_at: now,
        modified_at: now,
        completed_at: None,
        recurrence_rule: None,
        is_recurring: false,
        recurring_task_id: None,
        estimated_duration: None,
        actual_duration: None,
    };
    store.save_task(&task)
}

/// Restores every logged deletion for `task_id`, in case of repeated
/// delete/restore cycles on the same id; returns the last-restored task.
pub fn restore_all_for_task(store: &dyn TaskStore, task_id: &tasksync_guid::Guid) -> Result<Vec<Task>> {
    store
        .deletion_log()?
        .iter()
        .filter(|e| &e.task_id == task_id)
        .map(|e| restore(store, e))
        .collect()
}
