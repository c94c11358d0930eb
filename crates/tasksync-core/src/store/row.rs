/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! A backend-neutral row shape shared by `LocalStore` (reads straight from
//! `rusqlite::Row`) and `RemoteStore` (reads from a JSON object the libSQL
//! HTTP wire hands back). Both speak the same SQL dialect over the same
//! logical schema, so the column set and conversions live here once.

use crate::error::{Error, Result};
use crate::model::{Priority, Task, TaskStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tasksync_guid::Guid;

pub const COLUMNS: &str = "id, google_task_id, title, description, notes, due, status, priority, \
     project, tags_json, dependencies_json, tasklist_id, list_title, position, created_at, \
     modified_at, completed_at, recurrence_rule, is_recurring, recurring_task_id, \
     estimated_duration_s, actual_duration_s";

/// Column values keyed by name, as handed back by either backend's query
/// layer, used to build a [`Task`].
pub struct RawRow<'a> {
    get: Box<dyn Fn(&str) -> Result<Option<String>> + 'a>,
}

impl<'a> RawRow<'a> {
    pub fn new(get: impl Fn(&str) -> Result<Option<String>> + 'a) -> Self {
        Self { get: Box::new(get) }
    }

    fn text(&self, col: &str) -> Result<String> {
        (self.get)(col)?.ok_or_else(|| Error::Store(rusqlite::Error::InvalidColumnName(col.into())))
    }

    fn opt_text(&self, col: &str) -> Result<Option<String>> {
        (self.get)(col)
    }

    fn opt_timestamp(&self, col: &str) -> Result<Option<DateTime<Utc>>> {
        match self.opt_text(col)? {
            None => Ok(None),
            Some(s) => Ok(Some(
                DateTime::parse_from_rfc3339(&s)
                    .map_err(|_| Error::Validation(format!("bad timestamp in column {col}: {s}")))?
                    .with_timezone(&Utc),
            )),
        }
    }

    fn timestamp(&self, col: &str) -> Result<DateTime<Utc>> {
        self.opt_timestamp(col)?
            .ok_or_else(|| Error::Validation(format!("column {col} must not be null")))
    }

    fn opt_i64(&self, col: &str) -> Result<Option<i64>> {
        self.opt_text(col)?
            .map(|s| {
                s.parse::<i64>()
                    .map_err(|_| Error::Validation(format!("bad integer in column {col}: {s}")))
            })
            .transpose()
    }

    fn i64(&self, col: &str) -> Result<i64> {
        self.opt_i64(col)?
            .ok_or_else(|| Error::Validation(format!("column {col} must not be null")))
    }

    fn bool(&self, col: &str) -> Result<bool> {
        Ok(self.i64(col)? != 0)
    }

    pub fn to_task(&self) -> Result<Task> {
        let tags: Vec<String> = serde_json::from_str(&self.text("tags_json")?)?;
        let dependencies: Vec<Guid> = serde_json::from_str::<Vec<String>>(&self.text("dependencies_json")?)?
            .into_iter()
            .map(Guid::from)
            .collect();

        Ok(Task {
            id: Guid::from(self.text("id")?),
            google_task_id: self.opt_text("google_task_id")?.filter(|s| !s.is_empty()),
            title: self.text("title")?,
            description: self.opt_text("description")?,
            notes: self.opt_text("notes")?,
            due: self.opt_timestamp("due")?,
            status: TaskStatus::parse(&self.text("status")?)
                .ok_or_else(|| Error::Validation("unknown status".into()))?,
            priority: Priority::parse(&self.text("priority")?)
                .ok_or_else(|| Error::Validation("unknown priority".into()))?,
            project: self.opt_text("project")?,
            tags,
            dependencies,
            tasklist_id: Guid::from(self.text("tasklist_id")?),
            list_title: self.text("list_title")?,
            position: self.i64("position")?,
            created_at: self.timestamp("created_at")?,
            modified_at: self.timestamp("modified_at")?,
            completed_at: self.opt_timestamp("completed_at")?,
            recurrence_rule: self.opt_text("recurrence_rule")?,
            is_recurring: self.bool("is_recurring")?,
            recurring_task_id: self.opt_text("recurring_task_id")?.map(Guid::from),
            estimated_duration: self.opt_i64("estimated_duration_s")?.map(|s| Duration::from_secs(s.max(0) as u64)),
            actual_duration: self.opt_i64("actual_duration_s")?.map(|s| Duration::from_secs(s.max(0) as u64)),
        })
    }
}

/// Named SQL parameter values for an upsert, shared by both backends'
/// `save_task` implementations.
pub fn task_params(task: &Task) -> Result<HashMap<&'static str, String>> {
    let mut p = HashMap::new();
    p.insert("id", task.id.as_str().to_string());
    p.insert("google_task_id", task.google_task_id.clone().unwrap_or_default());
    p.insert("title", task.title.clone());
    p.insert(
        "description",
        task.description.clone().unwrap_or_default(),
    );
    p.insert("notes", task.notes.clone().unwrap_or_default());
    p.insert(
        "due",
        task.due.map(|d| d.to_rfc3339()).unwrap_or_default(),
    );
    p.insert("status", task.status.as_str().to_string());
    p.insert("priority", task.priority.as_str().to_string());
    p.insert("project", task.project.clone().unwrap_or_default());
    p.insert("tags_json", serde_json::to_string(&task.tags)?);
    p.insert(
        "dependencies_json",
        serde_json::to_string(
            &task
                .dependencies
                .iter()
                .map(|d| d.as_str().to_string())
                .collect::<Vec<_>>(),
        )?,
    );
    p.insert("tasklist_id", task.tasklist_id.as_str().to_string());
    p.insert("list_title", task.list_title.clone());
    p.insert("position", task.position.to_string());
    p.insert("created_at", task.created_at.to_rfc3339());
    p.insert("modified_at", task.modified_at.to_rfc3339());
    p.insert(
        "completed_at",
        task.completed_at.map(|d| d.to_rfc3339()).unwrap_or_default(),
    );
    p.insert(
        "recurrence_rule",
        task.recurrence_rule.clone().unwrap_or_default(),
    );
    p.insert("is_recurring", (task.is_recurring as i64).to_string());
    p.insert(
        "recurring_task_id",
        task.recurring_task_id
            .as_ref()
            .map(|g| g.as_str().to_string())
            .unwrap_or_default(),
    );
    p.insert(
        "estimated_duration_s",
        task.estimated_duration
            .map(|d| d.as_secs().to_string())
            .unwrap_or_default(),
    );
    p.insert(
        "actual_duration_s",
        task.actual_duration
            .map(|d| d.as_secs().to_string())
            .unwrap_or_default(),
    );
    Ok(p)
}
