/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The data model shared by every store and the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tasksync_guid::Guid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Waiting,
    Deleted,
}

impl TaskStatus {
    /// Ordering used by `ConflictResolver::latest_wins` to promote the more
    /// advanced status: `completed > in_progress > waiting > pending`.
    /// `deleted` is handled separately by the resolver since it only wins
    /// when strictly newer.
    pub fn advancement_rank(self) -> u8 {
        match self {
            TaskStatus::Deleted => 0,
            TaskStatus::Pending => 1,
            TaskStatus::Waiting => 2,
            TaskStatus::InProgress => 3,
            TaskStatus::Completed => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Waiting => "waiting",
            TaskStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => TaskStatus::Pending,
            "in_progress" => TaskStatus::InProgress,
            "completed" => TaskStatus::Completed,
            "waiting" => TaskStatus::Waiting,
            "deleted" => TaskStatus::Deleted,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "low" => Priority::Low,
            "medium" => Priority::Medium,
            "high" => Priority::High,
            "critical" => Priority::Critical,
            _ => return None,
        })
    }
}

/// The central entity synced across stores. Construction goes through
/// validation helpers in `store`; this struct itself carries no invariants
/// beyond what its fields can represent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Guid,
    /// The id Google assigned this task on its side, once pushed at least
    /// once. `id` itself never changes to match it; this is how `push`/`pull`
    /// recognize a task they've already linked to an upstream row.
    pub google_task_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub due: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub project: Option<String>,
    pub tags: Vec<String>,
    pub dependencies: Vec<Guid>,
    pub tasklist_id: Guid,
    pub list_title: String,
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub recurrence_rule: Option<String>,
    pub is_recurring: bool,
    pub recurring_task_id: Option<Guid>,
    pub estimated_duration: Option<Duration>,
    pub actual_duration: Option<Duration>,
}

impl Task {
    /// Collapses duplicate tags into a set while preserving first-seen order.
    pub fn normalize_tags(&mut self) {
        let mut seen = BTreeSet::new();
        self.tags.retain(|t| seen.insert(t.clone()));
    }

    /// A task with status `completed` always has `completed_at`; clearing
    /// completion clears it.
    pub fn enforce_completion_invariant(&mut self) {
        match self.status {
            TaskStatus::Completed if self.completed_at.is_none() => {
                self.completed_at = Some(self.modified_at);
            }
            TaskStatus::Completed => {}
            _ => self.completed_at = None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskList {
    pub id: Guid,
    pub title: String,
    pub updated: DateTime<Utc>,
    pub position: i64,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Google,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub account_type: AccountType,
    pub credentials_path: std::path::PathBuf,
    pub storage_root: std::path::PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDbConfig {
    pub id: Guid,
    pub url: String,
    pub name: String,
    pub token: String,
    pub is_active: bool,
    pub auto_sync: bool,
    pub sync_frequency_minutes: Option<u32>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// An append-only entry recorded before the actual `tasks` row is removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionLogEntry {
    pub seq: i64,
    pub task_id: Guid,
    pub title: String,
    pub description: Option<String>,
    pub due: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub deleted_at: DateTime<Utc>,
    pub deleted_by: String,
    pub tasklist_id: Guid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Push,
    Pull,
    Both,
    RemotePush,
    RemotePull,
    RemoteBoth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: Guid,
    pub account_id: String,
    pub kind: JobKind,
    pub started_at: DateTime<Utc>,
    pub percentage: u8,
    pub message: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub traceback: Option<String>,
}

/// `sync.conflict_strategy`: a tagged variant, not inheritance. The engine
/// dispatches on this once per diverged pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    LocalWins,
    RemoteWins,
    LatestWins,
    Merge,
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        ConflictStrategy::LatestWins
    }
}

/// The outcome of one `push`/`pull`/`bidirectional` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub created: u32,
    pub updated: u32,
    pub deleted: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub message: String,
    pub changed: ChangeCounts,
    pub conflicts_resolved: u32,
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_invariant_sets_and_clears_completed_at() {
        let mut t = make_task();
        t.status = TaskStatus::Completed;
        t.enforce_completion_invariant();
        assert!(t.completed_at.is_some());

        t.status = TaskStatus::Pending;
        t.enforce_completion_invariant();
        assert!(t.completed_at.is_none());
    }

    #[test]
    fn tags_collapse_to_a_set_preserving_order() {
        let mut t = make_task();
        t.tags = vec!["a".into(), "b".into(), "a".into(), "c".into(), "b".into()];
        t.normalize_tags();
        assert_eq!(t.tags, vec!["a".to_string(), "b".into(), "c".into()]);
    }

    fn make_task() -> Task {
        let now = Utc::now();
        Task {
            id: Guid::random(),
            google_task_id: None,
            title: "title".into(),
            description: None,
            notes: None,
            due: None,
            status: TaskStatus::Pending,
            priority: Priority::Medium,
            project: None,
            tags: vec![],
            dependencies: vec![],
            tasklist_id: Guid::random(),
            list_title: "Default".into(),
            position: 0,
            created_at: now,
            modified_at: now,
            completed_at: None,
            recurrence_rule: None,
            is_recurring: false,
            recurring_task_id: None,
            estimated_duration: None,
            actual_duration: None,
        }
    }
}
