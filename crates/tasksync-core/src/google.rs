/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Thin, typed wrapper over the Google Tasks REST API, grounded on the
//! retry/backoff shape of `remote_settings::client::Client` (same "sleep and
//! retry a bounded number of times" loop as [`crate::store::remote`]), but
//! with 429-aware `Retry-After` handling layered on instead of a
//! server-pushed advisory backoff.

use crate::error::{Error, Result};
use crate::model::{Priority, Task, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tasksync_guid::Guid;

const BASE_URL: &str = "https://tasks.googleapis.com/tasks/v1";
const MAX_ATTEMPTS: u32 = 5;

/// Consumed by [`GoogleClient`] to obtain a current bearer token and to
/// persist a refreshed one. Implemented by `ConfigStore`-backed credential
/// storage; the client itself never performs an interactive authorization
/// flow.
pub trait TokenSource: Send + Sync {
    fn access_token(&self) -> Result<String>;
    fn refresh(&self) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct GoogleTaskList {
    id: String,
    title: String,
    updated: String,
}

#[derive(Debug, Deserialize)]
struct TaskListsResponse {
    items: Option<Vec<GoogleTaskList>>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct GoogleTask {
    id: Option<String>,
    title: Option<String>,
    notes: Option<String>,
    status: Option<String>,
    due: Option<String>,
    updated: Option<String>,
    completed: Option<String>,
    deleted: Option<bool>,
    hidden: Option<bool>,
    position: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TasksResponse {
    items: Option<Vec<GoogleTask>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// A Google task list, trimmed to the fields the engine's list-mapping step
/// needs.
#[derive(Debug, Clone)]
pub struct RemoteTaskList {
    pub id: String,
    pub title: String,
    pub updated: DateTime<Utc>,
}

pub struct GoogleClient {
    base_url: String,
    http: reqwest::blocking::Client,
    tokens: Box<dyn TokenSource>,
}

impl GoogleClient {
    pub fn new(tokens: Box<dyn TokenSource>) -> Self {
        Self::with_base_url(BASE_URL.to_string(), tokens)
    }

    /// Grounded on `remote_settings::config::RemoteSettingsConfig::server_url`:
    /// a server-URL override so tests can point the client at a mock server
    /// instead of the real Google Tasks endpoint.
    pub fn with_base_url(base_url: String, tokens: Box<dyn TokenSource>) -> Self {
        Self {
            base_url,
            http: reqwest::blocking::Client::new(),
            tokens,
        }
    }

    pub fn list_tasklists(&self) -> Result<Vec<RemoteTaskList>> {
        let resp: TaskListsResponse = self.request(reqwest::Method::GET, "/users/@me/lists", None)?;
        resp.items
            .unwrap_or_default()
            .into_iter()
            .map(|l| {
                Ok(RemoteTaskList {
                    id: l.id,
                    title: l.title,
                    updated: DateTime::parse_from_rfc3339(&l.updated)
                        .map_err(|_| Error::Validation(format!("bad updated timestamp: {}", l.updated)))?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }

    /// `since` bounds the pull to `updatedMin >= now - pull_range_days`;
    /// `None` means a full pull.
    pub fn list_tasks(
        &self,
        list_id: &str,
        since: Option<DateTime<Utc>>,
        include_completed: bool,
        include_hidden: bool,
        include_deleted: bool,
    ) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut path = format!(
                "/lists/{list_id}/tasks?showCompleted={include_completed}&showHidden={include_hidden}&showDeleted={include_deleted}"
            );
            if let Some(since) = since {
                path.push_str(&format!("&updatedMin={}", urlencode(&since.to_rfc3339())));
            }
            if let Some(token) = &page_token {
                path.push_str(&format!("&pageToken={}", urlencode(token)));
            }

            let resp: TasksResponse = self.request(reqwest::Method::GET, &path, None)?;
            for item in resp.items.unwrap_or_default() {
                tasks.push(from_google_task(item, list_id)?);
            }
            match resp.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(tasks)
    }

    pub fn get_task(&self, list_id: &str, id: &str) -> Result<Task> {
        let item: GoogleTask = self.request(
            reqwest::Method::GET,
            &format!("/lists/{list_id}/tasks/{id}"),
            None,
        )?;
        from_google_task(item, list_id)
    }

    /// Alias for `get_task`, used by the engine when re-reading a single
    /// task after a conflict retry.
    pub fn list_task(&self, list_id: &str, id: &str) -> Result<Task> {
        self.get_task(list_id, id)
    }

    pub fn insert_task(&self, list_id: &str, task: &Task) -> Result<Task> {
        let body = to_google_task(task);
        let item: GoogleTask = self.request(
            reqwest::Method::POST,
            &format!("/lists/{list_id}/tasks"),
            Some(serde_json::to_value(body)?),
        )?;
        from_google_task(item, list_id)
    }

    pub fn patch_task(&self, list_id: &str, id: &str, task: &Task) -> Result<Task> {
        let body = to_google_task(task);
        let item: GoogleTask = self.request(
            reqwest::Method::PATCH,
            &format!("/lists/{list_id}/tasks/{id}"),
            Some(serde_json::to_value(body)?),
        )?;
        from_google_task(item, list_id)
    }

    /// A delete of an id Google no longer has is treated as success.
    pub fn delete_task(&self, list_id: &str, id: &str) -> Result<()> {
        match self.request::<serde_json::Value>(
            reqwest::Method::DELETE,
            &format!("/lists/{list_id}/tasks/{id}"),
            None,
        ) {
            Ok(_) => Ok(()),
            Err(Error::Upstream { code: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn request<T: serde::de::DeserializeOwned + Default>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let mut token = self.tokens.access_token()?;
        let mut refreshed_once = false;
        let mut attempt = 0;

        loop {
            let mut req = self
                .http
                .request(method.clone(), format!("{}{path}", self.base_url))
                .bearer_auth(&token);
            if let Some(body) = &body {
                req = req.json(body);
            }

            let resp = req.send().map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    Error::TransientNet(e.to_string())
                } else {
                    Error::Http(e)
                }
            })?;

            let status = resp.status();
            if status.is_success() {
                if status == reqwest::StatusCode::NO_CONTENT {
                    return Ok(T::default());
                }
                return Ok(resp.json()?);
            }

            if status == reqwest::StatusCode::UNAUTHORIZED && !refreshed_once {
                token = self.tokens.refresh()?;
                refreshed_once = true;
                continue;
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
                if attempt + 1 >= MAX_ATTEMPTS {
                    let body = resp.text().unwrap_or_default();
                    return Err(Error::Upstream {
                        code: status.as_u16(),
                        body,
                    });
                }
                let wait = retry_after(&resp).unwrap_or_else(|| Duration::from_secs(2u64.pow(attempt)));
                std::thread::sleep(wait);
                attempt += 1;
                continue;
            }

            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(Error::Auth);
            }

            let code = status.as_u16();
            let body = resp.text().unwrap_or_default();
            return Err(Error::Upstream { code, body });
        }
    }
}

fn retry_after(resp: &reqwest::blocking::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn urlencode(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') {
                c.to_string()
            } else {
                format!("%{:02X}", c as u32)
            }
        })
        .collect()
}

fn urldecode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn to_google_task(task: &Task) -> GoogleTask {
    GoogleTask {
        id: task.google_task_id.clone(),
        title: Some(task.title.clone()),
        notes: Some(compose_notes(task)),
        status: Some(match task.status {
            TaskStatus::Completed => "completed".to_string(),
            _ => "needsAction".to_string(),
        }),
        due: task.due.map(|d| d.to_rfc3339()),
        updated: Some(task.modified_at.to_rfc3339()),
        completed: task.completed_at.map(|d| d.to_rfc3339()),
        deleted: Some(task.status == TaskStatus::Deleted),
        hidden: None,
        position: None,
    }
}

/// Google Tasks has no notion of priority, tags, dependencies, estimated/
/// actual duration, description, or a status finer than needsAction/
/// completed. All of those round-trip through a single packed line appended
/// to `notes` so a pull doesn't silently drop or collapse them. `status` is
/// packed too: Google only distinguishes `needsAction`/`completed`, which
/// would otherwise flatten `in_progress`/`waiting` back to `pending` on
/// every pull.
fn compose_notes(task: &Task) -> String {
    let mut notes = task.notes.clone().unwrap_or_default();
    let meta = format!(
        "\n---\npriority={} project={} tags={} deps={} status={} desc={}",
        task.priority.as_str(),
        task.project.as_deref().unwrap_or(""),
        task.tags.join(","),
        task.dependencies
            .iter()
            .map(|d| d.as_str().to_string())
            .collect::<Vec<_>>()
            .join(","),
        task.status.as_str(),
        urlencode(task.description.as_deref().unwrap_or("")),
    );
    notes.push_str(&meta);
    notes
}

fn from_google_task(item: GoogleTask, list_id: &str) -> Result<Task> {
    let parsed = split_notes(item.notes.as_deref());
    let now = Utc::now();
    // Google's own `status`/`deleted` fields are authoritative for
    // completed/deleted; the packed `status=` field only ever restores one
    // of `pending`/`in_progress`/`waiting`, never overriding those two.
    let status = if item.deleted.unwrap_or(false) {
        TaskStatus::Deleted
    } else {
        match item.status.as_deref() {
            Some("completed") => TaskStatus::Completed,
            _ => parsed.status.unwrap_or(TaskStatus::Pending),
        }
    };
    Ok(Task {
        id: Guid::random(),
        google_task_id: item.id,
        title: item.title.unwrap_or_default(),
        description: parsed.description,
        notes: parsed.body,
        due: item
            .due
            .as_deref()
            .map(parse_google_timestamp)
            .transpose()?,
        status,
        priority: parsed.priority,
        project: parsed.project,
        tags: parsed.tags,
        dependencies: parsed.dependencies,
        tasklist_id: Guid::from(list_id),
        list_title: String::new(),
        position: item.position.as_deref().and_then(|p| p.parse().ok()).unwrap_or(0),
        created_at: now,
        modified_at: item
            .updated
            .as_deref()
            .map(parse_google_timestamp)
            .transpose()?
            .unwrap_or(now),
        completed_at: item
            .completed
            .as_deref()
            .map(parse_google_timestamp)
            .transpose()?,
        recurrence_rule: None,
        is_recurring: false,
        recurring_task_id: None,
        estimated_duration: None,
        actual_duration: None,
    })
}

fn parse_google_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|_| Error::Validation(format!("bad timestamp from Google: {s}")))?
        .with_timezone(&Utc))
}

struct ParsedNotes {
    body: Option<String>,
    priority: Priority,
    project: Option<String>,
    tags: Vec<String>,
    dependencies: Vec<Guid>,
    status: Option<TaskStatus>,
    description: Option<String>,
}

impl Default for ParsedNotes {
    fn default() -> Self {
        ParsedNotes {
            body: None,
            priority: Priority::Medium,
            project: None,
            tags: Vec::new(),
            dependencies: Vec::new(),
            status: None,
            description: None,
        }
    }
}

/// Reverse of [`compose_notes`]: split the packed metadata line back off
/// the plain-text `notes` body.
fn split_notes(raw: Option<&str>) -> ParsedNotes {
    let raw = match raw {
        Some(r) => r,
        None => return ParsedNotes::default(),
    };
    let Some((body, meta)) = raw.split_once("\n---\n") else {
        return ParsedNotes {
            body: Some(raw.to_string()),
            ..ParsedNotes::default()
        };
    };

    let mut parsed = ParsedNotes::default();
    for field in meta.split_whitespace() {
        if let Some(v) = field.strip_prefix("priority=") {
            parsed.priority = Priority::parse(v).unwrap_or(Priority::Medium);
        } else if let Some(v) = field.strip_prefix("project=") {
            if !v.is_empty() {
                parsed.project = Some(v.to_string());
            }
        } else if let Some(v) = field.strip_prefix("tags=") {
            parsed.tags = v.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect();
        } else if let Some(v) = field.strip_prefix("deps=") {
            parsed.dependencies = v
                .split(',')
                .filter(|s| !s.is_empty())
                .map(Guid::from)
                .collect();
        } else if let Some(v) = field.strip_prefix("status=") {
            parsed.status = TaskStatus::parse(v)
                .filter(|s| matches!(s, TaskStatus::Pending | TaskStatus::InProgress | TaskStatus::Waiting));
        } else if let Some(v) = field.strip_prefix("desc=") {
            if !v.is_empty() {
                parsed.description = Some(urldecode(v));
            }
        }
    }

    parsed.body = if body.is_empty() { None } else { Some(body.to_string()) };
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;

    fn make_task() -> Task {
        let now = Utc::now();
        Task {
            id: Guid::random(),
            google_task_id: None,
            title: "water the plants".into(),
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

    #[test]
    fn notes_metadata_round_trips() {
        let mut t = make_task();
        t.priority = Priority::High;
        t.project = Some("garden".into());
        t.tags = vec!["outdoors".into(), "weekend".into()];
        let g = to_google_task(&t);
        let back = from_google_task(
            GoogleTask {
                notes: g.notes,
                ..Default::default()
            },
            "list-1",
        )
        .unwrap();
        assert_eq!(back.priority, Priority::High);
        assert_eq!(back.project.as_deref(), Some("garden"));
        assert_eq!(back.tags, vec!["outdoors".to_string(), "weekend".into()]);
    }

    #[test]
    fn plain_notes_without_metadata_survive() {
        let parsed = split_notes(Some("just a note"));
        assert_eq!(parsed.body.as_deref(), Some("just a note"));
        assert_eq!(parsed.priority, Priority::Medium);
    }

    #[test]
    fn in_progress_status_survives_a_push_then_pull_cycle() {
        let mut t = make_task();
        t.status = TaskStatus::InProgress;
        let g = to_google_task(&t);
        assert_eq!(g.status.as_deref(), Some("needsAction"));
        let back = from_google_task(
            GoogleTask {
                id: Some("g-1".into()),
                status: g.status,
                notes: g.notes,
                deleted: g.deleted,
                ..Default::default()
            },
            "list-1",
        )
        .unwrap();
        assert_eq!(back.status, TaskStatus::InProgress);
        assert_eq!(back.google_task_id.as_deref(), Some("g-1"));
    }

    #[test]
    fn completed_from_google_overrides_a_stale_packed_status() {
        // Packed status still says `in_progress` from before it was marked
        // done on Google's side; Google's own fields win.
        let back = from_google_task(
            GoogleTask {
                status: Some("completed".into()),
                notes: Some("\n---\npriority=medium project= tags= deps= status=in_progress desc=".into()),
                ..Default::default()
            },
            "list-1",
        )
        .unwrap();
        assert_eq!(back.status, TaskStatus::Completed);
    }

    #[test]
    fn description_round_trips_through_packed_notes() {
        let mut t = make_task();
        t.description = Some("multi\nline, with spaces".into());
        let g = to_google_task(&t);
        let back = from_google_task(
            GoogleTask {
                notes: g.notes,
                ..Default::default()
            },
            "list-1",
        )
        .unwrap();
        assert_eq!(back.description.as_deref(), Some("multi\nline, with spaces"));
    }
}
