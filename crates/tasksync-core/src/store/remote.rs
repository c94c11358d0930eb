/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! `RemoteStore`: the same [`TaskStore`] contract as [`super::LocalStore`],
//! but realized over an authenticated libSQL/HTTP tunnel. The retry/backoff
//! shape is grounded on `remote_settings::client::Client` (same
//! `Backoff`/`Retry-After` header handling, same "don't even issue the
//! request while backed off" guard), swapped from `viaduct` to
//! `reqwest::blocking` and from the buckets API to a single `/v2/pipeline`
//! SQL-statement endpoint.

use super::row::{task_params, RawRow, COLUMNS};
use super::{TaskFilter, TaskStore};
use crate::error::{Error, Result};
use crate::model::{DeletionLogEntry, RemoteDbConfig, Task, TaskStatus};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tasksync_guid::Guid;

const HEADER_RETRY_AFTER: &str = "Retry-After";
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 5;

/// Observed backoff state, shared across calls on the one client (mirrors
/// `remote_settings::client::BackoffState`).
#[derive(Default)]
enum BackoffState {
    #[default]
    Ok,
    Backoff {
        observed_at: Instant,
        duration: Duration,
    },
}

pub struct RemoteStore {
    base_url: String,
    token: String,
    http: reqwest::blocking::Client,
    backoff: Mutex<BackoffState>,
}

#[derive(Deserialize)]
struct PipelineResponse {
    results: Vec<PipelineResult>,
}

#[derive(Deserialize)]
struct PipelineResult {
    #[serde(rename = "type")]
    kind: String,
    response: Option<PipelineStatementResponse>,
    error: Option<PipelineError>,
}

#[derive(Deserialize)]
struct PipelineStatementResponse {
    result: StatementResult,
}

#[derive(Deserialize)]
struct StatementResult {
    cols: Vec<ColumnDef>,
    rows: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct ColumnDef {
    name: String,
}

#[derive(Deserialize)]
struct PipelineError {
    message: String,
}

impl RemoteStore {
    pub fn new(config: &RemoteDbConfig) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            http: reqwest::blocking::Client::new(),
            backoff: Mutex::new(BackoffState::Ok),
        }
    }

    fn ensure_no_backoff(&self) -> Result<()> {
        let mut state = self.backoff.lock();
        if let BackoffState::Backoff {
            observed_at,
            duration,
        } = *state
        {
            let elapsed = observed_at.elapsed();
            if elapsed >= duration {
                *state = BackoffState::Ok;
            } else {
                return Err(Error::TransientNet(format!(
                    "remote store backed off for another {}s",
                    (duration - elapsed).as_secs()
                )));
            }
        }
        Ok(())
    }

    fn observe_retry_after(&self, resp: &reqwest::blocking::Response) {
        let secs = resp
            .headers()
            .get(HEADER_RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if let Some(secs) = secs {
            if secs > 0 {
                *self.backoff.lock() = BackoffState::Backoff {
                    observed_at: Instant::now(),
                    duration: Duration::from_secs(secs),
                };
            }
        }
    }

    /// Run one or more SQL statements over the libSQL HTTP pipeline
    /// endpoint, retrying transient failures with exponential backoff (1s,
    /// 2s, 4s, cap 30s).
    fn execute_pipeline(&self, statements: &[(String, HashMap<&'static str, String>)]) -> Result<Vec<StatementResult>> {
        let body = json!({
            "requests": statements
                .iter()
                .map(|(sql, params)| {
                    json!({
                        "type": "execute",
                        "stmt": {
                            "sql": sql,
                            "named_args": params
                                .iter()
                                .map(|(k, v)| json!({"name": k, "value": {"type": "text", "value": v}}))
                                .collect::<Vec<_>>(),
                        }
                    })
                })
                .chain(std::iter::once(json!({"type": "close"})))
                .collect::<Vec<_>>(),
        });

        let mut attempt = 0;
        loop {
            self.ensure_no_backoff()?;
            let result = self
                .http
                .post(format!("{}/v2/pipeline", self.base_url))
                .bearer_auth(&self.token)
                .json(&body)
                .send();

            match result {
                Ok(resp) if resp.status() == reqwest::StatusCode::UNAUTHORIZED => {
                    return Err(Error::Auth);
                }
                Ok(resp) if resp.status().is_success() => {
                    self.observe_retry_after(&resp);
                    let parsed: PipelineResponse = resp.json()?;
                    let mut out = Vec::with_capacity(statements.len());
                    for entry in parsed.results.into_iter().take(statements.len()) {
                        if let Some(err) = entry.error {
                            return Err(Error::Upstream {
                                code: 0,
                                body: err.message,
                            });
                        }
                        match entry.response {
                            Some(r) if entry.kind == "ok" || entry.kind == "execute" => {
                                out.push(r.result)
                            }
                            Some(r) => out.push(r.result),
                            None => {
                                return Err(Error::Upstream {
                                    code: 0,
                                    body: "missing pipeline response".into(),
                                })
                            }
                        }
                    }
                    return Ok(out);
                }
                Ok(resp) => {
                    self.observe_retry_after(&resp);
                    let code = resp.status().as_u16();
                    let body = resp.text().unwrap_or_default();
                    if !(500..600).contains(&code) || attempt + 1 >= MAX_ATTEMPTS {
                        return Err(Error::Upstream { code, body });
                    }
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    if attempt + 1 >= MAX_ATTEMPTS {
                        return Err(Error::TransientNet(e.to_string()));
                    }
                }
                Err(e) => return Err(Error::Http(e)),
            }

            let backoff = (BACKOFF_BASE * 2u32.pow(attempt)).min(BACKOFF_CAP);
            std::thread::sleep(backoff);
            attempt += 1;
        }
    }

    fn rows_to_tasks(result: &StatementResult) -> Result<Vec<Task>> {
        let positions: HashMap<&str, usize> = result
            .cols
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.as_str(), i))
            .collect();
        result
            .rows
            .iter()
            .map(|row| {
                let raw = RawRow::new(|col| {
                    Ok(positions
                        .get(col)
                        .and_then(|&i| row.get(i))
                        .and_then(Value::as_str)
                        .map(str::to_string))
                });
                raw.to_task()
            })
            .collect()
    }
}

impl TaskStore for RemoteStore {
    fn load_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut sql = format!("SELECT {COLUMNS} FROM tasks WHERE 1=1");
        let mut params = HashMap::new();
        if let Some(status) = filter.status {
            sql.push_str(" AND status = :status");
            params.insert("status", status.as_str().to_string());
        }
        if let Some(tasklist_id) = &filter.tasklist_id {
            sql.push_str(" AND tasklist_id = :tasklist_id");
            params.insert("tasklist_id", tasklist_id.as_str().to_string());
        }
        if let Some(since) = filter.modified_since {
            sql.push_str(" AND modified_at >= :modified_since");
            params.insert("modified_since", since.to_rfc3339());
        }
        sql.push_str(" ORDER BY list_title, position, created_at");

        let results = self.execute_pipeline(&[(sql, params)])?;
        Self::rows_to_tasks(&results[0])
    }

    fn get_task(&self, id: &Guid) -> Result<Option<Task>> {
        let mut params = HashMap::new();
        params.insert("id", id.as_str().to_string());
        let results = self.execute_pipeline(&[(
            format!("SELECT {COLUMNS} FROM tasks WHERE id = :id"),
            params,
        )])?;
        Ok(Self::rows_to_tasks(&results[0])?.into_iter().next())
    }

    fn save_task(&self, task: &Task) -> Result<Task> {
        let mut task = task.clone();
        task.normalize_tags();
        task.enforce_completion_invariant();
        if task.modified_at == Default::default() {
            task.modified_at = Utc::now();
        }

        let params = task_params(&task)?;
        self.execute_pipeline(&[(
            format!(
                "INSERT INTO tasks ({COLUMNS}) VALUES (:id, :google_task_id, :title, \
                 :description, :notes, :due, :status, :priority, :project, :tags_json, \
                 :dependencies_json, :tasklist_id, :list_title, :position, :created_at, \
                 :modified_at, :completed_at, :recurrence_rule, :is_recurring, \
                 :recurring_task_id, :estimated_duration_s, :actual_duration_s)
                 ON CONFLICT(id) DO UPDATE SET
                    google_task_id=excluded.google_task_id, title=excluded.title,
                    description=excluded.description, notes=excluded.notes,
                    due=excluded.due, status=excluded.status, priority=excluded.priority,
                    project=excluded.project, tags_json=excluded.tags_json,
                    dependencies_json=excluded.dependencies_json, tasklist_id=excluded.tasklist_id,
                    list_title=excluded.list_title, position=excluded.position,
                    modified_at=excluded.modified_at, completed_at=excluded.completed_at,
                    recurrence_rule=excluded.recurrence_rule, is_recurring=excluded.is_recurring,
                    recurring_task_id=excluded.recurring_task_id,
                    estimated_duration_s=excluded.estimated_duration_s,
                    actual_duration_s=excluded.actual_duration_s"
            ),
            params,
        )])?;
        Ok(task)
    }

    fn save_tasks(&self, tasks: &[Task]) -> Result<Vec<Task>> {
        // The pipeline endpoint runs every statement in one request inside a
        // single implicit transaction, so an all-or-nothing bulk save is just
        // N statements in the one call.
        let mut saved = Vec::with_capacity(tasks.len());
        let mut statements = Vec::with_capacity(tasks.len());
        for task in tasks {
            let mut t = task.clone();
            t.normalize_tags();
            t.enforce_completion_invariant();
            let params = task_params(&t)?;
            statements.push((
                format!(
                    "INSERT INTO tasks ({COLUMNS}) VALUES (:id, :google_task_id, :title, \
                     :description, :notes, :due, :status, :priority, :project, :tags_json, \
                     :dependencies_json, :tasklist_id, :list_title, :position, :created_at, \
                     :modified_at, :completed_at, :recurrence_rule, :is_recurring, \
                     :recurring_task_id, :estimated_duration_s, :actual_duration_s)
                     ON CONFLICT(id) DO UPDATE SET
                        google_task_id=excluded.google_task_id, title=excluded.title,
                        description=excluded.description,
                        notes=excluded.notes, due=excluded.due, status=excluded.status,
                        priority=excluded.priority, project=excluded.project,
                        tags_json=excluded.tags_json, dependencies_json=excluded.dependencies_json,
                        tasklist_id=excluded.tasklist_id, list_title=excluded.list_title,
                        position=excluded.position, modified_at=excluded.modified_at,
                        completed_at=excluded.completed_at, recurrence_rule=excluded.recurrence_rule,
                        is_recurring=excluded.is_recurring, recurring_task_id=excluded.recurring_task_id,
                        estimated_duration_s=excluded.estimated_duration_s,
                        actual_duration_s=excluded.actual_duration_s"
                ),
                params,
            ));
            saved.push(t);
        }
        self.execute_pipeline(&statements)?;
        Ok(saved)
    }

    fn delete_task(&self, id: &Guid, reason: &str) -> Result<()> {
        let existing = self
            .get_task(id)?
            .ok_or_else(|| Error::Validation(format!("no such task {id}")))?;
        let now = Utc::now();

        let mut log_params = HashMap::new();
        log_params.insert("task_id", existing.id.as_str().to_string());
        log_params.insert("title", existing.title.clone());
        log_params.insert("description", existing.description.clone().unwrap_or_default());
        log_params.insert("due", existing.due.map(|d| d.to_rfc3339()).unwrap_or_default());
        log_params.insert("status", existing.status.as_str().to_string());
        log_params.insert("deleted_at", now.to_rfc3339());
        log_params.insert("deleted_by", reason.to_string());
        log_params.insert("tasklist_id", existing.tasklist_id.as_str().to_string());

        let mut update_params = HashMap::new();
        update_params.insert("modified_at", now.to_rfc3339());
        update_params.insert("id", id.as_str().to_string());

        self.execute_pipeline(&[
            (
                "INSERT INTO deletion_log (task_id, title, description, due, status, deleted_at, deleted_by, tasklist_id)
                 VALUES (:task_id, :title, :description, :due, :status, :deleted_at, :deleted_by, :tasklist_id)"
                    .to_string(),
                log_params,
            ),
            (
                "UPDATE tasks SET status = 'deleted', modified_at = :modified_at, completed_at = NULL WHERE id = :id"
                    .to_string(),
                update_params,
            ),
        ])?;
        Ok(())
    }

    fn purge_task(&self, id: &Guid) -> Result<()> {
        let mut params = HashMap::new();
        params.insert("id", id.as_str().to_string());
        self.execute_pipeline(&[(
            "DELETE FROM tasks WHERE id = :id AND status = 'deleted'".to_string(),
            params,
        )])?;
        Ok(())
    }

    fn load_list_mapping(&self) -> Result<HashMap<String, Guid>> {
        let results = self.execute_pipeline(&[(
            "SELECT title, id FROM list_mapping".to_string(),
            HashMap::new(),
        )])?;
        let result = &results[0];
        let title_idx = result.cols.iter().position(|c| c.name == "title").unwrap_or(0);
        let id_idx = result.cols.iter().position(|c| c.name == "id").unwrap_or(1);
        result
            .rows
            .iter()
            .map(|row| {
                let title = row[title_idx].as_str().unwrap_or_default().to_string();
                let id = Guid::from(row[id_idx].as_str().unwrap_or_default());
                Ok((title, id))
            })
            .collect()
    }

    fn save_list_mapping(&self, mapping: &HashMap<String, Guid>) -> Result<()> {
        let mut statements = vec![("DELETE FROM list_mapping".to_string(), HashMap::new())];
        for (title, id) in mapping {
            let mut params = HashMap::new();
            params.insert("title", title.clone());
            params.insert("id", id.as_str().to_string());
            statements.push((
                "INSERT INTO list_mapping (title, id) VALUES (:title, :id)".to_string(),
                params,
            ));
        }
        self.execute_pipeline(&statements)?;
        Ok(())
    }

    fn load_remote_dbs(&self) -> Result<Vec<RemoteDbConfig>> {
        // A RemoteStore's own `remote_dbs` table is not meaningful: a remote
        // never fans out to further remotes. Remotes are configured locally.
        Ok(Vec::new())
    }

    fn save_remote_dbs(&self, _dbs: &[RemoteDbConfig]) -> Result<()> {
        Ok(())
    }

    fn deletion_log(&self) -> Result<Vec<DeletionLogEntry>> {
        let results = self.execute_pipeline(&[(
            "SELECT seq, task_id, title, description, due, status, deleted_at, deleted_by, tasklist_id
             FROM deletion_log ORDER BY seq"
                .to_string(),
            HashMap::new(),
        )])?;
        let result = &results[0];
        let col = |name: &str| result.cols.iter().position(|c| c.name == name);
        let seq_i = col("seq");
        let task_id_i = col("task_id");
        let title_i = col("title");
        let description_i = col("description");
        let due_i = col("due");
        let status_i = col("status");
        let deleted_at_i = col("deleted_at");
        let deleted_by_i = col("deleted_by");
        let tasklist_id_i = col("tasklist_id");

        result
            .rows
            .iter()
            .map(|row| {
                let get_str = |i: Option<usize>| -> Option<String> {
                    i.and_then(|i| row.get(i)).and_then(Value::as_str).map(str::to_string)
                };
                let status_str = get_str(status_i).unwrap_or_default();
                let deleted_at_str = get_str(deleted_at_i).unwrap_or_default();
                Ok(DeletionLogEntry {
                    seq: get_str(seq_i).and_then(|s| s.parse().ok()).unwrap_or_default(),
                    task_id: Guid::from(get_str(task_id_i).unwrap_or_default()),
                    title: get_str(title_i).unwrap_or_default(),
                    description: get_str(description_i),
                    due: get_str(due_i)
                        .map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
                        .transpose()
                        .map_err(|_| Error::Validation("bad due timestamp in deletion_log".into()))?,
                    status: TaskStatus::parse(&status_str)
                        .ok_or_else(|| Error::Validation("unknown status in deletion_log".into()))?,
                    deleted_at: chrono::DateTime::parse_from_rfc3339(&deleted_at_str)
                        .map_err(|_| Error::Validation("bad deleted_at in deletion_log".into()))?
                        .with_timezone(&Utc),
                    deleted_by: get_str(deleted_by_i).unwrap_or_default(),
                    tasklist_id: Guid::from(get_str(tasklist_id_i).unwrap_or_default()),
                })
            })
            .collect()
    }

    fn task_count(&self) -> Result<i64> {
        let results = self.execute_pipeline(&[(
            "SELECT COUNT(*) AS n FROM tasks WHERE status != 'deleted'".to_string(),
            HashMap::new(),
        )])?;
        Ok(results[0]
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }
}
