/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The embedded, account-scoped store, grounded on `logins::db::LoginDb`'s
//! connection-ownership and cached-statement shape.

use super::row::{task_params, RawRow, COLUMNS};
use super::{schema, TaskFilter, TaskStore};
use crate::error::{Error, Result};
use crate::fingerprint::fingerprint;
use crate::model::{DeletionLogEntry, RemoteDbConfig, Task, TaskStatus};
use chrono::Utc;
use rusqlite::{named_params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tasksync_guid::Guid;
use tasksync_interrupt::SqlInterruptHandle;
use tasksync_sql_support::ConnExt;

pub struct LocalStore {
    db: Arc<Connection>,
    interrupt_handle: Arc<SqlInterruptHandle>,
}

impl LocalStore {
    pub fn with_connection(db: Connection) -> Result<Self> {
        schema::init(&db)?;
        let db = Arc::new(db);
        Ok(Self {
            interrupt_handle: Arc::new(SqlInterruptHandle::new(Arc::clone(&db))),
            db,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_connection(tasksync_sql_support::open_database_with_flags(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    pub fn new_interrupt_handle(&self) -> Arc<SqlInterruptHandle> {
        Arc::clone(&self.interrupt_handle)
    }

    /// Collapses rapid double-submits at `save_task` time by checking
    /// fingerprint before insert.
    fn find_by_fingerprint(&self, task: &Task) -> Result<Option<Task>> {
        let target = fingerprint(task)?;
        let mut stmt = self
            .db
            .prepare_cached(&format!("SELECT {COLUMNS} FROM tasks WHERE status != 'deleted'"))?;
        let rows = stmt.query_and_then([], |row| row_to_task(row))?;
        for row in rows {
            let candidate = row?;
            if candidate.id != task.id && fingerprint(&candidate)? == target {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

/// Verifies that inserting `task`'s dependency edges into the existing
/// dependency graph does not close a cycle. Plain DFS over ids only.
fn check_acyclic(db: &Connection, task: &Task) -> Result<()> {
    if task.dependencies.is_empty() {
        return Ok(());
    }
    let mut stmt = db.prepare("SELECT id, dependencies_json FROM tasks")?;
    let mut edges: HashMap<String, Vec<String>> = stmt
        .query_and_then([], |row| {
            let id: String = row.get(0)?;
            let deps_json: String = row.get(1)?;
            let deps: Vec<String> = serde_json::from_str(&deps_json).unwrap_or_default();
            Ok::<_, Error>((id, deps))
        })?
        .collect::<Result<_>>()?;
    edges.insert(
        task.id.as_str().to_string(),
        task.dependencies.iter().map(|d| d.as_str().to_string()).collect(),
    );

    let start = task.id.as_str().to_string();
    let mut visited = std::collections::HashSet::new();
    if reaches(&edges, &start, &start, &mut visited) {
        return Err(Error::Validation(format!(
            "saving task {} would introduce a dependency cycle",
            task.id
        )));
    }
    Ok(())
}

fn reaches(
    edges: &HashMap<String, Vec<String>>,
    from: &str,
    target: &str,
    visited: &mut std::collections::HashSet<String>,
) -> bool {
    let Some(deps) = edges.get(from) else { return false };
    for dep in deps {
        if dep == target {
            return true;
        }
        if visited.insert(dep.clone()) && reaches(edges, dep, target, visited) {
            return true;
        }
    }
    false
}

fn row_to_task(row: &rusqlite::Row<'_>) -> Result<Task> {
    let raw = RawRow::new(|col| Ok(row.get::<_, Option<String>>(col)?));
    raw.to_task()
}

/// `query_row`'s mapper closure is pinned to `rusqlite::Result<T>`, which
/// can't carry our own `Error` variants (JSON/validation failures). Route
/// single-row-by-id lookups through `try_query_row` instead, the same
/// `logins::db`/`sql_support::ConnExt` escape hatch.
fn get_by_id(conn: &Connection, id: &str) -> Result<Option<Task>> {
    conn.try_query_row(
        &format!("SELECT {COLUMNS} FROM tasks WHERE id = :id"),
        named_params! { ":id": id },
        row_to_task,
        true,
    )
}

impl TaskStore for LocalStore {
    fn load_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut sql = format!("SELECT {COLUMNS} FROM tasks WHERE 1=1");
        if filter.status.is_some() {
            sql.push_str(" AND status = :status");
        }
        if filter.tasklist_id.is_some() {
            sql.push_str(" AND tasklist_id = :tasklist_id");
        }
        if filter.modified_since.is_some() {
            sql.push_str(" AND modified_at >= :modified_since");
        }
        sql.push_str(" ORDER BY list_title, position, created_at");

        let mut stmt = self.db.prepare(&sql)?;
        let status = filter.status.map(|s| s.as_str().to_string());
        let tasklist_id = filter.tasklist_id.as_ref().map(|g| g.as_str().to_string());
        let modified_since = filter.modified_since.map(|d| d.to_rfc3339());

        let mut named: Vec<(&str, &dyn rusqlite::ToSql)> = Vec::new();
        if let Some(s) = &status {
            named.push((":status", s));
        }
        if let Some(t) = &tasklist_id {
            named.push((":tasklist_id", t));
        }
        if let Some(m) = &modified_since {
            named.push((":modified_since", m));
        }

        let rows = stmt.query_and_then(named.as_slice(), row_to_task)?;
        rows.collect()
    }

    fn get_task(&self, id: &Guid) -> Result<Option<Task>> {
        get_by_id(&self.db, id.as_str())
    }

    fn save_task(&self, task: &Task) -> Result<Task> {
        // Rapid double-submit collapsing.
        if let Some(existing) = self.find_by_fingerprint(task)? {
            log::debug!(
                "save_task: collapsing new task into existing fingerprint-duplicate {}",
                existing.id
            );
            return Ok(existing);
        }

        let mut task = task.clone();
        task.normalize_tags();
        task.enforce_completion_invariant();
        check_acyclic(&self.db, &task)?;

        if let Some(existing) = self.get_task(&task.id)? {
            if task.modified_at < existing.modified_at {
                return Err(Error::Conflict(task.id.to_string()));
            }
        } else if task.modified_at == Default::default() {
            task.modified_at = Utc::now();
        }

        let params = task_params(&task)?;
        self.db.execute(
            &format!(
                "INSERT INTO tasks ({COLUMNS}) VALUES (:id, :google_task_id, :title, :description, \
                 :notes, :due, :status, :priority, :project, :tags_json, :dependencies_json, \
                 :tasklist_id, :list_title, :position, :created_at, :modified_at, :completed_at, \
                 :recurrence_rule, :is_recurring, :recurring_task_id, :estimated_duration_s, \
                 :actual_duration_s)
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
            named_params_from(&params).as_slice(),
        )?;
        Ok(task)
    }

    fn save_tasks(&self, tasks: &[Task]) -> Result<Vec<Task>> {
        let mut saved = Vec::with_capacity(tasks.len());
        let tx = self.db.unchecked_transaction()?;
        for task in tasks {
            // Re-implemented inline (rather than calling `self.save_task`) so
            // every row shares the one transaction: either all rows apply or
            // none do.
            if tx
                .try_query_row(
                    &format!("SELECT {COLUMNS} FROM tasks WHERE id = :id"),
                    named_params! { ":id": task.id.as_str() },
                    row_to_task,
                    false,
                )?
                .map(|existing: Task| task.modified_at < existing.modified_at)
                .unwrap_or(false)
            {
                return Err(Error::Conflict(task.id.to_string()));
            }
            let mut t = task.clone();
            t.normalize_tags();
            t.enforce_completion_invariant();
            check_acyclic(&tx, &t)?;
            let params = task_params(&t)?;
            tx.execute(
                &format!(
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
                named_params_from(&params).as_slice(),
            )?;
            saved.push(t);
        }
        tx.commit()?;
        Ok(saved)
    }

    fn delete_task(&self, id: &Guid, reason: &str) -> Result<()> {
        let tx = self.db.unchecked_transaction()?;
        let existing: Task = tx
            .try_query_row(
                &format!("SELECT {COLUMNS} FROM tasks WHERE id = :id"),
                named_params! { ":id": id.as_str() },
                row_to_task,
                false,
            )?
            .ok_or_else(|| Error::Validation(format!("no such task {id}")))?;

        let now = Utc::now();
        // Deletion log entry is appended before the row update so that a
        // crash mid-delete never loses the record of what was deleted.
        tx.execute(
            "INSERT INTO deletion_log (task_id, title, description, due, status, deleted_at, deleted_by, tasklist_id)
             VALUES (:task_id, :title, :description, :due, :status, :deleted_at, :deleted_by, :tasklist_id)",
            named_params! {
                ":task_id": existing.id.as_str(),
                ":title": existing.title,
                ":description": existing.description,
                ":due": existing.due.map(|d| d.to_rfc3339()),
                ":status": existing.status.as_str(),
                ":deleted_at": now.to_rfc3339(),
                ":deleted_by": reason,
                ":tasklist_id": existing.tasklist_id.as_str(),
            },
        )?;
        tx.execute(
            "UPDATE tasks SET status = 'deleted', modified_at = :modified_at, completed_at = NULL WHERE id = :id",
            named_params! {
                ":modified_at": now.to_rfc3339(),
                ":id": id.as_str(),
            },
        )?;
        tx.commit()?;
        Ok(())
    }

    fn purge_task(&self, id: &Guid) -> Result<()> {
        self.db
            .execute("DELETE FROM tasks WHERE id = ?1 AND status = 'deleted'", [id.as_str()])?;
        Ok(())
    }

    fn load_list_mapping(&self) -> Result<HashMap<String, Guid>> {
        let mut stmt = self.db.prepare("SELECT title, id FROM list_mapping")?;
        let rows = stmt.query_and_then([], |row| {
            Ok::<_, Error>((row.get::<_, String>(0)?, Guid::from(row.get::<_, String>(1)?)))
        })?;
        rows.collect()
    }

    fn save_list_mapping(&self, mapping: &HashMap<String, Guid>) -> Result<()> {
        let tx = self.db.unchecked_transaction()?;
        tx.execute("DELETE FROM list_mapping", [])?;
        for (title, id) in mapping {
            tx.execute(
                "INSERT INTO list_mapping (title, id) VALUES (?1, ?2)",
                rusqlite::params![title, id.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_remote_dbs(&self) -> Result<Vec<RemoteDbConfig>> {
        let mut stmt = self.db.prepare(
            "SELECT id, url, name, token, is_active, auto_sync, sync_frequency_minutes, last_synced_at FROM remote_dbs",
        )?;
        let rows = stmt.query_and_then([], |row| {
            Ok::<_, Error>(RemoteDbConfig {
                id: Guid::from(row.get::<_, String>(0)?),
                url: row.get(1)?,
                name: row.get(2)?,
                token: row.get(3)?,
                is_active: row.get::<_, i64>(4)? != 0,
                auto_sync: row.get::<_, i64>(5)? != 0,
                sync_frequency_minutes: row.get::<_, Option<i64>>(6)?.map(|v| v as u32),
                last_synced_at: row
                    .get::<_, Option<String>>(7)?
                    .map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
                    .transpose()
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
            })
        })?;
        rows.collect()
    }

    fn save_remote_dbs(&self, dbs: &[RemoteDbConfig]) -> Result<()> {
        let tx = self.db.unchecked_transaction()?;
        tx.execute("DELETE FROM remote_dbs", [])?;
        for db in dbs {
            tx.execute(
                "INSERT INTO remote_dbs (id, url, name, token, is_active, auto_sync, sync_frequency_minutes, last_synced_at)
                 VALUES (:id, :url, :name, :token, :is_active, :auto_sync, :sync_frequency_minutes, :last_synced_at)",
                named_params! {
                    ":id": db.id.as_str(),
                    ":url": db.url,
                    ":name": db.name,
                    ":token": db.token,
                    ":is_active": db.is_active as i64,
                    ":auto_sync": db.auto_sync as i64,
                    ":sync_frequency_minutes": db.sync_frequency_minutes,
                    ":last_synced_at": db.last_synced_at.map(|d| d.to_rfc3339()),
                },
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn deletion_log(&self) -> Result<Vec<DeletionLogEntry>> {
        let mut stmt = self.db.prepare(
            "SELECT seq, task_id, title, description, due, status, deleted_at, deleted_by, tasklist_id
             FROM deletion_log ORDER BY seq",
        )?;
        let rows = stmt.query_and_then([], |row| {
            Ok::<_, Error>(DeletionLogEntry {
                seq: row.get(0)?,
                task_id: Guid::from(row.get::<_, String>(1)?),
                title: row.get(2)?,
                description: row.get(3)?,
                due: row
                    .get::<_, Option<String>>(4)?
                    .map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
                    .transpose()
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                status: TaskStatus::parse(&row.get::<_, String>(5)?)
                    .ok_or(rusqlite::Error::InvalidQuery)?,
                deleted_at: chrono::DateTime::parse_from_rfc3339(&row.get::<_, String>(6)?)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
                deleted_by: row.get(7)?,
                tasklist_id: Guid::from(row.get::<_, String>(8)?),
            })
        })?;
        rows.collect()
    }

    fn task_count(&self) -> Result<i64> {
        Ok(self.db.query_one("SELECT COUNT(*) FROM tasks WHERE status != 'deleted'")?)
    }
}

fn named_params_from(params: &HashMap<&'static str, String>) -> Vec<(&'static str, &dyn rusqlite::ToSql)> {
    // `rusqlite::named_params!` can't be built dynamically from a map, so we
    // hand-assemble the slice it expects. Order doesn't matter: these are
    // matched by `:name` in the SQL text.
    params
        .iter()
        .map(|(name, value)| {
            let key: &'static str = match *name {
                "id" => ":id",
                "google_task_id" => ":google_task_id",
                "title" => ":title",
                "description" => ":description",
                "notes" => ":notes",
                "due" => ":due",
                "status" => ":status",
                "priority" => ":priority",
                "project" => ":project",
                "tags_json" => ":tags_json",
                "dependencies_json" => ":dependencies_json",
                "tasklist_id" => ":tasklist_id",
                "list_title" => ":list_title",
                "position" => ":position",
                "created_at" => ":created_at",
                "modified_at" => ":modified_at",
                "completed_at" => ":completed_at",
                "recurrence_rule" => ":recurrence_rule",
                "is_recurring" => ":is_recurring",
                "recurring_task_id" => ":recurring_task_id",
                "estimated_duration_s" => ":estimated_duration_s",
                "actual_duration_s" => ":actual_duration_s",
                other => unreachable!("unexpected task column {other}"),
            };
            (key, value as &dyn rusqlite::ToSql)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Priority, TaskStatus};

    fn make_task(title: &str) -> Task {
        let now = Utc::now();
        Task {
            id: Guid::random(),
            google_task_id: None,
            title: title.to_string(),
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
    fn round_trip_preserves_fields() {
        let store = LocalStore::open_in_memory().unwrap();
        let t = make_task("write spec");
        let saved = store.save_task(&t).unwrap();
        let loaded = store.get_task(&saved.id).unwrap().unwrap();
        assert_eq!(loaded.title, "write spec");
        assert!(loaded.modified_at >= t.modified_at);
    }

    #[test]
    fn save_tasks_is_all_or_nothing() {
        let store = LocalStore::open_in_memory().unwrap();
        let a = make_task("a");
        let mut b = make_task("b");
        // Force a conflict on `b` by pre-inserting a "future" version.
        store.save_task(&b).unwrap();
        b.modified_at = b.modified_at - chrono::Duration::seconds(100);

        let result = store.save_tasks(&[a.clone(), b]);
        assert!(result.is_err());
        assert_eq!(store.task_count().unwrap(), 1); // only the pre-insert of `b`
    }

    #[test]
    fn delete_task_writes_log_before_marking_deleted() {
        let store = LocalStore::open_in_memory().unwrap();
        let t = store.save_task(&make_task("x")).unwrap();
        store.delete_task(&t.id, "user").unwrap();

        let log = store.deletion_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].task_id, t.id);

        let reloaded = store.get_task(&t.id).unwrap().unwrap();
        assert_eq!(reloaded.status, TaskStatus::Deleted);
    }

    #[test]
    fn duplicate_fingerprint_is_collapsed_on_save() {
        let store = LocalStore::open_in_memory().unwrap();
        let a = store.save_task(&make_task("apple")).unwrap();
        let mut b = make_task("Apple ");
        b.tasklist_id = a.tasklist_id.clone();
        let saved_b = store.save_task(&b).unwrap();
        assert_eq!(saved_b.id, a.id);
        assert_eq!(store.task_count().unwrap(), 1);
    }

    #[test]
    fn save_task_rejects_a_dependency_cycle() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut a = make_task("a");
        let mut b = make_task("b");
        a.dependencies = vec![b.id.clone()];
        b.dependencies = vec![a.id.clone()];

        store.save_task(&a).unwrap();
        let err = store.save_task(&b).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn list_mapping_round_trips() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut mapping = HashMap::new();
        mapping.insert("Inbox".to_string(), Guid::random());
        store.save_list_mapping(&mapping).unwrap();
        assert_eq!(store.load_list_mapping().unwrap(), mapping);
    }
}
