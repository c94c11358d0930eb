/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The on-disk schema, as a versioned `PRAGMA user_version` migration, the
//! way `logins::schema::init` does it.

use crate::error::Result;
use rusqlite::Connection;
use tasksync_sql_support::ConnExt;

/// Version 1: initial `tasks`, `task_lists`, `list_mapping`, `remote_dbs`,
/// `deletion_log` tables. Version 2: adds `tasks.google_task_id`.
pub const VERSION: i64 = 2;

const CREATE_TASKS_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS tasks (
        id                   TEXT PRIMARY KEY,
        google_task_id       TEXT,
        title                TEXT NOT NULL,
        description          TEXT,
        notes                TEXT,
        due                  TEXT,
        status               TEXT NOT NULL,
        priority             TEXT NOT NULL,
        project              TEXT,
        tags_json            TEXT NOT NULL DEFAULT '[]',
        dependencies_json    TEXT NOT NULL DEFAULT '[]',
        tasklist_id          TEXT NOT NULL,
        list_title           TEXT NOT NULL,
        position             INTEGER NOT NULL DEFAULT 0,
        created_at           TEXT NOT NULL,
        modified_at          TEXT NOT NULL,
        completed_at         TEXT,
        recurrence_rule      TEXT,
        is_recurring         INTEGER NOT NULL DEFAULT 0,
        recurring_task_id    TEXT,
        estimated_duration_s INTEGER,
        actual_duration_s    INTEGER
    )
";

const CREATE_STATUS_DUE_INDEX_SQL: &str = "
    CREATE INDEX IF NOT EXISTS idx_tasks_status_due ON tasks (status, due)
";

const CREATE_TASK_LISTS_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS task_lists (
        id       TEXT PRIMARY KEY,
        title    TEXT NOT NULL,
        updated  TEXT NOT NULL,
        position INTEGER NOT NULL DEFAULT 0,
        etag     TEXT
    )
";

const CREATE_LIST_MAPPING_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS list_mapping (
        title TEXT PRIMARY KEY,
        id    TEXT NOT NULL
    )
";

const CREATE_REMOTE_DBS_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS remote_dbs (
        id                     TEXT PRIMARY KEY,
        url                    TEXT NOT NULL,
        name                   TEXT NOT NULL,
        token                  TEXT NOT NULL,
        is_active              INTEGER NOT NULL DEFAULT 1,
        auto_sync              INTEGER NOT NULL DEFAULT 0,
        sync_frequency_minutes INTEGER,
        last_synced_at         TEXT
    )
";

const CREATE_DELETION_LOG_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS deletion_log (
        seq          INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id      TEXT NOT NULL,
        title        TEXT NOT NULL,
        description  TEXT,
        due          TEXT,
        status       TEXT NOT NULL,
        deleted_at   TEXT NOT NULL,
        deleted_by   TEXT NOT NULL,
        tasklist_id  TEXT NOT NULL
    )
";

pub(crate) fn init(db: &Connection) -> Result<()> {
    let user_version: i64 = db.query_one("PRAGMA user_version")?;
    if user_version == 0 {
        return create(db);
    }
    if user_version < VERSION {
        upgrade(db, user_version)?;
    } else if user_version > VERSION {
        log::warn!(
            "opened a tasks.db written by a newer schema ({user_version} > {VERSION}); proceeding optimistically"
        );
    }
    Ok(())
}

fn create(db: &Connection) -> Result<()> {
    log::debug!("creating tasksync schema");
    db.execute_all(&[
        CREATE_TASKS_TABLE_SQL,
        CREATE_STATUS_DUE_INDEX_SQL,
        CREATE_TASK_LISTS_TABLE_SQL,
        CREATE_LIST_MAPPING_TABLE_SQL,
        CREATE_REMOTE_DBS_TABLE_SQL,
        CREATE_DELETION_LOG_TABLE_SQL,
        &format!("PRAGMA user_version = {VERSION}"),
    ])?;
    Ok(())
}

fn upgrade(db: &Connection, from: i64) -> Result<()> {
    log::debug!("upgrading tasksync schema from {from} to {VERSION}");
    for version in from..VERSION {
        upgrade_from(db, version)?;
    }
    db.execute_batch(&format!("PRAGMA user_version = {VERSION}"))?;
    Ok(())
}

fn upgrade_from(db: &Connection, from: i64) -> Result<()> {
    match from {
        1 => {
            db.execute_batch("ALTER TABLE tasks ADD COLUMN google_task_id TEXT")?;
            Ok(())
        }
        _ => Err(crate::error::Error::SchemaMismatch(format!(
            "no migration path from schema version {from}"
        ))),
    }
}
