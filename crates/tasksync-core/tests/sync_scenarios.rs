/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! End-to-end sync scenarios, grounded on `remote_settings::client`'s
//! mockito-backed HTTP tests and on `logins`'s own `tests/` integration
//! layout.

use std::cell::Cell;
use std::sync::Arc;

use chrono::Utc;
use mockito::mock;

use tasksync_core::google::TokenSource;
use tasksync_core::{
    ConflictResolver, ConflictStrategy, Error, GoogleClient, JobKind, JobStatus, LocalStore,
    Priority, Result, SyncEngine, SyncRegistry, Task, TaskStatus, TaskStore,
};
use tasksync_guid::Guid;
use tasksync_interrupt::{Interruptee, NeverInterrupts};

struct StaticToken;

impl TokenSource for StaticToken {
    fn access_token(&self) -> Result<String> {
        Ok("test-token".to_string())
    }

    fn refresh(&self) -> Result<String> {
        Ok("test-token".to_string())
    }
}

fn google_client() -> GoogleClient {
    GoogleClient::with_base_url(mockito::server_url(), Box::new(StaticToken))
}

fn engine(local: Arc<LocalStore>, strategy: ConflictStrategy, pull_range_days: Option<u32>) -> SyncEngine {
    SyncEngine::new(local, Some(Arc::new(google_client())), ConflictResolver::new(strategy), pull_range_days)
}

fn no_progress() -> Box<dyn Fn(u8, &str, JobStatus) + Send> {
    Box::new(|_, _, _| {})
}

fn make_task(title: &str, tasklist_id: Guid) -> Task {
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
        tasklist_id,
        list_title: "Inbox".into(),
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

fn mock_one_list() -> mockito::Mock {
    mock("GET", "/users/@me/lists")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"items":[{"id":"list-1","title":"Inbox","updated":"2024-01-01T00:00:00Z"}]}"#)
        .create()
}

/// S1 — Dedup on pull: Local has {id=L1, title="apple"}, Google has a
/// different id with title "Apple " (same fingerprint). Pull must not
/// create a second row.
#[test]
fn s1_dedup_on_pull() {
    tasksync_support_error::init_test_logging();
    let local = Arc::new(LocalStore::open_in_memory().unwrap());
    let l1 = local.save_task(&make_task("apple", Guid::random())).unwrap();

    let _lists_m = mock_one_list();
    let _tasks_m = mock("GET", "/lists/list-1/tasks?showCompleted=true&showHidden=true&showDeleted=true")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"items":[{"id":"google-g1","title":"Apple ","status":"needsAction","updated":"2024-01-05T00:00:00Z"}]}"#,
        )
        .create();

    let eng = engine(Arc::clone(&local), ConflictStrategy::LatestWins, None);
    eng.pull(&NeverInterrupts, &no_progress()).unwrap();

    assert_eq!(local.task_count().unwrap(), 1);
    assert_eq!(local.get_task(&l1.id).unwrap().unwrap().id, l1.id);
}

/// S2 — Latest wins: Google has the linked task with a later `modified_at`
/// and an updated title; that title must win.
#[test]
fn s2_latest_wins() {
    tasksync_support_error::init_test_logging();
    let local = Arc::new(LocalStore::open_in_memory().unwrap());
    let mut l1 = make_task("write spec", Guid::random());
    l1.google_task_id = Some("google-l1".to_string());
    l1.modified_at = Utc::now() - chrono::Duration::hours(2);
    let l1 = local.save_task(&l1).unwrap();

    let _lists_m = mock_one_list();
    let body = format!(
        r#"{{"items":[{{"id":"google-l1","title":"write spec v2","status":"needsAction","updated":"{}"}}]}}"#,
        Utc::now().to_rfc3339(),
    );
    let _tasks_m = mock("GET", "/lists/list-1/tasks?showCompleted=true&showHidden=true&showDeleted=true")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create();

    let eng = engine(Arc::clone(&local), ConflictStrategy::LatestWins, None);
    eng.pull(&NeverInterrupts, &no_progress()).unwrap();

    assert_eq!(local.get_task(&l1.id).unwrap().unwrap().title, "write spec v2");
}

/// S3 — Deletion does not clobber a newer edit: a Local delete precedes a
/// Google edit; the bidirectional sync must keep the edit and retain the
/// deletion-log entry.
#[test]
fn s3_deletion_does_not_clobber_newer_edit() {
    tasksync_support_error::init_test_logging();
    let local = Arc::new(LocalStore::open_in_memory().unwrap());
    let mut l1 = make_task("groceries", Guid::random());
    l1.google_task_id = Some("google-l1".to_string());
    let l1 = local.save_task(&l1).unwrap();
    local.delete_task(&l1.id, "user").unwrap();

    let _lists_m = mock_one_list();
    let body = format!(
        r#"{{"items":[{{"id":"google-l1","title":"groceries (updated)","status":"needsAction","updated":"{}"}}]}}"#,
        (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
    );
    let _tasks_m = mock("GET", "/lists/list-1/tasks?showCompleted=true&showHidden=true&showDeleted=true")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create();
    // push() of the (now non-deleted) task patches directly under the
    // linked Google id, addressed under the Local task's own `tasklist_id`
    // (the resolver preserves Local's list membership).
    let _patch_m = mock("PATCH", format!("/lists/{}/tasks/google-l1", l1.tasklist_id).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"google-l1","title":"groceries (updated)","status":"needsAction"}"#)
        .create();

    let eng = engine(Arc::clone(&local), ConflictStrategy::LatestWins, None);
    eng.bidirectional(&NeverInterrupts, &no_progress()).unwrap();

    let reloaded = local.get_task(&l1.id).unwrap().unwrap();
    assert_ne!(reloaded.status, TaskStatus::Deleted);
    assert_eq!(reloaded.title, "groceries (updated)");

    let log = local.deletion_log().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].task_id, l1.id);
}

/// S4 — Busy: a second job for the same account is rejected while one is
/// outstanding, and no second job is registered.
#[test]
fn s4_busy_rejects_concurrent_job_for_same_account() {
    tasksync_support_error::init_test_logging();
    let registry = SyncRegistry::new();
    let (first_id, _scope) = registry.start("acct-a", JobKind::Both).unwrap();

    let err = registry.start("acct-a", JobKind::Push).unwrap_err();
    assert!(matches!(err, Error::Busy));

    // The only job on record is still the first one.
    assert!(registry.progress(&first_id).is_ok());
}

/// S5 — Cancellation: interrupting mid-push stops before the remaining
/// tasks are sent, leaving Local (and the upstream) at a valid prefix of
/// the plan.
#[test]
fn s5_cancellation_stops_at_a_plan_prefix() {
    struct CancelAfterN {
        remaining: Cell<u32>,
    }
    impl Interruptee for CancelAfterN {
        fn was_interrupted(&self) -> bool {
            let r = self.remaining.get();
            if r == 0 {
                true
            } else {
                self.remaining.set(r - 1);
                false
            }
        }
    }

    tasksync_support_error::init_test_logging();
    let local = Arc::new(LocalStore::open_in_memory().unwrap());
    let list_id = Guid::random();
    let t1 = local.save_task(&make_task("first", list_id.clone())).unwrap();
    let _t2 = local.save_task(&make_task("second", list_id.clone())).unwrap();
    let _t3 = local.save_task(&make_task("third", list_id)).unwrap();

    // t1 has no linked Google id yet, so push() inserts it directly; the
    // other two tasks' inserts must never be observed once cancellation
    // fires.
    let _insert_m = mock("POST", format!("/lists/{}/tasks", t1.tasklist_id).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(r#"{{"id":"{}","title":"first","status":"needsAction"}}"#, t1.id))
        .create();

    let registry = SyncRegistry::new();
    let (job_id, _scope) = registry.start("acct-b", JobKind::Push).unwrap();
    registry.report_progress(&job_id, 10, "starting", JobStatus::Running);

    // Allow exactly the two `err_if_interrupted` checks that precede
    // processing the first task (post-load, then the first loop iteration);
    // the third check, before the second task, reports cancellation.
    let cancel_scope = CancelAfterN { remaining: Cell::new(2) };

    let eng = engine(Arc::clone(&local), ConflictStrategy::LatestWins, None);
    let result = eng.push(&cancel_scope, &no_progress());

    match result {
        Err(e @ Error::Interrupted(_)) => registry.fail(&job_id, &e, String::new()),
        other => panic!("expected an interruption, got {other:?}"),
    }

    let job = registry.progress(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);

    // Only the first task was pushed; the other two were never attempted.
    _insert_m.expect(1).assert();
}

/// S6 — Range pull: with a bounded `pull_range_days`, a stale Google task
/// outside the window is not fetched, and a Local task left unchanged by
/// the pull is not deleted.
#[test]
fn s6_range_pull_leaves_untouched_tasks_alone() {
    tasksync_support_error::init_test_logging();
    let local = Arc::new(LocalStore::open_in_memory().unwrap());
    let existing = local.save_task(&make_task("standing task", Guid::random())).unwrap();

    let _lists_m = mock_one_list();
    // Any request that reaches this endpoint with `updatedMin` set is
    // treated as already filtered server-side, so a matching request simply
    // yields no items.
    let _tasks_m = mock(
        "GET",
        mockito::Matcher::Regex(r"^/lists/list-1/tasks\?.*updatedMin=.*".to_string()),
    )
    .with_status(200)
    .with_header("content-type", "application/json")
    .with_body(r#"{"items":[]}"#)
    .create();

    let eng = engine(Arc::clone(&local), ConflictStrategy::LatestWins, Some(7));
    eng.pull(&NeverInterrupts, &no_progress()).unwrap();

    assert_eq!(local.task_count().unwrap(), 1);
    let reloaded = local.get_task(&existing.id).unwrap().unwrap();
    assert_eq!(reloaded.modified_at, existing.modified_at);
    assert_ne!(reloaded.status, TaskStatus::Deleted);
}

/// S7 — Push idempotence: once a task has been linked to a Google id by a
/// first push, a second push must patch that id rather than inserting a
/// second row on Google's side.
#[test]
fn s7_second_push_patches_instead_of_reinserting() {
    tasksync_support_error::init_test_logging();
    let local = Arc::new(LocalStore::open_in_memory().unwrap());
    let list_id = Guid::random();
    let t1 = local.save_task(&make_task("first", list_id)).unwrap();

    let _insert_m = mock("POST", format!("/lists/{}/tasks", t1.tasklist_id).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"google-t1","title":"first","status":"needsAction"}"#)
        .create();

    let eng = engine(Arc::clone(&local), ConflictStrategy::LatestWins, None);
    eng.push(&NeverInterrupts, &no_progress()).unwrap();

    let linked = local.get_task(&t1.id).unwrap().unwrap();
    assert_eq!(linked.google_task_id.as_deref(), Some("google-t1"));
    _insert_m.expect(1).assert();

    let _patch_m = mock("PATCH", format!("/lists/{}/tasks/google-t1", t1.tasklist_id).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"google-t1","title":"first","status":"needsAction"}"#)
        .create();

    eng.push(&NeverInterrupts, &no_progress()).unwrap();

    _patch_m.expect(1).assert();
    assert_eq!(local.task_count().unwrap(), 1);
}
