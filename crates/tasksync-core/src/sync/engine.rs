/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Orchestrates push/pull/bidirectional sync for one account, grounded on
//! `logins::sync::engine::LoginsSyncEngine`'s composition of a store handle,
//! an interrupt scope, and a plan-then-apply reconciliation pass
//! (`update_plan::UpdatePlan`), generalized from a two-store mirror/local
//! reconciliation to the three-way Local/Remote/Google fan-out here.

use super::resolver::{ConflictResolver, SideEffect, VersionedTask};
use crate::error::{Error, Result};
use crate::fingerprint::fingerprint;
use crate::google::GoogleClient;
use crate::model::{ChangeCounts, JobStatus, SyncResult, Task, TaskStatus};
use crate::store::{LocalStore, TaskFilter, TaskStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tasksync_interrupt::Interruptee;

/// `(percentage, message, status)`, invoked synchronously on the sync
/// worker; callbacks must not block for long.
pub type ProgressCallback = Box<dyn Fn(u8, &str, JobStatus) + Send>;

const PHASE_LIST_ENUMERATION: u8 = 10;
const PHASE_SNAPSHOT: u8 = 30;
const PHASE_CLASSIFY: u8 = 20;
const PHASE_APPLY: u8 = 40;

const MAX_CONFLICT_RETRIES: u32 = 3;

pub struct SyncEngine {
    local: Arc<LocalStore>,
    google: Option<Arc<GoogleClient>>,
    resolver: ConflictResolver,
    pull_range_days: Option<u32>,
}

impl SyncEngine {
    pub fn new(
        local: Arc<LocalStore>,
        google: Option<Arc<GoogleClient>>,
        resolver: ConflictResolver,
        pull_range_days: Option<u32>,
    ) -> Self {
        Self {
            local,
            google,
            resolver,
            pull_range_days,
        }
    }

    pub fn push(&self, scope: &dyn Interruptee, progress: &ProgressCallback) -> Result<SyncResult> {
        let start = Instant::now();
        tasksync_support_error::report_breadcrumb("push: starting");
        progress(0, "starting push", JobStatus::Running);
        let google = self.google()?;
        let mut changed = ChangeCounts::default();

        progress(PHASE_LIST_ENUMERATION, "enumerating lists", JobStatus::Running);
        let local_tasks = self.local.load_tasks(&TaskFilter::default())?;
        scope.err_if_interrupted()?;

        let total = local_tasks.len().max(1) as u32;
        let mut done = 0u32;
        for task in &local_tasks {
            scope.err_if_interrupted()?;
            let list_id = task.tasklist_id.as_str();
            match task.status {
                TaskStatus::Deleted => match task.google_task_id.as_deref() {
                    None => {
                        self.local.purge_task(&task.id)?;
                        changed.deleted += 1;
                    }
                    Some(gid) => match google.delete_task(list_id, gid) {
                        Ok(()) => {
                            self.local.purge_task(&task.id)?;
                            changed.deleted += 1;
                        }
                        Err(e) if e.is_retriable() => log::warn!("push: transient delete failure for {}: {e}", task.id),
                        Err(e) => return Err(e),
                    },
                },
                // A task already linked to a Google id is patched directly;
                // a 404 there means the upstream row is gone (deleted out
                // from under us) and is recreated by inserting. A task with
                // no linked id yet is always inserted, never probed first,
                // so a transient lookup failure can never be mistaken for
                // "doesn't exist" and cause a duplicate insert.
                _ => match task.google_task_id.as_deref() {
                    Some(gid) => match google.patch_task(list_id, gid, task) {
                        Ok(_) => changed.updated += 1,
                        Err(Error::Upstream { code: 404, .. }) => match google.insert_task(list_id, task) {
                            Ok(created) => {
                                self.link_google_id(task, created.google_task_id)?;
                                changed.created += 1;
                            }
                            Err(e) if e.is_retriable() => {
                                log::warn!("push: transient upstream failure for {}: {e}", task.id)
                            }
                            Err(e) => return Err(e),
                        },
                        Err(e) if e.is_retriable() => log::warn!("push: transient upstream failure for {}: {e}", task.id),
                        Err(e) => return Err(e),
                    },
                    None => match google.insert_task(list_id, task) {
                        Ok(created) => {
                            self.link_google_id(task, created.google_task_id)?;
                            changed.created += 1;
                        }
                        Err(e) if e.is_retriable() => log::warn!("push: transient upstream failure for {}: {e}", task.id),
                        Err(e) => return Err(e),
                    },
                },
            }
            done += 1;
            let phase_progress = (PHASE_APPLY as u32 * done / total) as u8;
            progress(
                (PHASE_LIST_ENUMERATION + PHASE_SNAPSHOT + PHASE_CLASSIFY + phase_progress).min(99),
                "pushing",
                JobStatus::Running,
            );
        }

        progress(100, "push complete", JobStatus::Completed);
        Ok(SyncResult {
            success: true,
            message: "push complete".into(),
            changed,
            conflicts_resolved: 0,
            duration: start.elapsed(),
        })
    }

    pub fn pull(&self, scope: &dyn Interruptee, progress: &ProgressCallback) -> Result<SyncResult> {
        let start = Instant::now();
        tasksync_support_error::report_breadcrumb("pull: starting");
        progress(0, "starting pull", JobStatus::Running);
        let google = self.google()?;
        let mut changed = ChangeCounts::default();
        let mut conflicts_resolved = 0u32;

        // Step 1: ensure list mapping is current.
        progress(PHASE_LIST_ENUMERATION, "enumerating lists", JobStatus::Running);
        let mut mapping = self.local.load_list_mapping()?;
        let remote_lists = google.list_tasklists()?;
        for list in &remote_lists {
            mapping.entry(list.title.clone()).or_insert_with(|| list.id.clone().into());
        }
        self.local.save_list_mapping(&mapping)?;
        scope.err_if_interrupted()?;

        // Step 2: fetch tasks per list, bounded by pull_range_days.
        progress(
            PHASE_LIST_ENUMERATION + PHASE_SNAPSHOT,
            "fetching remote tasks",
            JobStatus::Running,
        );
        let since = self.pull_range_days.map(|days| chrono::Utc::now() - chrono::Duration::days(days as i64));
        let mut google_tasks = Vec::new();
        for list in &remote_lists {
            scope.err_if_interrupted()?;
            let mut tasks = google.list_tasks(&list.id, since, true, true, true)?;
            for t in &mut tasks {
                t.list_title = list.title.clone();
            }
            google_tasks.extend(tasks);
        }

        // Step 3: snapshot Local tasks keyed by fingerprint and by the
        // Google id they were last linked to.
        let local_tasks = self.local.load_tasks(&TaskFilter::default())?;
        let mut by_fingerprint: HashMap<String, Task> = HashMap::new();
        let mut by_google_id: HashMap<String, Task> = HashMap::new();
        for t in &local_tasks {
            if let Some(gid) = &t.google_task_id {
                by_google_id.insert(gid.clone(), t.clone());
            }
            if let Ok(fp) = fingerprint(t) {
                by_fingerprint.insert(fp.to_string(), t.clone());
            }
        }
        progress(
            PHASE_LIST_ENUMERATION + PHASE_SNAPSHOT + PHASE_CLASSIFY,
            "classifying",
            JobStatus::Running,
        );

        // Step 4: classify each Google task and apply. A Google task is
        // matched to a Local row by `google_task_id`, never by `id` (the
        // two are independent identities once a task has been pushed).
        let mut to_save = Vec::new();
        let mut resolved_status: HashMap<String, TaskStatus> = HashMap::new();
        for g in google_tasks {
            scope.err_if_interrupted()?;
            let matched = g.google_task_id.as_deref().and_then(|gid| by_google_id.get(gid));
            if let Some(local) = matched {
                if local.modified_at == g.modified_at {
                    continue;
                }
                let resolution = self.resolver.resolve(&[
                    VersionedTask { task: local.clone(), origin: SideEffect::PatchLocal },
                    VersionedTask { task: g, origin: SideEffect::PatchGoogle },
                ]);
                conflicts_resolved += 1;
                resolved_status.insert(resolution.task.id.as_str().to_string(), resolution.task.status);
                to_save.push(resolution.task);
                changed.updated += 1;
                continue;
            }
            if let Ok(fp) = fingerprint(&g) {
                if let Some(existing) = by_fingerprint.get(&fp.to_string()) {
                    log::debug!(
                        "pull: {:?} is a fingerprint-duplicate of local {}",
                        g.google_task_id,
                        existing.id
                    );
                    if existing.google_task_id.is_none() {
                        let mut linked = existing.clone();
                        linked.google_task_id = g.google_task_id.clone();
                        to_save.push(linked);
                    }
                    continue;
                }
            }
            to_save.push(g);
            changed.created += 1;
        }

        // Step 5: propagate deletions since last pull by requesting Google
        // deletion (idempotent: a 404 is success). A deletion that a
        // concurrent Google edit just un-deleted (step 4 above) must not be
        // propagated. A task never linked to a Google id has nothing to
        // delete upstream.
        for t in local_tasks.iter().filter(|t| t.status == TaskStatus::Deleted) {
            scope.err_if_interrupted()?;
            if let Some(status) = resolved_status.get(t.id.as_str()) {
                if *status != TaskStatus::Deleted {
                    continue;
                }
            }
            let Some(gid) = t.google_task_id.as_deref() else {
                self.local.purge_task(&t.id)?;
                changed.deleted += 1;
                continue;
            };
            if google.delete_task(t.tasklist_id.as_str(), gid).is_ok() {
                self.local.purge_task(&t.id)?;
                changed.deleted += 1;
            }
        }

        // Step 6: apply the plan in one Local transaction, retrying
        // optimistic-lock conflicts per row up to 3 times.
        progress(
            PHASE_LIST_ENUMERATION + PHASE_SNAPSHOT + PHASE_CLASSIFY + PHASE_APPLY / 2,
            "applying",
            JobStatus::Running,
        );
        tasksync_support_error::report_breadcrumb(format!(
            "pull: applying {} rows ({conflicts_resolved} conflicts resolved)",
            to_save.len()
        ));
        self.apply_with_retries(&to_save)?;

        progress(100, "pull complete", JobStatus::Completed);
        Ok(SyncResult {
            success: true,
            message: "pull complete".into(),
            changed,
            conflicts_resolved,
            duration: start.elapsed(),
        })
    }

    /// Runs Pull, then Push, then a second Pull to absorb the echoes of its
    /// own Push.
    pub fn bidirectional(&self, scope: &dyn Interruptee, progress: &ProgressCallback) -> Result<SyncResult> {
        let start = Instant::now();
        let first_pull = self.pull(scope, progress)?;
        scope.err_if_interrupted()?;
        let push = self.push(scope, progress)?;
        scope.err_if_interrupted()?;
        let second_pull = self.pull(scope, progress)?;

        let mut changed = first_pull.changed;
        changed.created += push.changed.created + second_pull.changed.created;
        changed.updated += push.changed.updated + second_pull.changed.updated;
        changed.deleted += push.changed.deleted + second_pull.changed.deleted;

        Ok(SyncResult {
            success: true,
            message: "bidirectional sync complete".into(),
            changed,
            conflicts_resolved: first_pull.conflicts_resolved + second_pull.conflicts_resolved,
            duration: start.elapsed(),
        })
    }

    /// Records a newly-assigned Google id on the Local row after an insert,
    /// without otherwise touching the row: Google's own reconstruction of
    /// the task is lossy for Local-only fields, so we update just the one
    /// field on a clone of what we already had rather than save what Google
    /// handed back.
    fn link_google_id(&self, task: &Task, google_task_id: Option<String>) -> Result<()> {
        let mut updated = task.clone();
        updated.google_task_id = google_task_id;
        self.local.save_task(&updated)?;
        Ok(())
    }

    fn apply_with_retries(&self, tasks: &[Task]) -> Result<()> {
        let mut pending: Vec<Task> = tasks.to_vec();
        for attempt in 0..=MAX_CONFLICT_RETRIES {
            match self.local.save_tasks(&pending) {
                Ok(_) => return Ok(()),
                Err(Error::Conflict(id)) if attempt < MAX_CONFLICT_RETRIES => {
                    log::warn!("pull: optimistic-lock conflict on {id}, re-reading and retrying (attempt {attempt})");
                    pending = pending
                        .iter()
                        .map(|t| {
                            if t.id.as_str() == id {
                                self.local
                                    .get_task(&t.id)
                                    .ok()
                                    .flatten()
                                    .unwrap_or_else(|| t.clone())
                            } else {
                                t.clone()
                            }
                        })
                        .collect();
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::Conflict("exceeded retry budget applying pull plan".into()))
    }

    fn google(&self) -> Result<&GoogleClient> {
        self.google.as_deref().ok_or(Error::Validation("account has no Google credentials configured".into()))
    }
}
