/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Tracks running sync jobs, enforces per-account exclusivity, and lets
//! callers poll progress or request cancellation. Grounded on
//! `logins::db::LoginDb`'s use of `SqlInterruptHandle` as a cross-thread
//! cancellation token, generalized from one connection's handle to a
//! registry of independent job entries.

use crate::error::{Error, Result};
use crate::model::{JobKind, JobStatus, SyncJob};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tasksync_guid::Guid;
use tasksync_interrupt::InterruptScope;

struct JobEntry {
    job: SyncJob,
    scope: InterruptScope,
}

/// `map[job_id] -> JobEntry` plus `map[account_id] -> job_id`.
#[derive(Default)]
pub struct SyncRegistry {
    jobs: Mutex<HashMap<Guid, JobEntry>>,
    running_by_account: Mutex<HashMap<String, Guid>>,
}

impl SyncRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a new job for `account`, failing fast with `Error::Busy`
    /// if one is already running for it.
    pub fn start(&self, account: &str, kind: JobKind) -> Result<(Guid, InterruptScope)> {
        let mut running = self.running_by_account.lock();
        if running.contains_key(account) {
            return Err(Error::Busy);
        }

        let id = Guid::random();
        let scope = InterruptScope::new();
        let job = SyncJob {
            id: id.clone(),
            account_id: account.to_string(),
            kind,
            started_at: chrono::Utc::now(),
            percentage: 0,
            message: "queued".into(),
            status: JobStatus::Pending,
            error: None,
            traceback: None,
        };
        self.jobs.lock().insert(id.clone(), JobEntry { job, scope: scope.clone() });
        running.insert(account.to_string(), id.clone());
        Ok((id, scope))
    }

    /// Write-once-increasing progress update. Silently ignores updates for
    /// unknown or already-terminal jobs — the
    /// worker thread racing a `cleanup` is expected, not an error.
    pub fn report_progress(&self, job_id: &Guid, percentage: u8, message: &str, status: JobStatus) {
        let mut jobs = self.jobs.lock();
        if let Some(entry) = jobs.get_mut(job_id) {
            if entry.job.status.is_terminal() {
                return;
            }
            entry.job.percentage = entry.job.percentage.max(percentage);
            entry.job.message = message.to_string();
            entry.job.status = status;
            if status.is_terminal() {
                self.running_by_account.lock().remove(&entry.job.account_id);
            }
        }
    }

    pub fn fail(&self, job_id: &Guid, error: &Error, traceback: String) {
        let mut jobs = self.jobs.lock();
        if let Some(entry) = jobs.get_mut(job_id) {
            if entry.job.status.is_terminal() {
                return;
            }
            entry.job.status = if matches!(error, Error::Interrupted(_) | Error::Cancelled) {
                JobStatus::Cancelled
            } else {
                JobStatus::Error
            };
            entry.job.error = Some(error.to_string());
            entry.job.traceback = Some(traceback);
            self.running_by_account.lock().remove(&entry.job.account_id);
            if entry.job.status == JobStatus::Error {
                tasksync_support_error::report_error(error.label(), &error.to_string());
            }
        }
    }

    pub fn progress(&self, job_id: &Guid) -> Result<SyncJob> {
        self.jobs
            .lock()
            .get(job_id)
            .map(|e| e.job.clone())
            .ok_or_else(|| Error::Validation(format!("no such job {job_id}")))
    }

    /// Polls until the job reaches a terminal state or `timeout` elapses;
    /// returns a `SyncJob` with status `timeout` in the latter case without
    /// cancelling it.
    pub fn wait(&self, job_id: &Guid, timeout: Duration) -> Result<SyncJob> {
        let deadline = Instant::now() + timeout;
        loop {
            let job = self.progress(job_id)?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            if Instant::now() >= deadline {
                let mut snapshot = job;
                snapshot.status = JobStatus::Timeout;
                return Ok(snapshot);
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Sets the job's cancellation flag; the engine observes it between
    /// phases. Returns `false` if the job is unknown or already terminal.
    pub fn cancel(&self, job_id: &Guid) -> bool {
        let jobs = self.jobs.lock();
        match jobs.get(job_id) {
            Some(entry) if !entry.job.status.is_terminal() => {
                entry.scope.cancel();
                true
            }
            _ => false,
        }
    }

    /// Drops terminal jobs older than `max_age` from the registry.
    pub fn cleanup(&self, max_age: Duration) {
        let now = chrono::Utc::now();
        self.jobs.lock().retain(|_, entry| {
            !entry.job.status.is_terminal()
                || now
                    .signed_duration_since(entry.job.started_at)
                    .to_std()
                    .map(|age| age < max_age)
                    .unwrap_or(true)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_account_rejects_second_start() {
        let registry = SyncRegistry::new();
        let (_id, _scope) = registry.start("acct-1", JobKind::Pull).unwrap();
        let err = registry.start("acct-1", JobKind::Push).unwrap_err();
        assert!(matches!(err, Error::Busy));
    }

    #[test]
    fn cancel_flips_the_shared_scope() {
        let registry = SyncRegistry::new();
        let (id, scope) = registry.start("acct-1", JobKind::Pull).unwrap();
        assert!(registry.cancel(&id));
        assert!(scope.is_cancelled());
    }

    #[test]
    fn progress_updates_never_decrease() {
        let registry = SyncRegistry::new();
        let (id, _scope) = registry.start("acct-1", JobKind::Pull).unwrap();
        registry.report_progress(&id, 50, "halfway", JobStatus::Running);
        registry.report_progress(&id, 10, "stale update", JobStatus::Running);
        assert_eq!(registry.progress(&id).unwrap().percentage, 50);
    }

    #[test]
    fn completing_a_job_frees_the_account_slot() {
        let registry = SyncRegistry::new();
        let (id, _scope) = registry.start("acct-1", JobKind::Pull).unwrap();
        registry.report_progress(&id, 100, "done", JobStatus::Completed);
        assert!(registry.start("acct-1", JobKind::Push).is_ok());
    }
}
