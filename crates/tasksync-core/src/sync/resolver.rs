/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Reconciles up to three versions of one logical task into a single
//! canonical [`Task`] plus the side-effects needed to converge every store
//! on it. Grounded on `logins::sync::merge::LoginDelta::merge`'s per-field
//! "pick a winner" shape, generalized from a two-way delta merge to an
//! up-to-three-version comparison and a union instead of a delta.
//!
//! The resolver is pure: it never touches a store, only `Task` values.

use crate::model::{ConflictStrategy, Task, TaskStatus};
use std::collections::BTreeSet;

/// Which stores should receive the resolved task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    PatchLocal,
    PatchRemote,
    PatchGoogle,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub task: Task,
    pub side_effects: Vec<SideEffect>,
}

/// One version of a logical task plus which store(s) it came from, so the
/// resolver can decide side-effects without the engine re-deriving them.
#[derive(Debug, Clone)]
pub struct VersionedTask {
    pub task: Task,
    pub origin: SideEffect,
}

pub struct ConflictResolver {
    pub strategy: ConflictStrategy,
}

impl ConflictResolver {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self { strategy }
    }

    /// `versions` holds every version known for one logical task (by equal
    /// fingerprint or cross-store id mapping), at least one entry.
    pub fn resolve(&self, versions: &[VersionedTask]) -> Resolution {
        assert!(!versions.is_empty(), "resolve requires at least one version");
        if versions.len() == 1 {
            return Resolution {
                task: versions[0].task.clone(),
                side_effects: all_origins_except(versions, versions[0].origin),
            };
        }

        match self.strategy {
            ConflictStrategy::LocalWins => self.pick(versions, SideEffect::PatchLocal),
            ConflictStrategy::RemoteWins => self.pick(versions, SideEffect::PatchRemote),
            ConflictStrategy::LatestWins => self.latest_wins(versions, false),
            ConflictStrategy::Merge => self.latest_wins(versions, true),
        }
    }

    fn pick(&self, versions: &[VersionedTask], preferred: SideEffect) -> Resolution {
        let base = versions
            .iter()
            .find(|v| v.origin == preferred)
            .unwrap_or(&versions[0]);
        Resolution {
            task: base.task.clone(),
            side_effects: all_origins_except(versions, base.origin),
        }
    }

    /// The `latest_wins` algorithm, with `concatenate` extending it with the
    /// `merge` strategy's divergent-text concatenation.
    fn latest_wins(&self, versions: &[VersionedTask], concatenate: bool) -> Resolution {
        let base_idx = pick_base_index(versions);
        let base = &versions[base_idx];
        let mut resolved = base.task.clone();

        // Step 2: promote the more advanced status, except deletion only
        // wins if strictly newer than every other version.
        let most_advanced = versions
            .iter()
            .filter(|v| v.task.status != TaskStatus::Deleted)
            .max_by_key(|v| v.task.status.advancement_rank());
        if let Some(advanced) = most_advanced {
            if advanced.task.status.advancement_rank() > resolved.status.advancement_rank() {
                resolved.status = advanced.task.status;
            }
        }
        let strictly_newest_is_deletion = versions
            .iter()
            .max_by_key(|v| v.task.modified_at)
            .map(|newest| {
                newest.task.status == TaskStatus::Deleted
                    && versions
                        .iter()
                        .all(|v| v.task.modified_at <= newest.task.modified_at)
                    && versions
                        .iter()
                        .any(|v| v.task.modified_at < newest.task.modified_at)
            })
            .unwrap_or(false);
        if strictly_newest_is_deletion {
            resolved.status = TaskStatus::Deleted;
        }

        // Step 3: union tags and dependencies.
        let mut tags = BTreeSet::new();
        let mut dependencies = BTreeSet::new();
        for v in versions {
            tags.extend(v.task.tags.iter().cloned());
            dependencies.extend(v.task.dependencies.iter().cloned());
        }
        resolved.tags = tags.into_iter().collect();
        resolved.dependencies = dependencies.into_iter().collect();

        // Step 4: due from the base, falling back to any other version's.
        if resolved.due.is_none() {
            if let Some(due) = versions.iter().find_map(|v| v.task.due) {
                resolved.due = Some(due);
            }
        }

        // Step 5: re-pin the fields Google can never know about (it has no
        // concept of id, list membership, creation time, or recurrence) from
        // whichever version actually carries the full schema: Local first,
        // Remote if no Local version is present. A Google-origin base would
        // otherwise silently blank all of these.
        let schema_source = versions
            .iter()
            .find(|v| v.origin == SideEffect::PatchLocal)
            .or_else(|| versions.iter().find(|v| v.origin == SideEffect::PatchRemote));
        if let Some(source) = schema_source {
            resolved.id = source.task.id.clone();
            resolved.tasklist_id = source.task.tasklist_id.clone();
            resolved.list_title = source.task.list_title.clone();
            resolved.created_at = source.task.created_at;
            resolved.recurrence_rule = source.task.recurrence_rule.clone();
            resolved.is_recurring = source.task.is_recurring;
            resolved.recurring_task_id = source.task.recurring_task_id.clone();
            resolved.estimated_duration = source.task.estimated_duration;
            resolved.actual_duration = source.task.actual_duration;
        }
        resolved.google_task_id = versions.iter().find_map(|v| v.task.google_task_id.clone());

        if concatenate {
            resolved.description = concat_divergent(versions, |t| t.description.as_deref());
            resolved.notes = concat_divergent(versions, |t| t.notes.as_deref());
        }

        resolved.enforce_completion_invariant();

        Resolution {
            task: resolved,
            side_effects: all_origins_except(versions, base.origin),
        }
    }
}

/// Chooses the version with the greatest `modified_at` as the base. Ties on
/// `modified_at` break in favour of Local, then Remote, then Google.
fn pick_base_index(versions: &[VersionedTask]) -> usize {
    let origin_rank = |o: SideEffect| match o {
        SideEffect::PatchLocal => 0,
        SideEffect::PatchRemote => 1,
        SideEffect::PatchGoogle => 2,
    };
    versions
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            b.task
                .modified_at
                .cmp(&a.task.modified_at)
                .then(origin_rank(a.origin).cmp(&origin_rank(b.origin)))
        })
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn concat_divergent<'a>(
    versions: &'a [VersionedTask],
    field: impl Fn(&'a Task) -> Option<&'a str>,
) -> Option<String> {
    let mut seen = Vec::new();
    for v in versions {
        if let Some(text) = field(&v.task) {
            let text = text.trim();
            if !text.is_empty() && !seen.iter().any(|s: &String| s == text) {
                seen.push(text.to_string());
            }
        }
    }
    if seen.is_empty() {
        None
    } else {
        Some(seen.join("\n---\n"))
    }
}

fn all_origins_except(versions: &[VersionedTask], base: SideEffect) -> Vec<SideEffect> {
    let mut origins = Vec::new();
    for v in versions {
        if v.origin != base && !origins.contains(&v.origin) {
            origins.push(v.origin);
        }
    }
    origins
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;
    use chrono::{Duration, Utc};
    use tasksync_guid::Guid;

    fn base_task(status: TaskStatus, modified_offset_secs: i64) -> Task {
        let now = Utc::now();
        Task {
            id: Guid::random(),
            google_task_id: None,
            title: "t".into(),
            description: None,
            notes: None,
            due: None,
            status,
            priority: Priority::Medium,
            project: None,
            tags: vec![],
            dependencies: vec![],
            tasklist_id: Guid::random(),
            list_title: "Default".into(),
            position: 0,
            created_at: now,
            modified_at: now + Duration::seconds(modified_offset_secs),
            completed_at: None,
            recurrence_rule: None,
            is_recurring: false,
            recurring_task_id: None,
            estimated_duration: None,
            actual_duration: None,
        }
    }

    #[test]
    fn latest_wins_picks_greatest_modified_at() {
        let older = VersionedTask {
            task: base_task(TaskStatus::Pending, 0),
            origin: SideEffect::PatchLocal,
        };
        let newer = VersionedTask {
            task: base_task(TaskStatus::InProgress, 100),
            origin: SideEffect::PatchGoogle,
        };
        let resolver = ConflictResolver::new(ConflictStrategy::LatestWins);
        let resolution = resolver.resolve(&[older, newer.clone()]);
        assert_eq!(resolution.task.status, TaskStatus::InProgress);
        assert_eq!(resolution.task.modified_at, newer.task.modified_at);
    }

    #[test]
    fn deletion_does_not_clobber_a_newer_edit() {
        let deleted = VersionedTask {
            task: base_task(TaskStatus::Deleted, 0),
            origin: SideEffect::PatchLocal,
        };
        let edited = VersionedTask {
            task: base_task(TaskStatus::InProgress, 50),
            origin: SideEffect::PatchGoogle,
        };
        let resolver = ConflictResolver::new(ConflictStrategy::LatestWins);
        let resolution = resolver.resolve(&[deleted, edited]);
        assert_ne!(resolution.task.status, TaskStatus::Deleted);
    }

    #[test]
    fn deletion_strictly_newer_than_all_others_wins() {
        let edited = VersionedTask {
            task: base_task(TaskStatus::InProgress, 0),
            origin: SideEffect::PatchLocal,
        };
        let deleted = VersionedTask {
            task: base_task(TaskStatus::Deleted, 50),
            origin: SideEffect::PatchGoogle,
        };
        let resolver = ConflictResolver::new(ConflictStrategy::LatestWins);
        let resolution = resolver.resolve(&[edited, deleted]);
        assert_eq!(resolution.task.status, TaskStatus::Deleted);
    }

    #[test]
    fn tags_and_dependencies_union() {
        let mut a = base_task(TaskStatus::Pending, 0);
        a.tags = vec!["x".into()];
        let mut b = base_task(TaskStatus::Pending, 10);
        b.tags = vec!["y".into()];
        let resolver = ConflictResolver::new(ConflictStrategy::LatestWins);
        let resolution = resolver.resolve(&[
            VersionedTask { task: a, origin: SideEffect::PatchLocal },
            VersionedTask { task: b, origin: SideEffect::PatchRemote },
        ]);
        assert_eq!(resolution.task.tags.len(), 2);
    }

    #[test]
    fn latest_wins_keeps_local_only_fields_when_google_becomes_the_base() {
        let mut local = base_task(TaskStatus::Pending, 0);
        local.google_task_id = Some("g-42".into());
        local.recurrence_rule = Some("FREQ=WEEKLY".into());
        local.is_recurring = true;
        let google = base_task(TaskStatus::Pending, 100);
        let resolver = ConflictResolver::new(ConflictStrategy::LatestWins);
        let resolution = resolver.resolve(&[
            VersionedTask { task: local, origin: SideEffect::PatchLocal },
            VersionedTask { task: google, origin: SideEffect::PatchGoogle },
        ]);
        assert_eq!(resolution.task.google_task_id.as_deref(), Some("g-42"));
        assert_eq!(resolution.task.recurrence_rule.as_deref(), Some("FREQ=WEEKLY"));
        assert!(resolution.task.is_recurring);
    }

    #[test]
    fn merge_concatenates_divergent_descriptions() {
        let mut a = base_task(TaskStatus::Pending, 0);
        a.description = Some("from local".into());
        let mut b = base_task(TaskStatus::Pending, 10);
        b.description = Some("from google".into());
        let resolver = ConflictResolver::new(ConflictStrategy::Merge);
        let resolution = resolver.resolve(&[
            VersionedTask { task: a, origin: SideEffect::PatchLocal },
            VersionedTask { task: b, origin: SideEffect::PatchGoogle },
        ]);
        let description = resolution.task.description.unwrap();
        assert!(description.contains("from local"));
        assert!(description.contains("from google"));
    }
}
