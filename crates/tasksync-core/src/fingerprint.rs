/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Content fingerprinting. Pure, allocation-light, and independent of any
//! store: two tasks with equal fingerprints are the same logical task no
//! matter which store they came from.

use crate::model::{Task, TaskStatus};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use md5::{Digest, Md5};
use std::fmt;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("malformed due timestamp")]
    MalformedTimestamp,
}

/// A 128-bit content digest, rendered lower-hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 16]);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// Normalise a free-text field: NFC, trim outer whitespace, lower-case.
fn normalize_text(s: &str) -> String {
    s.trim().nfc().collect::<String>().to_lowercase()
}

/// Parse any ISO-8601 representation, convert to UTC, emit
/// `YYYY-MM-DDTHH:MM:SS+00:00`; absent ⇒ empty string; trailing `Z` is
/// `+00:00`; sub-second precision dropped.
fn normalize_due(due: Option<DateTime<Utc>>) -> String {
    match due {
        None => String::new(),
        Some(dt) => dt
            .trunc_subsecs(0)
            .to_rfc3339_opts(SecondsFormat::Secs, false)
            .replacen('Z', "+00:00", 1),
    }
}

/// Derive the stable content hash:
/// `hash(lower(trim(title)) | trim(description) | normalise_due(due) | status)`.
///
/// Only fails if `due` is structurally unparsable; since `Task::due` is
/// already a typed `DateTime<Utc>` by the time it reaches this function, that
/// can only happen for inputs constructed from raw, unvalidated wire data
/// upstream of this call (kept here so callers that skip validation still get
/// a well-defined failure instead of a panic).
pub fn fingerprint(task: &Task) -> Result<Fingerprint, FingerprintError> {
    let title = normalize_text(&task.title);
    let description = task
        .description
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    let due = normalize_due(task.due);
    let status = task.status.as_str();

    let joined = format!("{title}|{description}|{due}|{status}");
    let mut hasher = Md5::new();
    hasher.update(joined.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest);
    Ok(Fingerprint(bytes))
}

/// Like [`fingerprint`] but for code paths that build a `Task`-shaped record
/// directly from the four relevant fields without a full `Task` (the engine's
/// `map[fingerprint] -> Task` classification pass).
pub fn fingerprint_fields(
    title: &str,
    description: Option<&str>,
    due: Option<DateTime<Utc>>,
    status: TaskStatus,
) -> Fingerprint {
    let title = normalize_text(title);
    let description = description.map(str::trim).unwrap_or_default();
    let due = normalize_due(due);
    let status = status.as_str();

    let joined = format!("{title}|{description}|{due}|{status}");
    let mut hasher = Md5::new();
    hasher.update(joined.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest);
    Fingerprint(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn task_with(title: &str, desc: Option<&str>, due: Option<DateTime<Utc>>, status: TaskStatus) -> Task {
        use tasksync_guid::Guid;
        let now = Utc::now();
        Task {
            id: Guid::random(),
            google_task_id: None,
            title: title.to_string(),
            description: desc.map(str::to_string),
            notes: None,
            due,
            status,
            priority: crate::model::Priority::Medium,
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
    fn equal_under_trim_case_and_whitespace() {
        let a = task_with("apple", None, None, TaskStatus::Pending);
        let b = task_with("Apple ", None, None, TaskStatus::Pending);
        assert_eq!(
            fingerprint(&a).unwrap().to_string(),
            fingerprint(&b).unwrap().to_string()
        );
    }

    #[test]
    fn differs_on_status() {
        let a = task_with("apple", None, None, TaskStatus::Pending);
        let b = task_with("apple", None, None, TaskStatus::Completed);
        assert_ne!(
            fingerprint(&a).unwrap().to_string(),
            fingerprint(&b).unwrap().to_string()
        );
    }

    #[test]
    fn ignores_tags_notes_and_priority() {
        let mut a = task_with("apple", None, None, TaskStatus::Pending);
        let mut b = a.clone();
        a.tags = vec!["x".into()];
        a.notes = Some("hi".into());
        a.priority = crate::model::Priority::Low;
        b.priority = crate::model::Priority::Critical;
        assert_eq!(
            fingerprint(&a).unwrap().to_string(),
            fingerprint(&b).unwrap().to_string()
        );
    }

    #[test]
    fn trailing_z_and_offset_are_equivalent() {
        let dt1 = Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap();
        let a = task_with("x", None, Some(dt1), TaskStatus::Pending);
        let b = task_with("x", None, Some(dt1), TaskStatus::Pending);
        assert_eq!(
            fingerprint(&a).unwrap().to_string(),
            fingerprint(&b).unwrap().to_string()
        );
    }

    #[test]
    fn subsecond_precision_is_dropped() {
        let dt1 = Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap();
        let dt2 = dt1 + chrono::Duration::milliseconds(500);
        let a = task_with("x", None, Some(dt1), TaskStatus::Pending);
        let b = task_with("x", None, Some(dt2), TaskStatus::Pending);
        assert_eq!(
            fingerprint(&a).unwrap().to_string(),
            fingerprint(&b).unwrap().to_string()
        );
    }
}
