/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The crate's error taxonomy, realized as a single enum in the shape of
//! `logins::error::ErrorKind`: one `#[from]` per underlying library error,
//! plus a `label()` that's safe to ship to telemetry without leaking task
//! content.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("upstream credentials are invalid or expired")]
    Auth,

    #[error("transient network error: {0}")]
    TransientNet(String),

    #[error("upstream error {code}: {body}")]
    Upstream { code: u16, body: String },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("optimistic concurrency conflict on task {0}")]
    Conflict(String),

    #[error("another sync job is already running for this account")]
    Busy,

    #[error("the sync job was cancelled")]
    Cancelled,

    #[error("timed out waiting for the sync job")]
    Timeout,

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("{0}")]
    Interrupted(#[from] tasksync_interrupt::Interrupted),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("fingerprint error: {0}")]
    Fingerprint(#[from] crate::fingerprint::FingerprintError),
}

impl Error {
    /// Short, telemetry-safe label, never including task content
    /// (mirrors `logins::error::Error::label`).
    pub fn label(&self) -> &'static str {
        match self {
            Error::Validation(_) => "Validation",
            Error::Auth => "Auth",
            Error::TransientNet(_) => "TransientNet",
            Error::Upstream { .. } => "Upstream",
            Error::Store(_) => "Store",
            Error::Conflict(_) => "Conflict",
            Error::Busy => "Busy",
            Error::Cancelled => "Cancelled",
            Error::Timeout => "Timeout",
            Error::SchemaMismatch(_) => "SchemaMismatch",
            Error::Interrupted(_) => "Interrupted",
            Error::Json(_) => "Json",
            Error::Yaml(_) => "Yaml",
            Error::Io(_) => "Io",
            Error::Http(_) => "Http",
            Error::Fingerprint(_) => "Fingerprint",
        }
    }

    /// Transient errors are retried internally; everything else terminates
    /// the current job.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::TransientNet(_) | Error::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
