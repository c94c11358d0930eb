/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Error and breadcrumb reporting shared by every tasksync crate. A sync job
//! that ends in `SyncJob::error` carries a traceback; breadcrumbs recorded
//! along the way via [`report_breadcrumb`] give that traceback context
//! without requiring every call site to thread a log string through by hand.

use parking_lot::Mutex;

static RECENT_BREADCRUMBS: Mutex<BreadcrumbRingBuffer> = Mutex::new(BreadcrumbRingBuffer::new());

/// Record a fatal error for the caller's crash/error reporting pipeline. The
/// CLI/dashboard collaborators (out of scope for this crate) are expected to
/// subscribe to this the way `error-support`'s consumers subscribe to its
/// `app-services-error-reporter::error` target.
pub fn report_error(type_name: &str, message: &str) {
    let breadcrumbs = RECENT_BREADCRUMBS.lock().joined();
    log::error!(target: "tasksync::error", "{type_name}: {message} (breadcrumbs: {breadcrumbs})");
}

/// Leave a trail for the next [`report_error`] call to pick up.
pub fn report_breadcrumb(message: impl Into<String>) {
    RECENT_BREADCRUMBS.lock().push(message.into());
    log::debug!(target: "tasksync::breadcrumb", "{}", RECENT_BREADCRUMBS.lock().last());
}

#[derive(Default)]
struct BreadcrumbRingBuffer {
    items: Vec<String>,
    pos: usize,
}

impl BreadcrumbRingBuffer {
    const MAX_ITEMS: usize = 20;

    const fn new() -> Self {
        Self {
            items: Vec::new(),
            pos: 0,
        }
    }

    fn push(&mut self, breadcrumb: String) {
        if self.items.len() < Self::MAX_ITEMS {
            self.items.push(breadcrumb);
        } else {
            self.items[self.pos] = breadcrumb;
            self.pos = (self.pos + 1) % Self::MAX_ITEMS;
        }
    }

    fn last(&self) -> &str {
        self.items.last().map(String::as_str).unwrap_or("")
    }

    fn joined(&self) -> String {
        self.items.join(" | ")
    }
}

#[cfg(feature = "testing")]
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_wraps() {
        let mut buf = BreadcrumbRingBuffer::new();
        for i in 0..25 {
            buf.push(format!("item-{i}"));
        }
        assert_eq!(buf.items.len(), 20);
        assert_eq!(buf.last(), "item-24");
    }
}
