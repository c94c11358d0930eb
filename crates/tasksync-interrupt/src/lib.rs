/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Cooperative cancellation, shared between [`SyncEngine`] and the stores it
//! drives. Nothing here can interrupt a blocking network call or a running
//! SQLite statement; callers must sprinkle `err_if_interrupted()` at phase
//! and iteration boundaries instead.
//!
//! [`SyncEngine`]: https://docs.rs/tasksync-core

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Something that can report whether it has been cancelled.
pub trait Interruptee {
    fn was_interrupted(&self) -> bool;

    fn err_if_interrupted(&self) -> Result<(), Interrupted> {
        if self.was_interrupted() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Never reports interruption. Used by callers that don't support
/// cancellation (one-off CLI invocations, tests).
pub struct NeverInterrupts;

impl Interruptee for NeverInterrupts {
    #[inline]
    fn was_interrupted(&self) -> bool {
        false
    }
}

#[derive(Debug, thiserror::Error)]
#[error("the operation was cancelled")]
pub struct Interrupted;

/// One flag shared by a `SyncRegistry` job entry and every `Interruptee`
/// clone handed to the engine, stores, and google client for that job.
#[derive(Clone, Debug, Default)]
pub struct InterruptScope {
    flag: Arc<AtomicBool>,
}

impl InterruptScope {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Interruptee for InterruptScope {
    #[inline]
    fn was_interrupted(&self) -> bool {
        self.is_cancelled()
    }
}

#[cfg(feature = "sql")]
mod sql_handle {
    use super::InterruptScope;
    use rusqlite::Connection;
    use std::sync::Arc;

    /// Grounded on `interrupt_support::SqlInterruptHandle`: lets a caller on
    /// another thread ask SQLite itself to abort a running statement, in
    /// addition to flipping the cooperative [`InterruptScope`].
    pub struct SqlInterruptHandle {
        scope: InterruptScope,
        db_handle: Arc<Connection>,
    }

    impl SqlInterruptHandle {
        pub fn new(db_handle: Arc<Connection>) -> Self {
            Self {
                scope: InterruptScope::new(),
                db_handle,
            }
        }

        pub fn scope(&self) -> InterruptScope {
            self.scope.clone()
        }

        pub fn interrupt(&self) {
            self.scope.cancel();
            self.db_handle.interrupt();
        }
    }
}
#[cfg(feature = "sql")]
pub use sql_handle::SqlInterruptHandle;
