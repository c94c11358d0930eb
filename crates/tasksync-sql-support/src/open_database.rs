/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use rusqlite::{Connection, OpenFlags};
use std::path::Path;

/// Open a connection with the flags `LocalStore`/`RemoteStore` always want:
/// create-if-missing, no implicit shared cache (each account gets its own
/// file so there's nothing to share), and a busy timeout so stores hold up
/// under contention while a transaction holds the file lock.
pub fn open_database_with_flags(path: impl AsRef<Path>) -> rusqlite::Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)?;
    conn.busy_timeout(std::time::Duration::from_secs(10))?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(conn)
}
