/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Small helpers shared by `LocalStore` and the scratch staging database the
//! `SyncEngine` materialises a Google snapshot into. Ported and trimmed from
//! `sql_support::conn_ext`.

mod conn_ext;
mod open_database;

pub use conn_ext::ConnExt;
pub use open_database::open_database_with_flags;
