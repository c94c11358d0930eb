/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use rusqlite::{
    types::{FromSql, ToSql},
    Connection, Result as SqlResult, Row,
};

/// Opt in to these helpers by implementing `conn()`. Mirrors
/// `sql_support::ConnExt`, trimmed to the handful of calls the stores
/// actually need.
pub trait ConnExt {
    fn conn(&self) -> &Connection;

    fn execute_all(&self, stmts: &[&str]) -> SqlResult<()> {
        let conn = self.conn();
        for sql in stmts {
            conn.execute(sql, [])?;
        }
        Ok(())
    }

    fn execute_cached(&self, sql: &str, params: &[(&str, &dyn ToSql)]) -> SqlResult<usize> {
        let mut stmt = self.conn().prepare_cached(sql)?;
        stmt.execute(params)
    }

    fn query_one<T: FromSql>(&self, sql: &str) -> SqlResult<T> {
        self.conn().query_row(sql, [], |row| row.get(0))
    }

    /// Like `query_row` but returns `None` instead of erroring when there is
    /// no matching row.
    fn try_query_row<T, E, F>(
        &self,
        sql: &str,
        params: &[(&str, &dyn ToSql)],
        mapper: F,
        cache: bool,
    ) -> Result<Option<T>, E>
    where
        Self: Sized,
        E: From<rusqlite::Error>,
        F: FnOnce(&Row<'_>) -> Result<T, E>,
    {
        let conn = self.conn();
        let mut stmt = if cache {
            conn.prepare_cached(sql)?
        } else {
            conn.prepare(sql)?
        };
        let mut rows = stmt.query(params)?;
        match rows.next()? {
            None => Ok(None),
            Some(row) => Ok(Some(mapper(row)?)),
        }
    }
}

impl ConnExt for Connection {
    #[inline]
    fn conn(&self) -> &Connection {
        self
    }
}
