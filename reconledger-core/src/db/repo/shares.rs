//! Share repository

use crate::db::query::{ensure_exists, non_blank, query_all, select_list, SqlFilter};
use crate::error::{Error, Result};
use crate::types::{AccessLevel, NewShare, Share, ShareFilter};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};

pub(crate) const COLUMNS: &[&str] = &["id", "host_id", "name", "remark", "read", "write"];

pub(crate) fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Share> {
    Ok(Share {
        id: row.get(offset)?,
        host_id: row.get(offset + 1)?,
        name: row.get(offset + 2)?,
        remark: row.get(offset + 3)?,
        read: row.get(offset + 4)?,
        write: row.get(offset + 5)?,
    })
}

pub struct Shares;

impl Shares {
    /// Insert a share for a host, or merge reported fields into the existing row.
    ///
    /// The host must already be recorded.
    pub fn upsert(conn: &Connection, share: &NewShare) -> Result<i64> {
        ensure_exists(conn, "hosts", share.host_id)?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM shares WHERE host_id = ?1 AND name = ?2",
                params![share.host_id, share.name],
                |r| r.get(0),
            )
            .optional()?;

        let remark = non_blank(&share.remark);

        match existing {
            Some(id) => {
                conn.execute(
                    r#"
                    UPDATE shares SET
                        remark = COALESCE(?2, remark),
                        read   = COALESCE(?3, read),
                        write  = COALESCE(?4, write)
                    WHERE id = ?1
                    "#,
                    params![id, remark, share.read, share.write],
                )?;
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO shares (host_id, name, remark, read, write)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        share.host_id,
                        share.name,
                        remark,
                        share.read.unwrap_or(false),
                        share.write.unwrap_or(false),
                    ],
                )
                .map_err(|e| Error::from(e).foreign_key_on("hosts", share.host_id))?;
                let id = conn.last_insert_rowid();
                tracing::debug!(host_id = share.host_id, name = %share.name, share_id = id, "New share");
                Ok(id)
            }
        }
    }

    pub fn get(conn: &Connection, id: i64) -> Result<Option<Share>> {
        conn.query_row(
            &format!("SELECT {} FROM shares s WHERE s.id = ?1", select_list("s", COLUMNS)),
            [id],
            |row| from_row(row, 0),
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn list(conn: &Connection, filter: &ShareFilter) -> Result<Vec<Share>> {
        let mut sql_filter = SqlFilter::new();
        sql_filter
            .eq("s.id", filter.id)
            .eq("s.host_id", filter.host_id)
            .contains("s.name", filter.name.as_deref());

        let sql = format!(
            "SELECT {} FROM shares s{} ORDER BY s.id",
            select_list("s", COLUMNS),
            sql_filter.where_sql()
        );
        query_all(conn, &sql, &sql_filter, |row| from_row(row, 0))
    }

    /// Shares reachable at `access`: either the scanning identity had it, or
    /// some user was granted it.
    pub fn by_access(
        conn: &Connection,
        access: AccessLevel,
        share_id: Option<i64>,
    ) -> Result<Vec<Share>> {
        let mut sql_filter = SqlFilter::new();
        sql_filter
            .clause(
                format!(
                    "(s.{} = 1 OR EXISTS(SELECT 1 FROM share_access sa \
                     WHERE sa.share_id = s.id AND sa.access = ?))",
                    access.share_column()
                ),
                vec![Box::new(access.as_str()) as Box<dyn ToSql>],
            )
            .eq("s.id", share_id);

        let sql = format!(
            "SELECT {} FROM shares s{} ORDER BY s.id",
            select_list("s", COLUMNS),
            sql_filter.where_sql()
        );
        query_all(conn, &sql, &sql_filter, |row| from_row(row, 0))
    }

    pub fn is_valid(conn: &Connection, host_id: i64, name: &str) -> Result<bool> {
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM shares WHERE host_id = ?1 AND name = ?2)",
            params![host_id, name],
            |r| r.get(0),
        )?;
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::{Hosts, Users};
    use crate::db::test_connection;
    use crate::types::NewHost;

    #[test]
    fn test_upsert_requires_host() {
        let conn = test_connection();
        let err = Shares::upsert(&conn, &NewShare::new(42, "C$")).unwrap_err();
        assert!(matches!(err, Error::ForeignKey { table: "hosts", id: 42 }));
    }

    #[test]
    fn test_upsert_merges_flags() {
        let conn = test_connection();
        let host_id = Hosts::upsert(&conn, &NewHost::new("10.0.0.1")).unwrap();

        let id = Shares::upsert(
            &conn,
            &NewShare {
                remark: Some("Remote Admin".to_string()),
                read: Some(true),
                ..NewShare::new(host_id, "ADMIN$")
            },
        )
        .unwrap();

        let again = Shares::upsert(
            &conn,
            &NewShare {
                write: Some(true),
                ..NewShare::new(host_id, "ADMIN$")
            },
        )
        .unwrap();
        assert_eq!(id, again);

        let share = Shares::get(&conn, id).unwrap().unwrap();
        assert_eq!(share.remark.as_deref(), Some("Remote Admin"));
        assert!(share.read);
        assert!(share.write);
    }

    #[test]
    fn test_by_access_counts_flags_and_grants() {
        let conn = test_connection();
        let host_id = Hosts::upsert(&conn, &NewHost::new("10.0.0.1")).unwrap();

        let public = Shares::upsert(
            &conn,
            &NewShare {
                read: Some(true),
                ..NewShare::new(host_id, "Public")
            },
        )
        .unwrap();
        let finance = Shares::upsert(&conn, &NewShare::new(host_id, "Finance")).unwrap();
        Shares::upsert(&conn, &NewShare::new(host_id, "IPC$")).unwrap();

        let user_id = Users::upsert(&conn, "CORP", "alice").unwrap();
        conn.execute(
            "INSERT INTO share_access (share_id, user_id, access) VALUES (?1, ?2, 'write')",
            params![finance, user_id],
        )
        .unwrap();

        let readable: Vec<i64> = Shares::by_access(&conn, AccessLevel::Read, None)
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(readable, vec![public]);

        let writable: Vec<i64> = Shares::by_access(&conn, AccessLevel::Write, None)
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(writable, vec![finance]);

        assert!(Shares::by_access(&conn, AccessLevel::Write, Some(public))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_is_valid() {
        let conn = test_connection();
        let host_id = Hosts::upsert(&conn, &NewHost::new("10.0.0.1")).unwrap();
        assert!(!Shares::is_valid(&conn, host_id, "C$").unwrap());
        Shares::upsert(&conn, &NewShare::new(host_id, "C$")).unwrap();
        assert!(Shares::is_valid(&conn, host_id, "C$").unwrap());
    }
}
