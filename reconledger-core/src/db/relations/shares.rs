//! Per-user share access grants

use super::delete_matching;
use crate::db::query::{ensure_exists, parse_column, query_all, select_list, SqlFilter};
use crate::db::repo::{shares, users};
use crate::error::Result;
use crate::types::{AccessLevel, ShareAccess, ShareAccessFilter, User};
use rusqlite::{params, Connection, OptionalExtension};

pub struct ShareAccessGrants;

impl ShareAccessGrants {
    /// Record that `user_id` holds `access` on `share_id`
    pub fn add(conn: &Connection, share_id: i64, user_id: i64, access: AccessLevel) -> Result<i64> {
        ensure_exists(conn, "shares", share_id)?;
        ensure_exists(conn, "users", user_id)?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM share_access WHERE share_id = ?1 AND user_id = ?2 AND access = ?3",
                params![share_id, user_id, access.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO share_access (share_id, user_id, access) VALUES (?1, ?2, ?3)",
            params![share_id, user_id, access.as_str()],
        )?;
        tracing::debug!(share_id, user_id, %access, "New share access");
        Ok(conn.last_insert_rowid())
    }

    pub fn list(conn: &Connection, filter: &ShareAccessFilter) -> Result<Vec<ShareAccess>> {
        let mut sql_filter = SqlFilter::new();
        sql_filter
            .eq("sa.share_id", filter.share_id)
            .eq("sa.user_id", filter.user_id)
            .eq("sa.access", filter.access.map(|a| a.as_str()));

        let sql = format!(
            r#"
            SELECT sa.id, sa.access, {}, {}
            FROM share_access sa
            JOIN shares s ON s.id = sa.share_id
            JOIN users u ON u.id = sa.user_id
            {}
            ORDER BY sa.id
            "#,
            select_list("s", shares::COLUMNS),
            select_list("u", users::COLUMNS),
            sql_filter.where_sql()
        );

        let user_offset = 2 + shares::COLUMNS.len();
        query_all(conn, &sql, &sql_filter, |row| {
            Ok(ShareAccess {
                id: row.get(0)?,
                access: parse_column(row, 1)?,
                share: shares::from_row(row, 2)?,
                user: users::from_row(row, user_offset)?,
            })
        })
    }

    /// Users holding `access` on `share_id`; any level when `access` is `None`
    pub fn users_with_access(
        conn: &Connection,
        share_id: i64,
        access: Option<AccessLevel>,
    ) -> Result<Vec<User>> {
        let mut sql_filter = SqlFilter::new();
        sql_filter
            .eq("sa.share_id", Some(share_id))
            .eq("sa.access", access.map(|a| a.as_str()));

        let sql = format!(
            r#"
            SELECT DISTINCT {}
            FROM share_access sa
            JOIN users u ON u.id = sa.user_id
            {}
            ORDER BY u.id
            "#,
            select_list("u", users::COLUMNS),
            sql_filter.where_sql()
        );
        query_all(conn, &sql, &sql_filter, |row| users::from_row(row, 0))
    }

    /// Remove grants matching `filter`; returns how many went
    pub fn remove(conn: &Connection, filter: &ShareAccessFilter) -> Result<usize> {
        let mut sql_filter = SqlFilter::new();
        sql_filter
            .eq("share_id", filter.share_id)
            .eq("user_id", filter.user_id)
            .eq("access", filter.access.map(|a| a.as_str()));
        delete_matching(conn, "share_access", &sql_filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::{Hosts, Shares, Users};
    use crate::db::test_connection;
    use crate::error::Error;
    use crate::types::{NewHost, NewShare};

    fn seed(conn: &Connection) -> (i64, i64, i64) {
        let host = Hosts::upsert(conn, &NewHost::new("10.0.0.1")).unwrap();
        let share = Shares::upsert(conn, &NewShare::new(host, "Finance")).unwrap();
        let alice = Users::upsert(conn, "CORP", "alice").unwrap();
        let bob = Users::upsert(conn, "CORP", "bob").unwrap();
        (share, alice, bob)
    }

    #[test]
    fn test_users_with_access_by_level() {
        let conn = test_connection();
        let (share, alice, bob) = seed(&conn);
        ShareAccessGrants::add(&conn, share, alice, AccessLevel::Read).unwrap();
        ShareAccessGrants::add(&conn, share, alice, AccessLevel::Write).unwrap();
        ShareAccessGrants::add(&conn, share, bob, AccessLevel::Read).unwrap();

        let writers = ShareAccessGrants::users_with_access(&conn, share, Some(AccessLevel::Write))
            .unwrap();
        assert_eq!(writers.len(), 1);
        assert_eq!(writers[0].username, "alice");

        let anyone = ShareAccessGrants::users_with_access(&conn, share, None).unwrap();
        assert_eq!(anyone.len(), 2);
    }

    #[test]
    fn test_add_is_idempotent_per_level() {
        let conn = test_connection();
        let (share, alice, _) = seed(&conn);
        let id = ShareAccessGrants::add(&conn, share, alice, AccessLevel::Read).unwrap();
        assert_eq!(
            ShareAccessGrants::add(&conn, share, alice, AccessLevel::Read).unwrap(),
            id
        );

        let grants = ShareAccessGrants::list(&conn, &ShareAccessFilter::default()).unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].access, AccessLevel::Read);
        assert_eq!(grants[0].share.name, "Finance");
        assert_eq!(grants[0].user.id, alice);
    }

    #[test]
    fn test_remove_one_level() {
        let conn = test_connection();
        let (share, alice, _) = seed(&conn);
        ShareAccessGrants::add(&conn, share, alice, AccessLevel::Read).unwrap();
        ShareAccessGrants::add(&conn, share, alice, AccessLevel::Write).unwrap();

        let removed = ShareAccessGrants::remove(
            &conn,
            &ShareAccessFilter {
                share_id: Some(share),
                user_id: Some(alice),
                access: Some(AccessLevel::Write),
            },
        )
        .unwrap();
        assert_eq!(removed, 1);

        let left = ShareAccessGrants::list(&conn, &ShareAccessFilter::default()).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].access, AccessLevel::Read);
    }

    #[test]
    fn test_unknown_share_rejected() {
        let conn = test_connection();
        let (_, alice, _) = seed(&conn);
        assert!(matches!(
            ShareAccessGrants::add(&conn, 404, alice, AccessLevel::Read),
            Err(Error::ForeignKey { table: "shares", id: 404 })
        ));
    }
}
