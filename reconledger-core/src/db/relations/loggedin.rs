//! Observed user sessions on hosts

use super::delete_matching;
use crate::db::query::{ensure_exists, query_all, select_list, SqlFilter};
use crate::db::repo::{hosts, users};
use crate::error::Result;
use crate::types::{LoggedinRelation, LoggedinRelationFilter};
use rusqlite::{params, Connection, OptionalExtension};

pub struct LoggedinRelations;

impl LoggedinRelations {
    /// Record a session of `user_id` on `host_id`
    pub fn add(conn: &Connection, host_id: i64, user_id: i64, is_admin_session: bool) -> Result<i64> {
        ensure_exists(conn, "hosts", host_id)?;
        ensure_exists(conn, "users", user_id)?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM loggedin_relations
                 WHERE host_id = ?1 AND user_id = ?2 AND is_admin_session = ?3",
                params![host_id, user_id, is_admin_session],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO loggedin_relations (host_id, user_id, is_admin_session) VALUES (?1, ?2, ?3)",
            params![host_id, user_id, is_admin_session],
        )?;
        tracing::debug!(host_id, user_id, is_admin_session, "New logged-in relation");
        Ok(conn.last_insert_rowid())
    }

    pub fn list(conn: &Connection, filter: &LoggedinRelationFilter) -> Result<Vec<LoggedinRelation>> {
        let mut sql_filter = SqlFilter::new();
        sql_filter
            .eq("lr.host_id", filter.host_id)
            .eq("lr.user_id", filter.user_id)
            .eq("lr.is_admin_session", filter.is_admin_session);

        let sql = format!(
            r#"
            SELECT lr.id, lr.is_admin_session, {}, {}
            FROM loggedin_relations lr
            JOIN hosts h ON h.id = lr.host_id
            JOIN users u ON u.id = lr.user_id
            {}
            ORDER BY lr.id
            "#,
            select_list("h", hosts::COLUMNS),
            select_list("u", users::COLUMNS),
            sql_filter.where_sql()
        );

        let user_offset = 2 + hosts::COLUMNS.len();
        query_all(conn, &sql, &sql_filter, |row| {
            Ok(LoggedinRelation {
                id: row.get(0)?,
                is_admin_session: row.get(1)?,
                host: hosts::from_row(row, 2)?,
                user: users::from_row(row, user_offset)?,
            })
        })
    }

    /// Remove sessions matching `filter`; returns how many went
    pub fn remove(conn: &Connection, filter: &LoggedinRelationFilter) -> Result<usize> {
        let mut sql_filter = SqlFilter::new();
        sql_filter
            .eq("host_id", filter.host_id)
            .eq("user_id", filter.user_id)
            .eq("is_admin_session", filter.is_admin_session);
        delete_matching(conn, "loggedin_relations", &sql_filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::{Hosts, Users};
    use crate::db::test_connection;
    use crate::types::NewHost;

    #[test]
    fn test_admin_and_plain_sessions_are_distinct() {
        let conn = test_connection();
        let host = Hosts::upsert(&conn, &NewHost::new("10.0.0.1")).unwrap();
        let user = Users::upsert(&conn, "CORP", "alice").unwrap();

        let plain = LoggedinRelations::add(&conn, host, user, false).unwrap();
        let admin = LoggedinRelations::add(&conn, host, user, true).unwrap();
        assert_ne!(plain, admin);
        assert_eq!(LoggedinRelations::add(&conn, host, user, true).unwrap(), admin);

        let admin_sessions = LoggedinRelations::list(
            &conn,
            &LoggedinRelationFilter {
                is_admin_session: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(admin_sessions.len(), 1);
        assert_eq!(admin_sessions[0].host.ip, "10.0.0.1");
        assert_eq!(admin_sessions[0].user.username, "alice");
    }

    #[test]
    fn test_remove_by_host() {
        let conn = test_connection();
        let h1 = Hosts::upsert(&conn, &NewHost::new("10.0.0.1")).unwrap();
        let h2 = Hosts::upsert(&conn, &NewHost::new("10.0.0.2")).unwrap();
        let user = Users::upsert(&conn, "CORP", "alice").unwrap();
        LoggedinRelations::add(&conn, h1, user, false).unwrap();
        LoggedinRelations::add(&conn, h1, user, true).unwrap();
        LoggedinRelations::add(&conn, h2, user, false).unwrap();

        let removed = LoggedinRelations::remove(
            &conn,
            &LoggedinRelationFilter {
                host_id: Some(h1),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(removed, 2);

        let left = LoggedinRelations::list(
            &conn,
            &LoggedinRelationFilter {
                user_id: Some(user),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].host.id, h2);
        assert!(Users::get(&conn, user).unwrap().is_some());
    }
}
