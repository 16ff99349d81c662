//! Enumerated user repository

use crate::db::query::{query_all, select_list, SqlFilter};
use crate::error::{Error, Result};
use crate::types::{User, UserFilter};
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(crate) const COLUMNS: &[&str] = &["id", "domain", "username"];

pub(crate) fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(offset)?,
        domain: row.get(offset + 1)?,
        username: row.get(offset + 2)?,
    })
}

pub struct Users;

impl Users {
    /// Record a user; returns the existing ID when already known.
    pub fn upsert(conn: &Connection, domain: &str, username: &str) -> Result<i64> {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM users WHERE domain = ?1 AND username = ?2",
                params![domain, username],
                |r| r.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO users (domain, username) VALUES (?1, ?2)",
            params![domain, username],
        )?;
        let id = conn.last_insert_rowid();
        tracing::debug!(domain, username, user_id = id, "New user");
        Ok(id)
    }

    pub fn get(conn: &Connection, id: i64) -> Result<Option<User>> {
        conn.query_row(
            &format!("SELECT {} FROM users u WHERE u.id = ?1", select_list("u", COLUMNS)),
            [id],
            |row| from_row(row, 0),
        )
        .optional()
        .map_err(Error::from)
    }

    /// Look up a user by domain and username
    pub fn find(conn: &Connection, domain: &str, username: &str) -> Result<Option<User>> {
        conn.query_row(
            &format!(
                "SELECT {} FROM users u WHERE u.domain = ?1 AND u.username = ?2",
                select_list("u", COLUMNS)
            ),
            params![domain, username],
            |row| from_row(row, 0),
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn list(conn: &Connection, filter: &UserFilter) -> Result<Vec<User>> {
        let mut sql_filter = SqlFilter::new();
        sql_filter
            .eq("u.id", filter.id)
            .eq_nocase("u.domain", filter.domain.as_deref())
            .contains("u.username", filter.username.as_deref());

        let sql = format!(
            "SELECT {} FROM users u{} ORDER BY u.id",
            select_list("u", COLUMNS),
            sql_filter.where_sql()
        );
        query_all(conn, &sql, &sql_filter, |row| from_row(row, 0))
    }

    pub fn is_valid(conn: &Connection, domain: &str, username: &str) -> Result<bool> {
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE domain = ?1 AND username = ?2)",
            params![domain, username],
            |r| r.get(0),
        )?;
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;

    #[test]
    fn test_upsert_dedups_case_insensitively() {
        let conn = test_connection();
        let id = Users::upsert(&conn, "CORP", "Alice").unwrap();
        assert_eq!(Users::upsert(&conn, "corp", "alice").unwrap(), id);
        assert_eq!(Users::list(&conn, &UserFilter::default()).unwrap().len(), 1);

        // Original spelling is kept
        let user = Users::find(&conn, "corp", "ALICE").unwrap().unwrap();
        assert_eq!(user.username, "Alice");
    }

    #[test]
    fn test_list_filters() {
        let conn = test_connection();
        Users::upsert(&conn, "CORP", "alice").unwrap();
        Users::upsert(&conn, "CORP", "svc_backup").unwrap();
        Users::upsert(&conn, "LAB", "svc_sql").unwrap();

        let svc = Users::list(
            &conn,
            &UserFilter {
                username: Some("svc".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(svc.len(), 2);

        let corp_svc = Users::list(
            &conn,
            &UserFilter {
                domain: Some("corp".to_string()),
                username: Some("svc".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(corp_svc.len(), 1);
        assert_eq!(corp_svc[0].username, "svc_backup");
    }

    #[test]
    fn test_is_valid() {
        let conn = test_connection();
        assert!(!Users::is_valid(&conn, "CORP", "alice").unwrap());
        Users::upsert(&conn, "CORP", "alice").unwrap();
        assert!(Users::is_valid(&conn, "CORP", "alice").unwrap());
        assert!(Users::get(&conn, 2).unwrap().is_none());
    }
}
