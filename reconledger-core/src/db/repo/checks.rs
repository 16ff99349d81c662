//! SMB host configuration checks and their per-host results
//!
//! These tables belong to the SMB protocol schema; callers confirm the
//! workspace carries them before reaching this module.

use crate::db::query::{ensure_exists, query_all, SqlFilter};
use crate::db::schema::{SMB_CONF_CHECKS, SMB_CONF_CHECK_RESULTS};
use crate::error::Result;
use crate::types::{ConfCheck, ConfCheckResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

fn check_from_row(row: &Row<'_>) -> rusqlite::Result<ConfCheck> {
    Ok(ConfCheck {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
    })
}

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<ConfCheckResult> {
    Ok(ConfCheckResult {
        id: row.get(0)?,
        host_id: row.get(1)?,
        check_id: row.get(2)?,
        secure: row.get(3)?,
        reasons: row.get(4)?,
    })
}

pub struct ConfChecks;

impl ConfChecks {
    /// Register a check by name; an existing check gets the new description.
    pub fn upsert_check(conn: &Connection, name: &str, description: &str) -> Result<i64> {
        let existing: Option<i64> = conn
            .query_row(
                &format!("SELECT id FROM {} WHERE name = ?1", SMB_CONF_CHECKS),
                [name],
                |r| r.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                conn.execute(
                    &format!("UPDATE {} SET description = ?2 WHERE id = ?1", SMB_CONF_CHECKS),
                    params![id, description],
                )?;
                Ok(id)
            }
            None => {
                conn.execute(
                    &format!(
                        "INSERT INTO {} (name, description) VALUES (?1, ?2)",
                        SMB_CONF_CHECKS
                    ),
                    params![name, description],
                )?;
                Ok(conn.last_insert_rowid())
            }
        }
    }

    pub fn list_checks(conn: &Connection) -> Result<Vec<ConfCheck>> {
        let sql = format!(
            "SELECT id, name, description FROM {} ORDER BY id",
            SMB_CONF_CHECKS
        );
        query_all(conn, &sql, &SqlFilter::new(), check_from_row)
    }

    /// Record the outcome of a check on a host. Re-running a check replaces
    /// its previous outcome.
    pub fn upsert_result(
        conn: &Connection,
        host_id: i64,
        check_id: i64,
        secure: bool,
        reasons: &str,
    ) -> Result<i64> {
        ensure_exists(conn, "hosts", host_id)?;
        ensure_exists(conn, SMB_CONF_CHECKS, check_id)?;

        let existing: Option<i64> = conn
            .query_row(
                &format!(
                    "SELECT id FROM {} WHERE host_id = ?1 AND check_id = ?2",
                    SMB_CONF_CHECK_RESULTS
                ),
                params![host_id, check_id],
                |r| r.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                conn.execute(
                    &format!(
                        "UPDATE {} SET secure = ?2, reasons = ?3 WHERE id = ?1",
                        SMB_CONF_CHECK_RESULTS
                    ),
                    params![id, secure, reasons],
                )?;
                Ok(id)
            }
            None => {
                conn.execute(
                    &format!(
                        "INSERT INTO {} (host_id, check_id, secure, reasons)
                         VALUES (?1, ?2, ?3, ?4)",
                        SMB_CONF_CHECK_RESULTS
                    ),
                    params![host_id, check_id, secure, reasons],
                )?;
                let id = conn.last_insert_rowid();
                tracing::debug!(host_id, check_id, secure, "New conf check result");
                Ok(id)
            }
        }
    }

    pub fn list_results(
        conn: &Connection,
        host_id: Option<i64>,
        check_id: Option<i64>,
    ) -> Result<Vec<ConfCheckResult>> {
        let mut sql_filter = SqlFilter::new();
        sql_filter.eq("host_id", host_id).eq("check_id", check_id);

        let sql = format!(
            "SELECT id, host_id, check_id, secure, reasons FROM {}{} ORDER BY id",
            SMB_CONF_CHECK_RESULTS,
            sql_filter.where_sql()
        );
        query_all(conn, &sql, &sql_filter, result_from_row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::Hosts;
    use crate::db::test_connection;
    use crate::error::Error;
    use crate::types::NewHost;

    #[test]
    fn test_check_registration_is_idempotent() {
        let conn = test_connection();
        let id = ConfChecks::upsert_check(&conn, "smb_signing", "SMB signing required").unwrap();
        let again = ConfChecks::upsert_check(&conn, "smb_signing", "Signing enforced").unwrap();
        assert_eq!(id, again);

        let checks = ConfChecks::list_checks(&conn).unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].description, "Signing enforced");
    }

    #[test]
    fn test_result_rerun_replaces_outcome() {
        let conn = test_connection();
        let host_id = Hosts::upsert(&conn, &NewHost::new("10.0.0.1")).unwrap();
        let check_id = ConfChecks::upsert_check(&conn, "smb_signing", "").unwrap();

        let id = ConfChecks::upsert_result(&conn, host_id, check_id, false, "not required")
            .unwrap();
        let again = ConfChecks::upsert_result(&conn, host_id, check_id, true, "").unwrap();
        assert_eq!(id, again);

        let results = ConfChecks::list_results(&conn, Some(host_id), None).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].secure);
        assert!(ConfChecks::list_results(&conn, None, Some(check_id + 1))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_result_requires_known_check() {
        let conn = test_connection();
        let host_id = Hosts::upsert(&conn, &NewHost::new("10.0.0.1")).unwrap();
        assert!(matches!(
            ConfChecks::upsert_result(&conn, host_id, 3, true, ""),
            Err(Error::ForeignKey { table: SMB_CONF_CHECKS, id: 3 })
        ));
    }
}
