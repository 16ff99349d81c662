//! DPAPI material: per-domain backup keys and per-host decrypted secrets

use crate::db::query::{ensure_exists, query_all, select_list, SqlFilter};
use crate::error::{Error, Result};
use crate::types::{DomainBackupKey, DpapiSecret, DpapiSecretFilter, NewDpapiSecret};
use rusqlite::{params, Connection, OptionalExtension, Row};

const BACKUPKEY_COLUMNS: &[&str] = &["id", "domain", "pvk"];

const SECRET_COLUMNS: &[&str] = &[
    "id",
    "host_id",
    "dpapi_type",
    "windows_user",
    "username",
    "data",
    "url",
];

fn backupkey_from_row(row: &Row<'_>) -> rusqlite::Result<DomainBackupKey> {
    Ok(DomainBackupKey {
        id: row.get(0)?,
        domain: row.get(1)?,
        pvk: row.get(2)?,
    })
}

fn secret_from_row(row: &Row<'_>) -> rusqlite::Result<DpapiSecret> {
    Ok(DpapiSecret {
        id: row.get(0)?,
        host_id: row.get(1)?,
        dpapi_type: row.get(2)?,
        windows_user: row.get(3)?,
        username: row.get(4)?,
        data: row.get(5)?,
        url: row.get(6)?,
    })
}

pub struct DomainBackupKeys;

impl DomainBackupKeys {
    /// Store the backup key for a domain. A later key replaces the earlier one.
    pub fn upsert(conn: &Connection, domain: &str, pvk: &[u8]) -> Result<i64> {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM domain_backupkeys WHERE domain = ?1",
                [domain],
                |r| r.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE domain_backupkeys SET pvk = ?2 WHERE id = ?1",
                    params![id, pvk],
                )?;
                tracing::debug!(domain, "Replaced domain backup key");
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO domain_backupkeys (domain, pvk) VALUES (?1, ?2)",
                    params![domain, pvk],
                )?;
                let id = conn.last_insert_rowid();
                tracing::debug!(domain, "New domain backup key");
                Ok(id)
            }
        }
    }

    pub fn get(conn: &Connection, domain: &str) -> Result<Option<DomainBackupKey>> {
        conn.query_row(
            &format!(
                "SELECT {} FROM domain_backupkeys k WHERE k.domain = ?1",
                select_list("k", BACKUPKEY_COLUMNS)
            ),
            [domain],
            backupkey_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    /// All keys, or only the one for `domain`
    pub fn list(conn: &Connection, domain: Option<&str>) -> Result<Vec<DomainBackupKey>> {
        let mut sql_filter = SqlFilter::new();
        sql_filter.eq_nocase("k.domain", domain);

        let sql = format!(
            "SELECT {} FROM domain_backupkeys k{} ORDER BY k.id",
            select_list("k", BACKUPKEY_COLUMNS),
            sql_filter.where_sql()
        );
        query_all(conn, &sql, &sql_filter, backupkey_from_row)
    }
}

pub struct DpapiSecrets;

impl DpapiSecrets {
    /// Record a secret unless an identical one is already stored for the host
    pub fn upsert(conn: &Connection, secret: &NewDpapiSecret) -> Result<i64> {
        ensure_exists(conn, "hosts", secret.host_id)?;

        if let Some(id) = Self::find_id(conn, secret)? {
            return Ok(id);
        }

        conn.execute(
            r#"
            INSERT INTO dpapi_secrets (host_id, dpapi_type, windows_user, username, data, url)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                secret.host_id,
                secret.dpapi_type,
                secret.windows_user,
                secret.username,
                secret.data,
                secret.url,
            ],
        )
        .map_err(|e| Error::from(e).foreign_key_on("hosts", secret.host_id))?;
        let id = conn.last_insert_rowid();
        tracing::debug!(
            host_id = secret.host_id,
            dpapi_type = %secret.dpapi_type,
            windows_user = %secret.windows_user,
            "New DPAPI secret"
        );
        Ok(id)
    }

    fn find_id(conn: &Connection, secret: &NewDpapiSecret) -> Result<Option<i64>> {
        conn.query_row(
            r#"
            SELECT id FROM dpapi_secrets
            WHERE host_id = ?1 AND dpapi_type = ?2 AND windows_user = ?3
              AND username = ?4 AND data = ?5 AND url = ?6
            "#,
            params![
                secret.host_id,
                secret.dpapi_type,
                secret.windows_user,
                secret.username,
                secret.data,
                secret.url,
            ],
            |r| r.get(0),
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn list(conn: &Connection, filter: &DpapiSecretFilter) -> Result<Vec<DpapiSecret>> {
        let mut sql_filter = SqlFilter::new();
        sql_filter
            .eq("d.id", filter.id)
            .eq("d.host_id", filter.host_id)
            .eq_nocase("d.dpapi_type", filter.dpapi_type.as_deref())
            .eq_nocase("d.windows_user", filter.windows_user.as_deref())
            .eq_nocase("d.username", filter.username.as_deref())
            .contains("d.url", filter.url.as_deref());

        let sql = format!(
            "SELECT {} FROM dpapi_secrets d{} ORDER BY d.id",
            select_list("d", SECRET_COLUMNS),
            sql_filter.where_sql()
        );
        query_all(conn, &sql, &sql_filter, secret_from_row)
    }

    pub fn is_valid(conn: &Connection, secret: &NewDpapiSecret) -> Result<bool> {
        Ok(Self::find_id(conn, secret)?.is_some())
    }
}
