//! Credential repository
//!
//! The natural key is (domain, username, password). Domain and username compare
//! case-insensitively (the columns are `COLLATE NOCASE`); the secret is exact.

use crate::db::query::{ensure_exists, parse_column, query_all, select_list, SqlFilter};
use crate::error::{Error, Result};
use crate::types::{CredType, Credential, CredentialFilter, NewCredential};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

pub(crate) const COLUMNS: &[&str] = &[
    "id",
    "domain",
    "username",
    "password",
    "credtype",
    "valid",
    "local",
    "pillaged_from_host_id",
];

/// Map a credential whose columns start at `offset`
pub(crate) fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Credential> {
    Ok(Credential {
        id: row.get(offset)?,
        domain: row.get(offset + 1)?,
        username: row.get(offset + 2)?,
        password: row.get(offset + 3)?,
        credtype: parse_column(row, offset + 4)?,
        valid: row.get(offset + 5)?,
        local: row.get(offset + 6)?,
        pillaged_from_host_id: row.get(offset + 7)?,
    })
}

pub struct Credentials;

impl Credentials {
    /// Insert a credential, or merge into the existing row for its natural key.
    ///
    /// New credentials start valid. An existing credential keeps its `valid`
    /// flag unless `revalidate` is set.
    pub fn upsert(conn: &Connection, cred: &NewCredential) -> Result<i64> {
        if let Some(host_id) = cred.pillaged_from_host_id {
            ensure_exists(conn, "hosts", host_id)?;
        }

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM credentials WHERE domain = ?1 AND username = ?2 AND password = ?3",
                params![cred.domain, cred.username, cred.password],
                |r| r.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                conn.execute(
                    r#"
                    UPDATE credentials SET
                        credtype              = ?2,
                        local                 = COALESCE(?3, local),
                        pillaged_from_host_id = COALESCE(?4, pillaged_from_host_id),
                        valid                 = CASE WHEN ?5 THEN 1 ELSE valid END
                    WHERE id = ?1
                    "#,
                    params![
                        id,
                        cred.credtype.as_str(),
                        cred.local,
                        cred.pillaged_from_host_id,
                        cred.revalidate,
                    ],
                )?;
                Ok(id)
            }
            None => {
                conn.execute(
                    r#"
                    INSERT INTO credentials (domain, username, password, credtype, valid, local,
                                             pillaged_from_host_id)
                    VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)
                    "#,
                    params![
                        cred.domain,
                        cred.username,
                        cred.password,
                        cred.credtype.as_str(),
                        cred.local.unwrap_or(false),
                        cred.pillaged_from_host_id,
                    ],
                )?;
                let id = conn.last_insert_rowid();
                tracing::debug!(
                    domain = %cred.domain,
                    username = %cred.username,
                    credtype = %cred.credtype,
                    credential_id = id,
                    "New credential"
                );
                Ok(id)
            }
        }
    }

    /// Get a credential by ID
    pub fn get(conn: &Connection, id: i64) -> Result<Option<Credential>> {
        conn.query_row(
            &format!(
                "SELECT {} FROM credentials c WHERE c.id = ?1",
                select_list("c", COLUMNS)
            ),
            [id],
            |row| from_row(row, 0),
        )
        .optional()
        .map_err(Error::from)
    }

    /// Look up a credential by its natural key and type
    pub fn find(
        conn: &Connection,
        credtype: CredType,
        domain: &str,
        username: &str,
        password: &str,
    ) -> Result<Option<Credential>> {
        conn.query_row(
            &format!(
                "SELECT {} FROM credentials c
                 WHERE c.credtype = ?1 AND c.domain = ?2 AND c.username = ?3 AND c.password = ?4",
                select_list("c", COLUMNS)
            ),
            params![credtype.as_str(), domain, username, password],
            |row| from_row(row, 0),
        )
        .optional()
        .map_err(Error::from)
    }

    /// List credentials matching `filter`, in insertion order
    pub fn list(conn: &Connection, filter: &CredentialFilter) -> Result<Vec<Credential>> {
        let mut sql_filter = SqlFilter::new();
        sql_filter
            .eq("c.id", filter.id)
            .eq_nocase("c.domain", filter.domain.as_deref())
            .contains("c.username", filter.username.as_deref())
            .eq("c.credtype", filter.credtype.map(|t| t.as_str()))
            .eq("c.valid", filter.valid);

        let sql = format!(
            "SELECT {} FROM credentials c{} ORDER BY c.id",
            select_list("c", COLUMNS),
            sql_filter.where_sql()
        );
        query_all(conn, &sql, &sql_filter, |row| from_row(row, 0))
    }

    /// True only if the credential exists and has not been invalidated
    pub fn is_valid(conn: &Connection, domain: &str, username: &str, password: &str) -> Result<bool> {
        let valid: Option<bool> = conn
            .query_row(
                "SELECT valid FROM credentials WHERE domain = ?1 AND username = ?2 AND password = ?3",
                params![domain, username, password],
                |r| r.get(0),
            )
            .optional()?;
        Ok(valid.unwrap_or(false))
    }

    /// Mark a credential invalid after a confirmed authentication failure.
    ///
    /// Returns whether a credential with that ID exists.
    pub fn invalidate(conn: &Connection, id: i64) -> Result<bool> {
        let changed = conn.execute("UPDATE credentials SET valid = 0 WHERE id = ?1", [id])?;
        if changed > 0 {
            tracing::debug!(credential_id = id, "Credential invalidated");
        }
        Ok(changed > 0)
    }

    /// Whether a credential belongs to a machine-local account.
    ///
    /// A credential is local when it was reported as such, or when its domain
    /// is the hostname of a recorded host (a SAM account on that machine).
    /// Unknown IDs are not local.
    pub fn is_local(conn: &Connection, id: i64) -> Result<bool> {
        let local: Option<bool> = conn
            .query_row(
                r#"
                SELECT c.local OR EXISTS (
                    SELECT 1 FROM hosts h
                    WHERE h.hostname <> '' AND h.hostname = c.domain COLLATE NOCASE
                )
                FROM credentials c WHERE c.id = ?1
                "#,
                [id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(local.unwrap_or(false))
    }

    /// Delete credentials; their admin and group relations go with them.
    ///
    /// Returns the number of credentials removed.
    pub fn remove(conn: &Connection, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let removed = conn.execute(
            &format!("DELETE FROM credentials WHERE id IN ({})", placeholders),
            params_from_iter(ids.iter()),
        )?;
        tracing::debug!(removed, "Credentials removed");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::Hosts;
    use crate::types::NewHost;
    use crate::db::test_connection;

    #[test]
    fn test_new_credential_is_valid() {
        let conn = test_connection();
        let id = Credentials::upsert(&conn, &NewCredential::plaintext("CORP", "alice", "Summer2023!"))
            .unwrap();

        let cred = Credentials::get(&conn, id).unwrap().unwrap();
        assert!(cred.valid);
        assert!(!cred.local);
        assert_eq!(cred.credtype, CredType::Plaintext);
        assert!(Credentials::is_valid(&conn, "CORP", "alice", "Summer2023!").unwrap());
    }

    #[test]
    fn test_natural_key_is_case_insensitive_on_account() {
        let conn = test_connection();
        let a = Credentials::upsert(&conn, &NewCredential::plaintext("CORP", "Alice", "pw")).unwrap();
        let b = Credentials::upsert(&conn, &NewCredential::plaintext("corp", "alice", "pw")).unwrap();
        let c = Credentials::upsert(&conn, &NewCredential::plaintext("corp", "alice", "PW")).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_invalidation_survives_readd() {
        let conn = test_connection();
        let cred = NewCredential::plaintext("CORP", "bob", "hunter2");
        let id = Credentials::upsert(&conn, &cred).unwrap();

        assert!(Credentials::invalidate(&conn, id).unwrap());
        assert!(!Credentials::is_valid(&conn, "CORP", "bob", "hunter2").unwrap());

        assert_eq!(Credentials::upsert(&conn, &cred).unwrap(), id);
        assert!(!Credentials::is_valid(&conn, "CORP", "bob", "hunter2").unwrap());

        let revalidated = NewCredential {
            revalidate: true,
            ..cred
        };
        Credentials::upsert(&conn, &revalidated).unwrap();
        assert!(Credentials::is_valid(&conn, "CORP", "bob", "hunter2").unwrap());
    }

    #[test]
    fn test_invalidate_unknown_id() {
        let conn = test_connection();
        assert!(!Credentials::invalidate(&conn, 42).unwrap());
    }

    #[test]
    fn test_is_local() {
        let conn = test_connection();
        Hosts::upsert(
            &conn,
            &NewHost {
                hostname: Some("WS01".to_string()),
                ..NewHost::new("10.0.0.5")
            },
        )
        .unwrap();

        let sam = Credentials::upsert(&conn, &NewCredential::hash("ws01", "Administrator", "31d6cfe0"))
            .unwrap();
        let domain = Credentials::upsert(&conn, &NewCredential::plaintext("CORP", "carol", "pw")).unwrap();
        let flagged = Credentials::upsert(
            &conn,
            &NewCredential {
                local: Some(true),
                ..NewCredential::plaintext(".", "svc", "pw")
            },
        )
        .unwrap();

        assert!(Credentials::is_local(&conn, sam).unwrap());
        assert!(!Credentials::is_local(&conn, domain).unwrap());
        assert!(Credentials::is_local(&conn, flagged).unwrap());
        assert!(!Credentials::is_local(&conn, 999).unwrap());
    }

    #[test]
    fn test_pillaged_host_must_exist() {
        let conn = test_connection();
        let cred = NewCredential {
            pillaged_from_host_id: Some(77),
            ..NewCredential::hash("CORP", "dave", "aabb")
        };
        assert!(matches!(
            Credentials::upsert(&conn, &cred),
            Err(Error::ForeignKey { table: "hosts", id: 77 })
        ));
        assert!(Credentials::list(&conn, &CredentialFilter::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_list_and_find() {
        let conn = test_connection();
        Credentials::upsert(&conn, &NewCredential::plaintext("CORP", "alice", "pw1")).unwrap();
        let hash_id =
            Credentials::upsert(&conn, &NewCredential::hash("CORP", "alice", "ntlmhash")).unwrap();
        Credentials::upsert(&conn, &NewCredential::plaintext("LAB", "bob", "pw2")).unwrap();

        let hashes = Credentials::list(
            &conn,
            &CredentialFilter {
                credtype: Some(CredType::Hash),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes[0].id, hash_id);

        let corp = Credentials::list(
            &conn,
            &CredentialFilter {
                domain: Some("corp".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(corp.len(), 2);

        let found = Credentials::find(&conn, CredType::Hash, "CORP", "alice", "ntlmhash").unwrap();
        assert_eq!(found.map(|c| c.id), Some(hash_id));
        assert!(Credentials::find(&conn, CredType::Plaintext, "CORP", "alice", "ntlmhash")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_remove() {
        let conn = test_connection();
        let a = Credentials::upsert(&conn, &NewCredential::plaintext("CORP", "a", "1")).unwrap();
        let b = Credentials::upsert(&conn, &NewCredential::plaintext("CORP", "b", "2")).unwrap();

        assert_eq!(Credentials::remove(&conn, &[a, 999]).unwrap(), 1);
        assert_eq!(Credentials::remove(&conn, &[]).unwrap(), 0);

        let left = Credentials::list(&conn, &CredentialFilter::default()).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, b);
    }
}
