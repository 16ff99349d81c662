//! Credential-is-admin-on-host relations

use super::delete_matching;
use crate::db::query::{ensure_exists, query_all, select_list, SqlFilter};
use crate::db::repo::{credentials, hosts};
use crate::error::Result;
use crate::types::{AdminRelation, AdminRelationFilter};
use rusqlite::{params, Connection, OptionalExtension};

pub struct AdminRelations;

impl AdminRelations {
    /// Record that `credential_id` is an administrator on `host_id`
    pub fn add(conn: &Connection, credential_id: i64, host_id: i64) -> Result<i64> {
        ensure_exists(conn, "credentials", credential_id)?;
        ensure_exists(conn, "hosts", host_id)?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM admin_relations WHERE credential_id = ?1 AND host_id = ?2",
                params![credential_id, host_id],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO admin_relations (credential_id, host_id) VALUES (?1, ?2)",
            params![credential_id, host_id],
        )?;
        tracing::debug!(credential_id, host_id, "New admin relation");
        Ok(conn.last_insert_rowid())
    }

    pub fn list(conn: &Connection, filter: &AdminRelationFilter) -> Result<Vec<AdminRelation>> {
        let mut sql_filter = SqlFilter::new();
        sql_filter
            .eq("ar.credential_id", filter.credential_id)
            .eq("ar.host_id", filter.host_id);

        let sql = format!(
            r#"
            SELECT ar.id, {}, {}
            FROM admin_relations ar
            JOIN credentials c ON c.id = ar.credential_id
            JOIN hosts h ON h.id = ar.host_id
            {}
            ORDER BY ar.id
            "#,
            select_list("c", credentials::COLUMNS),
            select_list("h", hosts::COLUMNS),
            sql_filter.where_sql()
        );
        let host_offset = 1 + credentials::COLUMNS.len();
        query_all(conn, &sql, &sql_filter, |row| {
            Ok(AdminRelation {
                id: row.get(0)?,
                credential: credentials::from_row(row, 1)?,
                host: hosts::from_row(row, host_offset)?,
            })
        })
    }

    /// Remove admin relations matching `filter`; returns how many went
    pub fn remove(conn: &Connection, filter: &AdminRelationFilter) -> Result<usize> {
        let mut sql_filter = SqlFilter::new();
        sql_filter
            .eq("credential_id", filter.credential_id)
            .eq("host_id", filter.host_id);
        delete_matching(conn, "admin_relations", &sql_filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::{Credentials, Hosts};
    use crate::db::test_connection;
    use crate::error::Error;
    use crate::types::{NewCredential, NewHost};

    fn seed(conn: &Connection) -> (i64, i64, i64) {
        let cred = Credentials::upsert(conn, &NewCredential::plaintext("CORP", "admin", "Passw0rd"))
            .unwrap();
        let h1 = Hosts::upsert(conn, &NewHost::new("10.0.0.1")).unwrap();
        let h2 = Hosts::upsert(conn, &NewHost::new("10.0.0.2")).unwrap();
        (cred, h1, h2)
    }

    #[test]
    fn test_add_is_idempotent() {
        let conn = test_connection();
        let (cred, h1, _) = seed(&conn);
        let id = AdminRelations::add(&conn, cred, h1).unwrap();
        assert_eq!(AdminRelations::add(&conn, cred, h1).unwrap(), id);
        assert_eq!(
            AdminRelations::list(&conn, &AdminRelationFilter::default())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_list_joins_endpoints() {
        let conn = test_connection();
        let (cred, h1, h2) = seed(&conn);
        AdminRelations::add(&conn, cred, h1).unwrap();
        AdminRelations::add(&conn, cred, h2).unwrap();

        let on_h2 = AdminRelations::list(
            &conn,
            &AdminRelationFilter {
                host_id: Some(h2),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(on_h2.len(), 1);
        assert_eq!(on_h2[0].host.ip, "10.0.0.2");
        assert_eq!(on_h2[0].credential.id, cred);
        assert_eq!(on_h2[0].credential.username, "admin");

        let by_cred = AdminRelations::list(
            &conn,
            &AdminRelationFilter {
                credential_id: Some(cred),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_cred.len(), 2);
    }

    #[test]
    fn test_missing_endpoint_rejected() {
        let conn = test_connection();
        let (cred, h1, _) = seed(&conn);
        assert!(matches!(
            AdminRelations::add(&conn, cred + 100, h1),
            Err(Error::ForeignKey { table: "credentials", .. })
        ));
        assert!(matches!(
            AdminRelations::add(&conn, cred, 999),
            Err(Error::ForeignKey { table: "hosts", id: 999 })
        ));
        assert!(AdminRelations::list(&conn, &AdminRelationFilter::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_remove_keeps_endpoints() {
        let conn = test_connection();
        let (cred, h1, _) = seed(&conn);
        AdminRelations::add(&conn, cred, h1).unwrap();

        let filter = AdminRelationFilter {
            credential_id: Some(cred),
            host_id: Some(h1),
        };
        assert_eq!(AdminRelations::remove(&conn, &filter).unwrap(), 1);
        // Second removal is a no-op
        assert_eq!(AdminRelations::remove(&conn, &filter).unwrap(), 0);

        assert!(Credentials::get(&conn, cred).unwrap().is_some());
        assert!(Hosts::get(&conn, h1).unwrap().is_some());
    }

    #[test]
    fn test_remove_requires_an_endpoint() {
        let conn = test_connection();
        assert!(matches!(
            AdminRelations::remove(&conn, &AdminRelationFilter::default()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_credential_removal_cascades() {
        let conn = test_connection();
        let (cred, h1, _) = seed(&conn);
        AdminRelations::add(&conn, cred, h1).unwrap();
        Credentials::remove(&conn, &[cred]).unwrap();
        assert!(AdminRelations::list(&conn, &AdminRelationFilter::default())
            .unwrap()
            .is_empty());
        assert!(Hosts::get(&conn, h1).unwrap().is_some());
    }
}
