//! Domain group repository

use crate::db::query::{non_blank, query_all, select_list, SqlFilter};
use crate::error::{Error, Result};
use crate::types::{Group, GroupFilter, NewGroup};
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(crate) const COLUMNS: &[&str] = &["id", "domain", "name", "rid", "member_count_ad"];

pub(crate) fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(offset)?,
        domain: row.get(offset + 1)?,
        name: row.get(offset + 2)?,
        rid: row.get(offset + 3)?,
        member_count_ad: row.get(offset + 4)?,
    })
}

pub struct Groups;

impl Groups {
    /// Insert a group or merge reported metadata into the existing row
    pub fn upsert(conn: &Connection, group: &NewGroup) -> Result<i64> {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM domain_groups WHERE domain = ?1 AND name = ?2",
                params![group.domain, group.name],
                |r| r.get(0),
            )
            .optional()?;

        let rid = non_blank(&group.rid);

        match existing {
            Some(id) => {
                conn.execute(
                    r#"
                    UPDATE domain_groups SET
                        rid             = COALESCE(?2, rid),
                        member_count_ad = COALESCE(?3, member_count_ad)
                    WHERE id = ?1
                    "#,
                    params![id, rid, group.member_count_ad],
                )?;
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO domain_groups (domain, name, rid, member_count_ad)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![group.domain, group.name, rid, group.member_count_ad],
                )?;
                let id = conn.last_insert_rowid();
                tracing::debug!(domain = %group.domain, name = %group.name, group_id = id, "New group");
                Ok(id)
            }
        }
    }

    pub fn get(conn: &Connection, id: i64) -> Result<Option<Group>> {
        conn.query_row(
            &format!(
                "SELECT {} FROM domain_groups g WHERE g.id = ?1",
                select_list("g", COLUMNS)
            ),
            [id],
            |row| from_row(row, 0),
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn list(conn: &Connection, filter: &GroupFilter) -> Result<Vec<Group>> {
        let mut sql_filter = SqlFilter::new();
        sql_filter
            .eq("g.id", filter.id)
            .eq_nocase("g.domain", filter.domain.as_deref())
            .contains("g.name", filter.name.as_deref());

        let sql = format!(
            "SELECT {} FROM domain_groups g{} ORDER BY g.id",
            select_list("g", COLUMNS),
            sql_filter.where_sql()
        );
        query_all(conn, &sql, &sql_filter, |row| from_row(row, 0))
    }

    pub fn is_valid(conn: &Connection, domain: &str, name: &str) -> Result<bool> {
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM domain_groups WHERE domain = ?1 AND name = ?2)",
            params![domain, name],
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
    fn test_upsert_merges_metadata() {
        let conn = test_connection();
        let id = Groups::upsert(&conn, &NewGroup::new("CORP", "Domain Admins")).unwrap();

        let enriched = NewGroup {
            rid: Some("512".to_string()),
            member_count_ad: Some(4),
            ..NewGroup::new("corp", "domain admins")
        };
        assert_eq!(Groups::upsert(&conn, &enriched).unwrap(), id);

        // A later report without metadata keeps what we learned
        Groups::upsert(&conn, &NewGroup::new("CORP", "Domain Admins")).unwrap();

        let group = Groups::get(&conn, id).unwrap().unwrap();
        assert_eq!(group.name, "Domain Admins");
        assert_eq!(group.rid.as_deref(), Some("512"));
        assert_eq!(group.member_count_ad, Some(4));
    }

    #[test]
    fn test_list_and_validity() {
        let conn = test_connection();
        Groups::upsert(&conn, &NewGroup::new("CORP", "Domain Admins")).unwrap();
        Groups::upsert(&conn, &NewGroup::new("CORP", "Backup Operators")).unwrap();
        Groups::upsert(&conn, &NewGroup::new("LAB", "Domain Admins")).unwrap();

        let admins = Groups::list(
            &conn,
            &GroupFilter {
                name: Some("admins".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(admins.len(), 2);

        assert!(Groups::is_valid(&conn, "lab", "DOMAIN ADMINS").unwrap());
        assert!(!Groups::is_valid(&conn, "LAB", "Backup Operators").unwrap());
    }
}
