//! Group membership relations
//!
//! A member is either an enumerated user or a credential; each join row
//! carries exactly one of the two.

use super::delete_matching;
use crate::db::query::{ensure_exists, query_all, select_list, SqlFilter};
use crate::db::repo::{credentials, groups, users};
use crate::error::Result;
use crate::types::{GroupMember, GroupRelation, GroupRelationFilter, MemberRef};
use rusqlite::{params, Connection, OptionalExtension};

pub struct GroupRelations;

impl GroupRelations {
    /// Record that `member` belongs to `group_id`
    pub fn add(conn: &Connection, group_id: i64, member: MemberRef) -> Result<i64> {
        ensure_exists(conn, "domain_groups", group_id)?;

        let (user_id, credential_id) = match member {
            MemberRef::User(id) => {
                ensure_exists(conn, "users", id)?;
                (Some(id), None)
            }
            MemberRef::Credential(id) => {
                ensure_exists(conn, "credentials", id)?;
                (None, Some(id))
            }
        };

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM group_relations
                 WHERE group_id = ?1 AND user_id IS ?2 AND credential_id IS ?3",
                params![group_id, user_id, credential_id],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO group_relations (group_id, user_id, credential_id) VALUES (?1, ?2, ?3)",
            params![group_id, user_id, credential_id],
        )?;
        tracing::debug!(group_id, ?member, "New group relation");
        Ok(conn.last_insert_rowid())
    }

    pub fn list(conn: &Connection, filter: &GroupRelationFilter) -> Result<Vec<GroupRelation>> {
        let mut sql_filter = SqlFilter::new();
        sql_filter
            .eq("gr.group_id", filter.group_id)
            .eq("gr.user_id", filter.user_id)
            .eq("gr.credential_id", filter.credential_id);

        let sql = format!(
            r#"
            SELECT gr.id, gr.user_id, {}, {}, {}
            FROM group_relations gr
            JOIN domain_groups g ON g.id = gr.group_id
            LEFT JOIN users u ON u.id = gr.user_id
            LEFT JOIN credentials c ON c.id = gr.credential_id
            {}
            ORDER BY gr.id
            "#,
            select_list("g", groups::COLUMNS),
            select_list("u", users::COLUMNS),
            select_list("c", credentials::COLUMNS),
            sql_filter.where_sql()
        );

        let user_offset = 2 + groups::COLUMNS.len();
        let credential_offset = user_offset + users::COLUMNS.len();
        query_all(conn, &sql, &sql_filter, |row| {
            let user_id: Option<i64> = row.get(1)?;
            let member = match user_id {
                Some(_) => GroupMember::User(users::from_row(row, user_offset)?),
                None => GroupMember::Credential(credentials::from_row(row, credential_offset)?),
            };
            Ok(GroupRelation {
                id: row.get(0)?,
                group: groups::from_row(row, 2)?,
                member,
            })
        })
    }

    /// Remove memberships matching `filter`; returns how many went
    pub fn remove(conn: &Connection, filter: &GroupRelationFilter) -> Result<usize> {
        let mut sql_filter = SqlFilter::new();
        sql_filter
            .eq("group_id", filter.group_id)
            .eq("user_id", filter.user_id)
            .eq("credential_id", filter.credential_id);
        delete_matching(conn, "group_relations", &sql_filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::{Credentials, Groups, Users};
    use crate::db::test_connection;
    use crate::error::Error;
    use crate::types::{NewCredential, NewGroup};

    #[test]
    fn test_users_and_credentials_as_members() {
        let conn = test_connection();
        let group = Groups::upsert(&conn, &NewGroup::new("CORP", "Domain Admins")).unwrap();
        let user = Users::upsert(&conn, "CORP", "alice").unwrap();
        let cred = Credentials::upsert(&conn, &NewCredential::plaintext("CORP", "bob", "pw"))
            .unwrap();

        let first = GroupRelations::add(&conn, group, MemberRef::User(user)).unwrap();
        assert_eq!(
            GroupRelations::add(&conn, group, MemberRef::User(user)).unwrap(),
            first
        );
        GroupRelations::add(&conn, group, MemberRef::Credential(cred)).unwrap();

        let members = GroupRelations::list(
            &conn,
            &GroupRelationFilter {
                group_id: Some(group),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].group.name, "Domain Admins");
        assert!(matches!(&members[0].member, GroupMember::User(u) if u.username == "alice"));
        assert!(matches!(&members[1].member, GroupMember::Credential(c) if c.username == "bob"));
    }

    #[test]
    fn test_same_id_as_user_and_credential_are_distinct() {
        let conn = test_connection();
        let group = Groups::upsert(&conn, &NewGroup::new("CORP", "IT")).unwrap();
        let user = Users::upsert(&conn, "CORP", "alice").unwrap();
        let cred = Credentials::upsert(&conn, &NewCredential::plaintext("CORP", "alice", "pw"))
            .unwrap();
        assert_eq!(user, cred);

        let a = GroupRelations::add(&conn, group, MemberRef::User(user)).unwrap();
        let b = GroupRelations::add(&conn, group, MemberRef::Credential(cred)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_filter_by_member_and_remove() {
        let conn = test_connection();
        let admins = Groups::upsert(&conn, &NewGroup::new("CORP", "Domain Admins")).unwrap();
        let it = Groups::upsert(&conn, &NewGroup::new("CORP", "IT")).unwrap();
        let user = Users::upsert(&conn, "CORP", "alice").unwrap();
        GroupRelations::add(&conn, admins, MemberRef::User(user)).unwrap();
        GroupRelations::add(&conn, it, MemberRef::User(user)).unwrap();

        let filter = GroupRelationFilter {
            user_id: Some(user),
            ..Default::default()
        };
        assert_eq!(GroupRelations::list(&conn, &filter).unwrap().len(), 2);

        let removed = GroupRelations::remove(
            &conn,
            &GroupRelationFilter {
                group_id: Some(it),
                user_id: Some(user),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(GroupRelations::list(&conn, &filter).unwrap().len(), 1);
        assert!(Groups::get(&conn, it).unwrap().is_some());
    }

    #[test]
    fn test_missing_member_rejected() {
        let conn = test_connection();
        let group = Groups::upsert(&conn, &NewGroup::new("CORP", "IT")).unwrap();
        assert!(matches!(
            GroupRelations::add(&conn, group, MemberRef::User(77)),
            Err(Error::ForeignKey { table: "users", id: 77 })
        ));
        assert!(matches!(
            GroupRelations::add(&conn, group + 1, MemberRef::Credential(1)),
            Err(Error::ForeignKey { table: "domain_groups", .. })
        ));
    }
}
