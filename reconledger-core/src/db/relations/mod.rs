//! Relation managers for the many-to-many join tables
//!
//! `add` is idempotent and checks every endpoint first, so a missing row
//! surfaces as [`Error::ForeignKey`](crate::Error::ForeignKey) naming the table.
//! `list` joins back to the endpoint repositories and returns full records.
//! `remove` deletes join rows only; endpoints are never touched.

pub mod admin;
pub mod groups;
pub mod loggedin;
pub mod shares;

pub use admin::AdminRelations;
pub use groups::GroupRelations;
pub use loggedin::LoggedinRelations;
pub use shares::ShareAccessGrants;

use crate::db::query::SqlFilter;
use crate::error::{Error, Result};
use rusqlite::Connection;

/// Delete the join rows of `table` matching `filter`.
///
/// An empty filter would clear the whole table and is rejected.
pub(crate) fn delete_matching(conn: &Connection, table: &str, filter: &SqlFilter) -> Result<usize> {
    if filter.is_empty() {
        return Err(Error::Validation(format!(
            "removing from {} needs at least one endpoint",
            table
        )));
    }

    let removed = conn.execute(
        &format!("DELETE FROM {}{}", table, filter.where_sql()),
        filter.params().as_slice(),
    )?;
    tracing::debug!(table, removed, "Relations removed");
    Ok(removed)
}
