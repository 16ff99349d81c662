//! Small helpers shared by repositories and relation managers

use crate::error::{Error, Result};
use rusqlite::{Connection, Row, ToSql};

/// Dynamic `WHERE` clause builder; every added condition is ANDed.
#[derive(Default)]
pub(crate) struct SqlFilter {
    clauses: Vec<String>,
    params: Vec<Box<dyn ToSql>>,
}

impl SqlFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `column = ?` when `value` is set
    pub fn eq<T: ToSql + 'static>(&mut self, column: &str, value: Option<T>) -> &mut Self {
        if let Some(value) = value {
            self.clauses.push(format!("{} = ?", column));
            self.params.push(Box::new(value));
        }
        self
    }

    /// Case-insensitive `column = ?` when `value` is set
    pub fn eq_nocase(&mut self, column: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value {
            self.clauses.push(format!("{} = ? COLLATE NOCASE", column));
            self.params.push(Box::new(value.to_string()));
        }
        self
    }

    /// Case-insensitive substring match when `value` is set
    pub fn contains(&mut self, column: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value {
            self.clauses
                .push(format!("{} LIKE '%' || ? || '%' ESCAPE '\\'", column));
            self.params.push(Box::new(escape_like(value)));
        }
        self
    }

    /// Case-insensitive substring match of one value against any of `columns`
    pub fn contains_any(&mut self, columns: &[&str], value: Option<&str>) -> &mut Self {
        if let Some(value) = value {
            let escaped = escape_like(value);
            let ors: Vec<String> = columns
                .iter()
                .map(|c| format!("{} LIKE '%' || ? || '%' ESCAPE '\\'", c))
                .collect();
            self.clauses.push(format!("({})", ors.join(" OR ")));
            for _ in columns {
                self.params.push(Box::new(escaped.clone()));
            }
        }
        self
    }

    /// Raw condition with its own parameters
    pub fn clause(&mut self, sql: impl Into<String>, params: Vec<Box<dyn ToSql>>) -> &mut Self {
        self.clauses.push(sql.into());
        self.params.extend(params);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// ` WHERE ...` or an empty string
    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn params(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// `alias.col, alias.col, ...`
pub(crate) fn select_list(alias: &str, columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| format!("{}.{}", alias, c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Run `sql` with the filter's parameters and map every row
pub(crate) fn query_all<T, F>(conn: &Connection, sql: &str, filter: &SqlFilter, map: F) -> Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(filter.params().as_slice(), map)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Fail with [`Error::ForeignKey`] unless `table` has a row with `id`
pub(crate) fn ensure_exists(conn: &Connection, table: &'static str, id: i64) -> Result<()> {
    let found: bool = conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", table),
        [id],
        |r| r.get(0),
    )?;
    if found {
        Ok(())
    } else {
        Err(Error::ForeignKey { table, id })
    }
}

/// Treat blank strings as "not reported"
pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

/// Map a stored enum string, reporting a conversion failure at `idx`
pub(crate) fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter() {
        let filter = SqlFilter::new();
        assert!(filter.is_empty());
        assert_eq!(filter.where_sql(), "");
        assert!(filter.params().is_empty());
    }

    #[test]
    fn test_filter_builds_conjunction() {
        let mut filter = SqlFilter::new();
        filter
            .eq("h.id", Some(3_i64))
            .eq::<i64>("h.dc", None)
            .contains("h.hostname", Some("dc_01"));
        assert_eq!(
            filter.where_sql(),
            " WHERE h.id = ? AND h.hostname LIKE '%' || ? || '%' ESCAPE '\\'"
        );
        assert_eq!(filter.params().len(), 2);
    }

    #[test]
    fn test_like_matching_escapes_wildcards() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO t (name) VALUES ('ADMIN$'), ('C_DRIVE'), ('CXDRIVE');",
        )
        .unwrap();

        let mut filter = SqlFilter::new();
        filter.contains("name", Some("c_d"));
        let names = query_all(
            &conn,
            &format!("SELECT name FROM t{}", filter.where_sql()),
            &filter,
            |r| r.get::<_, String>(0),
        )
        .unwrap();
        assert_eq!(names, vec!["C_DRIVE".to_string()]);
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(&Some("x".to_string())), Some("x"));
        assert_eq!(non_blank(&Some("  ".to_string())), None);
        assert_eq!(non_blank(&None), None);
    }

    #[test]
    fn test_select_list() {
        assert_eq!(select_list("u", &["id", "domain"]), "u.id, u.domain");
    }
}
