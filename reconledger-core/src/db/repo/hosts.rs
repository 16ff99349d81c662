//! Host repository

use crate::db::query::{non_blank, query_all, select_list, SqlFilter};
use crate::error::{Error, Result};
use crate::types::{Host, HostFilter, NewHost};
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(crate) const COLUMNS: &[&str] = &[
    "id",
    "ip",
    "hostname",
    "domain",
    "os",
    "dc",
    "smbv1",
    "signing",
    "spooler",
    "zerologon",
    "petitpotam",
];

/// Map a host whose columns start at `offset`
pub(crate) fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Host> {
    Ok(Host {
        id: row.get(offset)?,
        ip: row.get(offset + 1)?,
        hostname: row.get(offset + 2)?,
        domain: row.get(offset + 3)?,
        os: row.get(offset + 4)?,
        dc: row.get(offset + 5)?,
        smbv1: row.get(offset + 6)?,
        signing: row.get(offset + 7)?,
        spooler: row.get(offset + 8)?,
        zerologon: row.get(offset + 9)?,
        petitpotam: row.get(offset + 10)?,
    })
}

pub struct Hosts;

impl Hosts {
    /// Insert a host, or merge reported fields into the existing row for its IP.
    ///
    /// Blank text fields and unset flags never overwrite stored values.
    pub fn upsert(conn: &Connection, host: &NewHost) -> Result<i64> {
        let existing: Option<i64> = conn
            .query_row("SELECT id FROM hosts WHERE ip = ?1", [&host.ip], |r| r.get(0))
            .optional()?;

        let hostname = non_blank(&host.hostname);
        let domain = non_blank(&host.domain);
        let os = non_blank(&host.os);

        match existing {
            Some(id) => {
                conn.execute(
                    r#"
                    UPDATE hosts SET
                        hostname   = COALESCE(?2, hostname),
                        domain     = COALESCE(?3, domain),
                        os         = COALESCE(?4, os),
                        dc         = COALESCE(?5, dc),
                        smbv1      = COALESCE(?6, smbv1),
                        signing    = COALESCE(?7, signing),
                        spooler    = COALESCE(?8, spooler),
                        zerologon  = COALESCE(?9, zerologon),
                        petitpotam = COALESCE(?10, petitpotam)
                    WHERE id = ?1
                    "#,
                    params![
                        id,
                        hostname,
                        domain,
                        os,
                        host.dc,
                        host.smbv1,
                        host.signing,
                        host.spooler,
                        host.zerologon,
                        host.petitpotam,
                    ],
                )?;
                Ok(id)
            }
            None => {
                conn.execute(
                    r#"
                    INSERT INTO hosts (ip, hostname, domain, os, dc, smbv1, signing,
                                       spooler, zerologon, petitpotam)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    "#,
                    params![
                        host.ip,
                        hostname,
                        domain,
                        os,
                        host.dc,
                        host.smbv1,
                        host.signing,
                        host.spooler,
                        host.zerologon,
                        host.petitpotam,
                    ],
                )?;
                let id = conn.last_insert_rowid();
                tracing::debug!(ip = %host.ip, host_id = id, "New host");
                Ok(id)
            }
        }
    }

    /// Get a host by ID
    pub fn get(conn: &Connection, id: i64) -> Result<Option<Host>> {
        conn.query_row(
            &format!("SELECT {} FROM hosts h WHERE h.id = ?1", select_list("h", COLUMNS)),
            [id],
            |row| from_row(row, 0),
        )
        .optional()
        .map_err(Error::from)
    }

    /// Get a host by IP
    pub fn find_by_ip(conn: &Connection, ip: &str) -> Result<Option<Host>> {
        conn.query_row(
            &format!("SELECT {} FROM hosts h WHERE h.ip = ?1", select_list("h", COLUMNS)),
            [ip],
            |row| from_row(row, 0),
        )
        .optional()
        .map_err(Error::from)
    }

    /// List hosts matching `filter`, in insertion order
    pub fn list(conn: &Connection, filter: &HostFilter) -> Result<Vec<Host>> {
        let mut sql_filter = SqlFilter::new();
        sql_filter
            .eq("h.id", filter.id)
            .eq("h.ip", filter.ip.clone())
            .contains("h.hostname", filter.hostname.as_deref())
            .eq_nocase("h.domain", filter.domain.as_deref())
            .eq("h.dc", filter.dc)
            .eq("h.signing", filter.signing)
            .contains_any(&["h.ip", "h.hostname", "h.domain"], filter.term.as_deref());

        let sql = format!(
            "SELECT {} FROM hosts h{} ORDER BY h.id",
            select_list("h", COLUMNS),
            sql_filter.where_sql()
        );
        query_all(conn, &sql, &sql_filter, |row| from_row(row, 0))
    }

    /// Domain controllers, optionally restricted to one domain
    pub fn domain_controllers(conn: &Connection, domain: Option<&str>) -> Result<Vec<Host>> {
        Self::list(
            conn,
            &HostFilter {
                dc: Some(true),
                domain: domain.map(str::to_string),
                ..Default::default()
            },
        )
    }

    /// Whether a host with this IP is recorded
    pub fn is_valid(conn: &Connection, ip: &str) -> Result<bool> {
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM hosts WHERE ip = ?1)",
            [ip],
            |r| r.get(0),
        )?;
        Ok(found)
    }
}
