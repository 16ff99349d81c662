//! Database layer for reconledger
//!
//! This module provides the storage layer using SQLite with:
//! - Per-owner schema migrations and reflection ([`schema`])
//! - One connection per workspace with scoped transactions ([`session`])
//! - Entity repositories with natural-key upserts ([`repo`])
//! - Join-table managers for many-to-many facts ([`relations`])

mod query;
pub mod relations;
pub mod repo;
pub mod schema;
pub mod session;

pub use schema::{
    LdapSchema, ProtocolSchema, ReflectedSchema, SchemaRegistry, SmbSchema, TableSpec,
};
pub use session::{RetryPolicy, SessionManager};

/// In-memory connection with the SMB schema applied
#[cfg(test)]
pub(crate) fn test_connection() -> rusqlite::Connection {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
    schema::run_migrations(&conn, &SmbSchema).unwrap();
    conn
}
