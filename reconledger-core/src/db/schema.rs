//! Database schema, migrations and reflection
//!
//! The base findings schema is shared by every protocol. A protocol may add its
//! own tables through [`ProtocolSchema`]; those tables must be prefixed with the
//! protocol name so two protocols can live in one workspace file.
//!
//! Applied versions are tracked per owner (`base`, `smb`, ...) in the
//! `schema_versions` table rather than `PRAGMA user_version`, since one file may
//! carry several independently versioned owners.

use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Owner name of the shared tables in `schema_versions`
pub const BASE_OWNER: &str = "base";

/// Current base schema version
pub const BASE_SCHEMA_VERSION: i32 = BASE_MIGRATIONS.len() as i32;

/// Base migrations, indexed by version number
const BASE_MIGRATIONS: &[&str] = &[
    // Version 1: findings tables and relations
    r#"
    CREATE TABLE IF NOT EXISTS hosts (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        ip          TEXT NOT NULL UNIQUE,
        hostname    TEXT,
        domain      TEXT,
        os          TEXT,
        dc          INTEGER,
        smbv1       INTEGER,
        signing     INTEGER,
        spooler     INTEGER,
        zerologon   INTEGER,
        petitpotam  INTEGER
    );

    CREATE TABLE IF NOT EXISTS credentials (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        domain      TEXT NOT NULL COLLATE NOCASE,
        username    TEXT NOT NULL COLLATE NOCASE,
        password    TEXT NOT NULL,
        credtype    TEXT NOT NULL CHECK (credtype IN ('plaintext', 'hash')),
        valid       INTEGER NOT NULL DEFAULT 1,
        local       INTEGER NOT NULL DEFAULT 0,
        UNIQUE (domain, username, password)
    );

    CREATE TABLE IF NOT EXISTS users (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        domain      TEXT NOT NULL COLLATE NOCASE,
        username    TEXT NOT NULL COLLATE NOCASE,
        UNIQUE (domain, username)
    );

    CREATE TABLE IF NOT EXISTS domain_groups (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        domain          TEXT NOT NULL COLLATE NOCASE,
        name            TEXT NOT NULL COLLATE NOCASE,
        rid             TEXT,
        member_count_ad INTEGER,
        UNIQUE (domain, name)
    );

    CREATE TABLE IF NOT EXISTS shares (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        host_id     INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
        name        TEXT NOT NULL,
        remark      TEXT,
        read        INTEGER NOT NULL DEFAULT 0,
        write       INTEGER NOT NULL DEFAULT 0,
        UNIQUE (host_id, name)
    );

    CREATE TABLE IF NOT EXISTS domain_backupkeys (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        domain      TEXT NOT NULL UNIQUE COLLATE NOCASE,
        pvk         BLOB NOT NULL
    );

    CREATE TABLE IF NOT EXISTS dpapi_secrets (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        host_id      INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
        dpapi_type   TEXT NOT NULL,
        windows_user TEXT NOT NULL DEFAULT '',
        username     TEXT NOT NULL DEFAULT '',
        data         TEXT NOT NULL,
        url          TEXT NOT NULL DEFAULT '',
        UNIQUE (host_id, dpapi_type, windows_user, username, data, url)
    );

    -- ============================================
    -- Relations
    -- ============================================

    CREATE TABLE IF NOT EXISTS admin_relations (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        credential_id INTEGER NOT NULL REFERENCES credentials(id) ON DELETE CASCADE,
        host_id       INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
        UNIQUE (credential_id, host_id)
    );

    -- Exactly one of user_id / credential_id is set
    CREATE TABLE IF NOT EXISTS group_relations (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        group_id      INTEGER NOT NULL REFERENCES domain_groups(id) ON DELETE CASCADE,
        user_id       INTEGER REFERENCES users(id) ON DELETE CASCADE,
        credential_id INTEGER REFERENCES credentials(id) ON DELETE CASCADE,
        CHECK ((user_id IS NULL) <> (credential_id IS NULL))
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_group_relations_user
        ON group_relations(group_id, user_id) WHERE user_id IS NOT NULL;
    CREATE UNIQUE INDEX IF NOT EXISTS idx_group_relations_credential
        ON group_relations(group_id, credential_id) WHERE credential_id IS NOT NULL;

    CREATE TABLE IF NOT EXISTS share_access (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        share_id    INTEGER NOT NULL REFERENCES shares(id) ON DELETE CASCADE,
        user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        access      TEXT NOT NULL CHECK (access IN ('read', 'write')),
        UNIQUE (share_id, user_id, access)
    );

    CREATE TABLE IF NOT EXISTS loggedin_relations (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        host_id          INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
        user_id          INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        is_admin_session INTEGER NOT NULL DEFAULT 0,
        UNIQUE (host_id, user_id, is_admin_session)
    );
    "#,
    // Version 2: credential provenance and lookup indexes
    r#"
    ALTER TABLE credentials ADD COLUMN pillaged_from_host_id INTEGER
        REFERENCES hosts(id) ON DELETE SET NULL;

    CREATE INDEX IF NOT EXISTS idx_hosts_dc ON hosts(dc) WHERE dc = 1;
    CREATE INDEX IF NOT EXISTS idx_shares_host ON shares(host_id);
    CREATE INDEX IF NOT EXISTS idx_dpapi_secrets_host ON dpapi_secrets(host_id);
    CREATE INDEX IF NOT EXISTS idx_admin_relations_host ON admin_relations(host_id);
    CREATE INDEX IF NOT EXISTS idx_share_access_user ON share_access(user_id);
    CREATE INDEX IF NOT EXISTS idx_loggedin_relations_user ON loggedin_relations(user_id);
    "#,
];

// ============================================
// Table declarations
// ============================================

/// Expected column of a declared table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    /// Declared SQL type as it appears in the DDL
    pub sql_type: &'static str,
}

/// Expected shape of a declared table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [ColumnSpec],
}

const fn col(name: &'static str, sql_type: &'static str) -> ColumnSpec {
    ColumnSpec { name, sql_type }
}

/// Shape of the base tables at [`BASE_SCHEMA_VERSION`]
pub const BASE_TABLES: &[TableSpec] = &[
    TableSpec {
        name: "hosts",
        columns: &[
            col("id", "INTEGER"),
            col("ip", "TEXT"),
            col("hostname", "TEXT"),
            col("domain", "TEXT"),
            col("os", "TEXT"),
            col("dc", "INTEGER"),
            col("smbv1", "INTEGER"),
            col("signing", "INTEGER"),
            col("spooler", "INTEGER"),
            col("zerologon", "INTEGER"),
            col("petitpotam", "INTEGER"),
        ],
    },
    TableSpec {
        name: "credentials",
        columns: &[
            col("id", "INTEGER"),
            col("domain", "TEXT"),
            col("username", "TEXT"),
            col("password", "TEXT"),
            col("credtype", "TEXT"),
            col("valid", "INTEGER"),
            col("local", "INTEGER"),
            col("pillaged_from_host_id", "INTEGER"),
        ],
    },
    TableSpec {
        name: "users",
        columns: &[
            col("id", "INTEGER"),
            col("domain", "TEXT"),
            col("username", "TEXT"),
        ],
    },
    TableSpec {
        name: "domain_groups",
        columns: &[
            col("id", "INTEGER"),
            col("domain", "TEXT"),
            col("name", "TEXT"),
            col("rid", "TEXT"),
            col("member_count_ad", "INTEGER"),
        ],
    },
    TableSpec {
        name: "shares",
        columns: &[
            col("id", "INTEGER"),
            col("host_id", "INTEGER"),
            col("name", "TEXT"),
            col("remark", "TEXT"),
            col("read", "INTEGER"),
            col("write", "INTEGER"),
        ],
    },
    TableSpec {
        name: "domain_backupkeys",
        columns: &[
            col("id", "INTEGER"),
            col("domain", "TEXT"),
            col("pvk", "BLOB"),
        ],
    },
    TableSpec {
        name: "dpapi_secrets",
        columns: &[
            col("id", "INTEGER"),
            col("host_id", "INTEGER"),
            col("dpapi_type", "TEXT"),
            col("windows_user", "TEXT"),
            col("username", "TEXT"),
            col("data", "TEXT"),
            col("url", "TEXT"),
        ],
    },
    TableSpec {
        name: "admin_relations",
        columns: &[
            col("id", "INTEGER"),
            col("credential_id", "INTEGER"),
            col("host_id", "INTEGER"),
        ],
    },
    TableSpec {
        name: "group_relations",
        columns: &[
            col("id", "INTEGER"),
            col("group_id", "INTEGER"),
            col("user_id", "INTEGER"),
            col("credential_id", "INTEGER"),
        ],
    },
    TableSpec {
        name: "share_access",
        columns: &[
            col("id", "INTEGER"),
            col("share_id", "INTEGER"),
            col("user_id", "INTEGER"),
            col("access", "TEXT"),
        ],
    },
    TableSpec {
        name: "loggedin_relations",
        columns: &[
            col("id", "INTEGER"),
            col("host_id", "INTEGER"),
            col("user_id", "INTEGER"),
            col("is_admin_session", "INTEGER"),
        ],
    },
];

// ============================================
// Protocol schemas
// ============================================

/// A protocol's contribution to a workspace schema.
///
/// Every protocol gets the base tables. Protocol-owned tables are declared
/// here together with the migrations that create them; their names must start
/// with `<protocol>_`.
pub trait ProtocolSchema: Send + Sync {
    /// Protocol identifier, also the workspace file stem (`smb` -> `smb.db`)
    fn protocol(&self) -> &'static str;

    /// Protocol-owned tables at the latest version
    fn tables(&self) -> &'static [TableSpec] {
        &[]
    }

    /// Protocol-owned migrations, indexed by version number
    fn migrations(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Table holding SMB configuration check definitions
pub const SMB_CONF_CHECKS: &str = "smb_conf_checks";
/// Table holding per-host SMB configuration check outcomes
pub const SMB_CONF_CHECK_RESULTS: &str = "smb_conf_check_results";

const SMB_MIGRATIONS: &[&str] = &[
    // Version 1: configuration checks
    r#"
    CREATE TABLE IF NOT EXISTS smb_conf_checks (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        name        TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE IF NOT EXISTS smb_conf_check_results (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        host_id   INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
        check_id  INTEGER NOT NULL REFERENCES smb_conf_checks(id) ON DELETE CASCADE,
        secure    INTEGER NOT NULL,
        reasons   TEXT NOT NULL DEFAULT '',
        UNIQUE (host_id, check_id)
    );
    "#,
];

const SMB_TABLES: &[TableSpec] = &[
    TableSpec {
        name: SMB_CONF_CHECKS,
        columns: &[
            col("id", "INTEGER"),
            col("name", "TEXT"),
            col("description", "TEXT"),
        ],
    },
    TableSpec {
        name: SMB_CONF_CHECK_RESULTS,
        columns: &[
            col("id", "INTEGER"),
            col("host_id", "INTEGER"),
            col("check_id", "INTEGER"),
            col("secure", "INTEGER"),
            col("reasons", "TEXT"),
        ],
    },
];

/// SMB findings: base tables plus configuration checks
#[derive(Debug, Default, Clone, Copy)]
pub struct SmbSchema;

impl ProtocolSchema for SmbSchema {
    fn protocol(&self) -> &'static str {
        "smb"
    }

    fn tables(&self) -> &'static [TableSpec] {
        SMB_TABLES
    }

    fn migrations(&self) -> &'static [&'static str] {
        SMB_MIGRATIONS
    }
}

/// LDAP findings: base tables only
#[derive(Debug, Default, Clone, Copy)]
pub struct LdapSchema;

impl ProtocolSchema for LdapSchema {
    fn protocol(&self) -> &'static str {
        "ldap"
    }
}

/// Explicit protocol -> schema lookup used when a workspace is opened
#[derive(Default, Clone)]
pub struct SchemaRegistry {
    schemas: BTreeMap<&'static str, Arc<dyn ProtocolSchema>>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in protocol schema
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let builtins: [Arc<dyn ProtocolSchema>; 2] = [Arc::new(SmbSchema), Arc::new(LdapSchema)];
        for schema in builtins {
            if let Err(e) = registry.register(schema) {
                tracing::error!(error = %e, "built-in schema rejected");
            }
        }
        registry
    }

    /// Register a protocol schema.
    ///
    /// Rejects duplicate protocols, tables outside the protocol's namespace and
    /// tables declared without migrations.
    pub fn register(&mut self, schema: Arc<dyn ProtocolSchema>) -> Result<()> {
        let protocol = schema.protocol();
        validate_protocol_schema(schema.as_ref())?;

        if self.schemas.contains_key(protocol) {
            return Err(Error::Schema(format!(
                "protocol {} is already registered",
                protocol
            )));
        }

        tracing::debug!(protocol, tables = schema.tables().len(), "Registered schema");
        self.schemas.insert(protocol, schema);
        Ok(())
    }

    /// Look up the schema for a protocol
    pub fn get(&self, protocol: &str) -> Result<Arc<dyn ProtocolSchema>> {
        self.schemas
            .get(protocol)
            .cloned()
            .ok_or_else(|| Error::Schema(format!("no schema registered for protocol {}", protocol)))
    }

    /// Registered protocol names, sorted
    pub fn protocols(&self) -> Vec<&'static str> {
        self.schemas.keys().copied().collect()
    }
}

fn validate_protocol_schema(schema: &dyn ProtocolSchema) -> Result<()> {
    let protocol = schema.protocol();
    if protocol.is_empty()
        || !protocol
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(Error::Schema(format!(
            "protocol name {:?} must be lowercase alphanumeric",
            protocol
        )));
    }

    let prefix = format!("{}_", protocol);
    for table in schema.tables() {
        if !table.name.starts_with(&prefix) {
            return Err(Error::Schema(format!(
                "table {} of protocol {} must be prefixed with {}",
                table.name, protocol, prefix
            )));
        }
    }

    if !schema.tables().is_empty() && schema.migrations().is_empty() {
        return Err(Error::Schema(format!(
            "protocol {} declares tables but no migrations",
            protocol
        )));
    }
    Ok(())
}

/// Every table a workspace opened with `schema` must have
pub fn expected_tables(schema: &dyn ProtocolSchema) -> impl Iterator<Item = &'static TableSpec> {
    BASE_TABLES.iter().chain(schema.tables().iter())
}

// ============================================
// Migrations
// ============================================

/// Run all pending base and protocol migrations.
///
/// The compatibility check and every pending step share one `IMMEDIATE`
/// transaction: a file that cannot be brought up to date is left untouched.
pub fn run_migrations(conn: &Connection, schema: &dyn ProtocolSchema) -> Result<()> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    check_migratable(&tx)?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_versions (
            owner   TEXT PRIMARY KEY,
            version INTEGER NOT NULL
        );",
    )?;

    apply_owner_migrations(&tx, BASE_OWNER, BASE_MIGRATIONS)?;
    apply_owner_migrations(&tx, schema.protocol(), schema.migrations())?;
    tx.commit()?;
    Ok(())
}

/// A file with tables but no `schema_versions` was not created by us
fn check_migratable(conn: &Connection) -> Result<()> {
    let tables: Vec<String> = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if tables.is_empty() || tables.iter().any(|t| t == "schema_versions") {
        return Ok(());
    }
    Err(Error::Schema(format!(
        "unversioned tables present ({}); not a findings workspace",
        tables.join(", ")
    )))
}

fn apply_owner_migrations(conn: &Connection, owner: &str, migrations: &[&str]) -> Result<()> {
    let current_version = get_schema_version(conn, owner)?;
    let target_version = migrations.len() as i32;

    tracing::info!(
        owner,
        current_version,
        target_version,
        "Checking database migrations"
    );

    if current_version > target_version {
        return Err(Error::Schema(format!(
            "{} schema is at version {} but this build only knows version {}",
            owner, current_version, target_version
        )));
    }

    for (i, migration) in migrations.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(owner, version, "Running migration");
            conn.execute_batch(migration).map_err(|e| {
                Error::Schema(format!("{} migration {} failed: {}", owner, version, e))
            })?;
            conn.execute(
                "INSERT INTO schema_versions (owner, version) VALUES (?1, ?2)
                 ON CONFLICT(owner) DO UPDATE SET version = excluded.version",
                params![owner, version],
            )?;
        }
    }

    if current_version < target_version {
        tracing::info!(
            owner,
            from = current_version,
            to = target_version,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the applied schema version of an owner (0 when never migrated)
pub fn get_schema_version(conn: &Connection, owner: &str) -> Result<i32> {
    let version = conn
        .query_row(
            "SELECT version FROM schema_versions WHERE owner = ?1",
            [owner],
            |r| r.get(0),
        )
        .optional()?;
    Ok(version.unwrap_or(0))
}

// ============================================
// Reflection
// ============================================

/// A column as found in the database file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedColumn {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

/// A table as found in the database file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedTable {
    pub name: String,
    pub columns: Vec<ReflectedColumn>,
}

impl ReflectedTable {
    pub fn column(&self, name: &str) -> Option<&ReflectedColumn> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Runtime view of a workspace file's schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedSchema {
    /// Protocol the file was reflected for
    pub protocol: String,
    pub tables: BTreeMap<String, ReflectedTable>,
    /// Applied version per owner
    pub versions: BTreeMap<String, i32>,
}

impl ReflectedSchema {
    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table(&self, name: &str) -> Option<&ReflectedTable> {
        self.tables.get(name)
    }

    pub fn version(&self, owner: &str) -> Option<i32> {
        self.versions.get(owner).copied()
    }
}

/// Load the schema present in the database and check it against `schema`.
///
/// Extra tables and columns are tolerated (a newer protocol or a sibling
/// protocol may have added them). A missing table, a missing column or a
/// column declared with another type fails with [`Error::Schema`].
pub fn reflect(conn: &Connection, schema: &dyn ProtocolSchema) -> Result<ReflectedSchema> {
    let mut tables = BTreeMap::new();

    let names: Vec<String> = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut column_stmt = conn.prepare(
        "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid",
    )?;
    for name in names {
        let columns = column_stmt
            .query_map([&name], |row| {
                Ok(ReflectedColumn {
                    name: row.get(0)?,
                    decl_type: row.get(1)?,
                    not_null: row.get(2)?,
                    primary_key: row.get::<_, i64>(3)? > 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        tables.insert(name.clone(), ReflectedTable { name, columns });
    }

    if !tables.contains_key("schema_versions") {
        return Err(Error::Schema(
            "schema_versions table missing; not a findings workspace".to_string(),
        ));
    }

    let versions = conn
        .prepare("SELECT owner, version FROM schema_versions ORDER BY owner")?
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i32>(1)?)))?
        .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;

    let reflected = ReflectedSchema {
        protocol: schema.protocol().to_string(),
        tables,
        versions,
    };

    for expected in expected_tables(schema) {
        check_table(&reflected, expected)?;
    }

    tracing::debug!(
        protocol = schema.protocol(),
        tables = reflected.tables.len(),
        "Reflected workspace schema"
    );
    Ok(reflected)
}

fn check_table(reflected: &ReflectedSchema, expected: &TableSpec) -> Result<()> {
    let table = reflected
        .table(expected.name)
        .ok_or_else(|| Error::Schema(format!("missing table {}", expected.name)))?;

    for spec in expected.columns {
        let column = table.column(spec.name).ok_or_else(|| {
            Error::Schema(format!("table {} lacks column {}", expected.name, spec.name))
        })?;
        if !column.decl_type.eq_ignore_ascii_case(spec.sql_type) {
            return Err(Error::Schema(format!(
                "column {}.{} is declared {} but {} is expected",
                expected.name, spec.name, column.decl_type, spec.sql_type
            )));
        }
    }
    Ok(())
}
