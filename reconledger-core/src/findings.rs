//! Query facade over one workspace database
//!
//! [`Findings`] is what scanning workers and reporting code hold. It validates
//! input, then delegates to the repositories and relation managers: writes run
//! inside one session transaction per call, reads run against the connection
//! directly. It is `Send + Sync`; share it behind an `Arc`.

use crate::config::DatabaseConfig;
use crate::db::relations::{AdminRelations, GroupRelations, LoggedinRelations, ShareAccessGrants};
use crate::db::repo::{
    ConfChecks, Credentials, DomainBackupKeys, DpapiSecrets, Groups, Hosts, Shares, Users,
};
use crate::db::schema::{self, ProtocolSchema, ReflectedSchema, SchemaRegistry, SMB_CONF_CHECKS};
use crate::db::session::SessionManager;
use crate::error::{Error, Result};
use crate::types::*;
use crate::workspace;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

/// Findings store for one workspace and protocol
pub struct Findings {
    session: SessionManager,
    schema: Arc<dyn ProtocolSchema>,
    reflected: ReflectedSchema,
}

impl Findings {
    /// Open (or create) the database file at `path` for `schema`.
    ///
    /// Pending migrations are applied, then the file's schema is reflected and
    /// checked against what `schema` expects.
    pub fn open(path: &Path, schema: Arc<dyn ProtocolSchema>, config: &DatabaseConfig) -> Result<Self> {
        config.validate()?;
        let session = SessionManager::open(path, config.busy_timeout(), config.retry_policy())?;
        Self::init(session, schema)
    }

    /// In-memory store (for tests and dry runs)
    pub fn open_in_memory(schema: Arc<dyn ProtocolSchema>) -> Result<Self> {
        let session = SessionManager::open_in_memory(DatabaseConfig::default().retry_policy())?;
        Self::init(session, schema)
    }

    /// Open `<root>/<name>/<protocol>.db` with the schema registered for `protocol`
    pub fn open_workspace(
        root: &Path,
        name: &str,
        protocol: &str,
        registry: &SchemaRegistry,
        config: &DatabaseConfig,
    ) -> Result<Self> {
        let schema = registry.get(protocol)?;
        let path = workspace::db_path(root, name, protocol)?;
        tracing::info!(workspace = name, protocol, path = %path.display(), "Opening workspace");
        Self::open(&path, schema, config)
    }

    fn init(session: SessionManager, schema: Arc<dyn ProtocolSchema>) -> Result<Self> {
        session.migrate(schema.as_ref())?;
        let reflected = session.read(|conn| schema::reflect(conn, schema.as_ref()))?;
        tracing::info!(
            db = %session.location(),
            protocol = schema.protocol(),
            tables = reflected.tables.len(),
            "Workspace schema ready"
        );
        Ok(Self {
            session,
            schema,
            reflected,
        })
    }

    /// Session manager backing this store
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn protocol(&self) -> &'static str {
        self.schema.protocol()
    }

    /// Schema as reflected when the store was opened
    pub fn schema(&self) -> &ReflectedSchema {
        &self.reflected
    }

    /// Reflect the database file's current schema
    pub fn reflect(&self) -> Result<ReflectedSchema> {
        self.session
            .read(|conn| schema::reflect(conn, self.schema.as_ref()))
    }

    /// Close the connection; later calls fail with [`Error::Closed`]
    pub fn shutdown(&self) -> Result<()> {
        self.session.shutdown()
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    // ============================================
    // Hosts
    // ============================================

    /// Record a host; returns its ID. The IP is stored in canonical form.
    pub fn add_host(&self, host: &NewHost) -> Result<i64> {
        let host = NewHost {
            ip: canonical_ip(&host.ip)?,
            ..host.clone()
        };
        self.session.with_transaction(|tx| Hosts::upsert(tx, &host))
    }

    pub fn get_hosts(&self, filter: &HostFilter) -> Result<Vec<Host>> {
        let filter = HostFilter {
            ip: filter.ip.as_deref().map(canonical_ip).transpose()?,
            ..filter.clone()
        };
        self.session.read(|conn| Hosts::list(conn, &filter))
    }

    /// The host recorded under `ip`, if any
    pub fn get_host_by_ip(&self, ip: &str) -> Result<Option<Host>> {
        let ip = canonical_ip(ip)?;
        self.session.read(|conn| Hosts::find_by_ip(conn, &ip))
    }

    pub fn is_host_valid(&self, ip: &str) -> Result<bool> {
        let ip = canonical_ip(ip)?;
        self.session.read(|conn| Hosts::is_valid(conn, &ip))
    }

    /// Domain controllers, optionally for one domain only
    pub fn get_domain_controllers(&self, domain: Option<&str>) -> Result<Vec<Host>> {
        self.session
            .read(|conn| Hosts::domain_controllers(conn, domain))
    }

    // ============================================
    // Credentials
    // ============================================

    pub fn add_credential(&self, cred: &NewCredential) -> Result<i64> {
        require("username", &cred.username)?;
        require("password", &cred.password)?;
        self.session.with_transaction(|tx| Credentials::upsert(tx, cred))
    }

    /// True only for a stored credential that has not been invalidated
    pub fn is_credential_valid(&self, domain: &str, username: &str, password: &str) -> Result<bool> {
        self.session
            .read(|conn| Credentials::is_valid(conn, domain, username, password))
    }

    pub fn get_credentials(&self, filter: &CredentialFilter) -> Result<Vec<Credential>> {
        self.session.read(|conn| Credentials::list(conn, filter))
    }

    /// Exact lookup by type and natural key
    pub fn get_credential(
        &self,
        credtype: CredType,
        domain: &str,
        username: &str,
        password: &str,
    ) -> Result<Option<Credential>> {
        self.session
            .read(|conn| Credentials::find(conn, credtype, domain, username, password))
    }

    pub fn is_credential_local(&self, credential_id: i64) -> Result<bool> {
        self.session
            .read(|conn| Credentials::is_local(conn, credential_id))
    }

    /// Mark a credential invalid after a failed login; false if unknown
    pub fn invalidate_credential(&self, credential_id: i64) -> Result<bool> {
        self.session
            .with_transaction(|tx| Credentials::invalidate(tx, credential_id))
    }

    /// Delete credentials together with their admin and group relations
    pub fn remove_credentials(&self, ids: &[i64]) -> Result<usize> {
        self.session.with_transaction(|tx| Credentials::remove(tx, ids))
    }

    // ============================================
    // Users and groups
    // ============================================

    pub fn add_user(&self, domain: &str, username: &str) -> Result<i64> {
        require("username", username)?;
        self.session
            .with_transaction(|tx| Users::upsert(tx, domain, username))
    }

    pub fn get_users(&self, filter: &UserFilter) -> Result<Vec<User>> {
        self.session.read(|conn| Users::list(conn, filter))
    }

    pub fn get_user(&self, domain: &str, username: &str) -> Result<Option<User>> {
        self.session.read(|conn| Users::find(conn, domain, username))
    }

    pub fn is_user_valid(&self, domain: &str, username: &str) -> Result<bool> {
        self.session
            .read(|conn| Users::is_valid(conn, domain, username))
    }

    pub fn add_group(&self, group: &NewGroup) -> Result<i64> {
        require("group domain", &group.domain)?;
        require("group name", &group.name)?;
        self.session.with_transaction(|tx| Groups::upsert(tx, group))
    }

    pub fn get_groups(&self, filter: &GroupFilter) -> Result<Vec<Group>> {
        self.session.read(|conn| Groups::list(conn, filter))
    }

    pub fn is_group_valid(&self, domain: &str, name: &str) -> Result<bool> {
        self.session.read(|conn| Groups::is_valid(conn, domain, name))
    }

    pub fn add_group_relation(&self, group_id: i64, member: MemberRef) -> Result<i64> {
        self.session
            .with_transaction(|tx| GroupRelations::add(tx, group_id, member))
    }

    pub fn get_group_relations(&self, filter: &GroupRelationFilter) -> Result<Vec<GroupRelation>> {
        self.session.read(|conn| GroupRelations::list(conn, filter))
    }

    /// Remove memberships matching `filter`. At least one endpoint must be set.
    pub fn remove_group_relations(&self, filter: &GroupRelationFilter) -> Result<usize> {
        self.session
            .with_transaction(|tx| GroupRelations::remove(tx, filter))
    }

    // ============================================
    // Admin relations
    // ============================================

    pub fn add_admin_user(&self, credential_id: i64, host_id: i64) -> Result<i64> {
        self.session
            .with_transaction(|tx| AdminRelations::add(tx, credential_id, host_id))
    }

    pub fn get_admin_relations(&self, filter: &AdminRelationFilter) -> Result<Vec<AdminRelation>> {
        self.session.read(|conn| AdminRelations::list(conn, filter))
    }

    /// Remove admin relations matching `filter`. At least one endpoint must be set.
    pub fn remove_admin_relation(&self, filter: &AdminRelationFilter) -> Result<usize> {
        self.session
            .with_transaction(|tx| AdminRelations::remove(tx, filter))
    }

    // ============================================
    // Shares
    // ============================================

    pub fn add_share(&self, share: &NewShare) -> Result<i64> {
        require("share name", &share.name)?;
        self.session.with_transaction(|tx| Shares::upsert(tx, share))
    }

    pub fn get_shares(&self, filter: &ShareFilter) -> Result<Vec<Share>> {
        self.session.read(|conn| Shares::list(conn, filter))
    }

    pub fn is_share_valid(&self, host_id: i64, name: &str) -> Result<bool> {
        self.session.read(|conn| Shares::is_valid(conn, host_id, name))
    }

    /// Shares reachable at `access`, optionally narrowed to one share
    pub fn get_shares_by_access(&self, access: AccessLevel, share_id: Option<i64>) -> Result<Vec<Share>> {
        self.session
            .read(|conn| Shares::by_access(conn, access, share_id))
    }

    pub fn add_share_access(&self, share_id: i64, user_id: i64, access: AccessLevel) -> Result<i64> {
        self.session
            .with_transaction(|tx| ShareAccessGrants::add(tx, share_id, user_id, access))
    }

    pub fn get_share_access(&self, filter: &ShareAccessFilter) -> Result<Vec<ShareAccess>> {
        self.session.read(|conn| ShareAccessGrants::list(conn, filter))
    }

    /// Users granted `access` on a share; any level when `access` is `None`
    pub fn get_users_with_share_access(
        &self,
        share_id: i64,
        access: Option<AccessLevel>,
    ) -> Result<Vec<User>> {
        self.session
            .read(|conn| ShareAccessGrants::users_with_access(conn, share_id, access))
    }

    pub fn remove_share_access(&self, filter: &ShareAccessFilter) -> Result<usize> {
        self.session
            .with_transaction(|tx| ShareAccessGrants::remove(tx, filter))
    }

    // ============================================
    // DPAPI
    // ============================================

    pub fn add_domain_backupkey(&self, domain: &str, pvk: &[u8]) -> Result<i64> {
        require("domain", domain)?;
        if pvk.is_empty() {
            return Err(Error::Validation("empty backup key".to_string()));
        }
        self.session
            .with_transaction(|tx| DomainBackupKeys::upsert(tx, domain, pvk))
    }

    /// Backup keys, all or for one domain
    pub fn get_domain_backupkey(&self, domain: Option<&str>) -> Result<Vec<DomainBackupKey>> {
        self.session.read(|conn| match domain {
            Some(domain) => Ok(DomainBackupKeys::get(conn, domain)?.into_iter().collect()),
            None => DomainBackupKeys::list(conn, None),
        })
    }

    pub fn add_dpapi_secrets(&self, secret: &NewDpapiSecret) -> Result<i64> {
        require("DPAPI type", &secret.dpapi_type)?;
        self.session
            .with_transaction(|tx| DpapiSecrets::upsert(tx, secret))
    }

    pub fn get_dpapi_secrets(&self, filter: &DpapiSecretFilter) -> Result<Vec<DpapiSecret>> {
        self.session.read(|conn| DpapiSecrets::list(conn, filter))
    }

    pub fn is_dpapi_secret_valid(&self, secret: &NewDpapiSecret) -> Result<bool> {
        self.session.read(|conn| DpapiSecrets::is_valid(conn, secret))
    }

    // ============================================
    // Logged-in relations
    // ============================================

    pub fn add_loggedin_relation(&self, host_id: i64, user_id: i64, is_admin_session: bool) -> Result<i64> {
        self.session
            .with_transaction(|tx| LoggedinRelations::add(tx, host_id, user_id, is_admin_session))
    }

    pub fn get_loggedin_relations(&self, filter: &LoggedinRelationFilter) -> Result<Vec<LoggedinRelation>> {
        self.session.read(|conn| LoggedinRelations::list(conn, filter))
    }

    /// Remove sessions matching `filter`. At least one endpoint must be set.
    pub fn remove_loggedin_relations(&self, filter: &LoggedinRelationFilter) -> Result<usize> {
        self.session
            .with_transaction(|tx| LoggedinRelations::remove(tx, filter))
    }

    // ============================================
    // Configuration checks
    // ============================================

    pub fn add_conf_check(&self, name: &str, description: &str) -> Result<i64> {
        self.require_conf_checks()?;
        require("check name", name)?;
        self.session
            .with_transaction(|tx| ConfChecks::upsert_check(tx, name, description))
    }

    pub fn get_conf_checks(&self) -> Result<Vec<ConfCheck>> {
        self.require_conf_checks()?;
        self.session.read(ConfChecks::list_checks)
    }

    pub fn add_conf_check_result(
        &self,
        host_id: i64,
        check_id: i64,
        secure: bool,
        reasons: &str,
    ) -> Result<i64> {
        self.require_conf_checks()?;
        self.session.with_transaction(|tx| {
            ConfChecks::upsert_result(tx, host_id, check_id, secure, reasons)
        })
    }

    pub fn get_conf_check_results(
        &self,
        host_id: Option<i64>,
        check_id: Option<i64>,
    ) -> Result<Vec<ConfCheckResult>> {
        self.require_conf_checks()?;
        self.session
            .read(|conn| ConfChecks::list_results(conn, host_id, check_id))
    }

    fn require_conf_checks(&self) -> Result<()> {
        if self.reflected.has_table(SMB_CONF_CHECKS) {
            Ok(())
        } else {
            Err(Error::Schema(format!(
                "{} workspaces do not record configuration checks",
                self.protocol()
            )))
        }
    }
}

/// Parse an IPv4/IPv6 address and return its canonical text form
fn canonical_ip(ip: &str) -> Result<String> {
    ip.trim()
        .parse::<IpAddr>()
        .map(|addr| addr.to_string())
        .map_err(|_| Error::Validation(format!("not an IP address: {:?}", ip)))
}

fn require(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::Validation(format!("{} must not be empty", what)))
    } else {
        Ok(())
    }
}
