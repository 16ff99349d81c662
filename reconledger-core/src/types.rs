//! Core domain types for reconledger
//!
//! These types are the records scanning workers report and reporting code reads
//! back. Everything is scoped to one workspace database.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Host** | A network address that answered a scan, keyed by IP |
//! | **Credential** | A secret (password or hash) for a domain account, keyed by domain/username/secret |
//! | **User** | An account discovered by enumeration; carries no secret |
//! | **Group** | A domain group, keyed by domain/name |
//! | **Share** | A named share exported by a host |
//! | **Relation** | A many-to-many fact between two entities (admin, membership, access, session) |
//!
//! Ids are SQLite rowids and are only meaningful inside the workspace that issued them.

use serde::{Deserialize, Serialize};

// ============================================
// Hosts
// ============================================

/// A scanned host.
///
/// Flags are `None` until some scan has reported them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub ip: String,
    pub hostname: Option<String>,
    pub domain: Option<String>,
    pub os: Option<String>,
    /// Host is a domain controller
    pub dc: Option<bool>,
    pub smbv1: Option<bool>,
    pub signing: Option<bool>,
    pub spooler: Option<bool>,
    pub zerologon: Option<bool>,
    pub petitpotam: Option<bool>,
}

/// Fields reported for a host.
///
/// `None` (or an empty string) leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewHost {
    pub ip: String,
    pub hostname: Option<String>,
    pub domain: Option<String>,
    pub os: Option<String>,
    pub dc: Option<bool>,
    pub smbv1: Option<bool>,
    pub signing: Option<bool>,
    pub spooler: Option<bool>,
    pub zerologon: Option<bool>,
    pub petitpotam: Option<bool>,
}

impl NewHost {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..Default::default()
        }
    }
}

/// Filter for [`Host`] queries. All set fields must match.
#[derive(Debug, Default, Clone)]
pub struct HostFilter {
    pub id: Option<i64>,
    pub ip: Option<String>,
    /// Substring match on hostname
    pub hostname: Option<String>,
    /// Case-insensitive exact domain
    pub domain: Option<String>,
    pub dc: Option<bool>,
    /// `Some(false)` lists relay candidates
    pub signing: Option<bool>,
    /// Substring match against ip, hostname or domain
    pub term: Option<String>,
}

// ============================================
// Credentials
// ============================================

/// Kind of secret held by a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredType {
    Plaintext,
    Hash,
}

impl CredType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredType::Plaintext => "plaintext",
            CredType::Hash => "hash",
        }
    }
}

impl std::fmt::Display for CredType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CredType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plaintext" => Ok(CredType::Plaintext),
            "hash" => Ok(CredType::Hash),
            _ => Err(format!("unknown credential type: {}", s)),
        }
    }
}

/// A credential recovered or confirmed during the engagement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: i64,
    pub domain: String,
    pub username: String,
    /// Plaintext password or hash, depending on `credtype`
    pub password: String,
    pub credtype: CredType,
    /// Cleared after a confirmed authentication failure
    pub valid: bool,
    /// Explicitly reported as a machine-local account
    pub local: bool,
    /// Host the secret was dumped from, if any
    pub pillaged_from_host_id: Option<i64>,
}

/// Fields reported for a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCredential {
    pub domain: String,
    pub username: String,
    pub password: String,
    pub credtype: CredType,
    /// `None` keeps the stored flag on rediscovery
    pub local: Option<bool>,
    pub pillaged_from_host_id: Option<i64>,
    /// Set `valid` back to true when the credential already exists
    pub revalidate: bool,
}

impl NewCredential {
    pub fn new(
        credtype: CredType,
        domain: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            username: username.into(),
            password: password.into(),
            credtype,
            local: None,
            pillaged_from_host_id: None,
            revalidate: false,
        }
    }

    pub fn plaintext(
        domain: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(CredType::Plaintext, domain, username, password)
    }

    pub fn hash(
        domain: impl Into<String>,
        username: impl Into<String>,
        hash: impl Into<String>,
    ) -> Self {
        Self::new(CredType::Hash, domain, username, hash)
    }
}

/// Filter for [`Credential`] queries
#[derive(Debug, Default, Clone)]
pub struct CredentialFilter {
    pub id: Option<i64>,
    /// Case-insensitive exact domain
    pub domain: Option<String>,
    /// Substring match on username
    pub username: Option<String>,
    pub credtype: Option<CredType>,
    pub valid: Option<bool>,
}

// ============================================
// Users and groups
// ============================================

/// An enumerated domain account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub domain: String,
    pub username: String,
}

/// Filter for [`User`] queries
#[derive(Debug, Default, Clone)]
pub struct UserFilter {
    pub id: Option<i64>,
    pub domain: Option<String>,
    /// Substring match on username
    pub username: Option<String>,
}

/// A domain group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub domain: String,
    pub name: String,
    pub rid: Option<String>,
    /// Member count as reported by the directory
    pub member_count_ad: Option<i64>,
}

/// Fields reported for a group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewGroup {
    pub domain: String,
    pub name: String,
    pub rid: Option<String>,
    pub member_count_ad: Option<i64>,
}

impl NewGroup {
    pub fn new(domain: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Filter for [`Group`] queries
#[derive(Debug, Default, Clone)]
pub struct GroupFilter {
    pub id: Option<i64>,
    pub domain: Option<String>,
    /// Substring match on group name
    pub name: Option<String>,
}

// ============================================
// Shares
// ============================================

/// Access level on a share
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Read,
    Write,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
        }
    }

    /// Column on `shares` that records this level for the scanning identity
    pub(crate) fn share_column(&self) -> &'static str {
        match self {
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
        }
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(AccessLevel::Read),
            "write" => Ok(AccessLevel::Write),
            _ => Err(format!("unknown access level: {}", s)),
        }
    }
}

/// A share exported by a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub id: i64,
    pub host_id: i64,
    pub name: String,
    pub remark: Option<String>,
    /// Readable by the identity that scanned it
    pub read: bool,
    /// Writable by the identity that scanned it
    pub write: bool,
}

/// Fields reported for a share
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewShare {
    pub host_id: i64,
    pub name: String,
    pub remark: Option<String>,
    pub read: Option<bool>,
    pub write: Option<bool>,
}

impl NewShare {
    pub fn new(host_id: i64, name: impl Into<String>) -> Self {
        Self {
            host_id,
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Filter for [`Share`] queries
#[derive(Debug, Default, Clone)]
pub struct ShareFilter {
    pub id: Option<i64>,
    pub host_id: Option<i64>,
    /// Substring match on share name
    pub name: Option<String>,
}

// ============================================
// DPAPI material
// ============================================

/// A domain DPAPI backup key (one per domain)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainBackupKey {
    pub id: i64,
    pub domain: String,
    pub pvk: Vec<u8>,
}

/// A secret decrypted from DPAPI blobs on a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpapiSecret {
    pub id: i64,
    pub host_id: i64,
    /// Blob family, e.g. "credential", "vault", "browser"
    pub dpapi_type: String,
    /// Windows profile the blob belonged to
    pub windows_user: String,
    pub username: String,
    pub data: String,
    pub url: String,
}

/// Fields reported for a DPAPI secret. Every field is part of the natural key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewDpapiSecret {
    pub host_id: i64,
    pub dpapi_type: String,
    pub windows_user: String,
    pub username: String,
    pub data: String,
    pub url: String,
}

/// Filter for [`DpapiSecret`] queries
#[derive(Debug, Default, Clone)]
pub struct DpapiSecretFilter {
    pub id: Option<i64>,
    pub host_id: Option<i64>,
    pub dpapi_type: Option<String>,
    pub windows_user: Option<String>,
    pub username: Option<String>,
    /// Substring match on url
    pub url: Option<String>,
}

// ============================================
// Relations
// ============================================

/// Credential `credential` has administrative rights on `host`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRelation {
    pub id: i64,
    pub credential: Credential,
    pub host: Host,
}

/// Endpoint filter for admin relations
#[derive(Debug, Default, Clone, Copy)]
pub struct AdminRelationFilter {
    pub credential_id: Option<i64>,
    pub host_id: Option<i64>,
}

/// Reference to a group member when recording membership
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRef {
    User(i64),
    Credential(i64),
}

/// Resolved group member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupMember {
    User(User),
    Credential(Credential),
}

/// `member` belongs to `group`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRelation {
    pub id: i64,
    pub group: Group,
    pub member: GroupMember,
}

/// Endpoint filter for group relations
#[derive(Debug, Default, Clone, Copy)]
pub struct GroupRelationFilter {
    pub group_id: Option<i64>,
    pub user_id: Option<i64>,
    pub credential_id: Option<i64>,
}

/// `user` holds `access` on `share`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareAccess {
    pub id: i64,
    pub share: Share,
    pub user: User,
    pub access: AccessLevel,
}

/// Endpoint filter for share access grants
#[derive(Debug, Default, Clone, Copy)]
pub struct ShareAccessFilter {
    pub share_id: Option<i64>,
    pub user_id: Option<i64>,
    pub access: Option<AccessLevel>,
}

/// `user` was observed with a session on `host`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedinRelation {
    pub id: i64,
    pub host: Host,
    pub user: User,
    pub is_admin_session: bool,
}

/// Endpoint filter for logged-in relations
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggedinRelationFilter {
    pub host_id: Option<i64>,
    pub user_id: Option<i64>,
    pub is_admin_session: Option<bool>,
}

// ============================================
// SMB configuration checks
// ============================================

/// A named host configuration check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfCheck {
    pub id: i64,
    pub name: String,
    pub description: String,
}

/// Outcome of a configuration check against one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfCheckResult {
    pub id: i64,
    pub host_id: i64,
    pub check_id: i64,
    pub secure: bool,
    pub reasons: String,
}
