//! # reconledger-core
//!
//! Workspace-scoped findings database for network reconnaissance.
//!
//! This library provides:
//! - Domain types for hosts, credentials, users, groups, shares and DPAPI material
//! - A SQLite storage layer with per-protocol schemas, migrations and reflection
//! - Relation managers for admin rights, group membership, share access and sessions
//! - The [`Findings`] facade that scanning workers and reporting code call
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Each workspace is a directory holding one database per protocol
//! (`<root>/<workspace>/<protocol>.db`). Every protocol shares the base tables
//! and may add its own `<protocol>_`-prefixed tables through
//! [`ProtocolSchema`](db::ProtocolSchema). Workers report facts with idempotent
//! `add_*` calls; duplicates and partial rescans merge into the existing rows.
//!
//! ## Example
//!
//! ```rust,no_run
//! use reconledger_core::db::SchemaRegistry;
//! use reconledger_core::{Config, Findings, NewHost};
//!
//! let config = Config::load().expect("failed to load config");
//! let findings = Findings::open_workspace(
//!     &config.workspace.root_dir(),
//!     &config.workspace.default_name,
//!     "smb",
//!     &SchemaRegistry::builtin(),
//!     &config.database,
//! )
//! .expect("failed to open workspace");
//!
//! let host_id = findings
//!     .add_host(&NewHost {
//!         hostname: Some("DC01".to_string()),
//!         dc: Some(true),
//!         ..NewHost::new("10.0.0.10")
//!     })
//!     .expect("failed to record host");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use findings::Findings;
pub use types::*;

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod findings;
pub mod logging;
pub mod types;
pub mod workspace;
