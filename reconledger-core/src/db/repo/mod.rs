//! Entity repositories
//!
//! Each repository is a unit struct whose associated functions take the
//! connection (or an open transaction, which derefs to one). Upserts follow the
//! same shape everywhere: read the natural key, then update-merge or insert,
//! all inside the caller's transaction.

pub mod checks;
pub mod credentials;
pub mod groups;
pub mod hosts;
pub mod secrets;
pub mod shares;
pub mod users;

pub use checks::ConfChecks;
pub use credentials::Credentials;
pub use groups::Groups;
pub use hosts::Hosts;
pub use secrets::{DomainBackupKeys, DpapiSecrets};
pub use shares::Shares;
pub use users::Users;
