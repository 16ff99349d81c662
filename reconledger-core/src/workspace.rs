//! Workspace file layout
//!
//! Each workspace is a directory under the workspace root holding one database
//! per protocol: `<root>/<name>/<protocol>.db`.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Database path for `protocol` in workspace `name`
pub fn db_path(root: &Path, name: &str, protocol: &str) -> Result<PathBuf> {
    validate_component("workspace name", name)?;
    validate_component("protocol", protocol)?;
    Ok(root.join(name).join(format!("{}.db", protocol)))
}

/// Workspace names present under `root`, sorted
pub fn list(root: &Path) -> Result<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn validate_component(what: &str, value: &str) -> Result<()> {
    let ok = !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '\0']);
    if ok {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid {}: {:?}", what, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_db_path_layout() {
        let path = db_path(Path::new("/tmp/ws"), "acme", "smb").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/ws/acme/smb.db"));
    }

    #[test]
    fn test_rejects_path_escapes() {
        let root = Path::new("/tmp/ws");
        for bad in ["", ".", "..", "../etc", "a/b", "a\\b"] {
            assert!(
                matches!(db_path(root, bad, "smb"), Err(Error::Validation(_))),
                "accepted {:?}",
                bad
            );
        }
        assert!(db_path(root, "acme", "../smb").is_err());
    }

    #[test]
    fn test_list_workspaces() {
        let dir = TempDir::new().unwrap();
        assert!(list(&dir.path().join("missing")).unwrap().is_empty());

        std::fs::create_dir(dir.path().join("beta")).unwrap();
        std::fs::create_dir(dir.path().join("alpha")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        assert_eq!(list(dir.path()).unwrap(), vec!["alpha", "beta"]);
    }
}
