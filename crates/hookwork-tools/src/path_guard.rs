//! Keeps tool file access inside the session workspace.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

fn join_workspace(raw: &str, workspace: &Path) -> PathBuf {
    if Path::new(raw).is_absolute() {
        PathBuf::from(raw)
    } else {
        workspace.join(raw)
    }
}

fn has_parent_dir(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
}

fn ensure_inside(path: &Path, workspace: &Path) -> Result<()> {
    let workspace_canon = workspace
        .canonicalize()
        .unwrap_or_else(|_| workspace.to_path_buf());
    if !path.starts_with(&workspace_canon) {
        bail!(
            "Path '{}' is outside the workspace '{}'",
            path.display(),
            workspace_canon.display()
        );
    }
    Ok(())
}

/// Resolve an existing path for reading.
pub fn resolve_read(raw: &str, workspace: &Path, restrict: bool) -> Result<PathBuf> {
    let path = join_workspace(raw, workspace);
    let canonical = match path.canonicalize() {
        Ok(c) => c,
        Err(_) if restrict && has_parent_dir(&path) => {
            bail!("Path '{raw}' must not contain '..' unless it exists")
        }
        Err(_) => path,
    };
    if restrict {
        ensure_inside(&canonical, workspace)?;
    }
    Ok(canonical)
}

/// Resolve a path for writing. The target may not exist yet; the nearest
/// existing ancestor is canonicalized so `..` cannot escape the workspace.
pub fn resolve_write(raw: &str, workspace: &Path, restrict: bool) -> Result<PathBuf> {
    let path = join_workspace(raw, workspace);

    if restrict {
        let mut ancestor = path.clone();
        while !ancestor.exists() {
            match ancestor.parent() {
                Some(parent) => ancestor = parent.to_path_buf(),
                None => break,
            }
        }
        let check_path = if ancestor.exists() {
            let suffix = path.strip_prefix(&ancestor).unwrap_or(path.as_path());
            let joined = ancestor.canonicalize()?.join(suffix);
            if has_parent_dir(suffix) {
                bail!("Path '{}' must not contain '..' below an existing directory", raw);
            }
            joined
        } else {
            path.clone()
        };
        ensure_inside(&check_path, workspace)?;
    }

    Ok(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path();
        std::fs::write(workspace.join("test.txt"), "hello").unwrap();

        let result = resolve_read("test.txt", workspace, true).unwrap();
        assert!(result.starts_with(workspace.canonicalize().unwrap()));
    }

    #[test]
    fn test_escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("ws");
        std::fs::create_dir_all(&workspace).unwrap();

        assert!(resolve_read("../../etc/passwd", &workspace, true).is_err());
        assert!(resolve_write("../outside.txt", &workspace, true).is_err());
        assert!(resolve_write("new/../../outside.txt", &workspace, true).is_err());
    }

    #[test]
    fn test_new_file_inside_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let path = resolve_write("sub/dir/new.txt", dir.path(), true).unwrap();
        assert!(path.ends_with("sub/dir/new.txt"));
    }

    #[test]
    fn test_unrestricted_allows_escape() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_read("/tmp", dir.path(), false).is_ok());
    }
}
