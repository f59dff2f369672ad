//! Plugin source strings: local paths and `name@version` packages.

use std::fmt;
use std::path::{Path, PathBuf};

/// Where a plugin comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginSource {
    Local { path: PathBuf },
    Package { name: String, version: String },
}

pub const LATEST: &str = "latest";

impl PluginSource {
    /// Parse a source string.
    ///
    /// `file://`, `/`, `./`, `../` and `~/` prefixes are local paths.
    /// Anything else is a package id, `name@version` or `@scope/name@version`;
    /// a missing version means `latest`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("empty plugin source".into());
        }

        if let Some(path) = raw.strip_prefix("file://") {
            if path.is_empty() {
                return Err("empty file:// path".into());
            }
            return Ok(Self::Local {
                path: PathBuf::from(path),
            });
        }
        if raw.starts_with('/')
            || raw.starts_with("./")
            || raw.starts_with("../")
            || raw.starts_with("~/")
            || raw == "."
            || raw == ".."
        {
            return Ok(Self::Local {
                path: PathBuf::from(raw),
            });
        }

        let (name, version) = split_package(raw);
        validate_package_name(name)?;
        if version.is_empty() {
            return Err(format!("empty version in '{raw}'"));
        }
        Ok(Self::Package {
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }

    /// Resolve a local path against `base` (tilde expanded).
    pub fn local_path(&self, base: &Path) -> Option<PathBuf> {
        match self {
            Self::Local { path } => {
                let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref());
                Some(if expanded.is_absolute() {
                    expanded
                } else {
                    base.join(expanded)
                })
            }
            Self::Package { .. } => None,
        }
    }
}

fn split_package(raw: &str) -> (&str, &str) {
    // A leading '@' belongs to the scope, not the version.
    let search_from = usize::from(raw.starts_with('@'));
    match raw[search_from..].rfind('@') {
        Some(idx) => {
            let at = search_from + idx;
            (&raw[..at], &raw[at + 1..])
        }
        None => (raw, LATEST),
    }
}

fn validate_package_name(name: &str) -> Result<(), String> {
    let bare = match name.strip_prefix('@') {
        Some(scoped) => {
            let (scope, rest) = scoped
                .split_once('/')
                .ok_or_else(|| format!("scoped package '{name}' needs a '/'"))?;
            if scope.is_empty() {
                return Err(format!("empty scope in '{name}'"));
            }
            rest
        }
        None => name,
    };
    if bare.is_empty() {
        return Err(format!("empty package name in '{name}'"));
    }
    if bare.contains('/') || bare.contains('\\') || bare.contains("..") {
        return Err(format!("invalid package name '{name}'"));
    }
    Ok(())
}

impl fmt::Display for PluginSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { path } => write!(f, "{}", path.display()),
            Self::Package { name, version } => write!(f, "{name}@{version}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn package(name: &str, version: &str) -> PluginSource {
        PluginSource::Package {
            name: name.into(),
            version: version.into(),
        }
    }

    #[test]
    fn test_local_sources() {
        for raw in ["./plugins/audit", "../shared", "/opt/p", "~/p", "file:///opt/p"] {
            assert!(PluginSource::parse(raw).unwrap().is_local(), "{raw}");
        }
        assert_eq!(
            PluginSource::parse("file:///opt/p").unwrap(),
            PluginSource::Local {
                path: PathBuf::from("/opt/p")
            }
        );
    }

    #[test]
    fn test_package_sources() {
        assert_eq!(
            PluginSource::parse("audit@1.2.0").unwrap(),
            package("audit", "1.2.0")
        );
        assert_eq!(
            PluginSource::parse("audit").unwrap(),
            package("audit", "latest")
        );
        assert_eq!(
            PluginSource::parse("@acme/audit@2.0.0").unwrap(),
            package("@acme/audit", "2.0.0")
        );
        assert_eq!(
            PluginSource::parse("@acme/audit").unwrap(),
            package("@acme/audit", "latest")
        );
    }

    #[test]
    fn test_invalid_sources() {
        for raw in ["", "  ", "audit@", "@acme", "@/x", "a/b@1", "file://"] {
            assert!(PluginSource::parse(raw).is_err(), "{raw}");
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(package("@acme/a", "1").to_string(), "@acme/a@1");
    }

    #[test]
    fn test_local_path_resolution() {
        let source = PluginSource::parse("./p").unwrap();
        assert_eq!(
            source.local_path(Path::new("/work")).unwrap(),
            PathBuf::from("/work/./p")
        );
        assert!(package("a", "1").local_path(Path::new("/")).is_none());
    }
}
