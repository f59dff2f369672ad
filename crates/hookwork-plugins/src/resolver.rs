//! Turning plugin sources into modules.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use hookwork_core::settings::Settings;
use tracing::{debug, info};

use crate::manifest::{self, PluginManifest};
use crate::module::{ModuleCatalog, PluginModule};
use crate::source::{LATEST, PluginSource};

/// Where a source was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedPlugin {
    /// A compiled-in module.
    Catalog { name: String, version: String },
    /// A directory holding a manifest.
    Directory { path: PathBuf },
}

impl std::fmt::Display for ResolvedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Catalog { name, version } => write!(f, "builtin {name}@{version}"),
            Self::Directory { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Resolves sources and imports modules. Each step may be slow
/// (installation, disk) and runs under the loader's deadline.
#[async_trait]
pub trait ModuleResolver: Send + Sync {
    async fn resolve(&self, source: &PluginSource) -> Result<ResolvedPlugin>;
    async fn import(&self, resolved: &ResolvedPlugin) -> Result<PluginModule>;
}

/// Installs a package into the cache when it is not there yet.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Install `name@version` into `dest`, which does not exist yet.
    async fn install(&self, name: &str, version: &str, dest: &Path) -> Result<()>;
}

/// Cache directory name for a package: `@scope/name` becomes `@scope+name`.
pub fn package_dir_name(name: &str, version: &str) -> String {
    format!("{}@{version}", name.replace('/', "+"))
}

/// Installs packages by copying them from a local mirror laid out like
/// the cache (`<mirror>/<name>@<version>/plugin.json5`).
#[derive(Debug, Clone)]
pub struct MirrorInstaller {
    mirror: PathBuf,
}

impl MirrorInstaller {
    pub fn new(mirror: impl Into<PathBuf>) -> Self {
        Self {
            mirror: mirror.into(),
        }
    }

    /// The mirror directory for `name@version`; `latest` picks the highest
    /// semver version present.
    fn find(&self, name: &str, version: &str) -> Result<PathBuf> {
        if version != LATEST {
            let dir = self.mirror.join(package_dir_name(name, version));
            if !dir.is_dir() {
                bail!("{name}@{version} not found in mirror {}", self.mirror.display());
            }
            return Ok(dir);
        }

        let prefix = format!("{}@", name.replace('/', "+"));
        let mut best: Option<(semver::Version, PathBuf)> = None;
        for entry in std::fs::read_dir(&self.mirror)
            .with_context(|| format!("cannot read mirror {}", self.mirror.display()))?
        {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(candidate) = file_name.to_str().and_then(|n| n.strip_prefix(&prefix)) else {
                continue;
            };
            let Ok(parsed) = semver::Version::parse(candidate) else {
                continue;
            };
            if best.as_ref().is_none_or(|(v, _)| parsed > *v) {
                best = Some((parsed, entry.path()));
            }
        }
        best.map(|(_, path)| path)
            .with_context(|| format!("{name} not found in mirror {}", self.mirror.display()))
    }
}

#[async_trait]
impl PackageInstaller for MirrorInstaller {
    async fn install(&self, name: &str, version: &str, dest: &Path) -> Result<()> {
        let from = self.find(name, version)?;
        info!(package = %name, version, from = %from.display(), "Installing plugin package");
        copy_dir(&from, dest).await
    }
}

/// Copy a directory tree. Written to a staging directory first so a
/// failed copy never leaves a half-installed package behind.
async fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    let staging = to.with_extension("partial");
    if tokio::fs::metadata(&staging).await.is_ok() {
        tokio::fs::remove_dir_all(&staging).await?;
    }

    let mut pending = vec![(from.to_path_buf(), staging.clone())];
    while let Some((src, dst)) = pending.pop() {
        tokio::fs::create_dir_all(&dst).await?;
        let mut entries = tokio::fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                tokio::fs::copy(entry.path(), &target).await?;
            }
        }
    }

    tokio::fs::rename(&staging, to).await?;
    Ok(())
}

/// Resolution order: catalog, then local paths, then the package cache,
/// then the installer.
pub struct DefaultResolver {
    catalog: ModuleCatalog,
    base_dir: PathBuf,
    cache_dir: PathBuf,
    installer: Option<Arc<dyn PackageInstaller>>,
}

impl DefaultResolver {
    /// Relative local paths resolve against `base_dir`.
    pub fn new(catalog: ModuleCatalog, base_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            base_dir: base_dir.into(),
            cache_dir: cache_dir.into(),
            installer: None,
        }
    }

    /// Builtin catalog, the configured cache, and the mirror installer when
    /// `mirror_dir` is set.
    pub fn from_settings(settings: &Settings, base_dir: impl Into<PathBuf>) -> Self {
        let resolver = Self::new(ModuleCatalog::with_builtins(), base_dir, settings.cache_dir());
        match settings.mirror_dir() {
            Some(mirror) => resolver.with_installer(Arc::new(MirrorInstaller::new(mirror))),
            None => resolver,
        }
    }

    pub fn with_installer(mut self, installer: Arc<dyn PackageInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }
}

#[async_trait]
impl ModuleResolver for DefaultResolver {
    async fn resolve(&self, source: &PluginSource) -> Result<ResolvedPlugin> {
        match source {
            PluginSource::Local { .. } => {
                let path = source
                    .local_path(&self.base_dir)
                    .context("local source without a path")?;
                let manifest = manifest::locate(&path)?;
                let dir = manifest.parent().map(Path::to_path_buf).unwrap_or(path);
                Ok(ResolvedPlugin::Directory { path: dir })
            }
            PluginSource::Package { name, version } => {
                if self.catalog.get(name, version).is_some() {
                    let version = self.catalog.version_of(name).unwrap_or(version).to_string();
                    return Ok(ResolvedPlugin::Catalog {
                        name: name.clone(),
                        version,
                    });
                }

                let cached = self.cache_dir.join(package_dir_name(name, version));
                if manifest::locate(&cached).is_ok() {
                    debug!(package = %name, version = %version, "Plugin package cached");
                    return Ok(ResolvedPlugin::Directory { path: cached });
                }

                let Some(installer) = &self.installer else {
                    bail!("package {name}@{version} is not installed and no installer is configured");
                };
                tokio::fs::create_dir_all(&self.cache_dir).await?;
                installer.install(name, version, &cached).await?;
                manifest::locate(&cached)
                    .with_context(|| format!("installed package {name}@{version} has no manifest"))?;
                Ok(ResolvedPlugin::Directory { path: cached })
            }
        }
    }

    async fn import(&self, resolved: &ResolvedPlugin) -> Result<PluginModule> {
        match resolved {
            ResolvedPlugin::Catalog { name, version } => self
                .catalog
                .get(name, version)
                .with_context(|| format!("{name}@{version} is not in the catalog")),
            ResolvedPlugin::Directory { path } => {
                let (manifest, dir) = PluginManifest::load(path)?;
                manifest.into_module(&dir)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, name: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join("plugin.json5"),
            format!(r#"{{ name: "{name}", exports: [{{ name: "T", kind: "type" }}] }}"#),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_local_directory() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(&tmp.path().join("plugins/audit"), "audit");
        let resolver = DefaultResolver::new(ModuleCatalog::new(), tmp.path(), tmp.path().join("cache"));

        let source = PluginSource::parse("./plugins/audit").unwrap();
        let resolved = resolver.resolve(&source).await.unwrap();
        let module = resolver.import(&resolved).await.unwrap();
        assert_eq!(module.name, "audit");

        let missing = PluginSource::parse("./plugins/missing").unwrap();
        assert!(resolver.resolve(&missing).await.is_err());
    }

    #[tokio::test]
    async fn test_catalog_first() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = DefaultResolver::new(ModuleCatalog::with_builtins(), tmp.path(), tmp.path());
        let source = PluginSource::parse("hookwork-logging").unwrap();
        let resolved = resolver.resolve(&source).await.unwrap();
        assert!(matches!(resolved, ResolvedPlugin::Catalog { .. }));
        assert!(resolver.import(&resolved).await.is_ok());
    }

    #[tokio::test]
    async fn test_package_from_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = tmp.path().join("cache");
        write_manifest(&cache.join("@acme+audit@1.0.0"), "audit");
        let resolver = DefaultResolver::new(ModuleCatalog::new(), tmp.path(), &cache);

        let resolved = resolver
            .resolve(&PluginSource::parse("@acme/audit@1.0.0").unwrap())
            .await
            .unwrap();
        assert_eq!(
            resolved,
            ResolvedPlugin::Directory {
                path: cache.join("@acme+audit@1.0.0")
            }
        );
    }

    #[tokio::test]
    async fn test_package_not_installed_without_installer() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = DefaultResolver::new(ModuleCatalog::new(), tmp.path(), tmp.path());
        let err = resolver
            .resolve(&PluginSource::parse("audit@1.0.0").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no installer"));
    }

    #[tokio::test]
    async fn test_mirror_install_latest() {
        let tmp = tempfile::tempdir().unwrap();
        let mirror = tmp.path().join("mirror");
        write_manifest(&mirror.join("audit@1.2.0"), "audit-old");
        write_manifest(&mirror.join("audit@1.10.0"), "audit-new");
        std::fs::create_dir_all(mirror.join("audit@1.10.0/bin")).unwrap();
        std::fs::write(mirror.join("audit@1.10.0/bin/hook.sh"), "exit 0").unwrap();
        let cache = tmp.path().join("cache");

        let resolver = DefaultResolver::new(ModuleCatalog::new(), tmp.path(), &cache)
            .with_installer(Arc::new(MirrorInstaller::new(&mirror)));
        let resolved = resolver
            .resolve(&PluginSource::parse("audit").unwrap())
            .await
            .unwrap();
        let module = resolver.import(&resolved).await.unwrap();
        assert_eq!(module.name, "audit-new");
        assert!(cache.join("audit@latest/bin/hook.sh").is_file());
        assert!(!cache.join("audit@latest.partial").exists());
    }

    #[tokio::test]
    async fn test_mirror_missing_version() {
        let tmp = tempfile::tempdir().unwrap();
        let installer = MirrorInstaller::new(tmp.path());
        assert!(
            installer
                .install("audit", "9.9.9", &tmp.path().join("dest"))
                .await
                .is_err()
        );
    }
}
