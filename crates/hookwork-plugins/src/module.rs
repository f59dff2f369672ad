//! Plugin modules and the catalog of compiled-in ones.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::PluginFactory;

/// One named export of a plugin module.
#[derive(Clone)]
pub enum Export {
    /// Invoked at load time with the plugin input.
    Factory(Arc<dyn PluginFactory>),
    /// A type-only export; never invoked.
    Type,
    /// Plain data; never invoked.
    Value(serde_json::Value),
}

impl Export {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Factory(_) => "factory",
            Self::Type => "type",
            Self::Value(_) => "value",
        }
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// An imported plugin module: a name and its ordered exports.
#[derive(Debug, Clone)]
pub struct PluginModule {
    pub name: String,
    exports: Vec<(String, Export)>,
}

impl PluginModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exports: Vec::new(),
        }
    }

    pub fn export(mut self, name: impl Into<String>, export: Export) -> Self {
        self.exports.push((name.into(), export));
        self
    }

    pub fn factory(self, name: impl Into<String>, factory: Arc<dyn PluginFactory>) -> Self {
        self.export(name, Export::Factory(factory))
    }

    pub fn exports(&self) -> &[(String, Export)] {
        &self.exports
    }

    /// Factory exports in declaration order.
    pub fn factories(&self) -> impl Iterator<Item = (&str, &Arc<dyn PluginFactory>)> {
        self.exports.iter().filter_map(|(name, export)| match export {
            Export::Factory(f) => Some((name.as_str(), f)),
            _ => None,
        })
    }
}

#[derive(Clone)]
struct CatalogEntry {
    version: String,
    module: PluginModule,
}

/// Compiled-in plugin modules, addressable by package name.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    entries: HashMap<String, CatalogEntry>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the plugins that ship with hookwork.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(
            crate::logging_plugin::PACKAGE,
            env!("CARGO_PKG_VERSION"),
            crate::logging_plugin::module(),
        );
        catalog
    }

    pub fn register(&mut self, name: impl Into<String>, version: impl Into<String>, module: PluginModule) {
        self.entries.insert(
            name.into(),
            CatalogEntry {
                version: version.into(),
                module,
            },
        );
    }

    /// The module for `name`, if `version` is `latest` or matches.
    pub fn get(&self, name: &str, version: &str) -> Option<PluginModule> {
        let entry = self.entries.get(name)?;
        (version == crate::source::LATEST || version == entry.version)
            .then(|| entry.module.clone())
    }

    pub fn version_of(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|e| e.version.as_str())
    }

    /// Registered `(name, version)` pairs, sorted by name.
    pub fn list(&self) -> Vec<(&str, &str)> {
        let mut list: Vec<_> = self
            .entries
            .iter()
            .map(|(name, e)| (name.as_str(), e.version.as_str()))
            .collect();
        list.sort();
        list
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::hooks::HookSet;
    use crate::{PluginInput, factory};

    #[test]
    fn test_factories_skip_other_exports() {
        let module = PluginModule::new("m")
            .export("Options", Export::Type)
            .factory("First", factory(|_input: PluginInput| async { Ok(None) }))
            .export("DEFAULTS", Export::Value(serde_json::json!({ "x": 1 })))
            .factory(
                "Second",
                factory(|_input: PluginInput| async { Ok(Some(HookSet::new())) }),
            );
        let names: Vec<&str> = module.factories().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["First", "Second"]);
        assert_eq!(module.exports().len(), 4);
    }

    #[test]
    fn test_catalog_versions() {
        let mut catalog = ModuleCatalog::new();
        catalog.register("audit", "1.0.0", PluginModule::new("audit"));
        assert!(catalog.get("audit", "1.0.0").is_some());
        assert!(catalog.get("audit", "latest").is_some());
        assert!(catalog.get("audit", "2.0.0").is_none());
        assert!(catalog.get("other", "latest").is_none());
        assert_eq!(catalog.list(), vec![("audit", "1.0.0")]);
    }

    #[test]
    fn test_builtins_include_logging() {
        let catalog = ModuleCatalog::with_builtins();
        assert!(catalog.get("hookwork-logging", "latest").is_some());
    }
}
