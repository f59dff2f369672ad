//! One running hookwork instance: plugins loaded, config finalized, event
//! hooks subscribed, auth providers registered and tools intercepted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hookwork_auth::{
    AuthError, AuthRegistry, CredentialStore, FileCredentialStore, ProviderOptions,
};
use hookwork_bus::{BusError, EventBus, SubscriptionId, catalog};
use hookwork_core::config::FrozenConfig;
use hookwork_core::error::HookworkError;
use hookwork_core::settings::Settings;
use hookwork_tools::ToolRegistry;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::PluginInput;
use crate::hooks::HookKind;
use crate::interceptor::ToolInterceptor;
use crate::loader::{LoadError, PluginDescriptor, PluginLoader};
use crate::pipeline::{ConfigPipeline, Override, Rejection};
use crate::registry::HookRegistry;
use crate::resolver::{DefaultResolver, ModuleResolver};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("base config: {0}")]
    Config(#[from] HookworkError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("event bus: {0}")]
    Bus(#[from] BusError),

    #[error("auth: {0}")]
    Auth(#[from] AuthError),
}

pub struct Host {
    settings: Settings,
    directory: PathBuf,
    bus: Arc<EventBus>,
    plugins: Vec<PluginDescriptor>,
    hooks: Arc<HookRegistry>,
    config: FrozenConfig,
    rejected: Vec<Rejection>,
    overrides: Vec<Override>,
    interceptor: ToolInterceptor,
    auth: Arc<AuthRegistry>,
    provider_options: BTreeMap<String, ProviderOptions>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    disposed: AtomicBool,
}

impl Host {
    /// Start with the default resolver and the file credential store named
    /// in `settings`.
    pub async fn from_settings(settings: Settings, directory: impl Into<PathBuf>) -> Result<Self, HostError> {
        let directory = directory.into();
        let resolver = Arc::new(DefaultResolver::from_settings(&settings, &directory));
        let store = Arc::new(FileCredentialStore::new(settings.auth_file()));
        Self::start(settings, directory, resolver, store).await
    }

    /// Load every configured plugin and bring the instance up. An invalid
    /// base config or any load failure aborts startup.
    pub async fn start(
        settings: Settings,
        directory: impl Into<PathBuf>,
        resolver: Arc<dyn ModuleResolver>,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, HostError> {
        settings.config.validate()?;

        let directory = directory.into();
        let bus = Arc::new(EventBus::new());
        catalog::define_builtin(&bus).await?;

        let input = PluginInput::new(&directory, bus.clone());
        let loader = PluginLoader::from_settings(resolver, &settings);
        let loaded = loader.load(&settings.plugins, &input).await?;

        let mut registry = HookRegistry::new(settings.hook_timeout());
        let mut plugins = Vec::with_capacity(loaded.len());
        for mut plugin in loaded {
            for (export, set) in std::mem::take(&mut plugin.hook_sets) {
                registry.push(plugin.hook_id(&export), set);
            }
            plugins.push(plugin.descriptor);
        }
        let hooks = Arc::new(registry);

        let outcome = ConfigPipeline::new(settings.warn_on_override)
            .run(settings.config.clone(), &hooks)
            .await;

        let mut subscriptions = Vec::new();
        for (index, entry) in hooks.entries().iter().enumerate() {
            if !entry.hooks.implements(HookKind::Event) {
                continue;
            }
            let registry = hooks.clone();
            let id = bus
                .subscribe_all(move |event| {
                    let registry = registry.clone();
                    async move { registry.deliver_event(index, event).await }
                })
                .await?;
            debug!(plugin = %entry.id, subscription = ?id, "Event hook subscribed");
            subscriptions.push(id);
        }

        let auth = Arc::new(AuthRegistry::new(store));
        for (plugin, spec) in hooks.auth_specs() {
            let provider = spec.provider.clone();
            let state = auth.register(spec).await?;
            debug!(plugin = %plugin, provider = %provider, state = %state, "Auth provider from plugin");
        }
        let provider_options = auth.load_all().await;

        let interceptor = ToolInterceptor::new(hooks.clone(), ToolRegistry::with_builtins(), &directory)
            .with_bus(bus.clone());

        info!(
            plugins = plugins.len(),
            hook_sets = hooks.len(),
            event_hooks = subscriptions.len(),
            auth_loaded = provider_options.len(),
            directory = %directory.display(),
            "Host started"
        );

        if let Err(e) = bus.publish(catalog::SERVER_CONNECTED, serde_json::json!({})).await {
            warn!(error = %e, "Failed to publish server.connected");
        }

        Ok(Self {
            settings,
            directory,
            bus,
            plugins,
            hooks,
            config: outcome.config,
            rejected: outcome.rejected,
            overrides: outcome.overrides,
            interceptor,
            auth,
            provider_options,
            subscriptions: Mutex::new(subscriptions),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Loaded plugins in load order.
    pub fn plugins(&self) -> &[PluginDescriptor] {
        &self.plugins
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// The finalized config.
    pub fn config(&self) -> &FrozenConfig {
        &self.config
    }

    pub fn rejected(&self) -> &[Rejection] {
        &self.rejected
    }

    pub fn overrides(&self) -> &[Override] {
        &self.overrides
    }

    pub fn interceptor(&self) -> &ToolInterceptor {
        &self.interceptor
    }

    pub fn auth(&self) -> &Arc<AuthRegistry> {
        &self.auth
    }

    /// Options produced at startup by each authorized provider's loader.
    pub fn provider_options(&self) -> &BTreeMap<String, ProviderOptions> {
        &self.provider_options
    }

    /// Publish on this instance's bus.
    pub async fn publish(&self, kind: &str, properties: serde_json::Value) -> Result<usize, BusError> {
        self.bus.publish(kind, properties).await
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Unsubscribe every event hook and dispose the bus. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let ids: Vec<SubscriptionId> = self.subscriptions.lock().await.drain(..).collect();
        for id in ids {
            self.bus.unsubscribe(id).await;
        }
        self.bus.dispose().await;
        info!(directory = %self.directory.display(), "Host disposed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use hookwork_auth::{AuthOutcome, AuthSpec, Credential, MemoryCredentialStore};
    use hookwork_core::config::Command;

    use super::*;
    use crate::module::{ModuleCatalog, PluginModule};
    use crate::{HookSet, factory};

    fn resolver(catalog: ModuleCatalog) -> Arc<dyn ModuleResolver> {
        let tmp = std::env::temp_dir();
        Arc::new(DefaultResolver::new(catalog, &tmp, tmp.join("hookwork-none")))
    }

    fn settings(plugins: &[&str]) -> Settings {
        Settings {
            plugins: plugins.iter().map(|p| p.to_string()).collect(),
            ..Settings::default()
        }
    }

    fn counting_plugin(seen: Arc<AtomicUsize>) -> PluginModule {
        PluginModule::new("counter").factory(
            "Counter",
            factory(move |_input| {
                let seen = seen.clone();
                async move {
                    let set = HookSet::new()
                        .on_event(move |_event| {
                            seen.fetch_add(1, Ordering::SeqCst);
                            async { Ok(()) }
                        })
                        .on_config(|mut config: hookwork_core::config::HostConfig| async move {
                            config
                                .command
                                .insert("count".into(), Command::new("count $ARGUMENTS"));
                            Ok(config)
                        })
                        .auth(AuthSpec::new("acme").method(hookwork_auth::AuthMethod::api_key("API key")));
                    Ok(Some(set))
                }
            }),
        )
    }

    #[tokio::test]
    async fn test_start_wires_everything() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut catalog = ModuleCatalog::with_builtins();
        catalog.register("counter", "1.0.0", counting_plugin(seen.clone()));

        let store = Arc::new(MemoryCredentialStore::new());
        store.save("acme", &Credential::api("k")).unwrap();

        let host = Host::start(
            settings(&["hookwork-logging", "counter"]),
            std::env::temp_dir(),
            resolver(catalog),
            store,
        )
        .await
        .unwrap();

        assert_eq!(host.plugins().len(), 2);
        assert_eq!(host.hooks().count(HookKind::Event), 2);
        assert!(host.config().command.contains_key("count"));
        assert_eq!(
            host.auth().state("acme").await,
            hookwork_auth::AuthState::Authorized
        );
        // server.connected was delivered during startup.
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        let delivered = host
            .publish(catalog::FILE_EDITED, serde_json::json!({ "file": "src/main.rs" }))
            .await
            .unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    fn refreshing_plugin(loads: Arc<AtomicUsize>) -> PluginModule {
        PluginModule::new("acme-auth").factory(
            "AcmeAuth",
            factory(move |_input| {
                let loads = loads.clone();
                async move {
                    let spec = AuthSpec::new("acme")
                        .method(hookwork_auth::AuthMethod::api_key("API key"))
                        .refresher(|old: Credential| async move {
                            assert_eq!(old.secret(), "stale");
                            AuthOutcome::Success(Credential::oauth("fresh", Some("rt".into()), None))
                        })
                        .loader(move |credential: Credential| {
                            loads.fetch_add(1, Ordering::SeqCst);
                            async move {
                                let mut options = ProviderOptions::new();
                                options.insert("api_key".into(), credential.secret().into());
                                Ok(options)
                            }
                        });
                    Ok(Some(HookSet::new().auth(spec)))
                }
            }),
        )
    }

    #[tokio::test]
    async fn test_start_refreshes_and_loads_stored_credentials() {
        let loads = Arc::new(AtomicUsize::new(0));
        let mut catalog = ModuleCatalog::new();
        catalog.register("acme-auth", "1.0.0", refreshing_plugin(loads.clone()));

        let store = Arc::new(MemoryCredentialStore::new());
        store
            .save("acme", &Credential::oauth("stale", Some("rt".into()), Some(1)))
            .unwrap();

        let host = Host::start(
            settings(&["acme-auth"]),
            std::env::temp_dir(),
            resolver(catalog),
            store.clone(),
        )
        .await
        .unwrap();

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(host.provider_options()["acme"]["api_key"], "fresh");
        assert_eq!(store.load("acme").unwrap().unwrap().secret(), "fresh");
        assert_eq!(
            host.auth().state("acme").await,
            hookwork_auth::AuthState::Authorized
        );
    }

    #[tokio::test]
    async fn test_start_skips_loader_without_credential() {
        let loads = Arc::new(AtomicUsize::new(0));
        let mut catalog = ModuleCatalog::new();
        catalog.register("acme-auth", "1.0.0", refreshing_plugin(loads.clone()));

        let host = Host::start(
            settings(&["acme-auth"]),
            std::env::temp_dir(),
            resolver(catalog),
            Arc::new(MemoryCredentialStore::new()),
        )
        .await
        .unwrap();

        assert_eq!(loads.load(Ordering::SeqCst), 0);
        assert!(host.provider_options().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_base_config_aborts_start() {
        let mut settings = settings(&["hookwork-logging"]);
        settings
            .config
            .command
            .insert("broken".into(), Command::new("no placeholder"));

        let err = Host::start(
            settings,
            std::env::temp_dir(),
            resolver(ModuleCatalog::with_builtins()),
            Arc::new(MemoryCredentialStore::new()),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, HostError::Config(_)));
        assert!(err.to_string().contains("command.broken.template"));
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let host = Host::start(
            settings(&["hookwork-logging"]),
            std::env::temp_dir(),
            resolver(ModuleCatalog::with_builtins()),
            Arc::new(MemoryCredentialStore::new()),
        )
        .await
        .unwrap();
        assert_eq!(host.bus().subscriber_count().await, 1);

        host.dispose().await;
        host.dispose().await;
        assert!(host.is_disposed());
        assert_eq!(host.bus().subscriber_count().await, 0);
        assert!(matches!(
            host.publish(catalog::SERVER_CONNECTED, serde_json::json!({})).await,
            Err(BusError::Disposed)
        ));
    }

    #[tokio::test]
    async fn test_load_failure_aborts_start() {
        let result = Host::start(
            settings(&["missing-plugin"]),
            std::env::temp_dir(),
            resolver(ModuleCatalog::new()),
            Arc::new(MemoryCredentialStore::new()),
        )
        .await;
        assert!(matches!(result, Err(HostError::Load(_))));
    }
}
