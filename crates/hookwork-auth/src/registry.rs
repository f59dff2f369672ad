//! Auth provider registry and its per-provider state machine.
//!
//! ```text
//! Unregistered -> Registered -> Authorizing -> Authorized <-> Refreshing
//!                                    |                            |
//!                                    +--------> Failed <----------+
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credential::{Credential, CredentialStore};
use crate::prompt::{Answers, Prompt, PromptPlan};
use crate::provider::{
    AuthMethod, AuthOutcome, AuthSpec, Authorizer, CallbackMode, MethodKind, PendingCallback,
    ProviderOptions,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Unregistered,
    Registered,
    Authorizing,
    Authorized,
    Refreshing,
    Failed,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unregistered => "unregistered",
            Self::Registered => "registered",
            Self::Authorizing => "authorizing",
            Self::Authorized => "authorized",
            Self::Refreshing => "refreshing",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Misuse of the registry. Authorization failures are [`AuthOutcome`]s.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Unknown auth provider: {0}")]
    UnknownProvider(String),

    #[error("Provider '{provider}' has no auth method #{index}")]
    UnknownMethod { provider: String, index: usize },

    #[error("Provider '{provider}' needs an answer for '{key}'")]
    MissingAnswer { provider: String, key: String },

    #[error("Provider '{0}' has no pending authorization")]
    NoPendingAuthorization(String),

    #[error("Provider '{0}' expects an authorization code")]
    CodeRequired(String),

    #[error("Provider '{provider}' cannot {action} while {state}")]
    InvalidState {
        provider: String,
        state: AuthState,
        action: &'static str,
    },

    #[error("Credential store error: {0:#}")]
    Store(anyhow::Error),
}

/// The next step after [`AuthRegistry::authorize`].
#[derive(Debug)]
pub enum AuthStep {
    /// The method finished immediately (API key methods, or an OAuth
    /// authorizer that failed to start).
    Done(AuthOutcome),
    /// An OAuth flow waits for [`AuthRegistry::complete`].
    Pending {
        url: String,
        instructions: String,
        mode: CallbackMode,
    },
}

/// Summary of one registered provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub provider: String,
    pub state: AuthState,
    pub methods: Vec<(String, MethodKind)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

struct ProviderEntry {
    spec: AuthSpec,
    state: AuthState,
    pending: Option<PendingCallback>,
    last_error: Option<String>,
}

/// Registry of auth providers backed by a credential store.
pub struct AuthRegistry {
    providers: Mutex<HashMap<String, ProviderEntry>>,
    store: Arc<dyn CredentialStore>,
}

impl AuthRegistry {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Register (or replace) a provider. A stored credential makes it
    /// `Authorized` straight away.
    pub async fn register(&self, spec: AuthSpec) -> Result<AuthState, AuthError> {
        let provider = spec.provider.clone();
        let stored = self.store.load(&provider).map_err(AuthError::Store)?;
        let state = if stored.is_some() {
            AuthState::Authorized
        } else {
            AuthState::Registered
        };

        let mut providers = self.providers.lock().await;
        if providers.contains_key(&provider) {
            debug!(provider = %provider, "Auth provider replaced");
        }
        providers.insert(
            provider.clone(),
            ProviderEntry {
                spec,
                state,
                pending: None,
                last_error: None,
            },
        );
        info!(provider = %provider, state = %state, "Auth provider registered");
        Ok(state)
    }

    pub async fn state(&self, provider: &str) -> AuthState {
        self.providers
            .lock()
            .await
            .get(provider)
            .map_or(AuthState::Unregistered, |e| e.state)
    }

    pub async fn last_error(&self, provider: &str) -> Option<String> {
        self.providers
            .lock()
            .await
            .get(provider)
            .and_then(|e| e.last_error.clone())
    }

    /// Every registered provider, sorted by id.
    pub async fn list(&self) -> Vec<ProviderStatus> {
        let providers = self.providers.lock().await;
        let mut list: Vec<ProviderStatus> = providers
            .iter()
            .map(|(id, entry)| ProviderStatus {
                provider: id.clone(),
                state: entry.state,
                methods: entry
                    .spec
                    .methods
                    .iter()
                    .map(|m| (m.label.clone(), m.kind()))
                    .collect(),
                last_error: entry.last_error.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.provider.cmp(&b.provider));
        list
    }

    async fn method(&self, provider: &str, index: usize) -> Result<AuthMethod, AuthError> {
        let providers = self.providers.lock().await;
        let entry = providers
            .get(provider)
            .ok_or_else(|| AuthError::UnknownProvider(provider.to_string()))?;
        entry
            .spec
            .methods
            .get(index)
            .cloned()
            .ok_or_else(|| AuthError::UnknownMethod {
                provider: provider.to_string(),
                index,
            })
    }

    /// The prompts method `index` asks before authorizing.
    pub async fn prompts(&self, provider: &str, index: usize) -> Result<Vec<Prompt>, AuthError> {
        Ok(self.method(provider, index).await?.prompts)
    }

    async fn transition(
        &self,
        provider: &str,
        action: &'static str,
        allowed: &[AuthState],
        to: AuthState,
    ) -> Result<(), AuthError> {
        let mut providers = self.providers.lock().await;
        let entry = providers
            .get_mut(provider)
            .ok_or_else(|| AuthError::UnknownProvider(provider.to_string()))?;
        if !allowed.contains(&entry.state) {
            return Err(AuthError::InvalidState {
                provider: provider.to_string(),
                state: entry.state,
                action,
            });
        }
        debug!(provider, from = %entry.state, to = %to, "Auth state change");
        entry.state = to;
        Ok(())
    }

    /// Start method `index` with the collected `answers`.
    pub async fn authorize(
        &self,
        provider: &str,
        index: usize,
        answers: Answers,
    ) -> Result<AuthStep, AuthError> {
        let method = self.method(provider, index).await?;
        PromptPlan::new(&method.prompts)
            .check(&answers)
            .map_err(|key| AuthError::MissingAnswer {
                provider: provider.to_string(),
                key,
            })?;

        self.transition(
            provider,
            "authorize",
            &[
                AuthState::Registered,
                AuthState::Authorizing,
                AuthState::Authorized,
                AuthState::Failed,
            ],
            AuthState::Authorizing,
        )
        .await?;
        info!(provider, method = %method.label, kind = %method.kind(), "Authorizing");

        match method.authorizer {
            Authorizer::Api(authorize) => {
                let outcome = authorize(answers).await;
                Ok(AuthStep::Done(self.finish(provider, outcome).await))
            }
            Authorizer::OAuth(authorize) => match authorize(answers).await {
                Ok(request) => {
                    let mode = request.mode();
                    let mut providers = self.providers.lock().await;
                    if let Some(entry) = providers.get_mut(provider) {
                        entry.pending = Some(request.callback);
                    }
                    Ok(AuthStep::Pending {
                        url: request.url,
                        instructions: request.instructions,
                        mode,
                    })
                }
                Err(e) => {
                    let outcome = AuthOutcome::failed(format!("{e:#}"));
                    Ok(AuthStep::Done(self.finish(provider, outcome).await))
                }
            },
        }
    }

    /// Finish a pending OAuth authorization. `Code` mode needs `code`.
    pub async fn complete(
        &self,
        provider: &str,
        code: Option<String>,
    ) -> Result<AuthOutcome, AuthError> {
        let pending = {
            let mut providers = self.providers.lock().await;
            let entry = providers
                .get_mut(provider)
                .ok_or_else(|| AuthError::UnknownProvider(provider.to_string()))?;
            let wants_code = match &entry.pending {
                None => return Err(AuthError::NoPendingAuthorization(provider.to_string())),
                Some(pending) => matches!(pending, PendingCallback::Code(_)),
            };
            if wants_code && code.is_none() {
                return Err(AuthError::CodeRequired(provider.to_string()));
            }
            entry.pending.take()
        };

        let outcome = match (pending, code) {
            (Some(PendingCallback::Auto(wait)), _) => wait.await,
            (Some(PendingCallback::Code(exchange)), Some(code)) => {
                exchange(code.trim().to_string()).await
            }
            _ => AuthOutcome::failed("authorization code missing"),
        };
        Ok(self.finish(provider, outcome).await)
    }

    async fn finish(&self, provider: &str, outcome: AuthOutcome) -> AuthOutcome {
        let outcome = match outcome {
            AuthOutcome::Success(credential) => match self.store.save(provider, &credential) {
                Ok(()) => AuthOutcome::Success(credential),
                Err(e) => AuthOutcome::failed(format!("failed to store credential: {e:#}")),
            },
            failed => failed,
        };

        let mut providers = self.providers.lock().await;
        if let Some(entry) = providers.get_mut(provider) {
            match &outcome {
                AuthOutcome::Success(credential) => {
                    entry.state = AuthState::Authorized;
                    entry.last_error = None;
                    info!(provider, kind = credential.kind(), "Authorized");
                }
                AuthOutcome::Failed { reason } => {
                    entry.state = AuthState::Failed;
                    entry.last_error = Some(reason.clone());
                    warn!(provider, reason = %reason, "Authorization failed");
                }
            }
        }
        outcome
    }

    /// Materialize provider options from the stored credential,
    /// refreshing it first when it has expired.
    ///
    /// Returns `None` when the provider is not authorized, has no loader,
    /// or the refresh failed.
    pub async fn load(&self, provider: &str) -> Result<Option<ProviderOptions>, AuthError> {
        let (spec, state) = {
            let providers = self.providers.lock().await;
            let entry = providers
                .get(provider)
                .ok_or_else(|| AuthError::UnknownProvider(provider.to_string()))?;
            (entry.spec.clone(), entry.state)
        };
        if state != AuthState::Authorized {
            return Ok(None);
        }
        let Some(mut credential) = self.store.load(provider).map_err(AuthError::Store)? else {
            self.transition(provider, "load", &[AuthState::Authorized], AuthState::Registered)
                .await?;
            return Ok(None);
        };

        if credential.is_expired() {
            credential = match self.refresh(provider, &spec, credential).await? {
                Some(fresh) => fresh,
                None => return Ok(None),
            };
        }

        let Some(loader) = spec.loader else {
            return Ok(None);
        };
        match loader(credential).await {
            Ok(options) => Ok(Some(options)),
            Err(e) => {
                warn!(provider, error = %e, "Auth loader failed");
                Ok(None)
            }
        }
    }

    async fn refresh(
        &self,
        provider: &str,
        spec: &AuthSpec,
        credential: Credential,
    ) -> Result<Option<Credential>, AuthError> {
        self.transition(provider, "refresh", &[AuthState::Authorized], AuthState::Refreshing)
            .await?;
        info!(provider, "Refreshing expired credential");

        let outcome = match &spec.refresher {
            Some(refresh) => refresh(credential).await,
            None => AuthOutcome::failed("credential expired and the provider cannot refresh it"),
        };
        match self.finish(provider, outcome).await {
            AuthOutcome::Success(fresh) => Ok(Some(fresh)),
            AuthOutcome::Failed { .. } => Ok(None),
        }
    }

    /// Options for every authorized provider with a loader.
    pub async fn load_all(&self) -> BTreeMap<String, ProviderOptions> {
        let ids: Vec<String> = self.list().await.into_iter().map(|s| s.provider).collect();
        let mut all = BTreeMap::new();
        for id in ids {
            match self.load(&id).await {
                Ok(Some(options)) => {
                    all.insert(id, options);
                }
                Ok(None) => {}
                Err(e) => warn!(provider = %id, error = %e, "Auth load failed"),
            }
        }
        all
    }

    /// Forget the stored credential; the provider goes back to `Registered`.
    pub async fn logout(&self, provider: &str) -> Result<(), AuthError> {
        if !self.providers.lock().await.contains_key(provider) {
            return Err(AuthError::UnknownProvider(provider.to_string()));
        }
        self.store.remove(provider).map_err(AuthError::Store)?;

        let mut providers = self.providers.lock().await;
        if let Some(entry) = providers.get_mut(provider) {
            entry.state = AuthState::Registered;
            entry.pending = None;
            entry.last_error = None;
        }
        info!(provider, "Logged out");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::credential::MemoryCredentialStore;
    use crate::prompt::Prompt;
    use crate::provider::AuthorizationRequest;

    fn registry() -> (AuthRegistry, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::new());
        (AuthRegistry::new(store.clone()), store)
    }

    fn answers(pairs: &[(&str, &str)]) -> Answers {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn code_spec() -> AuthSpec {
        AuthSpec::new("acme").method(AuthMethod::oauth(
            "Acme account",
            vec![],
            |_answers| async {
                Ok(AuthorizationRequest::code(
                    "https://acme.test/authorize",
                    "Paste the code",
                    |code| async move {
                        if code == "good" {
                            AuthOutcome::Success(Credential::oauth("tok", Some("ref".into()), None))
                        } else {
                            AuthOutcome::failed("bad code")
                        }
                    },
                ))
            },
        ))
    }

    #[tokio::test]
    async fn test_api_key_flow() {
        let (registry, store) = registry();
        let spec = AuthSpec::new("openai").method(AuthMethod::api_key("API key"));
        assert_eq!(registry.state("openai").await, AuthState::Unregistered);
        assert_eq!(registry.register(spec).await.unwrap(), AuthState::Registered);

        let err = registry
            .authorize("openai", 0, Answers::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingAnswer { ref key, .. } if key == "key"));

        let step = registry
            .authorize("openai", 0, answers(&[("key", "sk-1")]))
            .await
            .unwrap();
        assert!(matches!(step, AuthStep::Done(AuthOutcome::Success(_))));
        assert_eq!(registry.state("openai").await, AuthState::Authorized);
        assert_eq!(store.load("openai").unwrap().unwrap().secret(), "sk-1");
    }

    #[tokio::test]
    async fn test_stored_credential_registers_authorized() {
        let (registry, store) = registry();
        store.save("openai", &Credential::api("sk")).unwrap();
        let state = registry
            .register(AuthSpec::new("openai").method(AuthMethod::api_key("key")))
            .await
            .unwrap();
        assert_eq!(state, AuthState::Authorized);
    }

    #[tokio::test]
    async fn test_code_flow_failure_then_retry() {
        let (registry, _store) = registry();
        registry.register(code_spec()).await.unwrap();

        let step = registry.authorize("acme", 0, Answers::new()).await.unwrap();
        match step {
            AuthStep::Pending { url, mode, .. } => {
                assert_eq!(url, "https://acme.test/authorize");
                assert_eq!(mode, CallbackMode::Code);
            }
            other => panic!("expected pending, got {other:?}"),
        }
        assert_eq!(registry.state("acme").await, AuthState::Authorizing);

        let err = registry.complete("acme", None).await.unwrap_err();
        assert!(matches!(err, AuthError::CodeRequired(_)));

        let outcome = registry
            .complete("acme", Some("wrong".into()))
            .await
            .unwrap();
        assert!(!outcome.is_success());
        assert_eq!(registry.state("acme").await, AuthState::Failed);
        assert_eq!(registry.last_error("acme").await.as_deref(), Some("bad code"));

        registry.authorize("acme", 0, Answers::new()).await.unwrap();
        let outcome = registry.complete("acme", Some(" good ".into())).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(registry.state("acme").await, AuthState::Authorized);
        assert!(registry.last_error("acme").await.is_none());
    }

    #[tokio::test]
    async fn test_auto_flow() {
        let (registry, _store) = registry();
        let spec = AuthSpec::new("auto").method(AuthMethod::oauth("Browser", vec![], |_| async {
            Ok(AuthorizationRequest::auto(
                "https://auto.test",
                "Opening browser",
                async { AuthOutcome::Success(Credential::oauth("t", None, None)) },
            ))
        }));
        registry.register(spec).await.unwrap();
        let step = registry.authorize("auto", 0, Answers::new()).await.unwrap();
        assert!(matches!(step, AuthStep::Pending { mode: CallbackMode::Auto, .. }));
        assert!(registry.complete("auto", None).await.unwrap().is_success());
        assert!(matches!(
            registry.complete("auto", None).await.unwrap_err(),
            AuthError::NoPendingAuthorization(_)
        ));
    }

    #[tokio::test]
    async fn test_unknown_provider_and_method() {
        let (registry, _store) = registry();
        assert!(matches!(
            registry.authorize("nope", 0, Answers::new()).await.unwrap_err(),
            AuthError::UnknownProvider(_)
        ));
        registry.register(code_spec()).await.unwrap();
        assert!(matches!(
            registry.prompts("acme", 3).await.unwrap_err(),
            AuthError::UnknownMethod { index: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_load_refreshes_expired_credential() {
        let (registry, store) = registry();
        let refreshes = Arc::new(AtomicUsize::new(0));
        let counter = refreshes.clone();
        let spec = code_spec()
            .loader(|credential| async move {
                let mut options = ProviderOptions::new();
                options.insert("token".into(), credential.secret().into());
                Ok(options)
            })
            .refresher(move |_old| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { AuthOutcome::Success(Credential::oauth("fresh", None, None)) }
            });
        store
            .save("acme", &Credential::oauth("stale", Some("r".into()), Some(1)))
            .unwrap();
        registry.register(spec).await.unwrap();

        let options = registry.load("acme").await.unwrap().unwrap();
        assert_eq!(options["token"], "fresh");
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(registry.state("acme").await, AuthState::Authorized);
        assert_eq!(store.load("acme").unwrap().unwrap().secret(), "fresh");
    }

    #[tokio::test]
    async fn test_failed_refresh_marks_failed() {
        let (registry, store) = registry();
        store
            .save("acme", &Credential::oauth("stale", None, Some(1)))
            .unwrap();
        registry
            .register(code_spec().loader(|_| async { Ok(ProviderOptions::new()) }))
            .await
            .unwrap();
        assert!(registry.load("acme").await.unwrap().is_none());
        assert_eq!(registry.state("acme").await, AuthState::Failed);
    }

    #[tokio::test]
    async fn test_logout() {
        let (registry, store) = registry();
        store.save("acme", &Credential::api("k")).unwrap();
        registry.register(code_spec()).await.unwrap();
        registry.logout("acme").await.unwrap();
        assert_eq!(registry.state("acme").await, AuthState::Registered);
        assert!(store.load("acme").unwrap().is_none());
        assert!(registry.logout("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_list_and_prompts() {
        let (registry, _store) = registry();
        registry.register(code_spec()).await.unwrap();
        registry
            .register(
                AuthSpec::new("beta")
                    .method(AuthMethod::api("Key", vec![Prompt::secret("key", "Key")], |_| async {
                        AuthOutcome::failed("nope")
                    })),
            )
            .await
            .unwrap();
        let list = registry.list().await;
        assert_eq!(list[0].provider, "acme");
        assert_eq!(list[1].methods, vec![("Key".to_string(), MethodKind::Api)]);
        assert_eq!(registry.prompts("beta", 0).await.unwrap().len(), 1);
    }
}
