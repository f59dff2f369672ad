//! What a plugin declares to add an auth provider.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;

use crate::credential::Credential;
use crate::prompt::{Answers, Prompt};

/// Result of an authorization attempt. Failures are values, not errors.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Success(Credential),
    Failed { reason: String },
}

impl AuthOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    #[serde(rename = "oauth")]
    OAuth,
    Api,
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OAuth => f.write_str("oauth"),
            Self::Api => f.write_str("api"),
        }
    }
}

/// How the pending OAuth authorization completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackMode {
    /// The host waits for the local callback receiver.
    Auto,
    /// The user pastes a code shown by the provider.
    Code,
}

pub(crate) enum PendingCallback {
    Auto(BoxFuture<'static, AuthOutcome>),
    Code(Box<dyn FnOnce(String) -> BoxFuture<'static, AuthOutcome> + Send>),
}

/// An OAuth authorization in progress: the URL to open and how to finish.
pub struct AuthorizationRequest {
    pub url: String,
    pub instructions: String,
    pub(crate) callback: PendingCallback,
}

impl AuthorizationRequest {
    /// Completes by awaiting `wait` (typically a local callback receiver).
    pub fn auto<Fut>(url: impl Into<String>, instructions: impl Into<String>, wait: Fut) -> Self
    where
        Fut: Future<Output = AuthOutcome> + Send + 'static,
    {
        Self {
            url: url.into(),
            instructions: instructions.into(),
            callback: PendingCallback::Auto(Box::pin(wait)),
        }
    }

    /// Completes when the user supplies the code shown by the provider.
    pub fn code<F, Fut>(url: impl Into<String>, instructions: impl Into<String>, exchange: F) -> Self
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = AuthOutcome> + Send + 'static,
    {
        Self {
            url: url.into(),
            instructions: instructions.into(),
            callback: PendingCallback::Code(Box::new(move |code| Box::pin(exchange(code)))),
        }
    }

    pub fn mode(&self) -> CallbackMode {
        match self.callback {
            PendingCallback::Auto(_) => CallbackMode::Auto,
            PendingCallback::Code(_) => CallbackMode::Code,
        }
    }
}

impl fmt::Debug for AuthorizationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationRequest")
            .field("url", &self.url)
            .field("instructions", &self.instructions)
            .field("mode", &self.mode())
            .finish()
    }
}

type ApiAuthorizer = Arc<dyn Fn(Answers) -> BoxFuture<'static, AuthOutcome> + Send + Sync>;
type OAuthAuthorizer =
    Arc<dyn Fn(Answers) -> BoxFuture<'static, anyhow::Result<AuthorizationRequest>> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Authorizer {
    Api(ApiAuthorizer),
    OAuth(OAuthAuthorizer),
}

/// One way of signing in to a provider.
#[derive(Clone)]
pub struct AuthMethod {
    pub label: String,
    pub prompts: Vec<Prompt>,
    pub(crate) authorizer: Authorizer,
}

impl AuthMethod {
    pub fn api<F, Fut>(label: impl Into<String>, prompts: Vec<Prompt>, authorize: F) -> Self
    where
        F: Fn(Answers) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AuthOutcome> + Send + 'static,
    {
        Self {
            label: label.into(),
            prompts,
            authorizer: Authorizer::Api(Arc::new(move |answers| Box::pin(authorize(answers)))),
        }
    }

    /// A method that stores the answer to its single secret prompt as the API key.
    pub fn api_key(label: impl Into<String>) -> Self {
        Self::api(
            label,
            vec![Prompt::secret("key", "API key")],
            |answers| async move {
                match answers.get("key") {
                    Some(key) if !key.trim().is_empty() => {
                        AuthOutcome::Success(Credential::api(key.trim()))
                    }
                    _ => AuthOutcome::failed("API key is empty"),
                }
            },
        )
    }

    pub fn oauth<F, Fut>(label: impl Into<String>, prompts: Vec<Prompt>, authorize: F) -> Self
    where
        F: Fn(Answers) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<AuthorizationRequest>> + Send + 'static,
    {
        Self {
            label: label.into(),
            prompts,
            authorizer: Authorizer::OAuth(Arc::new(move |answers| Box::pin(authorize(answers)))),
        }
    }

    pub fn kind(&self) -> MethodKind {
        match self.authorizer {
            Authorizer::Api(_) => MethodKind::Api,
            Authorizer::OAuth(_) => MethodKind::OAuth,
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthMethod")
            .field("label", &self.label)
            .field("kind", &self.kind())
            .field("prompts", &self.prompts.len())
            .finish()
    }
}

/// Provider options materialized from a credential (headers, api key, base URL).
pub type ProviderOptions = serde_json::Map<String, serde_json::Value>;

type Loader = Arc<dyn Fn(Credential) -> BoxFuture<'static, anyhow::Result<ProviderOptions>> + Send + Sync>;
type Refresher = Arc<dyn Fn(Credential) -> BoxFuture<'static, AuthOutcome> + Send + Sync>;

/// An auth provider contributed by a plugin.
#[derive(Clone)]
pub struct AuthSpec {
    pub provider: String,
    pub methods: Vec<AuthMethod>,
    pub(crate) loader: Option<Loader>,
    pub(crate) refresher: Option<Refresher>,
}

impl AuthSpec {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            methods: Vec::new(),
            loader: None,
            refresher: None,
        }
    }

    pub fn method(mut self, method: AuthMethod) -> Self {
        self.methods.push(method);
        self
    }

    /// Turn a stored credential into provider options at startup.
    pub fn loader<F, Fut>(mut self, load: F) -> Self
    where
        F: Fn(Credential) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ProviderOptions>> + Send + 'static,
    {
        self.loader = Some(Arc::new(move |credential| Box::pin(load(credential))));
        self
    }

    /// Exchange an expired OAuth credential for a fresh one.
    pub fn refresher<F, Fut>(mut self, refresh: F) -> Self
    where
        F: Fn(Credential) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AuthOutcome> + Send + 'static,
    {
        self.refresher = Some(Arc::new(move |credential| Box::pin(refresh(credential))));
        self
    }
}

impl fmt::Debug for AuthSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSpec")
            .field("provider", &self.provider)
            .field("methods", &self.methods)
            .field("loader", &self.loader.is_some())
            .field("refresher", &self.refresher.is_some())
            .finish()
    }
}
