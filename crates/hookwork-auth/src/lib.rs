//! Auth providers for hookwork.
//!
//! Plugins declare providers with an [`AuthSpec`]: one or more sign-in
//! methods (API key or OAuth), the prompts each method asks, and an
//! optional loader that turns a stored credential into provider options.
//! The [`AuthRegistry`] drives the per-provider state machine and
//! persists credentials through a [`CredentialStore`].

pub mod credential;
pub mod oauth;
pub mod prompt;
pub mod provider;
pub mod registry;

pub use credential::{Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use prompt::{Answers, Condition, Prompt, PromptInput, PromptPlan, SelectOption};
pub use provider::{
    AuthMethod, AuthOutcome, AuthSpec, AuthorizationRequest, CallbackMode, MethodKind,
    ProviderOptions,
};
pub use registry::{AuthError, AuthRegistry, AuthState, AuthStep, ProviderStatus};
