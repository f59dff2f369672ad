//! OAuth 2.0 helpers for auth providers: PKCE, code exchange and refresh,
//! and a local callback receiver.

mod callback;
mod flow;
mod pkce;

use std::time::Duration;

use url::Url;

pub use callback::CallbackServer;
pub use flow::{AuthorizationStart, OAuthConfig, OAuthFlow};
pub use pkce::{PkceChallenge, generate_pkce, generate_state};

use crate::provider::{AuthMethod, AuthOutcome, AuthSpec, AuthorizationRequest, CallbackMode};

/// How long an `Auto` authorization waits for the browser redirect.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Port of a loopback `redirect_uri`, if it has one.
pub fn redirect_port(config: &OAuthConfig) -> Option<u16> {
    let url = Url::parse(&config.redirect_uri).ok()?;
    match url.host_str()? {
        "127.0.0.1" | "localhost" => url.port_or_known_default(),
        _ => None,
    }
}

async fn exchange_outcome(flow: &OAuthFlow, code: &str, verifier: &str) -> AuthOutcome {
    match flow.exchange(code, verifier).await {
        Ok(credential) => AuthOutcome::Success(credential),
        Err(e) => AuthOutcome::failed(format!("code exchange failed: {e:#}")),
    }
}

/// Split a pasted `code#state` value. A bare code is accepted as is.
fn split_pasted_code(pasted: &str, expected_state: &str) -> Result<String, String> {
    match pasted.split_once('#') {
        Some((code, state)) if state == expected_state => Ok(code.to_string()),
        Some(_) => Err("state mismatch".to_string()),
        None => Ok(pasted.to_string()),
    }
}

async fn start_authorization(flow: OAuthFlow, mode: CallbackMode) -> anyhow::Result<AuthorizationRequest> {
    let start = flow.start()?;
    let verifier = start.pkce.verifier.clone();
    let state = start.state.clone();
    match mode {
        CallbackMode::Auto => {
            let port = redirect_port(flow.config()).ok_or_else(|| {
                anyhow::anyhow!(
                    "redirect_uri '{}' is not a loopback address",
                    flow.config().redirect_uri
                )
            })?;
            let server = CallbackServer::bind(port).await?;
            Ok(AuthorizationRequest::auto(
                start.url,
                "Complete the sign-in in your browser.",
                async move {
                    match server.wait_for_code(state, CALLBACK_TIMEOUT).await {
                        Ok(code) => exchange_outcome(&flow, &code, &verifier).await,
                        Err(e) => AuthOutcome::failed(format!("{e:#}")),
                    }
                },
            ))
        }
        CallbackMode::Code => Ok(AuthorizationRequest::code(
            start.url,
            "Open the URL, sign in, then paste the authorization code.",
            move |pasted| async move {
                match split_pasted_code(&pasted, &state) {
                    Ok(code) => exchange_outcome(&flow, &code, &verifier).await,
                    Err(reason) => AuthOutcome::failed(reason),
                }
            },
        )),
    }
}

/// An auth method running the PKCE authorization code flow.
pub fn oauth_method(label: impl Into<String>, config: OAuthConfig, mode: CallbackMode) -> AuthMethod {
    AuthMethod::oauth(label, Vec::new(), move |_answers| {
        start_authorization(OAuthFlow::new(config.clone()), mode)
    })
}

/// A provider with a single OAuth method and token refresh wired to `config`.
pub fn oauth_spec(
    provider: impl Into<String>,
    label: impl Into<String>,
    config: OAuthConfig,
    mode: CallbackMode,
) -> AuthSpec {
    let flow = OAuthFlow::new(config.clone());
    AuthSpec::new(provider)
        .method(oauth_method(label, config, mode))
        .refresher(move |credential| {
            let flow = flow.clone();
            async move {
                let Some(refresh) = credential.refresh_token() else {
                    return AuthOutcome::failed("no refresh token stored");
                };
                match flow.refresh(refresh).await {
                    Ok(fresh) => AuthOutcome::Success(fresh),
                    Err(e) => AuthOutcome::failed(format!("token refresh failed: {e:#}")),
                }
            }
        })
}
