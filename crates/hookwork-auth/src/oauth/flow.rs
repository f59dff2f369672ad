use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::pkce::{PkceChallenge, generate_pkce, generate_state};
use crate::credential::Credential;

/// OAuth 2.0 client configuration for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Extra query parameters for the authorization URL.
    #[serde(default)]
    pub extra_auth_params: Vec<(String, String)>,
}

/// A started authorization: the URL to open plus the values needed to finish.
#[derive(Debug, Clone)]
pub struct AuthorizationStart {
    pub url: String,
    pub pkce: PkceChallenge,
    pub state: String,
}

/// Authorization code flow with PKCE.
#[derive(Debug, Clone)]
pub struct OAuthFlow {
    config: OAuthConfig,
    client: reqwest::Client,
}

impl OAuthFlow {
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the authorization URL with a fresh PKCE pair and state.
    pub fn start(&self) -> Result<AuthorizationStart> {
        let pkce = generate_pkce();
        let state = generate_state();

        let mut url = Url::parse(&self.config.auth_url)
            .with_context(|| format!("invalid auth_url '{}'", self.config.auth_url))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("code_challenge", &pkce.challenge)
                .append_pair("code_challenge_method", "S256")
                .append_pair("state", &state);
            if !self.config.scopes.is_empty() {
                query.append_pair("scope", &self.config.scopes.join(" "));
            }
            for (key, value) in &self.config.extra_auth_params {
                query.append_pair(key, value);
            }
        }

        Ok(AuthorizationStart {
            url: url.to_string(),
            pkce,
            state,
        })
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange(&self, code: &str, verifier: &str) -> Result<Credential> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", verifier),
        ];
        let resp = self.post_token(&form).await?;
        debug!(token_url = %self.config.token_url, "Authorization code exchanged");
        parse_token_response(&resp, None)
    }

    /// Refresh an access token. A response without a new refresh token
    /// keeps the old one.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Credential> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        let resp = self.post_token(&form).await?;
        debug!(token_url = %self.config.token_url, "Access token refreshed");
        parse_token_response(&resp, Some(refresh_token))
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> Result<serde_json::Value> {
        let resp = self
            .client
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;
        Ok(resp)
    }
}

fn parse_token_response(resp: &serde_json::Value, previous_refresh: Option<&str>) -> Result<Credential> {
    let access = resp["access_token"]
        .as_str()
        .ok_or_else(|| anyhow!("missing access_token in response"))?;
    let refresh = resp["refresh_token"]
        .as_str()
        .or(previous_refresh)
        .map(str::to_string);
    let expires_at = resp["expires_in"]
        .as_i64()
        .map(|secs| chrono::Utc::now().timestamp() + secs);
    Ok(Credential::oauth(access, refresh, expires_at))
}
