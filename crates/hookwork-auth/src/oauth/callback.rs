use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use axum::{Router, extract::Query, http::StatusCode, response::Html, routing::get};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::debug;

/// One-shot local receiver for the OAuth redirect.
///
/// Binding happens up front so the browser redirect cannot race the
/// listener; [`CallbackServer::wait_for_code`] then serves until the
/// matching callback arrives.
pub struct CallbackServer {
    listener: TcpListener,
}

impl CallbackServer {
    /// Bind `127.0.0.1:{port}`. Port `0` picks a free port.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve `GET /auth/callback?code=..&state=..` until a request carrying
    /// `expected_state` arrives. Requests with any other state are refused
    /// and the wait goes on.
    pub async fn wait_for_code(self, expected_state: String, timeout: Duration) -> Result<String> {
        let (tx, rx) = oneshot::channel::<Result<String>>();
        let tx = Arc::new(Mutex::new(Some(tx)));

        let app = Router::new().route(
            "/auth/callback",
            get(move |Query(params): Query<HashMap<String, String>>| {
                let verdict = check_params(&params, &expected_state);
                let (status, page) = match &verdict {
                    None => (StatusCode::BAD_REQUEST, FAILURE_PAGE),
                    Some(Ok(_)) => (StatusCode::OK, SUCCESS_PAGE),
                    Some(Err(_)) => (StatusCode::OK, FAILURE_PAGE),
                };
                match verdict {
                    Some(result) => {
                        if let Some(tx) = tx.lock().unwrap_or_else(|e| e.into_inner()).take() {
                            let _ = tx.send(result);
                        }
                    }
                    None => debug!("Ignoring OAuth callback with a foreign state"),
                }
                async move { (status, Html(page)) }
            }),
        );

        debug!(addr = ?self.listener.local_addr().ok(), "Waiting for OAuth callback");
        let server = axum::serve(self.listener, app);

        tokio::select! {
            result = rx => result?,
            _ = server.into_future() => bail!("callback server exited unexpectedly"),
            _ = tokio::time::sleep(timeout) => {
                bail!("OAuth callback timed out after {}s", timeout.as_secs())
            }
        }
    }
}

const SUCCESS_PAGE: &str = "<h1>Authentication successful</h1><p>You can close this window.</p>";
const FAILURE_PAGE: &str =
    "<h1>Authentication failed</h1><p>Return to the terminal for details.</p>";

/// `None` when the request does not carry the expected state; it is
/// answered but does not end the wait.
fn check_params(params: &HashMap<String, String>, expected_state: &str) -> Option<Result<String>> {
    if params.get("state").map(String::as_str) != Some(expected_state) {
        return None;
    }
    if let Some(error) = params.get("error") {
        return Some(Err(anyhow!("provider returned error: {error}")));
    }
    Some(
        params
            .get("code")
            .cloned()
            .ok_or_else(|| anyhow!("missing code")),
    )
}
