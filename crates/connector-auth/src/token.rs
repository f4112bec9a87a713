//! OAuth token endpoint interactions
//!
//! Handles the two token endpoint requests:
//! 1. Authorization code exchange (login completion)
//! 2. Token refresh
//!
//! Both POST form-encoded bodies to the provider's token endpoint with
//! different grant types. Persistence and expiry bookkeeping live in
//! `oauth::OAuthEngine`; this module only speaks the wire protocol.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::credentials::OAuthTokenSet;
use crate::error::{Error, Result};

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time. A refresh
/// response may omit `refresh_token`, `scope` and `token_type`.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Build the token set to persist, issued at `issued_at_ms`.
    ///
    /// Fields the response omits are carried over from `prior`, except the
    /// access token and expiry which always come from the response.
    pub fn into_token_set(
        self,
        issued_at_ms: u64,
        prior: Option<&OAuthTokenSet>,
    ) -> OAuthTokenSet {
        let expires_at = self
            .expires_in
            .map(|secs| issued_at_ms.saturating_add(secs.saturating_mul(1000)));

        OAuthTokenSet {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .filter(|r| !r.is_empty())
                .or_else(|| prior.and_then(|p| p.refresh_token.clone())),
            expires_at,
            token_type: self
                .token_type
                .or_else(|| prior.and_then(|p| p.token_type.clone())),
            scope: self.scope.or_else(|| prior.and_then(|p| p.scope.clone())),
        }
    }
}

/// Error body returned by OAuth2 token endpoints (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

/// Exchange an authorization code for tokens.
pub async fn exchange_code(
    client: &reqwest::Client,
    token_endpoint: &str,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenResponse> {
    post_token_request(
        client,
        token_endpoint,
        &[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ],
    )
    .await
}

/// Obtain a new access token with a refresh token.
pub async fn refresh_token(
    client: &reqwest::Client,
    token_endpoint: &str,
    client_id: &str,
    client_secret: Option<&str>,
    refresh: &str,
) -> Result<TokenResponse> {
    let mut form = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh),
        ("client_id", client_id),
    ];
    if let Some(secret) = client_secret {
        form.push(("client_secret", secret));
    }
    post_token_request(client, token_endpoint, &form).await
}

async fn post_token_request(
    client: &reqwest::Client,
    token_endpoint: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse> {
    let response = client
        .post(token_endpoint)
        .form(form)
        .send()
        .await
        .map_err(transport_error)?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::Provider {
            status: status.as_u16(),
            description: provider_description(&body),
        });
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::Provider {
            status: status.as_u16(),
            description: format!("invalid token response: {e}"),
        })
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Transport(format!("token request timed out: {e}"))
    } else {
        Error::Transport(format!("token request failed: {e}"))
    }
}

/// Most specific description in a provider error body: `error_description`,
/// then `error`, then the raw body.
fn provider_description(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(description) = parsed.error_description.filter(|d| !d.is_empty()) {
            return description;
        }
        if let Some(error) = parsed.error.filter(|e| !e.is_empty()) {
            return error;
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "<no body>".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Build the authorization URL the user opens in a browser.
///
/// Requests offline access and forces the consent screen so the provider
/// issues a refresh token on every login.
pub fn build_authorization_url(
    authorize_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
) -> Result<String> {
    let scope = scopes.join(" ");
    let url = Url::parse_with_params(
        authorize_endpoint,
        &[
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", state),
        ],
    )
    .map_err(|e| Error::Configuration(format!("invalid authorize endpoint: {e}")))?;
    Ok(url.into())
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Count a token endpoint request by grant type and outcome.
pub(crate) fn record_token_request(grant: &'static str, outcome: &'static str) {
    metrics::counter!(
        "connector_auth_token_requests_total",
        "grant" => grant,
        "outcome" => outcome
    )
    .increment(1);
}
