//! OAuth token lifecycle for one connector at a time
//!
//! Login:
//! 1. `build_authorization_url()` issues a state token and returns the URL
//! 2. The provider redirects back with `code` and `state`
//! 3. The callback handler calls `validate_state()` then `exchange_code()`
//! 4. The token set is persisted to the active profile's `tokens.json`
//!
//! Afterwards `access_token()` hands out the stored token, refreshing it when
//! it is within a minute of expiry. Nothing is retried automatically.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AuthConfig;
use crate::constants::{EXPIRY_SKEW_MS, REQUEST_TIMEOUT, SHORT_LIFETIME_SECS};
use crate::credentials::{CredentialStore, OAuthTokenSet};
use crate::error::{Error, Result};
use crate::metadata::{self, AuthScheme, ConnectorAuthDescriptor};
use crate::profile::ensure_valid_name;
use crate::state::OAuthStates;
use crate::token::{self, TokenResponse, now_millis, record_token_request};

/// Drives the authorization-code and refresh-token grants.
#[derive(Clone)]
pub struct OAuthEngine {
    config: Arc<AuthConfig>,
    store: CredentialStore,
    states: OAuthStates,
    http: reqwest::Client,
}

impl OAuthEngine {
    /// Engine with an HTTP client using the fixed request timeout.
    pub fn new(
        config: Arc<AuthConfig>,
        store: CredentialStore,
        states: OAuthStates,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Configuration(format!("building HTTP client: {e}")))?;
        Ok(Self {
            config,
            store,
            states,
            http,
        })
    }

    pub fn states(&self) -> &OAuthStates {
        &self.states
    }

    /// Scopes requested for `connector`: configured ones win over documented.
    fn scopes_for(&self, descriptor: &ConnectorAuthDescriptor) -> Vec<String> {
        match self.config.connector(&descriptor.connector_name) {
            Some(c) if !c.scopes.is_empty() => c.scopes.clone(),
            _ => descriptor.scopes.clone(),
        }
    }

    /// Authorization URL for `connector`, or `None` if the connector is not
    /// OAuth-capable or has no client id configured.
    pub async fn build_authorization_url(
        &self,
        connector: &str,
        redirect_uri: &str,
    ) -> Option<String> {
        let descriptor = metadata::classify(&self.config.docs_dir, connector).await;
        if descriptor.auth_scheme != AuthScheme::OAuth {
            return None;
        }

        let client = self.store.load_client(connector).await?;
        let scopes = self.scopes_for(&descriptor);
        let state = self.states.issue(connector).await;

        match token::build_authorization_url(
            &self.config.provider.authorize_endpoint,
            &client.client_id,
            redirect_uri,
            &scopes,
            &state,
        ) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(connector, error = %e, "could not build authorization URL");
                None
            }
        }
    }

    /// Consume a state token returned on the callback.
    pub async fn validate_state(&self, state: &str, connector: &str) -> bool {
        self.states.validate(state, connector).await
    }

    /// Exchange an authorization code and persist the resulting tokens.
    pub async fn exchange_code(
        &self,
        connector: &str,
        code: &str,
        redirect_uri: &str,
    ) -> Result<OAuthTokenSet> {
        ensure_valid_name(connector)?;
        let client = self.store.load_client(connector).await.ok_or_else(|| {
            Error::Configuration(format!("no OAuth client id configured for {connector}"))
        })?;
        let secret = client.client_secret.as_ref().ok_or_else(|| {
            Error::Configuration(format!("no OAuth client secret configured for {connector}"))
        })?;

        let issued_at = now_millis();
        let response = token::exchange_code(
            &self.http,
            &self.config.provider.token_endpoint,
            &client.client_id,
            secret.expose(),
            code,
            redirect_uri,
        )
        .await
        .inspect_err(|_| record_token_request("authorization_code", "error"))?;
        record_token_request("authorization_code", "success");

        if response.refresh_token.is_none() {
            warn!(connector, "no refresh token issued, re-authorize with consent to obtain one");
        }

        let tokens = self.persist(connector, response, issued_at, None).await?;
        info!(connector, "authorization code exchanged");
        Ok(tokens)
    }

    /// Renew the access token with the stored refresh token.
    ///
    /// When the provider does not reissue a refresh token the stored one is
    /// kept as is.
    pub async fn refresh(&self, connector: &str) -> Result<OAuthTokenSet> {
        ensure_valid_name(connector)?;
        let prior = self.store.load_tokens(connector).await;
        let refresh = prior
            .as_ref()
            .and_then(|t| t.refresh_token.clone())
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::MissingRefreshToken(connector.to_string()))?;

        let client = self.store.load_client(connector).await.ok_or_else(|| {
            Error::Configuration(format!("no OAuth client id configured for {connector}"))
        })?;

        let issued_at = now_millis();
        let response = token::refresh_token(
            &self.http,
            &self.config.provider.token_endpoint,
            &client.client_id,
            client.client_secret.as_ref().map(|s| s.expose().as_str()),
            &refresh,
        )
        .await
        .inspect_err(|_| record_token_request("refresh_token", "error"))?;
        record_token_request("refresh_token", "success");

        let tokens = self
            .persist(connector, response, issued_at, prior.as_ref())
            .await?;
        info!(connector, "access token refreshed");
        Ok(tokens)
    }

    /// A usable access token: the stored one if it outlives the skew window,
    /// otherwise a freshly refreshed one.
    pub async fn access_token(&self, connector: &str) -> Result<String> {
        if let Some(tokens) = self.store.load_tokens(connector).await
            && tokens.is_valid_at(now_millis(), EXPIRY_SKEW_MS)
        {
            return Ok(tokens.access_token);
        }
        Ok(self.refresh(connector).await?.access_token)
    }

    /// Expiry of the stored access token in unix milliseconds.
    pub async fn token_expiry(&self, connector: &str) -> Option<u64> {
        self.store
            .load_tokens(connector)
            .await
            .and_then(|t| t.expires_at)
    }

    async fn persist(
        &self,
        connector: &str,
        response: TokenResponse,
        issued_at: u64,
        prior: Option<&OAuthTokenSet>,
    ) -> Result<OAuthTokenSet> {
        if let Some(lifetime) = response.expires_in
            && lifetime <= SHORT_LIFETIME_SECS
        {
            warn!(connector, expires_in = lifetime, "access token near expiry at issuance");
        }

        let tokens = response.into_token_set(issued_at, prior);
        self.store.save_tokens(connector, &tokens).await?;
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfilePaths;
    use std::path::Path;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const OAUTH_README: &str = concat!(
        "# Drive\n\n## Authentication\n\n",
        "OAuth 2.0 with `https://www.googleapis.com/auth/drive.readonly`.\n",
    );

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: OAuthEngine,
        store: CredentialStore,
    }

    fn write_docs(docs: &Path, connector: &str, body: &str) {
        let path = metadata::docs_path(docs, connector);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn fixture(token_endpoint: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AuthConfig::with_root(dir.path().join("root"));
        config.docs_dir = dir.path().join("docs");
        config.provider.token_endpoint = token_endpoint.to_string();
        write_docs(&config.docs_dir, "acme", OAUTH_README);

        let store = CredentialStore::new(ProfilePaths::new(&config.root_dir));
        let engine =
            OAuthEngine::new(Arc::new(config), store.clone(), OAuthStates::in_memory()).unwrap();
        Fixture {
            _dir: dir,
            engine,
            store,
        }
    }

    async fn configure_client(store: &CredentialStore) {
        store.save("acme", "clientId", "cid").await.unwrap();
        store.save("acme", "clientSecret", "csecret").await.unwrap();
    }

    #[tokio::test]
    async fn authorization_url_requires_client_id() {
        let f = fixture("http://127.0.0.1:9/token");
        assert!(f.engine.build_authorization_url("acme", "http://cb").await.is_none());
    }

    #[tokio::test]
    async fn authorization_url_requires_oauth_connector() {
        let f = fixture("http://127.0.0.1:9/token");
        f.store.save("plain", "clientId", "cid").await.unwrap();
        assert!(f.engine.build_authorization_url("plain", "http://cb").await.is_none());
    }

    #[tokio::test]
    async fn authorization_url_issues_validatable_state() {
        let f = fixture("http://127.0.0.1:9/token");
        configure_client(&f.store).await;

        let url = f
            .engine
            .build_authorization_url("acme", "http://localhost/cb")
            .await
            .unwrap();
        let parsed = url::Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert_eq!(params["client_id"], "cid");
        assert_eq!(params["scope"], "https://www.googleapis.com/auth/drive.readonly");
        let state = &params["state"];
        assert!(f.engine.validate_state(state, "acme").await);
        assert!(!f.engine.validate_state(state, "acme").await);
    }

    #[tokio::test]
    async fn exchange_without_secret_is_configuration_error() {
        let f = fixture("http://127.0.0.1:9/token");
        f.store.save("acme", "clientId", "cid").await.unwrap();

        let err = f
            .engine
            .exchange_code("acme", "code", "http://cb")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn exchange_persists_tokens_with_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at_1",
                "refresh_token": "rt_1",
                "expires_in": 3600,
                "token_type": "Bearer",
                "scope": "https://www.googleapis.com/auth/drive.readonly"
            })))
            .mount(&server)
            .await;

        let f = fixture(&format!("{}/token", server.uri()));
        configure_client(&f.store).await;

        let before = now_millis();
        let tokens = f
            .engine
            .exchange_code("acme", "code", "http://localhost/cb")
            .await
            .unwrap();
        let after = now_millis();

        let expires = tokens.expires_at.unwrap();
        assert!(expires >= before + 3_600_000 && expires <= after + 3_600_000);
        assert_eq!(f.store.load_tokens("acme").await, Some(tokens));
    }

    #[tokio::test]
    async fn exchange_failure_leaves_nothing_stored() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Malformed auth code."
            })))
            .mount(&server)
            .await;

        let f = fixture(&format!("{}/token", server.uri()));
        configure_client(&f.store).await;

        let err = f
            .engine
            .exchange_code("acme", "bad", "http://cb")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Malformed auth code."), "got: {err}");
        assert!(f.store.load_tokens("acme").await.is_none());
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_fails() {
        let f = fixture("http://127.0.0.1:9/token");
        configure_client(&f.store).await;
        f.store
            .save_tokens(
                "acme",
                &OAuthTokenSet {
                    access_token: "a".into(),
                    refresh_token: None,
                    expires_at: Some(1),
                    token_type: None,
                    scope: None,
                },
            )
            .await
            .unwrap();

        let err = f.engine.refresh("acme").await.unwrap_err();
        assert!(matches!(err, Error::MissingRefreshToken(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn refresh_keeps_refresh_token_and_scope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "b",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let f = fixture(&format!("{}/token", server.uri()));
        configure_client(&f.store).await;
        let now = now_millis();
        f.store
            .save_tokens(
                "acme",
                &OAuthTokenSet {
                    access_token: "a".into(),
                    refresh_token: Some("r".into()),
                    expires_at: Some(now - 1000),
                    token_type: None,
                    scope: Some("drive".into()),
                },
            )
            .await
            .unwrap();

        let tokens = f.engine.refresh("acme").await.unwrap();
        let after = now_millis();

        let stored = f.store.load_tokens("acme").await.unwrap();
        assert_eq!(stored, tokens);
        assert_eq!(stored.access_token, "b");
        assert_eq!(stored.refresh_token.as_deref(), Some("r"));
        assert_eq!(stored.scope.as_deref(), Some("drive"));
        let expires = stored.expires_at.unwrap();
        assert!(expires >= now + 3_600_000 && expires <= after + 3_600_000);
    }

    #[tokio::test]
    async fn access_token_skips_refresh_when_valid() {
        let f = fixture("http://127.0.0.1:9/token");
        f.store
            .save_tokens(
                "acme",
                &OAuthTokenSet {
                    access_token: "still-good".into(),
                    refresh_token: Some("r".into()),
                    expires_at: Some(now_millis() + 3_600_000),
                    token_type: None,
                    scope: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(f.engine.access_token("acme").await.unwrap(), "still-good");
    }

    #[tokio::test]
    async fn access_token_refreshes_inside_skew_window() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let f = fixture(&format!("{}/token", server.uri()));
        configure_client(&f.store).await;
        f.store
            .save_tokens(
                "acme",
                &OAuthTokenSet {
                    access_token: "stale".into(),
                    refresh_token: Some("r".into()),
                    expires_at: Some(now_millis() + 30_000),
                    token_type: None,
                    scope: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(f.engine.access_token("acme").await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn access_token_without_tokens_is_missing_refresh_token() {
        let f = fixture("http://127.0.0.1:9/token");
        let err = f.engine.access_token("acme").await.unwrap_err();
        assert!(matches!(err, Error::MissingRefreshToken(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn unreachable_provider_is_transport_error() {
        let f = fixture("http://127.0.0.1:9/token");
        configure_client(&f.store).await;

        let err = f
            .engine
            .exchange_code("acme", "code", "http://cb")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn traversal_names_never_reach_the_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let f = fixture(&format!("{}/token", server.uri()));
        configure_client(&f.store).await;

        for name in ["../acme", "..", "a/b"] {
            let err = f
                .engine
                .exchange_code(name, "code", "http://cb")
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "got: {err:?}");

            let err = f.engine.refresh(name).await.unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "got: {err:?}");
        }
    }
}
