//! `ConnectorAuth`: the single surface collaborators talk to
//!
//! Composes docs classification, the credential store and the OAuth engine.
//! Status queries read everything fresh from disk and the environment, so
//! repeated calls without writes return identical results.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::config::AuthConfig;
use crate::constants::DEFAULT_API_KEY_FIELD;
use crate::credentials::{CredentialStore, OAuthTokenSet, PlainCredential};
use crate::error::{Error, Result};
use crate::metadata::{self, AuthScheme, ConnectorAuthDescriptor, EnvVarSpec, env_prefix};
use crate::oauth::OAuthEngine;
use crate::profile::ProfilePaths;
use crate::state::{OAuthStates, StateStore};

/// Env var suffixes that name a secret worth storing as the API key.
const KEY_SUFFIXES: [&str; 4] = ["_API_KEY", "_API_SECRET", "_TOKEN", "_SECRET"];

/// A declared env var and whether it is currently set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarStatus {
    pub name: String,
    pub description: String,
    pub is_set: bool,
}

/// Auth state of one connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub scheme: AuthScheme,
    pub configured: bool,
    /// OAuth only: access token expiry in unix milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expiry: Option<u64>,
    /// OAuth only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_refresh_token: Option<bool>,
    pub env_vars: Vec<EnvVarStatus>,
}

#[derive(Clone)]
pub struct ConnectorAuth {
    config: Arc<AuthConfig>,
    store: CredentialStore,
    engine: OAuthEngine,
}

impl ConnectorAuth {
    /// Facade with a process-local state store.
    pub fn new(config: AuthConfig) -> Result<Self> {
        Self::from_parts(config, OAuthStates::in_memory())
    }

    /// Facade using a caller-supplied state store, e.g. one shared between
    /// instances.
    pub fn with_state_store(config: AuthConfig, states: Arc<dyn StateStore>) -> Result<Self> {
        Self::from_parts(config, OAuthStates::new(states))
    }

    fn from_parts(config: AuthConfig, states: OAuthStates) -> Result<Self> {
        let config = Arc::new(config);
        let store = CredentialStore::new(ProfilePaths::new(&config.root_dir));
        let engine = OAuthEngine::new(config.clone(), store.clone(), states)?;
        Ok(Self {
            config,
            store,
            engine,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn engine(&self) -> &OAuthEngine {
        &self.engine
    }

    pub async fn classify(&self, connector: &str) -> ConnectorAuthDescriptor {
        metadata::classify(&self.config.docs_dir, connector).await
    }

    /// Declared env vars with their current presence.
    pub async fn get_env_vars(&self, connector: &str) -> Vec<EnvVarStatus> {
        env_statuses(&self.classify(connector).await.env_vars)
    }

    pub async fn get_status(&self, connector: &str) -> AuthStatus {
        let descriptor = self.classify(connector).await;
        let env_vars = env_statuses(&descriptor.env_vars);

        if descriptor.auth_scheme == AuthScheme::OAuth {
            let tokens = self.store.load_tokens(connector).await;
            let configured = tokens
                .as_ref()
                .is_some_and(|t| t.has_access_token() || t.has_refresh_token());
            return AuthStatus {
                scheme: descriptor.auth_scheme,
                configured,
                token_expiry: tokens.as_ref().and_then(|t| t.expires_at),
                has_refresh_token: Some(
                    tokens.as_ref().is_some_and(OAuthTokenSet::has_refresh_token),
                ),
                env_vars,
            };
        }

        let configured =
            self.store.load(connector).await.has_value() || env_vars.iter().any(|v| v.is_set);
        AuthStatus {
            scheme: descriptor.auth_scheme,
            configured,
            token_expiry: None,
            has_refresh_token: None,
            env_vars,
        }
    }

    /// Stored fields overlaid with every declared env var that is set.
    pub async fn effective_credential(&self, connector: &str) -> PlainCredential {
        let descriptor = self.classify(connector).await;
        let mut credential = self.store.load(connector).await;
        for var in &descriptor.env_vars {
            if let Some(value) = env_value(&var.name) {
                credential.insert(field_for_env(connector, &var.name), value);
            }
        }
        credential
    }

    /// Store an API key, returning the field name it was stored under.
    ///
    /// Field resolution: `field` argument, the connector's configured
    /// `api_key_field`, the first declared key-like env var, then `apiKey`.
    pub async fn save_api_key(
        &self,
        connector: &str,
        raw_value: &str,
        field: Option<&str>,
    ) -> Result<String> {
        let value = raw_value.trim();
        if value.is_empty() {
            return Err(Error::InvalidInput("API key value is empty".into()));
        }

        let field = match field.map(str::trim).filter(|f| !f.is_empty()) {
            Some(explicit) => explicit.to_string(),
            None => self.resolve_field(connector).await,
        };

        self.store.save(connector, &field, value).await?;
        info!(connector, field = %field, "API key saved");
        Ok(field)
    }

    async fn resolve_field(&self, connector: &str) -> String {
        if let Some(mapped) = self
            .config
            .connector(connector)
            .and_then(|c| c.api_key_field.as_deref())
            .filter(|f| !f.is_empty())
        {
            return mapped.to_string();
        }

        let descriptor = self.classify(connector).await;
        infer_field_name(connector, &descriptor.env_vars)
            .unwrap_or_else(|| DEFAULT_API_KEY_FIELD.to_string())
    }

    pub async fn build_authorization_url(
        &self,
        connector: &str,
        redirect_uri: &str,
    ) -> Option<String> {
        self.engine.build_authorization_url(connector, redirect_uri).await
    }

    pub async fn validate_state(&self, state: &str, connector: &str) -> bool {
        self.engine.validate_state(state, connector).await
    }

    pub async fn exchange_code(
        &self,
        connector: &str,
        code: &str,
        redirect_uri: &str,
    ) -> Result<OAuthTokenSet> {
        self.engine.exchange_code(connector, code, redirect_uri).await
    }

    pub async fn refresh(&self, connector: &str) -> Result<OAuthTokenSet> {
        self.engine.refresh(connector).await
    }

    pub async fn access_token(&self, connector: &str) -> Result<String> {
        self.engine.access_token(connector).await
    }

    pub async fn get_token_expiry(&self, connector: &str) -> Option<u64> {
        self.engine.token_expiry(connector).await
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_statuses(vars: &[EnvVarSpec]) -> Vec<EnvVarStatus> {
    vars.iter()
        .map(|v| EnvVarStatus {
            name: v.name.clone(),
            description: v.description.clone(),
            is_set: env_value(&v.name).is_some(),
        })
        .collect()
}

/// Field name for the first env var that looks like a key or secret.
fn infer_field_name(connector: &str, vars: &[EnvVarSpec]) -> Option<String> {
    vars.iter()
        .find(|v| KEY_SUFFIXES.iter().any(|suffix| v.name.ends_with(suffix)))
        .map(|v| field_for_env(connector, &v.name))
}

/// `ACME_API_KEY` for connector `acme` → `apiKey`.
fn field_for_env(connector: &str, env_name: &str) -> String {
    let prefix = format!("{}_", env_prefix(connector));
    let remainder = env_name
        .strip_prefix(&prefix)
        .filter(|r| !r.is_empty())
        .unwrap_or(env_name);
    camel_case(remainder)
}

fn camel_case(upper_snake: &str) -> String {
    let mut out = String::with_capacity(upper_snake.len());
    for (i, word) in upper_snake.split('_').filter(|w| !w.is_empty()).enumerate() {
        let lower = word.to_ascii_lowercase();
        if i == 0 {
            out.push_str(&lower);
            continue;
        }
        let mut chars = lower.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectorConfig;
    use crate::lock_env;
    use crate::state::MemoryStateStore;

    const KEY_README: &str = concat!(
        "# Acme\n\n## Authentication\n\nSend your API key in a header.\n\n",
        "| Variable | Description |\n|---|---|\n",
        "| `ACME_BASE_URL` | API base |\n| `ACME_API_KEY` | API key |\n",
    );
    const SECRET_README: &str = concat!(
        "# SecretCo\n\n## Authentication\n\nSign requests with your API secret.\n\n",
        "| Variable | Description |\n|---|---|\n",
        "| `SECRETCO_BASE_URL` | API base |\n| `SECRETCO_API_SECRET` | API secret |\n",
    );
    const OAUTH_README: &str = concat!(
        "# Drive\n\n## Authentication\n\nUses OAuth 2.0.\n\n",
        "| Variable | Description |\n|---|---|\n| `DRIVEX_CLIENT_ID` | client id |\n",
    );

    struct Fixture {
        _dir: tempfile::TempDir,
        auth: ConnectorAuth,
    }

    fn fixture_with(configure: impl FnOnce(&mut AuthConfig)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AuthConfig::with_root(dir.path().join("root"));
        config.docs_dir = dir.path().join("docs");
        let docs = [
            ("acme", KEY_README),
            ("secretco", SECRET_README),
            ("drivex", OAUTH_README),
        ];
        for (connector, body) in docs {
            let path = metadata::docs_path(&config.docs_dir, connector);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, body).unwrap();
        }
        configure(&mut config);
        Fixture {
            _dir: dir,
            auth: ConnectorAuth::new(config).unwrap(),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|_| {})
    }

    #[tokio::test]
    async fn undocumented_connector_is_apikey_without_env_vars() {
        let f = fixture();
        let d = f.auth.classify("nodocs").await;
        assert_eq!(d.auth_scheme, AuthScheme::ApiKey);
        assert!(d.env_vars.is_empty());
    }

    #[tokio::test]
    async fn nothing_stored_is_unconfigured() {
        let _lock = lock_env();
        let f = fixture();
        let status = f.auth.get_status("acme").await;

        assert_eq!(status.scheme, AuthScheme::ApiKey);
        assert!(!status.configured);
        assert_eq!(status.token_expiry, None);
        assert_eq!(status.has_refresh_token, None);
        assert_eq!(status.env_vars.len(), 2);
    }

    #[tokio::test]
    async fn env_var_configures_apikey_connector() {
        let _lock = lock_env();
        let f = fixture();

        unsafe { std::env::set_var("ACME_API_KEY", "xyz") };
        let status = f.auth.get_status("acme").await;
        unsafe { std::env::remove_var("ACME_API_KEY") };

        assert!(status.configured);
        let key = status
            .env_vars
            .iter()
            .find(|v| v.name == "ACME_API_KEY")
            .unwrap();
        assert!(key.is_set);
        let base = status
            .env_vars
            .iter()
            .find(|v| v.name == "ACME_BASE_URL")
            .unwrap();
        assert!(!base.is_set);
    }

    #[tokio::test]
    async fn stored_key_configures_apikey_connector() {
        let _lock = lock_env();
        let f = fixture();
        f.auth.save_api_key("acme", "k1", None).await.unwrap();

        assert!(f.auth.get_status("acme").await.configured);
    }

    #[tokio::test]
    async fn status_is_stable_without_writes() {
        let _lock = lock_env();
        let f = fixture();
        f.auth.save_api_key("acme", "k1", None).await.unwrap();

        let first = f.auth.get_status("acme").await;
        let second = f.auth.get_status("acme").await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn oauth_status_reflects_tokens() {
        let f = fixture();
        let before = f.auth.get_status("drivex").await;
        assert_eq!(before.scheme, AuthScheme::OAuth);
        assert!(!before.configured);
        assert_eq!(before.has_refresh_token, Some(false));

        f.auth
            .store()
            .save_tokens(
                "drivex",
                &OAuthTokenSet {
                    access_token: String::new(),
                    refresh_token: Some("r".into()),
                    expires_at: Some(42),
                    token_type: None,
                    scope: None,
                },
            )
            .await
            .unwrap();

        let after = f.auth.get_status("drivex").await;
        assert!(after.configured, "a refresh token alone counts as configured");
        assert_eq!(after.token_expiry, Some(42));
        assert_eq!(after.has_refresh_token, Some(true));
        assert_eq!(f.auth.get_token_expiry("drivex").await, Some(42));
    }

    #[tokio::test]
    async fn status_serializes_camel_case() {
        let f = fixture();
        let json = serde_json::to_value(f.auth.get_status("drivex").await).unwrap();
        assert_eq!(json["scheme"], "oauth");
        assert_eq!(json["hasRefreshToken"], false);
        assert!(json.get("tokenExpiry").is_none());
        assert_eq!(json["envVars"][0]["isSet"], false);
    }

    #[tokio::test]
    async fn empty_api_key_is_rejected() {
        let f = fixture();
        let err = f.auth.save_api_key("acme", "   ", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)), "got: {err:?}");
        assert!(f.auth.store().load("acme").await.is_empty());
    }

    #[tokio::test]
    async fn api_key_field_from_declared_env_var() {
        let f = fixture();
        let field = f.auth.save_api_key("secretco", "  s1 \n", None).await.unwrap();

        assert_eq!(field, "apiSecret");
        let stored = f.auth.store().load("secretco").await;
        assert_eq!(stored.get("apiSecret"), Some("s1"));
        assert_eq!(stored.get(DEFAULT_API_KEY_FIELD), None);
    }

    #[tokio::test]
    async fn traversal_names_are_rejected() {
        let f = fixture();
        for name in ["../acme", "..", "a/b"] {
            let err = f.auth.save_api_key(name, "k", None).await.unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "got: {err:?}");

            let status = f.auth.get_status(name).await;
            assert_eq!(status.scheme, AuthScheme::ApiKey);
            assert!(!status.configured);
            assert!(status.env_vars.is_empty());
        }
    }

    #[tokio::test]
    async fn api_key_field_explicit_wins() {
        let f = fixture();
        let field = f.auth.save_api_key("acme", "k", Some("token")).await.unwrap();
        assert_eq!(field, "token");
    }

    #[tokio::test]
    async fn api_key_field_from_config_mapping() {
        let f = fixture_with(|config| {
            config.connectors.insert(
                "acme".into(),
                ConnectorConfig {
                    api_key_field: Some("secretKey".into()),
                    scopes: Vec::new(),
                },
            );
        });
        let field = f.auth.save_api_key("acme", "k", None).await.unwrap();
        assert_eq!(field, "secretKey");
    }

    #[tokio::test]
    async fn api_key_field_defaults_without_docs() {
        let f = fixture();
        let field = f.auth.save_api_key("nodocs", "k", None).await.unwrap();
        assert_eq!(field, DEFAULT_API_KEY_FIELD);
    }

    #[tokio::test]
    async fn env_overrides_stored_field() {
        let _lock = lock_env();
        let f = fixture();
        f.auth.save_api_key("acme", "stored", None).await.unwrap();

        unsafe { std::env::set_var("ACME_API_KEY", "from-env") };
        let credential = f.auth.effective_credential("acme").await;
        unsafe { std::env::remove_var("ACME_API_KEY") };

        assert_eq!(credential.get("apiKey"), Some("from-env"));
        assert_eq!(f.auth.effective_credential("acme").await.get("apiKey"), Some("stored"));
    }

    #[tokio::test]
    async fn injected_state_store_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AuthConfig::with_root(dir.path().join("root"));
        config.docs_dir = dir.path().join("docs");
        let store = Arc::new(MemoryStateStore::new());
        let auth = ConnectorAuth::with_state_store(config, store.clone()).unwrap();

        let token = auth.engine().states().issue("drivex").await;
        assert_eq!(store.len().await, 1);
        assert!(auth.validate_state(&token, "drivex").await);
        assert!(store.is_empty().await);
    }

    #[test]
    fn field_inference() {
        let vars = |names: &[&str]| -> Vec<EnvVarSpec> {
            names
                .iter()
                .map(|n| EnvVarSpec {
                    name: n.to_string(),
                    description: String::new(),
                })
                .collect()
        };

        assert_eq!(
            infer_field_name("acme", &vars(&["ACME_URL", "ACME_API_SECRET"])).as_deref(),
            Some("apiSecret")
        );
        assert_eq!(
            infer_field_name("google-drive", &vars(&["GOOGLE_DRIVE_TOKEN"])).as_deref(),
            Some("token")
        );
        assert_eq!(
            infer_field_name("gh", &vars(&["GITHUB_TOKEN"])).as_deref(),
            Some("githubToken")
        );
        assert_eq!(infer_field_name("acme", &vars(&["ACME_URL"])), None);
    }

    #[test]
    fn camel_case_conversion() {
        assert_eq!(camel_case("API_KEY"), "apiKey");
        assert_eq!(camel_case("CLIENT_SECRET"), "clientSecret");
        assert_eq!(camel_case("TOKEN"), "token");
        assert_eq!(camel_case("A__B"), "aB");
    }
}
