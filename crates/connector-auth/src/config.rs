//! Auth configuration types and loading
//!
//! Precedence: env vars > config file > defaults. Every field has a default so
//! a missing `[auth]` table (or no file at all) yields a usable config rooted
//! at `~/.connect`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::constants::{AUTHORIZE_ENDPOINT, ROOT_DIR_NAME, TOKEN_ENDPOINT};

/// Overrides `root_dir`.
pub const ROOT_DIR_ENV: &str = "CONNECT_HOME";

/// Overrides `docs_dir`.
pub const DOCS_DIR_ENV: &str = "CONNECT_DOCS_DIR";

/// Root auth configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared root holding one directory per connector
    pub root_dir: PathBuf,
    /// Directory holding `<connector>/README.md` documentation
    pub docs_dir: PathBuf,
    pub provider: ProviderConfig,
    /// Per-connector overrides, keyed by connector name
    pub connectors: HashMap<String, ConnectorConfig>,
}

/// OAuth provider endpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub authorize_endpoint: String,
    pub token_endpoint: String,
}

/// Explicit per-connector mapping, consulted before any heuristic.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Canonical field name API keys are stored under
    pub api_key_field: Option<String>,
    /// OAuth scopes requested; empty means "use the documented scopes"
    pub scopes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            docs_dir: PathBuf::from("connectors"),
            provider: ProviderConfig::default(),
            connectors: HashMap::new(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            authorize_endpoint: AUTHORIZE_ENDPOINT.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
        }
    }
}

fn default_root_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(ROOT_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(ROOT_DIR_NAME))
}

impl AuthConfig {
    /// Config rooted at `root_dir`, everything else defaulted. Env vars are
    /// not consulted.
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: AuthConfig = toml::from_str(&contents)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with environment variables, for callers without a file.
    pub fn from_env() -> common::Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply `CONNECT_HOME` / `CONNECT_DOCS_DIR` over whatever was loaded.
    pub fn apply_env(&mut self) {
        if let Some(root) = non_empty_env(ROOT_DIR_ENV) {
            self.root_dir = PathBuf::from(root);
        }
        if let Some(docs) = non_empty_env(DOCS_DIR_ENV) {
            self.docs_dir = PathBuf::from(docs);
        }
    }

    pub fn validate(&self) -> common::Result<()> {
        for (name, endpoint) in [
            ("authorize_endpoint", &self.provider.authorize_endpoint),
            ("token_endpoint", &self.provider.token_endpoint),
        ] {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {endpoint}"
                )));
            }
        }

        if self.root_dir.as_os_str().is_empty() {
            return Err(common::Error::Config("root_dir must not be empty".into()));
        }

        Ok(())
    }

    /// Per-connector overrides, if any were configured.
    pub fn connector(&self, name: &str) -> Option<&ConnectorConfig> {
        self.connectors.get(name)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
