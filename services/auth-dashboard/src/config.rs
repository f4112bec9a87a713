//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The `[auth]` table is the library's `AuthConfig`; `CONNECT_HOME` and
//! `CONNECT_DOCS_DIR` are applied on top of it after parsing.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use connector_auth::AuthConfig;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Externally reachable base URL, used to build OAuth redirect URIs
    pub public_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    1000
}

impl ServerConfig {
    /// Callback URL registered with the provider for `connector`.
    pub fn redirect_uri(&self, connector: &str) -> String {
        format!(
            "{}/oauth/{connector}/callback",
            self.public_url.trim_end_matches('/')
        )
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.server.public_url.starts_with("http://")
            && !config.server.public_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "public_url must start with http:// or https://, got: {}",
                config.server.public_url
            )));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        config.auth.apply_env();
        config.auth.validate()?;

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("auth-dashboard.toml")
    }
}
