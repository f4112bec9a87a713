//! Connector credential management
//!
//! Resolves per-connector profiles on disk, stores API keys and OAuth tokens,
//! and drives the OAuth authorization-code and refresh-token grants. The
//! library has no dependency on the dashboard binary and can be used on its
//! own.
//!
//! Credential flow:
//! 1. `metadata::classify()` reads the connector's docs to pick a scheme
//! 2. API-key connectors store a value via `ConnectorAuth::save_api_key()`
//! 3. OAuth connectors get a URL from `ConnectorAuth::build_authorization_url()`
//! 4. The callback runs `validate_state()` then `exchange_code()`
//! 5. Tokens land in the active profile via `credentials::CredentialStore`
//! 6. `ConnectorAuth::access_token()` refreshes once the token nears expiry

pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod metadata;
pub mod oauth;
pub mod profile;
pub mod state;
pub mod status;
pub mod token;

pub use config::{AuthConfig, ConnectorConfig, ProviderConfig};
pub use constants::*;
pub use credentials::{CredentialStore, OAuthClient, OAuthTokenSet, PlainCredential};
pub use error::{Error, Result};
pub use metadata::{AuthScheme, ConnectorAuthDescriptor, EnvVarSpec};
pub use oauth::OAuthEngine;
pub use profile::{Profile, ProfileLayout, ProfilePaths};
pub use state::{MemoryStateStore, OAuthStates, StateEntry, StateStore};
pub use status::{AuthStatus, ConnectorAuth, EnvVarStatus};
pub use token::TokenResponse;

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
pub(crate) fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner())
}
