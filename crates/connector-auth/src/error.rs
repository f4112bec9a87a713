//! Error types for credential and token operations

/// Errors surfaced by the auth core.
///
/// Malformed or missing local files are not errors: the profile resolver and
/// credential store recover to defaults. Only configuration gaps, provider
/// failures and write failures reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no refresh token stored for connector {0}")]
    MissingRefreshToken(String),

    #[error("provider returned {status}: {description}")]
    Provider { status: u16, description: String },

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
