//! Provider endpoints and lifecycle constants
//!
//! One provider family is supported: Google's OAuth2 endpoints. The endpoints
//! are defaults only; `AuthConfig.provider` can point them elsewhere (tests
//! point them at a local mock server).

use std::time::Duration;

/// Authorization endpoint the user's browser is sent to
pub const AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Token endpoint for code exchange and token refresh
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Prefix of the scope URLs a connector declares in its documentation.
pub const SCOPE_URL_PREFIX: &str = "https://www.googleapis.com/auth/";

/// Fixed timeout applied to every token endpoint request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifetime of an issued CSRF state token.
pub const STATE_TTL: Duration = Duration::from_secs(600); // 10 minutes

/// Access tokens expiring within this window are treated as expired.
pub const EXPIRY_SKEW_MS: u64 = 60_000;

/// Issued tokens living this long or less get a warning in the logs.
pub const SHORT_LIFETIME_SECS: u64 = 600;

/// Profile used when no valid `current_profile` marker exists.
pub const DEFAULT_PROFILE: &str = "default";

/// Directory under `$HOME` holding every connector's state.
pub const ROOT_DIR_NAME: &str = ".connect";

/// Field name used for API keys when nothing better can be inferred.
pub const DEFAULT_API_KEY_FIELD: &str = "apiKey";
