//! Plain credential and OAuth token persistence
//!
//! Plain credentials live in whichever layout the profile already uses (flat
//! file or `config.json` inside the profile directory); new profiles get the
//! flat file. Token sets always live in `<profile>/tokens.json`. Every write
//! goes through a temp file + rename with 0600 permissions.
//!
//! Reads never fail: a missing or malformed file is "no credential".

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use common::Secret;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::metadata::env_prefix;
use crate::profile::{Profile, ProfilePaths, ensure_valid_name, is_valid_name};

/// Field map of a plain credential (`apiKey`, `clientId`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlainCredential {
    fields: BTreeMap<String, String>,
}

impl PlainCredential {
    /// String-valued entries of a JSON object; other values are ignored.
    fn from_json(map: &Map<String, Value>) -> Self {
        let fields = map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect();
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when at least one field holds a non-blank value.
    pub fn has_value(&self) -> bool {
        self.fields.values().any(|v| !v.trim().is_empty())
    }
}

/// OAuth tokens for one profile.
///
/// `expires_at` is a unix timestamp in milliseconds, computed at issuance from
/// the provider's `expires_in`. A set without it is never considered valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthTokenSet {
    #[serde(default)]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl OAuthTokenSet {
    /// Whether the access token is usable at `now_ms` with `skew_ms` to spare.
    pub fn is_valid_at(&self, now_ms: u64, skew_ms: u64) -> bool {
        !self.access_token.is_empty()
            && self
                .expires_at
                .is_some_and(|expires| now_ms.saturating_add(skew_ms) < expires)
    }

    pub fn has_access_token(&self) -> bool {
        !self.access_token.is_empty()
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|r| !r.is_empty())
    }
}

/// OAuth client registration used for the authorization-code flow.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: Option<Secret<String>>,
}

/// Reads and writes credential files under the profile root.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    paths: ProfilePaths,
}

impl CredentialStore {
    pub fn new(paths: ProfilePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ProfilePaths {
        &self.paths
    }

    /// Plain credential of the connector's active profile. Empty for names
    /// that are not plain path components.
    pub async fn load(&self, connector: &str) -> PlainCredential {
        if !is_valid_name(connector) {
            return PlainCredential::default();
        }
        let profile = self.paths.resolve(connector).await;
        self.load_profile(&profile).await
    }

    /// Plain credential of an already-resolved profile.
    pub async fn load_profile(&self, profile: &Profile) -> PlainCredential {
        match &profile.layout {
            Some(layout) => read_json_object(layout.path())
                .await
                .map(|map| PlainCredential::from_json(&map))
                .unwrap_or_default(),
            None => PlainCredential::default(),
        }
    }

    /// Set one field, keeping every other stored field.
    pub async fn save(&self, connector: &str, field: &str, value: &str) -> Result<()> {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), value.to_string());
        self.save_fields(connector, &fields).await
    }

    /// Merge `fields` into the stored credential, writing back to the layout
    /// already in use (flat file when the profile has none).
    pub async fn save_fields(
        &self,
        connector: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<()> {
        ensure_valid_name(connector)?;
        let profile = self.paths.resolve(connector).await;
        let layout = profile.layout_for_write();

        let mut map = read_json_object(layout.path()).await.unwrap_or_default();
        for (field, value) in fields {
            map.insert(field.clone(), Value::String(value.clone()));
        }

        let json = serde_json::to_string_pretty(&Value::Object(map))
            .map_err(|e| Error::Io(format!("serializing credential: {e}")))?;
        write_atomic(layout.path(), &json).await?;

        info!(
            connector,
            profile = %profile.name,
            layout = layout.label(),
            fields = fields.len(),
            "saved credential"
        );
        Ok(())
    }

    /// Token set of the active profile, if one is stored and parses.
    pub async fn load_tokens(&self, connector: &str) -> Option<OAuthTokenSet> {
        if !is_valid_name(connector) {
            return None;
        }
        let profile = self.paths.resolve(connector).await;
        let path = profile.tokens_path();
        let contents = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&contents) {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                debug!(
                    connector,
                    path = %path.display(),
                    error = %e,
                    "ignoring malformed token file"
                );
                None
            }
        }
    }

    /// Replace the active profile's token set.
    pub async fn save_tokens(&self, connector: &str, tokens: &OAuthTokenSet) -> Result<()> {
        ensure_valid_name(connector)?;
        let profile = self.paths.resolve(connector).await;
        let json = serde_json::to_string_pretty(tokens)
            .map_err(|e| Error::Io(format!("serializing tokens: {e}")))?;
        write_atomic(&profile.tokens_path(), &json).await?;

        debug!(connector, profile = %profile.name, "persisted tokens");
        Ok(())
    }

    /// OAuth client registration. Sources in order: `<PREFIX>_CLIENT_ID` /
    /// `<PREFIX>_CLIENT_SECRET` env vars, the active profile's
    /// `clientId`/`clientSecret`, then the connector's `credentials.json`.
    /// The secret is taken from the same source as the id.
    pub async fn load_client(&self, connector: &str) -> Option<OAuthClient> {
        if !is_valid_name(connector) {
            return None;
        }
        let prefix = env_prefix(connector);
        if let Some(client_id) = non_empty_env(&format!("{prefix}_CLIENT_ID")) {
            return Some(OAuthClient {
                client_id,
                client_secret: non_empty_env(&format!("{prefix}_CLIENT_SECRET")).map(Secret::new),
            });
        }

        let profile = self.load(connector).await;
        if let Some(client_id) = profile.get("clientId").filter(|v| !v.is_empty()) {
            return Some(OAuthClient {
                client_id: client_id.to_string(),
                client_secret: profile
                    .get("clientSecret")
                    .filter(|v| !v.is_empty())
                    .map(|v| Secret::new(v.to_string())),
            });
        }

        let shared = read_json_object(&self.paths.shared_credentials_path(connector)).await?;
        client_from_shared(&shared)
    }
}

/// Accepts flat `client_id`/`clientId` keys as well as the `installed` / `web`
/// wrappers of a downloaded Google client file.
fn client_from_shared(map: &Map<String, Value>) -> Option<OAuthClient> {
    let source = ["installed", "web"]
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_object))
        .unwrap_or(map);

    let pick = |snake: &str, camel: &str| {
        source
            .get(snake)
            .or_else(|| source.get(camel))
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    Some(OAuthClient {
        client_id: pick("client_id", "clientId")?,
        client_secret: pick("client_secret", "clientSecret").map(Secret::new),
    })
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Read a JSON object, treating absence and parse failures alike.
async fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let contents = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str::<Value>(&contents) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            debug!(path = %path.display(), "credential file is not a JSON object");
            None
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "ignoring malformed credential file");
            None
        }
    }
}

/// Write a file atomically.
///
/// Each write gets its own uniquely named temp file in the target directory,
/// created 0600 before any bytes land in it, then renamed over the target.
/// Concurrent writers never share a temp file, so the last rename wins. A
/// failed write removes its temp file.
async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let path = path.to_path_buf();
    let contents = contents.to_owned();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, contents.as_bytes()))
        .await
        .map_err(|e| Error::Io(format!("write task failed: {e}")))?
}

fn write_atomic_blocking(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    std::fs::create_dir_all(dir)
        .map_err(|e| Error::Io(format!("creating {}: {e}", dir.display())))?;

    // tempfile creates the file with mode 0600 on unix
    let mut tmp = tempfile::Builder::new()
        .prefix(".cred-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| Error::Io(format!("creating temp file: {e}")))?;

    tmp.write_all(contents)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| Error::Io(format!("writing temp file: {e}")))?;

    tmp.persist(path)
        .map_err(|e| Error::Io(format!("renaming temp file: {}", e.error)))?;

    Ok(())
}
