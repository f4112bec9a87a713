//! On-disk profile resolution
//!
//! Layout per connector:
//!
//! ```text
//! <root>/<connector>/
//!   current_profile
//!   credentials.json
//!   profiles/
//!     <profile>.json          flat-file plain credential (older layout)
//!     <profile>/config.json   directory plain credential
//!     <profile>/tokens.json   OAuth token set
//! ```
//!
//! Resolution never fails. A missing, unreadable or stale `current_profile`
//! marker falls back to the default profile.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::constants::DEFAULT_PROFILE;
use crate::error::{Error, Result};

const CURRENT_PROFILE_FILE: &str = "current_profile";
const SHARED_CREDENTIALS_FILE: &str = "credentials.json";
const PROFILES_DIR: &str = "profiles";
const CONFIG_FILE: &str = "config.json";
const TOKENS_FILE: &str = "tokens.json";

/// Where a profile's plain credential lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileLayout {
    /// `profiles/<name>.json`
    FlatFile(PathBuf),
    /// `profiles/<name>/config.json`
    Directory(PathBuf),
}

impl ProfileLayout {
    pub fn path(&self) -> &Path {
        match self {
            ProfileLayout::FlatFile(p) | ProfileLayout::Directory(p) => p,
        }
    }

    /// Layout label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            ProfileLayout::FlatFile(_) => "flat_file",
            ProfileLayout::Directory(_) => "directory",
        }
    }
}

/// A connector's active profile, resolved once and passed explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub connector: String,
    pub name: String,
    /// `<root>/<connector>/profiles`
    pub profiles_dir: PathBuf,
    /// Existing plain-credential layout, if either is present on disk
    pub layout: Option<ProfileLayout>,
}

impl Profile {
    /// `<profiles>/<name>/`, the directory layout root.
    pub fn dir(&self) -> PathBuf {
        self.profiles_dir.join(&self.name)
    }

    /// OAuth tokens only ever use the directory layout.
    pub fn tokens_path(&self) -> PathBuf {
        self.dir().join(TOKENS_FILE)
    }

    /// The existing layout, or a new flat file when none exists yet.
    pub fn layout_for_write(&self) -> ProfileLayout {
        self.layout.clone().unwrap_or_else(|| {
            ProfileLayout::FlatFile(flat_file_path(&self.profiles_dir, &self.name))
        })
    }
}

/// Computes connector and profile paths under a shared root.
#[derive(Debug, Clone)]
pub struct ProfilePaths {
    root: PathBuf,
}

impl ProfilePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<connector>`
    pub fn config_dir(&self, connector: &str) -> PathBuf {
        self.root.join(connector)
    }

    pub fn profiles_dir(&self, connector: &str) -> PathBuf {
        self.config_dir(connector).join(PROFILES_DIR)
    }

    /// Connector-wide OAuth client file shared by every profile.
    pub fn shared_credentials_path(&self, connector: &str) -> PathBuf {
        self.config_dir(connector).join(SHARED_CREDENTIALS_FILE)
    }

    /// Name of the active profile, falling back to `default`.
    pub async fn current_profile(&self, connector: &str) -> String {
        let marker = self.config_dir(connector).join(CURRENT_PROFILE_FILE);
        let name = match tokio::fs::read_to_string(&marker).await {
            Ok(contents) => contents.trim().to_string(),
            Err(_) => return DEFAULT_PROFILE.to_string(),
        };

        if !is_valid_name(&name) {
            debug!(connector, profile = %name, "invalid profile marker, using default");
            return DEFAULT_PROFILE.to_string();
        }

        if !is_dir(&self.profiles_dir(connector).join(&name)).await {
            debug!(connector, profile = %name, "marked profile does not exist, using default");
            return DEFAULT_PROFILE.to_string();
        }

        name
    }

    /// Resolve the active profile and detect its plain-credential layout:
    /// flat file first, then directory.
    pub async fn resolve(&self, connector: &str) -> Profile {
        let name = self.current_profile(connector).await;
        let profiles_dir = self.profiles_dir(connector);

        let flat = flat_file_path(&profiles_dir, &name);
        let nested = profiles_dir.join(&name).join(CONFIG_FILE);
        let layout = if is_file(&flat).await {
            Some(ProfileLayout::FlatFile(flat))
        } else if is_file(&nested).await {
            Some(ProfileLayout::Directory(nested))
        } else {
            None
        };

        Profile {
            connector: connector.to_string(),
            name,
            profiles_dir,
            layout,
        }
    }
}

/// Connector and profile names become path components, so only plain names
/// are accepted.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Reject connector names that would resolve outside the root.
pub fn ensure_valid_name(connector: &str) -> Result<()> {
    if is_valid_name(connector) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid connector name: {connector:?}")))
    }
}

fn flat_file_path(profiles_dir: &Path, name: &str) -> PathBuf {
    profiles_dir.join(format!("{name}.json"))
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
