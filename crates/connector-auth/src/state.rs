//! CSRF state tokens for the authorization-code flow
//!
//! A state token is issued with each authorization URL and must come back
//! unchanged on the callback. Tokens are single-use and expire after
//! `STATE_TTL`. Expired entries are swept on every issue rather than by a
//! background task; volume is a handful of logins per process.
//!
//! Storage sits behind `StateStore` so a multi-instance deployment can plug in
//! a shared TTL cache. The bundled `MemoryStateStore` is process-local.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::constants::STATE_TTL;
use crate::token::now_millis;

/// What an issued state token was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    pub connector: String,
    /// Unix milliseconds at issuance
    pub issued_at_ms: u64,
}

/// Boxed future returned by `StateStore` methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Backing storage for pending state tokens.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn StateStore>`).
pub trait StateStore: Send + Sync {
    fn get<'a>(&'a self, token: &'a str) -> StoreFuture<'a, Option<StateEntry>>;

    fn set(&self, token: String, entry: StateEntry) -> StoreFuture<'_, ()>;

    /// Remove a token, returning its entry if it was present. Must be atomic:
    /// two concurrent deletes of the same token return the entry at most once.
    fn delete<'a>(&'a self, token: &'a str) -> StoreFuture<'a, Option<StateEntry>>;

    /// Drop entries issued before `cutoff_ms`, returning how many were removed.
    fn sweep(&self, cutoff_ms: u64) -> StoreFuture<'_, usize>;
}

/// In-process state store backed by a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, StateEntry>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending tokens.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl StateStore for MemoryStateStore {
    fn get<'a>(&'a self, token: &'a str) -> StoreFuture<'a, Option<StateEntry>> {
        Box::pin(async move { self.entries.lock().await.get(token).cloned() })
    }

    fn set(&self, token: String, entry: StateEntry) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.entries.lock().await.insert(token, entry);
        })
    }

    fn delete<'a>(&'a self, token: &'a str) -> StoreFuture<'a, Option<StateEntry>> {
        Box::pin(async move { self.entries.lock().await.remove(token) })
    }

    fn sweep(&self, cutoff_ms: u64) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let before = entries.len();
            entries.retain(|_, e| e.issued_at_ms >= cutoff_ms);
            before - entries.len()
        })
    }
}

/// Issues and validates state tokens against a `StateStore`.
#[derive(Clone)]
pub struct OAuthStates {
    store: Arc<dyn StateStore>,
    ttl: Duration,
}

impl OAuthStates {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            ttl: STATE_TTL,
        }
    }

    /// Process-local registry.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStateStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    fn ttl_ms(&self) -> u64 {
        self.ttl.as_millis() as u64
    }

    /// Issue a fresh token for `connector`, sweeping expired entries first.
    pub async fn issue(&self, connector: &str) -> String {
        let now = now_millis();
        let swept = self.store.sweep(now.saturating_sub(self.ttl_ms())).await;
        if swept > 0 {
            debug!(swept, "discarded expired OAuth states");
        }

        let token = generate_state_token();
        self.store
            .set(
                token.clone(),
                StateEntry {
                    connector: connector.to_string(),
                    issued_at_ms: now,
                },
            )
            .await;

        info!(connector, "OAuth state issued");
        token
    }

    /// Consume `token`. True only if it was issued for `expected_connector`
    /// within the TTL. The entry is removed whatever the outcome, so a token
    /// can validate at most once.
    pub async fn validate(&self, token: &str, expected_connector: &str) -> bool {
        let Some(entry) = self.store.delete(token).await else {
            warn!(connector = expected_connector, "unknown or already used OAuth state");
            return false;
        };

        if entry.connector != expected_connector {
            warn!(
                connector = expected_connector,
                issued_for = %entry.connector,
                "OAuth state issued for a different connector"
            );
            return false;
        }

        let age_ms = now_millis().saturating_sub(entry.issued_at_ms);
        if age_ms > self.ttl_ms() {
            warn!(
                connector = expected_connector,
                age_secs = age_ms / 1000,
                "OAuth state expired"
            );
            return false;
        }

        true
    }
}

/// Generate an unguessable state token: 32 random bytes, URL-safe base64
/// without padding (43 characters).
pub fn generate_state_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
