//! AWS credential resolution and per-profile caching.

use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub mod cli;
pub mod environment;

pub const DEFAULT_PROFILE: &str = "default";

/// Temporary (session) credentials are re-resolved after this long.
const SESSION_CREDENTIALS_TTL_MINUTES: i64 = 50;
/// Long-lived access keys are re-resolved after this long.
const STATIC_CREDENTIALS_TTL_HOURS: i64 = 24;

#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
}

impl Credentials {
    /// An empty session token is treated as absent.
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
        expiration: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: session_token.filter(|t| !t.is_empty()),
            expiration,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|exp| exp <= now)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Source of raw credential material for a named profile.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self, profile: Option<&str>) -> Result<Credentials, AppError>;

    fn list_profiles(&self) -> Result<Vec<String>, AppError> {
        Ok(vec![])
    }
}

#[derive(Debug, Clone)]
pub struct CachedCredentialEntry {
    pub credentials: Credentials,
    pub loaded_at: DateTime<Utc>,
}

impl CachedCredentialEntry {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if self.credentials.is_expired_at(now) {
            return false;
        }
        let age = now - self.loaded_at;
        let ttl = if self.credentials.session_token.is_some() {
            Duration::minutes(SESSION_CREDENTIALS_TTL_MINUTES)
        } else {
            Duration::hours(STATIC_CREDENTIALS_TTL_HOURS)
        };
        age < ttl
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<CachedCredentialEntry>>>;

/// Per-profile credential cache.
///
/// Each profile owns a slot guarded by its own async mutex, so concurrent
/// lookups of one profile share a single provider call while different
/// profiles resolve in parallel.
pub struct CredentialCache {
    provider: Arc<dyn CredentialProvider>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl CredentialCache {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, profile: Option<&str>) -> Result<Credentials, AppError> {
        self.resolve_at(profile, Utc::now()).await
    }

    pub(crate) async fn resolve_at(
        &self,
        profile: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Credentials, AppError> {
        let profile = normalized_profile(profile);
        let key = cache_key(profile);
        let slot = self.slot(&key);
        let mut entry = slot.lock().await;

        if let Some(cached) = entry.as_ref() {
            if cached.is_valid_at(now) {
                debug!(profile = %key, "credential cache hit");
                return Ok(cached.credentials.clone());
            }
        }

        debug!(profile = %key, provider = self.provider.name(), "resolving credentials");
        let credentials = self.provider.resolve(profile).await?;
        if credentials.access_key_id.is_empty() || credentials.secret_access_key.is_empty() {
            return Err(AppError::CredentialsNotFound(key));
        }

        *entry = Some(CachedCredentialEntry {
            credentials: credentials.clone(),
            loaded_at: now,
        });
        Ok(credentials)
    }

    pub fn invalidate(&self, profile: Option<&str>) {
        let key = cache_key(profile);
        self.lock_slots().remove(&key);
        debug!(profile = %key, "credential cache entry invalidated");
    }

    pub fn invalidate_all(&self) {
        self.lock_slots().clear();
    }

    fn slot(&self, key: &str) -> Slot {
        self.lock_slots()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Trimmed profile name, or `None` when it names the default profile.
fn normalized_profile(profile: Option<&str>) -> Option<&str> {
    profile
        .map(str::trim)
        .filter(|p| !p.is_empty() && *p != DEFAULT_PROFILE)
}

fn cache_key(profile: Option<&str>) -> String {
    normalized_profile(profile)
        .unwrap_or(DEFAULT_PROFILE)
        .to_string()
}
