//! Access tokens for the Firestore REST API.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gcp_auth::TokenProvider;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{FirestoreError, FirestoreResult};

/// OAuth scope for Firestore access.
pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Where request tokens come from.
#[derive(Clone)]
pub enum AccessToken {
    /// Service account / ADC credentials with a shared cache.
    Provider(Arc<TokenCache>),
    /// Fixed bearer value, used against the local emulator.
    Static(String),
}

impl AccessToken {
    pub async fn get(&self) -> FirestoreResult<String> {
        match self {
            AccessToken::Provider(cache) => cache.get().await,
            AccessToken::Static(token) => Ok(token.clone()),
        }
    }

    /// Drop any cached token so the next call fetches a fresh one.
    pub async fn invalidate(&self) {
        if let AccessToken::Provider(cache) = self {
            cache.invalidate().await;
        }
    }
}

/// Token cache shared by all clones of a client.
///
/// The mutex is held across the refresh so concurrent callers wait for one
/// fetch instead of issuing their own.
pub struct TokenCache {
    provider: Arc<dyn TokenProvider>,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            cached: Mutex::new(None),
        }
    }

    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    pub async fn get(&self) -> FirestoreResult<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if Instant::now() + REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        match self.provider.token(&[FIRESTORE_SCOPE]).await {
            Ok(token) => {
                let ttl = (token.expires_at() - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                let value = token.as_str().to_string();
                *cached = Some(CachedToken {
                    value: value.clone(),
                    expires_at: Instant::now() + ttl,
                });
                debug!(ttl_secs = ttl.as_secs(), "Refreshed Firestore access token");
                Ok(value)
            }
            Err(e) => match cached.as_ref() {
                // Keep using a token that has not actually expired yet.
                Some(token) if Instant::now() < token.expires_at => {
                    warn!("Token refresh failed, reusing current token: {}", e);
                    Ok(token.value.clone())
                }
                _ => Err(FirestoreError::auth_error(format!(
                    "Failed to obtain access token: {}",
                    e
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        let token = AccessToken::Static("owner".to_string());
        token.invalidate().await;
        assert_eq!(token.get().await.unwrap(), "owner");
    }

    #[test]
    fn test_scope() {
        assert!(FIRESTORE_SCOPE.ends_with("/datastore"));
    }
}
