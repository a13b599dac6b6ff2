//! OAuth access tokens for the BigQuery API.
//!
//! A token from `SLUICE_BQ_ACCESS_TOKEN` or `GOOGLE_OAUTH_ACCESS_TOKEN` is
//! used as is. Otherwise tokens are fetched from the GCE metadata server
//! (honouring `GCE_METADATA_HOST`) and cached until shortly before expiry.

use serde::Deserialize;
use snafu::ResultExt;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{HttpSnafu, WarehouseError};

const TOKEN_ENV_VARS: [&str; 2] = ["SLUICE_BQ_ACCESS_TOKEN", "GOOGLE_OAUTH_ACCESS_TOKEN"];
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

impl CachedToken {
    fn new(value: String, expires_in: Duration, now: Instant) -> Self {
        Self {
            value,
            refresh_at: now + expires_in.saturating_sub(EXPIRY_MARGIN),
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        now < self.refresh_at
    }
}

enum TokenSource {
    Static(String),
    Metadata {
        client: reqwest::Client,
        url: String,
        cache: Mutex<Option<CachedToken>>,
    },
}

/// Supplies bearer tokens for API requests.
pub struct TokenProvider {
    source: TokenSource,
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            TokenSource::Static(_) => write!(f, "TokenProvider<static>"),
            TokenSource::Metadata { url, .. } => write!(f, "TokenProvider<metadata {url}>"),
        }
    }
}

impl TokenProvider {
    /// Always hand out `token`.
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Static(token.into()),
        }
    }

    /// Pick a token source from the process environment.
    pub fn from_env(client: reqwest::Client) -> Self {
        Self::from_lookup(client, |name| std::env::var(name).ok())
    }

    fn from_lookup(client: reqwest::Client, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(token) = TOKEN_ENV_VARS
            .iter()
            .filter_map(|name| lookup(*name))
            .find(|token| !token.trim().is_empty())
        {
            debug!("Using access token from environment");
            return Self::fixed(token.trim());
        }

        let host = lookup("GCE_METADATA_HOST").unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());
        let url = format!("http://{host}{TOKEN_PATH}");
        debug!(url = %url, "Using metadata server for access tokens");
        Self {
            source: TokenSource::Metadata {
                client,
                url,
                cache: Mutex::new(None),
            },
        }
    }

    pub async fn token(&self) -> Result<String, WarehouseError> {
        match &self.source {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Metadata { client, url, cache } => {
                let mut cache = cache.lock().await;
                let now = Instant::now();
                if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh(now)) {
                    return Ok(cached.value.clone());
                }

                let response = client
                    .get(url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .map_err(|e| WarehouseError::Auth {
                        message: format!("metadata server unreachable: {e}"),
                    })?;
                if !response.status().is_success() {
                    return Err(WarehouseError::Auth {
                        message: format!("metadata server returned {}", response.status()),
                    });
                }
                let token: MetadataToken = response.json().await.context(HttpSnafu)?;
                debug!(expires_in = token.expires_in, "Fetched access token");

                let cached = CachedToken::new(
                    token.access_token,
                    Duration::from_secs(token.expires_in),
                    now,
                );
                let value = cached.value.clone();
                *cache = Some(cached);
                Ok(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn provider(vars: &[(&str, &str)]) -> TokenProvider {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TokenProvider::from_lookup(reqwest::Client::new(), move |name| vars.get(name).cloned())
    }

    #[tokio::test]
    async fn test_env_token_preferred() {
        let tokens = provider(&[
            ("SLUICE_BQ_ACCESS_TOKEN", "sluice-token"),
            ("GOOGLE_OAUTH_ACCESS_TOKEN", "google-token"),
        ]);
        assert_eq!(tokens.token().await.unwrap(), "sluice-token");

        let tokens = provider(&[("GOOGLE_OAUTH_ACCESS_TOKEN", " google-token\n")]);
        assert_eq!(tokens.token().await.unwrap(), "google-token");
    }

    #[test]
    fn test_metadata_fallback() {
        let tokens = provider(&[("SLUICE_BQ_ACCESS_TOKEN", "  ")]);
        assert_eq!(
            format!("{tokens:?}"),
            "TokenProvider<metadata http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token>"
        );

        let tokens = provider(&[("GCE_METADATA_HOST", "127.0.0.1:8080")]);
        assert!(format!("{tokens:?}").contains("http://127.0.0.1:8080/computeMetadata"));
    }

    #[test]
    fn test_cached_token_refreshes_before_expiry() {
        let now = Instant::now();
        let token = CachedToken::new("t".to_string(), Duration::from_secs(3600), now);
        assert!(token.is_fresh(now + Duration::from_secs(3000)));
        assert!(!token.is_fresh(now + Duration::from_secs(3550)));

        let short = CachedToken::new("t".to_string(), Duration::from_secs(30), now);
        assert!(!short.is_fresh(now));
    }
}
