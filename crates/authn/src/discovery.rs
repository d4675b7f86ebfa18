//! OpenID Connect discovery with caching.
//!
//! When an endpoint is not configured explicitly, the HTTP authority resolves
//! it from the authority's discovery document at
//! `{authority}/.well-known/openid-configuration`.
//!
//! # Caching
//!
//! Documents are held in a [`moka`] cache for the configured refresh
//! interval. Concurrent resolutions for the same authority collapse into one
//! fetch through [`Cache::try_get_with`]. Failed fetches are not cached.
//!
//! # Security
//!
//! - Only HTTPS authorities are accepted unless explicitly relaxed
//! - The document's `issuer` must match the configured authority

use std::{sync::Arc, time::Duration};

use moka::future::Cache;
use serde::Deserialize;
use url::Url;

use crate::error::{AuthError, Result};

/// Discovery documents are per-authority; a handful is plenty.
const MAX_CACHED_DOCUMENTS: u64 = 64;

/// The subset of an OIDC discovery document used for token validation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscoveryDocument {
    /// Issuer identifier; must match the configured authority.
    pub issuer: String,
    /// RFC 7662 token introspection endpoint.
    #[serde(default)]
    pub introspection_endpoint: Option<String>,
    /// OIDC user-info endpoint.
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

/// Fetches and caches discovery documents.
#[derive(Clone)]
pub struct DiscoveryClient {
    http: reqwest::Client,
    timeout: Duration,
    require_https: bool,
    documents: Cache<String, Arc<DiscoveryDocument>>,
}

impl std::fmt::Debug for DiscoveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryClient")
            .field("timeout", &self.timeout)
            .field("require_https", &self.require_https)
            .field("cached_documents", &self.documents.entry_count())
            .finish_non_exhaustive()
    }
}

impl DiscoveryClient {
    /// Creates a discovery client.
    ///
    /// `refresh_interval` bounds how long a fetched document is reused.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        timeout: Duration,
        refresh_interval: Duration,
        require_https: bool,
    ) -> Self {
        Self {
            http,
            timeout,
            require_https,
            documents: Cache::builder()
                .time_to_live(refresh_interval)
                .max_capacity(MAX_CACHED_DOCUMENTS)
                .build(),
        }
    }

    /// Returns the discovery document for `authority`, fetching it on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::OidcDiscoveryFailed`] if the authority is not
    /// HTTPS (when required), the request fails or times out, the document
    /// does not parse, or its issuer does not match.
    #[tracing::instrument(skip(self), fields(authority = %authority))]
    pub async fn resolve(&self, authority: &Url) -> Result<Arc<DiscoveryDocument>> {
        self.check_scheme(authority)?;

        let key = normalize(authority).to_owned();
        self.documents
            .try_get_with(key, async {
                let document = self.fetch(authority).await?;
                Ok::<_, AuthError>(Arc::new(document))
            })
            .await
            .map_err(|err: Arc<AuthError>| match err.as_ref() {
                AuthError::OidcDiscoveryFailed(message) => AuthError::discovery_failed(message.clone()),
                other => AuthError::discovery_failed(other.to_string()),
            })
    }

    fn check_scheme(&self, authority: &Url) -> Result<()> {
        match authority.scheme() {
            "https" => Ok(()),
            "http" if !self.require_https => Ok(()),
            scheme => Err(AuthError::discovery_failed(format!(
                "authority must use HTTPS, got scheme '{scheme}'"
            ))),
        }
    }

    async fn fetch(&self, authority: &Url) -> Result<DiscoveryDocument> {
        let url = discovery_url(authority);
        tracing::debug!(url = %url, "fetching discovery document");

        let response = self
            .http
            .get(url.as_str())
            .header(http::header::ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AuthError::discovery_failed(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::discovery_failed(format!("{url} returned {status}")));
        }

        let document: DiscoveryDocument = response
            .json()
            .await
            .map_err(|e| AuthError::discovery_failed(format!("invalid discovery document: {e}")))?;

        let expected = normalize(authority);
        let actual = document.issuer.trim_end_matches('/');
        if expected != actual {
            return Err(AuthError::discovery_failed(format!(
                "issuer mismatch: expected {expected}, got {actual}"
            )));
        }

        Ok(document)
    }
}

/// Builds `{authority}/.well-known/openid-configuration`, keeping any path prefix.
pub(crate) fn discovery_url(authority: &Url) -> Url {
    let mut url = authority.clone();
    let path = authority.path().trim_end_matches('/');
    url.set_path(&format!("{path}/.well-known/openid-configuration"));
    url.set_query(None);
    url
}

fn normalize(authority: &Url) -> &str {
    authority.as_str().trim_end_matches('/')
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("https://idp.example.com", "https://idp.example.com/.well-known/openid-configuration")]
    #[case("https://idp.example.com/", "https://idp.example.com/.well-known/openid-configuration")]
    #[case(
        "https://idp.example.com/realms/main",
        "https://idp.example.com/realms/main/.well-known/openid-configuration"
    )]
    #[case(
        "https://idp.example.com/realms/main/",
        "https://idp.example.com/realms/main/.well-known/openid-configuration"
    )]
    fn test_discovery_url(#[case] authority: &str, #[case] expected: &str) {
        let authority = Url::parse(authority).unwrap();
        assert_eq!(discovery_url(&authority).as_str(), expected);
    }

    #[tokio::test]
    async fn test_http_authority_rejected_when_https_required() {
        let client = DiscoveryClient::new(
            reqwest::Client::new(),
            Duration::from_secs(1),
            Duration::from_secs(60),
            true,
        );
        let err = client.resolve(&Url::parse("http://idp.example.com").unwrap()).await.unwrap_err();
        assert!(matches!(err, AuthError::OidcDiscoveryFailed(_)));
        assert!(err.to_string().contains("HTTPS"));
    }

    #[test]
    fn test_document_ignores_unrelated_fields() {
        let document: DiscoveryDocument = serde_json::from_str(
            r#"{
                "issuer": "https://idp.example.com",
                "jwks_uri": "https://idp.example.com/jwks",
                "introspection_endpoint": "https://idp.example.com/introspect"
            }"#,
        )
        .unwrap();
        assert_eq!(
            document.introspection_endpoint.as_deref(),
            Some("https://idp.example.com/introspect")
        );
        assert_eq!(document.userinfo_endpoint, None);
    }
}
