//! Authentication error types.
//!
//! This module defines errors raised while configuring the validator and
//! while resolving a reference token against the remote authority. Request
//! time errors never leave [`TokenValidator::validate`]; they are rendered
//! into [`AuthFailure`] reasons.
//!
//! [`TokenValidator::validate`]: crate::validator::TokenValidator::validate
//! [`AuthFailure`]: crate::validator::AuthFailure

use thiserror::Error;

/// Authentication and configuration errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Invalid or incomplete configuration, raised before first use.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Endpoint discovery failed.
    #[error("OIDC discovery failed: {0}")]
    OidcDiscoveryFailed(String),

    /// Token introspection request failed.
    #[error("Introspection failed: {0}")]
    IntrospectionFailed(String),

    /// Introspection endpoint answered with something other than an RFC 7662 document.
    #[error("Invalid introspection response: {0}")]
    InvalidIntrospectionResponse(String),

    /// User-info request failed.
    #[error("Userinfo request failed: {0}")]
    UserinfoFailed(String),

    /// Token is inactive (from introspection).
    #[error("token is not active")]
    TokenInactive,

    /// Cache store error while reading or writing claims.
    ///
    /// Wraps the original [`StorageError`] to preserve the source chain.
    ///
    /// [`StorageError`]: refcheck_storage::StorageError
    #[error("Claims cache error: {0}")]
    CacheStorage(#[source] refcheck_storage::StorageError),

    /// Claims could not be encoded for the cache.
    #[error("Claims cache serialization failed: {0}")]
    CacheSerialization(String),

    /// The remote call backing a single-flight computation panicked or was aborted.
    #[error("Remote call aborted: {0}")]
    FlightAborted(String),
}

impl AuthError {
    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a new `OidcDiscoveryFailed` error.
    #[must_use]
    pub fn discovery_failed(message: impl Into<String>) -> Self {
        Self::OidcDiscoveryFailed(message.into())
    }

    /// Creates a new `IntrospectionFailed` error.
    #[must_use]
    pub fn introspection_failed(message: impl Into<String>) -> Self {
        Self::IntrospectionFailed(message.into())
    }

    /// Creates a new `InvalidIntrospectionResponse` error.
    #[must_use]
    pub fn invalid_introspection_response(message: impl Into<String>) -> Self {
        Self::InvalidIntrospectionResponse(message.into())
    }

    /// Creates a new `UserinfoFailed` error.
    #[must_use]
    pub fn userinfo_failed(message: impl Into<String>) -> Self {
        Self::UserinfoFailed(message.into())
    }

    /// Returns `true` when the claims cache is temporarily unreachable.
    #[must_use]
    pub fn is_transient_cache_error(&self) -> bool {
        matches!(self, Self::CacheStorage(err) if err.is_transient())
    }
}

impl From<refcheck_storage::StorageError> for AuthError {
    fn from(err: refcheck_storage::StorageError) -> Self {
        AuthError::CacheStorage(err)
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::CacheSerialization(err.to_string())
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;
