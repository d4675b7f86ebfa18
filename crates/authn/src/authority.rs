//! Remote token authority interface.
//!
//! The validator never talks HTTP directly. It asks a [`TokenAuthority`] to
//! introspect a token and, optionally, to fetch user-info claims for it.
//! [`HttpTokenAuthority`](crate::http_authority::HttpTokenAuthority) is the production
//! implementation; tests substitute in-memory fakes.
//!
//! Both operations report failure in-band so that the outcome can be shared
//! by every caller joined on the same single-flight computation.

use async_trait::async_trait;

use crate::{claims::ClaimSet, error::AuthError};

/// Outcome of an introspection call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntrospectionResult {
    /// The call failed or the authority returned an error payload.
    Error(String),
    /// The authority reports the token as not active.
    Inactive,
    /// The token is active and carries these claims.
    Active(ClaimSet),
}

impl IntrospectionResult {
    /// Returns `true` for [`IntrospectionResult::Active`].
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }
}

impl From<AuthError> for IntrospectionResult {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::TokenInactive => Self::Inactive,
            other => Self::Error(other.to_string()),
        }
    }
}

/// Outcome of a user-info call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserinfoResult {
    /// The call failed or the endpoint returned an error payload.
    Error(String),
    /// Claims describing the token's subject.
    Success(ClaimSet),
}

impl From<AuthError> for UserinfoResult {
    fn from(err: AuthError) -> Self {
        Self::Error(err.to_string())
    }
}

/// A remote authority able to resolve opaque tokens.
///
/// Implementations perform exactly one remote exchange per call and never
/// retry.
#[async_trait]
pub trait TokenAuthority: Send + Sync {
    /// Asks the authority whether `token` is active and for its claims.
    async fn introspect(&self, token: &str) -> IntrospectionResult;

    /// Fetches claims about the subject of `token` from the user-info endpoint.
    async fn fetch_userinfo(&self, token: &str) -> UserinfoResult;
}
