//! Reference-token validation.
//!
//! [`TokenValidator`] turns an opaque token into one of four outcomes:
//!
//! ```text
//! token ─► blank? ──────────────────────────────────────────► NoResult
//!            │
//!            ├─► contains '.' (when skipping is on) ────────► Skip
//!            │
//!            ├─► cache hit ─────────────────────────────────► Success
//!            │
//!            └─► single-flight introspection (+ user-info)
//!                  ├─ Error / Inactive ─────────────────────► Fail
//!                  └─ Active ─► post-process ─► cache write ─► Success
//! ```
//!
//! Concurrent validations of the same token share one introspection call and
//! one user-info call. Failures are never cached; the next presentation of a
//! failed token contacts the authority again.

use std::{fmt, sync::Arc};

use fail::fail_point;
use http::request::Parts;
use refcheck_storage::StorageBackend;

use crate::{
    authority::{IntrospectionResult, TokenAuthority, UserinfoResult},
    cache::{ClaimsCache, token_fingerprint},
    claims::{ClaimSet, post_process},
    error::{AuthError, Result},
    http_authority::HttpTokenAuthority,
    options::IntrospectionOptions,
    principal::Principal,
    single_flight::{Flight, SingleFlight},
};

/// Outcome of validating one token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthenticationResult {
    /// No token, or only whitespace, was presented; the host may try another scheme.
    NoResult,
    /// The token is not an opaque reference token and was not checked.
    Skip,
    /// The token was checked and rejected, or could not be checked.
    Fail(AuthFailure),
    /// The token is active.
    Success(Principal),
}

impl AuthenticationResult {
    /// Returns `true` for [`AuthenticationResult::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns the principal of a successful result.
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Success(principal) => Some(principal),
            _ => None,
        }
    }

    /// Returns the failure of a failed result.
    #[must_use]
    pub fn failure(&self) -> Option<&AuthFailure> {
        match self {
            Self::Fail(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Human-readable reason a token was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthFailure {
    reason: String,
}

impl AuthFailure {
    /// Creates a failure with `reason`.
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    /// The rejection reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl From<AuthError> for AuthFailure {
    fn from(err: AuthError) -> Self {
        Self::new(err.to_string())
    }
}

/// Validates opaque tokens against a remote authority.
///
/// Cheap to share behind an [`Arc`]; all state is internally synchronized.
pub struct TokenValidator {
    options: IntrospectionOptions,
    authority: Arc<dyn TokenAuthority>,
    cache: Option<ClaimsCache>,
    introspections: SingleFlight<IntrospectionResult>,
    userinfo: SingleFlight<UserinfoResult>,
}

impl fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenValidator")
            .field("options", &self.options)
            .field("cache", &self.cache)
            .field("pending_introspections", &self.introspections.len())
            .field("pending_userinfo", &self.userinfo.len())
            .finish_non_exhaustive()
    }
}

impl TokenValidator {
    /// Creates a validator talking HTTP to the configured authority.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the options are invalid, or if
    /// caching is enabled and `cache` is `None`.
    pub fn new(options: IntrospectionOptions, cache: Option<Arc<dyn StorageBackend>>) -> Result<Self> {
        options.validate()?;
        let authority = HttpTokenAuthority::from_options(&options)?;
        Self::with_authority(options, Arc::new(authority), cache)
    }

    /// Creates a validator using a custom [`TokenAuthority`].
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_authority(
        options: IntrospectionOptions,
        authority: Arc<dyn TokenAuthority>,
        cache: Option<Arc<dyn StorageBackend>>,
    ) -> Result<Self> {
        options.validate()?;

        let cache = match (options.enable_caching, cache) {
            (true, Some(backend)) => Some(ClaimsCache::new(
                backend,
                options.cache_key_prefix.clone(),
                options.cache_duration,
            )),
            (true, None) => {
                return Err(AuthError::config("enable_caching requires a cache backend"));
            },
            (false, _) => None,
        };

        Ok(Self {
            options,
            authority,
            cache,
            introspections: SingleFlight::new("introspection"),
            userinfo: SingleFlight::new("userinfo"),
        })
    }

    /// Returns the options this validator was built with.
    #[must_use]
    pub fn options(&self) -> &IntrospectionOptions {
        &self.options
    }

    /// Number of introspection calls currently in flight.
    #[must_use]
    pub fn pending_introspections(&self) -> usize {
        self.introspections.len()
    }

    /// Number of user-info calls currently in flight.
    #[must_use]
    pub fn pending_userinfo(&self) -> usize {
        self.userinfo.len()
    }

    /// Extracts the token from request `parts` and validates it.
    ///
    /// Returns [`AuthenticationResult::NoResult`] when no configured source
    /// carries a token.
    pub async fn authenticate(&self, parts: &Parts) -> AuthenticationResult {
        match self.options.extractor().extract(parts) {
            Some(token) => self.validate(&token).await,
            None => {
                tracing::trace!("no token found in request");
                AuthenticationResult::NoResult
            },
        }
    }

    /// Validates `token`.
    ///
    /// Never returns an error: remote and cache failures become
    /// [`AuthenticationResult::Fail`].
    #[tracing::instrument(skip_all, fields(token_hash = tracing::field::Empty))]
    pub async fn validate(&self, token: &str) -> AuthenticationResult {
        if token.trim().is_empty() {
            tracing::trace!("no token presented");
            return AuthenticationResult::NoResult;
        }
        tracing::Span::current().record("token_hash", token_fingerprint(token).as_str());

        if self.options.skip_tokens_with_dots && token.contains('.') {
            tracing::trace!("token contains a dot; skipping");
            return AuthenticationResult::Skip;
        }

        if let Some(cache) = &self.cache {
            match cache.get(token).await {
                Ok(Some(claims)) => {
                    tracing::trace!(cache = "hit", "using cached claims");
                    return AuthenticationResult::Success(self.principal(claims, token));
                },
                Ok(None) => tracing::trace!(cache = "miss", "claims not cached"),
                Err(err) => {
                    log_cache_error(&err, "claims cache read failed");
                    return AuthenticationResult::Fail(err.into());
                },
            }
        }

        let claims = match self.resolve_claims(token).await {
            Ok(claims) => claims,
            Err(failure) => return AuthenticationResult::Fail(failure),
        };

        if let Some(cache) = &self.cache
            && let Err(err) = cache.set(token, &claims).await
        {
            log_cache_error(&err, "claims cache write failed");
            return AuthenticationResult::Fail(err.into());
        }

        AuthenticationResult::Success(self.principal(claims, token))
    }

    /// Runs (or joins) the remote calls for `token` and post-processes the result.
    async fn resolve_claims(&self, token: &str) -> std::result::Result<ClaimSet, AuthFailure> {
        let introspection = self.introspections.get_or_create(token, || {
            let authority = Arc::clone(&self.authority);
            let token = token.to_owned();
            async move {
                fail_point!("introspection-before-remote-call", |_| {
                    IntrospectionResult::Error("injected failure before introspection".into())
                });
                authority.introspect(&token).await
            }
        });
        let userinfo = self.options.enable_userinfo.then(|| {
            self.userinfo.get_or_create(token, || {
                let authority = Arc::clone(&self.authority);
                let token = token.to_owned();
                async move { authority.fetch_userinfo(&token).await }
            })
        });

        // Released on every exit path below.
        let _release = (introspection.release_guard(), userinfo.as_ref().map(Flight::release_guard));

        let claims = match introspection.wait().await.map_err(AuthError::from)? {
            IntrospectionResult::Active(claims) => claims,
            IntrospectionResult::Inactive => {
                tracing::debug!("token is not active");
                return Err(AuthError::TokenInactive.into());
            },
            IntrospectionResult::Error(message) => {
                tracing::error!(error = %message, "introspection failed");
                return Err(AuthFailure::new(message));
            },
        };

        let extra = match &userinfo {
            Some(flight) => match flight.wait().await.map_err(AuthError::from)? {
                UserinfoResult::Success(extra) => Some(extra),
                UserinfoResult::Error(message) => {
                    tracing::error!(error = %message, "userinfo request failed");
                    return Err(AuthFailure::new(message));
                },
            },
            None => None,
        };

        Ok(post_process(claims, extra, self.options.role_split()))
    }

    fn principal(&self, claims: ClaimSet, token: &str) -> Principal {
        Principal::new(
            claims,
            &self.options.authentication_type,
            &self.options.name_claim_type,
            &self.options.role_claim_type,
            self.options.save_token.then(|| token.to_owned()),
        )
    }
}

/// Unreachable stores log at `warn`; anything else at `error`.
fn log_cache_error(err: &AuthError, message: &'static str) {
    if err.is_transient_cache_error() {
        tracing::warn!(error = %err, "{message}");
    } else {
        tracing::error!(error = %err, "{message}");
    }
}
