//! # Refcheck Authentication
//!
//! Validation of opaque OAuth 2.0 reference tokens through token
//! introspection (RFC 7662).
//!
//! This crate provides:
//! - **Validation**: [`TokenValidator`] maps a token to `NoResult`, `Skip`, `Fail`, or `Success`
//! - **Single-flight**: concurrent validations of one token share one remote call
//! - **Claim caching**: processed claim sets stored in any [`StorageBackend`]
//! - **Claims post-processing**: user-info union and role-claim splitting
//!
//! ## Features
//!
//! - Endpoints configured explicitly or discovered from the authority
//! - Raw tokens never reach the cache backend or the logs
//! - Failures are never cached
//!
//! ## Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use refcheck_authn::{AuthenticationResult, IntrospectionOptions, TokenValidator};
//! use refcheck_storage::MemoryBackend;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = IntrospectionOptions::builder()
//!     .authority("https://idp.example.com")
//!     .client_id("api")
//!     .client_secret("s3cret")
//!     .enable_caching(true)
//!     .cache_duration(Duration::from_secs(300))
//!     .build()?;
//!
//! let validator = TokenValidator::new(options, Some(Arc::new(MemoryBackend::new())))?;
//!
//! match validator.validate("2YotnFZFEjr1zCsicMWpAA").await {
//!     AuthenticationResult::Success(principal) => println!("hello {:?}", principal.name()),
//!     AuthenticationResult::Fail(failure) => println!("rejected: {failure}"),
//!     AuthenticationResult::NoResult | AuthenticationResult::Skip => {},
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [`StorageBackend`]: refcheck_storage::StorageBackend

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Remote authority interface.
pub mod authority;
/// Claim-set cache adapter.
pub mod cache;
/// Claims model and post-processing.
pub mod claims;
/// OpenID Connect discovery.
pub mod discovery;
/// Authentication error types.
pub mod error;
/// Token extraction from requests.
pub mod extract;
/// HTTP token authority.
pub mod http_authority;
/// Validator configuration.
pub mod options;
/// Authenticated identity.
pub mod principal;
/// Per-key single-flight registry.
pub mod single_flight;
/// Test helpers.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
/// Reference-token validation.
pub mod validator;

// Re-export key types for convenience
pub use authority::{IntrospectionResult, TokenAuthority, UserinfoResult};
pub use cache::ClaimsCache;
pub use claims::{Claim, ClaimSet, RoleSplit, post_process, split_role_claim};
pub use error::{AuthError, Result};
pub use extract::{TokenExtractor, TokenSource};
pub use http_authority::HttpTokenAuthority;
pub use options::{ClientCredentialStyle, IntrospectionOptions};
pub use principal::Principal;
pub use single_flight::SingleFlight;
pub use validator::{AuthFailure, AuthenticationResult, TokenValidator};
