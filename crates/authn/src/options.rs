//! Validator configuration.
//!
//! [`IntrospectionOptions`] can be built in code through its builder or
//! deserialized from a configuration file. Either way it is validated before
//! first use: the builder's `build()` validates, and
//! [`TokenValidator::new`](crate::validator::TokenValidator::new) re-runs
//! [`IntrospectionOptions::validate`] for deserialized values.

use std::{fmt, sync::Arc, time::Duration};

use serde::Deserialize;
use url::Url;

use crate::{
    claims::RoleSplit,
    error::{AuthError, Result},
    extract::{TokenExtractor, TokenSource},
};

/// Default discovery request timeout (10 seconds).
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default introspection and user-info request timeout (30 seconds).
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default discovery document lifetime (24 hours).
const DEFAULT_DISCOVERY_REFRESH: Duration = Duration::from_secs(24 * 60 * 60);

/// Default claim cache lifetime (5 minutes).
const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(5 * 60);

/// How the client authenticates to the introspection endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientCredentialStyle {
    /// HTTP Basic authentication with form-urlencoded id and secret.
    #[default]
    AuthorizationHeader,
    /// `client_id` and `client_secret` form fields.
    PostBody,
}

/// Configuration for [`TokenValidator`](crate::validator::TokenValidator).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use refcheck_authn::IntrospectionOptions;
///
/// let options = IntrospectionOptions::builder()
///     .authority("https://idp.example.com")
///     .client_id("api")
///     .client_secret("s3cret")
///     .enable_caching(true)
///     .cache_duration(Duration::from_secs(120))
///     .build()?;
///
/// assert!(options.enable_caching());
/// # Ok::<(), refcheck_authn::AuthError>(())
/// ```
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntrospectionOptions {
    /// Base URL of the authority, used for endpoint discovery.
    #[serde(default)]
    pub(crate) authority: Option<String>,

    /// Explicit introspection endpoint; bypasses discovery.
    #[serde(default)]
    pub(crate) introspection_endpoint: Option<String>,

    /// Explicit user-info endpoint; bypasses discovery.
    #[serde(default)]
    pub(crate) userinfo_endpoint: Option<String>,

    #[serde(default)]
    pub(crate) client_id: Option<String>,

    #[serde(default)]
    pub(crate) client_secret: Option<String>,

    #[serde(default)]
    pub(crate) client_credential_style: ClientCredentialStyle,

    /// Sent as `token_type_hint`; `None` omits the field.
    #[serde(default = "default_token_type_hint")]
    pub(crate) token_type_hint: Option<String>,

    #[serde(with = "humantime_serde", default = "default_discovery_timeout")]
    pub(crate) discovery_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub(crate) introspection_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub(crate) userinfo_timeout: Duration,

    /// How long a fetched discovery document is reused.
    #[serde(with = "humantime_serde", default = "default_discovery_refresh")]
    pub(crate) discovery_refresh_interval: Duration,

    #[serde(default = "default_true")]
    pub(crate) require_https_discovery: bool,

    #[serde(skip)]
    pub(crate) discovery_client: Option<reqwest::Client>,

    /// Custom transport for introspection; may carry its own client auth.
    #[serde(skip)]
    pub(crate) introspection_client: Option<reqwest::Client>,

    #[serde(skip)]
    pub(crate) userinfo_client: Option<reqwest::Client>,

    #[serde(default = "default_name_claim_type")]
    pub(crate) name_claim_type: String,

    #[serde(default = "default_role_claim_type")]
    pub(crate) role_claim_type: String,

    #[serde(default = "default_authentication_type")]
    pub(crate) authentication_type: String,

    #[serde(default)]
    pub(crate) enable_userinfo: bool,

    #[serde(default)]
    pub(crate) split_role_claims: bool,

    #[serde(default = "default_role_claim_separator")]
    pub(crate) role_claim_separator: char,

    #[serde(default)]
    pub(crate) enable_caching: bool,

    #[serde(with = "humantime_serde", default = "default_cache_duration")]
    pub(crate) cache_duration: Duration,

    /// Prepended to the hashed token to form cache keys.
    #[serde(default)]
    pub(crate) cache_key_prefix: String,

    /// Skip tokens containing `.`, which look self-contained rather than opaque.
    #[serde(default)]
    pub(crate) skip_tokens_with_dots: bool,

    /// Keep the raw token on the resulting principal.
    #[serde(default)]
    pub(crate) save_token: bool,

    #[serde(default = "default_token_sources")]
    pub(crate) token_sources: Vec<TokenSource>,

    /// Replaces `token_sources` when set.
    #[serde(skip)]
    pub(crate) token_extractor: Option<Arc<dyn TokenExtractor>>,
}

fn default_token_type_hint() -> Option<String> {
    Some("access_token".to_owned())
}

fn default_discovery_timeout() -> Duration {
    DEFAULT_DISCOVERY_TIMEOUT
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_discovery_refresh() -> Duration {
    DEFAULT_DISCOVERY_REFRESH
}

fn default_cache_duration() -> Duration {
    DEFAULT_CACHE_DURATION
}

fn default_true() -> bool {
    true
}

fn default_name_claim_type() -> String {
    "name".to_owned()
}

fn default_role_claim_type() -> String {
    "role".to_owned()
}

fn default_authentication_type() -> String {
    "Bearer".to_owned()
}

fn default_role_claim_separator() -> char {
    ','
}

fn default_token_sources() -> Vec<TokenSource> {
    vec![TokenSource::bearer_header()]
}

impl fmt::Debug for IntrospectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntrospectionOptions")
            .field("authority", &self.authority)
            .field("introspection_endpoint", &self.introspection_endpoint)
            .field("userinfo_endpoint", &self.userinfo_endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("client_credential_style", &self.client_credential_style)
            .field("token_type_hint", &self.token_type_hint)
            .field("discovery_timeout", &self.discovery_timeout)
            .field("introspection_timeout", &self.introspection_timeout)
            .field("userinfo_timeout", &self.userinfo_timeout)
            .field("discovery_refresh_interval", &self.discovery_refresh_interval)
            .field("require_https_discovery", &self.require_https_discovery)
            .field("custom_introspection_client", &self.introspection_client.is_some())
            .field("name_claim_type", &self.name_claim_type)
            .field("role_claim_type", &self.role_claim_type)
            .field("authentication_type", &self.authentication_type)
            .field("enable_userinfo", &self.enable_userinfo)
            .field("split_role_claims", &self.split_role_claims)
            .field("role_claim_separator", &self.role_claim_separator)
            .field("enable_caching", &self.enable_caching)
            .field("cache_duration", &self.cache_duration)
            .field("cache_key_prefix", &self.cache_key_prefix)
            .field("skip_tokens_with_dots", &self.skip_tokens_with_dots)
            .field("save_token", &self.save_token)
            .field("token_sources", &self.token_sources)
            .field("custom_token_extractor", &self.token_extractor.is_some())
            .finish()
    }
}

#[bon::bon]
impl IntrospectionOptions {
    /// Creates validated options.
    ///
    /// # Required
    ///
    /// * `authority` or `introspection_endpoint`
    /// * `client_id` or `introspection_client`
    /// * `authority` or `userinfo_endpoint` when `enable_userinfo` is set
    ///
    /// Every other field has a default; see the field list in the crate docs.
    /// An empty `token_type_hint` omits the hint from introspection requests.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if [`validate`](Self::validate) fails.
    #[builder]
    pub fn new(
        #[builder(into)] authority: Option<String>,
        #[builder(into)] introspection_endpoint: Option<String>,
        #[builder(into)] userinfo_endpoint: Option<String>,
        #[builder(into)] client_id: Option<String>,
        #[builder(into)] client_secret: Option<String>,
        #[builder(default)] client_credential_style: ClientCredentialStyle,
        #[builder(into, default = "access_token".to_owned())] token_type_hint: String,
        #[builder(default = DEFAULT_DISCOVERY_TIMEOUT)] discovery_timeout: Duration,
        #[builder(default = DEFAULT_REQUEST_TIMEOUT)] introspection_timeout: Duration,
        #[builder(default = DEFAULT_REQUEST_TIMEOUT)] userinfo_timeout: Duration,
        #[builder(default = DEFAULT_DISCOVERY_REFRESH)] discovery_refresh_interval: Duration,
        #[builder(default = true)] require_https_discovery: bool,
        discovery_client: Option<reqwest::Client>,
        introspection_client: Option<reqwest::Client>,
        userinfo_client: Option<reqwest::Client>,
        #[builder(into, default = default_name_claim_type())] name_claim_type: String,
        #[builder(into, default = default_role_claim_type())] role_claim_type: String,
        #[builder(into, default = default_authentication_type())] authentication_type: String,
        #[builder(default)] enable_userinfo: bool,
        #[builder(default)] split_role_claims: bool,
        #[builder(default = default_role_claim_separator())] role_claim_separator: char,
        #[builder(default)] enable_caching: bool,
        #[builder(default = DEFAULT_CACHE_DURATION)] cache_duration: Duration,
        #[builder(into, default)] cache_key_prefix: String,
        #[builder(default)] skip_tokens_with_dots: bool,
        #[builder(default)] save_token: bool,
        #[builder(default = default_token_sources())] token_sources: Vec<TokenSource>,
        token_extractor: Option<Arc<dyn TokenExtractor>>,
    ) -> Result<Self> {
        let options = Self {
            authority,
            introspection_endpoint,
            userinfo_endpoint,
            client_id,
            client_secret,
            client_credential_style,
            token_type_hint: non_blank(Some(token_type_hint.as_str())).map(str::to_owned),
            discovery_timeout,
            introspection_timeout,
            userinfo_timeout,
            discovery_refresh_interval,
            require_https_discovery,
            discovery_client,
            introspection_client,
            userinfo_client,
            name_claim_type,
            role_claim_type,
            authentication_type,
            enable_userinfo,
            split_role_claims,
            role_claim_separator,
            enable_caching,
            cache_duration,
            cache_key_prefix,
            skip_tokens_with_dots,
            save_token,
            token_sources,
            token_extractor,
        };
        options.validate()?;
        Ok(options)
    }

    /// Checks that the options are complete and consistent.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if:
    /// - neither `authority` nor `introspection_endpoint` is set
    /// - neither `client_id` nor `introspection_client` is set
    /// - user-info is enabled but neither `authority` nor `userinfo_endpoint` is set
    /// - there is no token source and no custom extractor
    /// - caching is enabled with a zero `cache_duration`
    /// - a configured URL is not absolute
    pub fn validate(&self) -> Result<()> {
        let has_authority = is_set(self.authority.as_deref());

        if !has_authority && !is_set(self.introspection_endpoint.as_deref()) {
            return Err(AuthError::config("either authority or introspection_endpoint must be set"));
        }

        if !is_set(self.client_id.as_deref()) && self.introspection_client.is_none() {
            return Err(AuthError::config(
                "either client_id or a custom introspection_client must be set",
            ));
        }

        if self.enable_userinfo && !has_authority && !is_set(self.userinfo_endpoint.as_deref()) {
            return Err(AuthError::config(
                "enable_userinfo requires either authority or userinfo_endpoint",
            ));
        }

        if self.token_sources.is_empty() && self.token_extractor.is_none() {
            return Err(AuthError::config("at least one token source is required"));
        }

        if self.enable_caching && self.cache_duration.is_zero() {
            return Err(AuthError::config("cache_duration must be non-zero when caching is enabled"));
        }

        for (name, value) in [
            ("authority", &self.authority),
            ("introspection_endpoint", &self.introspection_endpoint),
            ("userinfo_endpoint", &self.userinfo_endpoint),
        ] {
            if let Some(value) = non_blank(value.as_deref()) {
                parse_url(name, value)?;
            }
        }

        Ok(())
    }

    /// Returns the authority base URL, if configured.
    #[must_use]
    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// Returns the explicit introspection endpoint, if configured.
    #[must_use]
    pub fn introspection_endpoint(&self) -> Option<&str> {
        self.introspection_endpoint.as_deref()
    }

    /// Returns the client identifier, if configured.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Returns the client credential style.
    #[must_use]
    pub fn client_credential_style(&self) -> ClientCredentialStyle {
        self.client_credential_style
    }

    /// Returns whether user-info enrichment is enabled.
    #[must_use]
    pub fn enable_userinfo(&self) -> bool {
        self.enable_userinfo
    }

    /// Returns whether claim caching is enabled.
    #[must_use]
    pub fn enable_caching(&self) -> bool {
        self.enable_caching
    }

    /// Returns the maximum lifetime of a cached claim set.
    #[must_use]
    pub fn cache_duration(&self) -> Duration {
        self.cache_duration
    }

    /// Returns whether dot-containing tokens are skipped.
    #[must_use]
    pub fn skip_tokens_with_dots(&self) -> bool {
        self.skip_tokens_with_dots
    }

    /// Returns the configured token sources.
    #[must_use]
    pub fn token_sources(&self) -> &[TokenSource] {
        &self.token_sources
    }

    /// Role splitting settings, when enabled.
    pub(crate) fn role_split(&self) -> Option<RoleSplit<'_>> {
        self.split_role_claims.then(|| RoleSplit {
            role_claim_type: &self.role_claim_type,
            separator: self.role_claim_separator,
        })
    }

    /// The extractor used by `authenticate`.
    pub(crate) fn extractor(&self) -> &dyn TokenExtractor {
        match &self.token_extractor {
            Some(custom) => custom.as_ref(),
            None => &self.token_sources,
        }
    }
}

fn is_set(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

/// Parses a configured URL, requiring an absolute HTTP(S) URL.
pub(crate) fn parse_url(name: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value)
        .map_err(|e| AuthError::config(format!("{name} is not a valid URL ({value}): {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(AuthError::config(format!("{name} must be an http(s) URL, got '{scheme}'"))),
    }
}

/// Returns a trimmed, non-empty value.
pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
