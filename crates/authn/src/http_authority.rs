//! HTTP implementation of [`TokenAuthority`].
//!
//! Performs RFC 7662 token introspection and OIDC user-info requests with
//! [`reqwest`]. Endpoints come from the options or, when absent, from the
//! authority's discovery document.
//!
//! Each call is a single request with its own timeout. Nothing is retried;
//! a failure is reported as an `Error` result for that call only.

use std::fmt;

use async_trait::async_trait;
use http::header::ACCEPT;
use serde_json::Value;
use url::Url;

use crate::{
    authority::{IntrospectionResult, TokenAuthority, UserinfoResult},
    claims::ClaimSet,
    discovery::{DiscoveryClient, DiscoveryDocument},
    error::{AuthError, Result},
    options::{ClientCredentialStyle, IntrospectionOptions, non_blank, parse_url},
};

/// The `active` member of an introspection response.
const ACTIVE: &str = "active";

/// Introspection and user-info over HTTP.
#[derive(Clone)]
pub struct HttpTokenAuthority {
    authority: Option<Url>,
    introspection_endpoint: Option<Url>,
    userinfo_endpoint: Option<Url>,
    discovery: Option<DiscoveryClient>,
    introspection_client: reqwest::Client,
    userinfo_client: reqwest::Client,
    introspection_timeout: std::time::Duration,
    userinfo_timeout: std::time::Duration,
    client_id: Option<String>,
    client_secret: Option<String>,
    credential_style: ClientCredentialStyle,
    token_type_hint: Option<String>,
}

impl fmt::Debug for HttpTokenAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTokenAuthority")
            .field("authority", &self.authority.as_ref().map(Url::as_str))
            .field("introspection_endpoint", &self.introspection_endpoint.as_ref().map(Url::as_str))
            .field("userinfo_endpoint", &self.userinfo_endpoint.as_ref().map(Url::as_str))
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("credential_style", &self.credential_style)
            .finish_non_exhaustive()
    }
}

impl HttpTokenAuthority {
    /// Builds an authority from validated options.
    ///
    /// Custom transports from the options are used as given; otherwise a
    /// default [`reqwest::Client`] is shared by all three call kinds.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if a configured URL does not parse or
    /// the default HTTP client cannot be constructed.
    pub fn from_options(options: &IntrospectionOptions) -> Result<Self> {
        let parse = |name: &str, value: Option<&str>| -> Result<Option<Url>> {
            non_blank(value).map(|v| parse_url(name, v)).transpose()
        };
        let authority = parse("authority", options.authority.as_deref())?;
        let introspection_endpoint =
            parse("introspection_endpoint", options.introspection_endpoint.as_deref())?;
        let userinfo_endpoint = parse("userinfo_endpoint", options.userinfo_endpoint.as_deref())?;

        let default_client = reqwest::Client::builder()
            .build()
            .map_err(|e| AuthError::config(format!("failed to build HTTP client: {e}")))?;

        let discovery = authority.as_ref().map(|_| {
            DiscoveryClient::new(
                options.discovery_client.clone().unwrap_or_else(|| default_client.clone()),
                options.discovery_timeout,
                options.discovery_refresh_interval,
                options.require_https_discovery,
            )
        });

        Ok(Self {
            authority,
            introspection_endpoint,
            userinfo_endpoint,
            discovery,
            introspection_client: options
                .introspection_client
                .clone()
                .unwrap_or_else(|| default_client.clone()),
            userinfo_client: options.userinfo_client.clone().unwrap_or(default_client),
            introspection_timeout: options.introspection_timeout,
            userinfo_timeout: options.userinfo_timeout,
            client_id: non_blank(options.client_id.as_deref()).map(str::to_owned),
            client_secret: options.client_secret.clone(),
            credential_style: options.client_credential_style,
            token_type_hint: options.token_type_hint.clone(),
        })
    }

    /// Resolves an endpoint: explicit configuration first, then discovery.
    async fn endpoint(
        &self,
        explicit: Option<&Url>,
        name: &str,
        select: fn(&DiscoveryDocument) -> Option<&str>,
    ) -> Result<Url> {
        if let Some(url) = explicit {
            return Ok(url.clone());
        }
        let (Some(authority), Some(discovery)) = (&self.authority, &self.discovery) else {
            return Err(AuthError::config(format!("no {name} configured")));
        };

        let document = discovery.resolve(authority).await?;
        let endpoint = select(&document)
            .ok_or_else(|| AuthError::discovery_failed(format!("discovery document has no {name}")))?;
        Url::parse(endpoint)
            .map_err(|e| AuthError::discovery_failed(format!("discovered {name} is invalid: {e}")))
    }

    async fn try_introspect(&self, token: &str) -> Result<IntrospectionResult> {
        let url = self
            .endpoint(self.introspection_endpoint.as_ref(), "introspection_endpoint", |d| {
                d.introspection_endpoint.as_deref()
            })
            .await?;

        let mut form: Vec<(&str, &str)> = vec![("token", token)];
        if let Some(hint) = &self.token_type_hint {
            form.push(("token_type_hint", hint.as_str()));
        }

        let mut request = self
            .introspection_client
            .post(url.as_str())
            .header(ACCEPT, "application/json")
            .timeout(self.introspection_timeout);

        match self.credential_style {
            ClientCredentialStyle::AuthorizationHeader => {
                if let Some(client_id) = &self.client_id {
                    request = request.basic_auth(
                        form_encode(client_id),
                        Some(form_encode(self.client_secret.as_deref().unwrap_or_default())),
                    );
                }
            },
            ClientCredentialStyle::PostBody => {
                if let Some(client_id) = &self.client_id {
                    form.push(("client_id", client_id.as_str()));
                }
                if let Some(secret) = &self.client_secret {
                    form.push(("client_secret", secret.as_str()));
                }
            },
        }

        let response = request
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::introspection_failed(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::introspection_failed(format!("{url} returned {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AuthError::invalid_introspection_response(e.to_string()))?;
        introspection_from_json(&body)
    }

    async fn try_fetch_userinfo(&self, token: &str) -> Result<ClaimSet> {
        let url = self
            .endpoint(self.userinfo_endpoint.as_ref(), "userinfo_endpoint", |d| {
                d.userinfo_endpoint.as_deref()
            })
            .await?;

        let response = self
            .userinfo_client
            .get(url.as_str())
            .header(ACCEPT, "application/json")
            .bearer_auth(token)
            .timeout(self.userinfo_timeout)
            .send()
            .await
            .map_err(|e| AuthError::userinfo_failed(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::userinfo_failed(format!("{url} returned {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AuthError::userinfo_failed(format!("invalid JSON: {e}")))?;
        let Value::Object(object) = &body else {
            return Err(AuthError::userinfo_failed("response is not a JSON object"));
        };
        Ok(ClaimSet::from_json_object(object, &[]))
    }
}

#[async_trait]
impl TokenAuthority for HttpTokenAuthority {
    #[tracing::instrument(skip_all)]
    async fn introspect(&self, token: &str) -> IntrospectionResult {
        self.try_introspect(token).await.unwrap_or_else(IntrospectionResult::from)
    }

    #[tracing::instrument(skip_all)]
    async fn fetch_userinfo(&self, token: &str) -> UserinfoResult {
        match self.try_fetch_userinfo(token).await {
            Ok(claims) => UserinfoResult::Success(claims),
            Err(err) => err.into(),
        }
    }
}

/// Interprets an RFC 7662 response document.
pub(crate) fn introspection_from_json(body: &Value) -> Result<IntrospectionResult> {
    let Value::Object(object) = body else {
        return Err(AuthError::invalid_introspection_response("response is not a JSON object"));
    };
    match object.get(ACTIVE) {
        Some(Value::Bool(true)) => {
            Ok(IntrospectionResult::Active(ClaimSet::from_json_object(object, &[ACTIVE])))
        },
        Some(Value::Bool(false)) => Ok(IntrospectionResult::Inactive),
        Some(other) => Err(AuthError::invalid_introspection_response(format!(
            "'active' must be a boolean, got {other}"
        ))),
        None => Err(AuthError::invalid_introspection_response("missing 'active' member")),
    }
}

/// RFC 6749 section 2.3.1: client credentials are form-urlencoded before Basic encoding.
fn form_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::claims::Claim;

    #[test]
    fn test_active_response_becomes_claims_without_active() {
        let body = json!({
            "active": true,
            "sub": "u1",
            "scope": "read write",
            "exp": 1_900_000_000,
            "aud": ["api", "web"],
            "client_id": null
        });
        let IntrospectionResult::Active(claims) = introspection_from_json(&body).unwrap() else {
            panic!("expected an active result");
        };

        assert_eq!(
            claims.into_vec(),
            vec![
                Claim::new("sub", "u1"),
                Claim::new("scope", "read"),
                Claim::new("scope", "write"),
                Claim::new("exp", "1900000000"),
                Claim::new("aud", "api"),
                Claim::new("aud", "web"),
            ]
        );
    }

    #[test]
    fn test_inactive_response() {
        let result = introspection_from_json(&json!({"active": false, "sub": "u1"})).unwrap();
        assert_eq!(result, IntrospectionResult::Inactive);
    }

    #[test]
    fn test_malformed_responses_are_errors() {
        for body in [json!({"sub": "u1"}), json!({"active": "true"}), json!([1, 2]), json!("ok")] {
            let err = introspection_from_json(&body).unwrap_err();
            assert!(matches!(err, AuthError::InvalidIntrospectionResponse(_)), "{body}");
        }
    }

    #[test]
    fn test_form_encode_escapes_reserved_characters() {
        assert_eq!(form_encode("plain"), "plain");
        assert_eq!(form_encode("a b:c&d"), "a+b%3Ac%26d");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let options = IntrospectionOptions::builder()
            .introspection_endpoint("https://idp.example.com/introspect")
            .client_id("api")
            .client_secret("hunter2")
            .build()
            .unwrap();
        let authority = HttpTokenAuthority::from_options(&options).unwrap();
        let debug = format!("{authority:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("https://idp.example.com/introspect"));
    }
}
