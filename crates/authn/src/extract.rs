//! Token extraction from incoming requests.
//!
//! [`TokenSource`] covers the common places a bearer token travels. Hosts
//! with unusual transports implement [`TokenExtractor`] themselves and plug
//! it into the options.

use http::request::Parts;
use serde::{Deserialize, Serialize};

/// Pulls a raw token out of a request.
pub trait TokenExtractor: Send + Sync {
    /// Returns the token carried by `parts`, or `None` if absent or empty.
    fn extract(&self, parts: &Parts) -> Option<String>;
}

/// A built-in place to look for a token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenSource {
    /// A request header, optionally prefixed with an authentication scheme.
    ///
    /// The scheme is matched case-insensitively and must be followed by a
    /// space, e.g. `Authorization: Bearer <token>`.
    Header {
        /// Header name.
        name: String,
        /// Required scheme prefix, if any.
        #[serde(default)]
        scheme: Option<String>,
    },
    /// A query-string parameter.
    Query {
        /// Parameter name.
        name: String,
    },
}

impl TokenSource {
    /// `Authorization: Bearer <token>`.
    #[must_use]
    pub fn bearer_header() -> Self {
        Self::Header {
            name: http::header::AUTHORIZATION.as_str().to_owned(),
            scheme: Some("Bearer".into()),
        }
    }

    /// A query-string parameter named `name`.
    #[must_use]
    pub fn query(name: impl Into<String>) -> Self {
        Self::Query { name: name.into() }
    }
}

impl TokenExtractor for TokenSource {
    fn extract(&self, parts: &Parts) -> Option<String> {
        let token = match self {
            Self::Header { name, scheme } => {
                let value = parts.headers.get(name.as_str())?.to_str().ok()?.trim();
                match scheme {
                    Some(scheme) => {
                        let (prefix, rest) = value.split_once(' ')?;
                        if !prefix.eq_ignore_ascii_case(scheme) {
                            return None;
                        }
                        rest.trim().to_owned()
                    },
                    None => value.to_owned(),
                }
            },
            Self::Query { name } => {
                let query = parts.uri.query()?;
                url::form_urlencoded::parse(query.as_bytes())
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| value.into_owned())?
            },
        };
        (!token.is_empty()).then_some(token)
    }
}

/// Sources are tried in order; the first non-empty token wins.
impl TokenExtractor for [TokenSource] {
    fn extract(&self, parts: &Parts) -> Option<String> {
        self.iter().find_map(|source| source.extract(parts))
    }
}

impl TokenExtractor for Vec<TokenSource> {
    fn extract(&self, parts: &Parts) -> Option<String> {
        self.as_slice().extract(parts)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use http::Request;
    use rstest::rstest;

    use super::*;

    fn parts(uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[rstest]
    #[case("Bearer abc123", Some("abc123"))]
    #[case("bearer abc123", Some("abc123"))]
    #[case("BEARER   abc123  ", Some("abc123"))]
    #[case("Basic dXNlcjpwYXNz", None)]
    #[case("Bearer", None)]
    #[case("Bearer ", None)]
    #[case("Bearerabc", None)]
    fn test_bearer_header(#[case] header: &str, #[case] expected: Option<&str>) {
        let request = parts("/", &[("authorization", header)]);
        assert_eq!(TokenSource::bearer_header().extract(&request).as_deref(), expected);
    }

    #[test]
    fn test_header_without_scheme_takes_whole_value() {
        let source = TokenSource::Header { name: "x-api-token".into(), scheme: None };
        let request = parts("/", &[("x-api-token", "  opaque-value ")]);
        assert_eq!(source.extract(&request).as_deref(), Some("opaque-value"));
    }

    #[test]
    fn test_query_parameter_is_decoded() {
        let source = TokenSource::query("access_token");
        let request = parts("/items?page=2&access_token=a%2Bb%3D", &[]);
        assert_eq!(source.extract(&request).as_deref(), Some("a+b="));

        let empty = parts("/items?access_token=", &[]);
        assert_eq!(source.extract(&empty), None);
    }

    #[test]
    fn test_sources_tried_in_order() {
        let sources = vec![TokenSource::bearer_header(), TokenSource::query("access_token")];

        let header_and_query =
            parts("/?access_token=from-query", &[("authorization", "Bearer from-header")]);
        assert_eq!(sources.extract(&header_and_query).as_deref(), Some("from-header"));

        let query_only = parts("/?access_token=from-query", &[]);
        assert_eq!(sources.extract(&query_only).as_deref(), Some("from-query"));

        let neither = parts("/", &[]);
        assert_eq!(sources.extract(&neither), None);
    }

    #[test]
    fn test_source_deserializes_from_tagged_json() {
        let sources: Vec<TokenSource> = serde_json::from_str(
            r#"[
                {"kind": "header", "name": "authorization", "scheme": "Bearer"},
                {"kind": "query", "name": "access_token"}
            ]"#,
        )
        .unwrap();
        assert_eq!(sources, vec![TokenSource::bearer_header(), TokenSource::query("access_token")]);
    }
}
