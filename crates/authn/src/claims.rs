//! Claims model and post-processing.
//!
//! A [`Claim`] is a `(type, value)` pair and a [`ClaimSet`] an ordered
//! sequence of them. Several claims may share a type. The functions here are
//! pure: no I/O and no shared state, so they can be reasoned about apart from
//! the validator's concurrency concerns.
//!
//! # Post-processing
//!
//! ```text
//! introspection claims ──┐
//!                        ├── union (by type + value) ──► split role claim ──► final set
//! user-info claims ──────┘                                (optional)
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Claim type carrying OAuth scopes, split into one claim per scope value.
pub const SCOPE_CLAIM_TYPE: &str = "scope";

/// A typed attribute describing the authenticated subject.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Claim {
    /// Claim type, e.g. `sub` or `role`.
    #[serde(rename = "type")]
    pub claim_type: String,
    /// Claim value.
    pub value: String,
}

impl Claim {
    /// Creates a claim from a type and a value.
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self { claim_type: claim_type.into(), value: value.into() }
    }
}

/// An ordered sequence of claims.
///
/// Duplicates are kept as inserted; only [`union`](Self::union) coalesces
/// identical pairs. Serializes as a JSON array of `{"type", "value"}` objects.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimSet(Vec<Claim>);

impl ClaimSet {
    /// Creates an empty claim set.
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a claim.
    pub fn push(&mut self, claim: Claim) {
        self.0.push(claim);
    }

    /// Returns the number of claims.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the set holds no claims.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the claims in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Claim> {
        self.0.iter()
    }

    /// Returns the value of the first claim of `claim_type`.
    #[must_use]
    pub fn find_first(&self, claim_type: &str) -> Option<&str> {
        self.0.iter().find(|c| c.claim_type == claim_type).map(|c| c.value.as_str())
    }

    /// Iterates over every value of `claim_type`.
    pub fn values_of<'a>(&'a self, claim_type: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0.iter().filter(move |c| c.claim_type == claim_type).map(|c| c.value.as_str())
    }

    /// Returns `true` if a claim with exactly this type and value is present.
    #[must_use]
    pub fn contains(&self, claim_type: &str, value: &str) -> bool {
        self.0.iter().any(|c| c.claim_type == claim_type && c.value == value)
    }

    /// Set union by `(type, value)`.
    ///
    /// Yields the distinct claims of `self` in order followed by the claims of
    /// `other` not already present. Identical pairs appear once.
    #[must_use]
    pub fn union(self, other: ClaimSet) -> ClaimSet {
        let mut seen: HashSet<Claim> = HashSet::with_capacity(self.0.len() + other.0.len());
        let mut merged = Vec::with_capacity(self.0.len() + other.0.len());
        for claim in self.0.into_iter().chain(other.0) {
            if seen.insert(claim.clone()) {
                merged.push(claim);
            }
        }
        ClaimSet(merged)
    }

    /// Converts a JSON object into claims.
    ///
    /// - strings become one claim
    /// - numbers and booleans become their JSON text
    /// - arrays produce one claim per element
    /// - nested objects become one claim holding compact JSON
    /// - `null` is dropped
    /// - a `scope` string yields one claim per space-delimited scope
    ///
    /// Members named in `exclude` are skipped.
    #[must_use]
    pub fn from_json_object(object: &Map<String, Value>, exclude: &[&str]) -> ClaimSet {
        let mut claims = ClaimSet::new();
        for (name, value) in object {
            if exclude.contains(&name.as_str()) {
                continue;
            }
            match value {
                Value::String(scopes) if name == SCOPE_CLAIM_TYPE => {
                    for scope in scopes.split_whitespace() {
                        claims.push(Claim::new(name.as_str(), scope));
                    }
                },
                Value::Array(items) => {
                    for item in items {
                        if let Some(text) = json_claim_value(item) {
                            claims.push(Claim::new(name.as_str(), text));
                        }
                    }
                },
                other => {
                    if let Some(text) = json_claim_value(other) {
                        claims.push(Claim::new(name.as_str(), text));
                    }
                },
            }
        }
        claims
    }

    /// Consumes the set, returning the underlying claims.
    #[must_use]
    pub fn into_vec(self) -> Vec<Claim> {
        self.0
    }
}

fn json_claim_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => {
            Some(value.to_string())
        },
    }
}

impl From<Vec<Claim>> for ClaimSet {
    fn from(claims: Vec<Claim>) -> Self {
        Self(claims)
    }
}

impl FromIterator<Claim> for ClaimSet {
    fn from_iter<I: IntoIterator<Item = Claim>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ClaimSet {
    type Item = Claim;
    type IntoIter = std::vec::IntoIter<Claim>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ClaimSet {
    type Item = &'a Claim;
    type IntoIter = std::slice::Iter<'a, Claim>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Role-claim splitting settings.
#[derive(Clone, Copy, Debug)]
pub struct RoleSplit<'a> {
    /// Claim type holding roles.
    pub role_claim_type: &'a str,
    /// Character separating roles inside a single claim value.
    pub separator: char,
}

/// Splits a single multi-valued role claim into one claim per role.
///
/// Applies only when exactly one claim of the role type exists; with zero or
/// several the input is returned unchanged. The original claim is removed and
/// every segment, including empty ones, is unioned in as its own claim, so
/// repeated roles coalesce.
#[must_use]
pub fn split_role_claim(claims: ClaimSet, split: RoleSplit<'_>) -> ClaimSet {
    let role_positions: Vec<usize> = claims
        .iter()
        .enumerate()
        .filter(|(_, c)| c.claim_type == split.role_claim_type)
        .map(|(position, _)| position)
        .collect();
    let [position] = role_positions[..] else {
        return claims;
    };

    let mut remaining = claims.into_vec();
    let combined = remaining.remove(position);
    let roles: ClaimSet = combined
        .value
        .split(split.separator)
        .map(|role| Claim::new(combined.claim_type.as_str(), role))
        .collect();

    ClaimSet::from(remaining).union(roles)
}

/// Produces the final claim set for an active token.
///
/// Unions `userinfo` claims into the introspection claims when present,
/// then applies role splitting when configured.
#[must_use]
pub fn post_process(
    introspection: ClaimSet,
    userinfo: Option<ClaimSet>,
    split: Option<RoleSplit<'_>>,
) -> ClaimSet {
    let merged = match userinfo {
        Some(extra) => introspection.union(extra),
        None => introspection,
    };
    match split {
        Some(split) => split_role_claim(merged, split),
        None => merged,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    const ROLES: RoleSplit<'static> = RoleSplit { role_claim_type: "role", separator: ',' };

    fn set(pairs: &[(&str, &str)]) -> ClaimSet {
        pairs.iter().map(|(t, v)| Claim::new(*t, *v)).collect()
    }

    #[test]
    fn test_split_single_role_claim() {
        let claims = set(&[("sub", "u1"), ("role", "a,b,c")]);
        let result = split_role_claim(claims, ROLES);

        assert_eq!(result, set(&[("sub", "u1"), ("role", "a"), ("role", "b"), ("role", "c")]));
        assert!(!result.contains("role", "a,b,c"));
    }

    #[rstest]
    #[case::no_role_claim(&[("sub", "u1")])]
    #[case::two_role_claims(&[("role", "a,b"), ("role", "c")])]
    fn test_split_is_noop_when_ambiguous(#[case] pairs: &[(&str, &str)]) {
        let claims = set(pairs);
        assert_eq!(split_role_claim(claims.clone(), ROLES), claims);
    }

    #[test]
    fn test_split_without_separator_keeps_single_role() {
        let claims = set(&[("role", "admin")]);
        assert_eq!(split_role_claim(claims, ROLES), set(&[("role", "admin")]));
    }

    #[test]
    fn test_split_keeps_empty_segments_and_coalesces_repeats() {
        let claims = set(&[("role", "a,,a,b,")]);
        assert_eq!(split_role_claim(claims, ROLES), set(&[("role", "a"), ("role", ""), ("role", "b")]));
    }

    #[test]
    fn test_split_keeps_every_segment() {
        let claims = set(&[("sub", "u1"), ("role", "a,,b")]);
        assert_eq!(
            split_role_claim(claims, ROLES),
            set(&[("sub", "u1"), ("role", "a"), ("role", ""), ("role", "b")])
        );
    }

    #[test]
    fn test_split_custom_separator() {
        let claims = set(&[("roles", "x|y")]);
        let split = RoleSplit { role_claim_type: "roles", separator: '|' };
        assert_eq!(split_role_claim(claims, split), set(&[("roles", "x"), ("roles", "y")]));
    }

    #[test]
    fn test_union_coalesces_identical_pairs() {
        let left = set(&[("sub", "u1"), ("email", "a@example.com")]);
        let right = set(&[("email", "a@example.com"), ("name", "Alice")]);

        assert_eq!(
            left.union(right),
            set(&[("sub", "u1"), ("email", "a@example.com"), ("name", "Alice")])
        );
    }

    #[test]
    fn test_union_keeps_same_type_different_values() {
        let left = set(&[("role", "a")]);
        let right = set(&[("role", "b")]);
        assert_eq!(left.union(right), set(&[("role", "a"), ("role", "b")]));
    }

    #[test]
    fn test_post_process_merges_then_splits() {
        let introspection = set(&[("sub", "u1")]);
        let userinfo = set(&[("role", "a,b"), ("sub", "u1")]);

        let result = post_process(introspection, Some(userinfo), Some(ROLES));
        assert_eq!(result, set(&[("sub", "u1"), ("role", "a"), ("role", "b")]));
    }

    #[test]
    fn test_post_process_passthrough() {
        let introspection = set(&[("sub", "u1"), ("sub", "u1")]);
        assert_eq!(post_process(introspection.clone(), None, None), introspection);
    }

    #[test]
    fn test_from_json_object_conversions() {
        let doc = json!({
            "active": true,
            "sub": "u1",
            "scope": "read  write",
            "exp": 1_700_000_000,
            "email_verified": false,
            "aud": ["api1", "api2"],
            "address": {"country": "NL"},
            "nickname": null
        });
        let claims = ClaimSet::from_json_object(doc.as_object().unwrap(), &["active"]);

        assert_eq!(
            claims,
            set(&[
                ("sub", "u1"),
                ("scope", "read"),
                ("scope", "write"),
                ("exp", "1700000000"),
                ("email_verified", "false"),
                ("aud", "api1"),
                ("aud", "api2"),
                ("address", r#"{"country":"NL"}"#),
            ])
        );
    }

    #[test]
    fn test_serialized_shape() {
        let claims = set(&[("sub", "u1")]);
        let json = serde_json::to_string(&claims).unwrap();
        assert_eq!(json, r#"[{"type":"sub","value":"u1"}]"#);
    }

    #[test]
    fn test_lookup_helpers() {
        let claims = set(&[("role", "a"), ("name", "Alice"), ("role", "b")]);
        assert_eq!(claims.find_first("name"), Some("Alice"));
        assert_eq!(claims.values_of("role").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(claims.find_first("missing"), None);
    }

    proptest! {
        #[test]
        fn prop_split_yields_each_distinct_segment(
            roles in proptest::collection::vec("[a-z]{1,8}", 1..10)
        ) {
            let joined = roles.join(",");
            let claims = set(&[("role", joined.as_str())]);
            let result = split_role_claim(claims, ROLES);

            let mut expected: Vec<&str> = Vec::new();
            for role in &roles {
                if !expected.contains(&role.as_str()) {
                    expected.push(role.as_str());
                }
            }
            prop_assert_eq!(result.values_of("role").collect::<Vec<_>>(), expected);
        }

        #[test]
        fn prop_union_has_no_duplicates(
            left in proptest::collection::vec(("[ab]", "[xy]"), 0..8),
            right in proptest::collection::vec(("[ab]", "[xy]"), 0..8),
        ) {
            let left: ClaimSet = left.into_iter().map(|(t, v)| Claim::new(t, v)).collect();
            let right: ClaimSet = right.into_iter().map(|(t, v)| Claim::new(t, v)).collect();
            let merged = left.clone().union(right.clone());

            let distinct: HashSet<&Claim> = merged.iter().collect();
            prop_assert_eq!(distinct.len(), merged.len());
            for claim in left.iter().chain(right.iter()) {
                prop_assert!(merged.contains(&claim.claim_type, &claim.value));
            }
        }
    }
}
