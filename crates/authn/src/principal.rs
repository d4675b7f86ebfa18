//! The authenticated identity handed back to the host.

use std::fmt;

use crate::claims::{Claim, ClaimSet};

/// Identity built from a validated token's final claim set.
///
/// Name and role lookups go through the configured claim types, so a host
/// can map e.g. `preferred_username` to the name without rewriting claims.
#[derive(Clone, PartialEq, Eq)]
pub struct Principal {
    claims: ClaimSet,
    authentication_type: String,
    name_claim_type: String,
    role_claim_type: String,
    token: Option<String>,
}

impl Principal {
    pub(crate) fn new(
        claims: ClaimSet,
        authentication_type: &str,
        name_claim_type: &str,
        role_claim_type: &str,
        token: Option<String>,
    ) -> Self {
        Self {
            claims,
            authentication_type: authentication_type.to_owned(),
            name_claim_type: name_claim_type.to_owned(),
            role_claim_type: role_claim_type.to_owned(),
            token,
        }
    }

    /// The final claim set.
    #[must_use]
    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    /// Scheme label, `"Bearer"` by default.
    #[must_use]
    pub fn authentication_type(&self) -> &str {
        &self.authentication_type
    }

    /// First value of the name claim type.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.claims.find_first(&self.name_claim_type)
    }

    /// Every value of the role claim type, in claim order.
    pub fn roles(&self) -> impl Iterator<Item = &str> + '_ {
        self.claims.values_of(&self.role_claim_type)
    }

    /// Returns `true` if a role claim with exactly this value exists.
    #[must_use]
    pub fn is_in_role(&self, role: &str) -> bool {
        self.claims.contains(&self.role_claim_type, role)
    }

    /// Returns the first claim of `claim_type`.
    #[must_use]
    pub fn find_first(&self, claim_type: &str) -> Option<&Claim> {
        self.claims.iter().find(|c| c.claim_type == claim_type)
    }

    /// The raw token, present only when the validator saves tokens.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("claims", &self.claims)
            .field("authentication_type", &self.authentication_type)
            .field("name_claim_type", &self.name_claim_type)
            .field("role_claim_type", &self.role_claim_type)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn principal(token: Option<&str>) -> Principal {
        let claims: ClaimSet = vec![
            Claim::new("sub", "u1"),
            Claim::new("preferred_username", "alice"),
            Claim::new("groups", "admin"),
            Claim::new("groups", "ops"),
        ]
        .into();
        Principal::new(claims, "Bearer", "preferred_username", "groups", token.map(str::to_owned))
    }

    #[test]
    fn test_name_and_roles_follow_configured_types() {
        let principal = principal(None);
        assert_eq!(principal.name(), Some("alice"));
        assert_eq!(principal.roles().collect::<Vec<_>>(), vec!["admin", "ops"]);
        assert!(principal.is_in_role("ops"));
        assert!(!principal.is_in_role("Ops"));
        assert_eq!(principal.find_first("sub").map(|c| c.value.as_str()), Some("u1"));
        assert_eq!(principal.authentication_type(), "Bearer");
    }

    #[test]
    fn test_token_kept_but_not_printed() {
        let principal = principal(Some("opaque-secret"));
        assert_eq!(principal.token(), Some("opaque-secret"));
        assert!(!format!("{principal:?}").contains("opaque-secret"));
    }
}
