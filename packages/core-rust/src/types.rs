use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A typed assertion about a principal, e.g. `permission = write:docs`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Claim {
    /// Claim type (`permission`, `dept`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Claim value.
    pub value: String,
}

impl Claim {
    #[must_use]
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// Authenticated identity evaluated by the authorization resolver.
///
/// Obtained once per request (from eager extraction or the authentication
/// provider) and shared as `Arc<Principal>` afterwards; never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Unique identifier for the authenticated entity.
    pub id: String,
    pub username: String,
    pub email: String,
    /// Roles assigned to this principal for authorization checks.
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Claims carried by this principal.
    #[serde(default)]
    pub claims: BTreeSet<Claim>,
}

impl Principal {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    #[must_use]
    pub fn with_claim(mut self, kind: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.insert(Claim::new(kind, value));
        self
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Returns true if the principal holds at least one of `roles`.
    #[must_use]
    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|r| self.has_role(r.as_ref()))
    }

    /// Returns true if a claim of type `kind` exists and, when `value` is
    /// given, carries exactly that value.
    #[must_use]
    pub fn has_claim(&self, kind: &str, value: Option<&str>) -> bool {
        self.claims
            .iter()
            .any(|c| c.kind == kind && value.is_none_or(|v| c.value == v))
    }

    /// Roles in their stable (sorted) order, as stored on the context record.
    #[must_use]
    pub fn role_list(&self) -> Vec<String> {
        self.roles.iter().cloned().collect()
    }
}
