//! Authorization requirement declarations.
//!
//! Requirements are declared at two granularities: on a group of operations
//! (e.g. every route under `/admin`) and on a single operation. Both levels
//! are captured in [`OperationRequirements`] when the operation is
//! registered; [`crate::authz::merge`] resolves them into the effective set.

use serde::{Deserialize, Serialize};

use crate::error::RequirementError;
use crate::types::Principal;

/// A single claim predicate: type must match, value must match when given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimRequirement {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ClaimRequirement {
    /// Requires a claim of `kind` with exactly `value`.
    #[must_use]
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: Some(value.into()),
        }
    }

    /// Requires any claim of `kind`, whatever its value.
    #[must_use]
    pub fn of_type(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: None,
        }
    }

    #[must_use]
    pub fn is_satisfied_by(&self, principal: &Principal) -> bool {
        principal.has_claim(&self.kind, self.value.as_deref())
    }
}

/// The claim declaration of one level: a single pair or an ordered AND list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimDeclaration {
    Single(ClaimRequirement),
    Set(Vec<ClaimRequirement>),
}

impl ClaimDeclaration {
    /// Predicates in declaration order.
    #[must_use]
    pub fn requirements(&self) -> &[ClaimRequirement] {
        match self {
            Self::Single(req) => std::slice::from_ref(req),
            Self::Set(reqs) => reqs,
        }
    }

    /// Returns the first predicate the principal does not satisfy.
    #[must_use]
    pub fn first_unmet(&self, principal: &Principal) -> Option<&ClaimRequirement> {
        self.requirements()
            .iter()
            .find(|req| !req.is_satisfied_by(principal))
    }
}

/// Tagged form of a single authorization predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthorizationRequirement {
    /// Bypass all checks.
    Public,
    /// At least one role must match (OR).
    RoleSet { roles: Vec<String> },
    /// A single claim predicate.
    Claim(ClaimRequirement),
    /// Every predicate must match (AND).
    ClaimSet { requirements: Vec<ClaimRequirement> },
}

impl AuthorizationRequirement {
    #[must_use]
    pub fn is_satisfied_by(&self, principal: &Principal) -> bool {
        match self {
            Self::Public => true,
            Self::RoleSet { roles } => principal.has_any_role(roles),
            Self::Claim(req) => req.is_satisfied_by(principal),
            Self::ClaimSet { requirements } => {
                requirements.iter().all(|req| req.is_satisfied_by(principal))
            }
        }
    }
}

/// Requirement declarations of one level (group or operation).
///
/// Holds at most one role set and at most one claim declaration; declaring
/// a second claim declaration replaces the first. Fields are only reachable
/// through the validating builders, including when deserializing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRequirements")]
pub struct Requirements {
    public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    claims: Option<ClaimDeclaration>,
}

/// Unvalidated wire form of [`Requirements`].
#[derive(Deserialize)]
struct RawRequirements {
    #[serde(default)]
    public: bool,
    #[serde(default)]
    roles: Option<Vec<String>>,
    #[serde(default)]
    claims: Option<ClaimDeclaration>,
}

impl TryFrom<RawRequirements> for Requirements {
    type Error = RequirementError;

    fn try_from(raw: RawRequirements) -> Result<Self, Self::Error> {
        let mut reqs = Self::new();
        if raw.public {
            reqs = reqs.public();
        }
        if let Some(roles) = raw.roles {
            reqs = reqs.roles(roles)?;
        }
        match raw.claims {
            Some(ClaimDeclaration::Single(claim)) => reqs.claim(claim),
            Some(ClaimDeclaration::Set(claims)) => reqs.claims(claims),
            None => Ok(reqs),
        }
    }
}

impl Requirements {
    /// A level with nothing declared.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the level public.
    #[must_use]
    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    /// Declares a role set satisfied by any one of `roles`.
    ///
    /// # Errors
    ///
    /// Returns [`RequirementError::EmptyRoleSet`] when `roles` is empty.
    pub fn roles<I, S>(mut self, roles: I) -> Result<Self, RequirementError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles: Vec<String> = roles.into_iter().map(Into::into).collect();
        if roles.is_empty() {
            return Err(RequirementError::EmptyRoleSet);
        }
        self.roles = Some(roles);
        Ok(self)
    }

    /// Declares a single claim predicate.
    ///
    /// # Errors
    ///
    /// Returns [`RequirementError::EmptyClaimType`] when the claim type is empty.
    pub fn claim(mut self, claim: ClaimRequirement) -> Result<Self, RequirementError> {
        if claim.kind.is_empty() {
            return Err(RequirementError::EmptyClaimType);
        }
        self.claims = Some(ClaimDeclaration::Single(claim));
        Ok(self)
    }

    /// Declares an ordered list of claim predicates, all of which must hold.
    ///
    /// # Errors
    ///
    /// Returns [`RequirementError::EmptyClaimType`] when any claim type is empty.
    pub fn claims<I>(mut self, claims: I) -> Result<Self, RequirementError>
    where
        I: IntoIterator<Item = ClaimRequirement>,
    {
        let claims: Vec<ClaimRequirement> = claims.into_iter().collect();
        if claims.iter().any(|c| c.kind.is_empty()) {
            return Err(RequirementError::EmptyClaimType);
        }
        self.claims = Some(ClaimDeclaration::Set(claims));
        Ok(self)
    }

    #[must_use]
    pub fn is_public(&self) -> bool {
        self.public
    }

    /// The declared role set, if any. Never empty.
    #[must_use]
    pub fn role_set(&self) -> Option<&[String]> {
        self.roles.as_deref()
    }

    #[must_use]
    pub fn claim_declaration(&self) -> Option<&ClaimDeclaration> {
        self.claims.as_ref()
    }

    /// Returns true if nothing is declared at this level.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.public && self.roles.is_none() && self.claims.is_none()
    }

    /// The declarations of this level in tagged form.
    #[must_use]
    pub fn declarations(&self) -> Vec<AuthorizationRequirement> {
        let mut out = Vec::new();
        if self.public {
            out.push(AuthorizationRequirement::Public);
        }
        if let Some(roles) = &self.roles {
            out.push(AuthorizationRequirement::RoleSet {
                roles: roles.clone(),
            });
        }
        match &self.claims {
            Some(ClaimDeclaration::Single(req)) => {
                out.push(AuthorizationRequirement::Claim(req.clone()));
            }
            Some(ClaimDeclaration::Set(reqs)) => out.push(AuthorizationRequirement::ClaimSet {
                requirements: reqs.clone(),
            }),
            None => {}
        }
        out
    }
}

/// Group-level and operation-level declarations for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequirements {
    #[serde(default)]
    pub group: Requirements,
    #[serde(default)]
    pub operation: Requirements,
}

impl OperationRequirements {
    #[must_use]
    pub fn new(group: Requirements, operation: Requirements) -> Self {
        Self { group, operation }
    }

    /// Requirements declared only on the operation.
    #[must_use]
    pub fn operation_only(operation: Requirements) -> Self {
        Self {
            group: Requirements::default(),
            operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> Principal {
        Principal::new("u-1")
            .with_role("Moderator")
            .with_claim("permission", "write:docs")
    }

    #[test]
    fn empty_role_set_is_rejected() {
        let err = Requirements::new().roles(Vec::<String>::new()).unwrap_err();
        assert_eq!(err, RequirementError::EmptyRoleSet);
    }

    #[test]
    fn empty_claim_type_is_rejected() {
        let err = Requirements::new()
            .claim(ClaimRequirement::of_type(""))
            .unwrap_err();
        assert_eq!(err, RequirementError::EmptyClaimType);
    }

    #[test]
    fn later_claim_declaration_replaces_earlier() {
        let reqs = Requirements::new()
            .claim(ClaimRequirement::of_type("dept"))
            .unwrap()
            .claims([ClaimRequirement::new("permission", "write:docs")])
            .unwrap();
        assert!(matches!(reqs.claim_declaration(), Some(ClaimDeclaration::Set(v)) if v.len() == 1));
    }

    #[test]
    fn role_set_is_or() {
        let req = AuthorizationRequirement::RoleSet {
            roles: vec!["Admin".into(), "Moderator".into()],
        };
        assert!(req.is_satisfied_by(&principal()));
    }

    #[test]
    fn claim_set_is_and() {
        let req = AuthorizationRequirement::ClaimSet {
            requirements: vec![
                ClaimRequirement::new("permission", "write:docs"),
                ClaimRequirement::new("dept", "eng"),
            ],
        };
        assert!(!req.is_satisfied_by(&principal()));
        assert!(req.is_satisfied_by(&principal().with_claim("dept", "eng")));
    }

    #[test]
    fn first_unmet_reports_in_declaration_order() {
        let decl = ClaimDeclaration::Set(vec![
            ClaimRequirement::of_type("permission"),
            ClaimRequirement::new("dept", "eng"),
            ClaimRequirement::of_type("region"),
        ]);
        let unmet = decl.first_unmet(&principal()).unwrap();
        assert_eq!(unmet.kind, "dept");
    }

    #[test]
    fn declarations_lists_tagged_form() {
        let reqs = Requirements::new()
            .public()
            .roles(["Admin"])
            .unwrap()
            .claim(ClaimRequirement::of_type("dept"))
            .unwrap();
        let decls = reqs.declarations();
        assert_eq!(decls.len(), 3);
        assert_eq!(decls[0], AuthorizationRequirement::Public);
        assert!(matches!(decls[2], AuthorizationRequirement::Claim(_)));
    }

    #[test]
    fn requirements_deserialize_from_json() {
        let reqs: Requirements = serde_json::from_value(serde_json::json!({
            "roles": ["Admin"],
            "claims": [{"type": "dept", "value": "eng"}, {"type": "region"}]
        }))
        .unwrap();
        assert_eq!(reqs.role_set(), Some(&["Admin".to_string()][..]));
        let claims = reqs.claim_declaration().unwrap();
        assert_eq!(claims.requirements().len(), 2);
        assert_eq!(claims.requirements()[1].value, None);
    }

    #[test]
    fn deserializing_empty_role_set_is_rejected() {
        let err = serde_json::from_value::<Requirements>(serde_json::json!({ "roles": [] }))
            .unwrap_err();
        assert!(err.to_string().contains("at least one role"));

        let reqs: OperationRequirements = serde_json::from_value(serde_json::json!({
            "group": { "roles": ["User"] },
            "operation": {}
        }))
        .unwrap();
        assert_eq!(reqs.group.role_set(), Some(&["User".to_string()][..]));
        assert!(serde_json::from_value::<OperationRequirements>(serde_json::json!({
            "group": { "roles": ["User"] },
            "operation": { "roles": [] }
        }))
        .is_err());
    }

    #[test]
    fn deserializing_empty_claim_type_is_rejected() {
        assert!(serde_json::from_value::<Requirements>(serde_json::json!({
            "claims": { "type": "" }
        }))
        .is_err());
    }

    #[test]
    fn serialized_requirements_read_back_unchanged() {
        let reqs = Requirements::new()
            .roles(["Admin"])
            .unwrap()
            .claim(ClaimRequirement::new("dept", "eng"))
            .unwrap();
        let value = serde_json::to_value(&reqs).unwrap();
        assert_eq!(serde_json::from_value::<Requirements>(value).unwrap(), reqs);
    }
}
