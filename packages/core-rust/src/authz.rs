//! Authorization resolution.
//!
//! Resolution runs in two stages:
//!
//! 1. [`merge`] folds group-level and operation-level declarations into
//!    [`EffectiveRequirements`]. `Public` at either level wins outright;
//!    otherwise the operation level overrides the group level separately
//!    for the role category and the claim category.
//! 2. [`evaluate`] checks the effective requirements against a principal:
//!    roles with OR semantics, then claims with AND semantics.
//!
//! [`Authorizer`] wires both stages to the ambient context and the optional
//! [`AuthProvider`].

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{AuthzError, ForbiddenReason};
use crate::requirement::{ClaimDeclaration, OperationRequirements};
use crate::store::{self, RequestContext};
use crate::traits::AuthProvider;
use crate::types::Principal;

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Requirements in force for one operation after merging both levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectiveRequirements {
    /// `Public` was declared at some level; no checks apply.
    Public,
    /// Role and claim requirements in force (either may be absent).
    Checked {
        roles: Option<Vec<String>>,
        claims: Option<ClaimDeclaration>,
    },
}

impl EffectiveRequirements {
    /// Returns true if nothing needs to be checked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Public => true,
            Self::Checked { roles, claims } => roles.is_none() && claims.is_none(),
        }
    }
}

/// Merges group-level and operation-level declarations.
#[must_use]
pub fn merge(reqs: &OperationRequirements) -> EffectiveRequirements {
    let (group, op) = (&reqs.group, &reqs.operation);
    if group.is_public() || op.is_public() {
        return EffectiveRequirements::Public;
    }
    EffectiveRequirements::Checked {
        roles: op.role_set().or(group.role_set()).map(<[String]>::to_vec),
        claims: op.claim_declaration().or(group.claim_declaration()).cloned(),
    }
}

// ---------------------------------------------------------------------------
// Evaluate
// ---------------------------------------------------------------------------

/// Checks `reqs` against `principal`.
///
/// # Errors
///
/// - [`AuthzError::Unauthenticated`] if a requirement exists and `principal`
///   is `None`.
/// - [`AuthzError::Forbidden`] naming the first unmet role set or claim.
pub fn evaluate(
    reqs: &EffectiveRequirements,
    principal: Option<&Principal>,
) -> Result<(), AuthzError> {
    let EffectiveRequirements::Checked { roles, claims } = reqs else {
        return Ok(());
    };
    if roles.is_none() && claims.is_none() {
        return Ok(());
    }

    let principal = principal.ok_or(AuthzError::Unauthenticated)?;

    if let Some(required) = roles {
        if !principal.has_any_role(required) {
            return Err(AuthzError::Forbidden(ForbiddenReason::MissingRole {
                required: required.clone(),
            }));
        }
    }

    if let Some(unmet) = claims.as_ref().and_then(|c| c.first_unmet(principal)) {
        return Err(AuthzError::Forbidden(ForbiddenReason::MissingClaim {
            kind: unmet.kind.clone(),
            value: unmet.value.clone(),
        }));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Authorizer
// ---------------------------------------------------------------------------

/// Outcome of a granted authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The operation is public.
    Public,
    /// Nothing was required.
    NotRequired,
    /// Requirements existed and the principal satisfied them.
    Granted,
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
///
/// The scheme is matched case-insensitively; an empty token is treated as
/// absent.
#[must_use]
pub fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Resolves and evaluates requirements for the current request.
#[derive(Clone, Default)]
pub struct Authorizer {
    provider: Option<Arc<dyn AuthProvider>>,
}

impl Authorizer {
    /// An authorizer that relies solely on principals already in context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An authorizer that falls back to `provider` for bearer credentials.
    #[must_use]
    pub fn with_provider(provider: Arc<dyn AuthProvider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    #[must_use]
    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Decides whether the current principal may invoke the operation.
    ///
    /// `authorization` is the raw `Authorization` header value, if any. On
    /// success the resolved principal (if any) is written into the ambient
    /// context.
    ///
    /// # Errors
    ///
    /// Returns the terminal denial as [`AuthzError`]. Provider failures are
    /// never returned; they count as "no principal".
    pub async fn authorize(
        &self,
        reqs: &OperationRequirements,
        authorization: Option<&str>,
    ) -> Result<Decision, AuthzError> {
        let effective = merge(reqs);
        if effective == EffectiveRequirements::Public {
            debug!("public operation, skipping authorization");
            return Ok(Decision::Public);
        }

        let ctx = store::current();
        let principal = self.resolve_principal(ctx.as_ref(), authorization).await;

        evaluate(&effective, principal.as_deref()).inspect_err(|err| {
            debug!(
                user_id = principal.as_ref().map(|p| p.id.as_str()),
                error = %err,
                "authorization denied"
            );
        })?;

        if let (Some(ctx), Some(principal)) = (&ctx, principal) {
            ctx.set_principal(principal);
        }

        if effective.is_empty() {
            Ok(Decision::NotRequired)
        } else {
            Ok(Decision::Granted)
        }
    }

    /// Principal from context, else from the provider via the bearer token.
    async fn resolve_principal(
        &self,
        ctx: Option<&RequestContext>,
        authorization: Option<&str>,
    ) -> Option<Arc<Principal>> {
        if let Some(principal) = ctx.and_then(RequestContext::principal) {
            return Some(principal);
        }

        let provider = self.provider.as_ref()?;
        let token = authorization.and_then(parse_bearer)?;

        match provider.validate_token(token).await {
            Ok(principal) if principal.id.is_empty() => {
                warn!("authentication provider returned a principal without an id");
                None
            }
            Ok(principal) => Some(Arc::new(principal)),
            Err(err) => {
                warn!(error = %err, "authentication provider failure, treating as anonymous");
                None
            }
        }
    }
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer")
            .field("has_provider", &self.has_provider())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use proptest::prelude::*;

    use super::*;
    use crate::context::ContextRecord;
    use crate::error::ProviderError;
    use crate::requirement::{ClaimRequirement, Requirements};

    /// Provider that accepts `good-<id>` tokens and counts its calls.
    #[derive(Default)]
    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AuthProvider for CountingProvider {
        async fn validate_token(&self, token: &str) -> Result<Principal, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            match token.strip_prefix("good-") {
                Some(id) => Ok(Principal::new(id).with_role("User")),
                None if token == "expired" => Err(ProviderError::Expired),
                None => Err(ProviderError::InvalidToken(token.to_string())),
            }
        }
    }

    fn roles(list: &[&str]) -> Requirements {
        Requirements::new().roles(list.iter().copied()).unwrap()
    }

    #[test]
    fn operation_roles_override_group_roles() {
        let reqs = OperationRequirements::new(roles(&["User"]), roles(&["Admin"]));
        let user = Principal::new("u").with_role("User");
        let err = evaluate(&merge(&reqs), Some(&user)).unwrap_err();
        assert_eq!(
            err,
            AuthzError::Forbidden(ForbiddenReason::MissingRole {
                required: vec!["Admin".into()]
            })
        );
    }

    #[test]
    fn group_roles_apply_when_operation_declares_none() {
        let reqs = OperationRequirements::new(roles(&["User"]), Requirements::new());
        let user = Principal::new("u").with_role("User");
        assert!(evaluate(&merge(&reqs), Some(&user)).is_ok());
    }

    #[test]
    fn categories_override_independently() {
        // Operation overrides claims only; group roles stay in force.
        let group = roles(&["Admin"])
            .claim(ClaimRequirement::new("dept", "ops"))
            .unwrap();
        let op = Requirements::new()
            .claim(ClaimRequirement::new("dept", "eng"))
            .unwrap();
        let effective = merge(&OperationRequirements::new(group, op));

        let eng_admin = Principal::new("a").with_role("Admin").with_claim("dept", "eng");
        let eng_user = Principal::new("b").with_role("User").with_claim("dept", "eng");
        let ops_admin = Principal::new("c").with_role("Admin").with_claim("dept", "ops");

        assert!(evaluate(&effective, Some(&eng_admin)).is_ok());
        assert!(matches!(
            evaluate(&effective, Some(&eng_user)),
            Err(AuthzError::Forbidden(ForbiddenReason::MissingRole { .. }))
        ));
        assert!(matches!(
            evaluate(&effective, Some(&ops_admin)),
            Err(AuthzError::Forbidden(ForbiddenReason::MissingClaim { .. }))
        ));
    }

    #[test]
    fn claim_set_requires_every_claim() {
        let op = Requirements::new()
            .claims([
                ClaimRequirement::new("permission", "write:docs"),
                ClaimRequirement::new("dept", "eng"),
            ])
            .unwrap();
        let effective = merge(&OperationRequirements::operation_only(op));
        let partial = Principal::new("u").with_claim("permission", "write:docs");
        let err = evaluate(&effective, Some(&partial)).unwrap_err();
        assert_eq!(
            err,
            AuthzError::Forbidden(ForbiddenReason::MissingClaim {
                kind: "dept".into(),
                value: Some("eng".into())
            })
        );
        let full = partial.with_claim("dept", "eng");
        assert!(evaluate(&effective, Some(&full)).is_ok());
    }

    #[test]
    fn type_only_claim_accepts_any_value() {
        let op = Requirements::new()
            .claim(ClaimRequirement::of_type("dept"))
            .unwrap();
        let effective = merge(&OperationRequirements::operation_only(op));
        let p = Principal::new("u").with_claim("dept", "anything");
        assert!(evaluate(&effective, Some(&p)).is_ok());
    }

    #[test]
    fn role_set_accepts_any_listed_role() {
        let effective = merge(&OperationRequirements::operation_only(roles(&[
            "Admin",
            "Moderator",
        ])));
        let moderator = Principal::new("u").with_role("Moderator");
        assert!(evaluate(&effective, Some(&moderator)).is_ok());
    }

    #[test]
    fn roles_are_checked_before_claims() {
        let op = roles(&["Admin"])
            .claim(ClaimRequirement::of_type("dept"))
            .unwrap();
        let effective = merge(&OperationRequirements::operation_only(op));
        let nobody = Principal::new("u");
        assert!(matches!(
            evaluate(&effective, Some(&nobody)),
            Err(AuthzError::Forbidden(ForbiddenReason::MissingRole { .. }))
        ));
    }

    #[test]
    fn public_at_either_level_short_circuits() {
        let op_public = OperationRequirements::new(roles(&["Admin"]), Requirements::new().public());
        assert_eq!(merge(&op_public), EffectiveRequirements::Public);
        assert!(evaluate(&merge(&op_public), None).is_ok());

        let group_public = OperationRequirements::new(Requirements::new().public(), roles(&["Admin"]));
        assert_eq!(merge(&group_public), EffectiveRequirements::Public);
    }

    #[test]
    fn missing_principal_with_requirement_is_unauthenticated() {
        let effective = merge(&OperationRequirements::operation_only(roles(&["User"])));
        assert_eq!(evaluate(&effective, None), Err(AuthzError::Unauthenticated));
    }

    #[test]
    fn parse_bearer_accepts_only_bearer_scheme() {
        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("bearer   abc "), Some("abc"));
        assert_eq!(parse_bearer("Basic abc"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("abc"), None);
    }

    #[tokio::test]
    async fn public_operation_allows_without_principal() {
        let provider = Arc::new(CountingProvider::default());
        let authorizer = Authorizer::with_provider(provider.clone());
        let reqs = OperationRequirements::new(roles(&["Admin"]), Requirements::new().public());

        let decision = store::run(ContextRecord::new("t"), authorizer.authorize(&reqs, None))
            .await
            .unwrap();
        assert_eq!(decision, Decision::Public);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_requirements_allows_and_attaches_principal() {
        let authorizer = Authorizer::with_provider(Arc::new(CountingProvider::default()));
        let reqs = OperationRequirements::default();

        store::run(ContextRecord::new("t"), async {
            let anonymous = authorizer.authorize(&reqs, None).await.unwrap();
            assert_eq!(anonymous, Decision::NotRequired);
            assert!(store::current().unwrap().user_id().is_none());

            let decision = authorizer
                .authorize(&reqs, Some("Bearer good-42"))
                .await
                .unwrap();
            assert_eq!(decision, Decision::NotRequired);
            let ctx = store::current().unwrap();
            assert_eq!(ctx.user_id().as_deref(), Some("42"));
            assert_eq!(ctx.roles(), vec!["User".to_string()]);
        })
        .await;
    }

    #[tokio::test]
    async fn provider_principal_is_written_to_context() {
        let provider = Arc::new(CountingProvider::default());
        let authorizer = Authorizer::with_provider(provider.clone());
        let reqs = OperationRequirements::operation_only(roles(&["User"]));

        store::run(ContextRecord::new("t"), async {
            let decision = authorizer
                .authorize(&reqs, Some("Bearer good-7"))
                .await
                .unwrap();
            assert_eq!(decision, Decision::Granted);
            assert_eq!(store::current().unwrap().principal().unwrap().id, "7");

            // Principal now in context: the provider is not consulted again.
            authorizer.authorize(&reqs, Some("Bearer good-7")).await.unwrap();
        })
        .await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn eagerly_attached_principal_skips_provider() {
        let provider = Arc::new(CountingProvider::default());
        let authorizer = Authorizer::with_provider(provider.clone());
        let reqs = OperationRequirements::operation_only(roles(&["Admin"]));
        let record = ContextRecord::new("t").with_principal(Principal::new("eager").with_role("User"));

        let result = store::run(record, authorizer.authorize(&reqs, Some("Bearer good-1"))).await;
        assert!(matches!(result, Err(AuthzError::Forbidden(_))));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_credential_is_unauthenticated_without_provider_call() {
        let provider = Arc::new(CountingProvider::default());
        let authorizer = Authorizer::with_provider(provider.clone());
        let reqs = OperationRequirements::operation_only(roles(&["User"]));

        let result = store::run(ContextRecord::new("t"), authorizer.authorize(&reqs, None)).await;
        assert_eq!(result, Err(AuthzError::Unauthenticated));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_errors_downgrade_to_unauthenticated() {
        let authorizer = Authorizer::with_provider(Arc::new(CountingProvider::default()));
        let reqs = OperationRequirements::operation_only(roles(&["User"]));

        for header in ["Bearer expired", "Bearer junk"] {
            let result =
                store::run(ContextRecord::new("t"), authorizer.authorize(&reqs, Some(header))).await;
            assert_eq!(result, Err(AuthzError::Unauthenticated));
        }
    }

    #[tokio::test]
    async fn denied_request_leaves_context_untouched() {
        let authorizer = Authorizer::with_provider(Arc::new(CountingProvider::default()));
        let reqs = OperationRequirements::operation_only(roles(&["Admin"]));

        store::run(ContextRecord::new("t"), async {
            let result = authorizer.authorize(&reqs, Some("Bearer good-3")).await;
            assert!(matches!(result, Err(AuthzError::Forbidden(_))));
            assert!(store::current().unwrap().principal().is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn authorize_outside_scope_still_decides() {
        let authorizer = Authorizer::with_provider(Arc::new(CountingProvider::default()));
        let reqs = OperationRequirements::operation_only(roles(&["User"]));
        let decision = authorizer.authorize(&reqs, Some("Bearer good-1")).await;
        assert_eq!(decision, Ok(Decision::Granted));
    }

    fn arb_level() -> impl Strategy<Value = Requirements> {
        (
            any::<bool>(),
            proptest::option::of(proptest::collection::vec("[A-C]", 1..3)),
            proptest::option::of("[x-z]"),
        )
            .prop_map(|(public, roles, claim)| {
                let mut reqs = Requirements::new();
                if public {
                    reqs = reqs.public();
                }
                if let Some(roles) = roles {
                    reqs = reqs.roles(roles).unwrap();
                }
                if let Some(kind) = claim {
                    reqs = reqs.claim(ClaimRequirement::of_type(kind)).unwrap();
                }
                reqs
            })
    }

    proptest! {
        #[test]
        fn merge_overrides_each_category_independently(group in arb_level(), op in arb_level()) {
            let reqs = OperationRequirements::new(group.clone(), op.clone());
            match merge(&reqs) {
                EffectiveRequirements::Public => prop_assert!(group.is_public() || op.is_public()),
                EffectiveRequirements::Checked { roles, claims } => {
                    prop_assert!(!group.is_public() && !op.is_public());
                    prop_assert_eq!(roles.as_deref(), op.role_set().or(group.role_set()));
                    prop_assert_eq!(claims.as_ref(), op.claim_declaration().or(group.claim_declaration()));
                }
            }
        }
    }
}
